use seglog::Log;
use tempfile::tempdir;

fn open_started(dir: &std::path::Path, max_segment_size: u64) -> Log {
    let log = Log::open(dir, max_segment_size).unwrap();
    log.start();
    log
}

const HEADER: u64 = 4;

#[test]
fn rollover_produces_contiguous_base_offsets_and_segment_files() {
    let dir = tempdir().unwrap();
    // Each single-byte payload frames to 5 bytes; cap at 4 per segment.
    let log = open_started(dir.path(), 4 * (HEADER + 1));

    for i in 0u8..98 {
        let offset = log.append(&[i]).unwrap();
        assert_eq!(offset, i as u64);
    }

    // 98 records, 4 per segment -> segments at base offsets 0, 4, 8, ..., 96.
    for base in (0..98).step_by(4) {
        let path = dir.path().join(format!("{base}.log"));
        assert!(path.exists(), "missing segment file for base {base}");
    }
}

#[test]
fn fetch_spans_every_sealed_segment_up_to_active_frontier() {
    let dir = tempdir().unwrap();
    let log = open_started(dir.path(), 4 * (HEADER + 1));
    for i in 0u8..98 {
        log.append(&[i]).unwrap();
    }

    for i in 0u64..98 {
        let buf = log.fetch(i, 100 * (HEADER as usize + 1)).unwrap();
        let expected_records = 98 - i;
        assert_eq!(buf.len() as u64, expected_records * (HEADER + 1));
        for (j, chunk) in buf.chunks(HEADER as usize + 1).enumerate() {
            assert_eq!(chunk[HEADER as usize], (i + j as u64) as u8);
        }
    }
    assert_eq!(log.fetch(98, 1024).unwrap(), Vec::<u8>::new());
}

#[test]
fn sealed_segments_are_read_only_after_rollover() {
    let dir = tempdir().unwrap();
    let log = open_started(dir.path(), 2 * (HEADER + 1));
    for i in 0u8..6 {
        log.append(&[i]).unwrap();
    }
    // base 0 and base 2 are sealed; base 4 is active.
    assert_eq!(log.fetch(0, 1024).unwrap().len(), (6 * (HEADER + 1)) as usize);
    assert_eq!(log.published_offset(), Some(5));
}
