//! Bounded single-producer-many-submitters -> single-consumer handoff
//! of append jobs, plus the writer-loop driver that pumps them into a
//! [`Log`](crate::log::Log).
//!
//! The core owns this boundary (it is named with its own budget share
//! and failure-translation policy) but not the thread that runs the
//! driver, nor whatever decodes wire requests into `submit` calls.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::log::Log;

/// One queued append, carrying the means to signal its completion back
/// to the submitting thread.
struct AppendJob {
    payload: Vec<u8>,
    completion: mpsc::Sender<Result<u64>>,
}

struct State {
    jobs: VecDeque<AppendJob>,
    shutting_down: bool,
}

/// A bounded FIFO of append jobs. Many submitter threads call
/// [`submit`](AppendQueue::submit); exactly one consumer thread drains
/// it via [`run_writer_loop`].
pub struct AppendQueue {
    capacity: usize,
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl AppendQueue {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "AppendQueue capacity must be nonzero");
        Self {
            capacity,
            state: Mutex::new(State {
                jobs: VecDeque::new(),
                shutting_down: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Enqueues `payload`, blocking while the queue is at capacity,
    /// then blocks the calling thread until the writer loop completes
    /// the job. Returns `ShuttingDown` if the queue is already shut
    /// down, or is shut down while this call is queued or in flight.
    pub fn submit(&self, payload: Vec<u8>) -> Result<u64> {
        let (tx, rx) = mpsc::channel();
        {
            let mut guard = self.state.lock().unwrap();
            loop {
                if guard.shutting_down {
                    return Err(Error::ShuttingDown);
                }
                if guard.jobs.len() < self.capacity {
                    break;
                }
                guard = self.not_full.wait(guard).unwrap();
            }
            guard.jobs.push_back(AppendJob { payload, completion: tx });
        }
        self.not_empty.notify_one();
        rx.recv().unwrap_or(Err(Error::ShuttingDown))
    }

    /// Stops accepting new submissions and wakes every waiter (both
    /// blocked submitters and the consumer) so they can observe
    /// shutdown. Jobs already queued are left for the writer loop to
    /// drain and fail with `ShuttingDown` — that policy belongs to the
    /// driver, not the queue.
    pub fn shutdown(&self) {
        {
            let mut guard = self.state.lock().unwrap();
            guard.shutting_down = true;
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().unwrap().shutting_down
    }

    /// Blocks until a job is available, or returns `None` once the
    /// queue is both empty and shutting down. Intended for the single
    /// writer thread only.
    fn pop(&self) -> Option<AppendJob> {
        let mut guard = self.state.lock().unwrap();
        loop {
            if let Some(job) = guard.jobs.pop_front() {
                drop(guard);
                self.not_full.notify_one();
                return Some(job);
            }
            if guard.shutting_down {
                return None;
            }
            guard = self.not_empty.wait(guard).unwrap();
        }
    }
}

/// Drives the one writer thread: pops jobs from `queue` and hands each
/// payload to `log.append`, completing the job with the result. Once
/// `queue.shutdown()` has been called, jobs still in flight when this
/// loop observes it are completed with `ShuttingDown` instead of being
/// appended, rather than silently dropped; the loop returns once the
/// queue reports empty-and-shutting-down.
///
/// Callers spawn the thread that runs this function and are
/// responsible for calling `queue.shutdown()` and joining that thread;
/// neither the thread nor the submissions that feed `queue` belong to
/// the core.
pub fn run_writer_loop(queue: &AppendQueue, log: &Log) {
    while let Some(job) = queue.pop() {
        let result = if queue.is_shutting_down() {
            Err(Error::ShuttingDown)
        } else {
            log.append(&job.payload)
        };
        let _ = job.completion.send(result);
    }
}
