//! A segmented, offset-addressed, append-only record log: a
//! miniature single-topic/single-partition storage engine.
//!
//! Producers submit opaque byte payloads through [`Log::append`]; each
//! is assigned a monotonically increasing 64-bit offset, durably
//! written to the active segment, and immediately visible to
//! concurrent readers calling [`Log::fetch`]. An unclean shutdown is
//! recovered from by scanning on-disk state and truncating any
//! partially written tail record.
//!
//! [`queue::AppendQueue`] and [`queue::run_writer_loop`] are the
//! bounded producer/consumer handoff that funnels many submitting
//! threads onto the single writer thread that mutates the log; the
//! network service that feeds it and the process that owns the writer
//! thread are out of scope for this crate.

pub mod binio;
pub mod error;
pub mod index;
pub mod log;
pub mod queue;
pub mod segment;

pub use error::{Error, Result};
pub use log::Log;
pub use queue::{run_writer_loop, AppendQueue};
