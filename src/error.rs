use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the reactor and offload core.
///
/// Stale notifications are not represented here: the reactor drops them
/// silently with a debug record.
#[derive(Debug, Error)]
pub enum Error {
    /// A directive referenced a thread pool that was never declared.
    #[error("unknown thread pool \"{0}\"")]
    UnknownPool(String),

    /// The same pool name was declared twice.
    #[error("duplicate thread pool \"{0}\"")]
    DuplicatePool(String),

    /// A directive parameter failed to parse.
    #[error("invalid thread pool parameter \"{0}\"")]
    InvalidParam(String),

    /// The intake queue is at capacity; the submission was rejected and
    /// the task's event left inactive.
    #[error("thread pool \"{pool}\" queue overflow: {depth} tasks waiting")]
    QueueOverflow { pool: String, depth: usize },

    /// No connection occupies the given registry slot.
    #[error("unknown connection slot {0}")]
    UnknownConn(usize),

    /// Semaphore, notify channel, signal mask or thread creation
    /// failure. Fatal for the worker at init.
    #[error("platform error: {0}")]
    Platform(#[source] io::Error),

    /// A backend add/del failed. Fatal for the affected connection.
    #[error("event backend error: {0}")]
    Backend(#[source] io::Error),
}
