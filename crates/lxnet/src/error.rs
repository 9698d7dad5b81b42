//! Error types for the connection layer.

use crate::msg::HEADER_SIZE;
use crate::pipeline::PipelineError;
use crate::pool::PoolError;

/// Errors surfaced by handle, framing, and I/O operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// A handle pool has no free slot and is not allowed to grow.
    #[error("{pool} exhausted ({capacity} slots in use)")]
    PoolExhausted {
        /// Name of the exhausted pool.
        pool: &'static str,
        /// Configured capacity.
        capacity: usize,
    },

    /// A pool key did not match a live slot.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The caller broke an API contract (programmer error).
    #[error("caller contract violated: {0}")]
    Contract(&'static str),

    /// An argument was rejected before any I/O was attempted.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The message does not carry any payload beyond its header.
    #[error("message length {length} must exceed the {HEADER_SIZE}-byte header")]
    MessageTooShort {
        /// Length found in the header.
        length: usize,
    },

    /// The message (plus trailing data) reaches the size limit.
    #[error("message length {length} reaches the {max}-byte limit")]
    MessageTooLarge {
        /// Combined length of the outgoing unit.
        length: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Accepting the send would push the queued output past the send-critical threshold.
    #[error("send backlog {outstanding} + {incoming} bytes exceeds critical {critical}")]
    SendCritical {
        /// Bytes already queued and not yet flushed.
        outstanding: usize,
        /// Bytes this call wanted to queue.
        incoming: usize,
        /// Configured threshold.
        critical: usize,
    },

    /// The peer sent something that cannot be framed.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The handle is closed.
    #[error("connection closed")]
    Closed,

    /// A payload transform failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Report a caller contract violation: panics in debug builds, returns an error otherwise.
pub(crate) fn contract_violation(what: &'static str) -> NetError {
    debug_assert!(false, "caller contract violated: {what}");
    NetError::Contract(what)
}
