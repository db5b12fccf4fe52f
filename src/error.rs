//! Crate-wide error taxonomy.
//!
//! The four categories from the error handling design (argument-shape,
//! socket, protocol, thread) all land in [`EngineError`]. A single enum
//! keeps the error slot on [`crate::connection::ManagedConnection`] simple:
//! whatever fails, it is one value that can be cloned into both an
//! `on_error` callback and an `on_closing` callback.

use std::fmt;
use std::io;
use std::sync::Arc;

/// Crate-level result alias.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Everything that can go wrong in the engine, grouped by the taxonomy in
/// the error handling design.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// Rejected configuration: out-of-range pool sizes, buffer bounds, etc.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// An address was rejected before any socket was touched, e.g. a
    /// wildcard port passed to [`crate::accept_registry::AcceptRegistry::register`].
    #[error("invalid address: {reason}")]
    InvalidAddress { reason: String },

    /// A read buffer would have had to grow past `maximum_size` to hold a
    /// single frame.
    #[error("frame of {size} bytes exceeds maximum buffer size {maximum}")]
    FrameTooLarge { size: usize, maximum: usize },

    /// An accept/connect/read/write syscall failed. Wrapped in an `Arc`
    /// since `io::Error` is not `Clone` and the error slot must be
    /// shareable across the `on_error` and `on_closing` callbacks.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// The state table had no handler for `(status, event kind)`, or a
    /// non-blocking `finishConnect` settled without a decisive result.
    #[error("protocol violation: {detail}")]
    Protocol { detail: String },

    /// The selector itself failed (e.g. `Poll::poll` returned a fatal
    /// error). Fatal to every connection owned by that thread.
    #[error("selector thread failed: {detail}")]
    ThreadFailure { detail: String },

    /// Operation attempted on a connection already past `CLOSING`.
    #[error("connection is closed")]
    Closed,
}

/// Thin, `Clone`-able wrapper around [`io::Error`].
#[derive(Debug, Clone)]
pub struct IoError(Arc<io::Error>);

impl From<io::Error> for IoError {
    fn from(e: io::Error) -> Self {
        IoError(Arc::new(e))
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl EngineError {
    /// Convenience constructor for protocol violations, the most common
    /// internally-raised error kind.
    pub fn protocol(detail: impl Into<String>) -> Self {
        EngineError::Protocol {
            detail: detail.into(),
        }
    }
}

impl From<io::Error> for EngineError {
    fn from(e: io::Error) -> Self {
        EngineError::Io(IoError::from(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_is_cloneable_and_displays_inner() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe gone");
        let wrapped: EngineError = EngineError::Io(IoError::from(io_err));
        let cloned = wrapped.clone();
        assert_eq!(wrapped.to_string(), cloned.to_string());
        assert!(wrapped.to_string().contains("pipe gone"));
    }
}
