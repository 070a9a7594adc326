//! Error types.

use thiserror::Error;

/// Errors reported by a [`Driver`](crate::transport::Driver) implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DrvError {
    /// The remote end of the session has been closed.
    #[error("socket closed by peer")]
    SocketClosed,

    /// No peer is listening on the requested device.
    #[error("no peer available")]
    NoPeer,

    /// The handle does not refer to a live driver object.
    #[error("invalid handle")]
    InvalidHandle,

    /// Any other driver error code.
    #[error("driver error code {0}")]
    Code(i32),
}

/// Result of a driver call.
pub type DrvResult<T> = std::result::Result<T, DrvError>;

/// Errors returned by this library.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A size, handle or role precondition does not hold.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A buffer or message header could not be allocated.
    #[error("allocation failure: {0}")]
    AllocationFailure(String),

    /// Accept or connect did not complete; usually retryable.
    #[error("connection failure: {0}")]
    ConnectionFailure(DrvError),

    /// The peer gracefully closed the session.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Protocol mismatch or an underlying primitive error.
    #[error("communication failure: {0}")]
    CommFailure(String),

    /// A transfer does not fit the registered fast-path buffer.
    #[error("length {requested} is out of range (capacity {capacity})")]
    OutOfRange { requested: usize, capacity: usize },
}

impl Error {
    /// Translate a driver receive error, keeping peer closure distinguishable.
    pub(crate) fn from_recv(e: DrvError) -> Self {
        match e {
            DrvError::SocketClosed => Error::ConnectionClosed,
            e => Error::CommFailure(format!("recv: {}", e)),
        }
    }

    /// Translate a driver error on a messaging or transfer path.
    pub(crate) fn comm(what: &str, e: DrvError) -> Self {
        Error::CommFailure(format!("{}: {}", what, e))
    }

    /// Return `true` if this is a graceful peer closure.
    #[inline]
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Error::ConnectionClosed)
    }
}

/// Result type of this library.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recv_errors_keep_closure_distinct() {
        assert_eq!(Error::from_recv(DrvError::SocketClosed), Error::ConnectionClosed);
        assert!(matches!(
            Error::from_recv(DrvError::Code(7)),
            Error::CommFailure(_)
        ));
        assert!(!Error::from_recv(DrvError::NoPeer).is_connection_closed());
    }
}
