//! Error types for rbus operations.

use std::collections::TryReserveError;

use crate::BusError;

/// Alias for `Result<T, rbus::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by bus operations.
///
/// Every variant maps to exactly one errno value through
/// [`Error::errno`], so callers bridging to C-style interfaces get a
/// stable code.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A precondition on an argument was violated.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The bus connection is absent or closed.
    #[error("bus connection is not open")]
    NotConnected,

    /// The bus connection was created before a `fork(2)`.
    #[error("bus connection belongs to another process generation")]
    Forked,

    /// The message is in the wrong phase (sealed or not yet sealed).
    #[error("operation not permitted: {0}")]
    PermissionDenied(&'static str),

    /// A value or container did not match the requested type.
    #[error("type mismatch: expected {expected:?}, found {found:?}")]
    TypeMismatch {
        /// Signature the caller asked for.
        expected: String,
        /// Signature actually present (empty at end of container).
        found: String,
    },

    /// No reply arrived within the call timeout.
    #[error("method call timed out")]
    Timeout,

    /// The peer answered with an error reply.
    #[error(transparent)]
    Remote(BusError),

    /// The process named by a credential lookup no longer exists.
    #[error("no such process: {0}")]
    NoSuchProcess(u32),

    /// Allocation failed.
    #[error("out of memory")]
    NoMemory(#[from] TryReserveError),

    /// The transport or credential source cannot perform the operation.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    /// The peer violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An I/O error from the transport or `/proc`.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the (positive) errno value for this error.
    pub fn errno(&self) -> i32 {
        match self {
            Self::InvalidArgument(_) => libc::EINVAL,
            Self::NotConnected => libc::ENOTCONN,
            Self::Forked => libc::ECHILD,
            Self::PermissionDenied(_) => libc::EPERM,
            Self::TypeMismatch { .. } => libc::ENXIO,
            Self::Timeout => libc::ETIMEDOUT,
            Self::Remote(e) => e.errno(),
            Self::NoSuchProcess(_) => libc::ESRCH,
            Self::NoMemory(_) => libc::ENOMEM,
            Self::NotSupported(_) => libc::EOPNOTSUPP,
            Self::Protocol(_) => libc::EBADMSG,
            Self::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    /// Builds a [`Error::TypeMismatch`].
    pub(crate) fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

impl From<BusError> for Error {
    fn from(e: BusError) -> Self {
        Self::Remote(e)
    }
}
