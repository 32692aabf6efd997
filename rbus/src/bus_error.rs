//! Structured bus errors and the errno translation table.

use std::fmt;

use nix::errno::Errno;

/// Well-known error names.
pub mod names {
    /// Generic failure.
    pub const FAILED: &str = "org.freedesktop.DBus.Error.Failed";
    /// Allocation failure.
    pub const NO_MEMORY: &str = "org.freedesktop.DBus.Error.NoMemory";
    /// No service owns the destination name.
    pub const SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";
    /// The queried name is not owned.
    pub const NAME_HAS_NO_OWNER: &str = "org.freedesktop.DBus.Error.NameHasNoOwner";
    /// No reply arrived before the timeout.
    pub const NO_REPLY: &str = "org.freedesktop.DBus.Error.NoReply";
    /// Generic I/O failure.
    pub const IO_ERROR: &str = "org.freedesktop.DBus.Error.IOError";
    /// Malformed bus address.
    pub const BAD_ADDRESS: &str = "org.freedesktop.DBus.Error.BadAddress";
    /// Operation not supported.
    pub const NOT_SUPPORTED: &str = "org.freedesktop.DBus.Error.NotSupported";
    /// A resource limit was hit.
    pub const LIMITS_EXCEEDED: &str = "org.freedesktop.DBus.Error.LimitsExceeded";
    /// Permission denied.
    pub const ACCESS_DENIED: &str = "org.freedesktop.DBus.Error.AccessDenied";
    /// Authentication failed.
    pub const AUTH_FAILED: &str = "org.freedesktop.DBus.Error.AuthFailed";
    /// No bus server to connect to.
    pub const NO_SERVER: &str = "org.freedesktop.DBus.Error.NoServer";
    /// Operation timed out.
    pub const TIMEOUT: &str = "org.freedesktop.DBus.Error.Timeout";
    /// Network unavailable.
    pub const NO_NETWORK: &str = "org.freedesktop.DBus.Error.NoNetwork";
    /// Address already in use.
    pub const ADDRESS_IN_USE: &str = "org.freedesktop.DBus.Error.AddressInUse";
    /// Connection was closed.
    pub const DISCONNECTED: &str = "org.freedesktop.DBus.Error.Disconnected";
    /// Invalid method arguments.
    pub const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
    /// File not found.
    pub const FILE_NOT_FOUND: &str = "org.freedesktop.DBus.Error.FileNotFound";
    /// File already exists.
    pub const FILE_EXISTS: &str = "org.freedesktop.DBus.Error.FileExists";
    /// No such method.
    pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
    /// No such object.
    pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
    /// No such interface.
    pub const UNKNOWN_INTERFACE: &str = "org.freedesktop.DBus.Error.UnknownInterface";
    /// No such property.
    pub const UNKNOWN_PROPERTY: &str = "org.freedesktop.DBus.Error.UnknownProperty";
    /// Property cannot be written.
    pub const PROPERTY_READ_ONLY: &str = "org.freedesktop.DBus.Error.PropertyReadOnly";
    /// The process id of a connection is unknown.
    pub const UNIX_PROCESS_ID_UNKNOWN: &str = "org.freedesktop.DBus.Error.UnixProcessIdUnknown";
    /// Malformed type signature.
    pub const INVALID_SIGNATURE: &str = "org.freedesktop.DBus.Error.InvalidSignature";
    /// Message contents contradict its header.
    pub const INCONSISTENT_MESSAGE: &str = "org.freedesktop.DBus.Error.InconsistentMessage";
}

/// Prefix of names synthesized for errno values without a dedicated name.
const SYSTEM_ERROR_PREFIX: &str = "System.Error.";

/// A `(name, message)` error as carried by error replies.
///
/// An error with an empty name is *unset*; [`BusError::default`] returns
/// one. Unset errors are never sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusError {
    /// Error name; empty means unset.
    name: String,
    /// Human-readable description.
    message: Option<String>,
}

impl BusError {
    /// Creates a set error.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: Some(message.into()),
        }
    }

    /// Creates an error with a name but no description.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: None,
        }
    }

    /// Creates an error from a name and formatted description.
    pub fn from_fmt(name: impl Into<String>, args: fmt::Arguments<'_>) -> Self {
        Self::new(name, fmt::format(args))
    }

    /// Synthesizes an error from an errno value.
    ///
    /// The name comes from [`errno_to_name`], the message is the system
    /// description of `errno`. Sign is ignored; `0` yields an unset error.
    pub fn from_errno(errno: i32) -> Self {
        let errno = errno.saturating_abs();
        if errno == 0 {
            return Self::default();
        }
        Self::new(errno_to_name(errno), Errno::from_raw(errno).desc())
    }

    /// Like [`BusError::from_errno`] with a caller-formatted description.
    pub fn from_errno_fmt(errno: i32, args: fmt::Arguments<'_>) -> Self {
        let errno = errno.saturating_abs();
        if errno == 0 {
            return Self::default();
        }
        Self::from_fmt(errno_to_name(errno), args)
    }

    /// Returns `true` if a name has been set.
    pub fn is_set(&self) -> bool {
        !self.name.is_empty()
    }

    /// Overwrites name and message.
    pub fn set(&mut self, name: impl Into<String>, message: Option<String>) {
        self.name = name.into();
        self.message = message;
    }

    /// Error name; empty if unset.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns `true` if this error carries `name`.
    pub fn has_name(&self, name: &str) -> bool {
        self.is_set() && self.name == name
    }

    /// Best-effort errno for this error, `EIO` if the name is unknown.
    pub fn errno(&self) -> i32 {
        name_to_errno(&self.name)
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.message, self.is_set()) {
            (_, false) => f.write_str("(unset bus error)"),
            (Some(m), true) => write!(f, "{}: {m}", self.name),
            (None, true) => f.write_str(&self.name),
        }
    }
}

impl std::error::Error for BusError {}

/// Maps an errno value to an error name.
///
/// Pure and deterministic. Values without a dedicated name map to
/// `System.Error.<ERRNO>`, unknown values to [`names::FAILED`].
pub fn errno_to_name(errno: i32) -> String {
    let errno = errno.saturating_abs();
    let name = match errno {
        libc::ENOMEM => names::NO_MEMORY,
        libc::EPERM | libc::EACCES => names::ACCESS_DENIED,
        libc::EINVAL => names::INVALID_ARGS,
        libc::ESRCH => names::UNIX_PROCESS_ID_UNKNOWN,
        libc::ENOENT => names::FILE_NOT_FOUND,
        libc::EEXIST => names::FILE_EXISTS,
        libc::ETIMEDOUT | libc::ETIME => names::TIMEOUT,
        libc::EIO => names::IO_ERROR,
        libc::ENETRESET | libc::ECONNRESET => names::DISCONNECTED,
        libc::EOPNOTSUPP => names::NOT_SUPPORTED,
        libc::EADDRNOTAVAIL => names::BAD_ADDRESS,
        libc::ENOBUFS => names::LIMITS_EXCEEDED,
        libc::EADDRINUSE => names::ADDRESS_IN_USE,
        libc::EBADMSG => names::INCONSISTENT_MESSAGE,
        _ => {
            return match Errno::from_raw(errno) {
                Errno::UnknownErrno => names::FAILED.to_owned(),
                e => format!("{SYSTEM_ERROR_PREFIX}{e:?}"),
            };
        }
    };
    name.to_owned()
}

/// Maps an error name back to an errno value, `EIO` if unknown.
pub fn name_to_errno(name: &str) -> i32 {
    match name {
        names::NO_MEMORY => libc::ENOMEM,
        names::SERVICE_UNKNOWN => libc::EHOSTUNREACH,
        names::NAME_HAS_NO_OWNER => libc::ENXIO,
        names::NO_REPLY | names::TIMEOUT => libc::ETIMEDOUT,
        names::IO_ERROR => libc::EIO,
        names::BAD_ADDRESS => libc::EADDRNOTAVAIL,
        names::NOT_SUPPORTED => libc::EOPNOTSUPP,
        names::LIMITS_EXCEEDED => libc::ENOBUFS,
        names::ACCESS_DENIED | names::AUTH_FAILED => libc::EACCES,
        names::NO_SERVER => libc::ECONNREFUSED,
        names::NO_NETWORK => libc::ENOTCONN,
        names::ADDRESS_IN_USE => libc::EADDRINUSE,
        names::DISCONNECTED => libc::ECONNRESET,
        names::INVALID_ARGS | names::INVALID_SIGNATURE => libc::EINVAL,
        names::FILE_NOT_FOUND
        | names::UNKNOWN_METHOD
        | names::UNKNOWN_OBJECT
        | names::UNKNOWN_INTERFACE
        | names::UNKNOWN_PROPERTY => libc::ENOENT,
        names::FILE_EXISTS => libc::EEXIST,
        names::PROPERTY_READ_ONLY => libc::EPERM,
        names::UNIX_PROCESS_ID_UNKNOWN => libc::ESRCH,
        names::INCONSISTENT_MESSAGE => libc::EBADMSG,
        other => other
            .strip_prefix(SYSTEM_ERROR_PREFIX)
            .and_then(|code| (1..256).find(|&n| format!("{:?}", Errno::from_raw(n)) == code))
            .unwrap_or(libc::EIO),
    }
}
