use std::fmt;

/// Enumerates all the errors that can be reported by `devctl`.
///
/// A new variant should only be added when none of the existing ones is
/// general enough to describe the failure; prefer reusing `Channel` or
/// `Decode` with a descriptive string over growing this enum for every
/// individual ioctl or dictionary field.
#[derive(Debug)]
pub enum Error {
    /// A caller-supplied value (a device name, a major number, ...) was
    /// malformed or unknown. Handles themselves can't be invalid in this
    /// API -- the type system rules that out -- so this only covers bad
    /// *values*.
    InvalidArgument(String),

    /// An I/O failure on a pipe, the channel device, or `poll()`.
    Io(std::io::Error),

    /// The driver-control channel reported a failure: a bad ioctl, a
    /// `next_event()` that returned an error, or the channel going
    /// `POLLERR`/`POLLNVAL`/`POLLHUP`.
    Channel(String),

    /// A reply or event dictionary from the kernel was missing a field
    /// this crate requires.
    Decode(String),

    /// The requested device, driver, or major number doesn't exist.
    NotFound,

    /// `Monitor::receive_device` observed a readiness signal but found
    /// the queue empty. This should never happen under a correct
    /// producer; it is reported rather than panicking.
    OutOfBuffer,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Channel(msg) => write!(f, "driver-control channel error: {msg}"),
            Error::Decode(msg) => write!(f, "malformed reply: {msg}"),
            Error::NotFound => write!(f, "device or driver not found"),
            Error::OutOfBuffer => write!(f, "monitor queue empty on signaled fd"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Error::Io(std::io::Error::from(e))
    }
}

/// A `Result` type where the error value is a `devctl::Error`.
pub type Result<T> = std::result::Result<T, Error>;
