use std::io;
use thiserror::Error;

/// Errors produced while constructing a wire-level CAN frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("CAN payload of {len} bytes exceeds the 8 byte maximum")]
    TooMuchData { len: usize },
    #[error("CAN ID 0x{id:X} does not fit the {format} identifier range")]
    IdTooLarge { id: u32, format: &'static str },
}

/// Errors produced by the RAW and BCM socket transports.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("Failed to resolve CAN interface '{name}'. \nError: {source}")]
    Interface {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to open CAN socket. \nError: {source}")]
    Open {
        #[source]
        source: io::Error,
    },
    #[error("Failed to bind CAN socket to '{name}'. \nError: {source}")]
    Bind {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to connect CAN socket to '{name}'. \nError: {source}")]
    Connect {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to set CAN socket option. \nError: {source}")]
    SetOption {
        #[source]
        source: io::Error,
    },
    #[error("Failed while writing to the CAN socket. \nError: {source}")]
    Write {
        #[source]
        source: io::Error,
    },
    #[error("Failed while reading from the CAN socket. \nError: {source}")]
    Read {
        #[source]
        source: io::Error,
    },
    #[error("Short write to the CAN socket: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("Short read from the CAN socket: {read} of {expected} bytes")]
    ShortRead { read: usize, expected: usize },
    #[error("Receive timed out")]
    Timeout,
}

impl SocketError {
    /// Maps a receive-side OS error, turning the timeout conditions into the
    /// dedicated [`SocketError::Timeout`] variant.
    ///
    /// `EAGAIN` and `EWOULDBLOCK` arrive as `WouldBlock`; `EINPROGRESS` is
    /// the third code the kernel uses for an expired `SO_RCVTIMEO`.
    pub(crate) fn from_read_errno(source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::WouldBlock
            || source.raw_os_error() == Some(libc::EINPROGRESS)
        {
            SocketError::Timeout
        } else {
            SocketError::Read { source }
        }
    }
}
