//! CAN_RAW transport: one socket bound to an interface, explicit receive
//! filters, one frame per read or write.

use libc::{c_void, socklen_t};
use log::{debug, trace};
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use crate::sock::errors::SocketError;
use crate::sock::frame::{CanFilter, CanFrame};
use crate::sock::{can_address, open_can_socket, resolve_ifindex, set_socket_option_mult};

/// A blocking CAN_RAW socket.
///
/// The file descriptor is closed when the socket is dropped.
#[derive(Debug)]
pub struct RawCanSocket {
    fd: RawFd,
}

impl RawCanSocket {
    /// Opens a RAW socket bound to the named interface, e.g. `"vcan0"`.
    pub fn open(interface: &str) -> Result<RawCanSocket, SocketError> {
        let if_index = resolve_ifindex(interface)?;
        let fd = open_can_socket(libc::SOCK_RAW, libc::CAN_RAW)?;

        let addr = can_address(if_index);
        let rv = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_can as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_can>() as socklen_t,
            )
        };
        if rv == -1 {
            let source = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(SocketError::Bind {
                name: interface.to_string(),
                source,
            });
        }

        debug!("opened CAN_RAW socket on '{interface}' (fd {fd})");
        Ok(RawCanSocket { fd })
    }

    /// Installs kernel-side receive filters, replacing any previous set.
    ///
    /// Only frames matching one of the filters are delivered. An empty slice
    /// installs a zero-length filter list and blocks all delivery. The
    /// operation is idempotent.
    pub fn set_filters(&self, filters: &[CanFilter]) -> Result<(), SocketError> {
        trace!("installing {} receive filters (fd {})", filters.len(), self.fd);
        set_socket_option_mult(self.fd, libc::SOL_CAN_RAW, libc::CAN_RAW_FILTER, filters)
    }

    /// Applies a receive deadline to subsequent reads; `None` blocks
    /// forever.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), SocketError> {
        crate::sock::set_read_timeout(self.fd, timeout)
    }

    /// Writes a single frame.
    pub fn send_frame(&self, frame: &CanFrame) -> Result<(), SocketError> {
        let expected = mem::size_of::<CanFrame>();
        let written = unsafe {
            libc::write(self.fd, frame as *const CanFrame as *const c_void, expected)
        };
        if written < 0 {
            return Err(SocketError::Write {
                source: io::Error::last_os_error(),
            });
        }
        if written as usize != expected {
            return Err(SocketError::ShortWrite {
                written: written as usize,
                expected,
            });
        }
        trace!("sent frame {frame:X}");
        Ok(())
    }

    /// Blocks until one frame arrives or the configured deadline expires.
    pub fn recv_frame(&self) -> Result<CanFrame, SocketError> {
        let expected = mem::size_of::<CanFrame>();
        let mut frame = CanFrame::zeroed();
        let read = unsafe {
            libc::read(self.fd, &mut frame as *mut CanFrame as *mut c_void, expected)
        };
        if read < 0 {
            return Err(SocketError::from_read_errno(io::Error::last_os_error()));
        }
        if read as usize != expected {
            return Err(SocketError::ShortRead {
                read: read as usize,
                expected,
            });
        }
        Ok(frame)
    }
}

impl AsRawFd for RawCanSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for RawCanSocket {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}
