//! # sock
//!
//! SocketCAN transport layer: the wire-level [`CanFrame`](frame::CanFrame)
//! and [`CanFilter`](frame::CanFilter) types shared with the kernel, the
//! [`RawCanSocket`](raw::RawCanSocket) for per-frame I/O with kernel-side
//! receive filters, and the [`BcmSocket`](bcm::BcmSocket) for Broadcast
//! Manager operation where periodic transmission and change-detection
//! filtering run in the kernel.
//!
//! All sockets are blocking; receive deadlines use `SO_RCVTIMEO` and expire
//! as the dedicated [`SocketError::Timeout`](errors::SocketError::Timeout)
//! variant.

pub mod bcm;
pub mod errors;
pub mod frame;
pub mod raw;

pub use errors::{FrameError, SocketError};
pub use frame::{CanFrame, CanFilter};

use libc::{c_int, c_uint, c_void, socklen_t};
use std::io;
use std::mem;
use std::time::Duration;

/// Resolves a CAN interface name such as `"can0"` or `"vcan0"` to its
/// kernel interface index.
pub(crate) fn resolve_ifindex(name: &str) -> Result<c_uint, SocketError> {
    nix::net::if_::if_nametoindex(name).map_err(|errno| SocketError::Interface {
        name: name.to_string(),
        source: io::Error::from_raw_os_error(errno as i32),
    })
}

/// Opens a socket of the CAN protocol family.
pub(crate) fn open_can_socket(sock_type: c_int, protocol: c_int) -> Result<c_int, SocketError> {
    let fd = unsafe { libc::socket(libc::PF_CAN, sock_type, protocol) };
    if fd == -1 {
        return Err(SocketError::Open {
            source: io::Error::last_os_error(),
        });
    }
    Ok(fd)
}

/// Socket address for the given interface index.
pub(crate) fn can_address(if_index: c_uint) -> libc::sockaddr_can {
    let mut addr: libc::sockaddr_can = unsafe { mem::zeroed() };
    addr.can_family = libc::AF_CAN as libc::sa_family_t;
    addr.can_ifindex = if_index as c_int;
    addr
}

pub(crate) fn timeval_from_duration(duration: Duration) -> libc::timeval {
    libc::timeval {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_usec: duration.subsec_micros() as libc::suseconds_t,
    }
}

/// Applies a receive deadline via `SO_RCVTIMEO`; `None` blocks forever.
pub(crate) fn set_read_timeout(fd: c_int, timeout: Option<Duration>) -> Result<(), SocketError> {
    let mut tv = timeval_from_duration(timeout.unwrap_or(Duration::ZERO));
    // A zero timeval means "no timeout" to the kernel; a caller-supplied
    // deadline below one microsecond still has to expire.
    if timeout.is_some() && tv.tv_sec == 0 && tv.tv_usec == 0 {
        tv.tv_usec = 1;
    }
    set_socket_option(fd, libc::SOL_SOCKET, libc::SO_RCVTIMEO, &tv)
}

pub(crate) fn set_socket_option<T>(
    fd: c_int,
    level: c_int,
    name: c_int,
    value: &T,
) -> Result<(), SocketError> {
    let rv = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            value as *const T as *const c_void,
            mem::size_of::<T>() as socklen_t,
        )
    };
    if rv != 0 {
        return Err(SocketError::SetOption {
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Variant of [`set_socket_option`] for options taking an array of values.
/// An empty slice installs a zero-length option, which for the receive
/// filter list means nothing is delivered at all.
pub(crate) fn set_socket_option_mult<T>(
    fd: c_int,
    level: c_int,
    name: c_int,
    values: &[T],
) -> Result<(), SocketError> {
    let rv = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            values.as_ptr() as *const c_void,
            mem::size_of_val(values) as socklen_t,
        )
    };
    if rv != 0 {
        return Err(SocketError::SetOption {
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeval_conversion() {
        let tv = timeval_from_duration(Duration::from_millis(1500));
        assert_eq!(tv.tv_sec, 1);
        assert_eq!(tv.tv_usec, 500_000);

        let tv = timeval_from_duration(Duration::ZERO);
        assert_eq!((tv.tv_sec, tv.tv_usec), (0, 0));
    }
}
