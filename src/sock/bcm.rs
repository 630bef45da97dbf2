//! CAN_BCM transport: a connected Broadcast Manager socket.
//!
//! BCM is message oriented. Every message starts with a fixed head
//! ([`BcmMsgHead`]) followed by `nframes` 16-byte CAN frames. The kernel
//! executes periodic transmission (`TX_SETUP`) and content-change receive
//! filtering (`RX_SETUP`) on behalf of the process, so a client only writes
//! setup messages and reads `RX_CHANGED` notifications.

use bitflags::bitflags;
use libc::{c_long, c_void};
use log::{debug, trace};
use std::collections::VecDeque;
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use crate::sock::errors::SocketError;
use crate::sock::frame::CanFrame;
use crate::sock::{can_address, open_can_socket, resolve_ifindex};

/// Broadcast Manager operation codes.
pub mod opcode {
    /// Create a (cyclic) transmission task.
    pub const TX_SETUP: u32 = 1;
    /// Remove a (cyclic) transmission task.
    pub const TX_DELETE: u32 = 2;
    /// Read properties of a (cyclic) transmission task.
    pub const TX_READ: u32 = 3;
    /// Send one CAN frame.
    pub const TX_SEND: u32 = 4;
    /// Create an RX content filter subscription.
    pub const RX_SETUP: u32 = 5;
    /// Remove an RX content filter subscription.
    pub const RX_DELETE: u32 = 6;
    /// Read properties of an RX content filter subscription.
    pub const RX_READ: u32 = 7;
    /// Reply to a TX_READ request.
    pub const TX_STATUS: u32 = 8;
    /// Notification when the transmission count expires.
    pub const TX_EXPIRED: u32 = 9;
    /// Reply to an RX_READ request.
    pub const RX_STATUS: u32 = 10;
    /// A cyclic message is absent.
    pub const RX_TIMEOUT: u32 = 11;
    /// The first or a changed CAN message was received.
    pub const RX_CHANGED: u32 = 12;
}

bitflags! {
    /// Flag word of a BCM message head.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BcmFlags: u32 {
        /// Use the ival1, ival2 and count values of this message.
        const SETTIMER = 0x0001;
        /// Start the timer; starting also emits one frame immediately.
        const STARTTIMER = 0x0002;
        /// Emit TX_EXPIRED when the count expires.
        const TX_COUNTEVT = 0x0004;
        /// A data change by the process is emitted immediately.
        const TX_ANNOUNCE = 0x0008;
        /// Copy the can_id of the head into each following frame.
        const TX_CP_CAN_ID = 0x0010;
        /// Filter by can_id alone, no content mask frames required.
        const RX_FILTER_ID = 0x0020;
        /// A changed DLC also leads to RX_CHANGED.
        const RX_CHECK_DLC = 0x0040;
        /// Do not start the timeout monitor on reception.
        const RX_NO_AUTOTIMER = 0x0080;
        /// Emit RX_CHANGED when a cyclic message resumes after a timeout.
        const RX_ANNOUNCE_RESUME = 0x0100;
        /// Reset the multiplex index counter on updates.
        const TX_RESET_MULTI_IDX = 0x0200;
        /// Use the filter frame as the reply to an RTR request.
        const RX_RTR_FRAME = 0x0400;
    }
}

/// Interval field of the BCM head.
///
/// The kernel declares these as two native `long`s, which only coincides
/// with `libc::timeval` on ABIs where `time_t` is `long`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct BcmTimeval {
    pub tv_sec: c_long,
    pub tv_usec: c_long,
}

impl BcmTimeval {
    pub const ZERO: BcmTimeval = BcmTimeval {
        tv_sec: 0,
        tv_usec: 0,
    };

    pub fn from_duration(duration: Duration) -> BcmTimeval {
        BcmTimeval {
            tv_sec: duration.as_secs() as c_long,
            tv_usec: duration.subsec_micros() as c_long,
        }
    }
}

/// Maximum number of frames accepted in one BCM message.
pub const MAX_NFRAMES: u32 = 256;

/// Head of every message to and from the Broadcast Manager, in native byte
/// order and native alignment.
///
/// CAN frames follow directly after the head, so its size has to be a
/// multiple of 8. On 64-bit targets the compiler pads the 12-byte opcode
/// prefix up to the `long`-aligned interval fields and the total lands on
/// 56 bytes; on 32-bit targets the fields pack without interior padding and
/// an explicit trailing pad carries the total from 36 to 40 bytes.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct BcmMsgHead {
    pub opcode: u32,
    pub flags: u32,
    /// Number of ival1 repetitions before switching to ival2.
    pub count: u32,
    /// Interval for the first `count` frames.
    pub ival1: BcmTimeval,
    /// Interval for all following frames.
    pub ival2: BcmTimeval,
    /// Frame id word, including the extended-format flag bit.
    pub can_id: u32,
    /// Number of CAN frames following the head.
    pub nframes: u32,
    #[cfg(target_pointer_width = "32")]
    _pad: u32,
}

const _: () = assert!(mem::size_of::<BcmMsgHead>() % 8 == 0);

#[cfg(target_pointer_width = "64")]
const _: () = {
    assert!(mem::size_of::<BcmMsgHead>() == 56);
    assert!(mem::offset_of!(BcmMsgHead, ival1) == 16);
    assert!(mem::offset_of!(BcmMsgHead, ival2) == 32);
    assert!(mem::offset_of!(BcmMsgHead, can_id) == 48);
    assert!(mem::offset_of!(BcmMsgHead, nframes) == 52);
};

#[cfg(target_pointer_width = "32")]
const _: () = {
    assert!(mem::size_of::<BcmMsgHead>() == 40);
    assert!(mem::offset_of!(BcmMsgHead, ival1) == 12);
    assert!(mem::offset_of!(BcmMsgHead, ival2) == 20);
    assert!(mem::offset_of!(BcmMsgHead, can_id) == 28);
    assert!(mem::offset_of!(BcmMsgHead, nframes) == 32);
};

impl BcmMsgHead {
    fn new(
        opcode: u32,
        flags: BcmFlags,
        count: u32,
        ival1: BcmTimeval,
        ival2: BcmTimeval,
        can_id: u32,
        nframes: u32,
    ) -> BcmMsgHead {
        BcmMsgHead {
            opcode,
            flags: flags.bits(),
            count,
            ival1,
            ival2,
            can_id,
            nframes,
            #[cfg(target_pointer_width = "32")]
            _pad: 0,
        }
    }
}

// Receive buffer: head plus the maximum number of frames.
#[repr(C)]
struct BcmMsg {
    head: BcmMsgHead,
    frames: [CanFrame; MAX_NFRAMES as usize],
}

// Transmit shape for the single-frame messages this transport sends. Only
// ever handed to the kernel as raw bytes.
#[repr(C)]
struct BcmTxMsg {
    _head: BcmMsgHead,
    _frame: CanFrame,
}

/// A blocking, connected CAN_BCM socket.
///
/// The file descriptor is closed when the socket is dropped; kernel-side
/// transmission tasks survive until deleted or the socket closes.
#[derive(Debug)]
pub struct BcmSocket {
    fd: RawFd,
    // RX_CHANGED messages can carry several frames; surplus ones wait here.
    pending: VecDeque<CanFrame>,
}

impl BcmSocket {
    /// Opens a BCM socket connected to the named interface, e.g. `"vcan0"`.
    pub fn open(interface: &str) -> Result<BcmSocket, SocketError> {
        let if_index = resolve_ifindex(interface)?;
        let fd = open_can_socket(libc::SOCK_DGRAM, libc::CAN_BCM)?;

        let addr = can_address(if_index);
        let rv = unsafe {
            libc::connect(
                fd,
                &addr as *const libc::sockaddr_can as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_can>() as libc::socklen_t,
            )
        };
        if rv != 0 {
            let source = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(SocketError::Connect {
                name: interface.to_string(),
                source,
            });
        }

        debug!("opened CAN_BCM socket on '{interface}' (fd {fd})");
        Ok(BcmSocket {
            fd,
            pending: VecDeque::new(),
        })
    }

    /// Starts or updates kernel-side periodic transmission of a frame.
    ///
    /// Re-issuing for the same id replaces the payload while the cycle keeps
    /// running.
    pub fn setup_periodic_tx(
        &self,
        frame: &CanFrame,
        interval: Duration,
    ) -> Result<(), SocketError> {
        debug!(
            "TX_SETUP id 0x{:X} every {} ms",
            frame.id(),
            interval.as_millis()
        );
        let head = BcmMsgHead::new(
            opcode::TX_SETUP,
            BcmFlags::SETTIMER | BcmFlags::STARTTIMER,
            0,
            BcmTimeval::ZERO,
            BcmTimeval::from_duration(interval),
            frame.raw_id(),
            1,
        );
        self.write_with_frame(head, *frame)
    }

    /// Stops periodic transmission of the given id word.
    pub fn stop_periodic_tx(&self, raw_id: u32) -> Result<(), SocketError> {
        debug!("TX_DELETE id 0x{raw_id:X}");
        let head = BcmMsgHead::new(
            opcode::TX_DELETE,
            BcmFlags::empty(),
            0,
            BcmTimeval::ZERO,
            BcmTimeval::ZERO,
            raw_id,
            0,
        );
        self.write_head(head)
    }

    /// Sends one frame immediately, without installing a cycle.
    pub fn send_once(&self, frame: &CanFrame) -> Result<(), SocketError> {
        let head = BcmMsgHead::new(
            opcode::TX_SEND,
            BcmFlags::empty(),
            0,
            BcmTimeval::ZERO,
            BcmTimeval::ZERO,
            frame.raw_id(),
            1,
        );
        self.write_with_frame(head, *frame)
    }

    /// Subscribes to a frame id.
    ///
    /// With a content mask frame, only payload changes under the mask are
    /// delivered (an all-ones mask reports any data change). Without one,
    /// `RX_FILTER_ID` delivers every matching frame. A throttle interval
    /// rate-limits delivery through ival2.
    pub fn setup_rx(
        &self,
        raw_id: u32,
        mask: Option<&CanFrame>,
        throttle: Option<Duration>,
    ) -> Result<(), SocketError> {
        debug!(
            "RX_SETUP id 0x{raw_id:X}, mask {}, throttle {:?}",
            mask.is_some(),
            throttle
        );
        let ival2 = throttle.map_or(BcmTimeval::ZERO, BcmTimeval::from_duration);
        match mask {
            Some(mask_frame) => {
                let head = BcmMsgHead::new(
                    opcode::RX_SETUP,
                    BcmFlags::SETTIMER,
                    0,
                    BcmTimeval::ZERO,
                    ival2,
                    raw_id,
                    1,
                );
                self.write_with_frame(head, *mask_frame)
            }
            None => {
                let head = BcmMsgHead::new(
                    opcode::RX_SETUP,
                    BcmFlags::SETTIMER | BcmFlags::RX_FILTER_ID,
                    0,
                    BcmTimeval::ZERO,
                    ival2,
                    raw_id,
                    0,
                );
                self.write_head(head)
            }
        }
    }

    /// Removes the subscription for the given id word.
    pub fn delete_rx(&self, raw_id: u32) -> Result<(), SocketError> {
        debug!("RX_DELETE id 0x{raw_id:X}");
        let head = BcmMsgHead::new(
            opcode::RX_DELETE,
            BcmFlags::empty(),
            0,
            BcmTimeval::ZERO,
            BcmTimeval::ZERO,
            raw_id,
            0,
        );
        self.write_head(head)
    }

    /// Applies a receive deadline to subsequent reads; `None` blocks
    /// forever.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), SocketError> {
        crate::sock::set_read_timeout(self.fd, timeout)
    }

    /// Blocks until the Broadcast Manager delivers a changed frame, then
    /// yields the message's frames one at a time.
    ///
    /// Non-content messages such as `TX_EXPIRED` or `RX_TIMEOUT` are logged
    /// and skipped.
    pub fn recv_frame(&mut self) -> Result<CanFrame, SocketError> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(frame);
            }

            let mut msg: BcmMsg = unsafe { mem::zeroed() };
            let read = unsafe {
                libc::read(
                    self.fd,
                    &mut msg as *mut BcmMsg as *mut c_void,
                    mem::size_of::<BcmMsg>(),
                )
            };
            if read < 0 {
                return Err(SocketError::from_read_errno(io::Error::last_os_error()));
            }
            if (read as usize) < mem::size_of::<BcmMsgHead>() {
                return Err(SocketError::ShortRead {
                    read: read as usize,
                    expected: mem::size_of::<BcmMsgHead>(),
                });
            }

            if msg.head.opcode == opcode::RX_CHANGED {
                let count = msg.head.nframes.min(MAX_NFRAMES) as usize;
                self.pending.extend(msg.frames[..count].iter().copied());
                trace!(
                    "RX_CHANGED id 0x{:X} with {count} frame(s)",
                    msg.head.can_id
                );
            } else {
                debug!("ignoring BCM message with opcode {}", msg.head.opcode);
            }
        }
    }

    fn write_head(&self, head: BcmMsgHead) -> Result<(), SocketError> {
        self.write_bytes(
            &head as *const BcmMsgHead as *const c_void,
            mem::size_of::<BcmMsgHead>(),
        )
    }

    fn write_with_frame(&self, head: BcmMsgHead, frame: CanFrame) -> Result<(), SocketError> {
        let msg = BcmTxMsg {
            _head: head,
            _frame: frame,
        };
        self.write_bytes(
            &msg as *const BcmTxMsg as *const c_void,
            mem::size_of::<BcmTxMsg>(),
        )
    }

    fn write_bytes(&self, ptr: *const c_void, expected: usize) -> Result<(), SocketError> {
        let written = unsafe { libc::write(self.fd, ptr, expected) };
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
        Ok(())
    }
}

impl AsRawFd for BcmSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for BcmSocket {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_layout_matches_the_kernel() {
        // The frames following the head rely on its 8-byte alignment.
        assert_eq!(mem::size_of::<BcmMsgHead>() % 8, 0);
        assert_eq!(mem::align_of::<BcmTimeval>(), mem::align_of::<c_long>());

        #[cfg(target_pointer_width = "64")]
        {
            assert_eq!(mem::size_of::<BcmMsgHead>(), 56);
            assert_eq!(mem::size_of::<BcmTxMsg>(), 72);
        }
        #[cfg(target_pointer_width = "32")]
        {
            assert_eq!(mem::size_of::<BcmMsgHead>(), 40);
            assert_eq!(mem::size_of::<BcmTxMsg>(), 56);
        }
    }

    #[test]
    fn flag_bits_match_the_kernel_header() {
        assert_eq!((BcmFlags::SETTIMER | BcmFlags::STARTTIMER).bits(), 0x3);
        assert_eq!(BcmFlags::RX_FILTER_ID.bits(), 0x20);
        assert_eq!(BcmFlags::RX_ANNOUNCE_RESUME.bits(), 0x100);
    }

    #[test]
    fn interval_conversion_uses_native_longs() {
        let tv = BcmTimeval::from_duration(Duration::from_millis(2500));
        assert_eq!(tv.tv_sec, 2);
        assert_eq!(tv.tv_usec, 500_000);
        assert_eq!(BcmTimeval::ZERO, BcmTimeval::default());
    }

    #[test]
    fn tx_setup_head_fields() {
        let head = BcmMsgHead::new(
            opcode::TX_SETUP,
            BcmFlags::SETTIMER | BcmFlags::STARTTIMER,
            0,
            BcmTimeval::ZERO,
            BcmTimeval::from_duration(Duration::from_millis(100)),
            0x7,
            1,
        );
        assert_eq!(head.opcode, opcode::TX_SETUP);
        assert_eq!(head.can_id, 0x7);
        assert_eq!(head.flags, 0x3);
        assert_eq!(head.count, 0);
        assert_eq!(head.nframes, 1);
        assert_eq!(head.ival1, BcmTimeval::ZERO);
        assert_eq!(head.ival2.tv_usec, 100_000);
    }
}
