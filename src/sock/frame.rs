use libc::{CAN_EFF_FLAG, CAN_EFF_MASK, CAN_ERR_FLAG, CAN_RTR_FLAG, CAN_SFF_MASK};
use std::fmt;

use crate::sock::errors::FrameError;

/// A CAN frame in the 16-byte layout shared with the kernel.
///
/// Uses the same memory layout as the underlying `can_frame` struct so that
/// frames can be passed to the socket without conversion: a 32-bit id word
/// carrying the EFF/RTR/ERR flag bits, the DLC, three bytes of padding and
/// the 8-byte payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct CanFrame {
    id: u32,
    dlc: u8,
    _pad: u8,
    _res0: u8,
    _res1: u8,
    data: [u8; 8],
}

const _: () = assert!(std::mem::size_of::<CanFrame>() == 16);

impl CanFrame {
    /// Builds a data frame, validating the payload length and the id range
    /// of the chosen format.
    pub fn new(id: u32, extended: bool, data: &[u8]) -> Result<CanFrame, FrameError> {
        if data.len() > 8 {
            return Err(FrameError::TooMuchData { len: data.len() });
        }
        let mut word = id;
        if extended {
            if id > CAN_EFF_MASK {
                return Err(FrameError::IdTooLarge {
                    id,
                    format: "extended",
                });
            }
            word |= CAN_EFF_FLAG;
        } else if id > CAN_SFF_MASK {
            return Err(FrameError::IdTooLarge {
                id,
                format: "standard",
            });
        }

        let mut payload = [0u8; 8];
        payload[..data.len()].copy_from_slice(data);

        Ok(CanFrame {
            id: word,
            dlc: data.len() as u8,
            _pad: 0,
            _res0: 0,
            _res1: 0,
            data: payload,
        })
    }

    /// An all-zero frame, used as a read buffer.
    pub(crate) fn zeroed() -> CanFrame {
        CanFrame {
            id: 0,
            dlc: 0,
            _pad: 0,
            _res0: 0,
            _res1: 0,
            data: [0; 8],
        }
    }

    /// The CAN id without flag bits.
    #[inline]
    pub fn id(&self) -> u32 {
        if self.is_extended() {
            self.id & CAN_EFF_MASK
        } else {
            self.id & CAN_SFF_MASK
        }
    }

    /// The id word including flag bits, as used on the wire and in BCM
    /// message heads.
    #[inline]
    pub fn raw_id(&self) -> u32 {
        self.id
    }

    /// Whether the frame uses the 29-bit extended format.
    #[inline]
    pub fn is_extended(&self) -> bool {
        self.id & CAN_EFF_FLAG != 0
    }

    /// Whether the frame is a remote transmission request.
    #[inline]
    pub fn is_rtr(&self) -> bool {
        self.id & CAN_RTR_FLAG != 0
    }

    /// Whether the frame reports a bus error.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.id & CAN_ERR_FLAG != 0
    }

    /// Payload length in bytes.
    #[inline]
    pub fn dlc(&self) -> u8 {
        self.dlc.min(8)
    }

    /// The transmitted payload bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data[..self.dlc() as usize]
    }

    /// The payload zero-padded to the full 8 bytes, as the signal codec
    /// expects it.
    #[inline]
    pub fn padded_data(&self) -> [u8; 8] {
        let mut padded = [0u8; 8];
        padded[..self.dlc() as usize].copy_from_slice(self.data());
        padded
    }
}

impl fmt::UpperHex for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}#", self.id())?;
        for byte in self.data() {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

/// A kernel receive filter: a frame matches when
/// `received_id & mask == id & mask`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct CanFilter {
    _id: u32,
    _mask: u32,
}

const _: () = assert!(std::mem::size_of::<CanFilter>() == 8);

impl CanFilter {
    /// Builds a filter from a raw id and mask.
    pub fn new(id: u32, mask: u32) -> CanFilter {
        CanFilter {
            _id: id,
            _mask: mask,
        }
    }

    /// Exact-match filter for one frame id.
    ///
    /// The mask covers the full id width of the format plus the EFF flag
    /// bit, so a standard id never matches the extended frame with the same
    /// number and vice versa.
    pub fn exact_match(id: u32, extended: bool) -> CanFilter {
        if extended {
            CanFilter::new(id | CAN_EFF_FLAG, CAN_EFF_FLAG | CAN_EFF_MASK)
        } else {
            CanFilter::new(id, CAN_EFF_FLAG | CAN_SFF_MASK)
        }
    }
}
