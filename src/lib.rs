//! # can_sock
//!
//! Rust access to **CAN buses** on Linux through SocketCAN, driven by
//! declarative frame and signal definitions.
//!
//! ## Highlights
//! - **Configuration model**: describe frames and bit-level signals in code
//!   or load them from a KCD file into a
//!   [`Configuration`](crate::config::configuration::Configuration).
//! - **Bit-exact codec**: pack and unpack signed/unsigned signals of 1 to 64
//!   bits at any start position, little or big endian, with linear scaling
//!   and clamping.
//! - **RAW transport**: per-frame I/O with kernel-side receive filters via
//!   [`RawCanSocket`](crate::sock::raw::RawCanSocket).
//! - **Broadcast Manager**: kernel-side periodic transmission and
//!   change-filtered reception via [`BcmSocket`](crate::sock::bcm::BcmSocket).
//! - **Signal-level bus**: [`Bus`](crate::bus::Bus) binds a configuration to
//!   one transport and exchanges maps of signal name to value.
//!
//! Multiplexed signals, CAN FD payloads, error frames and remote requests
//! are out of scope.

pub mod bus;
pub mod codec;
pub mod config;
#[cfg(feature = "kcd")]
pub mod kcd;
pub mod sock;

// Convenience re-exports of the main entry points
pub use crate::bus::{Bus, BusError};
pub use crate::config::configuration::Configuration;
pub use crate::config::errors::{CodecError, ConfigError};
pub use crate::config::frame::{FrameDef, FrameFormat};
pub use crate::config::signal::{ByteOrder, SignalDef, ValueKind};
pub use crate::sock::{CanFilter, CanFrame, FrameError, SocketError};
