//! # bus
//!
//! The [`Bus`] façade binds one [`Configuration`] to one open transport and
//! moves traffic at the signal level: callers pass maps of signal name to
//! physical value and get the same shape back on receive. Frames are
//! assembled through the signal codec; the transport only ever sees wire
//! frames.
//!
//! The bus is blocking and single threaded. In BCM mode, periodic
//! transmission and receive-side change filtering run inside the kernel;
//! every cyclic frame started through [`Bus::send_signals`] is deleted
//! again when the bus closes.

use log::debug;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;
use thiserror::Error;

use crate::config::configuration::Configuration;
use crate::config::errors::{CodecError, ConfigError};
use crate::config::frame::FrameDef;
use crate::sock::bcm::BcmSocket;
use crate::sock::errors::{FrameError, SocketError};
use crate::sock::frame::{CanFilter, CanFrame};
use crate::sock::raw::RawCanSocket;

/// Errors returned by [`Bus`] operations.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Unknown signal name '{name}'")]
    UnknownSignal { name: String },
    #[error("No frame with id 0x{frame_id:X} in the configuration")]
    UnknownFrame { frame_id: u32 },
    #[error("Frame 0x{frame_id:X} has no kernel-side cycle on this transport")]
    PeriodicNotSupported { frame_id: u32 },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[cfg(feature = "kcd")]
    #[error(transparent)]
    KcdSave(#[from] crate::kcd::errors::KcdSaveError),
}

enum Transport {
    Raw(RawCanSocket),
    Bcm(BcmSocket),
}

/// A configuration bound to one open SocketCAN transport.
///
/// The socket is owned exclusively by the bus and released when the bus is
/// dropped or [`closed`](Bus::close); the configuration is treated as
/// immutable for the lifetime of the binding.
pub struct Bus {
    config: Configuration,
    transport: Transport,
    // Last payload written per frame id, so signals omitted from later
    // sends keep their previously transmitted value.
    last_payloads: HashMap<u32, [u8; 8]>,
    // Frame ids with an active kernel-side transmission cycle.
    periodic_ids: BTreeSet<u32>,
}

impl Bus {
    /// Opens a bus in RAW mode on the named interface.
    pub fn open_raw(config: Configuration, interface: &str) -> Result<Bus, BusError> {
        let socket = RawCanSocket::open(interface)?;
        Ok(Bus {
            config,
            transport: Transport::Raw(socket),
            last_payloads: HashMap::new(),
            periodic_ids: BTreeSet::new(),
        })
    }

    /// Opens a bus in Broadcast Manager mode on the named interface.
    pub fn open_bcm(config: Configuration, interface: &str) -> Result<Bus, BusError> {
        let socket = BcmSocket::open(interface)?;
        Ok(Bus {
            config,
            transport: Transport::Bcm(socket),
            last_payloads: HashMap::new(),
            periodic_ids: BTreeSet::new(),
        })
    }

    /// The bound configuration.
    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// Installs reception for every frame this node does not produce.
    ///
    /// In RAW mode, exact-match kernel filters are installed; with nothing
    /// to receive, an empty filter list blocks all delivery. In BCM mode,
    /// each incoming frame gets a change-filter subscription with an
    /// all-ones content mask and the frame's throttle time, if any.
    pub fn init_reception(&mut self) -> Result<(), BusError> {
        let incoming = self.config.frames_for_others();
        match &mut self.transport {
            Transport::Raw(socket) => {
                let filters: Vec<CanFilter> = incoming
                    .iter()
                    .filter_map(|frame_id| self.config.frame_by_id(*frame_id))
                    .map(|frame| CanFilter::exact_match(frame.frame_id, frame.is_extended()))
                    .collect();
                socket.set_filters(&filters)?;
            }
            Transport::Bcm(socket) => {
                for frame_id in incoming {
                    let frame = self
                        .config
                        .frame_by_id(frame_id)
                        .ok_or(BusError::UnknownFrame { frame_id })?;
                    let mask = change_mask(frame)?;
                    let throttle = frame
                        .throttle_time_ms
                        .map(|ms| Duration::from_millis(ms as u64));
                    socket.setup_rx(mask.raw_id(), Some(&mask), throttle)?;
                }
            }
        }
        Ok(())
    }

    /// Encodes and sends the given signal values.
    ///
    /// Values are grouped by frame and written in ascending frame-id order.
    /// Signals of a frame that are not part of `values` keep their last
    /// transmitted value; on the first send of a frame they start from
    /// their `default_value`. Unknown names fail the whole call before any
    /// frame is written.
    ///
    /// In RAW mode each frame is written once. In BCM mode frames with a
    /// cycle time (re)install a kernel transmission cycle and all others
    /// are sent once.
    pub fn send_signals(&mut self, values: &BTreeMap<String, f64>) -> Result<(), BusError> {
        let mut by_frame: BTreeMap<u32, Vec<(&str, f64)>> = BTreeMap::new();
        for (name, value) in values {
            let (frame_id, _) =
                self.config
                    .find_signal(name)
                    .ok_or_else(|| BusError::UnknownSignal {
                        name: name.clone(),
                    })?;
            by_frame
                .entry(frame_id)
                .or_default()
                .push((name.as_str(), *value));
        }

        for (frame_id, updates) in by_frame {
            let frame = self
                .config
                .frame_by_id(frame_id)
                .ok_or(BusError::UnknownFrame { frame_id })?;
            let payload = assemble_payload(
                frame,
                self.last_payloads.get(&frame_id).copied(),
                &updates,
            )?;
            let wire = CanFrame::new(
                frame.frame_id,
                frame.is_extended(),
                &payload[..frame.dlc as usize],
            )?;

            match &self.transport {
                Transport::Raw(socket) => socket.send_frame(&wire)?,
                Transport::Bcm(socket) => match frame.cycle_time_ms {
                    Some(cycle) => {
                        socket
                            .setup_periodic_tx(&wire, Duration::from_millis(cycle as u64))?;
                        self.periodic_ids.insert(frame_id);
                    }
                    None => socket.send_once(&wire)?,
                },
            }
            self.last_payloads.insert(frame_id, payload);
        }
        Ok(())
    }

    /// Receives one frame and decodes every signal defined for it.
    ///
    /// Frames with ids outside the configuration are skipped. Returns
    /// [`SocketError::Timeout`] (wrapped in [`BusError::Socket`]) if
    /// nothing arrives within `timeout`; `None` blocks forever.
    pub fn recv_next_signals(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<BTreeMap<String, f64>, BusError> {
        loop {
            let wire = match &mut self.transport {
                Transport::Raw(socket) => {
                    socket.set_read_timeout(timeout)?;
                    socket.recv_frame()?
                }
                Transport::Bcm(socket) => {
                    socket.set_read_timeout(timeout)?;
                    socket.recv_frame()?
                }
            };
            match self.config.frame_by_id(wire.id()) {
                Some(frame) => return Ok(decode_frame(frame, &wire)?),
                None => debug!("skipping frame with unknown id 0x{:X}", wire.id()),
            }
        }
    }

    /// Stops the kernel-side transmission cycle of one frame (BCM only).
    pub fn stop_periodic_send(&mut self, frame_id: u32) -> Result<(), BusError> {
        let frame = self
            .config
            .frame_by_id(frame_id)
            .ok_or(BusError::UnknownFrame { frame_id })?;
        match &self.transport {
            Transport::Bcm(socket) => {
                if !self.periodic_ids.remove(&frame_id) {
                    return Err(BusError::PeriodicNotSupported { frame_id });
                }
                let wire = CanFrame::new(frame.frame_id, frame.is_extended(), &[])?;
                socket.stop_periodic_tx(wire.raw_id())?;
                Ok(())
            }
            Transport::Raw(_) => Err(BusError::PeriodicNotSupported { frame_id }),
        }
    }

    /// Writes the bound configuration to a `.kcd` file.
    #[cfg(feature = "kcd")]
    pub fn write_configuration(&self, path: &str) -> Result<(), BusError> {
        crate::kcd::save::to_file(path, &self.config)?;
        Ok(())
    }

    /// Stops every active transmission cycle and closes the socket.
    pub fn close(mut self) -> Result<(), BusError> {
        self.teardown_periodic()?;
        Ok(())
    }

    fn teardown_periodic(&mut self) -> Result<(), BusError> {
        let Transport::Bcm(socket) = &self.transport else {
            self.periodic_ids.clear();
            return Ok(());
        };
        let active: Vec<u32> = self.periodic_ids.iter().copied().collect();
        for frame_id in active {
            if let Some(frame) = self.config.frame_by_id(frame_id) {
                let wire = CanFrame::new(frame.frame_id, frame.is_extended(), &[])?;
                socket.stop_periodic_tx(wire.raw_id())?;
            }
            self.periodic_ids.remove(&frame_id);
        }
        Ok(())
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        self.teardown_periodic().ok(); // ignore result
    }
}

/// Builds the payload of one frame from its previous payload, or from the
/// signal defaults on first send, with `updates` applied on top.
fn assemble_payload(
    frame: &FrameDef,
    previous: Option<[u8; 8]>,
    updates: &[(&str, f64)],
) -> Result<[u8; 8], BusError> {
    let mut payload = match previous {
        Some(payload) => payload,
        None => {
            let mut payload = [0u8; 8];
            for signal in &frame.signals {
                signal.encode(signal.default_value, &mut payload)?;
            }
            payload
        }
    };
    for (name, value) in updates {
        let signal = frame
            .signal(name)
            .ok_or_else(|| BusError::UnknownSignal {
                name: name.to_string(),
            })?;
        signal.encode(*value, &mut payload)?;
    }
    Ok(payload)
}

/// Decodes every signal of a frame definition from a received wire frame.
fn decode_frame(
    frame: &FrameDef,
    wire: &CanFrame,
) -> Result<BTreeMap<String, f64>, CodecError> {
    let payload = wire.padded_data();
    let mut values = BTreeMap::new();
    for signal in &frame.signals {
        values.insert(signal.name.clone(), signal.decode(&payload)?);
    }
    Ok(values)
}

/// All-ones content mask over the frame's DLC, so any payload change
/// triggers delivery.
fn change_mask(frame: &FrameDef) -> Result<CanFrame, FrameError> {
    let mask = [0xFFu8; 8];
    CanFrame::new(
        frame.frame_id,
        frame.is_extended(),
        &mask[..frame.dlc as usize],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::frame::FrameFormat;
    use crate::config::signal::{ByteOrder, SignalDef, ValueKind};

    fn test_frame() -> FrameDef {
        let mut frame = FrameDef::new(7, "testframe", 8, FrameFormat::Standard).unwrap();
        let mut with_default =
            SignalDef::new("alpha", 0, 8, ByteOrder::Little, ValueKind::Unsigned).unwrap();
        with_default.default_value = 5.0;
        frame.add_signal(with_default).unwrap();
        frame
            .add_signal(
                SignalDef::new("beta", 8, 8, ByteOrder::Little, ValueKind::Unsigned).unwrap(),
            )
            .unwrap();
        frame
    }

    #[test]
    fn first_send_fills_defaults_for_unspecified_signals() {
        let frame = test_frame();
        let payload = assemble_payload(&frame, None, &[("beta", 9.0)]).unwrap();
        assert_eq!(payload[0], 5); // default of 'alpha'
        assert_eq!(payload[1], 9);
    }

    #[test]
    fn later_sends_keep_previously_sent_bits() {
        let frame = test_frame();
        let first = assemble_payload(&frame, None, &[("alpha", 17.0)]).unwrap();
        assert_eq!(first[0], 17);

        let second = assemble_payload(&frame, Some(first), &[("beta", 3.0)]).unwrap();
        assert_eq!(second[0], 17); // retained, not the default
        assert_eq!(second[1], 3);
    }

    #[test]
    fn unknown_update_name_is_an_error() {
        let frame = test_frame();
        assert!(matches!(
            assemble_payload(&frame, None, &[("gamma", 1.0)]),
            Err(BusError::UnknownSignal { .. })
        ));
    }

    #[test]
    fn decode_frame_covers_every_signal() {
        let frame = test_frame();
        let wire = CanFrame::new(7, false, &[5, 9, 0, 0, 0, 0, 0, 0]).unwrap();
        let values = decode_frame(&frame, &wire).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values["alpha"], 5.0);
        assert_eq!(values["beta"], 9.0);
    }

    #[test]
    fn decode_pads_short_payloads() {
        let mut frame = FrameDef::new(7, "short", 2, FrameFormat::Standard).unwrap();
        frame
            .add_signal(
                SignalDef::new("lo", 0, 16, ByteOrder::Little, ValueKind::Unsigned).unwrap(),
            )
            .unwrap();
        let wire = CanFrame::new(7, false, &[0x34, 0x12]).unwrap();
        let values = decode_frame(&frame, &wire).unwrap();
        assert_eq!(values["lo"], 0x1234 as f64);
    }

    #[test]
    fn change_mask_covers_the_dlc() {
        let frame = test_frame();
        let mask = change_mask(&frame).unwrap();
        assert_eq!(mask.data(), &[0xFF; 8]);
        assert_eq!(mask.id(), 7);
    }
}
