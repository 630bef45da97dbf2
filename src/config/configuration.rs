//! Configuration model.
//!
//! This module defines the in-memory description of one CAN bus: the frames
//! it carries, the signals within them, and which node identifiers the
//! current process represents (the *ego* nodes). Frames whose producers
//! intersect the ego set are outgoing; every other frame is incoming.
//!
//! Storage is a `BTreeMap` keyed by frame id, so iteration and the send
//! order derived from it are deterministic (ascending id). A derived
//! signal-name index gives O(1) [`find_signal`](Configuration::find_signal)
//! lookups and is rebuilt on every mutation; signal names are unique across
//! the whole configuration, enforced when frames are added.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::errors::ConfigError;
use crate::config::frame::FrameDef;
use crate::config::signal::SignalDef;

/// In-memory description of the frames and signals of one CAN bus.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Configuration {
    /// Name of the bus, e.g. from the KCD `Bus` element.
    pub bus_name: String,
    /// Node identifiers the current process represents.
    pub ego_node_ids: BTreeSet<String>,

    // Frames by id; ascending iteration order.
    frames: BTreeMap<u32, FrameDef>,
    // Derived: signal name to owning frame id. Kept in sync by every
    // mutating operation.
    frame_id_by_signal: HashMap<String, u32>,
}

impl Configuration {
    /// Creates an empty configuration.
    pub fn new(bus_name: &str, ego_node_ids: impl IntoIterator<Item = String>) -> Self {
        Configuration {
            bus_name: bus_name.to_string(),
            ego_node_ids: ego_node_ids.into_iter().collect(),
            frames: BTreeMap::new(),
            frame_id_by_signal: HashMap::new(),
        }
    }

    /// Adds a frame, enforcing frame-id and global signal-name uniqueness.
    pub fn add_frame(&mut self, frame: FrameDef) -> Result<(), ConfigError> {
        frame.validate()?;
        if self.frames.contains_key(&frame.frame_id) {
            return Err(ConfigError::DuplicateFrameId {
                frame_id: frame.frame_id,
            });
        }
        for signal in &frame.signals {
            if let Some(&other) = self.frame_id_by_signal.get(&signal.name) {
                return Err(ConfigError::DuplicateSignalName {
                    name: signal.name.clone(),
                    frame_id: other,
                });
            }
        }

        for signal in &frame.signals {
            self.frame_id_by_signal
                .insert(signal.name.clone(), frame.frame_id);
        }
        self.frames.insert(frame.frame_id, frame);
        Ok(())
    }

    /// Removes a frame and drops its signals from the name index.
    pub fn remove_frame(&mut self, frame_id: u32) -> Option<FrameDef> {
        let frame = self.frames.remove(&frame_id)?;
        for signal in &frame.signals {
            self.frame_id_by_signal.remove(&signal.name);
        }
        Some(frame)
    }

    /// Returns the frame with the given id.
    pub fn frame_by_id(&self, frame_id: u32) -> Option<&FrameDef> {
        self.frames.get(&frame_id)
    }

    /// Iterates frames in ascending id order.
    pub fn frames(&self) -> impl Iterator<Item = &FrameDef> {
        self.frames.values()
    }

    /// Number of frames in the configuration.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Looks up a signal by name across all frames.
    pub fn find_signal(&self, name: &str) -> Option<(u32, &SignalDef)> {
        let frame_id = *self.frame_id_by_signal.get(name)?;
        let signal = self.frames.get(&frame_id)?.signal(name)?;
        Some((frame_id, signal))
    }

    /// Whether the frame is produced by one of the ego nodes.
    pub fn is_outgoing(&self, frame: &FrameDef) -> bool {
        !frame.producer_ids.is_disjoint(&self.ego_node_ids)
    }

    /// Ids of the frames this node transmits, ascending.
    pub fn frames_for_ego(&self) -> Vec<u32> {
        self.frames
            .values()
            .filter(|frame| self.is_outgoing(frame))
            .map(|frame| frame.frame_id)
            .collect()
    }

    /// Ids of the frames this node receives, ascending.
    pub fn frames_for_others(&self) -> Vec<u32> {
        self.frames
            .values()
            .filter(|frame| !self.is_outgoing(frame))
            .map(|frame| frame.frame_id)
            .collect()
    }
}
