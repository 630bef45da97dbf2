//! # config
//!
//! Declarative model of the CAN traffic on one bus: signal definitions
//! ([`SignalDef`](signal::SignalDef)), the frames carrying them
//! ([`FrameDef`](frame::FrameDef)) and the bus-wide
//! [`Configuration`](configuration::Configuration) with its derived name
//! index and ego-node classification. Validation is eager: invariants are
//! checked when signals enter frames and frames enter configurations.

pub mod art;
pub mod configuration;
pub mod errors;
pub mod frame;
pub mod signal;
