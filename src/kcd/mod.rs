//! # kcd
//!
//! Reader and writer for a documented subset of the **KCD** XML format
//! (namespace `http://kayak.2codeornot2code.org/1.0`): buses, messages,
//! signals with `Value` scaling and `Notes`, and producer node references.
//! Constructs outside the subset are accepted and ignored on read and never
//! emitted on write; multiplexed signals are rejected as a hard error.
//!
//! Use [`parse::from_file`] to build a
//! [`Configuration`](crate::config::configuration::Configuration) and
//! [`save::to_file`] to write one back. The writer output is canonical, so
//! parse-write-parse is a fixed point.

pub mod errors;
pub mod parse;
pub mod save;

pub use errors::{KcdParseError, KcdSaveError};
