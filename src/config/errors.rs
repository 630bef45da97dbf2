use thiserror::Error;

/// Errors produced while laying out or converting signal values.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Signal start bit {start_bit} is outside the 64-bit payload")]
    StartBitOutOfRange { start_bit: u8 },
    #[error("Signal bit length {num_bits} is outside 1..=64")]
    InvalidBitLength { num_bits: u8 },
    #[error("Signal of {num_bits} bits starting at bit {start_bit} overruns the payload")]
    SpanOverflow { start_bit: u8, num_bits: u8 },
    #[error("Signed signals need at least 2 bits, got {num_bits}")]
    SignedTooNarrow { num_bits: u8 },
    #[error("Scaling factor cannot be zero")]
    ZeroScalingFactor,
    #[error("Value {value} for signal '{name}' is outside the representable range")]
    ValueOutOfRange { name: String, value: f64 },
}

/// Errors returned by high-level operations on
/// [`Configuration`](crate::config::configuration::Configuration) and
/// [`FrameDef`](crate::config::frame::FrameDef).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Signal name cannot be empty")]
    EmptySignalName,
    #[error("Signal '{name}' is already defined in frame 0x{frame_id:X}")]
    DuplicateSignalName { name: String, frame_id: u32 },
    #[error("Frame 0x{frame_id:X} is already defined")]
    DuplicateFrameId { frame_id: u32 },
    #[error("Frame ID 0x{frame_id:X} does not fit the {format} identifier range")]
    FrameIdOutOfRange { frame_id: u32, format: &'static str },
    #[error("DLC {dlc} is outside 1..=8")]
    InvalidDlc { dlc: u8 },
    #[error("Signal '{name}' needs a DLC of at least {min_dlc}, frame has {dlc}")]
    SignalExceedsDlc { name: String, min_dlc: u8, dlc: u8 },
    #[error("Cycle time of frame 0x{frame_id:X} must be positive")]
    InvalidCycleTime { frame_id: u32 },
    #[error(transparent)]
    Codec(#[from] CodecError),
}
