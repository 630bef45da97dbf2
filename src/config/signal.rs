use serde::{Deserialize, Serialize};

use crate::codec::{self, BitLayout};
use crate::config::errors::CodecError;

/// Byte layout of a signal within the frame payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    /// Least significant byte first (Intel).
    #[default]
    Little,
    /// Most significant byte first (Motorola).
    Big,
}

/// Interpretation of the raw bit pattern.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    #[default]
    Unsigned,
    /// Two's complement.
    Signed,
}

/// Definition of a signal within a CAN frame.
///
/// Describes position and bit length in normal bit numbering (bit 0 is the
/// least significant bit of payload byte 0), byte order, sign, linear scaling
/// (`physical = raw * scaling_factor + value_offset`), clamp bounds, unit of
/// measure and default value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalDef {
    /// Signal name, unique within a configuration.
    pub name: String,
    /// Position of the least significant bit, normal numbering (0..=63).
    pub start_bit: u8,
    /// Bit length (1..=64).
    pub num_bits: u8,
    /// Byte order.
    pub byte_order: ByteOrder,
    /// Sign of the raw value.
    pub value_kind: ValueKind,
    /// Scaling factor, nonzero.
    pub scaling_factor: f64,
    /// Scaling offset.
    pub value_offset: f64,
    /// Unit of measure.
    pub unit: String,
    /// Lower clamp bound on the physical value.
    pub min_value: Option<f64>,
    /// Upper clamp bound on the physical value.
    pub max_value: Option<f64>,
    /// Physical value used when the frame is sent without this signal.
    pub default_value: f64,
    /// Free-form description.
    pub description: String,
}

impl Default for SignalDef {
    fn default() -> Self {
        SignalDef {
            name: String::new(),
            start_bit: 0,
            num_bits: 1,
            byte_order: ByteOrder::default(),
            value_kind: ValueKind::default(),
            scaling_factor: 1.0,
            value_offset: 0.0,
            unit: String::new(),
            min_value: None,
            max_value: None,
            default_value: 0.0,
            description: String::new(),
        }
    }
}

impl SignalDef {
    /// Creates a signal definition with neutral scaling and validates the
    /// bit geometry eagerly.
    pub fn new(
        name: &str,
        start_bit: u8,
        num_bits: u8,
        byte_order: ByteOrder,
        value_kind: ValueKind,
    ) -> Result<Self, CodecError> {
        let signal = SignalDef {
            name: name.to_string(),
            start_bit,
            num_bits,
            byte_order,
            value_kind,
            ..SignalDef::default()
        };
        signal.validate()?;
        Ok(signal)
    }

    /// Re-checks every codec-level invariant of the definition.
    ///
    /// Fields are public, so this runs again whenever the signal enters a
    /// frame.
    pub fn validate(&self) -> Result<(), CodecError> {
        if matches!(self.value_kind, ValueKind::Signed) && self.num_bits < 2 {
            return Err(CodecError::SignedTooNarrow {
                num_bits: self.num_bits,
            });
        }
        if self.scaling_factor == 0.0 {
            return Err(CodecError::ZeroScalingFactor);
        }
        self.layout().map(|_| ())
    }

    /// Compiles the bit layout for the current geometry.
    pub fn layout(&self) -> Result<BitLayout, CodecError> {
        BitLayout::new(self.start_bit, self.num_bits, self.byte_order)
    }

    /// Smallest frame DLC able to carry this signal.
    pub fn min_dlc(&self) -> Result<u8, CodecError> {
        codec::min_dlc(self)
    }

    /// Encodes a physical value into the payload, preserving the bits of
    /// other signals. The value is clamped to the signal's bounds.
    pub fn encode(&self, physical: f64, payload: &mut [u8; 8]) -> Result<(), CodecError> {
        let layout = self.layout()?;
        let raw = codec::raw_from_physical(self, physical)?;
        layout.insert(payload, raw);
        Ok(())
    }

    /// Strict encode: an out-of-range value is an error instead of being
    /// clamped.
    pub fn encode_strict(&self, physical: f64, payload: &mut [u8; 8]) -> Result<(), CodecError> {
        let layout = self.layout()?;
        let raw = codec::raw_from_physical_strict(self, physical)?;
        layout.insert(payload, raw);
        Ok(())
    }

    /// Decodes the physical value of this signal from the payload.
    pub fn decode(&self, payload: &[u8; 8]) -> Result<f64, CodecError> {
        let layout = self.layout()?;
        Ok(codec::physical_from_raw(self, layout.extract(payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_encode_decode_golden_bytes() {
        let mut signal =
            SignalDef::new("level", 0, 8, ByteOrder::Little, ValueKind::Unsigned).unwrap();
        signal.scaling_factor = 0.1;
        signal.value_offset = -10.0;
        signal.min_value = Some(-10.0);
        signal.max_value = Some(10.0);

        let mut payload = [0u8; 8];
        signal.encode(2.5, &mut payload).unwrap();
        assert_eq!(payload[0], 0x7D);
        assert_eq!(signal.decode(&payload).unwrap(), 2.5);

        // 50.0 clamps to 10.0, which encodes as raw 200.
        signal.encode(50.0, &mut payload).unwrap();
        assert_eq!(payload[0], 0xC8);
        assert_eq!(signal.decode(&payload).unwrap(), 10.0);
    }

    #[test]
    fn big_endian_signed_golden_bytes() {
        let signal = SignalDef::new("nudge", 59, 4, ByteOrder::Big, ValueKind::Signed).unwrap();
        let mut payload = [0u8; 8];
        signal.encode(-2.0, &mut payload).unwrap();
        assert_eq!(payload, [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x70]);
        assert_eq!(signal.decode(&payload).unwrap(), -2.0);

        // Stray bits outside the signal's span are ignored on decode.
        let noisy = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xF0];
        assert_eq!(signal.decode(&noisy).unwrap(), -2.0);
    }

    #[test]
    fn signed_two_bits_at_boundaries() {
        for start_bit in [0u8, 8, 3] {
            let signal =
                SignalDef::new("tiny", start_bit, 2, ByteOrder::Little, ValueKind::Signed)
                    .unwrap();
            for value in [-2.0, -1.0, 0.0, 1.0] {
                let mut payload = [0u8; 8];
                signal.encode(value, &mut payload).unwrap();
                assert_eq!(signal.decode(&payload).unwrap(), value, "start={start_bit}");
            }
        }
    }

    #[test]
    fn signed_needs_two_bits() {
        assert!(matches!(
            SignalDef::new("s", 0, 1, ByteOrder::Little, ValueKind::Signed),
            Err(CodecError::SignedTooNarrow { .. })
        ));
    }

    #[test]
    fn mutated_scaling_is_caught_by_validate() {
        let mut signal =
            SignalDef::new("s", 0, 8, ByteOrder::Little, ValueKind::Unsigned).unwrap();
        signal.scaling_factor = 0.0;
        assert!(matches!(
            signal.validate(),
            Err(CodecError::ZeroScalingFactor)
        ));
    }

    #[test]
    fn non_overlapping_signals_reassemble_payload() {
        // Re-encoding each decoded signal into a fresh payload reproduces
        // the original bits under the union of the spans.
        let signals = [
            SignalDef::new("a", 56, 1, ByteOrder::Little, ValueKind::Unsigned).unwrap(),
            SignalDef::new("b", 0, 16, ByteOrder::Little, ValueKind::Unsigned).unwrap(),
            SignalDef::new("c", 24, 16, ByteOrder::Little, ValueKind::Unsigned).unwrap(),
            SignalDef::new("d", 59, 4, ByteOrder::Big, ValueKind::Signed).unwrap(),
        ];
        let original = [0x0F, 0x00, 0x00, 0xFF, 0x00, 0x00, 0x00, 0xF1];

        let mut rebuilt = [0u8; 8];
        let mut union_mask = 0u64;
        for signal in &signals {
            let value = signal.decode(&original).unwrap();
            signal.encode(value, &mut rebuilt).unwrap();
            union_mask |= signal.layout().unwrap().occupancy_mask();
        }

        let original_bits = u64::from_le_bytes(original);
        let rebuilt_bits = u64::from_le_bytes(rebuilt);
        assert_eq!(original_bits & union_mask, rebuilt_bits & union_mask);
    }
}
