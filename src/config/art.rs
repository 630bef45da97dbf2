//! Human-readable rendering of a configuration.
//!
//! For every frame one header line is produced, followed per signal by a
//! summary line and a three-row bit diagram: a ruler in normal bit
//! numbering, the payload occupancy row (`M` most significant bit, `L`
//! least significant bit, `X` other occupied bits) and a ruler in backward
//! numbering. The format is stable for identical inputs and is pinned by a
//! snapshot test.

use std::fmt::Write;

use crate::codec::normal_to_backward;
use crate::config::configuration::Configuration;
use crate::config::frame::FrameDef;
use crate::config::signal::{ByteOrder, SignalDef, ValueKind};

impl Configuration {
    /// Renders a multi-line textual summary of the whole configuration,
    /// including an ASCII bit-layout diagram per signal.
    pub fn descriptive_ascii_art(&self) -> String {
        let mut out = String::new();
        let ego = if self.ego_node_ids.is_empty() {
            "-".to_string()
        } else {
            self.ego_node_ids
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(" ")
        };
        let _ = writeln!(
            out,
            "Bus '{}', {} frames, ego nodes: {}",
            self.bus_name,
            self.frame_count(),
            ego
        );
        for frame in self.frames() {
            out.push('\n');
            frame_art(frame, &mut out);
        }
        out
    }
}

fn frame_art(frame: &FrameDef, out: &mut String) {
    let id = match frame.is_extended() {
        false => format!("0x{:03X}", frame.frame_id),
        true => format!("0x{:08X}", frame.frame_id),
    };
    let _ = write!(
        out,
        "Frame {id} '{}' ({}, dlc {})",
        frame.name,
        frame.frame_format.label(),
        frame.dlc
    );
    if let Some(cycle) = frame.cycle_time_ms {
        let _ = write!(out, ", cycle {cycle} ms");
    }
    if let Some(throttle) = frame.throttle_time_ms {
        let _ = write!(out, ", throttle {throttle} ms");
    }
    if !frame.producer_ids.is_empty() {
        let producers = frame
            .producer_ids
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        let _ = write!(out, ", producers: {producers}");
    }
    out.push('\n');

    for signal in &frame.signals {
        signal_art(signal, out);
    }
}

fn signal_art(signal: &SignalDef, out: &mut String) {
    let kind = match signal.value_kind {
        ValueKind::Unsigned => "unsigned",
        ValueKind::Signed => "signed",
    };
    let order = match signal.byte_order {
        ByteOrder::Little => "little",
        ByteOrder::Big => "big",
    };
    let _ = write!(
        out,
        "  {}: start bit {}, {} bits, {} endian, {}",
        signal.name, signal.start_bit, signal.num_bits, order, kind
    );
    if signal.scaling_factor != 1.0 {
        let _ = write!(out, ", scale {}", signal.scaling_factor);
    }
    if signal.value_offset != 0.0 {
        let _ = write!(out, ", offset {}", signal.value_offset);
    }
    if !signal.unit.is_empty() {
        let _ = write!(out, ", unit '{}'", signal.unit);
    }
    if let Some(min) = signal.min_value {
        let _ = write!(out, ", min {min}");
    }
    if let Some(max) = signal.max_value {
        let _ = write!(out, ", max {max}");
    }
    if signal.default_value != 0.0 {
        let _ = write!(out, ", default {}", signal.default_value);
    }
    out.push('\n');

    let Ok(layout) = signal.layout() else {
        let _ = writeln!(out, "    (invalid bit geometry)");
        return;
    };

    // Significance of every occupied normal bit position.
    let mut significance = [None::<u8>; 64];
    for span in layout.spans() {
        for k in 0..span.width {
            let bit = span.byte_index * 8 + (span.bit_offset + k) as usize;
            significance[bit] = Some(span.value_shift + k);
        }
    }

    let mut ruler_normal = String::new();
    let mut row = String::new();
    let mut ruler_backward = String::new();
    for byte in 0u8..8 {
        let _ = write!(ruler_normal, "|{:>2}{:>6}", byte * 8 + 7, byte * 8);
        let backward_lo = normal_to_backward(byte * 8);
        let _ = write!(ruler_backward, "|{:>2}{:>6}", backward_lo + 7, backward_lo);
        row.push('|');
        // Within a byte the most significant bit is printed first.
        for bit_in_byte in (0u8..8).rev() {
            let bit = (byte * 8 + bit_in_byte) as usize;
            row.push(match significance[bit] {
                Some(0) => 'L',
                Some(sig) if sig == signal.num_bits - 1 => 'M',
                Some(_) => 'X',
                None => '.',
            });
        }
    }

    let _ = writeln!(out, "    normal   {ruler_normal}|");
    let _ = writeln!(out, "    bits     {row}|");
    let _ = writeln!(out, "    backward {ruler_backward}|");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::frame::FrameFormat;
    use crate::config::signal::{ByteOrder, SignalDef, ValueKind};

    fn sample_configuration() -> Configuration {
        let mut frame = FrameDef::new(7, "testframe", 8, FrameFormat::Standard).unwrap();
        frame.cycle_time_ms = Some(100);
        frame.producer_ids.insert("1".to_string());
        frame
            .add_signal(
                SignalDef::new("testsignal2", 0, 16, ByteOrder::Little, ValueKind::Unsigned)
                    .unwrap(),
            )
            .unwrap();
        frame
            .add_signal(
                SignalDef::new("testsignal4", 59, 4, ByteOrder::Big, ValueKind::Signed).unwrap(),
            )
            .unwrap();

        let mut config = Configuration::new("Mainbus", ["1".to_string()]);
        config.add_frame(frame).unwrap();
        config
    }

    #[test]
    fn snapshot_of_descriptive_ascii_art() {
        let expected = "\
Bus 'Mainbus', 1 frames, ego nodes: 1

Frame 0x007 'testframe' (standard, dlc 8), cycle 100 ms, producers: 1
  testsignal2: start bit 0, 16 bits, little endian, unsigned
    normal   | 7     0|15     8|23    16|31    24|39    32|47    40|55    48|63    56|
    bits     |XXXXXXXL|MXXXXXXX|........|........|........|........|........|........|
    backward |63    56|55    48|47    40|39    32|31    24|23    16|15     8| 7     0|
  testsignal4: start bit 59, 4 bits, big endian, signed
    normal   | 7     0|15     8|23    16|31    24|39    32|47    40|55    48|63    56|
    bits     |........|........|........|........|........|........|........|.MXXL...|
    backward |63    56|55    48|47    40|39    32|31    24|23    16|15     8| 7     0|
";
        let config = sample_configuration();
        assert_eq!(config.descriptive_ascii_art(), expected);
    }

    #[test]
    fn art_is_stable_under_repeated_rendering() {
        let config = sample_configuration();
        assert_eq!(
            config.descriptive_ascii_art(),
            config.descriptive_ascii_art()
        );
    }
}
