use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write as IoWrite};
use std::path::Path;

use crate::config::configuration::Configuration;
use crate::config::frame::FrameDef;
use crate::config::signal::{ByteOrder, SignalDef, ValueKind};
use crate::kcd::errors::KcdSaveError;

/// XML namespace of the KCD format.
pub const KCD_NAMESPACE: &str = "http://kayak.2codeornot2code.org/1.0";

/// Serializes a configuration into KCD text and writes it to `path`.
///
/// Ensures the destination has a `.kcd` extension, creates intermediate
/// directories when needed, and reports structured [`KcdSaveError`] variants
/// for path, I/O, or formatting failures.
pub fn to_file(path: &str, config: &Configuration) -> Result<(), KcdSaveError> {
    if !path.to_ascii_lowercase().ends_with(".kcd") {
        return Err(KcdSaveError::InvalidExtension {
            path: path.to_string(),
        });
    }

    let serialized = to_string(config)?;

    let path_ref: &Path = Path::new(path);
    if let Some(parent) = path_ref.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| KcdSaveError::CreateDirectory {
            path: parent.display().to_string(),
            source,
        })?;
    }

    let file = File::create(path_ref).map_err(|source| KcdSaveError::CreateFile {
        path: path.to_string(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(serialized.as_bytes())
        .map_err(|source| KcdSaveError::Write {
            path: path.to_string(),
            source,
        })?;
    writer.flush().map_err(|source| KcdSaveError::Write {
        path: path.to_string(),
        source,
    })?;
    Ok(())
}

/// Serializes a configuration into canonical KCD text.
///
/// Indentation and attribute ordering are fixed so that writing the result
/// of a parse and parsing it again reproduces the same configuration.
pub fn to_string(config: &Configuration) -> Result<String, KcdSaveError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    serialize(config, &mut writer)?;
    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    String::from_utf8(bytes).map_err(|_| KcdSaveError::Format)
}

// The sink is an in-memory buffer; emission can only fail on malformed
// event data, reported uniformly as a formatting failure.
fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), KcdSaveError> {
    writer.write_event(event).map_err(|_| KcdSaveError::Format)
}

fn serialize(config: &Configuration, writer: &mut Writer<Vec<u8>>) -> Result<(), KcdSaveError> {
    emit(writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut root = BytesStart::new("NetworkDefinition");
    root.push_attribute(("xmlns", KCD_NAMESPACE));
    emit(writer, Event::Start(root))?;

    // Every node referenced as a producer, sorted and deduplicated.
    let node_ids: BTreeSet<&String> = config
        .frames()
        .flat_map(|frame| frame.producer_ids.iter())
        .collect();
    for node_id in node_ids {
        let mut node = BytesStart::new("Node");
        node.push_attribute(("id", node_id.as_str()));
        emit(writer, Event::Empty(node))?;
    }

    let mut bus = BytesStart::new("Bus");
    bus.push_attribute(("name", config.bus_name.as_str()));
    emit(writer, Event::Start(bus))?;
    for frame in config.frames() {
        write_message(writer, frame)?;
    }
    emit(writer, Event::End(BytesEnd::new("Bus")))?;

    emit(writer, Event::End(BytesEnd::new("NetworkDefinition")))?;
    Ok(())
}

fn write_message(writer: &mut Writer<Vec<u8>>, frame: &FrameDef) -> Result<(), KcdSaveError> {
    let id = if frame.is_extended() {
        format!("0x{:08X}", frame.frame_id)
    } else {
        format!("0x{:03X}", frame.frame_id)
    };

    let mut message = BytesStart::new("Message");
    message.push_attribute(("id", id.as_str()));
    message.push_attribute(("name", frame.name.as_str()));
    message.push_attribute(("length", frame.dlc.to_string().as_str()));
    message.push_attribute(("format", frame.frame_format.label()));
    if let Some(cycle) = frame.cycle_time_ms {
        message.push_attribute(("interval", cycle.to_string().as_str()));
    }

    if frame.producer_ids.is_empty() && frame.signals.is_empty() {
        emit(writer, Event::Empty(message))?;
        return Ok(());
    }
    emit(writer, Event::Start(message))?;

    if !frame.producer_ids.is_empty() {
        emit(writer, Event::Start(BytesStart::new("Producer")))?;
        for node_id in &frame.producer_ids {
            let mut node_ref = BytesStart::new("NodeRef");
            node_ref.push_attribute(("id", node_id.as_str()));
            emit(writer, Event::Empty(node_ref))?;
        }
        emit(writer, Event::End(BytesEnd::new("Producer")))?;
    }

    for signal in &frame.signals {
        write_signal(writer, signal)?;
    }

    emit(writer, Event::End(BytesEnd::new("Message")))?;
    Ok(())
}

fn write_signal(writer: &mut Writer<Vec<u8>>, signal: &SignalDef) -> Result<(), KcdSaveError> {
    let mut elem = BytesStart::new("Signal");
    elem.push_attribute(("name", signal.name.as_str()));
    elem.push_attribute(("offset", signal.start_bit.to_string().as_str()));
    elem.push_attribute(("length", signal.num_bits.to_string().as_str()));
    let endianess = match signal.byte_order {
        ByteOrder::Little => "little",
        ByteOrder::Big => "big",
    };
    elem.push_attribute(("endianess", endianess));

    let value_attrs = value_attributes(signal);
    if signal.description.is_empty() && value_attrs.is_empty() {
        emit(writer, Event::Empty(elem))?;
        return Ok(());
    }
    emit(writer, Event::Start(elem))?;

    if !signal.description.is_empty() {
        emit(writer, Event::Start(BytesStart::new("Notes")))?;
        emit(writer, Event::Text(BytesText::new(&signal.description)))?;
        emit(writer, Event::End(BytesEnd::new("Notes")))?;
    }

    if !value_attrs.is_empty() {
        let mut value = BytesStart::new("Value");
        for (key, text) in &value_attrs {
            value.push_attribute((*key, text.as_str()));
        }
        emit(writer, Event::Empty(value))?;
    }

    emit(writer, Event::End(BytesEnd::new("Signal")))?;
    Ok(())
}

// Canonical `Value` attribute list; attributes at their KCD default are not
// emitted, and a fully default list means the element itself is omitted.
fn value_attributes(signal: &SignalDef) -> Vec<(&'static str, String)> {
    let mut attrs = Vec::new();
    if matches!(signal.value_kind, ValueKind::Signed) {
        attrs.push(("type", "signed".to_string()));
    }
    if signal.scaling_factor != 1.0 {
        attrs.push(("slope", fmt_f64(signal.scaling_factor)));
    }
    if signal.value_offset != 0.0 {
        attrs.push(("intercept", fmt_f64(signal.value_offset)));
    }
    if !signal.unit.is_empty() {
        attrs.push(("unit", signal.unit.clone()));
    }
    if let Some(min) = signal.min_value {
        attrs.push(("min", fmt_f64(min)));
    }
    if let Some(max) = signal.max_value {
        attrs.push(("max", fmt_f64(max)));
    }
    if signal.default_value != 0.0 {
        attrs.push(("defaultValue", fmt_f64(signal.default_value)));
    }
    attrs
}

// Shortest representation that parses back to the same value.
fn fmt_f64(value: f64) -> String {
    format!("{value}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::frame::FrameFormat;
    use crate::kcd::parse;

    fn example_configuration() -> Configuration {
        let mut frame = FrameDef::new(7, "testframedef", 8, FrameFormat::Standard).unwrap();
        frame.cycle_time_ms = Some(100);
        frame.producer_ids.insert("1".to_string());
        frame
            .add_signal(
                SignalDef::new("testsignal1", 56, 1, ByteOrder::Little, ValueKind::Unsigned)
                    .unwrap(),
            )
            .unwrap();
        let mut scaled =
            SignalDef::new("testsignal2", 0, 16, ByteOrder::Little, ValueKind::Unsigned).unwrap();
        scaled.scaling_factor = 0.1;
        scaled.value_offset = -10.0;
        scaled.unit = "V".to_string();
        scaled.min_value = Some(-10.0);
        scaled.max_value = Some(10.0);
        scaled.default_value = 2.5;
        frame.add_signal(scaled).unwrap();
        let mut signed =
            SignalDef::new("testsignal4", 59, 4, ByteOrder::Big, ValueKind::Signed).unwrap();
        signed.description = "Test signal number 4".to_string();
        frame.add_signal(signed).unwrap();

        let mut config = Configuration::new("Mainbus", []);
        config.add_frame(frame).unwrap();
        config
    }

    #[test]
    fn writes_canonical_document() {
        let expected = r#"<?xml version="1.0" encoding="UTF-8"?>
<NetworkDefinition xmlns="http://kayak.2codeornot2code.org/1.0">
  <Node id="1"/>
  <Bus name="Mainbus">
    <Message id="0x007" name="testframedef" length="8" format="standard" interval="100">
      <Producer>
        <NodeRef id="1"/>
      </Producer>
      <Signal name="testsignal1" offset="56" length="1" endianess="little"/>
      <Signal name="testsignal2" offset="0" length="16" endianess="little">
        <Value slope="0.1" intercept="-10" unit="V" min="-10" max="10" defaultValue="2.5"/>
      </Signal>
      <Signal name="testsignal4" offset="59" length="4" endianess="big">
        <Notes>Test signal number 4</Notes>
        <Value type="signed"/>
      </Signal>
    </Message>
  </Bus>
</NetworkDefinition>
"#;
        assert_eq!(to_string(&example_configuration()).unwrap(), expected);
    }

    #[test]
    fn roundtrip_preserves_the_configuration() {
        let config = example_configuration();
        let written = to_string(&config).unwrap();
        let reread = parse::from_str(&written).unwrap();
        assert_eq!(reread, config);

        // Writing the re-read configuration is a fixed point.
        assert_eq!(to_string(&reread).unwrap(), written);
    }

    #[test]
    fn roundtrip_through_a_file() {
        let config = example_configuration();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.kcd");
        let path = path.to_str().unwrap();

        to_file(path, &config).unwrap();
        let reread = parse::from_file(path).unwrap();
        assert_eq!(reread, config);
    }

    #[test]
    fn rejects_wrong_extension() {
        let config = Configuration::new("Mainbus", []);
        assert!(matches!(
            to_file("/tmp/out.xml", &config),
            Err(KcdSaveError::InvalidExtension { .. })
        ));
    }

    #[test]
    fn extended_frames_use_wide_hex_ids() {
        let mut config = Configuration::new("Mainbus", []);
        let mut frame =
            FrameDef::new(0x12DD54E3, "wide", 8, FrameFormat::Extended).unwrap();
        frame
            .add_signal(
                SignalDef::new("s", 0, 8, ByteOrder::Little, ValueKind::Unsigned).unwrap(),
            )
            .unwrap();
        config.add_frame(frame).unwrap();

        let written = to_string(&config).unwrap();
        assert!(written.contains(r#"id="0x12DD54E3""#));
        assert!(written.contains(r#"format="extended""#));

        let reread = parse::from_str(&written).unwrap();
        assert_eq!(reread, config);
    }
}
