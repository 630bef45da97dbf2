use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};

use crate::config::configuration::Configuration;
use crate::config::errors::ConfigError;
use crate::config::frame::{FrameDef, FrameFormat};
use crate::config::signal::{ByteOrder, SignalDef, ValueKind};
use crate::kcd::errors::KcdParseError;

/// Parses a KCD file into a [`Configuration`], accepting every `Bus`
/// element in the document.
pub fn from_file(path: &str) -> Result<Configuration, KcdParseError> {
    from_file_bus(path, None)
}

/// Parses a KCD file, keeping only the named `Bus` when `busname` is given.
///
/// Returns [`KcdParseError::BusNotFound`] if a name was requested but no
/// such bus exists in the document.
pub fn from_file_bus(
    path: &str,
    busname: Option<&str>,
) -> Result<Configuration, KcdParseError> {
    if !path.to_ascii_lowercase().ends_with(".kcd") {
        return Err(KcdParseError::InvalidExtension {
            path: path.to_string(),
        });
    }
    let file = File::open(path).map_err(|source| KcdParseError::OpenFile {
        path: path.to_string(),
        source,
    })?;
    let mut reader = Reader::from_reader(BufReader::new(file));
    reader.config_mut().trim_text(true);
    read_document(reader, busname)
}

/// Parses a KCD document held in memory.
pub fn from_str(xml: &str) -> Result<Configuration, KcdParseError> {
    from_str_bus(xml, None)
}

/// In-memory variant of [`from_file_bus`].
pub fn from_str_bus(xml: &str, busname: Option<&str>) -> Result<Configuration, KcdParseError> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);
    read_document(reader, busname)
}

// Message under construction; the DLC may still be missing and is derived
// from the signal set at element end.
struct PendingMessage {
    frame_id: u32,
    frame_format: FrameFormat,
    name: String,
    dlc: Option<u8>,
    cycle_time_ms: Option<u32>,
    producers: BTreeSet<String>,
    signals: Vec<SignalDef>,
}

// Parsing state threaded through the event loop.
#[derive(Default)]
struct DocState {
    config: Configuration,
    bus_matched: bool,
    in_bus: bool,
    message: Option<PendingMessage>,
    signal: Option<SignalDef>,
    in_producer: bool,
    in_notes: bool,
}

fn read_document<R: BufRead>(
    mut reader: Reader<R>,
    busname: Option<&str>,
) -> Result<Configuration, KcdParseError> {
    let mut buf: Vec<u8> = Vec::new();
    let mut state = DocState {
        config: Configuration::new("", []),
        ..DocState::default()
    };

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(elem) => state.open_element(&elem, false, busname)?,
            // Self-closing elements open and close in one event.
            Event::Empty(elem) => state.open_element(&elem, true, busname)?,

            Event::Text(text) => {
                if state.in_notes && let Some(ref mut current) = state.signal {
                    current.description = text.decode().unwrap_or_default().trim().to_string();
                }
            }

            Event::End(elem) => state.close_element(elem.local_name().as_ref())?,

            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(wanted) = busname
        && !state.bus_matched
    {
        return Err(KcdParseError::BusNotFound {
            name: wanted.to_string(),
        });
    }
    Ok(state.config)
}

impl DocState {
    fn open_element(
        &mut self,
        elem: &BytesStart,
        is_empty: bool,
        busname: Option<&str>,
    ) -> Result<(), KcdParseError> {
        match elem.local_name().as_ref() {
            b"Bus" => {
                let name = attr_string(elem, b"name").unwrap_or_default();
                self.in_bus = busname.is_none_or(|wanted| wanted == name);
                if self.in_bus {
                    self.bus_matched = true;
                    if self.config.bus_name.is_empty() {
                        self.config.bus_name = name;
                    }
                }
            }
            b"Message" if self.in_bus => {
                let pending = start_message(elem)?;
                if is_empty {
                    finish_message(&mut self.config, pending)?;
                } else {
                    self.message = Some(pending);
                }
            }
            b"Signal" if self.message.is_some() => {
                let parsed = start_signal(elem)?;
                if is_empty {
                    push_signal(&mut self.message, Some(parsed));
                } else {
                    self.signal = Some(parsed);
                }
            }
            b"Signal" if self.in_bus => {
                let name = attr_string(elem, b"name").unwrap_or_default();
                return Err(KcdParseError::StraySignal { name });
            }
            b"Value" => {
                if let Some(ref mut current) = self.signal {
                    apply_value(current, elem)?;
                }
            }
            b"Notes" => self.in_notes = !is_empty,
            b"Producer" => self.in_producer = !is_empty,
            b"NodeRef" if self.in_producer => {
                if let Some(ref mut pending) = self.message
                    && let Some(id) = attr_string(elem, b"id")
                {
                    pending.producers.insert(id);
                }
            }
            b"Multiplex" if self.in_bus => return Err(KcdParseError::Multiplex),
            // NetworkDefinition, Document, Node and anything else outside
            // the subset is accepted and ignored.
            _ => {}
        }
        Ok(())
    }

    fn close_element(&mut self, local_name: &[u8]) -> Result<(), KcdParseError> {
        match local_name {
            b"Bus" => self.in_bus = false,
            b"Message" => {
                if let Some(pending) = self.message.take() {
                    finish_message(&mut self.config, pending)?;
                }
            }
            b"Signal" => {
                let finished = self.signal.take();
                push_signal(&mut self.message, finished);
            }
            b"Producer" => self.in_producer = false,
            b"Notes" => self.in_notes = false,
            _ => {}
        }
        Ok(())
    }
}

fn start_message(elem: &BytesStart) -> Result<PendingMessage, KcdParseError> {
    if attr_string(elem, b"multiplex").is_some() {
        return Err(KcdParseError::Multiplex);
    }
    let id_text = attr_string(elem, b"id").ok_or(KcdParseError::MissingAttribute {
        element: "Message",
        attribute: "id",
    })?;
    let frame_id = parse_hex_id(&id_text)?;
    let name = attr_string(elem, b"name").ok_or(KcdParseError::MissingAttribute {
        element: "Message",
        attribute: "name",
    })?;

    let frame_format = match attr_string(elem, b"format").as_deref() {
        None | Some("standard") => FrameFormat::Standard,
        Some("extended") => FrameFormat::Extended,
        Some(other) => {
            return Err(KcdParseError::InvalidAttribute {
                element: "Message",
                attribute: "format",
                value: other.to_string(),
            });
        }
    };

    // A missing length, or the schema default "auto", derives the DLC from
    // the signal set once the whole message has been read.
    let dlc = match attr_string(elem, b"length").as_deref() {
        None | Some("auto") => None,
        Some(text) => Some(parse_number::<u8>("Message", "length", text)?),
    };

    let cycle_time_ms = match attr_string(elem, b"interval").as_deref() {
        None => None,
        Some(text) => {
            let interval = parse_number::<u32>("Message", "interval", text)?;
            (interval > 0).then_some(interval)
        }
    };

    Ok(PendingMessage {
        frame_id,
        frame_format,
        name,
        dlc,
        cycle_time_ms,
        producers: BTreeSet::new(),
        signals: Vec::new(),
    })
}

fn start_signal(elem: &BytesStart) -> Result<SignalDef, KcdParseError> {
    let name = attr_string(elem, b"name").ok_or(KcdParseError::MissingAttribute {
        element: "Signal",
        attribute: "name",
    })?;
    let offset_text = attr_string(elem, b"offset").ok_or(KcdParseError::MissingAttribute {
        element: "Signal",
        attribute: "offset",
    })?;
    let start_bit = parse_number::<u8>("Signal", "offset", &offset_text)?;

    let num_bits = match attr_string(elem, b"length").as_deref() {
        None => 1,
        Some(text) => {
            let length = parse_number::<u8>("Signal", "length", text)?;
            if length == 0 {
                return Err(KcdParseError::ZeroLengthSignal { name });
            }
            length
        }
    };

    let byte_order = match attr_string(elem, b"endianess").as_deref() {
        None | Some("little") => ByteOrder::Little,
        Some("big") => ByteOrder::Big,
        Some(other) => {
            return Err(KcdParseError::InvalidAttribute {
                element: "Signal",
                attribute: "endianess",
                value: other.to_string(),
            });
        }
    };

    Ok(SignalDef {
        name,
        start_bit,
        num_bits,
        byte_order,
        ..SignalDef::default()
    })
}

fn apply_value(signal: &mut SignalDef, elem: &BytesStart) -> Result<(), KcdParseError> {
    if let Some(kind) = attr_string(elem, b"type") {
        signal.value_kind = match kind.as_str() {
            "unsigned" => ValueKind::Unsigned,
            "signed" => ValueKind::Signed,
            other => {
                return Err(KcdParseError::InvalidAttribute {
                    element: "Value",
                    attribute: "type",
                    value: other.to_string(),
                });
            }
        };
    }
    if let Some(text) = attr_string(elem, b"slope") {
        signal.scaling_factor = parse_number::<f64>("Value", "slope", &text)?;
    }
    if let Some(text) = attr_string(elem, b"intercept") {
        signal.value_offset = parse_number::<f64>("Value", "intercept", &text)?;
    }
    if let Some(unit) = attr_string(elem, b"unit") {
        signal.unit = unit;
    }
    if let Some(text) = attr_string(elem, b"min") {
        signal.min_value = Some(parse_number::<f64>("Value", "min", &text)?);
    }
    if let Some(text) = attr_string(elem, b"max") {
        signal.max_value = Some(parse_number::<f64>("Value", "max", &text)?);
    }
    if let Some(text) = attr_string(elem, b"defaultValue") {
        signal.default_value = parse_number::<f64>("Value", "defaultValue", &text)?;
    }
    Ok(())
}

fn push_signal(message: &mut Option<PendingMessage>, signal: Option<SignalDef>) {
    if let (Some(pending), Some(signal)) = (message.as_mut(), signal) {
        pending.signals.push(signal);
    }
}

fn finish_message(
    config: &mut Configuration,
    pending: PendingMessage,
) -> Result<(), KcdParseError> {
    let dlc = match pending.dlc {
        Some(dlc) => dlc,
        None => {
            let mut min = 1u8;
            for signal in &pending.signals {
                min = min.max(signal.min_dlc().map_err(ConfigError::from)?);
            }
            min
        }
    };

    let mut frame = FrameDef::new(pending.frame_id, &pending.name, dlc, pending.frame_format)
        .map_err(KcdParseError::from)?;
    frame.cycle_time_ms = pending.cycle_time_ms;
    frame.producer_ids = pending.producers;
    for signal in pending.signals {
        frame.add_signal(signal).map_err(KcdParseError::from)?;
    }
    config.add_frame(frame).map_err(KcdParseError::from)?;
    Ok(())
}

fn attr_string(elem: &BytesStart, key: &[u8]) -> Option<String> {
    elem.attributes()
        .filter_map(Result::ok)
        .find(|attr| attr.key.as_ref() == key)
        .map(|attr| {
            attr.unescape_value()
                .map(|value| value.to_string())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned())
        })
}

fn parse_hex_id(text: &str) -> Result<u32, KcdParseError> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u32::from_str_radix(digits, 16).map_err(|_| KcdParseError::InvalidAttribute {
        element: "Message",
        attribute: "id",
        value: text.to_string(),
    })
}

fn parse_number<T: std::str::FromStr>(
    element: &'static str,
    attribute: &'static str,
    text: &str,
) -> Result<T, KcdParseError> {
    text.parse::<T>().map_err(|_| KcdParseError::InvalidAttribute {
        element,
        attribute,
        value: text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TESTFRAME_KCD: &str = r#"<NetworkDefinition xmlns="http://kayak.2codeornot2code.org/1.0">
  <Node id="1"/>
  <Bus name="Mainbus">
    <Message id="0x007" name="testframedef" length="8">
      <Producer>
        <NodeRef id="1"/>
      </Producer>
      <Signal name="testsignal1" offset="56"/>
      <Signal name="testsignal2" offset="0" length="16"/>
      <Signal name="testsignal3" offset="24" length="16"/>
      <Signal name="testsignal4" offset="59" length="4" endianess="big">
        <Notes>Test signal number 4</Notes>
        <Value type="signed"/>
      </Signal>
    </Message>
  </Bus>
</NetworkDefinition>
"#;

    #[test]
    fn documented_example_parses() {
        let config = from_str(TESTFRAME_KCD).unwrap();
        assert_eq!(config.bus_name, "Mainbus");
        assert_eq!(config.frame_count(), 1);

        let frame = config.frame_by_id(7).unwrap();
        assert_eq!(frame.name, "testframedef");
        assert_eq!(frame.dlc, 8);
        assert!(!frame.is_extended());
        assert!(frame.producer_ids.contains("1"));
        assert_eq!(frame.signals.len(), 4);

        let s4 = frame.signal("testsignal4").unwrap();
        assert_eq!(s4.start_bit, 59);
        assert_eq!(s4.num_bits, 4);
        assert_eq!(s4.byte_order, ByteOrder::Big);
        assert_eq!(s4.value_kind, ValueKind::Signed);
        assert_eq!(s4.description, "Test signal number 4");

        let s1 = frame.signal("testsignal1").unwrap();
        assert_eq!((s1.start_bit, s1.num_bits), (56, 1));
        assert_eq!(s1.byte_order, ByteOrder::Little);
    }

    #[test]
    fn example_payload_decodes_to_documented_values() {
        let config = from_str(TESTFRAME_KCD).unwrap();
        let frame = config.frame_by_id(7).unwrap();
        let payload = [0x0F, 0x00, 0x00, 0xFF, 0x00, 0x00, 0x00, 0xF1];

        assert_eq!(frame.signal("testsignal1").unwrap().decode(&payload).unwrap(), 1.0);
        assert_eq!(frame.signal("testsignal2").unwrap().decode(&payload).unwrap(), 15.0);
        assert_eq!(frame.signal("testsignal3").unwrap().decode(&payload).unwrap(), 255.0);
        assert_eq!(frame.signal("testsignal4").unwrap().decode(&payload).unwrap(), -2.0);
    }

    #[test]
    fn value_attributes_and_interval() {
        let xml = r#"<NetworkDefinition xmlns="http://kayak.2codeornot2code.org/1.0">
  <Bus name="Mainbus">
    <Message id="0x12" name="scaled" length="2" interval="100">
      <Signal name="level" offset="0" length="8">
        <Value type="unsigned" slope="0.1" intercept="-10" unit="V" min="-10" max="10" defaultValue="2.5"/>
      </Signal>
    </Message>
  </Bus>
</NetworkDefinition>"#;
        let config = from_str(xml).unwrap();
        let frame = config.frame_by_id(0x12).unwrap();
        assert_eq!(frame.cycle_time_ms, Some(100));

        let signal = frame.signal("level").unwrap();
        assert_eq!(signal.scaling_factor, 0.1);
        assert_eq!(signal.value_offset, -10.0);
        assert_eq!(signal.unit, "V");
        assert_eq!(signal.min_value, Some(-10.0));
        assert_eq!(signal.max_value, Some(10.0));
        assert_eq!(signal.default_value, 2.5);
    }

    #[test]
    fn auto_length_derives_the_dlc() {
        let xml = r#"<NetworkDefinition>
  <Bus name="Mainbus">
    <Message id="0x20" name="auto1">
      <Signal name="wide" offset="8" length="16"/>
    </Message>
    <Message id="0x21" name="auto2" length="auto">
      <Signal name="flag" offset="3"/>
    </Message>
  </Bus>
</NetworkDefinition>"#;
        let config = from_str(xml).unwrap();
        assert_eq!(config.frame_by_id(0x20).unwrap().dlc, 3);
        assert_eq!(config.frame_by_id(0x21).unwrap().dlc, 1);
    }

    #[test]
    fn bus_filter_selects_and_reports_missing() {
        let xml = r#"<NetworkDefinition>
  <Bus name="First">
    <Message id="0x1" name="a">
      <Signal name="s1" offset="0"/>
    </Message>
  </Bus>
  <Bus name="Second">
    <Message id="0x2" name="b">
      <Signal name="s2" offset="0"/>
    </Message>
  </Bus>
</NetworkDefinition>"#;

        let all = from_str(xml).unwrap();
        assert_eq!(all.frame_count(), 2);
        assert_eq!(all.bus_name, "First");

        let second = from_str_bus(xml, Some("Second")).unwrap();
        assert_eq!(second.frame_count(), 1);
        assert_eq!(second.bus_name, "Second");
        assert!(second.frame_by_id(0x2).is_some());

        assert!(matches!(
            from_str_bus(xml, Some("Third")),
            Err(KcdParseError::BusNotFound { .. })
        ));
    }

    #[test]
    fn multiplex_is_a_hard_error() {
        let xml = r#"<NetworkDefinition>
  <Bus name="Mainbus">
    <Message id="0x1" name="muxed">
      <Multiplex name="selector" offset="0" length="2"/>
    </Message>
  </Bus>
</NetworkDefinition>"#;
        assert!(matches!(from_str(xml), Err(KcdParseError::Multiplex)));
    }

    #[test]
    fn zero_length_signal_is_rejected() {
        let xml = r#"<NetworkDefinition>
  <Bus name="Mainbus">
    <Message id="0x1" name="bad">
      <Signal name="empty" offset="0" length="0"/>
    </Message>
  </Bus>
</NetworkDefinition>"#;
        assert!(matches!(
            from_str(xml),
            Err(KcdParseError::ZeroLengthSignal { .. })
        ));
    }

    #[test]
    fn duplicate_signal_names_across_frames_are_rejected() {
        let xml = r#"<NetworkDefinition>
  <Bus name="Mainbus">
    <Message id="0x1" name="a">
      <Signal name="speed" offset="0" length="8"/>
    </Message>
    <Message id="0x2" name="b">
      <Signal name="speed" offset="0" length="8"/>
    </Message>
  </Bus>
</NetworkDefinition>"#;
        assert!(matches!(
            from_str(xml),
            Err(KcdParseError::Config(
                ConfigError::DuplicateSignalName { .. }
            ))
        ));
    }

    #[test]
    fn unknown_elements_and_attributes_are_ignored() {
        let xml = r#"<NetworkDefinition>
  <Document name="something"/>
  <Node id="7" name="Gateway"/>
  <Bus name="Mainbus" baudrate="500000">
    <Message id="0x1" name="a" triggered="true" count="4">
      <Notes>frame level notes</Notes>
      <Signal name="speed" offset="0" length="8" extra="x"/>
    </Message>
  </Bus>
</NetworkDefinition>"#;
        let config = from_str(xml).unwrap();
        assert_eq!(config.frame_count(), 1);
        let signal = config.frame_by_id(1).unwrap().signal("speed").unwrap();
        assert!(signal.description.is_empty());
    }
}
