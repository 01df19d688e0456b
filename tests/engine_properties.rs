//! Behaviour of the descriptor engine observed through the public API.

use daq_instruments::adapters::MockTransport;
use daq_instruments::codec::{ValueCodec, ValueKind};
use daq_instruments::descriptor::{Descriptor, DescriptorTable};
use daq_instruments::instrument::{AgiltronSwitch, Instrument, Sdg1032x, Sva1000x, SwitchType};
use daq_instruments::parser::parse_keyed_block;
use daq_instruments::{DriverError, Value};

fn level_instrument(mock: &MockTransport) -> Instrument {
    let table = DescriptorTable::from_descriptors([
        Descriptor::control("level", "LEV?", "LEV {value}").with_codec(ValueCodec::range(-5.0, 5.0)),
        Descriptor::control("count", "CNT?", "CNT {value}").with_codec(ValueCodec::int_range(1, 99)),
        Descriptor::control("mode", "MODE?", "MODE {value}")
            .with_codec(ValueCodec::mapped([("fast", "F"), ("slow", "S")])),
    ])
    .unwrap();
    Instrument::new("bench", mock.clone(), table)
}

#[test]
fn range_round_trip_for_in_domain_values() {
    let codec = ValueCodec::range(-5.0, 5.0);
    for v in [-5.0, -4.999, -1.0 / 3.0, 0.0, 1e-9, 2.5, 4.75, 5.0] {
        let encoded = codec.encode(&Value::Float(v)).unwrap();
        let decoded = codec.decode(&encoded.to_string()).unwrap();
        assert_eq!(decoded, Value::Float(v), "round trip of {}", v);
    }

    let codec = ValueCodec::int_range(1, 999);
    for v in [1, 2, 500, 999] {
        let encoded = codec.encode(&Value::Int(v)).unwrap();
        assert_eq!(codec.decode(&encoded.to_string()).unwrap(), Value::Int(v));
    }
}

#[test]
fn out_of_range_set_issues_no_write() {
    let mock = MockTransport::new();
    let inst = level_instrument(&mock);
    for v in [-5.0001, 5.0001, 1e9, f64::NAN, f64::INFINITY] {
        assert!(matches!(inst.set("level", v), Err(DriverError::Validation(_))));
    }
    assert!(matches!(inst.set("count", 0), Err(DriverError::Validation(_))));
    assert!(matches!(inst.set("count", 2.5), Err(DriverError::Validation(_))));
    assert!(matches!(inst.set("level", "high"), Err(DriverError::Validation(_))));
    assert_eq!(mock.write_count(), 0);

    inst.set("level", 1.5).unwrap();
    assert_eq!(mock.write_count(), 1);
}

#[test]
fn discrete_mapping_round_trip() {
    let codec = ValueCodec::mapped([("fast", "F"), ("slow", "S")]);
    for key in ["fast", "slow"] {
        let encoded = codec.encode(&Value::from(key)).unwrap();
        assert_eq!(codec.decode(&encoded.to_string()).unwrap(), Value::from(key));
    }

    let on_off = ValueCodec::mapped([(true, "ON"), (false, "OFF")]);
    for key in [true, false] {
        let encoded = on_off.encode(&Value::Bool(key)).unwrap();
        assert_eq!(on_off.decode(&encoded.to_string()).unwrap(), Value::Bool(key));
    }

    let verbatim = ValueCodec::discrete(["WRITe", "MAXHold", "VIEW"]);
    for key in ["WRITe", "MAXHold", "VIEW"] {
        let encoded = verbatim.encode(&Value::from(key)).unwrap();
        assert_eq!(verbatim.decode(&encoded.to_string()).unwrap(), Value::from(key));
    }
}

#[test]
fn mapped_values_are_sent_as_wire_tokens() {
    let mock = MockTransport::new().with_reply("MODE?", "S");
    let inst = level_instrument(&mock);
    inst.set("mode", "fast").unwrap();
    assert_eq!(inst.get("mode").unwrap(), Value::from("slow"));
    assert_eq!(mock.call_log()[0], "write: MODE F");
}

#[test]
fn keyed_block_with_echo_prefix() {
    let block = parse_keyed_block("ECHO,KEY1,10,KEY2,20", ',', 5);
    assert_eq!(block.len(), 2);
    assert_eq!(block.get("KEY1"), Some("10"));
    assert_eq!(block.get("KEY2"), Some("20"));
    assert_eq!(block.keys().collect::<Vec<_>>(), vec!["KEY1", "KEY2"]);
}

#[test]
fn binary_frame_channel_select() {
    let mock = MockTransport::new();
    let mut switch = AgiltronSwitch::new(mock.clone(), SwitchType::OneByTwo).unwrap();
    switch.switch_to_channel(2).unwrap();
    assert_eq!(mock.written(), vec![vec![0x01, 0x12, 0x00, 0x02]]);
    assert_eq!(mock.read_count(), 0);
}

#[test]
fn channel_id_substitution() {
    let mock = MockTransport::new()
        .with_reply(":C1:OUTP?", "C1:OUTP ON,LOAD,HZ,PLRT,NOR")
        .with_reply(":C2:OUTP?", "C2:OUTP OFF,LOAD,50,PLRT,INVT");
    let fg = Sdg1032x::new(mock.clone()).unwrap();
    assert!(fg.output_enabled(1).unwrap());
    assert!(!fg.output_enabled(2).unwrap());
    assert_eq!(
        mock.call_log(),
        vec![
            "write: :C1:OUTP?",
            "read: C1:OUTP ON,LOAD,HZ,PLRT,NOR",
            "write: :C2:OUTP?",
            "read: C2:OUTP OFF,LOAD,50,PLRT,INVT",
        ]
    );

    let mock = MockTransport::new().with_default_reply("WRIT");
    let sa = Sva1000x::new(mock.clone()).unwrap();
    for n in 1..=4u8 {
        sa.trace(n).unwrap().get("mode").unwrap();
    }
    let queries: Vec<String> = mock
        .call_log()
        .into_iter()
        .filter(|l| l.starts_with("write: "))
        .collect();
    assert_eq!(
        queries,
        vec![
            "write: :TRACe1:MODE?",
            "write: :TRACe2:MODE?",
            "write: :TRACe3:MODE?",
            "write: :TRACe4:MODE?",
        ]
    );
}

#[test]
fn short_response_uses_declared_default() {
    let mock = MockTransport::new().with_reply(":C1:OUTP?", "C1:OUTP ON");
    let fg = Sdg1032x::new(mock).unwrap();
    assert_eq!(fg.output_load(1).unwrap(), Value::from("HZ"));
    assert_eq!(fg.output_polarity(1).unwrap(), "NOR");
}

#[test]
fn transport_errors_surface_without_retry() {
    let mock = MockTransport::new().with_reply("LEV?", "1.0");
    let inst = level_instrument(&mock);
    mock.inject_fault_at(1);
    assert!(matches!(inst.get("level"), Err(DriverError::Transport(_))));
    assert_eq!(mock.call_log(), vec!["write: LEV? (fault)"]);
    assert_eq!(inst.get("level").unwrap(), Value::Float(1.0));
}

#[test]
fn descriptor_misuse() {
    let mock = MockTransport::new();
    let table = DescriptorTable::from_descriptors([
        Descriptor::measurement("idn", "*IDN?").with_codec(ValueCodec::any(ValueKind::Text)),
        Descriptor::setting("reset", "*RST"),
    ])
    .unwrap();
    let inst = Instrument::new("bench", mock.clone(), table);
    assert!(matches!(inst.set("idn", "x"), Err(DriverError::NoSetSupport(_))));
    assert!(matches!(inst.get("reset"), Err(DriverError::NoGetSupport(_))));
    assert!(matches!(inst.get("nope"), Err(DriverError::UnknownDescriptor(_))));
    assert_eq!(mock.write_count(), 0);
}
