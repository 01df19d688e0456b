//! Laser head detection and gating, end to end over the DeCoP text protocol.

use daq_instruments::adapters::MockTransport;
use daq_instruments::instrument::{AgiltronSwitch, DlcPro, LaserVariant, SwitchType};
use daq_instruments::session::{Connector, DecopSession, DeviceError};
use daq_instruments::variant::{GateState, Variant, VariantGate};
use daq_instruments::{Driver, DriverError, Value};

/// Hands out DeCoP sessions over one scripted transport.
struct ScriptedConnector {
    transport: MockTransport,
}

impl Connector for ScriptedConnector {
    type Session = DecopSession<MockTransport>;

    fn connect(&self) -> Result<Self::Session, DeviceError> {
        Ok(DecopSession::new(self.transport.clone()))
    }

    fn address(&self) -> String {
        "scripted".to_string()
    }
}

fn connector(laser_type: &str) -> (ScriptedConnector, MockTransport) {
    let transport = MockTransport::new()
        .with_reply("(param-ref 'laser1:type)", &format!("\"{}\"", laser_type))
        .with_reply("(param-ref 'laser1:ctl:wavelength-min)", "1510.0")
        .with_reply("(param-ref 'laser1:ctl:wavelength-max)", "1630.0")
        .with_reply("(param-set! 'laser1:ctl:wavelength-set 1550.5)", "0");
    (
        ScriptedConnector {
            transport: transport.clone(),
        },
        transport,
    )
}

#[test]
fn ctl_device_is_detected() {
    let (connector, transport) = connector("CTL");
    let mut laser = DlcPro::connect(&connector, None).unwrap();
    assert_eq!(laser.laser_type(), LaserVariant::Ctl);
    assert_eq!(laser.name(), "Toptica DLC Pro CTL");

    laser.set_wavelength(1550.5).unwrap();
    assert!(transport
        .call_log()
        .contains(&"write: (param-set! 'laser1:ctl:wavelength-set 1550.5)".to_string()));
}

#[test]
fn ctl_only_access_fails_on_boosta() {
    let (connector, transport) = connector("BoosTApro 780");
    let mut laser = DlcPro::connect(&connector, None).unwrap();
    assert_eq!(laser.laser_type(), LaserVariant::Ta);
    assert_eq!(laser.raw_laser_type(), Some("BoosTApro 780"));

    let writes = transport.write_count();
    for result in [
        laser.wavelength().map(|_| ()),
        laser.set_wavelength(1550.5),
        laser.scan_offset_limits().map(|_| ()),
        Driver::get(&mut laser, "ctl_current", None).map(|_| ()),
    ] {
        assert!(matches!(
            result,
            Err(DriverError::UnsupportedForVariant { .. })
        ));
    }
    assert_eq!(transport.write_count(), writes);
}

#[test]
fn unknown_head_only_reaches_common_parameters() {
    let (connector, _) = connector("DL pro");
    let mut laser = DlcPro::connect(&connector, Some("bench laser".to_string())).unwrap();
    assert_eq!(laser.laser_type(), LaserVariant::Unknown);
    assert_eq!(laser.name(), "bench laser");
    assert!(laser.ta_current().is_err());
    assert_eq!(Driver::attributes(&laser), vec!["emission"]);
}

#[test]
fn detection_failure_is_fatal() {
    let transport = MockTransport::new();
    let connector = ScriptedConnector {
        transport: transport.clone(),
    };
    let err = DlcPro::connect(&connector, None).unwrap_err();
    assert!(matches!(err, DriverError::Initialization(_)));
}

#[test]
fn gate_detects_once() {
    let mut gate: VariantGate<LaserVariant> = VariantGate::new();
    assert_eq!(gate.state(), GateState::Uninitialized);
    assert!(matches!(
        gate.require(LaserVariant::Ctl),
        Err(DriverError::UnsupportedForVariant { .. })
    ));

    let failed: Result<LaserVariant, &str> = gate.detect(|| Err("timeout"));
    assert!(failed.is_err());
    assert_eq!(gate.state(), GateState::Uninitialized);

    let detected: Result<LaserVariant, &str> = gate.detect(|| Ok("CTL".to_string()));
    assert_eq!(detected, Ok(LaserVariant::Ctl));
    let again: Result<LaserVariant, &str> = gate.detect(|| Ok("BoosTApro".to_string()));
    assert_eq!(again, Ok(LaserVariant::Ctl));
    assert_eq!(gate.state(), GateState::Detected(LaserVariant::Ctl));
    assert_eq!(LaserVariant::unknown(), LaserVariant::Unknown);
}

#[test]
fn switch_personality_gates_identity_queries() {
    let mock = MockTransport::new().with_default_reply("OSW");
    let mut switch = AgiltronSwitch::new(mock.clone(), SwitchType::OneByTwo).unwrap();
    assert!(matches!(
        Driver::get(&mut switch, "serial_number", None),
        Err(DriverError::UnsupportedForVariant { .. })
    ));
    assert_eq!(mock.write_count(), 0);
    assert_eq!(
        Driver::get(&mut switch, "channel", None).unwrap(),
        Value::Int(1)
    );
}
