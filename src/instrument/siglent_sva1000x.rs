//! Siglent SVA1000X spectrum analyzer.
//!
//! Plain SCPI: every control is `<NODE>?` / `<NODE> <value>`, so the table below is
//! mostly built from two helpers. Four trace channels share one descriptor set.

use super::{descriptor_attributes, discover_descriptors, route_get, route_set, Driver, Instrument};
use crate::adapters::Transport;
use crate::channel::Channel;
use crate::codec::{ValueCodec, ValueKind};
use crate::descriptor::{Descriptor, DescriptorTable, SetCommand};
use crate::discovery::CapabilitySnapshot;
use crate::error::{DriverError, Result};
use crate::parser::{BinaryFraming, NumericFormat, ResponseParser};
use crate::value::Value;

/// Bandwidth steps shared by RBW and VBW, in Hz.
const BANDWIDTHS: [f64; 13] = [
    1.0, 3.0, 10.0, 30.0, 100.0, 300.0, 1e3, 3e3, 10e3, 30e3, 100e3, 300e3, 1e6,
];

const VBW_RATIOS: [f64; 13] = [
    0.001, 0.003, 0.01, 0.03, 0.1, 0.3, 1.0, 3.0, 10.0, 30.0, 100.0, 300.0, 1000.0,
];

fn on_off() -> ValueCodec {
    ValueCodec::mapped([(true, "ON"), (false, "OFF")])
}

/// `<node>?` / `<node> <value><suffix>` control.
fn scpi(name: &str, node: &str, suffix: &str, codec: ValueCodec) -> Descriptor {
    Descriptor::control(
        name,
        &format!("{}?", node),
        &format!("{} {{value}}{}", node, suffix),
    )
    .with_codec(codec)
}

fn range(name: &str, node: &str, min: f64, max: f64) -> Descriptor {
    scpi(name, node, "", ValueCodec::range(min, max))
}

fn switch(name: &str, node: &str) -> Descriptor {
    scpi(name, node, "", on_off())
}

fn choice(name: &str, node: &str, values: &[&'static str]) -> Descriptor {
    scpi(name, node, "", ValueCodec::discrete(values.iter().copied()))
}

fn instrument_descriptors() -> Result<DescriptorTable> {
    DescriptorTable::from_descriptors([
        // SCPI common commands
        Descriptor::measurement("id", "*IDN?").with_codec(ValueCodec::any(ValueKind::Text)),
        Descriptor::setting("reset", "*RST"),
        Descriptor::setting("clear", "*CLS"),
        // Frequency
        range("center_frequency", ":FREQuency:CENTer", 50.0, 3.2e9),
        range("start_frequency", ":FREQuency:STARt", 0.0, 3.2e9),
        range("stop_frequency", ":FREQuency:STOP", 0.0, 3.2e9),
        range("center_frequency_step", ":FREQuency:CENTer:STEP", 1.0, 3.2e9),
        switch("frequency_step_auto", ":FREQuency:CENTer:STEP:AUTO"),
        Descriptor::setting("set_step_to_center_frequency", ":FREQuency:CENTer:SET:STEP"),
        range("frequency_offset", ":SENSe:FREQuency:OFFSet", -100e9, 100e9),
        range("frequency_span", ":FREQuency:SPAN", 0.0, 3.2e9),
        Descriptor::setting("set_frequency_span_full", ":FREQuency:SPAN:FULL"),
        Descriptor::setting("set_frequency_span_zero", ":FREQuency:SPAN:ZERO"),
        Descriptor::setting("set_frequency_span_previous", ":FREQuency:SPAN:PREVious"),
        Descriptor::setting("set_frequency_span_half", ":FREQuency:SPAN:HALF"),
        Descriptor::setting("set_frequency_span_double", ":FREQuency:SPAN:DOUBle"),
        Descriptor::setting("auto_tune", ":FREQuency:TUNE:IMMediate"),
        // Amplitude
        scpi(
            "reference_level",
            ":DISPlay:WINDow:TRACe:Y:SCALe:RLEVel",
            " DBM",
            ValueCodec::range(-100.0, 30.0),
        ),
        range("attenuation", ":SENSe:POWer:RF:ATTenuation", 0.0, 51.0),
        switch("attenuation_auto", ":SENSe:POWer:RF:ATTenuation:AUTO"),
        switch("preamp", ":SENSe:POWer:RF:GAIN:STATe"),
        range(
            "reference_offset",
            ":DISPlay:WINDow:TRACe:Y:SCALe:RLEVel:OFFSet",
            -100.0,
            100.0,
        ),
        choice(
            "amplitude_units",
            ":UNIT:POWer",
            &["DBM", "DBMV", "DBUV", "DBUA", "V", "W"],
        ),
        choice(
            "scale_type",
            ":DISPlay:WINDow:TRACe:Y:SCALe:SPACing",
            &["LINear", "LOGarithmic"],
        ),
        range("scale_division", ":DISPlay:WINDow:TRACe:Y:SCALe:PDIVision", 1.0, 10.0),
        Descriptor::setting("set_correction_off", ":CORRection:OFF"),
        // Sweep
        choice("sweep_mode", ":SWEep:MODE", &["AUTO", "FFT", "SWEep"]),
        range("sweep_time", ":SWEep:TIME", 450e-6, 1500.0),
        switch("sweep_time_auto_enabled", ":SWEep:TIME:AUTO"),
        choice("sweep_speed", ":SWEep:SPEed", &["NORMal", "ACCUracy"]),
        scpi("sweep_count", ":SWEep:COUNt", "", ValueCodec::int_range(1, 99999)),
        range("qpd_time", ":QPD:DWELl:TIME", 0.0, 10.0),
        Descriptor::setting("restart_sweep", ":INITiate:RESTart"),
        switch("continuous_sweep_enabled", ":INITiate:CONTinuous"),
        Descriptor::setting("initiate_pause", ":INITiate:Pause"),
        Descriptor::setting("initiate_resume", ":INITiate:RESume"),
        Descriptor::setting("abort", ":ABORt"),
        // Trigger
        choice(
            "trigger_source",
            ":TRIGger:SOURce",
            &["IMMediate", "VIDeo", "EXTernal"],
        ),
        scpi(
            "trigger_video_level",
            ":TRIGger:VIDeo:LEVel",
            " DBM",
            ValueCodec::range(-300.0, 50.0),
        ),
        choice("trigger_edge", ":TRIGger:RFBurst:SLOPe", &["POSitive", "NEGative"]),
        // Bandwidth
        scpi(
            "resolution_bandwidth",
            ":BWIDth:RESolution",
            "",
            ValueCodec::discrete(BANDWIDTHS),
        ),
        switch("resolution_bandwidth_auto", ":SENSe:BANDwidth:RESolution:AUTO"),
        scpi("video_bandwidth", ":BWIDth:VIDeo", "", ValueCodec::discrete(BANDWIDTHS)),
        switch("video_bandwidth_auto", ":SENSe:BANDwidth:VIDeo:AUTO"),
        scpi(
            "video_bandwidth_ratio",
            ":BWIDth:VIDeo:RATio",
            "",
            ValueCodec::discrete(VBW_RATIOS),
        ),
        Descriptor::measurement("video_bandwidth_ratio_auto", ":BWIDth:VIDeo:RATio:CONfig?")
            .with_codec(on_off()),
        choice("filter_type", ":SENSe:FILTer:TYPE", &["EMI", "GAUSS"]),
        // Trace
        choice(
            "trace_data_type",
            ":FORMat:TRACe:DATA",
            &["ASCii", "REAL,32", "REAL,64", "REAL32", "REAL"],
        ),
        choice(
            "trace_math_function",
            ":CALCulate:MATH:FUNCtion",
            &["OFF", "PDIF", "PSUM", "LOFF", "LDIF"],
        ),
        range("trace_math_offset", ":TRACe:MATH:OFFSet", -100.0, 100.0),
        choice("average_type", ":AVERage:TYPE", &["LOGPower", "POWer", "VOLTage"]),
    ])
}

/// Trace math input: the query reports the selected trace, the write assigns this
/// channel as the input.
fn math_input(name: &str, axis: char) -> Result<Descriptor> {
    Descriptor::new(
        name,
        Some(format!(":TRACe:MATH:{}?", axis)),
        Some(SetCommand::Text(format!(":TRACe:MATH:{} {{ch}}", axis))),
    )
}

fn trace_descriptors() -> Result<DescriptorTable> {
    DescriptorTable::from_descriptors([
        Descriptor::control("mode", ":TRACe{ch}:MODE?", ":TRACe{ch}:MODE {value}").with_codec(
            ValueCodec::discrete(["WRITe", "MAXHold", "MINHold", "VIEW", "BLANk", "AVERage"]),
        ),
        Descriptor::measurement("data", ":TRACe:DATA? {ch}")
            .with_codec(ValueCodec::any(ValueKind::Float))
            .with_parser(ResponseParser::list()),
        Descriptor::measurement("data_real32", ":TRACe:DATA? {ch}").with_parser(
            ResponseParser::Binary {
                framing: BinaryFraming::LengthPrefixed {
                    width: 4,
                    big_endian: false,
                },
                format: NumericFormat::F32 { big_endian: false },
            },
        ),
        math_input("math_input_x", 'X')?,
        math_input("math_input_y", 'Y')?,
        math_input("math_input_z", 'Z')?,
        Descriptor::control(
            "detection_mode",
            ":DETector:TRACe{ch}?",
            ":DETector:TRACe{ch} {value}",
        )
        .with_codec(ValueCodec::discrete([
            "NEGative", "POSitive", "SAMPle", "AVERage", "NORMAL", "QUASi",
        ])),
        Descriptor::control(
            "count_average",
            ":AVERage:TRACe{ch}:COUNt?",
            ":AVERage:TRACe{ch}:COUNt {value}",
        )
        .with_codec(ValueCodec::int_range(1, 999)),
        Descriptor::measurement("average_number", ":AVERage:TRACe{ch}?")
            .with_codec(ValueCodec::any(ValueKind::Int)),
        Descriptor::setting("average_clear", ":AVERage:TRACe{ch}:CLEar"),
    ])
}

/// Siglent SVA1000X with trace channels `"1"` to `"4"`.
#[derive(Debug)]
pub struct Sva1000x {
    inner: Instrument,
}

impl Sva1000x {
    pub fn new<T: Transport + 'static>(transport: T) -> Result<Self> {
        let inner = Instrument::new(
            "Siglent SVA 1000X Spectrum Analyzer",
            transport,
            instrument_descriptors()?,
        )
        .with_channels(["1", "2", "3", "4"], trace_descriptors()?)?;
        Ok(Self { inner })
    }

    pub fn instrument(&self) -> &Instrument {
        &self.inner
    }

    pub fn trace(&self, n: u8) -> Result<&Channel> {
        self.inner.channel(&n.to_string())
    }

    pub fn center_frequency(&self) -> Result<f64> {
        as_f64(self.inner.get("center_frequency")?)
    }

    pub fn set_center_frequency(&self, hz: f64) -> Result<()> {
        self.inner.set("center_frequency", hz)
    }

    pub fn frequency_span(&self) -> Result<f64> {
        as_f64(self.inner.get("frequency_span")?)
    }

    pub fn set_frequency_span(&self, hz: f64) -> Result<()> {
        self.inner.set("frequency_span", hz)
    }

    pub fn set_resolution_bandwidth(&self, hz: f64) -> Result<()> {
        self.inner.set("resolution_bandwidth", hz)
    }

    pub fn abort(&self) -> Result<()> {
        self.inner.execute("abort")
    }

    pub fn restart_sweep(&self) -> Result<()> {
        self.inner.execute("restart_sweep")
    }

    /// Displayed amplitudes of trace `n`, ASCII transfer.
    pub fn trace_data(&self, n: u8) -> Result<Vec<f64>> {
        as_samples(self.trace(n)?.get("data")?)
    }

    /// Displayed amplitudes of trace `n`, binary REAL32 transfer. The trace format
    /// must have been switched with `trace_data_type = "REAL32"`.
    pub fn trace_data_real32(&self, n: u8) -> Result<Vec<f64>> {
        as_samples(self.trace(n)?.get("data_real32")?)
    }
}

fn as_f64(value: Value) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| DriverError::parse(value.to_string(), "expected a number"))
}

fn as_samples(value: Value) -> Result<Vec<f64>> {
    match value {
        Value::List(items) => items.into_iter().map(as_f64).collect(),
        other => Err(DriverError::parse(other.to_string(), "expected a list of numbers")),
    }
}

impl Driver for Sva1000x {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn attributes(&self) -> Vec<String> {
        descriptor_attributes(&self.inner)
    }

    fn get(&mut self, attribute: &str, channel: Option<&str>) -> Result<Value> {
        route_get(&self.inner, attribute, channel)
    }

    fn set(&mut self, attribute: &str, channel: Option<&str>, value: &Value) -> Result<()> {
        route_set(&self.inner, attribute, channel, value)
    }

    fn discover(&mut self) -> Result<CapabilitySnapshot> {
        discover_descriptors(&mut self.inner)
    }
}
