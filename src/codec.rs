//! Value codecs: domain validation plus logical <-> wire conversion.
//!
//! Every descriptor carries exactly one [`ValueCodec`]. Validation is kept separate
//! from encoding so the same domain check applies whether the wire form is an ASCII
//! number, a mnemonic (`ON`/`OFF`) or a single byte inside a binary frame.
//!
//! ```
//! use daq_instruments::codec::ValueCodec;
//! use daq_instruments::value::Value;
//!
//! let output = ValueCodec::mapped([(true, "ON"), (false, "OFF")]);
//! assert_eq!(output.encode(&Value::Bool(true)).unwrap(), Value::Text("ON".into()));
//! assert_eq!(output.decode("OFF").unwrap(), Value::Bool(false));
//! ```

use std::fmt;
use std::sync::Arc;

use crate::error::{DriverError, ValidationError};
use crate::value::Value;

/// Custom validation function. Returns the rejection reason on failure.
pub type PredicateFn = Arc<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>;

/// Target type used when decoding a wire token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Text,
    /// Integer if the token parses as one, then float, then text.
    Auto,
}

impl ValueKind {
    /// Decode a single wire token into this kind.
    pub fn decode(self, token: &str) -> Result<Value, DriverError> {
        let token = token.trim();
        match self {
            ValueKind::Bool => match token.to_ascii_uppercase().as_str() {
                "1" | "ON" | "TRUE" | "#T" => Ok(Value::Bool(true)),
                "0" | "OFF" | "FALSE" | "#F" => Ok(Value::Bool(false)),
                _ => Err(DriverError::parse(token, "expected a boolean")),
            },
            ValueKind::Int => {
                if let Ok(v) = token.parse::<i64>() {
                    return Ok(Value::Int(v));
                }
                // Some instruments answer integer queries in float notation ("1.000000E+00")
                match token.parse::<f64>() {
                    Ok(v) if v.fract() == 0.0 => Ok(Value::Int(v as i64)),
                    _ => Err(DriverError::parse(token, "expected an integer")),
                }
            }
            ValueKind::Float => token
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| DriverError::parse(token, e.to_string())),
            ValueKind::Text => Ok(Value::Text(token.to_string())),
            ValueKind::Auto => Ok(Value::infer(token)),
        }
    }

    fn of(value: &Value) -> ValueKind {
        match value {
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Text(_) => ValueKind::Text,
            _ => ValueKind::Auto,
        }
    }
}

/// Declared domain of a descriptor value.
#[derive(Clone)]
pub enum ValueCodec {
    /// Membership in a fixed set, optionally with a logical -> wire token mapping.
    DiscreteSet {
        allowed: Vec<Value>,
        wire_map: Option<Vec<(Value, String)>>,
    },
    /// Inclusive numeric range.
    Range { min: f64, max: f64, kind: ValueKind },
    /// Arbitrary check; `kind` drives decoding of responses.
    Predicate {
        check: PredicateFn,
        description: String,
        kind: ValueKind,
    },
}

impl fmt::Debug for ValueCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueCodec::DiscreteSet { allowed, wire_map } => f
                .debug_struct("DiscreteSet")
                .field("allowed", allowed)
                .field("wire_map", wire_map)
                .finish(),
            ValueCodec::Range { min, max, kind } => f
                .debug_struct("Range")
                .field("min", min)
                .field("max", max)
                .field("kind", kind)
                .finish(),
            ValueCodec::Predicate {
                description, kind, ..
            } => f
                .debug_struct("Predicate")
                .field("description", description)
                .field("kind", kind)
                .finish_non_exhaustive(),
        }
    }
}

impl ValueCodec {
    /// Discrete set sent to the device verbatim.
    pub fn discrete<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        ValueCodec::DiscreteSet {
            allowed: values.into_iter().map(Into::into).collect(),
            wire_map: None,
        }
    }

    /// Discrete set whose members are substituted by wire tokens.
    pub fn mapped<V: Into<Value>>(pairs: impl IntoIterator<Item = (V, &'static str)>) -> Self {
        let pairs: Vec<(Value, String)> = pairs
            .into_iter()
            .map(|(k, w)| (k.into(), w.to_string()))
            .collect();
        ValueCodec::DiscreteSet {
            allowed: pairs.iter().map(|(k, _)| k.clone()).collect(),
            wire_map: Some(pairs),
        }
    }

    pub fn range(min: f64, max: f64) -> Self {
        ValueCodec::Range {
            min,
            max,
            kind: ValueKind::Float,
        }
    }

    pub fn int_range(min: i64, max: i64) -> Self {
        ValueCodec::Range {
            min: min as f64,
            max: max as f64,
            kind: ValueKind::Int,
        }
    }

    pub fn predicate<F>(description: impl Into<String>, kind: ValueKind, check: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        ValueCodec::Predicate {
            check: Arc::new(check),
            description: description.into(),
            kind,
        }
    }

    /// Accepts every value; decodes responses with `kind`.
    pub fn any(kind: ValueKind) -> Self {
        Self::predicate("any value", kind, |_| Ok(()))
    }

    /// Human readable domain, used in error messages and CLI listings.
    pub fn describe(&self) -> String {
        match self {
            ValueCodec::DiscreteSet { allowed, .. } => {
                let items: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
                format!("{{{}}}", items.join(", "))
            }
            ValueCodec::Range { min, max, .. } => format!("[{}, {}]", min, max),
            ValueCodec::Predicate { description, .. } => description.clone(),
        }
    }

    /// Check `value` against the declared domain.
    pub fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        match self {
            ValueCodec::DiscreteSet { allowed, .. } => {
                if allowed.iter().any(|a| a.loosely_eq(value)) {
                    Ok(())
                } else {
                    Err(ValidationError::NotInSet {
                        allowed: self.describe(),
                        received: value.to_string(),
                    })
                }
            }
            ValueCodec::Range { min, max, kind } => {
                let v = value.as_f64().ok_or_else(|| ValidationError::WrongType {
                    expected: "number".to_string(),
                    received: format!("{} ({})", value, value.kind_name()),
                })?;
                if *kind == ValueKind::Int && value.as_i64().is_none() {
                    return Err(ValidationError::WrongType {
                        expected: "integer".to_string(),
                        received: value.to_string(),
                    });
                }
                // Written as a negated conjunction so NaN is rejected too.
                if !(*min <= v && v <= *max) {
                    return Err(ValidationError::OutOfRange {
                        min: *min,
                        max: *max,
                        value: v,
                    });
                }
                Ok(())
            }
            ValueCodec::Predicate { check, .. } => {
                check(value).map_err(|reason| ValidationError::Rejected {
                    reason,
                    received: value.to_string(),
                })
            }
        }
    }

    /// Validate and convert a logical value into its wire representation.
    pub fn encode(&self, value: &Value) -> Result<Value, ValidationError> {
        self.validate(value)?;
        match self {
            ValueCodec::DiscreteSet { allowed, wire_map } => {
                if let Some(map) = wire_map {
                    if let Some((_, wire)) = map.iter().find(|(k, _)| k.loosely_eq(value)) {
                        return Ok(Value::Text(wire.clone()));
                    }
                }
                // Hand out the declared member so "1e3" and "1000" render identically.
                Ok(allowed
                    .iter()
                    .find(|a| a.loosely_eq(value))
                    .cloned()
                    .unwrap_or_else(|| value.clone()))
            }
            ValueCodec::Range { kind, .. } => {
                let wire = match kind {
                    ValueKind::Int => value.as_i64().map(Value::Int),
                    _ => value.as_f64().map(Value::Float),
                };
                wire.ok_or_else(|| ValidationError::WrongType {
                    expected: "number".to_string(),
                    received: value.to_string(),
                })
            }
            ValueCodec::Predicate { .. } => Ok(value.clone()),
        }
    }

    /// Convert a wire token back into a logical value.
    pub fn decode(&self, token: &str) -> Result<Value, DriverError> {
        let token = token.trim();
        match self {
            ValueCodec::DiscreteSet { allowed, wire_map } => {
                if let Some(map) = wire_map {
                    if let Some((k, _)) = map.iter().find(|(_, w)| w.eq_ignore_ascii_case(token)) {
                        return Ok(k.clone());
                    }
                }
                let kind = allowed.first().map(ValueKind::of).unwrap_or(ValueKind::Auto);
                let decoded = kind.decode(token).or_else(|_| ValueKind::Auto.decode(token))?;
                if let Some(member) = allowed.iter().find(|a| a.loosely_eq(&decoded)) {
                    return Ok(member.clone());
                }
                // SCPI devices answer with the short form ("WRIT" for "WRITe")
                if let Some(member) = allowed.iter().find(|a| match a {
                    Value::Text(t) => t.eq_ignore_ascii_case(token) || short_form(t) == token,
                    _ => false,
                }) {
                    return Ok(member.clone());
                }
                if wire_map.is_some() {
                    return Err(DriverError::parse(
                        token,
                        format!("not a wire token of {}", self.describe()),
                    ));
                }
                Ok(decoded)
            }
            ValueCodec::Range { kind, .. } => kind.decode(token),
            ValueCodec::Predicate { kind, .. } => kind.decode(token),
        }
    }
}

/// Mandatory upper-case prefix of an SCPI mnemonic (`MAXHold` -> `MAXH`).
fn short_form(mnemonic: &str) -> String {
    mnemonic
        .chars()
        .take_while(|c| !c.is_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_round_trip() {
        let codec = ValueCodec::range(50.0, 3.2e9);
        for v in [50.0, 1e9, 3.2e9, 123.456] {
            let wire = codec.encode(&Value::Float(v)).unwrap();
            assert_eq!(codec.decode(&wire.to_string()).unwrap(), Value::Float(v));
        }
    }

    #[test]
    fn test_range_rejects_out_of_domain() {
        let codec = ValueCodec::range(0.0, 51.0);
        let err = codec.validate(&Value::Float(52.0)).unwrap_err();
        assert_eq!(
            err,
            ValidationError::OutOfRange {
                min: 0.0,
                max: 51.0,
                value: 52.0
            }
        );
        assert!(codec.validate(&Value::Float(f64::NAN)).is_err());
        assert!(codec.validate(&Value::Text("10".into())).is_err());
    }

    #[test]
    fn test_range_encode_normalises_kind() {
        let codec = ValueCodec::int_range(1, 999);
        assert_eq!(codec.encode(&Value::Float(20.0)).unwrap(), Value::Int(20));
        let codec = ValueCodec::range(0.0, 10.0);
        assert_eq!(codec.encode(&Value::Int(3)).unwrap(), Value::Float(3.0));
        assert!(matches!(
            codec.encode(&Value::Text("3".into())),
            Err(ValidationError::WrongType { .. })
        ));
    }

    #[test]
    fn test_int_range_requires_integer() {
        let codec = ValueCodec::int_range(1, 999);
        assert!(codec.validate(&Value::Int(10)).is_ok());
        assert!(matches!(
            codec.validate(&Value::Float(1.5)),
            Err(ValidationError::WrongType { .. })
        ));
        assert_eq!(codec.encode(&Value::Float(4.0)).unwrap(), Value::Int(4));
    }

    #[test]
    fn test_mapped_round_trip() {
        let codec = ValueCodec::mapped([(true, "ON"), (false, "OFF")]);
        for key in [true, false] {
            let wire = codec.encode(&Value::Bool(key)).unwrap();
            assert_eq!(codec.decode(&wire.to_string()).unwrap(), Value::Bool(key));
        }
        assert_eq!(codec.decode("on").unwrap(), Value::Bool(true));
        assert_eq!(codec.decode("0").unwrap(), Value::Bool(false));
        assert!(codec.decode("MAYBE").is_err());
    }

    #[test]
    fn test_discrete_set_accepts_equivalent_numbers() {
        let codec = ValueCodec::discrete([1.0, 3.0, 1e3, 1e6]);
        assert_eq!(codec.encode(&Value::Int(1000)).unwrap(), Value::Float(1e3));
        assert!(codec.validate(&Value::Int(2)).is_err());
        assert_eq!(codec.decode("1000000").unwrap(), Value::Float(1e6));
    }

    #[test]
    fn test_discrete_set_short_form_decode() {
        let codec = ValueCodec::discrete(["WRITe", "MAXHold", "BLANk"]);
        assert_eq!(codec.decode("MAXH").unwrap(), Value::Text("MAXHold".into()));
        assert_eq!(codec.decode("blank").unwrap(), Value::Text("BLANk".into()));
    }

    #[test]
    fn test_predicate_reports_reason() {
        let codec = ValueCodec::predicate("even integer", ValueKind::Int, |v| match v.as_i64() {
            Some(n) if n % 2 == 0 => Ok(()),
            _ => Err("must be even".to_string()),
        });
        let err = codec.validate(&Value::Int(3)).unwrap_err();
        assert_eq!(err.expected_domain(), "must be even");
        assert_eq!(err.received(), "3");
    }
}
