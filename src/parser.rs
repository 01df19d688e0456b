//! Response parsers.
//!
//! A parser turns what the device sent back into tokens for the descriptor's codec.
//! Three encodings are supported:
//!
//! - **ASCII**: the response line is split on a delimiter and one token (or all of
//!   them) is selected with a [`Pick`].
//! - **Binary**: fixed length or length-prefixed frames holding packed numbers.
//! - **Keyed block**: `ECHO KEY1,val1,KEY2,val2` pairs collected into a [`KeyedBlock`].
//!
//! A response that is shorter than the parser expects never panics. `Pick::Index`
//! and `Pick::LastWord` hand back their declared default, binary decoding drops the
//! trailing partial sample, and a keyed block shorter than its echo prefix is empty.

use bytes::Buf;
use tracing::debug;

use crate::adapters::Transport;
use crate::error::{DriverError, Result};
use crate::value::{KeyedBlock, Value};

/// Which part of a tokenized ASCII response is handed to the codec.
#[derive(Debug, Clone, PartialEq)]
pub enum Pick {
    /// The full trimmed response, delimiter ignored.
    Whole,
    /// Every token, decoded one by one into a list.
    All,
    /// Token `index`, or `default` when the response is too short.
    Index { index: usize, default: Value },
    /// Last whitespace separated word of token `index` (`C1:OUTP ON` -> `ON`).
    LastWord { index: usize, default: Value },
}

/// Packed sample format inside a binary response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericFormat {
    U8,
    U16 { big_endian: bool },
    I16 { big_endian: bool },
    U32 { big_endian: bool },
    I32 { big_endian: bool },
    F32 { big_endian: bool },
    F64 { big_endian: bool },
}

impl NumericFormat {
    /// Size of one sample in bytes.
    pub fn width(self) -> usize {
        match self {
            NumericFormat::U8 => 1,
            NumericFormat::U16 { .. } | NumericFormat::I16 { .. } => 2,
            NumericFormat::U32 { .. } | NumericFormat::I32 { .. } | NumericFormat::F32 { .. } => 4,
            NumericFormat::F64 { .. } => 8,
        }
    }

    fn read(self, buf: &mut &[u8]) -> Value {
        match self {
            NumericFormat::U8 => Value::Int(buf.get_u8() as i64),
            NumericFormat::U16 { big_endian: true } => Value::Int(buf.get_u16() as i64),
            NumericFormat::U16 { big_endian: false } => Value::Int(buf.get_u16_le() as i64),
            NumericFormat::I16 { big_endian: true } => Value::Int(buf.get_i16() as i64),
            NumericFormat::I16 { big_endian: false } => Value::Int(buf.get_i16_le() as i64),
            NumericFormat::U32 { big_endian: true } => Value::Int(buf.get_u32() as i64),
            NumericFormat::U32 { big_endian: false } => Value::Int(buf.get_u32_le() as i64),
            NumericFormat::I32 { big_endian: true } => Value::Int(buf.get_i32() as i64),
            NumericFormat::I32 { big_endian: false } => Value::Int(buf.get_i32_le() as i64),
            NumericFormat::F32 { big_endian: true } => Value::Float(buf.get_f32() as f64),
            NumericFormat::F32 { big_endian: false } => Value::Float(buf.get_f32_le() as f64),
            NumericFormat::F64 { big_endian: true } => Value::Float(buf.get_f64()),
            NumericFormat::F64 { big_endian: false } => Value::Float(buf.get_f64_le()),
        }
    }
}

/// How the payload of a binary response is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFraming {
    /// Exactly `n` bytes.
    Fixed(usize),
    /// An unsigned byte count of `width` bytes followed by the payload.
    LengthPrefixed { width: usize, big_endian: bool },
}

/// Declared encoding of a descriptor's response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseParser {
    Ascii { delimiter: char, pick: Pick },
    Binary {
        framing: BinaryFraming,
        format: NumericFormat,
    },
    KeyedBlock { delimiter: char, echo_len: usize },
}

impl Default for ResponseParser {
    fn default() -> Self {
        ResponseParser::Ascii {
            delimiter: ',',
            pick: Pick::Whole,
        }
    }
}

/// Parser output, before codec decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    /// One wire token for the codec.
    Token(String),
    /// A list of wire tokens, each decoded by the codec.
    Tokens(Vec<String>),
    /// Documented fallback value, returned without decoding.
    Default(Value),
    /// Numbers unpacked from a binary frame.
    Samples(Vec<Value>),
    Block(KeyedBlock),
}

impl ResponseParser {
    /// Comma separated ASCII, token `index`.
    pub fn token(index: usize, default: impl Into<Value>) -> Self {
        ResponseParser::Ascii {
            delimiter: ',',
            pick: Pick::Index {
                index,
                default: default.into(),
            },
        }
    }

    /// Comma separated ASCII, last word of token `index`.
    pub fn last_word(index: usize, default: impl Into<Value>) -> Self {
        ResponseParser::Ascii {
            delimiter: ',',
            pick: Pick::LastWord {
                index,
                default: default.into(),
            },
        }
    }

    /// Comma separated ASCII list.
    pub fn list() -> Self {
        ResponseParser::Ascii {
            delimiter: ',',
            pick: Pick::All,
        }
    }

    pub fn keyed_block(echo_len: usize) -> Self {
        ResponseParser::KeyedBlock {
            delimiter: ',',
            echo_len,
        }
    }

    /// Read one complete response from the transport and parse it.
    pub fn read_from(&self, transport: &mut dyn Transport) -> Result<Parsed> {
        match self {
            ResponseParser::Binary { framing, .. } => {
                let raw = match framing {
                    BinaryFraming::Fixed(n) => transport.read_bytes(*n)?,
                    BinaryFraming::LengthPrefixed { width, big_endian } => {
                        let mut raw = transport.read_bytes(*width)?;
                        let len = prefix_len(&raw, *big_endian);
                        raw.extend(transport.read_bytes(len)?);
                        raw
                    }
                };
                debug!(bytes = raw.len(), "Received binary response");
                self.parse_bytes(&raw)
            }
            _ => {
                let line = transport.read_text()?;
                self.parse_text(&line)
            }
        }
    }

    /// Parse a text response.
    pub fn parse_text(&self, response: &str) -> Result<Parsed> {
        let response = response.trim();
        match self {
            ResponseParser::Ascii { delimiter, pick } => Ok(pick_tokens(response, *delimiter, pick)),
            ResponseParser::KeyedBlock {
                delimiter,
                echo_len,
            } => Ok(Parsed::Block(parse_keyed_block(response, *delimiter, *echo_len))),
            ResponseParser::Binary { .. } => self.parse_bytes(response.as_bytes()),
        }
    }

    /// Parse a binary response.
    pub fn parse_bytes(&self, raw: &[u8]) -> Result<Parsed> {
        match self {
            ResponseParser::Binary { framing, format } => {
                let payload = match framing {
                    BinaryFraming::Fixed(n) => &raw[..(*n).min(raw.len())],
                    BinaryFraming::LengthPrefixed { width, big_endian } => {
                        if raw.len() < *width {
                            return Err(DriverError::parse(
                                format!("{:02X?}", raw),
                                format!("missing {}-byte length prefix", width),
                            ));
                        }
                        let declared = prefix_len(&raw[..*width], *big_endian);
                        let body = &raw[*width..];
                        &body[..declared.min(body.len())]
                    }
                };
                Ok(Parsed::Samples(unpack(payload, *format)))
            }
            _ => {
                let text = String::from_utf8_lossy(raw);
                self.parse_text(&text)
            }
        }
    }
}

fn prefix_len(prefix: &[u8], big_endian: bool) -> usize {
    let fold = |acc: usize, b: &u8| (acc << 8) | *b as usize;
    if big_endian {
        prefix.iter().fold(0, fold)
    } else {
        prefix.iter().rev().fold(0, fold)
    }
}

fn unpack(payload: &[u8], format: NumericFormat) -> Vec<Value> {
    let width = format.width();
    let mut buf = &payload[..payload.len() - payload.len() % width];
    let mut samples = Vec::with_capacity(buf.len() / width);
    while buf.has_remaining() {
        samples.push(format.read(&mut buf));
    }
    samples
}

fn pick_tokens(response: &str, delimiter: char, pick: &Pick) -> Parsed {
    let token_at = |index: usize| {
        response
            .split(delimiter)
            .nth(index)
            .map(str::trim)
            .filter(|t| !t.is_empty())
    };
    match pick {
        Pick::Whole => Parsed::Token(response.to_string()),
        Pick::All => Parsed::Tokens(
            response
                .split(delimiter)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        Pick::Index { index, default } => match token_at(*index) {
            Some(token) => Parsed::Token(token.to_string()),
            None => Parsed::Default(default.clone()),
        },
        Pick::LastWord { index, default } => {
            match token_at(*index).and_then(|t| t.split_whitespace().last()) {
                Some(word) => Parsed::Token(word.to_string()),
                None => Parsed::Default(default.clone()),
            }
        }
    }
}

/// Pair adjacent tokens after dropping `echo_len` characters of command echo.
pub fn parse_keyed_block(response: &str, delimiter: char, echo_len: usize) -> KeyedBlock {
    let body = match response.char_indices().nth(echo_len) {
        Some((offset, _)) => &response[offset..],
        None => return KeyedBlock::new(),
    };
    let tokens: Vec<&str> = body.split(delimiter).map(str::trim).collect();
    // An unpaired trailing key is dropped.
    tokens
        .chunks_exact(2)
        .filter(|pair| !pair[0].is_empty())
        .map(|pair| (pair[0], pair[1]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyed_block_with_echo() {
        let block = parse_keyed_block("ECHO,KEY1,10,KEY2,20", ',', 5);
        assert_eq!(block.get("KEY1"), Some("10"));
        assert_eq!(block.get("KEY2"), Some("20"));
        assert_eq!(block.len(), 2);
    }

    #[test]
    fn test_keyed_block_siglent_bswv() {
        let block = parse_keyed_block("C1:BSWV WVTP,SINE,FRQ,1000HZ,AMP,4V,OFST", ',', 8);
        let keys: Vec<&str> = block.keys().collect();
        assert_eq!(keys, vec!["WVTP", "FRQ", "AMP"]);
    }

    #[test]
    fn test_keyed_block_shorter_than_echo() {
        assert!(parse_keyed_block("C1:", ',', 8).is_empty());
    }

    #[test]
    fn test_index_pick_falls_back_to_default() {
        let parser = ResponseParser::token(6, "NOR");
        assert_eq!(
            parser.parse_text("C1:OUTP ON,LOAD,HZ").unwrap(),
            Parsed::Default(Value::Text("NOR".into()))
        );
        let parser = ResponseParser::token(2, "HZ");
        assert_eq!(
            parser.parse_text("C1:OUTP ON,LOAD,50,PLRT,NOR").unwrap(),
            Parsed::Token("50".into())
        );
    }

    #[test]
    fn test_last_word_pick() {
        let parser = ResponseParser::last_word(0, false);
        assert_eq!(
            parser.parse_text("C1:OUTP ON,LOAD,HZ,PLRT,NOR").unwrap(),
            Parsed::Token("ON".into())
        );
        assert_eq!(
            parser.parse_text("").unwrap(),
            Parsed::Default(Value::Bool(false))
        );
    }

    #[test]
    fn test_list_pick() {
        let parser = ResponseParser::list();
        assert_eq!(
            parser.parse_text("-80.5, -79.25,-81,\n").unwrap(),
            Parsed::Tokens(vec!["-80.5".into(), "-79.25".into(), "-81".into()])
        );
    }

    #[test]
    fn test_binary_length_prefixed_f32() {
        let parser = ResponseParser::Binary {
            framing: BinaryFraming::LengthPrefixed {
                width: 4,
                big_endian: false,
            },
            format: NumericFormat::F32 { big_endian: false },
        };
        let mut raw = vec![9, 0, 0, 0];
        raw.extend_from_slice(&1.5f32.to_le_bytes());
        raw.extend_from_slice(&(-2.0f32).to_le_bytes());
        raw.push(0xFF);
        assert_eq!(
            parser.parse_bytes(&raw).unwrap(),
            Parsed::Samples(vec![Value::Float(1.5), Value::Float(-2.0)])
        );
    }

    #[test]
    fn test_binary_prefix_larger_than_data() {
        let parser = ResponseParser::Binary {
            framing: BinaryFraming::LengthPrefixed {
                width: 2,
                big_endian: true,
            },
            format: NumericFormat::U16 { big_endian: true },
        };
        let raw = [0x00, 0x40, 0x01, 0x02, 0x03, 0x04];
        assert_eq!(
            parser.parse_bytes(&raw).unwrap(),
            Parsed::Samples(vec![Value::Int(0x0102), Value::Int(0x0304)])
        );
        assert!(parser.parse_bytes(&[0x00]).is_err());
    }

    #[test]
    fn test_binary_fixed_frame() {
        let parser = ResponseParser::Binary {
            framing: BinaryFraming::Fixed(4),
            format: NumericFormat::I16 { big_endian: false },
        };
        assert_eq!(
            parser.parse_bytes(&[0xFF, 0xFF, 0x02, 0x00, 0xAA]).unwrap(),
            Parsed::Samples(vec![Value::Int(-1), Value::Int(2)])
        );
    }
}
