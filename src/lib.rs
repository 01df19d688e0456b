//! Declarative command-descriptor drivers for laboratory instruments.
//!
//! An instrument attribute ("center frequency", "output load on channel 2") is a
//! [`Descriptor`](descriptor::Descriptor): a query template, a write template, a
//! [`ValueCodec`](codec::ValueCodec) that validates and maps values, and a
//! [`ResponseParser`](parser::ResponseParser) that extracts the answer. The
//! [`CommandEngine`](engine::CommandEngine) turns an attribute access into exactly
//! one request/response exchange on a blocking [`Transport`](adapters::Transport).
//!
//! On top of that:
//!
//! - [`channel`]: N identical sub-units of one instrument sharing its transport.
//! - [`variant`]: hardware personalities detected once and checked before any I/O.
//! - [`discovery`]: runtime capability probing for devices without a schema query.
//! - [`session`]: the key/value contract used by SDK-style controllers.
//! - [`instrument`]: the generic container and the concrete drivers.
//! - [`config`]: TOML + environment configuration for the command line tool.

pub mod adapters;
pub mod channel;
pub mod codec;
pub mod config;
pub mod descriptor;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod instrument;
pub mod parser;
pub mod session;
pub mod value;
pub mod variant;

pub use error::{DriverError, Result};
pub use instrument::{Driver, Instrument};
pub use value::Value;
