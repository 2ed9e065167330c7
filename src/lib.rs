//! Wireless M-Bus / M-Bus telegram decoder.
//!
//! Turns a captured frame (wired short/long M-Bus or wireless-APL) into
//! typed data records, with an optional AES-128 security layer and a
//! thin driver-dispatch contract for mapping records to named fields.

pub mod analyzer;
pub mod codec;
pub mod driver;
pub mod error;
pub mod frame;
pub mod record;
pub mod security;
pub mod telegram;
pub mod types;

pub use analyzer::{Analyzer, MeterState, RecordDiff, RecordKey};
pub use driver::{Driver, DriverRegistry};
pub use error::DecodeError;
pub use record::{DataRecord, RecordFunction, Value};
pub use security::KeyStore;
pub use telegram::{AnalysisReport, RecordSummary, Telegram};
pub use types::{DeviceType, FrameType, Header, LinkMode, MeterRegistration};
