//! P1 Digital Meter Library
//!
//! Reads the telegrams a Belgian/Dutch smart meter sends on its P1 port,
//! validates and decodes them, and keeps a persisted ledger of energy, gas
//! and water usage and cost per day, week, month and year together with a
//! forecast of the quarter-hour peak used by capacity tariffs.

pub mod checksum;
pub mod config;
pub mod error;
pub mod line_decoder;
pub mod meter_pipeline;
pub mod obis;
pub mod peak_forecaster;
pub mod readings;
pub mod relay_publisher;
pub mod relay_server;
pub mod serial_reader;
pub mod snapshot;
pub mod state;
pub mod state_store;
pub mod tariff;
pub mod telegram;
pub mod timestamp;
pub mod usage;

// Re-export commonly used types for easier access
pub use config::Settings;
pub use error::{MeterError, Result};
pub use line_decoder::{DecodedLine, Severity, TelegramDecoder};
pub use meter_pipeline::MeterPipeline;
pub use readings::{CurrentReadings, Reading, ReadingRegistry};
pub use relay_publisher::{RelayMessage, RelayPublisher};
pub use serial_reader::SerialReader;
pub use snapshot::MeterSnapshot;
pub use state::EngineState;
pub use state_store::{DayArchive, JsonFileStore, StateStore};
pub use tariff::Tariffs;
pub use telegram::{Telegram, TelegramCodec};
pub use usage::UsageEngine;
