//! Error types shared by the telegram pipeline, the ledger and the state store.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading, validating and accounting P1 telegrams
#[derive(Error, Debug)]
pub enum MeterError {
    #[error("Telegram checksum mismatch: given {given:#06x}, calculated {calculated:#06x}")]
    ChecksumMismatch { given: u16, calculated: u16 },

    #[error("Telegram has no `!` trailer line")]
    MissingTrailer,

    #[error("Invalid checksum trailer `{0}`")]
    InvalidTrailer(String),

    #[error("Telegram framing error: {0}")]
    Framing(String),

    #[error("Cannot load tariffs from {path}: {reason}")]
    Tariff { path: PathBuf, reason: String },

    #[error("State store error for {path}: {source}")]
    StoreIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State file {path} is not valid: {source}")]
    StoreFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MeterError>;
