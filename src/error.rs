//! Error types for the SLCANX library
//!
//! `SlcanxError` covers everything a caller can observe. `DecodeError`
//! describes why an inbound line is not a frame; the read path folds it
//! into "no frame" and keeps going.

use thiserror::Error;

/// Result type alias for SLCANX operations
pub type Result<T> = std::result::Result<T, SlcanxError>;

/// Error types for SLCANX operations
#[derive(Error, Debug)]
pub enum SlcanxError {
    /// I/O error on the underlying byte stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the serialport library
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Invalid channel number
    #[error("Invalid channel number: {channel} (device has {max_channels} channels)")]
    InvalidChannel { channel: usize, max_channels: usize },

    /// Data bitrate has no `Y` table entry
    #[error("Unsupported data bitrate {bitrate} (must be 1-15 Mbit/s in whole megabits)")]
    UnsupportedDataBitrate { bitrate: u32 },

    /// Sample point outside the range the adapter accepts
    #[error("Invalid sample point {permille}/1000 (valid: 750-875)")]
    InvalidSamplePoint { permille: u16 },

    /// Failed to start a background loop
    #[error("Failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        source: std::io::Error,
    },
}

impl SlcanxError {
    /// Check if this error came from the byte stream
    pub fn is_io_error(&self) -> bool {
        matches!(self, SlcanxError::Io(_) | SlcanxError::Serial(_))
    }

    /// Check if this error is a rejected configuration value
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SlcanxError::InvalidChannel { .. }
                | SlcanxError::UnsupportedDataBitrate { .. }
                | SlcanxError::InvalidSamplePoint { .. }
        )
    }
}

/// Reasons an inbound line does not decode to a frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Nothing left after channel-index stripping
    #[error("empty line")]
    Empty,

    /// Leading letter is not a frame command (ack, echo, status)
    #[error("not a frame command: '{0}'")]
    NotAFrame(char),

    /// Line ends before the ID, length code or payload is complete
    #[error("line too short: need {needed} characters, got {actual}")]
    TooShort { needed: usize, actual: usize },

    /// ID or payload contains non-hex characters
    #[error("invalid hex field: {0}")]
    InvalidHex(String),

    /// Length code is not a hex digit
    #[error("invalid length code: '{0}'")]
    InvalidLengthCode(char),
}
