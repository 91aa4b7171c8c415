//! Error types for protocol parsing

use thiserror::Error;

/// Errors that can occur when parsing radar messages
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Buffer is too short to contain required data
    #[error("Message too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    /// Frame signature doesn't match the protocol magic
    #[error("Invalid signature at frame start")]
    InvalidSignature,

    /// Length field doesn't match actual message length
    #[error("Length mismatch: header says {header_len} bytes, message has {actual_len}")]
    LengthMismatch {
        header_len: usize,
        actual_len: usize,
    },

    /// Length field exceeds the protocol maximum
    #[error("Implausible payload length: {0} bytes")]
    ImplausibleLength(usize),

    /// Message type tag not recognized
    #[error("Unknown message type: {0:#04X}")]
    UnknownMessageType(u8),

    /// ASTERIX category other than 240
    #[error("Unexpected ASTERIX category: {0}")]
    WrongCategory(u8),

    /// A required field is missing from the record
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// Invalid message data
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

/// Errors raised when a caller misconfigures a processing stage
/// (CFAR window, peak finder). No processing happens after one of these.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Minimum bin {min_bin} is not below range in bins {range_in_bins}")]
    MinBinOutOfRange { min_bin: u16, range_in_bins: u16 },

    #[error("max_peaks must be at least 1")]
    ZeroMaxPeaks,

    #[error("Azimuth samples must be non-zero")]
    ZeroAzimuthSamples,
}
