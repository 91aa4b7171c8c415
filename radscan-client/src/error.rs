//! Client-side error type.

use radscan_core::error::{ConfigError, ParseError};
use thiserror::Error;

/// Errors surfaced by the client façades.
///
/// Wire decode problems never appear here: the framers resynchronise
/// (TCP) or drop the datagram (UDP) and log at debug level. Transport
/// failures surface as `Disconnected` events rather than errors.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("client is not running")]
    NotRunning,
}
