//! Radscan Core - Platform-independent radar protocol library
//!
//! This crate contains pure parsing and signal-processing logic for
//! Colossus-family radar streams. It has no I/O dependencies; everything
//! here is `&[u8]` in, `Result<T>` out, or plain in-memory state machines.
//!
//! # Contents
//!
//! - **Colossus TCP** - framed control/data protocol (configuration, FFT
//!   spokes, navigation data, health)
//! - **Colossus UDP** - one-message-per-datagram variant (point clouds, IMU)
//! - **CAT-240** - ASTERIX category 240 radar video records
//! - **Recordings** - offline capture file format with replay timing
//! - **Navigation** - CA-CFAR detection, FFT buffering, sub-bin peak
//!   resolution
//!
//! # Example
//!
//! ```rust,no_run
//! use radscan_core::protocol::colossus::tcp::TcpFramer;
//!
//! let mut framer = TcpFramer::new();
//! let bytes: &[u8] = &[0u8; 64]; // Real bytes would come from a socket
//! for msg in framer.push(bytes) {
//!     println!("message type: {:?}", msg.msg_type());
//! }
//! ```

pub mod config;
pub mod error;
pub mod navigation;
pub mod protocol;
pub mod recording;
pub mod units;
pub mod wire;

// Re-export commonly used types
pub use config::RadarConfig;
pub use error::ParseError;
