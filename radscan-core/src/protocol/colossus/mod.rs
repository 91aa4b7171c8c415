//! Colossus radar protocol.
//!
//! The Colossus application protocol carries configuration, FFT video,
//! navigation, health and IMU messages. The same message vocabulary is
//! split across two transports:
//!
//! - **TCP** ([`tcp`]): a framed byte stream. Every frame starts with a
//!   16-byte signature, a version byte, a type byte and a 4-byte
//!   big-endian payload length.
//! - **UDP** ([`udp`]): exactly one message per datagram with a compact
//!   4-byte header.
//!
//! All multi-byte fields are network byte order.

pub mod features;
pub mod tcp;
pub mod udp;

/// Default Colossus server port, both transports.
pub const DEFAULT_PORT: u16 = 6317;

/// Frame signature preceding every Colossus TCP message.
pub const SIGNATURE: [u8; 16] = [
    0x00, 0x01, 0x03, 0x03, 0x07, 0x07, 0x0F, 0x0F, 0x1F, 0x1F, 0x3F, 0x3F, 0x7F, 0x7F, 0xFF, 0xFF,
];

/// Protocol version spoken by this implementation.
pub const PROTOCOL_VERSION: u8 = 1;
