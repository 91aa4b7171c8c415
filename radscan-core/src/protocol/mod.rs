//! Radar wire protocol implementations.
//!
//! This module contains wire protocol parsing and formatting for each
//! supported stream. All functions are pure (no I/O): byte slices in,
//! decoded values or [`ParseError`](crate::error::ParseError) out.
//!
//! # Structure
//!
//! - [`colossus`] - the vendor application protocol, TCP framed stream
//!   and one-message-per-datagram UDP variant
//! - [`cat240`] - ASTERIX category 240 radar video records

pub mod cat240;
pub mod colossus;
