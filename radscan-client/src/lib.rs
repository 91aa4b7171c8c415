//! # Radscan Client
//!
//! Tokio-based client SDK for Colossus-family radar streams.
//!
//! The crate composes the pure codecs from [`radscan_core`] with the
//! networking needed to talk to a live radar:
//!
//! ```text
//! bytes -> transport -> connection manager -> framer -> codec
//!       -> event dispatcher -> message dispatcher -> user handler
//! ```
//!
//! ## Façades
//!
//! - [`client::ColossusTcpClient`] - configuration, FFT and navigation
//!   streams over TCP
//! - [`server::ColossusTcpServer`] - the server side, also used as a
//!   mock radar in tests
//! - [`udp_client::ColossusUdpClient`] - point clouds and IMU over UDP
//! - [`cat240_client::Cat240Client`] - ASTERIX CAT-240 video
//! - [`playback::OfflineClient`] - replay of recorded sessions
//! - [`peak_finder::CfarPeakFinder`] - targets from CFAR-processed
//!   spokes
//!
//! Every façade exposes the same surface: `start`, `stop`,
//! `set_handler`, `remove_handler` / `ignore`, and `send` where the
//! transport allows it. Start and stop are idempotent; stop joins
//! every owned worker.
//!
//! ## Example
//!
//! ```rust,no_run
//! use radscan_client::client::ColossusTcpClient;
//! use radscan_core::protocol::colossus::tcp::{ConfigurationView, TcpMessageType};
//! use std::net::{Ipv4Addr, SocketAddrV4};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut radar =
//!         ColossusTcpClient::new(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 6317));
//!
//!     radar.set_handler(TcpMessageType::Configuration, |radar, _id, msg| {
//!         if let Ok(config) = ConfigurationView::new(&msg) {
//!             println!("azimuth samples [{}]", config.azimuth_samples());
//!             println!("range in bins   [{}]", config.range_in_bins());
//!         }
//!         radar.send_type(TcpMessageType::StartFftData);
//!     });
//!     radar.ignore(TcpMessageType::KeepAlive);
//!
//!     radar.start().await.unwrap();
//!     tokio::signal::ctrl_c().await.unwrap();
//!     radar.stop().await;
//! }
//! ```

use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;

use clap::Parser;

pub mod active;
pub mod cat240_client;
pub mod client;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod peak_finder;
pub mod playback;
pub mod server;
pub mod transport;
pub mod udp_client;

pub use client::ColossusTcpClient;
pub use error::ClientError;
pub use event::{ClientEvent, ConnectionId};
pub use peak_finder::{CfarPeakFinder, CfarTarget};
pub use playback::{OfflineClient, PlaybackTiming};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Options shared by every application embedding the SDK.
#[derive(Parser, Clone, Debug)]
pub struct Cli {
    /// Radar IP address
    #[arg(short = 'i', long = "ipaddress", default_value = "127.0.0.1")]
    pub ipaddress: Ipv4Addr,

    /// Radar port
    #[arg(short = 'p', long = "port", default_value_t = radscan_core::protocol::colossus::DEFAULT_PORT)]
    pub port: u16,

    /// Minimum log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long = "loglevel", default_value = "info")]
    pub loglevel: String,

    /// Recording to play back instead of connecting to a live radar
    #[arg(short = 'f', long = "file")]
    pub file: Option<PathBuf>,
}

impl Cli {
    /// The radar endpoint described by `--ipaddress` and `--port`.
    pub fn endpoint(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ipaddress, self.port)
    }
}

/// Mount env_logger with the level from `--loglevel`. Applications
/// call this once; the library itself never installs a logger.
pub fn init_logging(level: &str) {
    let level = level.parse().unwrap_or(log::LevelFilter::Info);
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_millis()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["app"]);
        assert_eq!(
            cli.endpoint(),
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, 6317)
        );
        assert_eq!(cli.loglevel, "info");
        assert!(cli.file.is_none());
    }

    #[test]
    fn test_cli_short_options() {
        let cli = Cli::parse_from(["app", "-i", "10.77.2.210", "-p", "6317", "-l", "debug"]);
        assert_eq!(cli.ipaddress, Ipv4Addr::new(10, 77, 2, 210));
        assert_eq!(cli.loglevel, "debug");
    }

    #[test]
    fn test_cli_playback_file() {
        let cli = Cli::parse_from(["app", "--file", "capture.rec"]);
        assert_eq!(cli.file, Some(PathBuf::from("capture.rec")));
    }
}
