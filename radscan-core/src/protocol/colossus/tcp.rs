//! Colossus TCP message framing and payload layouts.
//!
//! Frame layout:
//!
//! ```text
//! +----------------+---------+------+----------------+------------------+
//! | signature (16) | version | type | payload length | payload ...      |
//! |                |   (1)   | (1)  |   (4, BE)      | (length bytes)   |
//! +----------------+---------+------+----------------+------------------+
//! ```
//!
//! A [`TcpMessage`] owns the complete frame, header included; typed
//! views read individual payload fields with explicit offsets and
//! endianness conversion.

use log::debug;

use super::{PROTOCOL_VERSION, SIGNATURE};
use crate::config::RadarConfig;
use crate::error::ParseError;
use crate::protocol::colossus::features::RadarFeatures;
use crate::wire;

/// Fixed header size: signature + version + type + payload length.
pub const HEADER_SIZE: usize = 22;

/// Upper bound on a sane payload. Anything above this is treated as a
/// framing error and triggers resynchronisation.
pub const MAX_PAYLOAD: usize = 4 * 1024 * 1024;

// =============================================================================
// Message types
// =============================================================================

/// Colossus TCP message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TcpMessageType {
    KeepAlive = 1,
    Configuration = 10,
    ConfigurationRequest = 20,
    StartFftData = 21,
    StopFftData = 22,
    StartHealthMsgs = 23,
    StopHealthMsgs = 24,
    FftData = 30,
    HighPrecisionFftData = 31,
    Health = 40,
    ContourUpdate = 50,
    SectorBlankingUpdate = 51,
    SystemRestart = 76,
    LoggingLevels = 90,
    LoggingLevelsRequest = 100,
    SetAutoTune = 110,
    StartNavData = 120,
    StopNavData = 121,
    SetNavThreshold = 122,
    NavigationData = 123,
    SetNavRangeOffsetAndGain = 124,
    CalibrateAccelerometer = 125,
    StartAccelerometer = 126,
    StopAccelerometer = 127,
    AccelerometerData = 128,
    NavigationConfigRequest = 203,
    NavigationConfig = 204,
    SetNavigationConfig = 205,
}

impl TcpMessageType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        use TcpMessageType::*;
        Some(match tag {
            1 => KeepAlive,
            10 => Configuration,
            20 => ConfigurationRequest,
            21 => StartFftData,
            22 => StopFftData,
            23 => StartHealthMsgs,
            24 => StopHealthMsgs,
            30 => FftData,
            31 => HighPrecisionFftData,
            40 => Health,
            50 => ContourUpdate,
            51 => SectorBlankingUpdate,
            76 => SystemRestart,
            90 => LoggingLevels,
            100 => LoggingLevelsRequest,
            110 => SetAutoTune,
            120 => StartNavData,
            121 => StopNavData,
            122 => SetNavThreshold,
            123 => NavigationData,
            124 => SetNavRangeOffsetAndGain,
            125 => CalibrateAccelerometer,
            126 => StartAccelerometer,
            127 => StopAccelerometer,
            128 => AccelerometerData,
            203 => NavigationConfigRequest,
            204 => NavigationConfig,
            205 => SetNavigationConfig,
            _ => return None,
        })
    }
}

impl std::fmt::Display for TcpMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, *self as u8)
    }
}

// =============================================================================
// Message
// =============================================================================

/// One complete Colossus TCP frame, header included.
///
/// The buffer is owned and moves across queues; cloning copies the
/// frame and is deliberately explicit at call sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpMessage {
    data: Vec<u8>,
}

impl TcpMessage {
    /// Build a message from a type tag and payload bytes.
    pub fn new(msg_type: TcpMessageType, payload: &[u8]) -> Self {
        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len());
        data.extend_from_slice(&SIGNATURE);
        wire::put_u8(&mut data, PROTOCOL_VERSION);
        wire::put_u8(&mut data, msg_type as u8);
        wire::put_u32(&mut data, payload.len() as u32);
        data.extend_from_slice(payload);
        TcpMessage { data }
    }

    /// Build a header-only message (start/stop requests, keep-alive).
    pub fn from_type(msg_type: TcpMessageType) -> Self {
        Self::new(msg_type, &[])
    }

    /// Adopt a complete frame, validating signature, type and length.
    pub fn from_frame(data: Vec<u8>) -> Result<Self, ParseError> {
        if data.len() < HEADER_SIZE {
            return Err(ParseError::TooShort {
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }
        if data[..16] != SIGNATURE {
            return Err(ParseError::InvalidSignature);
        }
        let tag = data[17];
        if TcpMessageType::from_u8(tag).is_none() {
            return Err(ParseError::UnknownMessageType(tag));
        }
        let payload_len = wire::get_u32(&data, 18)? as usize;
        if payload_len != data.len() - HEADER_SIZE {
            return Err(ParseError::LengthMismatch {
                header_len: payload_len,
                actual_len: data.len() - HEADER_SIZE,
            });
        }
        Ok(TcpMessage { data })
    }

    pub fn msg_type(&self) -> TcpMessageType {
        // from_frame/new guarantee a valid tag
        TcpMessageType::from_u8(self.data[17]).unwrap_or(TcpMessageType::KeepAlive)
    }

    pub fn version(&self) -> u8 {
        self.data[16]
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[HEADER_SIZE..]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The full frame as sent on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

// =============================================================================
// Payload views
// =============================================================================

/// Configuration payload:
///
/// ```text
/// offset 0   azimuth_samples  u16
/// offset 2   bin_size         u16 (tenths of mm)
/// offset 4   range_in_bins    u16
/// offset 6   encoder_size     u16
/// offset 8   rotation_speed   u16 (mHz)
/// offset 10  packet_rate      u16
/// offset 12  range_gain       f32 (IEEE-754 bits, BE)
/// offset 16  range_offset     f32 (IEEE-754 bits, BE)
/// offset 20  features         u32 bitmap
/// offset 24  opaque blob (protobuf), to end
/// ```
pub struct ConfigurationView<'a> {
    payload: &'a [u8],
}

impl<'a> ConfigurationView<'a> {
    pub const FIXED_SIZE: usize = 24;

    pub fn new(msg: &'a TcpMessage) -> Result<Self, ParseError> {
        let payload = msg.payload();
        if payload.len() < Self::FIXED_SIZE {
            return Err(ParseError::TooShort {
                expected: Self::FIXED_SIZE,
                actual: payload.len(),
            });
        }
        Ok(ConfigurationView { payload })
    }

    pub fn azimuth_samples(&self) -> u16 {
        wire::get_u16(self.payload, 0).unwrap_or(0)
    }

    pub fn bin_size(&self) -> u16 {
        wire::get_u16(self.payload, 2).unwrap_or(0)
    }

    pub fn range_in_bins(&self) -> u16 {
        wire::get_u16(self.payload, 4).unwrap_or(0)
    }

    pub fn encoder_size(&self) -> u16 {
        wire::get_u16(self.payload, 6).unwrap_or(0)
    }

    pub fn rotation_speed(&self) -> u16 {
        wire::get_u16(self.payload, 8).unwrap_or(0)
    }

    pub fn packet_rate(&self) -> u16 {
        wire::get_u16(self.payload, 10).unwrap_or(0)
    }

    pub fn range_gain(&self) -> f32 {
        wire::get_f32(self.payload, 12).unwrap_or(0.0)
    }

    pub fn range_offset(&self) -> f32 {
        wire::get_f32(self.payload, 16).unwrap_or(0.0)
    }

    pub fn features(&self) -> RadarFeatures {
        RadarFeatures::from_bits(wire::get_u32(self.payload, 20).unwrap_or(0))
    }

    /// Opaque trailing blob, handed to an external codec.
    pub fn blob(&self) -> &[u8] {
        &self.payload[Self::FIXED_SIZE..]
    }

    pub fn to_config(&self) -> RadarConfig {
        RadarConfig {
            azimuth_samples: self.azimuth_samples(),
            encoder_size: self.encoder_size(),
            bin_size: self.bin_size(),
            range_in_bins: self.range_in_bins(),
            rotation_speed: self.rotation_speed(),
            packet_rate: self.packet_rate(),
            range_gain: self.range_gain(),
            range_offset: self.range_offset(),
            features: self.features(),
        }
    }
}

/// Build a Configuration message from a snapshot plus optional blob.
pub fn encode_configuration(config: &RadarConfig, blob: &[u8]) -> TcpMessage {
    let mut payload = Vec::with_capacity(ConfigurationView::FIXED_SIZE + blob.len());
    wire::put_u16(&mut payload, config.azimuth_samples);
    wire::put_u16(&mut payload, config.bin_size);
    wire::put_u16(&mut payload, config.range_in_bins);
    wire::put_u16(&mut payload, config.encoder_size);
    wire::put_u16(&mut payload, config.rotation_speed);
    wire::put_u16(&mut payload, config.packet_rate);
    wire::put_f32(&mut payload, config.range_gain);
    wire::put_f32(&mut payload, config.range_offset);
    wire::put_u32(&mut payload, config.features.to_bits());
    payload.extend_from_slice(blob);
    TcpMessage::new(TcpMessageType::Configuration, &payload)
}

/// FFT data payload:
///
/// ```text
/// offset 0   sweep_counter  u16
/// offset 2   azimuth        u16
/// offset 4   ntp_seconds    u32
/// offset 8   ntp_split_seconds u32
/// offset 12  raw bins, to end
/// ```
pub struct FftDataView<'a> {
    payload: &'a [u8],
}

impl<'a> FftDataView<'a> {
    pub const FIXED_SIZE: usize = 12;

    pub fn new(msg: &'a TcpMessage) -> Result<Self, ParseError> {
        let payload = msg.payload();
        if payload.len() < Self::FIXED_SIZE {
            return Err(ParseError::TooShort {
                expected: Self::FIXED_SIZE,
                actual: payload.len(),
            });
        }
        Ok(FftDataView { payload })
    }

    pub fn sweep_counter(&self) -> u16 {
        wire::get_u16(self.payload, 0).unwrap_or(0)
    }

    pub fn azimuth(&self) -> u16 {
        wire::get_u16(self.payload, 2).unwrap_or(0)
    }

    pub fn ntp_seconds(&self) -> u32 {
        wire::get_u32(self.payload, 4).unwrap_or(0)
    }

    pub fn ntp_split_seconds(&self) -> u32 {
        wire::get_u32(self.payload, 8).unwrap_or(0)
    }

    /// Raw FFT bins, 8-bit quantum.
    pub fn bins(&self) -> &[u8] {
        &self.payload[Self::FIXED_SIZE..]
    }

    /// Raw FFT bins as 16-bit samples, for high precision messages.
    /// A trailing odd byte is dropped.
    pub fn bins_u16(&self) -> Vec<u16> {
        self.bins()
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect()
    }
}

/// Build an FFT data message.
pub fn encode_fft_data(sweep_counter: u16, azimuth: u16, seconds: u32, split: u32, bins: &[u8]) -> TcpMessage {
    let mut payload = Vec::with_capacity(FftDataView::FIXED_SIZE + bins.len());
    wire::put_u16(&mut payload, sweep_counter);
    wire::put_u16(&mut payload, azimuth);
    wire::put_u32(&mut payload, seconds);
    wire::put_u32(&mut payload, split);
    payload.extend_from_slice(bins);
    TcpMessage::new(TcpMessageType::FftData, &payload)
}

/// One detected point in a navigation data message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavPoint {
    /// Range in metres
    pub range: f32,
    /// Power in dB
    pub power: f32,
}

/// Navigation data payload:
///
/// ```text
/// offset 0   ntp_seconds    u32
/// offset 4   ntp_split_seconds u32
/// offset 8   azimuth        u16
/// offset 10  points, 6 bytes each:
///            range  u32 (metres * 1e6)
///            power  u16 (dB * 10)
/// ```
pub struct NavigationDataView<'a> {
    payload: &'a [u8],
}

impl<'a> NavigationDataView<'a> {
    pub const FIXED_SIZE: usize = 10;
    const POINT_SIZE: usize = 6;

    pub fn new(msg: &'a TcpMessage) -> Result<Self, ParseError> {
        let payload = msg.payload();
        if payload.len() < Self::FIXED_SIZE {
            return Err(ParseError::TooShort {
                expected: Self::FIXED_SIZE,
                actual: payload.len(),
            });
        }
        if (payload.len() - Self::FIXED_SIZE) % Self::POINT_SIZE != 0 {
            return Err(ParseError::InvalidMessage(
                "navigation data points truncated".into(),
            ));
        }
        Ok(NavigationDataView { payload })
    }

    pub fn ntp_seconds(&self) -> u32 {
        wire::get_u32(self.payload, 0).unwrap_or(0)
    }

    pub fn ntp_split_seconds(&self) -> u32 {
        wire::get_u32(self.payload, 4).unwrap_or(0)
    }

    pub fn azimuth(&self) -> u16 {
        wire::get_u16(self.payload, 8).unwrap_or(0)
    }

    pub fn points(&self) -> Vec<NavPoint> {
        self.payload[Self::FIXED_SIZE..]
            .chunks_exact(Self::POINT_SIZE)
            .map(|chunk| NavPoint {
                range: wire::get_u32(chunk, 0).unwrap_or(0) as f32 / 1_000_000.0,
                power: f32::from(wire::get_u16(chunk, 4).unwrap_or(0)) / 10.0,
            })
            .collect()
    }
}

/// Build a navigation data message.
pub fn encode_navigation_data(
    seconds: u32,
    split: u32,
    azimuth: u16,
    points: &[NavPoint],
) -> TcpMessage {
    let mut payload = Vec::with_capacity(NavigationDataView::FIXED_SIZE + points.len() * 6);
    wire::put_u32(&mut payload, seconds);
    wire::put_u32(&mut payload, split);
    wire::put_u16(&mut payload, azimuth);
    for point in points {
        wire::put_u32(&mut payload, (point.range * 1_000_000.0) as u32);
        wire::put_u16(&mut payload, (point.power * 10.0) as u16);
    }
    TcpMessage::new(TcpMessageType::NavigationData, &payload)
}

/// Navigation configuration payload:
///
/// ```text
/// offset 0   bins_to_operate_on  u16
/// offset 2   min_bin             u16
/// offset 4   navigation_threshold u32 (dB * 10)
/// offset 8   max_peaks           u32
/// ```
pub struct NavigationConfigView<'a> {
    payload: &'a [u8],
}

impl<'a> NavigationConfigView<'a> {
    pub const FIXED_SIZE: usize = 12;

    pub fn new(msg: &'a TcpMessage) -> Result<Self, ParseError> {
        let payload = msg.payload();
        if payload.len() < Self::FIXED_SIZE {
            return Err(ParseError::TooShort {
                expected: Self::FIXED_SIZE,
                actual: payload.len(),
            });
        }
        Ok(NavigationConfigView { payload })
    }

    pub fn bins_to_operate_on(&self) -> u16 {
        wire::get_u16(self.payload, 0).unwrap_or(0)
    }

    pub fn min_bin(&self) -> u16 {
        wire::get_u16(self.payload, 2).unwrap_or(0)
    }

    pub fn navigation_threshold(&self) -> f32 {
        wire::get_u32(self.payload, 4).unwrap_or(0) as f32 / 10.0
    }

    pub fn max_peaks(&self) -> u32 {
        wire::get_u32(self.payload, 8).unwrap_or(0)
    }
}

/// Build a navigation configuration message (request or set).
pub fn encode_navigation_config(
    msg_type: TcpMessageType,
    bins_to_operate_on: u16,
    min_bin: u16,
    threshold_db: f32,
    max_peaks: u32,
) -> TcpMessage {
    let mut payload = Vec::with_capacity(NavigationConfigView::FIXED_SIZE);
    wire::put_u16(&mut payload, bins_to_operate_on);
    wire::put_u16(&mut payload, min_bin);
    wire::put_u32(&mut payload, (threshold_db * 10.0) as u32);
    wire::put_u32(&mut payload, max_peaks);
    TcpMessage::new(msg_type, &payload)
}

// =============================================================================
// Framer
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramerState {
    ReadingHeader,
    ReadingPayload { payload_len: usize, known_type: bool },
}

/// Per-connection framer recovering Colossus messages from a byte
/// stream.
///
/// A corrupted signature or an implausible length field discards one
/// byte and re-scans, so the framer re-locks onto the next frame
/// boundary after garbage.
#[derive(Debug)]
pub struct TcpFramer {
    buf: Vec<u8>,
    state: FramerState,
}

impl Default for TcpFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpFramer {
    pub fn new() -> Self {
        TcpFramer {
            buf: Vec::new(),
            state: FramerState::ReadingHeader,
        }
    }

    /// Feed received bytes; returns every message completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<TcpMessage> {
        self.buf.extend_from_slice(bytes);
        let mut messages = Vec::new();

        loop {
            match self.state {
                FramerState::ReadingHeader => {
                    if self.buf.len() < HEADER_SIZE {
                        break;
                    }
                    if self.buf[..16] != SIGNATURE {
                        // Resynchronise: discard one byte and re-scan
                        self.buf.remove(0);
                        continue;
                    }
                    let tag = self.buf[17];
                    let payload_len = match wire::get_u32(&self.buf, 18) {
                        Ok(len) => len as usize,
                        Err(_) => break,
                    };
                    if payload_len > MAX_PAYLOAD {
                        debug!(
                            "framer: implausible payload length {}, resynchronising",
                            payload_len
                        );
                        self.buf.remove(0);
                        continue;
                    }
                    let known_type = TcpMessageType::from_u8(tag).is_some();
                    if !known_type {
                        debug!("framer: unknown message type {:#04x}, frame skipped", tag);
                    }
                    self.state = FramerState::ReadingPayload {
                        payload_len,
                        known_type,
                    };
                }
                FramerState::ReadingPayload {
                    payload_len,
                    known_type,
                } => {
                    let frame_len = HEADER_SIZE + payload_len;
                    if self.buf.len() < frame_len {
                        break;
                    }
                    let frame: Vec<u8> = self.buf.drain(..frame_len).collect();
                    self.state = FramerState::ReadingHeader;
                    if known_type {
                        // Signature, type and length were validated above
                        match TcpMessage::from_frame(frame) {
                            Ok(msg) => messages.push(msg),
                            Err(err) => debug!("framer: dropped frame: {}", err),
                        }
                    }
                }
            }
        }

        messages
    }

    /// Bytes buffered awaiting a complete frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
