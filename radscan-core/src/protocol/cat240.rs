//! ASTERIX category 240 radar video.
//!
//! CAT-240 records are variable length: a one-byte category (always
//! 240), a two-byte big-endian record length, a field-presence bitmap
//! (FSPEC, with an extension bit), then the present fields in User
//! Application Profile order. Only the video-summary and video-message
//! fields needed for radar video are supported here.
//!
//! Field reference numbers in UAP order:
//!
//! ```text
//! FRN 1  I240/010  data source identifier  (2 bytes: SAC, SIC)
//! FRN 2  I240/000  message type            (1 byte: 001 summary, 002 video)
//! FRN 3  I240/020  video record header     (4 bytes: message index)
//! FRN 4  I240/030  video summary           (repetitive ASCII)
//! FRN 5  I240/040  video header nano       (12 bytes)
//! FRN 6  I240/041  video header femto      (12 bytes)
//! FRN 7  I240/048  video cells resolution  (2 bytes, compression flag)
//! FRN 8  I240/049  octets / cells counts   (5 bytes)
//! FRN 9  I240/050  video block low volume  (REP x 4 bytes)
//! FRN 10 I240/051  video block medium      (REP x 64 bytes)
//! FRN 11 I240/052  video block high        (REP x 256 bytes)
//! FRN 12 I240/140  time of day             (3 bytes, 1/128 s)
//! ```

use crate::error::ParseError;
use crate::wire;

/// ASTERIX category carried in the first record byte.
pub const CATEGORY: u8 = 240;

/// Category byte + record length field.
pub const RECORD_PREFIX: usize = 3;

/// Compression flag bit in I240/048.
const COMPRESSION_BIT: u8 = 0x80;

/// Message type tags carried in I240/000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cat240MessageType {
    VideoSummary = 1,
    VideoMessage = 2,
}

impl Cat240MessageType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Cat240MessageType::VideoSummary),
            2 => Some(Cat240MessageType::VideoMessage),
            _ => None,
        }
    }
}

impl std::fmt::Display for Cat240MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Offsets of the fields present in one record, found by the FSPEC scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FieldOffsets {
    data_source: Option<usize>,
    message_type: Option<usize>,
    record_header: Option<usize>,
    summary: Option<usize>,
    header_nano: Option<usize>,
    header_femto: Option<usize>,
    cells_resolution: Option<usize>,
    cell_counts: Option<usize>,
    block_low: Option<usize>,
    block_medium: Option<usize>,
    block_high: Option<usize>,
    time_of_day: Option<usize>,
}

/// One decoded CAT-240 record over an owned buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cat240Message {
    data: Vec<u8>,
    offsets: FieldOffsets,
}

impl Cat240Message {
    /// Decode one complete record.
    pub fn from_record(data: Vec<u8>) -> Result<Self, ParseError> {
        if data.len() < RECORD_PREFIX + 1 {
            return Err(ParseError::TooShort {
                expected: RECORD_PREFIX + 1,
                actual: data.len(),
            });
        }
        if data[0] != CATEGORY {
            return Err(ParseError::WrongCategory(data[0]));
        }
        let record_len = wire::get_u16(&data, 1)? as usize;
        if record_len != data.len() {
            return Err(ParseError::LengthMismatch {
                header_len: record_len,
                actual_len: data.len(),
            });
        }

        let offsets = Self::scan_fields(&data)?;
        if offsets.message_type.is_none() {
            return Err(ParseError::MissingField("I240/000 message type"));
        }
        Ok(Cat240Message { data, offsets })
    }

    /// Walk the FSPEC and record the offset of every present field.
    fn scan_fields(data: &[u8]) -> Result<FieldOffsets, ParseError> {
        let mut fspec = Vec::new();
        let mut cursor = RECORD_PREFIX;
        loop {
            let octet = wire::get_u8(data, cursor)?;
            cursor += 1;
            fspec.push(octet);
            if octet & 0x01 == 0 {
                break;
            }
            if fspec.len() > 2 {
                // Only two FSPEC octets are defined for category 240
                return Err(ParseError::InvalidMessage("FSPEC too long".into()));
            }
        }

        let present = |frn: usize| -> bool {
            let octet = (frn - 1) / 7;
            let bit = 7 - ((frn - 1) % 7);
            fspec
                .get(octet)
                .map(|byte| byte & (1 << bit) != 0)
                .unwrap_or(false)
        };

        let mut offsets = FieldOffsets::default();

        if present(1) {
            offsets.data_source = Some(cursor);
            cursor += 2;
        }
        if present(2) {
            offsets.message_type = Some(cursor);
            cursor += 1;
        }
        if present(3) {
            offsets.record_header = Some(cursor);
            cursor += 4;
        }
        if present(4) {
            offsets.summary = Some(cursor);
            let rep = wire::get_u8(data, cursor)? as usize;
            cursor += 1 + rep;
        }
        if present(5) {
            offsets.header_nano = Some(cursor);
            cursor += 12;
        }
        if present(6) {
            offsets.header_femto = Some(cursor);
            cursor += 12;
        }
        if present(7) {
            offsets.cells_resolution = Some(cursor);
            cursor += 2;
        }
        if present(8) {
            offsets.cell_counts = Some(cursor);
            cursor += 5;
        }
        if present(9) {
            offsets.block_low = Some(cursor);
            let rep = wire::get_u8(data, cursor)? as usize;
            cursor += 1 + rep * 4;
        }
        if present(10) {
            offsets.block_medium = Some(cursor);
            let rep = wire::get_u8(data, cursor)? as usize;
            cursor += 1 + rep * 64;
        }
        if present(11) {
            offsets.block_high = Some(cursor);
            let rep = wire::get_u8(data, cursor)? as usize;
            cursor += 1 + rep * 256;
        }
        if present(12) {
            offsets.time_of_day = Some(cursor);
            cursor += 3;
        }

        if cursor > data.len() {
            return Err(ParseError::TooShort {
                expected: cursor,
                actual: data.len(),
            });
        }
        Ok(offsets)
    }

    pub fn msg_type(&self) -> Cat240MessageType {
        let offset = self.offsets.message_type.unwrap_or(0);
        Cat240MessageType::from_u8(self.data[offset]).unwrap_or(Cat240MessageType::VideoMessage)
    }

    /// (SAC, SIC) pair from I240/010.
    pub fn data_source(&self) -> Option<(u8, u8)> {
        self.offsets
            .data_source
            .map(|offset| (self.data[offset], self.data[offset + 1]))
    }

    /// Message index from the video record header; increments with
    /// every record, used for lost-packet detection.
    pub fn sweep_counter(&self) -> u32 {
        self.offsets
            .record_header
            .and_then(|offset| wire::get_u32(&self.data, offset).ok())
            .unwrap_or(0)
    }

    /// ASCII summary string from I240/030.
    pub fn summary(&self) -> Option<String> {
        let offset = self.offsets.summary?;
        let rep = self.data[offset] as usize;
        std::str::from_utf8(&self.data[offset + 1..offset + 1 + rep])
            .ok()
            .map(str::to_owned)
    }

    fn video_header(&self) -> Option<usize> {
        self.offsets.header_nano.or(self.offsets.header_femto)
    }

    /// True when ranges are in femtosecond cell durations (I240/041).
    pub fn is_femto(&self) -> bool {
        self.offsets.header_femto.is_some()
    }

    /// Raw start azimuth, 360/2^16 degree units.
    pub fn start_azimuth_raw(&self) -> u16 {
        self.video_header()
            .and_then(|offset| wire::get_u16(&self.data, offset).ok())
            .unwrap_or(0)
    }

    /// Raw end azimuth, 360/2^16 degree units.
    pub fn end_azimuth_raw(&self) -> u16 {
        self.video_header()
            .and_then(|offset| wire::get_u16(&self.data, offset + 2).ok())
            .unwrap_or(0)
    }

    /// Start angle in degrees.
    pub fn start_angle(&self) -> f32 {
        f32::from(self.start_azimuth_raw()) * 360.0 / 65_536.0
    }

    /// Map the raw start azimuth onto a spoke index for a radar with
    /// the given number of azimuth samples per rotation.
    pub fn to_azimuth(&self, azimuth_samples: u16) -> u16 {
        let scaled =
            u32::from(self.start_azimuth_raw()) * u32::from(azimuth_samples) / 65_536;
        scaled as u16
    }

    /// Index of the first range cell.
    pub fn start_range(&self) -> u32 {
        self.video_header()
            .and_then(|offset| wire::get_u32(&self.data, offset + 4).ok())
            .unwrap_or(0)
    }

    /// Cell duration in nano- or femtoseconds depending on the header.
    pub fn cell_duration(&self) -> u32 {
        self.video_header()
            .and_then(|offset| wire::get_u32(&self.data, offset + 8).ok())
            .unwrap_or(0)
    }

    /// True when the video blocks carry run-length compressed cells.
    pub fn is_compressed(&self) -> bool {
        self.offsets
            .cells_resolution
            .map(|offset| self.data[offset] & COMPRESSION_BIT != 0)
            .unwrap_or(false)
    }

    /// Bits per cell exponent from I240/048 (2^(RES-1) bits).
    pub fn resolution(&self) -> u8 {
        self.offsets
            .cells_resolution
            .map(|offset| self.data[offset + 1])
            .unwrap_or(0)
    }

    /// Number of valid cells in this record.
    pub fn valid_cells(&self) -> u32 {
        self.offsets
            .cell_counts
            .and_then(|offset| wire::get_u24(&self.data, offset + 2).ok())
            .unwrap_or(0)
    }

    /// Number of valid octets across the video blocks.
    pub fn valid_octets(&self) -> u16 {
        self.offsets
            .cell_counts
            .and_then(|offset| wire::get_u16(&self.data, offset).ok())
            .unwrap_or(0)
    }

    /// Time of day in seconds since UTC midnight (1/128 s resolution).
    pub fn time_of_day(&self) -> Option<f64> {
        let offset = self.offsets.time_of_day?;
        wire::get_u24(&self.data, offset)
            .ok()
            .map(|raw| f64::from(raw) / 128.0)
    }

    /// Concatenated video cell bytes, truncated to the valid octet
    /// count. Compressed payloads are returned as-is; see
    /// [`decompress_cells`].
    pub fn video_to_vec(&self) -> Vec<u8> {
        let mut out = Vec::new();

        let mut append = |offset: Option<usize>, block_size: usize| {
            if let Some(offset) = offset {
                let rep = self.data[offset] as usize;
                let start = offset + 1;
                out.extend_from_slice(&self.data[start..start + rep * block_size]);
            }
        };

        append(self.offsets.block_low, 4);
        append(self.offsets.block_medium, 64);
        append(self.offsets.block_high, 256);

        let valid = self.valid_octets() as usize;
        if valid > 0 && valid < out.len() {
            out.truncate(valid);
        }
        out
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Expand run-length encoded cells: (count, value) byte pairs.
pub fn decompress_cells(compressed: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for pair in compressed.chunks_exact(2) {
        out.extend(std::iter::repeat(pair[1]).take(pair[0] as usize));
    }
    out
}

// =============================================================================
// Encoding
// =============================================================================

/// Parameters for building one video message record.
#[derive(Debug, Clone)]
pub struct VideoRecord<'a> {
    pub sac: u8,
    pub sic: u8,
    pub sweep_counter: u32,
    pub start_azimuth_raw: u16,
    pub end_azimuth_raw: u16,
    pub start_range: u32,
    pub cell_duration: u32,
    pub compressed: bool,
    /// 2^(resolution-1) bits per cell
    pub resolution: u8,
    pub time_of_day_128s: u32,
    pub cells: &'a [u8],
}

/// Encode a video message. Cells are packed into the smallest block
/// volume that fits, padded with zeroes to a block boundary. At most
/// 255 high-volume blocks (65280 cells) fit one record; anything
/// beyond that is truncated.
pub fn encode_video(record: &VideoRecord<'_>) -> Cat240Message {
    // FRN 1, 2, 3, 5, 7 in the first octet; 8, one block field and 12
    // in the second.
    let mut fspec0 = 0u8;
    fspec0 |= 1 << 7; // I240/010
    fspec0 |= 1 << 6; // I240/000
    fspec0 |= 1 << 5; // I240/020
    fspec0 |= 1 << 3; // I240/040 nano
    fspec0 |= 1 << 1; // I240/048
    fspec0 |= 1; // FX

    let cells = &record.cells[..record.cells.len().min(255 * 256)];

    let (block_size, block_frn) = match cells.len() {
        0..=1020 => (4usize, 9usize),
        1021..=16_320 => (64, 10),
        _ => (256, 11),
    };
    let rep = cells.len().div_ceil(block_size);

    let mut fspec1 = 0u8;
    fspec1 |= 1 << 7; // I240/049
    fspec1 |= 1 << (7 - (block_frn - 8)); // video block field
    fspec1 |= 1 << 3; // I240/140

    let mut body = Vec::new();
    body.push(fspec0);
    body.push(fspec1);
    wire::put_u8(&mut body, record.sac);
    wire::put_u8(&mut body, record.sic);
    wire::put_u8(&mut body, Cat240MessageType::VideoMessage as u8);
    wire::put_u32(&mut body, record.sweep_counter);
    wire::put_u16(&mut body, record.start_azimuth_raw);
    wire::put_u16(&mut body, record.end_azimuth_raw);
    wire::put_u32(&mut body, record.start_range);
    wire::put_u32(&mut body, record.cell_duration);
    wire::put_u8(
        &mut body,
        if record.compressed { COMPRESSION_BIT } else { 0 },
    );
    wire::put_u8(&mut body, record.resolution);
    wire::put_u16(&mut body, cells.len() as u16);
    wire::put_u24(&mut body, cells.len() as u32);
    wire::put_u8(&mut body, rep as u8);
    body.extend_from_slice(cells);
    body.resize(body.len() + (rep * block_size - cells.len()), 0);
    wire::put_u24(&mut body, record.time_of_day_128s);

    let mut data = Vec::with_capacity(RECORD_PREFIX + body.len());
    data.push(CATEGORY);
    wire::put_u16(&mut data, (RECORD_PREFIX + body.len()) as u16);
    data.extend_from_slice(&body);

    Cat240Message::from_record(data).expect("freshly encoded record is valid")
}

// =============================================================================
// Framer
// =============================================================================

/// Recovers CAT-240 records from a byte stream or datagram.
///
/// The record length lives in bytes 1-2, so the framer commits to a
/// record after buffering three bytes.
#[derive(Debug, Default)]
pub struct Cat240Framer {
    buf: Vec<u8>,
}

impl Cat240Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes; returns every record completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Cat240Message> {
        self.buf.extend_from_slice(bytes);
        let mut messages = Vec::new();

        loop {
            if self.buf.len() < RECORD_PREFIX {
                break;
            }
            if self.buf[0] != CATEGORY {
                self.buf.remove(0);
                continue;
            }
            let record_len = match wire::get_u16(&self.buf, 1) {
                Ok(len) => len as usize,
                Err(_) => break,
            };
            if record_len < RECORD_PREFIX + 1 {
                self.buf.remove(0);
                continue;
            }
            if self.buf.len() < record_len {
                break;
            }
            let record: Vec<u8> = self.buf.drain(..record_len).collect();
            match Cat240Message::from_record(record) {
                Ok(msg) => messages.push(msg),
                Err(err) => log::debug!("cat240: dropped record: {}", err),
            }
        }

        messages
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> Cat240Message {
        encode_video(&VideoRecord {
            sac: 0,
            sic: 7,
            sweep_counter: 1234,
            start_azimuth_raw: 16_384, // 90 degrees
            end_azimuth_raw: 16_548,
            start_range: 0,
            cell_duration: 584,
            compressed: false,
            resolution: 4,
            time_of_day_128s: 128 * 3600, // 01:00:00 UTC
            cells: &[1, 2, 3, 4, 5, 6, 7, 8, 9],
        })
    }

    #[test]
    fn test_video_roundtrip() {
        let msg = sample_record();
        assert_eq!(msg.msg_type(), Cat240MessageType::VideoMessage);
        assert_eq!(msg.data_source(), Some((0, 7)));
        assert_eq!(msg.sweep_counter(), 1234);
        assert_eq!(msg.start_azimuth_raw(), 16_384);
        assert!((msg.start_angle() - 90.0).abs() < 1e-4);
        assert_eq!(msg.cell_duration(), 584);
        assert!(!msg.is_compressed());
        assert_eq!(msg.resolution(), 4);
        assert_eq!(msg.valid_octets(), 9);
        assert_eq!(msg.valid_cells(), 9);
        assert_eq!(msg.video_to_vec(), vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(msg.time_of_day(), Some(3600.0));
    }

    #[test]
    fn test_reencode_is_identity() {
        let msg = sample_record();
        let decoded = Cat240Message::from_record(msg.as_bytes().to_vec()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_to_azimuth() {
        let msg = sample_record();
        // 90 degrees of a 400-spoke rotation
        assert_eq!(msg.to_azimuth(400), 100);
        assert_eq!(msg.to_azimuth(5600), 1400);
    }

    #[test]
    fn test_wrong_category_rejected() {
        let mut bytes = sample_record().as_bytes().to_vec();
        bytes[0] = 48;
        assert_eq!(
            Cat240Message::from_record(bytes),
            Err(ParseError::WrongCategory(48))
        );
    }

    #[test]
    fn test_truncated_record_rejected() {
        let mut bytes = sample_record().as_bytes().to_vec();
        bytes.truncate(bytes.len() - 2);
        assert!(Cat240Message::from_record(bytes).is_err());
    }

    #[test]
    fn test_medium_volume_blocks() {
        let cells: Vec<u8> = (0..2000u32).map(|cell| cell as u8).collect();
        let msg = encode_video(&VideoRecord {
            sac: 0,
            sic: 0,
            sweep_counter: 1,
            start_azimuth_raw: 0,
            end_azimuth_raw: 163,
            start_range: 0,
            cell_duration: 584,
            compressed: false,
            resolution: 8,
            time_of_day_128s: 0,
            cells: &cells,
        });
        assert_eq!(msg.valid_octets() as usize, 2000);
        assert_eq!(msg.video_to_vec(), cells);
    }

    #[test]
    fn test_framer_stream() {
        let mut framer = Cat240Framer::new();
        let a = sample_record();

        let mut bytes = vec![0x00, 0x13]; // garbage before the record
        bytes.extend_from_slice(a.as_bytes());
        bytes.extend_from_slice(a.as_bytes());

        let split = bytes.len() / 2;
        let mut out = framer.push(&bytes[..split]);
        out.extend(framer.push(&bytes[split..]));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], a);
    }

    #[test]
    fn test_decompress_cells() {
        assert_eq!(decompress_cells(&[3, 7, 2, 0]), vec![7, 7, 7, 0, 0]);
        assert_eq!(decompress_cells(&[]), Vec::<u8>::new());
    }
}
