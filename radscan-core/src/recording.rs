//! Offline recording file format.
//!
//! A recording starts with a fixed metadata header, then an append-only
//! sequence of records. Each record is the monotonic capture offset in
//! microseconds, a transport tag, and one complete Colossus message
//! exactly as received:
//!
//! ```text
//! header:  magic (8) | start wall us (8) | end wall us (8)
//!          | start mono us (8) | end mono us (8) | radar IPv4 (4)
//! record:  mono offset us (8) | transport (1) | message bytes
//! ```
//!
//! All integers are network byte order. Truncated trailers are
//! tolerated: a partial final record is discarded on read.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::net::Ipv4Addr;

use crate::protocol::colossus::{tcp, udp};
use crate::wire;

/// Magic bytes opening every recording.
pub const MAGIC: [u8; 8] = *b"RADSCAN1";

/// Metadata header size.
pub const HEADER_SIZE: usize = 44;

/// Per-record prefix: timestamp + transport tag.
pub const RECORD_PREFIX: usize = 9;

/// Transport a recorded message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Transport {
    Tcp = 1,
    Udp = 2,
}

impl Transport {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Transport::Tcp),
            2 => Some(Transport::Udp),
            _ => None,
        }
    }
}

/// Recording metadata, prefixed to every capture file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingMetadata {
    /// Wall-clock start, microseconds since the Unix epoch
    pub start_wall_us: u64,
    /// Wall-clock end, microseconds since the Unix epoch
    pub end_wall_us: u64,
    /// Monotonic start ticks, microseconds
    pub start_mono_us: u64,
    /// Monotonic end ticks, microseconds
    pub end_mono_us: u64,
    /// Address of the radar the capture came from
    pub radar_ip: Ipv4Addr,
}

impl RecordingMetadata {
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.extend_from_slice(&MAGIC);
        wire::put_u64(&mut buf, self.start_wall_us);
        wire::put_u64(&mut buf, self.end_wall_us);
        wire::put_u64(&mut buf, self.start_mono_us);
        wire::put_u64(&mut buf, self.end_mono_us);
        buf.extend_from_slice(&self.radar_ip.octets());
        writer.write_all(&buf)
    }

    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut buf)?;

        if buf[..8] != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "not a radscan recording: bad magic bytes",
            ));
        }

        let word = |offset: usize| wire::get_u64(&buf, offset).unwrap_or(0);
        Ok(RecordingMetadata {
            start_wall_us: word(8),
            end_wall_us: word(16),
            start_mono_us: word(24),
            end_mono_us: word(32),
            radar_ip: Ipv4Addr::new(buf[40], buf[41], buf[42], buf[43]),
        })
    }

    /// Recorded duration from the monotonic tick pair.
    pub fn duration_us(&self) -> u64 {
        self.end_mono_us.saturating_sub(self.start_mono_us)
    }
}

/// One captured message with its arrival offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Monotonic microseconds since recording start
    pub timestamp_us: u64,
    pub transport: Transport,
    /// Complete message bytes, header included
    pub data: Vec<u8>,
}

// =============================================================================
// Writer
// =============================================================================

/// Appends records to a recording. `finish` rewrites the header with
/// the end timestamps once the capture is complete.
pub struct RecordingWriter<W: Write + Seek> {
    writer: W,
    metadata: RecordingMetadata,
}

impl<W: Write + Seek> RecordingWriter<W> {
    pub fn new(mut writer: W, metadata: RecordingMetadata) -> io::Result<Self> {
        metadata.write(&mut writer)?;
        Ok(RecordingWriter { writer, metadata })
    }

    pub fn write_record(&mut self, record: &Record) -> io::Result<()> {
        let mut prefix = Vec::with_capacity(RECORD_PREFIX);
        wire::put_u64(&mut prefix, record.timestamp_us);
        wire::put_u8(&mut prefix, record.transport as u8);
        self.writer.write_all(&prefix)?;
        self.writer.write_all(&record.data)
    }

    /// Stamp the end times into the header and flush.
    pub fn finish(mut self, end_wall_us: u64, end_mono_us: u64) -> io::Result<W> {
        self.metadata.end_wall_us = end_wall_us;
        self.metadata.end_mono_us = end_mono_us;
        self.writer.seek(SeekFrom::Start(0))?;
        self.metadata.write(&mut self.writer)?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Streams records out of a recording.
pub struct RecordingReader<R: Read> {
    reader: R,
    metadata: RecordingMetadata,
}

impl<R: Read> RecordingReader<R> {
    pub fn open(mut reader: R) -> io::Result<Self> {
        let metadata = RecordingMetadata::read(&mut reader)?;
        Ok(RecordingReader { reader, metadata })
    }

    pub fn metadata(&self) -> &RecordingMetadata {
        &self.metadata
    }

    /// Read the next record. Returns `Ok(None)` at end of file; a
    /// partial trailing record is treated as end of file too.
    pub fn next_record(&mut self) -> io::Result<Option<Record>> {
        let mut prefix = [0u8; RECORD_PREFIX];
        match read_exact_or_eof(&mut self.reader, &mut prefix)? {
            ReadOutcome::Eof => return Ok(None),
            ReadOutcome::Complete => {}
        }

        let timestamp_us = wire::get_u64(&prefix, 0).unwrap_or(0);
        let transport = match Transport::from_u8(prefix[8]) {
            Some(transport) => transport,
            None => {
                log::debug!("recording: unknown transport tag {}, stopping", prefix[8]);
                return Ok(None);
            }
        };

        let data = match transport {
            Transport::Tcp => {
                let mut header = vec![0u8; tcp::HEADER_SIZE];
                if read_exact_or_eof(&mut self.reader, &mut header)? == ReadOutcome::Eof {
                    return Ok(None);
                }
                let payload_len = match wire::get_u32(&header, 18) {
                    Ok(len) if (len as usize) <= tcp::MAX_PAYLOAD => len as usize,
                    _ => {
                        log::debug!("recording: corrupt TCP record header, stopping");
                        return Ok(None);
                    }
                };
                let mut payload = vec![0u8; payload_len];
                if read_exact_or_eof(&mut self.reader, &mut payload)? == ReadOutcome::Eof {
                    return Ok(None);
                }
                header.extend_from_slice(&payload);
                header
            }
            Transport::Udp => {
                let mut header = vec![0u8; udp::HEADER_SIZE];
                if read_exact_or_eof(&mut self.reader, &mut header)? == ReadOutcome::Eof {
                    return Ok(None);
                }
                let payload_len = wire::get_u16(&header, 2).unwrap_or(0) as usize;
                let mut payload = vec![0u8; payload_len];
                if read_exact_or_eof(&mut self.reader, &mut payload)? == ReadOutcome::Eof {
                    return Ok(None);
                }
                header.extend_from_slice(&payload);
                header
            }
        };

        Ok(Some(Record {
            timestamp_us,
            transport,
            data,
        }))
    }
}

#[derive(PartialEq, Eq)]
enum ReadOutcome {
    Complete,
    Eof,
}

/// `read_exact` that maps a clean or mid-buffer EOF to `Eof` instead of
/// an error, so truncated trailers discard the partial record.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<ReadOutcome> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(ReadOutcome::Complete),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(ReadOutcome::Eof),
        Err(err) => Err(err),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::colossus::tcp::{TcpMessage, TcpMessageType};
    use crate::protocol::colossus::udp::{encode_imu, ImuValues};
    use std::io::Cursor;

    fn sample_metadata() -> RecordingMetadata {
        RecordingMetadata {
            start_wall_us: 1_700_000_000_000_000,
            end_wall_us: 0,
            start_mono_us: 5_000_000,
            end_mono_us: 0,
            radar_ip: Ipv4Addr::new(192, 168, 0, 1),
        }
    }

    #[test]
    fn test_metadata_roundtrip() {
        let metadata = RecordingMetadata {
            end_wall_us: 1_700_000_060_000_000,
            end_mono_us: 65_000_000,
            ..sample_metadata()
        };

        let mut buf = Vec::new();
        metadata.write(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);

        let read_back = RecordingMetadata::read(&mut Cursor::new(buf)).unwrap();
        assert_eq!(read_back, metadata);
        assert_eq!(read_back.duration_us(), 60_000_000);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut buf = Vec::new();
        sample_metadata().write(&mut buf).unwrap();
        buf[0] = b'X';
        assert!(RecordingMetadata::read(&mut Cursor::new(buf)).is_err());
    }

    #[test]
    fn test_write_read_roundtrip() {
        let tcp_msg = TcpMessage::new(TcpMessageType::Health, &[1, 2, 3]);
        let udp_msg = encode_imu(&ImuValues::default());

        let cursor = Cursor::new(Vec::new());
        let mut writer = RecordingWriter::new(cursor, sample_metadata()).unwrap();
        writer
            .write_record(&Record {
                timestamp_us: 1_000_000,
                transport: Transport::Tcp,
                data: tcp_msg.as_bytes().to_vec(),
            })
            .unwrap();
        writer
            .write_record(&Record {
                timestamp_us: 1_250_000,
                transport: Transport::Udp,
                data: udp_msg.as_bytes().to_vec(),
            })
            .unwrap();
        let cursor = writer.finish(42, 43).unwrap();

        let mut reader = RecordingReader::open(Cursor::new(cursor.into_inner())).unwrap();
        assert_eq!(reader.metadata().end_wall_us, 42);
        assert_eq!(reader.metadata().end_mono_us, 43);

        let first = reader.next_record().unwrap().unwrap();
        assert_eq!(first.timestamp_us, 1_000_000);
        assert_eq!(first.transport, Transport::Tcp);
        assert_eq!(first.data, tcp_msg.as_bytes());

        let second = reader.next_record().unwrap().unwrap();
        assert_eq!(second.timestamp_us, 1_250_000);
        assert_eq!(second.data, udp_msg.as_bytes());

        assert_eq!(reader.next_record().unwrap(), None);
    }

    #[test]
    fn test_truncated_trailer_discarded() {
        let tcp_msg = TcpMessage::new(TcpMessageType::Health, &[1, 2, 3, 4, 5, 6]);

        let cursor = Cursor::new(Vec::new());
        let mut writer = RecordingWriter::new(cursor, sample_metadata()).unwrap();
        for timestamp in [100u64, 200] {
            writer
                .write_record(&Record {
                    timestamp_us: timestamp,
                    transport: Transport::Tcp,
                    data: tcp_msg.as_bytes().to_vec(),
                })
                .unwrap();
        }
        let mut bytes = writer.finish(0, 0).unwrap().into_inner();

        // Chop into the middle of the second record
        bytes.truncate(bytes.len() - 10);

        let mut reader = RecordingReader::open(Cursor::new(bytes)).unwrap();
        assert!(reader.next_record().unwrap().is_some());
        assert_eq!(reader.next_record().unwrap(), None);
    }
}
