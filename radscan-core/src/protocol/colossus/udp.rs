//! Colossus UDP messages.
//!
//! Every datagram carries exactly one message; there is no framing
//! state to keep between datagrams. Header layout:
//!
//! ```text
//! +---------+------+----------------+------------------+
//! | version | type | payload length | payload ...      |
//! |   (1)   | (1)  |   (2, BE)      | (length bytes)   |
//! +---------+------+----------------+------------------+
//! ```

use super::PROTOCOL_VERSION;
use crate::error::ParseError;
use crate::wire;

/// Fixed header size: version + type + payload length.
pub const HEADER_SIZE: usize = 4;

/// Largest payload a single datagram can carry.
pub const MAX_PAYLOAD: usize = 65_507 - HEADER_SIZE;

// =============================================================================
// Message types
// =============================================================================

/// Colossus UDP message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UdpMessageType {
    PointCloud = 1,
    PointcloudSpoke = 2,
    Imu = 3,
}

impl UdpMessageType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => UdpMessageType::PointCloud,
            2 => UdpMessageType::PointcloudSpoke,
            3 => UdpMessageType::Imu,
            _ => return None,
        })
    }
}

impl std::fmt::Display for UdpMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, *self as u8)
    }
}

// =============================================================================
// Message
// =============================================================================

/// One Colossus UDP message, header included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpMessage {
    data: Vec<u8>,
}

impl UdpMessage {
    pub fn new(msg_type: UdpMessageType, payload: &[u8]) -> Self {
        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len());
        wire::put_u8(&mut data, PROTOCOL_VERSION);
        wire::put_u8(&mut data, msg_type as u8);
        wire::put_u16(&mut data, payload.len() as u16);
        data.extend_from_slice(payload);
        UdpMessage { data }
    }

    /// Decode one datagram. The payload length field must account for
    /// the rest of the datagram exactly.
    pub fn from_datagram(data: Vec<u8>) -> Result<Self, ParseError> {
        if data.len() < HEADER_SIZE {
            return Err(ParseError::TooShort {
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }
        let tag = data[1];
        if UdpMessageType::from_u8(tag).is_none() {
            return Err(ParseError::UnknownMessageType(tag));
        }
        let payload_len = wire::get_u16(&data, 2)? as usize;
        if payload_len != data.len() - HEADER_SIZE {
            return Err(ParseError::LengthMismatch {
                header_len: payload_len,
                actual_len: data.len() - HEADER_SIZE,
            });
        }
        Ok(UdpMessage { data })
    }

    pub fn msg_type(&self) -> UdpMessageType {
        UdpMessageType::from_u8(self.data[1]).unwrap_or(UdpMessageType::PointCloud)
    }

    pub fn version(&self) -> u8 {
        self.data[0]
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[HEADER_SIZE..]
    }

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

/// Raw inertial measurement values, one reading per message.
///
/// Units: acceleration in 0.0001 G, rotational velocity in 0.1 degrees
/// per second, angles in 0.1 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImuValues {
    pub x_acc: i16,
    pub y_acc: i16,
    pub z_acc: i16,
    pub roll_vel: i16,
    pub pitch_vel: i16,
    pub yaw_vel: i16,
    pub phi_angl: i16,
    pub theta_angl: i16,
    pub psi_angl: i16,
}

impl ImuValues {
    /// Acceleration in G (x, y, z).
    pub fn acceleration_g(&self) -> (f32, f32, f32) {
        (
            f32::from(self.x_acc) / 10_000.0,
            f32::from(self.y_acc) / 10_000.0,
            f32::from(self.z_acc) / 10_000.0,
        )
    }

    /// Rotational velocity in degrees per second (roll, pitch, yaw).
    pub fn rotation_dps(&self) -> (f32, f32, f32) {
        (
            f32::from(self.roll_vel) / 10.0,
            f32::from(self.pitch_vel) / 10.0,
            f32::from(self.yaw_vel) / 10.0,
        )
    }

    /// Euler angles in degrees (phi, theta, psi).
    pub fn angles_deg(&self) -> (f32, f32, f32) {
        (
            f32::from(self.phi_angl) / 10.0,
            f32::from(self.theta_angl) / 10.0,
            f32::from(self.psi_angl) / 10.0,
        )
    }
}

/// IMU payload: nine signed 16-bit fields.
pub struct ImuView<'a> {
    payload: &'a [u8],
}

impl<'a> ImuView<'a> {
    pub const SIZE: usize = 18;

    pub fn new(msg: &'a UdpMessage) -> Result<Self, ParseError> {
        let payload = msg.payload();
        if payload.len() < Self::SIZE {
            return Err(ParseError::TooShort {
                expected: Self::SIZE,
                actual: payload.len(),
            });
        }
        Ok(ImuView { payload })
    }

    pub fn values(&self) -> ImuValues {
        let field = |index: usize| wire::get_i16(self.payload, index * 2).unwrap_or(0);
        ImuValues {
            x_acc: field(0),
            y_acc: field(1),
            z_acc: field(2),
            roll_vel: field(3),
            pitch_vel: field(4),
            yaw_vel: field(5),
            phi_angl: field(6),
            theta_angl: field(7),
            psi_angl: field(8),
        }
    }
}

/// Build an IMU message.
pub fn encode_imu(values: &ImuValues) -> UdpMessage {
    let mut payload = Vec::with_capacity(ImuView::SIZE);
    for field in [
        values.x_acc,
        values.y_acc,
        values.z_acc,
        values.roll_vel,
        values.pitch_vel,
        values.yaw_vel,
        values.phi_angl,
        values.theta_angl,
        values.psi_angl,
    ] {
        wire::put_i16(&mut payload, field);
    }
    UdpMessage::new(UdpMessageType::Imu, &payload)
}

/// One point of a point cloud spoke.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpokePoint {
    pub range: f32,
    pub power: f32,
}

/// Point cloud spoke payload:
///
/// ```text
/// offset 0   azimuth        u16
/// offset 2   ntp_seconds    u32
/// offset 6   ntp_split_seconds u32
/// offset 10  bearing        f32 (IEEE-754 bits, BE)
/// offset 14  points, 6 bytes each:
///            range  u32 (metres * 1e6)
///            power  u16 (dB * 10)
/// ```
pub struct PointcloudSpokeView<'a> {
    payload: &'a [u8],
}

impl<'a> PointcloudSpokeView<'a> {
    pub const FIXED_SIZE: usize = 14;
    const POINT_SIZE: usize = 6;

    pub fn new(msg: &'a UdpMessage) -> Result<Self, ParseError> {
        let payload = msg.payload();
        if payload.len() < Self::FIXED_SIZE {
            return Err(ParseError::TooShort {
                expected: Self::FIXED_SIZE,
                actual: payload.len(),
            });
        }
        if (payload.len() - Self::FIXED_SIZE) % Self::POINT_SIZE != 0 {
            return Err(ParseError::InvalidMessage("spoke points truncated".into()));
        }
        Ok(PointcloudSpokeView { payload })
    }

    pub fn azimuth(&self) -> u16 {
        wire::get_u16(self.payload, 0).unwrap_or(0)
    }

    pub fn ntp_seconds(&self) -> u32 {
        wire::get_u32(self.payload, 2).unwrap_or(0)
    }

    pub fn ntp_split_seconds(&self) -> u32 {
        wire::get_u32(self.payload, 6).unwrap_or(0)
    }

    pub fn bearing(&self) -> f32 {
        wire::get_f32(self.payload, 10).unwrap_or(0.0)
    }

    pub fn points(&self) -> Vec<SpokePoint> {
        self.payload[Self::FIXED_SIZE..]
            .chunks_exact(Self::POINT_SIZE)
            .map(|chunk| SpokePoint {
                range: wire::get_u32(chunk, 0).unwrap_or(0) as f32 / 1_000_000.0,
                power: f32::from(wire::get_u16(chunk, 4).unwrap_or(0)) / 10.0,
            })
            .collect()
    }
}

/// Build a point cloud spoke message.
pub fn encode_pointcloud_spoke(
    azimuth: u16,
    seconds: u32,
    split: u32,
    bearing: f32,
    points: &[SpokePoint],
) -> UdpMessage {
    let mut payload =
        Vec::with_capacity(PointcloudSpokeView::FIXED_SIZE + points.len() * 6);
    wire::put_u16(&mut payload, azimuth);
    wire::put_u32(&mut payload, seconds);
    wire::put_u32(&mut payload, split);
    wire::put_f32(&mut payload, bearing);
    for point in points {
        wire::put_u32(&mut payload, (point.range * 1_000_000.0) as u32);
        wire::put_u16(&mut payload, (point.power * 10.0) as u16);
    }
    UdpMessage::new(UdpMessageType::PointcloudSpoke, &payload)
}

// =============================================================================
// Tests
// =============================================================================
