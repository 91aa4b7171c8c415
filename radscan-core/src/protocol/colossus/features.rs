//! Radar feature bitmap.
//!
//! A 32-bit word in the configuration message describing what the radar
//! unit can do. Field order and widths are wire-exact, low bit first:
//!
//! ```text
//! bit  0     auto_tune
//! bit  1     secondary_processing_module
//! bit  2     non_contour_data
//! bit  3     contour_map_defined
//! bit  4     sector_blanking
//! bits 5-6   fft_protocol
//! bit  7     low_precision_output
//! bit  8     high_precision_output
//! bits 9-10  point_data_output
//! bits 11-12 modbus_mode
//! bit  13    motor_enabled
//! bit  14    safeguard_enabled
//! bits 15-31 reserved
//! ```

use serde::{Deserialize, Serialize};

/// Which protocol the radar streams FFT data over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FftProtocol {
    #[default]
    Undefined,
    Colossus,
    Cat240,
    Reserved,
}

impl FftProtocol {
    fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0 => FftProtocol::Undefined,
            1 => FftProtocol::Colossus,
            2 => FftProtocol::Cat240,
            _ => FftProtocol::Reserved,
        }
    }

    fn to_bits(self) -> u32 {
        match self {
            FftProtocol::Undefined => 0,
            FftProtocol::Colossus => 1,
            FftProtocol::Cat240 => 2,
            FftProtocol::Reserved => 3,
        }
    }
}

/// Point data output mode advertised by the radar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PointDataOutput {
    #[default]
    None,
    CaCfar,
    NavMode,
    Reserved,
}

impl PointDataOutput {
    fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0 => PointDataOutput::None,
            1 => PointDataOutput::CaCfar,
            2 => PointDataOutput::NavMode,
            _ => PointDataOutput::Reserved,
        }
    }

    fn to_bits(self) -> u32 {
        match self {
            PointDataOutput::None => 0,
            PointDataOutput::CaCfar => 1,
            PointDataOutput::NavMode => 2,
            PointDataOutput::Reserved => 3,
        }
    }
}

/// Modbus role of the radar, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModbusMode {
    #[default]
    Disabled,
    Master,
    Slave,
    Relay,
}

impl ModbusMode {
    fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0 => ModbusMode::Disabled,
            1 => ModbusMode::Master,
            2 => ModbusMode::Slave,
            _ => ModbusMode::Relay,
        }
    }

    fn to_bits(self) -> u32 {
        match self {
            ModbusMode::Disabled => 0,
            ModbusMode::Master => 1,
            ModbusMode::Slave => 2,
            ModbusMode::Relay => 3,
        }
    }
}

/// Decoded radar feature bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RadarFeatures {
    pub auto_tune: bool,
    pub secondary_processing_module: bool,
    pub non_contour_data: bool,
    pub contour_map_defined: bool,
    pub sector_blanking: bool,
    pub fft_protocol: FftProtocol,
    pub low_precision_output: bool,
    pub high_precision_output: bool,
    pub point_data_output: PointDataOutput,
    pub modbus_mode: ModbusMode,
    pub motor_enabled: bool,
    pub safeguard_enabled: bool,
}

impl RadarFeatures {
    pub fn from_bits(word: u32) -> Self {
        RadarFeatures {
            auto_tune: word & (1 << 0) != 0,
            secondary_processing_module: word & (1 << 1) != 0,
            non_contour_data: word & (1 << 2) != 0,
            contour_map_defined: word & (1 << 3) != 0,
            sector_blanking: word & (1 << 4) != 0,
            fft_protocol: FftProtocol::from_bits(word >> 5),
            low_precision_output: word & (1 << 7) != 0,
            high_precision_output: word & (1 << 8) != 0,
            point_data_output: PointDataOutput::from_bits(word >> 9),
            modbus_mode: ModbusMode::from_bits(word >> 11),
            motor_enabled: word & (1 << 13) != 0,
            safeguard_enabled: word & (1 << 14) != 0,
        }
    }

    pub fn to_bits(self) -> u32 {
        let mut word = 0u32;
        word |= u32::from(self.auto_tune);
        word |= u32::from(self.secondary_processing_module) << 1;
        word |= u32::from(self.non_contour_data) << 2;
        word |= u32::from(self.contour_map_defined) << 3;
        word |= u32::from(self.sector_blanking) << 4;
        word |= self.fft_protocol.to_bits() << 5;
        word |= u32::from(self.low_precision_output) << 7;
        word |= u32::from(self.high_precision_output) << 8;
        word |= self.point_data_output.to_bits() << 9;
        word |= self.modbus_mode.to_bits() << 11;
        word |= u32::from(self.motor_enabled) << 13;
        word |= u32::from(self.safeguard_enabled) << 14;
        word
    }
}
