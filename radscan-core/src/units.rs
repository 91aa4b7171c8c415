//! Units used throughout the radar pipeline.
//!
//! Bins index the range axis of one spoke; azimuths index the angular
//! position within one rotation. FFT samples arrive as fixed-point
//! quanta; the two wire widths use different scale factors.

/// Index along the range axis of one spoke
pub type Bin = u16;

/// Angular spoke index in `[0, azimuth_samples)`
pub type Azimuth = u16;

/// Signal power in decibels
pub type Db = f32;

/// Range in metres
pub type Metre = f32;

/// Default bin-to-metre conversion when no radar configuration is available.
pub const DEFAULT_BIN_SIZE_METRES: f32 = 0.175_238;

/// Decibels represented by one count of 8-bit FFT data.
pub const FFT_8BIT_QUANTUM: f32 = 0.5;

// 16-bit FFT data is quantized differently to 8-bit. The dynamic range
// is the same (96.5dB) but that value gives a full-scale output of
// 141.5, so the fixed-point value has to be re-scaled to give the
// correct actual dB value.
pub const FFT_16BIT_FULL_SCALE: f32 = 141.5;
pub const FFT_16BIT_MAX_DB: f32 = 96.5;

/// Decibels represented by one count of 16-bit FFT data (~0.682 dB).
pub const FFT_16BIT_QUANTUM: f32 = FFT_16BIT_MAX_DB / FFT_16BIT_FULL_SCALE;

/// One 8-bit FFT sample, 0.5 dB per count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fft8(pub u8);

impl Fft8 {
    pub fn to_db(self) -> Db {
        f32::from(self.0) * FFT_8BIT_QUANTUM
    }

    pub fn from_db(db: Db) -> Self {
        Fft8((db / FFT_8BIT_QUANTUM) as u8)
    }

    pub fn raw(self) -> u8 {
        self.0
    }
}

/// One 16-bit FFT sample, 96.5/141.5 dB per count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fft16(pub u16);

impl Fft16 {
    pub fn to_db(self) -> Db {
        f32::from(self.0) * FFT_16BIT_QUANTUM
    }

    pub fn from_db(db: Db) -> Self {
        Fft16((db / FFT_16BIT_QUANTUM) as u16)
    }

    pub fn raw(self) -> u16 {
        self.0
    }
}

/// Convert a whole spoke of 8-bit samples to dB.
pub fn spoke_to_db(raw: &[u8]) -> Vec<Db> {
    raw.iter().map(|&b| Fft8(b).to_db()).collect()
}

/// Convert a whole spoke of 16-bit samples to dB.
pub fn spoke16_to_db(raw: &[u16]) -> Vec<Db> {
    raw.iter().map(|&w| Fft16(w).to_db()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_8bit_quantum() {
        assert_eq!(Fft8(90).to_db(), 45.0);
        assert_eq!(Fft8::from_db(45.0).raw(), 90);
        assert_eq!(Fft8(0).to_db(), 0.0);
        assert_eq!(Fft8(255).to_db(), 127.5);
    }

    #[test]
    fn test_16bit_quantum() {
        // Full scale reads back as (almost) the full dynamic range
        let full = Fft16(FFT_16BIT_FULL_SCALE as u16);
        assert!((full.to_db() - 141.0 * FFT_16BIT_QUANTUM).abs() < 1e-4);
        assert!(full.to_db() < FFT_16BIT_MAX_DB);

        let db = Fft16(1000).to_db();
        assert!((db - 1000.0 * FFT_16BIT_QUANTUM).abs() < 1e-4);
    }

    #[test]
    fn test_spoke_conversion() {
        let spoke = spoke_to_db(&[0, 10, 90]);
        assert_eq!(spoke, vec![0.0, 5.0, 45.0]);
    }
}
