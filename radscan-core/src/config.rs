//! Radar configuration snapshot.
//!
//! Every Colossus connection starts with a configuration message; the
//! values in it drive bin-to-metre and azimuth-to-bearing conversion for
//! the rest of the session. The snapshot is cached from the first
//! configuration seen on a connection.

use serde::{Deserialize, Serialize};

use crate::protocol::colossus::features::RadarFeatures;
use crate::units::{Azimuth, Metre};

/// Cached radar configuration, decoded from the first Configuration
/// message on a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadarConfig {
    /// Angular spokes per rotation (e.g. 400)
    pub azimuth_samples: u16,
    /// Encoder counts per rotation, typically 14x azimuth_samples
    pub encoder_size: u16,
    /// Range bin size in tenths of a millimetre
    pub bin_size: u16,
    /// Number of range bins per spoke
    pub range_in_bins: u16,
    /// Rotation rate in millihertz
    pub rotation_speed: u16,
    /// Expected FFT packet rate, packets per second
    pub packet_rate: u16,
    /// Multiplicative range correction
    pub range_gain: f32,
    /// Additive range correction in metres
    pub range_offset: f32,
    /// Radar capability bitmap
    pub features: RadarFeatures,
}

impl Default for RadarConfig {
    fn default() -> Self {
        RadarConfig {
            azimuth_samples: 400,
            encoder_size: 5600,
            bin_size: 1752,
            range_in_bins: 2856,
            rotation_speed: 4000,
            packet_rate: 0,
            range_gain: 1.0,
            range_offset: 0.0,
            features: RadarFeatures::default(),
        }
    }
}

impl RadarConfig {
    /// Size of one range bin in metres.
    pub fn range_resolution(&self) -> Metre {
        f32::from(self.bin_size) / 10_000.0
    }

    /// Encoder counts per azimuth sample. Float division; integer
    /// truncation here shifts every reported bearing.
    pub fn steps_per_azimuth(&self) -> f32 {
        f32::from(self.encoder_size) / f32::from(self.azimuth_samples)
    }

    /// Bearing of an azimuth index, degrees in `[0, 360)`.
    pub fn bearing_degrees(&self, azimuth: f32) -> f32 {
        (azimuth * 360.0 / f32::from(self.azimuth_samples) + 360.0) % 360.0
    }

    /// Range of a (possibly fractional) bin index, in metres.
    pub fn bin_to_metres(&self, bin: f32) -> Metre {
        (bin * self.range_gain * self.range_resolution()) + self.range_offset
    }
}

/// Detects rotation boundaries from a stream of azimuth indices.
///
/// A stream that starts at azimuth 0 reports its first wrap as a
/// completed rotation. A stream that starts mid-rotation has only seen a
/// partial rotation when it first wraps, so that wrap merely arms the
/// tracker and every wrap after it reports.
#[derive(Debug, Default)]
pub struct RotationTracker {
    prev: Option<Azimuth>,
    armed: bool,
}

impl RotationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next azimuth; returns true when a full rotation completed.
    pub fn update(&mut self, azimuth: Azimuth) -> bool {
        let completed = match self.prev {
            None => {
                self.armed = azimuth == 0;
                false
            }
            Some(prev) if azimuth < prev => {
                let completed = self.armed;
                self.armed = true;
                completed
            }
            Some(_) => false,
        };
        self.prev = Some(azimuth);
        completed
    }
}

/// Detects lost packets from the sweep counter on FFT messages.
///
/// The counter increments by one on every spoke and wraps at 2^16; any
/// other step means packets were dropped upstream of us.
#[derive(Debug, Default)]
pub struct SweepCounter {
    prev: Option<u16>,
}

/// A gap in the sweep counter sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LostPackets {
    pub previous: u16,
    pub current: u16,
}

impl SweepCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next sweep counter; returns the gap if packets were lost.
    pub fn update(&mut self, counter: u16) -> Option<LostPackets> {
        let lost = match self.prev {
            Some(prev) if counter != prev.wrapping_add(1) => Some(LostPackets {
                previous: prev,
                current: counter,
            }),
            _ => None,
        };
        self.prev = Some(counter);
        lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_resolution() {
        let config = RadarConfig::default();
        assert!((config.range_resolution() - 0.1752).abs() < 1e-6);
    }

    #[test]
    fn test_steps_per_azimuth_is_float() {
        let config = RadarConfig {
            encoder_size: 5601,
            azimuth_samples: 400,
            ..Default::default()
        };
        assert!((config.steps_per_azimuth() - 14.0025).abs() < 1e-4);
    }

    #[test]
    fn test_bearing_wraps() {
        let config = RadarConfig::default();
        assert_eq!(config.bearing_degrees(0.0), 0.0);
        assert_eq!(config.bearing_degrees(100.0), 90.0);
        assert_eq!(config.bearing_degrees(400.0), 0.0);
        assert_eq!(config.bearing_degrees(500.0), 90.0);
    }

    #[test]
    fn test_bin_to_metres() {
        let config = RadarConfig {
            range_gain: 2.0,
            range_offset: 1.0,
            ..Default::default()
        };
        let expected = 10.0 * 2.0 * 0.1752 + 1.0;
        assert!((config.bin_to_metres(10.0) - expected).abs() < 1e-5);
    }

    #[test]
    fn test_rotation_tracker_partial_first_rotation_discarded() {
        let mut tracker = RotationTracker::new();
        for azimuth in [100u16, 200, 399] {
            assert!(!tracker.update(azimuth));
        }
        // First wrap back to zero: only a partial rotation was seen
        assert!(!tracker.update(0));
        for azimuth in [100u16, 399] {
            assert!(!tracker.update(azimuth));
        }
        // Second wrap: exactly one completed rotation
        assert!(tracker.update(0));
        assert!(!tracker.update(1));
    }

    #[test]
    fn test_full_rotation_from_zero_signals_once() {
        let mut tracker = RotationTracker::new();
        let mut signals = 0;
        for azimuth in (0..5600u16).chain(0..1) {
            if tracker.update(azimuth) {
                signals += 1;
            }
        }
        assert_eq!(signals, 1);
    }

    #[test]
    fn test_sweep_counter_gap() {
        let mut sweeps = SweepCounter::new();
        assert_eq!(sweeps.update(100), None);
        assert_eq!(sweeps.update(101), None);
        assert_eq!(
            sweeps.update(103),
            Some(LostPackets {
                previous: 101,
                current: 103
            })
        );
        assert_eq!(sweeps.update(104), None);
    }

    #[test]
    fn test_sweep_counter_wraps() {
        let mut sweeps = SweepCounter::new();
        assert_eq!(sweeps.update(65535), None);
        assert_eq!(sweeps.update(0), None);
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = RadarConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"azimuthSamples\":400"));
        let back: RadarConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
