//! Target extraction from CFAR-processed spokes.
//!
//! The peak finder runs as an active worker: `find_peaks` enqueues one
//! spoke, the worker picks the peak, resolves it below bin resolution
//! and converts (bin, azimuth) into a (bearing, range) target for the
//! user callback.
//!
//! The 2-D centre-of-mass mode accumulates detections across whole
//! rotations and hands complete rotations to the shape finder. The
//! first rotation is accumulated but never produces targets on its
//! own; emission starts once two rotations have been collected.

use std::sync::Arc;

use log::debug;

use radscan_core::config::RadarConfig;
use radscan_core::error::ConfigError;
use radscan_core::navigation::peak::{
    centre_of_mass, peak_window, quadratic_fit, select_peak, PeakMode, ShapeFinder,
    SubresolutionMode,
};
use radscan_core::units::{Azimuth, Bin, Db, Metre};

use crate::active::Active;

/// One detected target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CfarTarget {
    /// Bearing in degrees, `[0, 360)`
    pub bearing: f32,
    /// Range in metres
    pub range: Metre,
    /// Peak power where the resolution mode retains it
    pub power: Option<Db>,
}

type TargetCallback = Arc<dyn Fn(CfarTarget) + Send + Sync>;

struct FinderState {
    range_in_bins: usize,
    range_gain: f32,
    range_offset: f32,
    range_resolution: f32,
    min_range: Metre,
    max_range: Metre,
    azimuth_samples: f32,
    min_bin: usize,
    max_peaks: usize,
    mode: SubresolutionMode,
    peak_mode: PeakMode,
    rotation_data: Vec<Vec<f32>>,
    last_azimuth: Azimuth,
    rotation_counter: u32,
    target_callback: Option<TargetCallback>,
}

impl Default for FinderState {
    fn default() -> Self {
        FinderState {
            range_in_bins: 0,
            range_gain: 1.0,
            range_offset: 0.0,
            range_resolution: radscan_core::units::DEFAULT_BIN_SIZE_METRES,
            min_range: 0.0,
            max_range: 0.0,
            azimuth_samples: 0.0,
            min_bin: 0,
            max_peaks: 0,
            mode: SubresolutionMode::default(),
            peak_mode: PeakMode::default(),
            rotation_data: Vec::new(),
            last_azimuth: 0,
            rotation_counter: 0,
            target_callback: None,
        }
    }
}

impl FinderState {
    fn configure(
        &mut self,
        config: &RadarConfig,
        min_bin: Bin,
        max_peaks: usize,
        mode: SubresolutionMode,
        peak_mode: PeakMode,
    ) {
        self.range_in_bins = usize::from(config.range_in_bins);
        self.range_gain = config.range_gain;
        self.range_offset = config.range_offset;
        self.range_resolution = config.range_resolution();
        self.min_bin = usize::from(min_bin);
        self.max_peaks = max_peaks;
        self.min_range = f32::from(min_bin) * self.range_resolution;
        self.max_range = f32::from(config.range_in_bins) * self.range_resolution;
        self.azimuth_samples = f32::from(config.azimuth_samples);
        self.mode = mode;
        self.peak_mode = peak_mode;

        if mode == SubresolutionMode::CentreOfMass2d {
            self.rotation_data = vec![Vec::new(); usize::from(config.azimuth_samples)];
        }
        self.last_azimuth = 0;
        self.rotation_counter = 0;
    }

    fn process(&mut self, azimuth: Azimuth, cfar_data: &[f32]) {
        if self.range_in_bins == 0 {
            debug!("peak finder not configured, spoke dropped");
            return;
        }

        // Contoured data can come up short; pad to the full spoke
        let mut data = cfar_data.to_vec();
        data.resize(self.range_in_bins, 0.0);

        let peak_bin = select_peak(&data, self.min_bin, data.len(), self.peak_mode)
            .unwrap_or(self.min_bin);
        let peak_value = data.get(peak_bin).copied().unwrap_or(0.0);

        if peak_value <= 0.0 && self.mode != SubresolutionMode::CentreOfMass2d {
            return;
        }

        let (first_bin, window_size) = peak_window(&data, peak_bin, self.min_bin);

        match self.mode {
            SubresolutionMode::CurveFit => {
                let resolved = quadratic_fit(&data, peak_bin, window_size);
                self.send_target(resolved, f32::from(azimuth), Some(peak_value));
            }
            SubresolutionMode::CentreOfMass => {
                let window = &data[first_bin..first_bin + window_size];
                let resolved = first_bin as f32 + centre_of_mass(window);
                self.send_target(resolved, f32::from(azimuth), Some(peak_value));
            }
            SubresolutionMode::CentreOfMass2d => {
                if azimuth < self.last_azimuth {
                    self.rotation_counter += 1;
                    if self.rotation_counter >= 2 {
                        self.find_shapes();
                    }
                }

                if self.rotation_counter >= 1 {
                    // Keep the strongest leading peaks of this spoke
                    let mut reduced = vec![0.0f32; data.len()];
                    let mut peaks = 0;
                    for bin in self.min_bin..data.len() {
                        if data[bin] <= 0.0 {
                            continue;
                        }
                        reduced[bin] = data[bin];
                        peaks += 1;
                        if peaks >= self.max_peaks {
                            break;
                        }
                    }
                    let idx = usize::from(azimuth) % self.rotation_data.len();
                    self.rotation_data[idx] = reduced;
                }

                self.last_azimuth = azimuth;
            }
        }
    }

    fn find_shapes(&mut self) {
        let finder = ShapeFinder::new(self.min_bin);
        for (bin, azimuth) in finder.find_centres(&self.rotation_data) {
            self.send_target(bin, azimuth, None);
        }
    }

    fn send_target(&self, resolved_bin: f32, resolved_azimuth: f32, power: Option<Db>) {
        let range = (resolved_bin * self.range_gain * self.range_resolution) + self.range_offset;
        let bearing = (resolved_azimuth * 360.0 / self.azimuth_samples + 360.0) % 360.0;

        if !range.is_finite() || range < self.min_range || range > self.max_range {
            return;
        }

        if let Some(callback) = &self.target_callback {
            callback(CfarTarget {
                bearing,
                range,
                power,
            });
        }
    }
}

/// Peak finder façade. Configure, install a target callback, start,
/// then feed CFAR-processed spokes.
pub struct CfarPeakFinder {
    stopped: Option<FinderState>,
    worker: Option<Active<FinderState>>,
}

impl Default for CfarPeakFinder {
    fn default() -> Self {
        Self::new()
    }
}

impl CfarPeakFinder {
    pub fn new() -> Self {
        CfarPeakFinder {
            stopped: Some(FinderState::default()),
            worker: None,
        }
    }

    /// Apply a radar configuration. Contradictory options fail here
    /// and leave the previous configuration untouched; no processing
    /// happens after a failed configure.
    pub fn configure(
        &mut self,
        config: &RadarConfig,
        min_bin: Bin,
        max_peaks: usize,
        mode: SubresolutionMode,
        peak_mode: PeakMode,
    ) -> Result<(), ConfigError> {
        if config.azimuth_samples == 0 {
            return Err(ConfigError::ZeroAzimuthSamples);
        }
        if min_bin >= config.range_in_bins {
            return Err(ConfigError::MinBinOutOfRange {
                min_bin,
                range_in_bins: config.range_in_bins,
            });
        }
        if max_peaks == 0 {
            return Err(ConfigError::ZeroMaxPeaks);
        }

        let config = config.clone();
        match (&mut self.stopped, &self.worker) {
            (Some(state), _) => state.configure(&config, min_bin, max_peaks, mode, peak_mode),
            (None, Some(worker)) => {
                worker.call(move |state| {
                    state.configure(&config, min_bin, max_peaks, mode, peak_mode)
                });
            }
            (None, None) => {}
        }
        Ok(())
    }

    /// Install the target callback; replaces any previous one.
    pub fn set_target_callback(&mut self, callback: impl Fn(CfarTarget) + Send + Sync + 'static) {
        let callback: TargetCallback = Arc::new(callback);
        match (&mut self.stopped, &self.worker) {
            (Some(state), _) => state.target_callback = Some(callback),
            (None, Some(worker)) => {
                worker.call(move |state| state.target_callback = Some(callback));
            }
            (None, None) => {}
        }
    }

    /// Start the worker. Idempotent.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            return;
        }
        let state = self.stopped.take().unwrap_or_default();
        self.worker = Some(Active::spawn("cfar peak finder", state));
    }

    /// Enqueue one spoke for processing. Spokes fed while stopped are
    /// dropped with a debug log.
    pub fn find_peaks(&self, azimuth: Azimuth, cfar_data: Vec<f32>) {
        match &self.worker {
            Some(worker) => {
                worker.call(move |state| state.process(azimuth, &cfar_data));
            }
            None => debug!("peak finder not running, spoke dropped"),
        }
    }

    /// Drain queued spokes and stop the worker. Configuration and
    /// callback survive for the next start. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.stopped = worker.stop().await.or_else(|| Some(FinderState::default()));
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn test_config() -> RadarConfig {
        RadarConfig {
            azimuth_samples: 400,
            encoder_size: 5600,
            bin_size: 1752,
            range_in_bins: 100,
            range_gain: 1.0,
            range_offset: 0.0,
            ..Default::default()
        }
    }

    fn collect_targets(finder: &mut CfarPeakFinder) -> Arc<Mutex<Vec<CfarTarget>>> {
        let targets = Arc::new(Mutex::new(Vec::new()));
        let targets_clone = targets.clone();
        finder.set_target_callback(move |target| {
            targets_clone.lock().unwrap().push(target);
        });
        targets
    }

    #[tokio::test]
    async fn test_curve_fit_symmetric_peak() {
        let mut finder = CfarPeakFinder::new();
        finder
            .configure(
                &test_config(),
                0,
                10,
                SubresolutionMode::CurveFit,
                PeakMode::Max,
            )
            .unwrap();
        let targets = collect_targets(&mut finder);
        finder.start();

        let mut spoke = vec![0.0f32; 100];
        spoke[5] = 10.0;
        spoke[6] = 30.0;
        spoke[7] = 90.0;
        spoke[8] = 30.0;
        spoke[9] = 10.0;
        finder.find_peaks(100, spoke);
        finder.stop().await;

        let targets = targets.lock().unwrap();
        assert_eq!(targets.len(), 1);
        // Azimuth 100 of 400 is 90 degrees
        assert!((targets[0].bearing - 90.0).abs() < 1e-4);
        // Symmetric peak resolves to exactly bin 7
        assert!((targets[0].range - 7.0 * 0.1752).abs() < 1e-4);
        assert_eq!(targets[0].power, Some(90.0));
    }

    #[tokio::test]
    async fn test_all_zero_spoke_produces_nothing() {
        let mut finder = CfarPeakFinder::new();
        finder
            .configure(
                &test_config(),
                0,
                10,
                SubresolutionMode::CurveFit,
                PeakMode::Max,
            )
            .unwrap();
        let targets = collect_targets(&mut finder);
        finder.start();

        finder.find_peaks(0, vec![0.0; 100]);
        finder.stop().await;

        assert!(targets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_mode_finds_apex() {
        let mut finder = CfarPeakFinder::new();
        finder
            .configure(
                &test_config(),
                0,
                10,
                SubresolutionMode::CentreOfMass,
                PeakMode::First,
            )
            .unwrap();
        let targets = collect_targets(&mut finder);
        finder.start();

        // Rising then falling: apex at bin 20; a taller peak later in
        // the spoke must not win in First mode
        let mut spoke = vec![0.0f32; 100];
        spoke[18] = 10.0;
        spoke[19] = 40.0;
        spoke[20] = 70.0;
        spoke[21] = 30.0;
        spoke[50] = 90.0;
        finder.find_peaks(0, spoke);
        finder.stop().await;

        let targets = targets.lock().unwrap();
        assert_eq!(targets.len(), 1);
        let resolved_bin = targets[0].range / 0.1752;
        assert!(resolved_bin > 18.0 && resolved_bin < 21.0);
    }

    #[tokio::test]
    async fn test_range_limits_drop_targets() {
        let config = RadarConfig {
            range_offset: -50.0,
            ..test_config()
        };
        let mut finder = CfarPeakFinder::new();
        finder
            .configure(&config, 0, 10, SubresolutionMode::CurveFit, PeakMode::Max)
            .unwrap();
        let targets = collect_targets(&mut finder);
        finder.start();

        // Offset pushes the computed range below min_range
        let mut spoke = vec![0.0f32; 100];
        spoke[6] = 30.0;
        spoke[7] = 90.0;
        spoke[8] = 30.0;
        finder.find_peaks(0, spoke);
        finder.stop().await;

        assert!(targets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_configure_rejects_bad_arguments() {
        let mut finder = CfarPeakFinder::new();

        let config = test_config();
        assert!(matches!(
            finder.configure(&config, 100, 10, SubresolutionMode::CurveFit, PeakMode::Max),
            Err(ConfigError::MinBinOutOfRange { .. })
        ));
        assert_eq!(
            finder.configure(&config, 0, 0, SubresolutionMode::CurveFit, PeakMode::Max),
            Err(ConfigError::ZeroMaxPeaks)
        );

        let broken = RadarConfig {
            azimuth_samples: 0,
            ..config
        };
        assert_eq!(
            finder.configure(&broken, 0, 10, SubresolutionMode::CurveFit, PeakMode::Max),
            Err(ConfigError::ZeroAzimuthSamples)
        );
    }

    #[tokio::test]
    async fn test_centre_of_mass_2d_discards_first_rotation() {
        let samples = 8;
        let config = RadarConfig {
            azimuth_samples: samples,
            range_in_bins: 20,
            ..test_config()
        };
        let mut finder = CfarPeakFinder::new();
        finder
            .configure(
                &config,
                0,
                5,
                SubresolutionMode::CentreOfMass2d,
                PeakMode::Max,
            )
            .unwrap();
        let targets = collect_targets(&mut finder);
        finder.start();

        let spoke_with_target = |bin: usize| {
            let mut spoke = vec![0.0f32; 20];
            spoke[bin] = 50.0;
            spoke
        };

        // First rotation: arms the accumulator, no targets
        for azimuth in 0..samples {
            finder.find_peaks(azimuth, spoke_with_target(10));
        }
        // Second rotation: accumulated, still no emission until the
        // wrap that starts rotation three
        for azimuth in 0..samples {
            finder.find_peaks(azimuth, spoke_with_target(10));
        }
        finder.find_peaks(0, spoke_with_target(10));
        finder.stop().await;

        let targets = targets.lock().unwrap();
        assert!(!targets.is_empty());
        // One band around bin 10 across all azimuths is one shape
        assert_eq!(targets.len(), 1);
        assert!((targets[0].range - 10.0 * 0.1752).abs() < 0.05);
    }
}
