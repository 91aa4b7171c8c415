//! Multi-scan FFT accumulation.
//!
//! Buffers the last N spokes for one azimuth and combines them into a
//! single spoke, either by power-domain averaging or per-bin maximum.
//! Nothing is emitted until N spokes have arrived since the last
//! emission.

use crate::units::{Db, FFT_8BIT_QUANTUM};

/// How buffered spokes are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferMode {
    /// Pass every spoke straight through
    #[default]
    Off,
    /// Power-domain average over the buffered set
    Average,
    /// Per-bin maximum over the buffered set
    Max,
}

/// Accumulates spokes and emits a combined spoke every N inputs.
pub struct FftBuffer {
    mode: BufferMode,
    samples: usize,
    buffered: Vec<Vec<Db>>,
    convert: Box<dyn Fn(&[u8]) -> Vec<Db> + Send>,
}

impl std::fmt::Debug for FftBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FftBuffer")
            .field("mode", &self.mode)
            .field("samples", &self.samples)
            .field("buffered", &self.buffered.len())
            .finish()
    }
}

impl FftBuffer {
    /// Buffer with the default 8-bit conversion (0.5 dB per count).
    pub fn new(mode: BufferMode, samples: usize) -> Self {
        Self::with_conversion(mode, samples, |raw| {
            raw.iter()
                .map(|&value| f32::from(value) * FFT_8BIT_QUANTUM)
                .collect()
        })
    }

    /// Buffer with a caller-supplied raw-byte-to-dB conversion.
    pub fn with_conversion(
        mode: BufferMode,
        samples: usize,
        convert: impl Fn(&[u8]) -> Vec<Db> + Send + 'static,
    ) -> Self {
        FftBuffer {
            mode,
            samples: samples.max(1),
            buffered: Vec::new(),
            convert: Box::new(convert),
        }
    }

    pub fn mode(&self) -> BufferMode {
        self.mode
    }

    /// Feed a raw spoke; converts to dB and buffers.
    pub fn process_raw(&mut self, fft_data: &[u8]) -> Option<Vec<Db>> {
        let converted = (self.convert)(fft_data);
        self.process(&converted)
    }

    /// Feed a dB-valued spoke. Returns the combined spoke once N have
    /// accumulated, `None` otherwise.
    pub fn process(&mut self, fft_data: &[Db]) -> Option<Vec<Db>> {
        match self.mode {
            BufferMode::Off => Some(fft_data.to_vec()),
            BufferMode::Average => {
                self.buffered.push(fft_data.to_vec());
                if self.buffered.len() < self.samples {
                    return None;
                }

                let bins = fft_data.len();
                let mut combined = vec![0.0f32; bins];
                for (bin, out) in combined.iter_mut().enumerate() {
                    let mut total = 0.0f32;
                    for spoke in &self.buffered {
                        total += 10.0f32.powf(spoke[bin] / 20.0);
                    }
                    *out = (total / self.buffered.len() as f32).log10() * 10.0;
                }

                self.buffered.clear();
                Some(combined)
            }
            BufferMode::Max => {
                self.buffered.push(fft_data.to_vec());
                if self.buffered.len() < self.samples {
                    return None;
                }

                let bins = fft_data.len();
                let mut combined = vec![0.0f32; bins];
                for (bin, out) in combined.iter_mut().enumerate() {
                    *out = self
                        .buffered
                        .iter()
                        .map(|spoke| spoke[bin])
                        .fold(f32::MIN, f32::max);
                }

                self.buffered.clear();
                Some(combined)
            }
        }
    }

    /// Spokes accumulated since the last emission.
    pub fn pending(&self) -> usize {
        self.buffered.len()
    }

    /// Drop any buffered spokes.
    pub fn clear(&mut self) {
        self.buffered.clear();
    }
}
