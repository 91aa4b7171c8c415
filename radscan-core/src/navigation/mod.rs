//! Navigation-mode signal processing.
//!
//! The pipeline turns raw FFT spokes into detected targets:
//!
//! ```text
//! raw spoke -> [fft_buffer] -> [cfar] -> [peak] -> (bearing, range)
//! ```
//!
//! - [`fft_buffer`] accumulates N scans and averages or max-combines
//! - [`cfar`] runs a sliding-window CA-CFAR detector over one spoke
//! - [`peak`] picks the peak and resolves it below bin resolution

pub mod cfar;
pub mod fft_buffer;
pub mod peak;

pub use cfar::{Point, Range, Window};
pub use fft_buffer::{BufferMode, FftBuffer};
pub use peak::{PeakMode, ShapeFinder, SubresolutionMode};
