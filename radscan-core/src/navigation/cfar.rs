//! Cell-Averaging Constant-False-Alarm-Rate detection.
//!
//! ```text
//!    T T T T T T T T x x | x x T T T T T T T T
//!    ^               ^   ^                   ^
//!    |               |   cell-under-test     |
//!    |               guard cells (2)         |
//!    |<----        window size (21)       -->|
//! ```
//!
//! The cell under test passes when its value exceeds the average of the
//! training cells by the threshold delta; otherwise it is zeroed. At
//! the edges of the processing range the window is slewed rather than
//! shrunk: if the lower training cells would fall below the range
//! start, the upper set is extended to keep the total window size, and
//! vice versa at the range end. Every cell in the range produces an
//! output value.

use crate::units::{Bin, Db, Metre, DEFAULT_BIN_SIZE_METRES, FFT_16BIT_QUANTUM, FFT_8BIT_QUANTUM};

// =============================================================================
// Window
// =============================================================================

/// CFAR window definition: total size, guard cells per side, and the
/// detection threshold above the local average.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    size: Bin,
    guard_cells: Bin,
    threshold_delta: Db,
}

impl Window {
    /// A window must be odd-sized and leave at least one training cell
    /// per side; sizes that don't are adjusted up silently.
    pub fn new(size: Bin, guard_cells: Bin) -> Self {
        Window {
            size,
            guard_cells,
            threshold_delta: 0.0,
        }
        .resized()
    }

    pub fn with_threshold(size: Bin, guard_cells: Bin, threshold_delta: Db) -> Self {
        Window {
            size,
            guard_cells,
            threshold_delta,
        }
        .resized()
    }

    fn resized(mut self) -> Self {
        const MIN_TRAINING_CELLS: Bin = 1;
        let min_size = (2 * self.guard_cells) + (2 * MIN_TRAINING_CELLS) + 1;
        let odd = if self.size % 2 != 0 {
            self.size
        } else {
            self.size + 1
        };
        self.size = odd.max(min_size);
        self
    }

    pub fn size(&self) -> Bin {
        self.size
    }

    pub fn guard_cells(&self) -> Bin {
        self.guard_cells
    }

    pub fn threshold_delta(&self) -> Db {
        self.threshold_delta
    }
}

// =============================================================================
// Range
// =============================================================================

/// Half-open bin range to process: `start <= bin < end`. The
/// constructor swaps its arguments if needed to keep `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Range {
    pub start: Bin,
    pub end: Bin,
}

impl Range {
    pub fn new(first: Bin, last: Bin) -> Self {
        Range {
            start: first.min(last),
            end: first.max(last),
        }
    }

    pub fn to(last: usize) -> Self {
        Range {
            start: 0,
            end: last as Bin,
        }
    }

    pub fn len(&self) -> usize {
        usize::from(self.end - self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

// =============================================================================
// Output point
// =============================================================================

/// One detection: range in metres and power in dB.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub range: Metre,
    pub power: Db,
}

/// Default bin-to-metre conversion.
pub fn default_to_metre(bin: Bin) -> Metre {
    f32::from(bin) * DEFAULT_BIN_SIZE_METRES
}

// =============================================================================
// Sample quanta
// =============================================================================

/// FFT sample type processed by the sliding window. The training
/// average accumulates in a type wide enough to never overflow, and the
/// threshold comparison happens in whichever quantum the variant
/// defines.
pub trait Sample: Copy + PartialOrd {
    type Sum: Copy + Default;

    fn accumulate(sum: Self::Sum, value: Self) -> Self::Sum;
    /// Training average as a float, in raw counts.
    fn average(sum: Self::Sum, count: usize) -> Db;
    /// Training average truncated into the input quantum.
    fn average_raw(sum: Self::Sum, count: usize) -> Self;
    fn to_db(self) -> Db;
    /// Threshold delta converted into the input quantum.
    fn threshold_raw(delta: Db) -> Self;
    fn saturating_add(self, other: Self) -> Self;
    fn zero() -> Self;
}

impl Sample for u8 {
    type Sum = u32;

    fn accumulate(sum: u32, value: u8) -> u32 {
        sum + u32::from(value)
    }

    fn average(sum: u32, count: usize) -> Db {
        sum as f32 / count as f32
    }

    fn average_raw(sum: u32, count: usize) -> u8 {
        (sum / count as u32) as u8
    }

    fn to_db(self) -> Db {
        f32::from(self) * FFT_8BIT_QUANTUM
    }

    fn threshold_raw(delta: Db) -> u8 {
        (delta / FFT_8BIT_QUANTUM) as u8
    }

    fn saturating_add(self, other: u8) -> u8 {
        u8::saturating_add(self, other)
    }

    fn zero() -> u8 {
        0
    }
}

impl Sample for u16 {
    type Sum = u32;

    fn accumulate(sum: u32, value: u16) -> u32 {
        sum + u32::from(value)
    }

    fn average(sum: u32, count: usize) -> Db {
        sum as f32 / count as f32
    }

    fn average_raw(sum: u32, count: usize) -> u16 {
        (sum / count as u32) as u16
    }

    fn to_db(self) -> Db {
        f32::from(self) * FFT_16BIT_QUANTUM
    }

    fn threshold_raw(delta: Db) -> u16 {
        (delta / FFT_16BIT_QUANTUM) as u16
    }

    fn saturating_add(self, other: u16) -> u16 {
        u16::saturating_add(self, other)
    }

    fn zero() -> u16 {
        0
    }
}

impl Sample for f32 {
    type Sum = f32;

    fn accumulate(sum: f32, value: f32) -> f32 {
        sum + value
    }

    fn average(sum: f32, count: usize) -> Db {
        sum / count as f32
    }

    fn average_raw(sum: f32, count: usize) -> f32 {
        sum / count as f32
    }

    fn to_db(self) -> Db {
        self
    }

    fn threshold_raw(delta: Db) -> f32 {
        delta
    }

    fn saturating_add(self, other: f32) -> f32 {
        self + other
    }

    fn zero() -> f32 {
        0.0
    }
}

// =============================================================================
// Window slider
// =============================================================================

/// Training-cell bounds for one cell under test, after edge slewing.
/// Both halves are half-open index ranges into the data slice.
fn training_bounds(
    cut: usize,
    window: &Window,
    range_start: usize,
    range_end: usize,
) -> (usize, usize, usize, usize) {
    let size = window.size as isize;
    let half = size / 2;
    let guard = window.guard_cells as isize;
    let i = cut as isize;
    let start = range_start as isize;
    let end = range_end as isize;

    let mut lower_begin = i - half;
    let mut lower_end = i - guard;
    let mut upper_begin = i + guard + 1;
    let mut upper_end = i + half + 1;

    if lower_begin < start {
        lower_begin = start;
        upper_end = lower_begin + size;
    }
    if upper_end > end {
        upper_end = end;
        lower_begin = upper_end - size;
    }
    // The window may still overflow a short range after slewing
    if lower_begin < start {
        lower_begin = start;
    }
    if lower_end < start {
        lower_end = start;
    }
    if lower_begin > lower_end {
        lower_begin = lower_end;
    }
    if upper_begin > upper_end {
        upper_begin = upper_end;
    }
    if upper_end > end {
        upper_end = end;
    }

    (
        lower_begin as usize,
        lower_end as usize,
        upper_begin as usize,
        upper_end as usize,
    )
}

struct WindowSlider<'a, T: Sample> {
    window: Window,
    data: &'a [T],
    range_start: usize,
    range_end: usize,
    exceeded: usize,
}

impl<'a, T: Sample> WindowSlider<'a, T> {
    fn new(window: Window, data: &'a [T], range_start: usize, range_end: usize) -> Self {
        WindowSlider {
            window,
            data,
            range_start,
            range_end,
            exceeded: 0,
        }
    }

    fn training_average(&self, cut: usize) -> Option<(T::Sum, usize)> {
        let (lower_begin, lower_end, upper_begin, upper_end) =
            training_bounds(cut, &self.window, self.range_start, self.range_end);

        let mut sum = T::Sum::default();
        for &value in &self.data[lower_begin..lower_end] {
            sum = T::accumulate(sum, value);
        }
        for &value in &self.data[upper_begin..upper_end] {
            sum = T::accumulate(sum, value);
        }
        let count = (lower_end - lower_begin) + (upper_end - upper_begin);
        if count == 0 {
            return None;
        }
        Some((sum, count))
    }

    /// Detect in dB: returns the cell's dB value if it passes, else 0.
    fn process_cell(&mut self, cut: usize) -> (Db, usize) {
        let cell_value = self.data[cut].to_db();
        let Some((sum, count)) = self.training_average(cut) else {
            return (0.0, self.exceeded);
        };
        let average = T::average(sum, count);

        if cell_value > average + self.window.threshold_delta() {
            self.exceeded += 1;
            (cell_value, self.exceeded)
        } else {
            (0.0, self.exceeded)
        }
    }

    /// Detect in the input quantum: returns the raw cell value or 0.
    fn process_cell_raw(&mut self, cut: usize) -> T {
        let cell_value = self.data[cut];
        let Some((sum, count)) = self.training_average(cut) else {
            return T::zero();
        };
        let average = T::average_raw(sum, count);
        let threshold = T::threshold_raw(self.window.threshold_delta());

        if cell_value > average.saturating_add(threshold) {
            cell_value
        } else {
            T::zero()
        }
    }
}

// =============================================================================
// Algorithms
// =============================================================================

/// Run CA-CFAR over a whole slice, producing a dB-valued output of the
/// same length.
pub fn process<T: Sample>(data: &[T], window: &Window) -> Vec<Db> {
    let mut slider = WindowSlider::new(*window, data, 0, data.len());
    (0..data.len())
        .map(|cut| slider.process_cell(cut).0)
        .collect()
}

/// As [`process`], but leave the output in the input quantum.
pub fn process_as_raw<T: Sample>(data: &[T], window: &Window) -> Vec<T> {
    let mut slider = WindowSlider::new(*window, data, 0, data.len());
    (0..data.len())
        .map(|cut| slider.process_cell_raw(cut))
        .collect()
}

/// All detections within `range`, converted to metres.
pub fn points<T: Sample>(
    data: &[T],
    range: Range,
    window: &Window,
    to_metre: impl Fn(Bin) -> Metre,
) -> Vec<Point> {
    first_n_points(data, range, window, range.len(), to_metre)
}

/// At most `max_points` detections within `range`, scanning outward
/// from the range start.
pub fn first_n_points<T: Sample>(
    data: &[T],
    range: Range,
    window: &Window,
    max_points: usize,
    to_metre: impl Fn(Bin) -> Metre,
) -> Vec<Point> {
    let range_end = usize::from(range.end).min(data.len());
    let range_start = usize::from(range.start).min(range_end);

    let mut slider = WindowSlider::new(*window, data, range_start, range_end);
    let mut output = Vec::new();

    for cut in range_start..range_end {
        let (power, count) = slider.process_cell(cut);
        if power > 0.0 {
            output.push(Point {
                range: to_metre(cut as Bin),
                power,
            });
        }
        if count == max_points {
            break;
        }
    }

    output
}

// =============================================================================
// Tests
// =============================================================================
