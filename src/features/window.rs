//! Sliding window statistics over per-frame feature arrays.

use std::collections::BTreeMap;
use std::f64::consts::TAU;
use std::ops::Range;

use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::pose::view::wrap_degrees;

/// Window statistics for one feature: statistic name → (frames, k)
pub type WindowStats = BTreeMap<String, Array2<f64>>;

/// A statistic over the valid values of one window
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowOp {
    Mean,
    /// Population standard deviation
    StdDev,
    Min,
    Max,
    /// Mean on the circle `[low, high)`
    CircularMean { low: f64, high: f64 },
    CircularStdDev { low: f64, high: f64 },
}

/// mean, std_dev, min, max
pub const LINEAR_STATISTICS: &[(&str, WindowOp)] = &[
    ("mean", WindowOp::Mean),
    ("std_dev", WindowOp::StdDev),
    ("min", WindowOp::Min),
    ("max", WindowOp::Max),
];

/// Same names as [`LINEAR_STATISTICS`], with mean and std_dev taken on the
/// circle for angles in degrees.
pub const CIRCULAR_STATISTICS: &[(&str, WindowOp)] = &[
    ("mean", WindowOp::CircularMean { low: -180.0, high: 180.0 }),
    ("std_dev", WindowOp::CircularStdDev { low: -180.0, high: 180.0 }),
    ("min", WindowOp::Min),
    ("max", WindowOp::Max),
];

impl WindowOp {
    /// NaN for an empty slice
    pub fn compute(&self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return f64::NAN;
        }
        let n = values.len() as f64;
        match *self {
            Self::Mean => values.iter().sum::<f64>() / n,
            Self::StdDev => {
                let mean = values.iter().sum::<f64>() / n;
                let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
                var.sqrt()
            }
            Self::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::CircularMean { low, high } => circular_mean(values, low, high),
            Self::CircularStdDev { low, high } => circular_std_dev(values, low, high),
        }
    }
}

fn circular_sums(values: &[f64], low: f64, high: f64) -> (f64, f64) {
    let to_radians = TAU / (high - low);
    values.iter().fold((0.0, 0.0), |(s, c), v| {
        let a = (v - low) * to_radians;
        (s + a.sin(), c + a.cos())
    })
}

/// Mean direction of `values` on the circle `[low, high)`
pub fn circular_mean(values: &[f64], low: f64, high: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let (s, c) = circular_sums(values, low, high);
    let mut angle = s.atan2(c);
    if angle < 0.0 {
        angle += TAU;
    }
    let mean = angle * (high - low) / TAU + low;
    if low == -180.0 && high == 180.0 {
        wrap_degrees(mean)
    } else if mean >= high {
        mean - (high - low)
    } else {
        mean
    }
}

/// Circular standard deviation `sqrt(-2 ln R)` rescaled to `[low, high)`
pub fn circular_std_dev(values: &[f64], low: f64, high: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let (s, c) = circular_sums(values, low, high);
    let n = values.len() as f64;
    let r = ((s / n).hypot(c / n)).min(1.0);
    (high - low) / TAU * (-2.0 * r.ln()).sqrt()
}

/// Computes window statistics over `[f - window_size, f + window_size]`,
/// clipped to the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowAggregator {
    window_size: usize,
}

impl WindowAggregator {
    pub fn new(window_size: usize) -> Self {
        Self { window_size }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Full window width, `2 * window_size + 1`
    pub fn width(&self) -> usize {
        self.window_size.saturating_mul(2).saturating_add(1)
    }

    /// Frames covered by the window centred on `frame`
    pub fn bounds(&self, frame: usize, num_frames: usize) -> Range<usize> {
        let start = frame.saturating_sub(self.window_size);
        let end = frame
            .saturating_add(self.window_size)
            .saturating_add(1)
            .min(num_frames);
        start..end
    }

    /// Each statistic over the valid values in every window.
    ///
    /// A value is valid when `valid[frame]` holds and it is not NaN. Windows
    /// without any valid value yield NaN.
    pub fn aggregate(
        &self,
        values: ArrayView2<'_, f64>,
        valid: ArrayView1<'_, bool>,
        statistics: &[(&str, WindowOp)],
    ) -> WindowStats {
        let (num_frames, width) = values.dim();
        let mut results: Vec<Array2<f64>> = statistics
            .iter()
            .map(|_| Array2::from_elem((num_frames, width), f64::NAN))
            .collect();

        let mut window = Vec::with_capacity(self.width().min(num_frames));
        for column in 0..width {
            for frame in 0..num_frames {
                window.clear();
                window.extend(
                    self.bounds(frame, num_frames)
                        .filter(|&f| valid[f])
                        .map(|f| values[[f, column]])
                        .filter(|v| !v.is_nan()),
                );
                if window.is_empty() {
                    continue;
                }
                for (result, (_, op)) in results.iter_mut().zip(statistics) {
                    result[[frame, column]] = op.compute(&window);
                }
            }
        }

        statistics
            .iter()
            .zip(results)
            .map(|((name, _), result)| (name.to_string(), result))
            .collect()
    }
}
