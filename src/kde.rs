//! Kernel Density Estimation
//!
//! Circular histograms smoothed by a fixed lookup kernel. Every observation is
//! spread over the kernel width, and bin indices wrap around the end of the
//! domain (e.g. 0..1200 cents of a pitch class).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of kernel widths covered on each side of a Gaussian kernel's center.
const GAUSSIAN_EXTENT: f64 = 5.0;

/// Largest number of weights a kernel lookup table may hold.
const MAX_KERNEL_SIZE: usize = isize::MAX as usize / std::mem::size_of::<f64>();

/// Errors returned by kernels and circular histograms.
#[derive(Debug, Error)]
pub enum KdeError {
    /// The kernel width was not finite, not positive, too small for the kernel
    /// type, or too large to tabulate.
    #[error("invalid kernel width {width}")]
    InvalidKernelWidth {
        /// The rejected width.
        width: f64,
    },

    /// The kernel does not fit in the histogram it is applied to.
    #[error("kernel of {kernel} bins is wider than histogram of {histogram} bins")]
    KernelTooWide {
        /// Number of kernel weights.
        kernel: usize,
        /// Number of histogram bins.
        histogram: usize,
    },

    /// A histogram needs at least one bin.
    #[error("histogram size cannot be zero")]
    EmptyHistogram,

    /// Two histograms that must share a size do not.
    #[error("expected histogram of {expected} bins, got {got}")]
    SizeMismatch {
        /// Size of the receiving histogram.
        expected: usize,
        /// Size of the other histogram.
        got: usize,
    },

    /// A kernel or bin index outside `[0, size)` was requested.
    #[error("index {index} out of range for size {size}")]
    IndexOutOfRange {
        /// The requested index.
        index: usize,
        /// The number of valid entries.
        size: usize,
    },
}

/// Shape of a kernel's weights.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelKind {
    /// Unnormalized Gaussian bell sampled at unit spacing.
    Gaussian,
    /// Flat weight of 1.0 over the whole width.
    Rectangular,
}

/// Immutable lookup table describing how one observation spreads over
/// neighbouring histogram bins.
///
/// A kernel is shared read-only between histograms through an [`Arc`].
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    kind: KernelKind,
    width: f64,
    weights: Box<[f64]>,
}

impl Kernel {
    /// Build a Gaussian kernel.
    ///
    /// The table covers `5 * width` bins on each side of the center, so it holds
    /// `2 * floor(5 * width) + 1` weights. The weight at distance `d` from the
    /// center is `exp(-0.5 * (d / (width / 2))^2)`; the area is not normalized.
    pub fn gaussian(width: f64) -> Result<Self, KdeError> {
        validate_width(width)?;

        let extent = (GAUSSIAN_EXTENT * width).floor();
        let half_width = width / 2.0;
        let weights = weight_table(2.0 * extent + 1.0, width, |i| {
            let distance = i as f64 - extent;
            (-0.5 * (distance / half_width).powi(2)).exp()
        })?;

        Ok(Kernel {
            kind: KernelKind::Gaussian,
            width,
            weights,
        })
    }

    /// Build a rectangular kernel of `floor(width)` weights, all 1.0.
    pub fn rectangular(width: f64) -> Result<Self, KdeError> {
        validate_width(width)?;
        let size = width.floor();
        if size < 1.0 {
            return Err(KdeError::InvalidKernelWidth { width });
        }
        let weights = weight_table(size, width, |_| 1.0)?;

        Ok(Kernel {
            kind: KernelKind::Rectangular,
            width,
            weights,
        })
    }

    /// Number of weights in the lookup table.
    pub fn size(&self) -> usize {
        self.weights.len()
    }

    /// Weight at `index`, `0 <= index < size()`.
    pub fn value(&self, index: usize) -> Result<f64, KdeError> {
        self.weights
            .get(index)
            .copied()
            .ok_or(KdeError::IndexOutOfRange {
                index,
                size: self.size(),
            })
    }

    /// All weights, in offset order.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// The kernel shape.
    pub fn kind(&self) -> KernelKind {
        self.kind
    }

    /// The width the kernel was built from.
    pub fn width(&self) -> f64 {
        self.width
    }
}

fn validate_width(width: f64) -> Result<(), KdeError> {
    if !width.is_finite() || width <= 0.0 {
        return Err(KdeError::InvalidKernelWidth { width });
    }
    Ok(())
}

/// Tabulate `weight` over `size` entries. A table too large to allocate is
/// reported against the `width` it was derived from.
fn weight_table<F>(size: f64, width: f64, weight: F) -> Result<Box<[f64]>, KdeError>
where
    F: Fn(usize) -> f64,
{
    if size >= MAX_KERNEL_SIZE as f64 {
        return Err(KdeError::InvalidKernelWidth { width });
    }
    let size = size as usize;
    let mut weights = Vec::new();
    weights
        .try_reserve_exact(size)
        .map_err(|_| KdeError::InvalidKernelWidth { width })?;
    weights.extend((0..size).map(weight));
    Ok(weights.into_boxed_slice())
}

/// Owned copy of a histogram's bins, detached from the live accumulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    /// Bin values in index order.
    pub bins: Vec<f64>,
}

/// Fixed-size circular accumulator of kernel placements.
///
/// Mutation needs `&mut self`, so a histogram is never written while another
/// thread reads it. Readers that outlive a borrow should take
/// [`estimate`](Self::estimate) or [`snapshot`](Self::snapshot).
#[derive(Debug, Clone)]
pub struct CircularHistogram {
    bins: Box<[f64]>,
    kernel: Arc<Kernel>,
}

impl CircularHistogram {
    /// Create an all-zero histogram of `size` bins using `kernel`.
    ///
    /// Fails if `size` is zero or the kernel is wider than the histogram.
    pub fn new(kernel: Arc<Kernel>, size: usize) -> Result<Self, KdeError> {
        if size == 0 {
            return Err(KdeError::EmptyHistogram);
        }
        if kernel.size() > size {
            return Err(KdeError::KernelTooWide {
                kernel: kernel.size(),
                histogram: size,
            });
        }
        log::debug!(
            "new circular histogram: {} bins, {:?} kernel of {} weights",
            size,
            kernel.kind(),
            kernel.size()
        );

        Ok(CircularHistogram {
            bins: vec![0.0; size].into_boxed_slice(),
            kernel,
        })
    }

    /// Place the kernel centered on `value`.
    ///
    /// Positions outside `[0, size)` wrap around. Non-finite values are ignored.
    pub fn add(&mut self, value: f64) {
        self.place(value, 1.0);
    }

    /// Subtract a kernel previously placed with [`add`](Self::add) at the same `value`.
    ///
    /// Nothing checks that a matching `add` happened: removing a value that was
    /// never added leaves bins below their true value.
    pub fn remove(&mut self, value: f64) {
        self.place(value, -1.0);
    }

    fn place(&mut self, value: f64, sign: f64) {
        if !value.is_finite() {
            log::warn!("ignoring non-finite histogram position {value}");
            return;
        }
        let size = self.bins.len() as i64;
        let half = (self.kernel.size() / 2) as i64;
        let position = value.rem_euclid(size as f64);
        let start = (position + size as f64 - half as f64).floor() as i64;

        for (offset, weight) in self.kernel.weights().iter().enumerate() {
            let index = wrap(start + offset as i64, size);
            self.bins[index] += sign * weight;
        }
    }

    /// Rotate the bins so that new bin `i` holds old bin `(i + shift) mod size`.
    pub fn shift(&mut self, shift: i64) {
        let amount = wrap(shift, self.bins.len() as i64);
        self.bins.rotate_left(amount);
    }

    /// Scale all bins so the largest becomes exactly 1.0.
    ///
    /// Does nothing if no bin is positive.
    pub fn normalize(&mut self) {
        let max = self.bins.iter().copied().fold(0.0_f64, f64::max);
        if max > 0.0 {
            self.bins.iter_mut().for_each(|bin| *bin /= max);
        }
    }

    /// Keep the elementwise maximum of this and `other`.
    pub fn merge_max(&mut self, other: &CircularHistogram) -> Result<(), KdeError> {
        self.check_size(other)?;
        for (bin, &theirs) in self.bins.iter_mut().zip(other.bins.iter()) {
            *bin = bin.max(theirs);
        }
        Ok(())
    }

    /// Add `other` to this histogram bin by bin.
    pub fn merge_add(&mut self, other: &CircularHistogram) -> Result<(), KdeError> {
        self.check_size(other)?;
        for (bin, &theirs) in self.bins.iter_mut().zip(other.bins.iter()) {
            *bin += theirs;
        }
        Ok(())
    }

    /// Sum of all bin values.
    pub fn sum_frequency(&self) -> f64 {
        self.bins.iter().sum()
    }

    /// Similarity with `other` shifted by `shift` bins, in `[0, 1]`.
    ///
    /// Despite the name this is not a statistical correlation: it is the area
    /// shared by both histograms (the sum of bin-wise minima, pairing bin `i`
    /// with `other`'s bin `(i + shift) mod size`) divided by the larger of the
    /// two total areas. 1.0 means one histogram's mass lies entirely inside the
    /// other's, 0.0 means they do not overlap.
    pub fn correlation(&self, other: &CircularHistogram, shift: i64) -> Result<f64, KdeError> {
        self.check_size(other)?;
        let size = self.bins.len() as i64;

        let matching_area: f64 = self
            .bins
            .iter()
            .enumerate()
            .map(|(i, &ours)| ours.min(other.bins[wrap(i as i64 + shift, size)]))
            .sum();
        let biggest_area = self.sum_frequency().max(other.sum_frequency());

        if matching_area == 0.0 || biggest_area <= 0.0 {
            return Ok(0.0);
        }
        Ok(matching_area / biggest_area)
    }

    /// Shift in `[0, size)` that maximizes [`correlation`](Self::correlation)
    /// with `other`; the smallest such shift wins ties.
    pub fn shift_for_optimal_correlation(&self, other: &CircularHistogram) -> Result<usize, KdeError> {
        self.check_size(other)?;

        let mut optimal_shift = 0;
        let mut maximum_correlation = -1.0;
        for shift in 0..self.bins.len() {
            let current = self.correlation(other, shift as i64)?;
            if maximum_correlation < current {
                maximum_correlation = current;
                optimal_shift = shift;
            }
        }
        Ok(optimal_shift)
    }

    /// Reset every bin to zero.
    pub fn clear(&mut self) {
        self.bins.fill(0.0);
    }

    /// Number of bins.
    pub fn size(&self) -> usize {
        self.bins.len()
    }

    /// Value of the bin at `index`.
    pub fn value(&self, index: usize) -> Result<f64, KdeError> {
        self.bins
            .get(index)
            .copied()
            .ok_or(KdeError::IndexOutOfRange {
                index,
                size: self.size(),
            })
    }

    /// Borrowed view of the bins.
    pub fn bins(&self) -> &[f64] {
        &self.bins
    }

    /// Copy of the bins, safe to hand to another thread or persist.
    pub fn estimate(&self) -> Vec<f64> {
        self.bins.to_vec()
    }

    /// Serializable copy of the bins.
    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            bins: self.estimate(),
        }
    }

    /// The shared kernel.
    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    fn check_size(&self, other: &CircularHistogram) -> Result<(), KdeError> {
        if other.size() != self.size() {
            return Err(KdeError::SizeMismatch {
                expected: self.size(),
                got: other.size(),
            });
        }
        Ok(())
    }
}

/// Euclidean remainder, valid for negative `index`.
#[inline]
fn wrap(index: i64, size: i64) -> usize {
    index.rem_euclid(size) as usize
}
