//! Pitch Estimator
//!
//! Single-frame fundamental frequency estimation with the YIN method:
//! squared difference function, cumulative mean normalization, absolute
//! threshold search and parabolic refinement of the selected lag.
//!
//! Based on "YIN, a fundamental frequency estimator for speech and music",
//! A. de Cheveigné and H. Kawahara, JASA 2002.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_SAMPLE_RATE: f32 = 44_100.0;
const DEFAULT_BUFFER_SIZE: usize = 1024;
const DEFAULT_THRESHOLD: f32 = 0.15;
const MIN_BUFFER_SIZE: usize = 4;

/// Errors returned by the pitch estimator.
#[derive(Debug, Error)]
pub enum PitchError {
    /// Frame received was not of the expected size.
    #[error("expected frame of length {expected}, got {got}")]
    InvalidFrameSize {
        /// The configured buffer size.
        expected: usize,
        /// The length of the received frame.
        got: usize,
    },

    /// An error occurred during the configuration of the estimator.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// How the squared difference function is computed.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum DifferenceMethod {
    /// Direct O(n²) summation.
    #[default]
    Direct,
    /// Cross-correlation through an FFT plus running energies.
    Fft,
}

/// Result of analysing one frame.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct PitchEstimate {
    /// Fundamental frequency in Hz, `None` when no lag crossed the threshold.
    pub frequency: Option<f32>,
    /// `1 - d'(tau)` at the selected lag, 0.0 when unpitched.
    pub confidence: f32,
}

impl PitchEstimate {
    /// The "no pitch found" outcome.
    pub const UNPITCHED: PitchEstimate = PitchEstimate {
        frequency: None,
        confidence: 0.0,
    };

    /// Whether a fundamental frequency was found.
    pub fn is_pitched(&self) -> bool {
        self.frequency.is_some()
    }
}

/// Builder for a [`PitchEstimator`].
pub struct PitchEstimatorBuilder {
    sample_rate: f32,
    buffer_size: usize,
    threshold: f32,
    difference: DifferenceMethod,
}

impl PitchEstimatorBuilder {
    /// Start with default parameters:
    /// sample_rate = 44_100, buffer_size = 1024,
    /// threshold = 0.15, difference = Direct.
    pub fn new() -> Self {
        PitchEstimatorBuilder {
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            threshold: DEFAULT_THRESHOLD,
            difference: DifferenceMethod::Direct,
        }
    }

    /// Set the sample rate of the audio in Hz.
    pub fn sample_rate(mut self, rate: f32) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Set the number of samples in each frame.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the absolute threshold on the normalized difference (0.10 to 0.15 is typical).
    pub fn threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set how the difference function is computed.
    pub fn difference(mut self, method: DifferenceMethod) -> Self {
        self.difference = method;
        self
    }

    /// Finalize and create the estimator.
    pub fn build(self) -> Result<PitchEstimator, PitchError> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(PitchError::Configuration(format!(
                "sample_rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.buffer_size < MIN_BUFFER_SIZE {
            return Err(PitchError::Configuration(format!(
                "buffer_size must be at least {MIN_BUFFER_SIZE}, got {}",
                self.buffer_size
            )));
        }
        if self.threshold.is_nan() || self.threshold <= 0.0 || self.threshold > 1.0 {
            return Err(PitchError::Configuration(format!(
                "threshold must lie in (0, 1], got {}",
                self.threshold
            )));
        }

        let fft = match self.difference {
            DifferenceMethod::Direct => None,
            DifferenceMethod::Fft => Some(FftDifference::new(self.buffer_size)),
        };
        log::debug!(
            "new pitch estimator: {} Hz, {} samples, threshold {}, {:?} difference",
            self.sample_rate,
            self.buffer_size,
            self.threshold,
            self.difference
        );

        Ok(PitchEstimator {
            yin_buffer: vec![0.0; self.buffer_size / 2],
            sample_rate: self.sample_rate,
            buffer_size: self.buffer_size,
            threshold: self.threshold,
            difference: self.difference,
            fft,
        })
    }
}

impl Default for PitchEstimatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// YIN fundamental frequency estimator for fixed-size frames.
///
/// Holds a scratch buffer of half the frame length; estimating needs `&mut self`.
pub struct PitchEstimator {
    yin_buffer: Vec<f32>,
    sample_rate: f32,
    buffer_size: usize,
    threshold: f32,
    difference: DifferenceMethod,
    fft: Option<FftDifference>,
}

impl PitchEstimator {
    /// Start customizing with a builder.
    pub fn builder() -> PitchEstimatorBuilder {
        PitchEstimatorBuilder::new()
    }

    /// Estimator with default parameters at `sample_rate`.
    pub fn new(sample_rate: f32) -> Result<Self, PitchError> {
        Self::builder().sample_rate(sample_rate).build()
    }

    /// Estimate the fundamental frequency of one frame.
    ///
    /// Returns `Err(PitchError::InvalidFrameSize)` if `frame.len()` differs from
    /// the configured buffer size. Finding no pitch is not an error; it yields
    /// [`PitchEstimate::UNPITCHED`]. Silent frames are analysed like any other.
    pub fn estimate(&mut self, frame: &[f32]) -> Result<PitchEstimate, PitchError> {
        if frame.len() != self.buffer_size {
            return Err(PitchError::InvalidFrameSize {
                expected: self.buffer_size,
                got: frame.len(),
            });
        }

        match self.fft.as_mut() {
            Some(fft) => fft.difference(frame, &mut self.yin_buffer),
            None => difference(frame, &mut self.yin_buffer),
        }
        cumulative_mean_normalized_difference(&mut self.yin_buffer);

        let Some(tau) = absolute_threshold(&self.yin_buffer, self.threshold) else {
            return Ok(PitchEstimate::UNPITCHED);
        };
        let better_tau = parabolic_interpolation(&self.yin_buffer, tau);

        Ok(PitchEstimate {
            frequency: Some(self.sample_rate / better_tau),
            confidence: 1.0 - self.yin_buffer[tau],
        })
    }

    /// The sample rate in Hz.
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// The expected frame length.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// The absolute threshold on the normalized difference.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// How the difference function is computed.
    pub fn difference_method(&self) -> DifferenceMethod {
        self.difference
    }
}

/// Squared difference function: `d[tau] = Σ (x[i] - x[i + tau])²` over the
/// first half of the frame, with `d[0] = 0`.
fn difference(frame: &[f32], yin_buffer: &mut [f32]) {
    let half = yin_buffer.len();
    yin_buffer[0] = 0.0;
    for (tau, value) in yin_buffer.iter_mut().enumerate().skip(1) {
        *value = frame[..half]
            .iter()
            .zip(&frame[tau..tau + half])
            .map(|(a, b)| {
                let delta = a - b;
                delta * delta
            })
            .sum();
    }
}

/// Rescale the difference so one threshold holds at every lag.
///
/// `d'[0] = d'[1] = 1`. A lag whose running sum is still zero gets 1.0.
fn cumulative_mean_normalized_difference(yin_buffer: &mut [f32]) {
    yin_buffer[0] = 1.0;
    let mut running_sum = yin_buffer[1];
    yin_buffer[1] = 1.0;
    for (tau, value) in yin_buffer.iter_mut().enumerate().skip(2) {
        running_sum += *value;
        *value = if running_sum > 0.0 {
            *value * tau as f32 / running_sum
        } else {
            1.0
        };
    }
}

/// First lag below `threshold`, advanced to the bottom of its dip.
fn absolute_threshold(yin_buffer: &[f32], threshold: f32) -> Option<usize> {
    let len = yin_buffer.len();
    let mut tau = (1..len).find(|&tau| yin_buffer[tau] < threshold)?;
    while tau + 1 < len && yin_buffer[tau + 1] < yin_buffer[tau] {
        tau += 1;
    }
    Some(tau)
}

/// Refine `tau` with a parabola through its neighbours.
///
/// At the end of the buffer, or when the three points are collinear, the lag
/// with the lowest value among those available is kept instead.
fn parabolic_interpolation(yin_buffer: &[f32], tau: usize) -> f32 {
    let x0 = tau.saturating_sub(1);
    let x2 = if tau + 1 < yin_buffer.len() { tau + 1 } else { tau };

    let lowest = |candidates: &[usize]| {
        candidates
            .iter()
            .copied()
            .fold(tau, |best, x| if yin_buffer[x] < yin_buffer[best] { x } else { best }) as f32
    };

    if x0 == tau {
        return lowest(&[x2]);
    }
    if x2 == tau {
        return lowest(&[x0]);
    }

    let (s0, s1, s2) = (yin_buffer[x0], yin_buffer[tau], yin_buffer[x2]);
    let denominator = 2.0 * (2.0 * s1 - s2 - s0);
    let better_tau = tau as f32 + (s2 - s0) / denominator;
    if denominator == 0.0 || !better_tau.is_finite() {
        return lowest(&[x0, x2]);
    }
    better_tau
}

/// FFT-accelerated difference function.
///
/// `d[tau] = e(0) + e(tau) - 2 r(tau)`, where `e(tau)` is the energy of the
/// half-frame starting at `tau` and `r` the cross-correlation of the first
/// half-frame with the whole frame.
struct FftDifference {
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    head: Vec<Complex<f32>>,
    whole: Vec<Complex<f32>>,
}

impl FftDifference {
    fn new(buffer_size: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        FftDifference {
            forward: planner.plan_fft_forward(buffer_size),
            inverse: planner.plan_fft_inverse(buffer_size),
            head: vec![Complex { re: 0.0, im: 0.0 }; buffer_size],
            whole: vec![Complex { re: 0.0, im: 0.0 }; buffer_size],
        }
    }

    fn difference(&mut self, frame: &[f32], yin_buffer: &mut [f32]) {
        let half = yin_buffer.len();
        let size = frame.len();

        for (i, (head, whole)) in self.head.iter_mut().zip(self.whole.iter_mut()).enumerate() {
            *whole = Complex { re: frame[i], im: 0.0 };
            *head = if i < half { *whole } else { Complex { re: 0.0, im: 0.0 } };
        }

        self.forward.process(&mut self.head);
        self.forward.process(&mut self.whole);
        for (head, whole) in self.head.iter_mut().zip(self.whole.iter()) {
            *head = head.conj() * *whole;
        }
        self.inverse.process(&mut self.head);

        // lag + index stays below 2 * half <= size, so the circular
        // correlation holds no wrapped terms.
        let scale = 1.0 / size as f32;
        let head_energy: f32 = frame[..half].iter().map(|x| x * x).sum();
        let mut lagged_energy = head_energy;
        yin_buffer[0] = 0.0;
        for (tau, value) in yin_buffer.iter_mut().enumerate().skip(1) {
            lagged_energy += frame[tau + half - 1].powi(2) - frame[tau - 1].powi(2);
            let cross = self.head[tau].re * scale;
            *value = (head_energy + lagged_energy - 2.0 * cross).max(0.0);
        }
    }
}
