//! Annotation
//!
//! Stream-based pitch annotation: collects samples into overlapping frames,
//! gates out silence, runs the pitch estimator on each frame and reports every
//! pitched frame as an [`Annotation`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pitch_estimator::{DifferenceMethod, PitchError, PitchEstimator};

const DEFAULT_BUFFER_SIZE: usize = 1024;
const DEFAULT_OVERLAP: usize = 512;
const DEFAULT_SILENCE_THRESHOLD_DB: f64 = -70.0;

/// Errors returned by the annotation pipeline.
#[derive(Debug, Error)]
pub enum AnnotationError {
    /// An error occurred during the configuration of the annotator.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The underlying pitch estimator failed.
    #[error(transparent)]
    Pitch(#[from] PitchError),
}

/// A pitch detected at a point in time.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Seconds from the start of the stream to the end of the analysed frame.
    pub time: f64,
    /// Fundamental frequency in Hz.
    pub frequency: f32,
    /// Estimator confidence in `[0, 1]`.
    pub probability: f32,
}

/// Builder for an [`Annotator`].
pub struct AnnotatorBuilder {
    sample_rate: f32,
    buffer_size: usize,
    overlap: usize,
    threshold: Option<f32>,
    difference: DifferenceMethod,
    silence_threshold_db: f64,
    min_probability: f32,
}

impl AnnotatorBuilder {
    /// Start with default parameters:
    /// sample_rate = 44_100, buffer_size = 1024, overlap = 512,
    /// silence_threshold_db = -70, min_probability = 0.
    pub fn new() -> Self {
        AnnotatorBuilder {
            sample_rate: 44_100.0,
            buffer_size: DEFAULT_BUFFER_SIZE,
            overlap: DEFAULT_OVERLAP,
            threshold: None,
            difference: DifferenceMethod::Direct,
            silence_threshold_db: DEFAULT_SILENCE_THRESHOLD_DB,
            min_probability: 0.0,
        }
    }

    /// Set the sample rate of the audio in Hz.
    pub fn sample_rate(mut self, rate: f32) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Set the number of samples per analysed frame.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set how many samples consecutive frames share.
    pub fn overlap(mut self, overlap: usize) -> Self {
        self.overlap = overlap;
        self
    }

    /// Set the pitch estimator's absolute threshold.
    pub fn threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Set how the pitch estimator computes its difference function.
    pub fn difference(mut self, method: DifferenceMethod) -> Self {
        self.difference = method;
        self
    }

    /// Set the sound pressure level in dB below which a frame is skipped.
    pub fn silence_threshold_db(mut self, db: f64) -> Self {
        self.silence_threshold_db = db;
        self
    }

    /// Set the lowest probability an annotation may have.
    pub fn min_probability(mut self, probability: f32) -> Self {
        self.min_probability = probability;
        self
    }

    /// Finalize and create the Annotator.
    pub fn build(self) -> Result<Annotator, AnnotationError> {
        if self.overlap >= self.buffer_size {
            return Err(AnnotationError::Configuration(format!(
                "overlap ({}) must be smaller than buffer_size ({})",
                self.overlap, self.buffer_size
            )));
        }
        if self.silence_threshold_db.is_nan() {
            return Err(AnnotationError::Configuration(
                "silence_threshold_db cannot be NaN".into(),
            ));
        }
        if self.min_probability.is_nan() {
            return Err(AnnotationError::Configuration(
                "min_probability cannot be NaN".into(),
            ));
        }

        let mut estimator = PitchEstimator::builder()
            .sample_rate(self.sample_rate)
            .buffer_size(self.buffer_size)
            .difference(self.difference);
        if let Some(threshold) = self.threshold {
            estimator = estimator.threshold(threshold);
        }
        let estimator = estimator.build()?;
        log::debug!(
            "new annotator: {} samples, overlap {}, silence below {} dB",
            self.buffer_size,
            self.overlap,
            self.silence_threshold_db
        );

        Ok(Annotator {
            estimator,
            buffer: vec![0.0; self.buffer_size],
            head: 0,
            overlap: self.overlap,
            samples_consumed: 0,
            frames_processed: 0,
            silence_threshold_db: self.silence_threshold_db,
            min_probability: self.min_probability,
        })
    }
}

impl Default for AnnotatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Streaming pitch annotator.
pub struct Annotator {
    estimator: PitchEstimator,
    buffer: Vec<f32>,
    head: usize,
    overlap: usize,
    samples_consumed: u64,
    frames_processed: usize,
    silence_threshold_db: f64,
    min_probability: f32,
}

impl Annotator {
    /// Start customizing with a builder.
    pub fn builder() -> AnnotatorBuilder {
        AnnotatorBuilder::new()
    }

    /// Push a chunk of any length. `handler` is called once for each pitched,
    /// non-silent frame completed by this chunk.
    pub fn process<F>(&mut self, samples: &[f32], mut handler: F) -> Result<(), AnnotationError>
    where
        F: FnMut(Annotation),
    {
        let mut remaining = samples;
        while !remaining.is_empty() {
            let take = (self.buffer.len() - self.head).min(remaining.len());
            self.buffer[self.head..self.head + take].copy_from_slice(&remaining[..take]);
            self.head += take;
            self.samples_consumed += take as u64;
            remaining = &remaining[take..];

            if self.head < self.buffer.len() {
                break;
            }

            if let Some(annotation) = self.analyse_frame()? {
                handler(annotation);
            }

            // Keep the tail as the start of the next frame
            let hop = self.buffer.len() - self.overlap;
            self.buffer.copy_within(hop.., 0);
            self.head = self.overlap;
        }
        Ok(())
    }

    /// Annotate a whole chunk and collect the results.
    pub fn annotate(&mut self, samples: &[f32]) -> Result<Vec<Annotation>, AnnotationError> {
        let mut annotations = Vec::new();
        self.process(samples, |annotation| annotations.push(annotation))?;
        Ok(annotations)
    }

    fn analyse_frame(&mut self) -> Result<Option<Annotation>, AnnotationError> {
        self.frames_processed += 1;
        let time = self.samples_consumed as f64 / f64::from(self.estimator.sample_rate());

        if is_silence(&self.buffer, self.silence_threshold_db) {
            log::trace!("frame {} at {time:.3}s is silent", self.frames_processed);
            return Ok(None);
        }

        let estimate = self.estimator.estimate(&self.buffer)?;
        log::trace!("frame {} at {time:.3}s: {estimate:?}", self.frames_processed);

        Ok(estimate
            .frequency
            .filter(|_| estimate.confidence >= self.min_probability)
            .map(|frequency| Annotation {
                time,
                frequency,
                probability: estimate.confidence,
            }))
    }

    /// Forget buffered samples and restart the clock at zero.
    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.head = 0;
        self.samples_consumed = 0;
        self.frames_processed = 0;
    }

    /// Number of complete frames seen so far, silent ones included.
    pub fn frames_processed(&self) -> usize {
        self.frames_processed
    }

    /// The samples per frame.
    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    /// The samples shared by consecutive frames.
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// The pitch estimator run on each frame.
    pub fn estimator(&self) -> &PitchEstimator {
        &self.estimator
    }
}

/// Sound pressure level of a frame in dB: `20 * log10(sqrt(Σx²) / len)`.
///
/// An all-zero or empty frame is `-inf`.
pub fn sound_pressure_level(frame: &[f32]) -> f64 {
    if frame.is_empty() {
        return f64::NEG_INFINITY;
    }
    let power: f64 = frame.iter().map(|&x| f64::from(x) * f64::from(x)).sum();
    let energy = power.sqrt() / frame.len() as f64;
    20.0 * energy.log10()
}

/// Whether a frame's sound pressure level is below `threshold_db`.
pub fn is_silence(frame: &[f32], threshold_db: f64) -> bool {
    sound_pressure_level(frame) < threshold_db
}
