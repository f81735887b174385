//! # pitch_kde
//!
//! Frame-based fundamental frequency estimation and circular kernel density
//! histograms of pitch classes, comparable by shift-tolerant similarity.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use pitch_kde::{cents, Annotator, Kernel};
//!
//! fn run() -> Result<(), Box<dyn std::error::Error>> {
//!     // 1) Build an annotation pipeline
//!     let mut annotator = Annotator::builder()
//!         .sample_rate(44_100.0)
//!         .buffer_size(1024)
//!         .overlap(512)
//!         .build()?;
//!
//!     // 2) Feed it audio, here one second of A4
//!     let audio: Vec<f32> = (0..44_100)
//!         .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44_100.0).sin())
//!         .collect();
//!     let annotations = annotator.annotate(&audio)?;
//!
//!     // 3) Smooth the detected pitches into a 1200-bin pitch-class histogram
//!     let kernel = Arc::new(Kernel::gaussian(6.0)?);
//!     let mut histogram = cents::pitch_class_histogram(&annotations, kernel, 1200)?;
//!     histogram.normalize();
//!
//!     // A4 lies 900 cents above C
//!     let peak = histogram
//!         .bins()
//!         .iter()
//!         .enumerate()
//!         .fold((0, 0.0), |best, (i, &v)| if v > best.1 { (i, v) } else { best });
//!     assert!((peak.0 as i64 - 900).abs() <= 5);
//!
//!     Ok(())
//! }
//! # run().unwrap();
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rust_2018_idioms)]
#![deny(clippy::all)]

/// Single-frame pitch estimation.
pub use pitch_estimator::{
    DifferenceMethod, PitchError, PitchEstimate, PitchEstimator, PitchEstimatorBuilder,
};

/// Circular kernel density estimation.
pub use kde::{CircularHistogram, HistogramSnapshot, KdeError, Kernel, KernelKind};

/// Streaming pitch annotation.
pub use annotation::{Annotation, AnnotationError, Annotator, AnnotatorBuilder};

/// Pitch estimation module.
pub mod pitch_estimator;

/// Kernel density estimation module.
pub mod kde;

/// Annotation pipeline module.
pub mod annotation;

/// Pitch unit conversion module.
pub mod cents;
