//! Pitch Units
//!
//! Conversions between Hz, cents and MIDI key numbers, and accumulation of
//! pitch annotations into an octave-wide circular histogram.

use std::sync::Arc;

use crate::annotation::Annotation;
use crate::kde::{CircularHistogram, KdeError, Kernel};

/// Cents in one octave.
pub const CENTS_PER_OCTAVE: f64 = 1200.0;

/// Frequency of MIDI key 0 (C-1), the origin of absolute cents.
pub const REFERENCE_FREQUENCY: f64 = 8.175_798_915_643_707;

/// Frequency of MIDI key 69 (A4).
const A4_FREQUENCY: f64 = 440.0;
const A4_KEY: f64 = 69.0;

/// Cents above [`REFERENCE_FREQUENCY`], `None` for non-positive input.
pub fn hz_to_absolute_cents(hz: f64) -> Option<f64> {
    (hz > 0.0).then(|| CENTS_PER_OCTAVE * (hz / REFERENCE_FREQUENCY).log2())
}

/// Inverse of [`hz_to_absolute_cents`].
pub fn absolute_cents_to_hz(cents: f64) -> f64 {
    REFERENCE_FREQUENCY * 2f64.powf(cents / CENTS_PER_OCTAVE)
}

/// Position within the octave in `[0, 1200)` cents, `None` for non-positive input.
pub fn hz_to_relative_cents(hz: f64) -> Option<f64> {
    hz_to_absolute_cents(hz).map(|cents| {
        let relative = cents.rem_euclid(CENTS_PER_OCTAVE);
        // rem_euclid can round up to the modulus itself
        if relative >= CENTS_PER_OCTAVE {
            0.0
        } else {
            relative
        }
    })
}

/// Fractional MIDI key number (A4 = 69), `None` for non-positive input.
pub fn hz_to_midi_key(hz: f64) -> Option<f64> {
    (hz > 0.0).then(|| A4_KEY + 12.0 * (hz / A4_FREQUENCY).log2())
}

/// Frequency of a (fractional) MIDI key number.
pub fn midi_key_to_hz(key: f64) -> f64 {
    A4_FREQUENCY * 2f64.powf((key - A4_KEY) / 12.0)
}

/// Histogram position of `hz` for a histogram spanning one octave in `size` bins.
pub fn hz_to_histogram_position(hz: f64, size: usize) -> Option<f64> {
    hz_to_relative_cents(hz).map(|cents| cents * size as f64 / CENTS_PER_OCTAVE)
}

/// Build a pitch-class histogram of `size` bins over one octave.
///
/// Each annotation contributes one kernel placement at its relative cents
/// value scaled to the bin count.
pub fn pitch_class_histogram<'a, I>(
    annotations: I,
    kernel: Arc<Kernel>,
    size: usize,
) -> Result<CircularHistogram, KdeError>
where
    I: IntoIterator<Item = &'a Annotation>,
{
    let mut histogram = CircularHistogram::new(kernel, size)?;
    let mut count = 0usize;
    for annotation in annotations {
        if let Some(position) = hz_to_histogram_position(f64::from(annotation.frequency), size) {
            histogram.add(position);
            count += 1;
        }
    }
    log::debug!("pitch class histogram of {size} bins from {count} annotations");
    Ok(histogram)
}
