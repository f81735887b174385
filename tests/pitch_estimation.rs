//! Integration tests for single-frame pitch estimation on synthetic signals.

use pitch_kde::{DifferenceMethod, PitchError, PitchEstimate, PitchEstimator};
use std::f32::consts::PI;

const SAMPLE_RATE: f32 = 44_100.0;

fn sine(frequency: f32, sample_rate: f32, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| (2.0 * PI * frequency * i as f32 / sample_rate).sin())
        .collect()
}

/// Deterministic uniform noise in [-1, 1] from a linear congruential generator.
fn noise(len: usize, seed: u32) -> Vec<f32> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0
        })
        .collect()
}

fn estimator(buffer_size: usize, method: DifferenceMethod) -> PitchEstimator {
    PitchEstimator::builder()
        .sample_rate(SAMPLE_RATE)
        .buffer_size(buffer_size)
        .difference(method)
        .build()
        .unwrap()
}

#[test]
fn test_sine_440() {
    for method in [DifferenceMethod::Direct, DifferenceMethod::Fft] {
        let mut yin = estimator(1024, method);
        let estimate = yin.estimate(&sine(440.0, SAMPLE_RATE, 1024)).unwrap();
        let frequency = estimate.frequency.expect("440 Hz should be detected");
        assert!((frequency - 440.0).abs() <= 2.0, "{method:?}: {frequency} Hz");
        assert!(estimate.confidence > 0.9, "{method:?}: {}", estimate.confidence);
        assert!(estimate.is_pitched());
    }
}

#[test]
fn test_sine_range() {
    let mut yin = estimator(2048, DifferenceMethod::Direct);
    for frequency in [110.0, 196.0, 261.63, 523.25, 1000.0, 1760.0] {
        let estimate = yin.estimate(&sine(frequency, SAMPLE_RATE, 2048)).unwrap();
        let detected = estimate.frequency.expect("tone should be detected");
        // within 10 cents
        let cents = 1200.0 * (detected / frequency).log2();
        assert!(cents.abs() < 10.0, "{frequency} Hz detected as {detected} Hz");
    }
}

#[test]
fn test_fft_matches_direct() {
    let mut direct = estimator(1024, DifferenceMethod::Direct);
    let mut fft = estimator(1024, DifferenceMethod::Fft);
    for frequency in [150.0, 330.0, 440.0, 987.0] {
        let frame = sine(frequency, SAMPLE_RATE, 1024);
        let a = direct.estimate(&frame).unwrap().frequency.unwrap();
        let b = fft.estimate(&frame).unwrap().frequency.unwrap();
        assert!((a - b).abs() < 0.5, "{frequency} Hz: direct {a}, fft {b}");
    }
}

#[test]
fn test_harmonic_tone_reports_fundamental() {
    let fundamental = 220.0;
    let frame: Vec<f32> = sine(fundamental, SAMPLE_RATE, 2048)
        .iter()
        .zip(sine(2.0 * fundamental, SAMPLE_RATE, 2048))
        .zip(sine(3.0 * fundamental, SAMPLE_RATE, 2048))
        .map(|((a, b), c)| 0.6 * a + 0.3 * b + 0.2 * c)
        .collect();
    let mut yin = estimator(2048, DifferenceMethod::Direct);
    let frequency = yin.estimate(&frame).unwrap().frequency.unwrap();
    assert!((frequency - fundamental).abs() < 2.0, "{frequency} Hz");
}

#[test]
fn test_inharmonic_two_tone_frame_is_unpitched() {
    let frame: Vec<f32> = sine(440.0, SAMPLE_RATE, 512)
        .iter()
        .zip(sine(617.0, SAMPLE_RATE, 512))
        .map(|(a, b)| 0.5 * a + 0.5 * b)
        .collect();

    // the best lag (near 210 Hz) only gets d' down to about 0.12
    let mut lenient = estimator(512, DifferenceMethod::Direct);
    assert!(lenient.estimate(&frame).unwrap().is_pitched());

    for method in [DifferenceMethod::Direct, DifferenceMethod::Fft] {
        let mut strict = PitchEstimator::builder()
            .sample_rate(SAMPLE_RATE)
            .buffer_size(512)
            .threshold(0.05)
            .difference(method)
            .build()
            .unwrap();
        let estimate = strict.estimate(&frame).unwrap();
        assert_eq!(estimate, PitchEstimate::UNPITCHED, "{method:?}");
    }
}

#[test]
fn test_silence_is_unpitched() {
    for method in [DifferenceMethod::Direct, DifferenceMethod::Fft] {
        let mut yin = estimator(1024, method);
        let estimate = yin.estimate(&[0.0; 1024]).unwrap();
        assert_eq!(estimate, PitchEstimate::UNPITCHED);
        assert!(!estimate.is_pitched());
        assert_eq!(estimate.confidence, 0.0);
    }
}

#[test]
fn test_noise_is_unpitched() {
    let mut yin = estimator(1024, DifferenceMethod::Direct);
    for seed in [1, 7, 42, 1234] {
        let estimate = yin.estimate(&noise(1024, seed)).unwrap();
        assert!(!estimate.is_pitched(), "seed {seed}: {estimate:?}");
    }
}

#[test]
fn test_constant_frame_is_unpitched() {
    let mut yin = estimator(512, DifferenceMethod::Direct);
    let estimate = yin.estimate(&[0.25; 512]).unwrap();
    assert!(!estimate.is_pitched());
}

#[test]
fn test_estimator_is_reusable() {
    let mut yin = estimator(1024, DifferenceMethod::Direct);
    let first = yin.estimate(&sine(440.0, SAMPLE_RATE, 1024)).unwrap();
    let _ = yin.estimate(&noise(1024, 3)).unwrap();
    let again = yin.estimate(&sine(440.0, SAMPLE_RATE, 1024)).unwrap();
    assert_eq!(first, again);
}

#[test]
fn test_frame_size_mismatch() {
    let mut yin = estimator(1024, DifferenceMethod::Direct);
    assert!(matches!(
        yin.estimate(&[0.0; 512]),
        Err(PitchError::InvalidFrameSize { expected: 1024, got: 512 })
    ));
}

#[test]
fn test_invalid_configuration() {
    assert!(PitchEstimator::builder().sample_rate(0.0).build().is_err());
    assert!(PitchEstimator::builder().sample_rate(f32::NAN).build().is_err());
    assert!(PitchEstimator::builder().buffer_size(3).build().is_err());
    assert!(PitchEstimator::builder().threshold(0.0).build().is_err());
    assert!(PitchEstimator::builder().threshold(1.5).build().is_err());
    assert!(matches!(
        PitchEstimator::builder().threshold(f32::NAN).build(),
        Err(PitchError::Configuration(_))
    ));
}

#[test]
fn test_defaults() {
    let yin = PitchEstimator::new(48_000.0).unwrap();
    assert_eq!(yin.sample_rate(), 48_000.0);
    assert_eq!(yin.buffer_size(), 1024);
    assert_eq!(yin.threshold(), 0.15);
    assert_eq!(yin.difference_method(), DifferenceMethod::Direct);
}
