use approx::assert_abs_diff_eq;
use ndarray::Array2;
use stem_splitter_core::{
    core::audio::{read_wav, write_wav_f32},
    read_audio, resample, write_audio, AudioBuffer,
};
use tempfile::tempdir;

fn tone(channels: usize, frames: usize, rate: u32) -> AudioBuffer {
    let samples = Array2::from_shape_fn((channels, frames), |(c, t)| {
        (2.0 * std::f32::consts::PI * 440.0 * t as f32 / rate as f32 + c as f32).sin() * 0.5
    });
    AudioBuffer::new(samples, rate)
}

#[test]
fn float_wav_roundtrip_is_exact() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    let audio = tone(2, 1_000, 44_100);
    write_wav_f32(&path, &audio).unwrap();
    assert_eq!(read_wav(&path).unwrap(), audio);
}

#[test]
fn pcm16_output_decodes_through_symphonia() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tone16.wav");
    let audio = tone(2, 4_410, 44_100);
    write_audio(&path, &audio).unwrap();

    let decoded = read_audio(&path).unwrap();
    assert_eq!(decoded.sample_rate, 44_100);
    assert_eq!(decoded.channels(), 2);
    assert_eq!(decoded.frames(), 4_410);
    for (a, b) in decoded.samples.iter().zip(audio.samples.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-3);
    }
}

#[test]
fn interleaving_roundtrip() {
    let audio = tone(3, 7, 8_000);
    let back = AudioBuffer::from_interleaved(&audio.to_interleaved(), 3, 8_000).unwrap();
    assert_eq!(back, audio);
    assert!(AudioBuffer::from_interleaved(&[0.0], 0, 8_000).is_err());
}

#[test]
fn resample_scales_length() {
    let audio = tone(2, 48_000, 48_000);
    let out = resample(&audio, 44_100).unwrap();
    assert_eq!(out.sample_rate, 44_100);
    assert_eq!(out.channels(), 2);
    let expected = 44_100f32;
    assert!((out.frames() as f32 - expected).abs() / expected < 0.01);
}

#[test]
fn resample_to_same_rate_is_identity() {
    let audio = tone(1, 100, 44_100);
    assert_eq!(resample(&audio, 44_100).unwrap(), audio);
}
