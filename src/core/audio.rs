use std::{fs::File, path::Path};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use rubato::{InterpolationParameters, InterpolationType, Resampler, SincFixedIn, WindowFunction};
use symphonia::core::{
    audio::SampleBuffer, codecs::DecoderOptions, formats::FormatOptions, io::MediaSourceStream,
    meta::MetadataOptions, probe::Hint,
};
use symphonia::default::{get_codecs, get_probe};
use tracing::debug;

use crate::{
    error::{Result, StemError},
    types::AudioBuffer,
};

/// Decodes any container/codec symphonia was built with (wav, mp3).
pub fn read_audio<P: AsRef<Path>>(path: P) -> Result<AudioBuffer> {
    let path: &Path = path.as_ref();

    let file: File = File::open(path)
        .map_err(|e| StemError::Audio(format!("Failed to open audio file {:?}: {e}", path)))?;

    let mss: MediaSourceStream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint: Hint = Hint::new();

    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| StemError::Audio("No default track found".into()))?;

    let mut decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_rate: u32 = 0;
    let mut channels: u16 = 0;

    while let Ok(packet) = format.next_packet() {
        let decoded = decoder.decode(&packet)?;
        sample_rate = decoded.spec().rate;
        channels = decoded.spec().channels.count() as u16;

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        buffer.copy_interleaved_ref(decoded);

        samples.extend_from_slice(buffer.samples());
    }

    if channels == 0 || sample_rate == 0 {
        return Err(StemError::Audio(format!("No audio decoded from {:?}", path)));
    }

    debug!(
        sample_rate,
        channels,
        samples = samples.len(),
        "read audio from {}",
        path.display()
    );

    AudioBuffer::from_interleaved(&samples, channels, sample_rate)
}

/// 16-bit PCM export.
pub fn write_audio<P: AsRef<Path>>(path: P, audio: &AudioBuffer) -> Result<()> {
    let spec = WavSpec {
        channels: audio.channels() as u16,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for sample in audio.to_interleaved() {
        let s = (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        writer.write_sample(s)?;
    }

    writer.finalize()?;
    Ok(())
}

/// Lossless 32-bit float WAV, used to move buffers across the worker boundary.
pub fn write_wav_f32<P: AsRef<Path>>(path: P, audio: &AudioBuffer) -> Result<()> {
    let spec = WavSpec {
        channels: audio.channels() as u16,
        sample_rate: audio.sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for sample in audio.to_interleaved() {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Reads integer or float WAV into `[-1, 1]` floats.
pub fn read_wav<P: AsRef<Path>>(path: P) -> Result<AudioBuffer> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<_, _>>()?
        }
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
    };

    AudioBuffer::from_interleaved(&samples, spec.channels, spec.sample_rate)
}

/// Band-limited sample rate conversion of the whole buffer.
pub fn resample(audio: &AudioBuffer, target_rate: u32) -> Result<AudioBuffer> {
    if target_rate == 0 {
        return Err(StemError::Audio("target sample rate must be positive".into()));
    }
    if audio.sample_rate == target_rate || audio.is_empty() {
        return Ok(AudioBuffer::new(audio.samples.clone(), target_rate));
    }

    let params = InterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: InterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = target_rate as f64 / audio.sample_rate as f64;
    let mut resampler =
        SincFixedIn::<f32>::new(ratio, 2.0, params, audio.frames(), audio.channels())
            .map_err(|e| StemError::Audio(format!("resampler setup failed: {e}")))?;

    let waves_in: Vec<Vec<f32>> = audio.samples.outer_iter().map(|ch| ch.to_vec()).collect();
    let waves_out = resampler
        .process(&waves_in, None)
        .map_err(|e| StemError::Audio(format!("resampling failed: {e}")))?;

    let frames = waves_out.first().map(Vec::len).unwrap_or(0);
    let flat: Vec<f32> = waves_out.into_iter().flatten().collect();
    let samples = ndarray::Array2::from_shape_vec((audio.channels(), frames), flat)?;

    debug!(
        from = audio.sample_rate,
        to = target_rate,
        frames_in = audio.frames(),
        frames_out = frames,
        "resampled"
    );
    Ok(AudioBuffer::new(samples, target_rate))
}
