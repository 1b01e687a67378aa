//! WAV file helpers on top of hound.

use std::path::Path;

use hound::{SampleFormat as WavSampleFormat, WavReader, WavSpec, WavWriter};

use crate::config::SampleFormat;

/// Downmix interleaved samples to mono.
///
/// # Arguments
/// * `data` - Interleaved samples
/// * `channels` - Number of channels (1 for mono, 2 for stereo)
///
/// # Returns
/// Vector of mono samples, one per frame
pub fn to_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        data.to_vec()
    } else {
        data.chunks(channels).map(|frame| frame.iter().sum::<f32>() / channels as f32).collect()
    }
}

/// Read a WAV file as mono `f32` samples in `[-1, 1]`.
///
/// # Returns
/// The samples and the file's sample rate
///
/// # Errors
/// Returns a hound error if the file cannot be opened or decoded.
pub fn read_mono(path: &Path) -> Result<(Vec<f32>, u32), hound::Error> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        WavSampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
        WavSampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader.into_samples::<i32>().map(|s| s.map(|v| v as f32 / scale)).collect::<Result<_, _>>()?
        }
    };

    Ok((to_mono(&interleaved, spec.channels as usize), spec.sample_rate))
}

/// Write mono samples as a WAV file, overwriting any existing file.
///
/// # Arguments
/// * `path` - Destination file
/// * `samples` - Mono samples in `[-1, 1]`; out of range values are clipped for PCM
/// * `sample_rate` - Sample rate of `samples`
/// * `format` - 16-bit PCM or 32-bit float
pub fn write(path: &Path, samples: &[f32], sample_rate: u32, format: SampleFormat) -> Result<(), hound::Error> {
    let spec = match format {
        SampleFormat::Pcm16 => WavSpec { channels: 1, sample_rate, bits_per_sample: 16, sample_format: WavSampleFormat::Int },
        SampleFormat::Float32 => WavSpec { channels: 1, sample_rate, bits_per_sample: 32, sample_format: WavSampleFormat::Float },
    };

    let mut writer = WavWriter::create(path, spec)?;
    match format {
        SampleFormat::Pcm16 => {
            for &s in samples {
                writer.write_sample(to_i16(s))?;
            }
        }
        SampleFormat::Float32 => {
            for &s in samples {
                writer.write_sample(s)?;
            }
        }
    }
    writer.finalize()
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}
