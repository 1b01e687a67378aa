//! Sample rate conversion for synthesized clips using the rubato FFT resampler.

use anyhow::{Context, Result, bail};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{Fft, FixedSync, Resampler};

/// Chunk size for FFT-based resampling (provides good quality and performance).
const CHUNK_SIZE: usize = 1024;

/// Number of sub-chunks for FFT processing (higher = better quality but more CPU).
const SUB_CHUNKS: usize = 2;

/// Number of samples `len` input samples occupy at the target rate.
pub fn output_len(len: usize, from_rate: u32, to_rate: u32) -> usize {
    if from_rate == 0 {
        return 0;
    }
    ((len as u64 * to_rate as u64 + from_rate as u64 / 2) / from_rate as u64) as usize
}

/// Resample a whole mono clip from one sample rate to another.
///
/// The result always holds exactly [`output_len`] samples, aligned with the input: the
/// resampler's output delay is dropped from the front, the final partial chunk is zero padded,
/// and silent chunks are fed until the delayed tail has been produced.
///
/// # Arguments
/// * `samples` - Mono input samples
/// * `from_rate` - Input sample rate (e.g., 24000 for Kokoro)
/// * `to_rate` - Output sample rate (e.g., 16000)
///
/// # Errors
/// Returns an error if the resampler rejects the rates or fails while processing.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = Fft::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, SUB_CHUNKS, 1, FixedSync::Input)
        .with_context(|| format!("Failed to create resampler for {} Hz -> {} Hz", from_rate, to_rate))?;

    let output_frames_max = resampler.output_frames_max();
    let mut output_buffer = vec![0.0f32; output_frames_max];

    let expected = output_len(samples.len(), from_rate, to_rate);
    let delay = resampler.output_delay();
    let needed = expected + delay;
    let mut output = Vec::with_capacity(needed + output_frames_max);
    let mut chunk = vec![0.0f32; CHUNK_SIZE];

    // Bound on the silent chunks needed to flush the delay
    let max_chunks = samples.len().div_ceil(CHUNK_SIZE) + delay + 2;
    let mut i = 0usize;
    while output.len() < needed {
        if i >= max_chunks {
            bail!("Resampler produced {} of {} frames after {} chunks", output.len(), needed, i);
        }
        let pos = i * CHUNK_SIZE;
        chunk.fill(0.0);
        if pos < samples.len() {
            let end = (pos + CHUNK_SIZE).min(samples.len());
            chunk[..end - pos].copy_from_slice(&samples[pos..end]);
        }

        let input_adapter = InterleavedSlice::new(&chunk, 1, CHUNK_SIZE).context("Failed to create input adapter")?;
        let mut output_adapter = InterleavedSlice::new_mut(&mut output_buffer, 1, output_frames_max).context("Failed to create output adapter")?;

        let (_, frames_written) = resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, None)
            .with_context(|| format!("Resampling failed at chunk {}", i))?;
        output.extend_from_slice(&output_buffer[..frames_written]);
        i += 1;
    }

    output.drain(..delay.min(output.len()));
    output.truncate(expected);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_len() {
        assert_eq!(output_len(24000, 24000, 16000), 16000);
        assert_eq!(output_len(16000, 16000, 48000), 48000);
        assert_eq!(output_len(3, 24000, 16000), 2);
        assert_eq!(output_len(10, 0, 16000), 0);
    }

    #[test]
    fn test_same_rate_is_identity() {
        let samples = vec![0.1, -0.2, 0.3];
        assert_eq!(resample(&samples, 22050, 22050).unwrap(), samples);
    }

    #[test]
    fn test_resample_upsampling() {
        let samples = vec![0.0; 16000]; // 1 second at 16kHz
        assert_eq!(resample(&samples, 16000, 48000).unwrap().len(), 48000);
    }

    #[test]
    fn test_resample_downsampling() {
        let samples = vec![0.0; 24000 + 100];
        assert_eq!(resample(&samples, 24000, 16000).unwrap().len(), output_len(24100, 24000, 16000));
    }

    #[test]
    fn test_short_clip_keeps_energy() {
        // 440 Hz tone, 0.1 s at 24kHz
        let samples: Vec<f32> = (0..2400).map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / 24000.0).sin() * 0.5).collect();
        let out = resample(&samples, 24000, 16000).unwrap();
        assert_eq!(out.len(), 1600);
        assert!(out.iter().any(|s| s.abs() > 0.1));
    }

    fn peak(samples: &[f32]) -> usize {
        samples.iter().enumerate().max_by(|a, b| a.1.abs().total_cmp(&b.1.abs())).map(|(i, _)| i).unwrap()
    }

    #[test]
    fn test_output_is_time_aligned() {
        // Impulse half way through one second: it must stay half way through
        let mut samples = vec![0.0f32; 24000];
        samples[12000] = 1.0;
        let down = resample(&samples, 24000, 16000).unwrap();
        assert_eq!(down.len(), 16000);
        assert!(peak(&down).abs_diff(8000) <= 2, "peak at {}", peak(&down));

        let mut samples = vec![0.0f32; 16000];
        samples[4000] = 1.0;
        let up = resample(&samples, 16000, 48000).unwrap();
        assert!(peak(&up).abs_diff(12000) <= 3, "peak at {}", peak(&up));
    }

    #[test]
    fn test_clip_end_is_kept() {
        // Tone in the last 10 ms only; it must survive the trim
        let mut samples = vec![0.0f32; 2400];
        for (i, s) in samples[2160..].iter_mut().enumerate() {
            *s = (i as f32 * 440.0 * std::f32::consts::TAU / 24000.0).sin() * 0.5;
        }
        let out = resample(&samples, 24000, 16000).unwrap();
        assert_eq!(out.len(), 1600);
        assert!(out[1450..].iter().any(|s| s.abs() > 0.1));
    }
}
