// Sample-format conversions shared by capture backends and playback outputs
//
// Devices and files rarely deliver exactly 16kHz mono, and speakers rarely
// run at the 24kHz the service produces, so every edge of the pipeline
// funnels through these helpers.

/// Average interleaved channels down to mono
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Duplicate mono samples into `channels` interleaved channels
pub fn upmix_from_mono(samples: &[f32], channels: u16, out: &mut [f32]) {
    let channels = channels.max(1) as usize;
    for (frame, &sample) in out.chunks_mut(channels).zip(samples.iter()) {
        for slot in frame.iter_mut() {
            *slot = sample;
        }
    }
}

/// Linear-interpolation resampler
///
/// Good enough for speech; not intended for music.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            if idx >= last {
                return samples[last];
            }
            let frac = (pos - idx as f64) as f32;
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        })
        .collect()
}

/// Convert i16 PCM to normalized floats
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_stereo() {
        let mono = downmix_to_mono(&[0.2, 0.4, -1.0, 1.0], 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!(mono[1].abs() < 1e-6);
    }

    #[test]
    fn test_downmix_mono_is_identity() {
        assert_eq!(downmix_to_mono(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }

    #[test]
    fn test_upmix() {
        let mut out = vec![0.0; 6];
        upmix_from_mono(&[0.1, 0.2, 0.3], 2, &mut out);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
    }

    #[test]
    fn test_resample_48k_to_16k_length() {
        let input = vec![0.5; 4800];
        let output = resample(&input, 48000, 16000);
        assert_eq!(output.len(), 1600);
        assert!(output.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_resample_24k_to_48k_interpolates() {
        let output = resample(&[0.0, 1.0], 24000, 48000);
        assert_eq!(output.len(), 4);
        assert!((output[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_resample_same_rate() {
        assert_eq!(resample(&[0.1, 0.2], 16000, 16000), vec![0.1, 0.2]);
    }
}
