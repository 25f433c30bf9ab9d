//! Audio source adapter
//!
//! Decodes a file into mono PCM at the analysis rate and cuts it into
//! overlapping fixed-size frames.

use crate::scheduler::CancelToken;
use anyhow::{Context, Result};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Decode an audio file to mono f32 samples at `target_rate`
///
/// Returns `Ok(None)` when `cancel` fires while decoding. Open, probe and
/// decoder-creation failures are errors; individual bad packets are skipped.
pub fn decode_mono(
    path: &Path,
    target_rate: u32,
    max_duration_secs: Option<f32>,
    cancel: &CancelToken,
) -> Result<Option<Vec<f32>>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open audio file: {:?}", path))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension() {
        hint.with_extension(ext.to_str().unwrap_or(""));
    }

    let format_opts = FormatOptions::default();
    let metadata_opts = MetadataOptions::default();

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &format_opts, &metadata_opts)
        .with_context(|| format!("Failed to probe audio format: {:?}", path))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .context("No audio track found")?;

    let track_id = track.id;
    let source_rate = track
        .codec_params
        .sample_rate
        .context("No sample rate in audio track")?;

    let dec_opts = DecoderOptions::default();
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &dec_opts)
        .context("Failed to create audio decoder")?;

    let max_samples = max_duration_secs.map(|secs| (secs * source_rate as f32) as usize);
    let mut all_samples: Vec<f32> = Vec::new();

    loop {
        if cancel.is_cancelled() {
            log::debug!("Decoding cancelled: {:?}", path);
            return Ok(None);
        }

        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                log::warn!("Error reading packet: {:?}", e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("Error decoding packet: {:?}", e);
                continue;
            }
        };

        let spec = *decoded.spec();
        let duration = decoded.capacity() as u64;

        let mut sample_buf = SampleBuffer::<f32>::new(duration, spec);
        sample_buf.copy_interleaved_ref(decoded);

        let samples = sample_buf.samples();

        let channels = spec.channels.count();
        if channels > 1 {
            for chunk in samples.chunks(channels) {
                let mono: f32 = chunk.iter().sum::<f32>() / channels as f32;
                all_samples.push(mono);
            }
        } else {
            all_samples.extend_from_slice(samples);
        }

        if let Some(max) = max_samples {
            if all_samples.len() >= max {
                all_samples.truncate(max);
                break;
            }
        }
    }

    log::debug!(
        "Decoded {} samples ({:.1}s) at {}Hz from {:?}",
        all_samples.len(),
        all_samples.len() as f32 / source_rate as f32,
        source_rate,
        path
    );

    if source_rate != target_rate {
        all_samples = resample_linear(&all_samples, source_rate, target_rate);
    }

    Ok(Some(all_samples))
}

/// Linear-interpolation resampling
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = (src_pos - idx as f64) as f32;

        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        } else if idx < samples.len() {
            samples[idx]
        } else {
            0.0
        };
        output.push(sample);
    }

    output
}

/// Overlapping analysis frames over a sample buffer
///
/// Yields `(start_seconds, frame)` pairs. The last frame is zero-padded to
/// the full size so every frame has `size` samples.
pub struct Frames<'a> {
    samples: &'a [f32],
    size: usize,
    hop: usize,
    sample_rate: f64,
    position: usize,
    scratch: Vec<f32>,
}

impl<'a> Frames<'a> {
    pub fn new(samples: &'a [f32], size: usize, hop: usize, sample_rate: u32) -> Self {
        Self {
            samples,
            size,
            hop: hop.max(1),
            sample_rate: sample_rate as f64,
            position: 0,
            scratch: vec![0.0; size],
        }
    }

    /// Next frame, borrowing the internal buffer
    pub fn next_frame(&mut self) -> Option<(f64, &[f32])> {
        if self.position >= self.samples.len() {
            return None;
        }

        let start = self.position;
        let end = (start + self.size).min(self.samples.len());
        let available = end - start;

        self.scratch[..available].copy_from_slice(&self.samples[start..end]);
        self.scratch[available..].fill(0.0);

        // Once a frame reaches the end of the buffer, stop
        self.position = if end == self.samples.len() {
            self.samples.len()
        } else {
            start + self.hop
        };

        Some((start as f64 / self.sample_rate, &self.scratch))
    }
}
