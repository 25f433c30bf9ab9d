//! Export of the low-passed signal the detectors work on

use super::decoder::decode_mono;
use super::filter::LowPassFilter;
use crate::config::AnalyzerConfig;
use crate::scheduler::CancelToken;
use anyhow::{Context, Result};
use std::path::Path;

/// Decode `input`, apply the analysis low-pass and write 16-bit mono WAV
///
/// Returns the number of samples written.
pub fn export_filtered_audio(
    input: &Path,
    output: &Path,
    config: &AnalyzerConfig,
) -> Result<usize> {
    log::info!("Exporting filtered audio {:?} -> {:?}", input, output);

    let cancel = CancelToken::new();
    let mut samples = decode_mono(input, config.sample_rate, config.max_duration_secs, &cancel)?
        .context("Decoding was cancelled")?;

    LowPassFilter::new(config.low_pass_hz, config.sample_rate as f32).process(&mut samples);

    write_wav(output, &samples, config.sample_rate)?;

    log::info!(
        "Wrote {} samples ({:.1}s) to {:?}",
        samples.len(),
        samples.len() as f32 / config.sample_rate as f32,
        output
    );
    Ok(samples.len())
}

fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create WAV file: {:?}", path))?;

    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer
            .write_sample(value)
            .with_context(|| format!("Failed to write WAV data: {:?}", path))?;
    }

    writer
        .finalize()
        .with_context(|| format!("Failed to finalize WAV file: {:?}", path))?;
    Ok(())
}
