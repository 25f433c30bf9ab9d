//! Onset aggregation and octave correction
//!
//! Inter-onset intervals become tempo candidates (`60 / Δt`), candidates are
//! folded by doubling/halving into a plausible window, and the final tempo
//! is the most frequent candidate at 0.1 BPM resolution.

use crate::config::{Aggregation, AnalyzerConfig};

/// Window candidates are folded into
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TempoWindow {
    /// No reference: always fold into `[min, max]` (requires `max >= 2 * min`)
    Plausible { min: f64, max: f64 },
    /// Manual reference: fold toward `[reference - range/2, reference + range/2]`,
    /// discarding candidates that cannot land there
    Reference { reference: f64, range: f64 },
}

impl TempoWindow {
    /// Pick the window for a song, preferring a manual reference tempo
    pub fn for_song(config: &AnalyzerConfig, manual_bpm: Option<f64>) -> Self {
        match manual_bpm {
            Some(reference) if reference.is_finite() && reference > 0.0 => TempoWindow::Reference {
                reference,
                range: config.reliable_range,
            },
            _ => TempoWindow::Plausible {
                min: config.min_bpm,
                max: config.max_bpm,
            },
        }
    }

    fn bounds(&self) -> (f64, f64) {
        match *self {
            TempoWindow::Plausible { min, max } => (min, max),
            TempoWindow::Reference { reference, range } => {
                (reference - range / 2.0, reference + range / 2.0)
            }
        }
    }
}

/// Fold a candidate tempo into `window` by octave steps
///
/// Returns None for non-positive or non-finite input, and for candidates
/// that skip over a reference window.
pub fn fold_bpm(bpm: f64, window: TempoWindow) -> Option<f64> {
    if !bpm.is_finite() || bpm <= 0.0 {
        return None;
    }

    let (min, max) = window.bounds();
    let mut folded = bpm;
    if folded < min {
        while folded < min {
            folded *= 2.0;
        }
    } else if folded > max {
        while folded > max {
            folded /= 2.0;
        }
    }

    match window {
        TempoWindow::Plausible { .. } => Some(folded),
        TempoWindow::Reference { .. } => (min..=max).contains(&folded).then_some(folded),
    }
}

/// Tempo candidates from one sorted onset list
///
/// Every adjacent pair with a positive gap yields `60 / Δt`, folded into
/// `window`. Fewer than two onsets yields nothing.
pub fn candidates(onset_times: &[f64], window: TempoWindow) -> Vec<f64> {
    onset_times
        .windows(2)
        .filter_map(|pair| {
            let delta = pair[1] - pair[0];
            if !(delta > 0.0) || !delta.is_finite() {
                return None;
            }
            let raw = 60.0 / delta;
            let folded = fold_bpm(raw, window);
            log::trace!("Interval {:.4}s -> {:.2} BPM -> {:?}", delta, raw, folded);
            folded
        })
        .collect()
}

/// Round to one decimal place
pub fn round_tenth(bpm: f64) -> f64 {
    (bpm * 10.0).round() / 10.0
}

/// Most frequent candidate after rounding to 0.1 BPM
///
/// Ties go to the value seen first.
pub fn mode_bpm(candidates: &[f64]) -> Option<f64> {
    // (tenths, count) in first-seen order
    let mut counts: Vec<(i64, usize)> = Vec::new();
    for &bpm in candidates {
        let tenths = (bpm * 10.0).round() as i64;
        match counts.iter_mut().find(|(key, _)| *key == tenths) {
            Some((_, count)) => *count += 1,
            None => counts.push((tenths, 1)),
        }
    }

    let mut best: Option<(i64, usize)> = None;
    for (key, count) in counts {
        if best.map(|(_, c)| count > c).unwrap_or(true) {
            best = Some((key, count));
        }
    }
    best.map(|(key, _)| key as f64 / 10.0)
}

/// Median candidate, rounded to 0.1 BPM
pub fn median_bpm(candidates: &[f64]) -> Option<f64> {
    if candidates.is_empty() {
        return None;
    }
    let mut sorted = candidates.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };
    Some(round_tenth(median))
}

/// Outcome of aggregating both detectors' onsets
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    /// Final tempo, None when no candidate survived
    pub bpm: Option<f64>,
    /// Number of folded candidates the tempo was chosen from
    pub candidates: usize,
}

/// Combine the onset times of both detectors into a tempo estimate
pub fn aggregate(
    complex_times: &[f64],
    percussion_times: &[f64],
    window: TempoWindow,
    strategy: Aggregation,
) -> Aggregate {
    let mut complex = complex_times.to_vec();
    let mut percussion = percussion_times.to_vec();
    complex.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    percussion.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mut pooled = candidates(&complex, window);
    pooled.extend(candidates(&percussion, window));

    let bpm = match strategy {
        Aggregation::Mode => mode_bpm(&pooled),
        Aggregation::Median => median_bpm(&pooled),
    };

    log::debug!(
        "Aggregated {} candidates ({} complex onsets, {} percussion onsets) -> {:?}",
        pooled.len(),
        complex.len(),
        percussion.len(),
        bpm
    );

    Aggregate {
        bpm,
        candidates: pooled.len(),
    }
}
