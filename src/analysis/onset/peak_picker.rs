use std::collections::VecDeque;

/// Numerator of the smoothing biquad applied to the window
const SMOOTH_B: [f64; 3] = [0.1600, 0.3200, 0.1600];
/// Denominator of the smoothing biquad (`a0` is 1)
const SMOOTH_A: [f64; 2] = [-0.5949, 0.2348];

/// Adaptive-threshold peak picker for onset detection functions
///
/// Keeps a sliding window of `pre + post + 1` values and smooths it with a
/// zero-phase low-pass (the same biquad run forward and backward). The
/// smoothed value at index `post` is thresholded against the smoothed
/// window's median and `threshold * mean`; a peak is reported when the
/// previous thresholded value is a strict local maximum above zero. Each
/// value carries a tag (typically its frame timestamp) that is handed back
/// with the peak, so callers don't have to track the look-ahead delay.
#[derive(Debug, Clone)]
pub struct PeakPicker<T: Copy> {
    pre: usize,
    post: usize,
    threshold: f64,
    window: VecDeque<(f64, Option<T>)>,
    thresholded: [(f64, Option<T>); 3],
}

impl<T: Copy> PeakPicker<T> {
    pub fn new(pre: usize, post: usize, threshold: f64) -> Self {
        let len = pre + post + 1;
        Self {
            pre,
            post,
            threshold,
            window: std::iter::repeat((0.0, None)).take(len).collect(),
            thresholded: [(0.0, None); 3],
        }
    }

    /// Number of pushes between a value entering and its peak being reported
    pub fn delay(&self) -> usize {
        self.pre + 1
    }

    /// Push the next ODF value; returns `(salience, tag)` of a confirmed peak
    pub fn push(&mut self, value: f64, tag: T) -> Option<(f64, T)> {
        self.push_inner(value, Some(tag))
    }

    /// Push trailing zeros so peaks near the end are confirmed
    pub fn flush(&mut self) -> Vec<(f64, T)> {
        (0..self.delay())
            .filter_map(|_| self.push_inner(0.0, None))
            .collect()
    }

    fn push_inner(&mut self, value: f64, tag: Option<T>) -> Option<(f64, T)> {
        self.window.pop_front();
        self.window.push_back((value, tag));

        let raw: Vec<f64> = self.window.iter().map(|(v, _)| *v).collect();
        let smoothed = filtfilt(&raw);
        let mean = smoothed.iter().sum::<f64>() / smoothed.len() as f64;
        let median = median(&smoothed);

        let level = smoothed[self.post] - median - self.threshold * mean;
        let candidate_tag = self.window[self.post].1;

        self.thresholded.rotate_left(1);
        self.thresholded[2] = (level, candidate_tag);

        let [(before, _), (middle, middle_tag), (after, _)] = self.thresholded;
        if middle > before && middle > after && middle > 0.0 {
            middle_tag.map(|tag| (middle, tag))
        } else {
            None
        }
    }
}

/// Second-order IIR section with zero initial state
fn biquad(values: &mut [f64]) {
    let (mut x1, mut x2, mut y1, mut y2) = (0.0, 0.0, 0.0, 0.0);
    for v in values.iter_mut() {
        let x = *v;
        let y = SMOOTH_B[0] * x + SMOOTH_B[1] * x1 + SMOOTH_B[2] * x2
            - SMOOTH_A[0] * y1
            - SMOOTH_A[1] * y2;
        x2 = x1;
        x1 = x;
        y2 = y1;
        y1 = y;
        *v = y;
    }
}

/// Forward-backward filtering, so peaks keep their position
fn filtfilt(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    biquad(&mut out);
    out.reverse();
    biquad(&mut out);
    out.reverse();
    out
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(values: &[f64]) -> Vec<(f64, usize)> {
        let mut picker = PeakPicker::new(1, 5, 0.3);
        let mut peaks: Vec<_> = values
            .iter()
            .enumerate()
            .filter_map(|(i, &v)| picker.push(v, i))
            .collect();
        peaks.extend(picker.flush());
        peaks
    }

    #[test]
    fn test_isolated_spike_is_found_with_its_tag() {
        let mut values = vec![0.0; 20];
        values[8] = 10.0;

        let peaks = run(&values);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].1, 8);
        assert!(peaks[0].0 > 0.0);
    }

    #[test]
    fn test_silence_has_no_peaks() {
        assert!(run(&[0.0; 30]).is_empty());
    }

    #[test]
    fn test_steady_level_only_peaks_while_window_fills() {
        // The zero-initialized window makes the first frames look like a rise
        let peaks = run(&[1.0; 30]);
        assert!(peaks.iter().all(|&(_, tag)| tag < 7), "peaks: {:?}", peaks);
    }

    #[test]
    fn test_each_spike_reports_once() {
        let mut values = vec![0.0; 30];
        values[5] = 10.0;
        values[15] = 10.0;

        let tags: Vec<usize> = run(&values).into_iter().map(|(_, tag)| tag).collect();
        assert_eq!(tags, vec![5, 15]);
    }

    #[test]
    fn test_spike_at_the_end_is_flushed() {
        let mut values = vec![0.0; 10];
        values[9] = 5.0;

        let peaks = run(&values);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].1, 9);
    }

    #[test]
    fn test_spike_on_first_frame() {
        let peaks = run(&[4.0, 0.0, 0.0, 0.0]);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].1, 0);
    }

    #[test]
    fn test_filtfilt_keeps_peak_position() {
        let smoothed = filtfilt(&[0.0, 0.0, 0.0, 6.0, 0.0, 0.0, 0.0]);
        let max_index = smoothed
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i);
        assert_eq!(max_index, Some(3));
        assert!(smoothed[3] < 6.0);
    }

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
    }
}
