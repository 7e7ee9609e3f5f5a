//! Output decimation
//!
//! Reduces an output series to at most `maxDataPoints` samples before it is
//! returned to the caller.
//!
//! - **Even**: first sample of each equally sized bucket
//! - **Peaks**: minimum and maximum of each bucket, in time order, so spikes
//!   survive the reduction (selected by the `IncludePeaks` modifier)

use crate::types::SeriesSample;

/// How output series are reduced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecimationMethod {
    /// Evenly spaced samples
    Even,
    /// Bucket minimum and maximum
    Peaks,
}

/// Reduce `samples` to at most `max_points`
///
/// Series already within the limit, and a limit of zero, leave the input
/// untouched.
pub fn decimate(
    samples: Vec<SeriesSample>,
    max_points: usize,
    method: DecimationMethod,
) -> Vec<SeriesSample> {
    if max_points == 0 || samples.len() <= max_points {
        return samples;
    }

    match method {
        DecimationMethod::Even => even(&samples, max_points),
        DecimationMethod::Peaks if max_points >= 2 => peaks(&samples, max_points / 2),
        DecimationMethod::Peaks => even(&samples, max_points),
    }
}

fn bucket_bounds(n: usize, buckets: usize, bucket: usize) -> (usize, usize) {
    (bucket * n / buckets, (bucket + 1) * n / buckets)
}

fn even(samples: &[SeriesSample], buckets: usize) -> Vec<SeriesSample> {
    let n = samples.len();
    (0..buckets)
        .map(|bucket| bucket_bounds(n, buckets, bucket).0)
        .filter(|&start| start < n)
        .map(|start| samples[start].clone())
        .collect()
}

fn peaks(samples: &[SeriesSample], buckets: usize) -> Vec<SeriesSample> {
    let n = samples.len();
    let mut result = Vec::with_capacity(buckets * 2);

    for bucket in 0..buckets {
        let (start, end) = bucket_bounds(n, buckets, bucket);
        if start >= end {
            continue;
        }

        let data = &samples[start..end];
        let mut min_idx = 0;
        let mut max_idx = 0;
        for (i, sample) in data.iter().enumerate() {
            if sample.value < data[min_idx].value {
                min_idx = i;
            }
            if sample.value > data[max_idx].value {
                max_idx = i;
            }
        }

        let (first, second) = if min_idx <= max_idx {
            (min_idx, max_idx)
        } else {
            (max_idx, min_idx)
        };
        result.push(data[first].clone());
        if second != first {
            result.push(data[second].clone());
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(n: usize) -> Vec<SeriesSample> {
        (0..n)
            .map(|i| SeriesSample::new("A", (i % 10) as f64, (i * 1000) as f64))
            .collect()
    }

    #[test]
    fn test_small_series_untouched() {
        let data = series(5);
        assert_eq!(decimate(data.clone(), 10, DecimationMethod::Even), data);
        assert_eq!(decimate(data.clone(), 0, DecimationMethod::Peaks), data);
    }

    #[test]
    fn test_even_decimation() {
        let out = decimate(series(100), 10, DecimationMethod::Even);
        assert_eq!(out.len(), 10);
        assert_eq!(out[0].time, 0.0);
        assert_eq!(out[1].time, 10_000.0);
    }

    #[test]
    fn test_peaks_keep_extremes() {
        let mut data = series(100);
        data[37].value = 1000.0;
        data[71].value = -1000.0;

        let out = decimate(data, 10, DecimationMethod::Peaks);
        assert!(out.len() <= 10);
        assert!(out.iter().any(|s| s.value == 1000.0));
        assert!(out.iter().any(|s| s.value == -1000.0));
        assert!(out.windows(2).all(|w| w[0].time <= w[1].time));
    }
}
