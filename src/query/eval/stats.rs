//! Reducers and selectors over sample sets
//!
//! Scalar reducers consume an iterator and return at most one sample.
//! Selectors work on a materialized slice because they need its length or
//! a sorted copy.

use crate::types::SeriesSample;
use rand::seq::SliceRandom;
use std::cmp::Ordering;
use std::collections::HashMap;

fn by_value(a: &SeriesSample, b: &SeriesSample) -> Ordering {
    a.value.partial_cmp(&b.value).unwrap_or(Ordering::Equal)
}

// ============================================================================
// Scalar reducers
// ============================================================================

/// Mean value, stamped with the last sample
pub fn average<I: Iterator<Item = SeriesSample>>(samples: I) -> Option<SeriesSample> {
    let mut sum = 0.0;
    let mut count = 0usize;
    let mut last = None;
    for sample in samples {
        sum += sample.value;
        count += 1;
        last = Some(sample);
    }
    last.map(|s| s.with_value(sum / count as f64))
}

/// Sum of values, stamped with the last sample
pub fn total<I: Iterator<Item = SeriesSample>>(samples: I) -> Option<SeriesSample> {
    let mut sum = 0.0;
    let mut last = None;
    for sample in samples {
        sum += sample.value;
        last = Some(sample);
    }
    last.map(|s| s.with_value(sum))
}

/// Number of samples, stamped with the last sample
pub fn count<I: Iterator<Item = SeriesSample>>(samples: I) -> Option<SeriesSample> {
    let mut n = 0usize;
    let mut last = None;
    for sample in samples {
        n += 1;
        last = Some(sample);
    }
    last.map(|s| s.with_value(n as f64))
}

/// Smallest sample; the first one wins ties
pub fn minimum<I: Iterator<Item = SeriesSample>>(samples: I) -> Option<SeriesSample> {
    samples.filter(|s| s.time > 0.0).fold(None, |best, s| match best {
        Some(b) if s.value < b.value => Some(s),
        Some(b) => Some(b),
        None => Some(s),
    })
}

/// Largest sample; the first one wins ties
pub fn maximum<I: Iterator<Item = SeriesSample>>(samples: I) -> Option<SeriesSample> {
    samples.filter(|s| s.time > 0.0).fold(None, |best, s| match best {
        Some(b) if s.value > b.value => Some(s),
        Some(b) => Some(b),
        None => Some(s),
    })
}

/// Spread between largest and smallest, stamped with the largest sample
pub fn range<I: Iterator<Item = SeriesSample>>(samples: I) -> Option<SeriesSample> {
    let mut min: Option<f64> = None;
    let mut max: Option<SeriesSample> = None;

    for sample in samples.filter(|s| s.time > 0.0) {
        if min.map_or(true, |m| sample.value < m) {
            min = Some(sample.value);
        }
        if max.as_ref().map_or(true, |m| sample.value > m.value) {
            max = Some(sample);
        }
    }

    let min = min?;
    max.map(|m| {
        let spread = m.value - min;
        m.with_value(spread)
    })
}

/// Time-weighted running sum, `value * elapsed` with elapsed in `unit_seconds`
pub fn time_integration<I: Iterator<Item = SeriesSample>>(
    samples: I,
    unit_seconds: f64,
) -> Option<SeriesSample> {
    let mut sum = 0.0;
    let mut last: Option<SeriesSample> = None;
    for sample in samples {
        if let Some(prev) = &last {
            sum += sample.value * ((sample.time - prev.time) / 1000.0) / unit_seconds;
        }
        last = Some(sample);
    }
    last.map(|s| s.with_value(sum))
}

// ============================================================================
// Array reducers
// ============================================================================

/// Population (or sample, `n - 1`) standard deviation
pub fn standard_deviation(values: &[SeriesSample], sample_calc: bool) -> Option<SeriesSample> {
    let last = values.last()?;
    let n = values.len() as f64;
    let mean = values.iter().map(|s| s.value).sum::<f64>() / n;
    let squares: f64 = values.iter().map(|s| (s.value - mean).powi(2)).sum();

    let divisor = if sample_calc { n - 1.0 } else { n };
    let deviation = if divisor > 0.0 {
        (squares / divisor).sqrt()
    } else {
        0.0
    };
    Some(last.with_value(deviation))
}

/// Middle sample by value; even counts average the two middle values
pub fn median(mut values: Vec<SeriesSample>) -> Option<SeriesSample> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(by_value);

    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        return Some(values.swap_remove(mid));
    }
    let lower = values[mid - 1].value;
    let upper = &values[mid];
    Some(upper.with_value((lower + upper.value) / 2.0))
}

/// Most frequent value, stamped with the last sample
pub fn mode(values: &[SeriesSample]) -> Option<SeriesSample> {
    let last = values.last()?;
    let mut counts: HashMap<u64, usize> = HashMap::new();
    let mut best = (values[0].value, 0usize);

    for sample in values {
        let seen = counts.entry(sample.value.to_bits()).or_insert(0);
        *seen += 1;
        if *seen > best.1 {
            best = (sample.value, *seen);
        }
    }
    Some(last.with_value(best.0))
}

/// Linear-interpolated percentile, `percent` in `[0, 100]`
///
/// 0 and 100 return the smallest and largest samples unmodified.
pub fn percentile(mut values: Vec<SeriesSample>, percent: f64) -> Option<SeriesSample> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(by_value);

    if percent <= 0.0 {
        return values.into_iter().next();
    }
    if percent >= 100.0 || values.len() == 1 {
        return values.pop();
    }

    let n = (values.len() - 1) as f64 * (percent / 100.0) + 1.0;
    let k = n as usize;
    let d = n - k as f64;
    let k0 = values[k - 1].value;
    let k1 = &values[k];
    Some(k1.with_value(k0 + d * (k1.value - k0)))
}

// ============================================================================
// Selectors
// ============================================================================

/// First sample of each distinct value, in input order
pub fn distinct(values: &[SeriesSample]) -> Vec<SeriesSample> {
    let mut seen = std::collections::HashSet::new();
    values
        .iter()
        .filter(|s| seen.insert(s.value.to_bits()))
        .cloned()
        .collect()
}

/// Largest `count` samples, descending
pub fn top(values: &[SeriesSample], count: usize, normalize: bool) -> Vec<SeriesSample> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| by_value(b, a));
    select(values, sorted, count, normalize)
}

/// Smallest `count` samples, ascending
pub fn bottom(values: &[SeriesSample], count: usize, normalize: bool) -> Vec<SeriesSample> {
    let mut sorted = values.to_vec();
    sorted.sort_by(by_value);
    select(values, sorted, count, normalize)
}

/// `count` samples in random order
pub fn random(values: &[SeriesSample], count: usize, normalize: bool) -> Vec<SeriesSample> {
    let mut shuffled = values.to_vec();
    shuffled.shuffle(&mut rand::rng());
    select(values, shuffled, count, normalize)
}

/// First `count` samples in input order
pub fn first(values: &[SeriesSample], count: usize) -> Vec<SeriesSample> {
    values.iter().take(count).cloned().collect()
}

/// Last `count` samples, newest first
pub fn last(values: &[SeriesSample], count: usize) -> Vec<SeriesSample> {
    values.iter().rev().take(count).cloned().collect()
}

/// Take `count` of `ordered`, optionally re-timed onto an even axis
/// spanning the first to last time of `original`
fn select(
    original: &[SeriesSample],
    ordered: Vec<SeriesSample>,
    count: usize,
    normalize: bool,
) -> Vec<SeriesSample> {
    let count = count.min(ordered.len());
    let (Some(head), Some(tail)) = (original.first(), original.last()) else {
        return Vec::new();
    };

    let base = head.time;
    let step = (tail.time - base) / count.saturating_sub(1).max(1) as f64;

    ordered
        .into_iter()
        .take(count)
        .enumerate()
        .map(|(i, s)| {
            if normalize {
                s.with_time(base + i as f64 * step)
            } else {
                s
            }
        })
        .collect()
}
