//! Time-Slice Scanner
//!
//! Merges several time-ordered sample iterators into successive aligned
//! slices. Each slice starts at the earliest pending sample across all
//! inputs and takes every pending sample no later than that time plus the
//! tolerance.
//!
//! ```text
//!   series A:  1000      2000      3000
//!   series B:   1010      2005          3100
//!   tolerance 20:
//!     slice 1 = {A@1000, B@1010}
//!     slice 2 = {A@2000, B@2005}
//!     slice 3 = {A@3000}
//!     slice 4 = {B@3100}
//! ```
//!
//! Inputs are pulled one sample at a time, so the scanner works over
//! unbounded streams.

use crate::types::{SampleIter, SeriesGroup, SeriesKey, SeriesSample};
use std::collections::HashMap;
use std::iter::Peekable;

/// Aligns multiple sample iterators by time
pub struct TimeSliceScanner {
    iterators: Vec<Peekable<SampleIter>>,
    tolerance: f64,
}

impl TimeSliceScanner {
    /// Create a scanner over independent time-ordered iterators
    ///
    /// `tolerance` is in the same unit as sample times (milliseconds).
    pub fn new(sources: Vec<SampleIter>, tolerance: f64) -> Self {
        let mut iterators: Vec<Peekable<SampleIter>> =
            sources.into_iter().map(Iterator::peekable).collect();
        iterators.retain_mut(|it| it.peek().is_some());

        Self {
            iterators,
            tolerance: tolerance.max(0.0),
        }
    }

    /// Scanner over the samples of each group
    pub fn from_groups(groups: &[SeriesGroup], tolerance: f64) -> Self {
        Self::new(groups.iter().map(|g| g.samples.iter()).collect(), tolerance)
    }

    /// True once every input is exhausted
    pub fn data_read_complete(&self) -> bool {
        self.iterators.is_empty()
    }

    /// Number of inputs that still have samples
    pub fn active_inputs(&self) -> usize {
        self.iterators.len()
    }

    /// Read the next aligned slice
    ///
    /// With `collapse_duplicates`, each input keeps contributing while its
    /// samples stay inside the window and only the last sample per series
    /// key is kept. Otherwise each input contributes at most one sample.
    /// Returns an empty slice once all inputs are exhausted.
    pub fn read_next_time_slice(&mut self, collapse_duplicates: bool) -> Vec<SeriesSample> {
        let min_time = self
            .iterators
            .iter_mut()
            .filter_map(|it| it.peek().map(|s| s.time))
            .fold(f64::INFINITY, f64::min);

        if !min_time.is_finite() {
            self.iterators.clear();
            return Vec::new();
        }

        let publish_time = min_time + self.tolerance;
        let mut slice: Vec<SeriesSample> = Vec::with_capacity(self.iterators.len());
        let mut positions: HashMap<SeriesKey, usize> = HashMap::new();
        let mut exhausted = Vec::new();

        for (i, it) in self.iterators.iter_mut().enumerate() {
            while let Some(sample) = it.next_if(|s| s.time <= publish_time) {
                if collapse_duplicates {
                    match positions.get(&sample.key) {
                        Some(&pos) => slice[pos] = sample,
                        None => {
                            positions.insert(sample.key.clone(), slice.len());
                            slice.push(sample);
                        }
                    }
                } else {
                    slice.push(sample);
                    break;
                }
            }

            if it.peek().is_none() {
                exhausted.push(i);
            }
        }

        // Highest index first keeps the remaining indexes valid
        for i in exhausted.into_iter().rev() {
            self.iterators.remove(i);
        }

        slice
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn series(key: &str, points: &[(f64, f64)]) -> SampleIter {
        let samples: Vec<SeriesSample> = points
            .iter()
            .map(|&(v, t)| SeriesSample::new(key, v, t))
            .collect();
        Box::new(samples.into_iter())
    }

    #[test]
    fn test_slices_align_within_tolerance() {
        let mut scanner = TimeSliceScanner::new(
            vec![
                series("A", &[(1.0, 1000.0), (2.0, 2000.0), (3.0, 3000.0)]),
                series("B", &[(10.0, 1010.0), (20.0, 2005.0), (30.0, 3100.0)]),
            ],
            20.0,
        );

        let mut slices = Vec::new();
        while !scanner.data_read_complete() {
            slices.push(scanner.read_next_time_slice(true));
        }

        let times: Vec<Vec<f64>> = slices
            .iter()
            .map(|s| s.iter().map(|x| x.time).collect())
            .collect();
        assert_eq!(
            times,
            vec![
                vec![1000.0, 1010.0],
                vec![2000.0, 2005.0],
                vec![3000.0],
                vec![3100.0],
            ]
        );
    }

    #[test]
    fn test_collapse_keeps_last_duplicate() {
        let mut scanner = TimeSliceScanner::new(
            vec![series("A", &[(1.0, 1000.0), (2.0, 1000.0), (3.0, 1000.0), (4.0, 2000.0)])],
            0.0,
        );

        let first = scanner.read_next_time_slice(true);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].value, 3.0);

        let second = scanner.read_next_time_slice(true);
        assert_eq!(second[0].value, 4.0);
        assert!(scanner.data_read_complete());
    }

    #[test]
    fn test_pass_through_keeps_every_sample() {
        let mut scanner = TimeSliceScanner::new(
            vec![series("A", &[(1.0, 1000.0), (2.0, 1000.0)])],
            0.0,
        );
        assert_eq!(scanner.read_next_time_slice(false).len(), 1);
        assert_eq!(scanner.read_next_time_slice(false).len(), 1);
        assert!(scanner.data_read_complete());
    }

    #[test]
    fn test_empty_inputs_are_dropped() {
        let scanner = TimeSliceScanner::new(vec![series("A", &[]), series("B", &[])], 0.0);
        assert!(scanner.data_read_complete());
        assert_eq!(scanner.active_inputs(), 0);
    }

    #[test]
    fn test_exhausted_inputs_leave_pool() {
        let mut scanner = TimeSliceScanner::new(
            vec![
                series("A", &[(1.0, 1000.0)]),
                series("B", &[(1.0, 1000.0), (2.0, 2000.0)]),
                series("C", &[(1.0, 1000.0)]),
            ],
            0.0,
        );
        assert_eq!(scanner.read_next_time_slice(true).len(), 3);
        assert_eq!(scanner.active_inputs(), 1);
        let last = scanner.read_next_time_slice(true);
        assert_eq!(last[0].key.as_str(), "B");
    }

    proptest! {
        #[test]
        fn prop_zero_tolerance_emits_every_sample(n in 1usize..6, m in 1usize..20) {
            let sources: Vec<SampleIter> = (0..n)
                .map(|i| {
                    let points: Vec<(f64, f64)> =
                        (0..m).map(|j| (j as f64, (j * 1000) as f64)).collect();
                    series(&format!("S{}", i), &points)
                })
                .collect();

            let mut scanner = TimeSliceScanner::new(sources, 0.0);
            let mut total = 0;
            let mut slices = 0;
            while !scanner.data_read_complete() {
                total += scanner.read_next_time_slice(false).len();
                slices += 1;
            }
            prop_assert_eq!(total, n * m);
            prop_assert_eq!(slices, m);
        }
    }
}
