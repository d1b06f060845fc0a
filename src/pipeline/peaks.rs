/// Prominence-filtered local maxima
///
/// A local maximum is a sample (or flat run of samples) strictly higher than
/// both neighbours. Its prominence is the height above the higher of the two
/// bounding valleys, where each valley is the lowest point reached walking
/// outward until a strictly higher sample or the signal edge.

use serde::{Deserialize, Serialize};

use crate::data::export::InstrumentPeak;
use crate::data::segment::Peak;

/// Find peaks whose prominence is at least `threshold`.
///
/// A prominence equal to the threshold counts as a peak.
/// Flat maxima are reported at their first index. The first and last
/// samples are never peaks. Zero peaks is a valid result.
pub fn find_peaks(signal: &[f64], threshold: f64) -> Vec<Peak> {
    local_maxima(signal)
        .into_iter()
        .filter_map(|index| {
            let prominence = prominence(signal, index);
            (prominence >= threshold).then_some(Peak { index, prominence })
        })
        .collect()
}

fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut maxima = Vec::new();
    if x.len() < 3 {
        return maxima;
    }
    let last = x.len() - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            // skip over a plateau
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                maxima.push(i);
                i = ahead;
                continue;
            }
        }
        i += 1;
    }
    maxima
}

fn prominence(x: &[f64], peak: usize) -> f64 {
    let height = x[peak];

    let mut left_min = height;
    for &v in x[..peak].iter().rev() {
        if v > height {
            break;
        }
        left_min = left_min.min(v);
    }

    let mut right_min = height;
    for &v in &x[peak + 1..] {
        if v > height {
            break;
        }
        right_min = right_min.min(v);
    }

    height - left_min.max(right_min)
}

/// Instrument-reported peak temperature against the nearest extracted one
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakComparison {
    pub reported: f64,
    pub extracted: f64,
}

impl PeakComparison {
    pub fn difference(&self) -> f64 {
        self.extracted - self.reported
    }
}

/// Compare one instrument peak row with the peak temperatures extracted
/// from the same cycle. None if either side has nothing to compare.
pub fn cross_check(instrument: &InstrumentPeak, extracted: &[f64]) -> Option<PeakComparison> {
    let reported = instrument.temperature()?;
    let nearest = extracted
        .iter()
        .copied()
        .filter(|t| t.is_finite())
        .min_by(|a, b| (a - reported).abs().total_cmp(&(b - reported).abs()))?;
    Some(PeakComparison {
        reported,
        extracted: nearest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indices(peaks: &[Peak]) -> Vec<usize> {
        peaks.iter().map(|p| p.index).collect()
    }

    #[test]
    fn test_plateau_reports_first_index() {
        let mut x = vec![0.0; 20];
        for v in &mut x[7..12] {
            *v = 5.0;
        }
        let peaks = find_peaks(&x, 0.15);
        assert_eq!(indices(&peaks), vec![7]);
        assert!((peaks[0].prominence - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_flat_signal_has_no_peaks() {
        assert!(find_peaks(&[1.0; 10], 0.0).is_empty());
        assert!(find_peaks(&[], 0.15).is_empty());
        assert!(find_peaks(&[1.0, 2.0], 0.15).is_empty());
    }

    #[test]
    fn test_edges_are_not_peaks() {
        let x = [3.0, 1.0, 0.0, 1.0, 3.0];
        assert!(find_peaks(&x, 0.0).is_empty());
        // a plateau running into the edge is not a maximum either
        let x = [0.0, 1.0, 2.0, 2.0, 2.0];
        assert!(find_peaks(&x, 0.0).is_empty());
    }

    #[test]
    fn test_prominence_uses_higher_valley() {
        //            0    1    2    3    4    5    6    7    8
        let x = [0.0, 4.0, 1.0, 3.0, 2.0, 6.0, 0.5, 1.0, 0.0];
        let peaks = find_peaks(&x, 0.0);
        assert_eq!(indices(&peaks), vec![1, 3, 5, 7]);
        // peak at 1: left valley 0, right walk stops at 6.0 with min 1.0
        assert!((peaks[0].prominence - 3.0).abs() < 1e-12);
        // peak at 3: valleys 1.0 (left, stops at 4.0) and 2.0 (right)
        assert!((peaks[1].prominence - 1.0).abs() < 1e-12);
        // highest peak: both walks reach the edges
        assert!((peaks[2].prominence - 6.0).abs() < 1e-12);
        assert!((peaks[3].prominence - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let x = [0.0, 0.5, 0.0, 0.15, 0.0];
        assert_eq!(indices(&find_peaks(&x, 0.15)), vec![1, 3]);
        assert_eq!(indices(&find_peaks(&x, 0.2)), vec![1]);
    }

    #[test]
    fn test_cross_check_picks_nearest() {
        let row = InstrumentPeak {
            fields: ["1", "120.1", "45.2", "131.5"].iter().map(|s| s.to_string()).collect(),
        };
        let cmp = cross_check(&row, &[90.0, 130.0, 150.0]).unwrap();
        assert!((cmp.extracted - 130.0).abs() < 1e-12);
        assert!((cmp.difference() + 1.5).abs() < 1e-12);
        assert!(cross_check(&row, &[]).is_none());

        let short = InstrumentPeak {
            fields: vec!["1".to_string()],
        };
        assert!(cross_check(&short, &[130.0]).is_none());
    }
}
