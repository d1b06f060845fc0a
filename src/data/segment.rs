use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Column layout of the exported data table
pub const TIME_COLUMN: usize = 0;
pub const TEMPERATURE_COLUMN: usize = 1;
pub const SIGNAL_COLUMN: usize = 2;

/// Position of a file within a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileId(pub usize);

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Numeric channel table, row-major. Every row has `width` values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub width: usize,
    pub rows: Vec<Vec<f64>>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Copy one column out of the table. Rows too short yield NaN.
    pub fn column(&self, index: usize) -> Vec<f64> {
        column_of(&self.rows, index)
    }

    /// Rows of `block` whose elapsed time lies in `region` (`left <= t < right`)
    pub fn select(&self, block: Range<usize>, region: &Region) -> Vec<Vec<f64>> {
        let end = block.end.min(self.rows.len());
        let start = block.start.min(end);
        self.rows[start..end]
            .iter()
            .filter(|row| row.get(TIME_COLUMN).is_some_and(|&t| region.contains(t)))
            .cloned()
            .collect()
    }
}

fn column_of(rows: &[Vec<f64>], index: usize) -> Vec<f64> {
    rows.iter()
        .map(|row| row.get(index).copied().unwrap_or(f64::NAN))
        .collect()
}

/// Half-open elapsed-time window `[left, right)` in minutes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub left: f64,
    pub right: f64,
}

impl Region {
    pub fn new(left: f64, right: f64) -> Self {
        Self { left, right }
    }

    pub fn contains(&self, t: f64) -> bool {
        self.left <= t && t < self.right
    }

    /// A window with `left >= right` can hold no rows
    pub fn is_empty(&self) -> bool {
        !(self.left < self.right)
    }

    pub fn overlaps(&self, other: &Region) -> bool {
        !self.is_empty() && !other.is_empty() && self.left < other.right && other.left < self.right
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:.3}, {:.3}) min", self.left, self.right)
    }
}

/// A detected peak: sample index within its segment and topographic prominence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub index: usize,
    pub prominence: f64,
}

/// Result of baseline estimation on one segment's signal.
///
/// `corrected` and `baseline` are in the orientation used for estimation:
/// if the input had a negative mean it was sign-flipped first and `flipped`
/// is set, so peaks always point upward in `corrected`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectedSignal {
    pub corrected: Vec<f64>,
    pub baseline: Vec<f64>,
    pub flipped: bool,
}

impl CorrectedSignal {
    /// Corrected signal in the sign of the original input
    pub fn restored(&self) -> Vec<f64> {
        if self.flipped {
            self.corrected.iter().map(|v| -v).collect()
        } else {
            self.corrected.clone()
        }
    }

    /// Largest absolute baseline value
    pub fn baseline_max_abs(&self) -> f64 {
        self.baseline.iter().map(|v| v.abs()).fold(0.0f64, f64::max)
    }
}

/// The rows of one file that fall inside one cycle's Region
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub file_id: FileId,
    /// Sample name (source file stem)
    pub sample: String,
    /// 1-based cycle index
    pub cycle: usize,
    pub region: Region,
    pub rows: Vec<Vec<f64>>,
    /// Set when baseline correction ran and succeeded
    pub correction: Option<CorrectedSignal>,
    /// Peaks found on the corrected signal
    pub peaks: Vec<Peak>,
}

impl Segment {
    pub fn new(file_id: FileId, sample: &str, cycle: usize, region: Region, rows: Vec<Vec<f64>>) -> Self {
        Self {
            file_id,
            sample: sample.to_string(),
            cycle,
            region,
            rows,
            correction: None,
            peaks: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn time(&self) -> Vec<f64> {
        column_of(&self.rows, TIME_COLUMN)
    }

    pub fn temperature(&self) -> Vec<f64> {
        column_of(&self.rows, TEMPERATURE_COLUMN)
    }

    pub fn signal(&self) -> Vec<f64> {
        column_of(&self.rows, SIGNAL_COLUMN)
    }

    /// Temperature at each detected peak
    pub fn peak_temperatures(&self) -> Vec<f64> {
        self.peaks
            .iter()
            .filter_map(|p| self.rows.get(p.index))
            .filter_map(|row| row.get(TEMPERATURE_COLUMN).copied())
            .collect()
    }
}
