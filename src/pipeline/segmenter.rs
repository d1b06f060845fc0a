/// Table segmentation
///
/// One left-to-right pass over the raw tab-separated data rows. A sentinel
/// row (first field beginning with `-2`) marks a cycle boundary: the region
/// of the cycle that just ended is closed and the timestamp of the next row
/// starts the following cycle. Sentinel rows never enter the numeric table.
///
/// Region edges:
///   - closed at a sentinel: `[start + left, last - right - compensation)`
///   - closed at end of data: `[start + left, last - right)`
/// where `compensation` is the settle hold opening the next cycle.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::segment::{FileId, Region, Segment, Table, TIME_COLUMN};
use super::timeline::Timeline;

/// Reserved first-field prefix of boundary rows
pub const SENTINEL_PREFIX: &str = "-2";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NumericError {
    #[error("data row {row}, column {column}: \"{value}\" is not a number")]
    NotANumber {
        row: usize,
        column: usize,
        value: String,
    },
    #[error("data row {row}: expected {expected} columns, found {found}")]
    ShapeMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },
}

/// Margins trimmed from both ends of every cycle, in minutes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    pub left: f64,
    pub right: f64,
}

/// Numeric table plus one Region per cycle
#[derive(Debug, Clone, Default)]
pub struct SegmentedTable {
    pub table: Table,
    pub regions: Vec<Region>,
    /// Table rows belonging to each region's cycle
    pub blocks: Vec<Range<usize>>,
    /// Positions of sentinel rows in the raw row list
    pub sentinel_rows: Vec<usize>,
}

impl SegmentedTable {
    /// Cut the table into one Segment per Region (cycles numbered from 1)
    pub fn realize(&self, file_id: FileId, sample: &str) -> Vec<Segment> {
        self.regions
            .iter()
            .zip(&self.blocks)
            .enumerate()
            .map(|(k, (region, block))| {
                let rows = self.table.select(block.clone(), region);
                if rows.is_empty() {
                    log::debug!("{}: cycle {} window {} holds no rows", sample, k + 1, region);
                }
                Segment::new(file_id, sample, k + 1, *region, rows)
            })
            .collect()
    }
}

pub fn is_sentinel(line: &str) -> bool {
    line.split('\t')
        .next()
        .is_some_and(|field| field.trim().starts_with(SENTINEL_PREFIX))
}

/// Scan raw data rows into a numeric table and per-cycle regions.
pub fn segment_table<S: AsRef<str>>(
    lines: &[S],
    timeline: &Timeline,
    margins: Margins,
) -> Result<SegmentedTable, NumericError> {
    let mut out = SegmentedTable::default();
    let mut block_start = 0;
    // Start of the current cycle; None until its first data row is seen
    let mut cycle_start: Option<f64> = None;
    let mut last_seen: Option<f64> = None;

    for (pos, line) in lines.iter().enumerate() {
        let line = line.as_ref().trim();
        if line.is_empty() {
            continue;
        }

        if is_sentinel(line) {
            let k = out.regions.len();
            let compensation = timeline.boundary_compensation(k);
            out.regions.push(close_region(
                k,
                cycle_start,
                last_seen,
                margins,
                compensation,
            ));
            out.blocks.push(block_start..out.table.len());
            out.sentinel_rows.push(pos);
            block_start = out.table.len();
            cycle_start = None;
            continue;
        }

        let row = parse_row(pos, line)?;
        if out.table.is_empty() {
            out.table.width = row.len();
        } else if row.len() != out.table.width {
            return Err(NumericError::ShapeMismatch {
                row: pos,
                expected: out.table.width,
                found: row.len(),
            });
        }

        let t = row[TIME_COLUMN];
        if cycle_start.is_none() {
            cycle_start = Some(if out.regions.is_empty() {
                timeline.initial_elapsed(t)
            } else {
                t
            });
        }
        last_seen = Some(t);
        out.table.rows.push(row);
    }

    let k = out.regions.len();
    out.regions
        .push(close_region(k, cycle_start, last_seen, margins, 0.0));
    out.blocks.push(block_start..out.table.len());

    log::debug!(
        "Segmented {} row(s): {} sentinel(s), {} region(s)",
        out.table.len(),
        out.sentinel_rows.len(),
        out.regions.len()
    );
    Ok(out)
}

fn close_region(
    k: usize,
    cycle_start: Option<f64>,
    last_seen: Option<f64>,
    margins: Margins,
    compensation: f64,
) -> Region {
    match (cycle_start, last_seen) {
        (Some(start), Some(end)) => {
            Region::new(start + margins.left, end - margins.right - compensation)
        }
        _ => {
            log::warn!("Cycle {} has no data rows", k + 1);
            let t = last_seen.unwrap_or(0.0);
            Region::new(t, t)
        }
    }
}

fn parse_row(pos: usize, line: &str) -> Result<Vec<f64>, NumericError> {
    line.split('\t')
        .enumerate()
        .map(|(column, field)| {
            let field = field.trim();
            field.parse::<f64>().map_err(|_| NumericError::NotANumber {
                row: pos,
                column,
                value: field.to_string(),
            })
        })
        .collect()
}
