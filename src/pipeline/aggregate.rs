/// Cycle aggregation across files
///
/// Segments from every file of a batch live in one arena; lookups by cycle
/// index or by file go through index maps. Alignment is positional only:
/// cycle 3 of one file sits next to cycle 3 of every other file.
///
/// Persisted layout under the output directory:
///   Cycle<k>/<sample>.csv   one per non-empty Segment
///   Cycle<k>/overlay.csv    all samples of cycle k, long form
///   Cycle<k>/peaks.csv      extracted peaks of cycle k

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::data::segment::{FileId, Segment};

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Column headers for one file's artifacts
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelLabels {
    pub temperature: String,
    pub signal: String,
}

impl Default for ChannelLabels {
    fn default() -> Self {
        Self {
            temperature: "Temperature".to_string(),
            signal: "Signal".to_string(),
        }
    }
}

/// Which artifacts `persist` writes
#[derive(Debug, Clone, Copy)]
pub struct PersistOptions {
    pub segments: bool,
    pub overlay: bool,
    pub peaks: bool,
}

#[derive(Debug, Default)]
pub struct CycleLibrary {
    segments: Vec<Segment>,
    labels: BTreeMap<FileId, ChannelLabels>,
    by_cycle: BTreeMap<usize, Vec<usize>>,
    by_file: BTreeMap<FileId, Vec<usize>>,
}

impl CycleLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add all Segments of one file
    pub fn insert_file(&mut self, file_id: FileId, labels: ChannelLabels, segments: Vec<Segment>) {
        self.labels.insert(file_id, labels);
        for segment in segments {
            let slot = self.segments.len();
            self.by_cycle.entry(segment.cycle).or_default().push(slot);
            self.by_file.entry(segment.file_id).or_default().push(slot);
            self.segments.push(segment);
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Cycle indices present in any file, ascending
    pub fn cycle_indices(&self) -> Vec<usize> {
        self.by_cycle.keys().copied().collect()
    }

    /// Segments of cycle `k`, in insertion (file) order
    pub fn cycle(&self, k: usize) -> Vec<&Segment> {
        self.lookup(self.by_cycle.get(&k))
    }

    pub fn file(&self, id: FileId) -> Vec<&Segment> {
        self.lookup(self.by_file.get(&id))
    }

    pub fn labels(&self, id: FileId) -> ChannelLabels {
        self.labels.get(&id).cloned().unwrap_or_default()
    }

    fn lookup(&self, slots: Option<&Vec<usize>>) -> Vec<&Segment> {
        slots
            .map(|s| s.iter().map(|&i| &self.segments[i]).collect())
            .unwrap_or_default()
    }

    /// Header labels for a cycle's overlay: shared labels if every file
    /// agrees, otherwise the generic ones.
    fn overlay_labels(&self, k: usize, segments: &[&Segment]) -> ChannelLabels {
        let first = segments
            .first()
            .map(|s| self.labels(s.file_id))
            .unwrap_or_default();
        if segments.iter().all(|s| self.labels(s.file_id) == first) {
            first
        } else {
            log::warn!("Cycle {}: files disagree on channel labels, overlay uses generic headers", k);
            ChannelLabels::default()
        }
    }

    /// Write the artifacts of every cycle, one cycle directory at a time.
    /// A failing artifact is recorded and the remaining ones are still written.
    pub fn persist(&self, out_dir: &Path, options: PersistOptions) -> PersistOutcome {
        let mut outcome = PersistOutcome::default();
        for k in self.cycle_indices() {
            let segments = self.cycle(k);
            if segments.iter().all(|s| s.is_empty()) {
                log::info!("Cycle {}: no rows in any file, nothing written", k);
                continue;
            }
            let dir = out_dir.join(format!("Cycle{}", k));
            if let Err(e) = std::fs::create_dir_all(&dir) {
                outcome.record(dir, Err(e.into()));
                continue;
            }

            if options.segments {
                for segment in segments.iter().filter(|s| !s.is_empty()) {
                    let path = dir.join(format!("{}.csv", segment.sample));
                    let result = write_segment(&path, segment, &self.labels(segment.file_id));
                    outcome.record(path, result);
                }
            }
            if options.overlay {
                let path = dir.join("overlay.csv");
                let result = write_overlay(&path, &segments, &self.overlay_labels(k, &segments));
                outcome.record(path, result);
            }
            if options.peaks && segments.iter().any(|s| s.correction.is_some()) {
                let path = dir.join("peaks.csv");
                let result = write_peaks(&path, &segments);
                outcome.record(path, result);
            }
            log::debug!("Cycle {}: {} segment(s) persisted to {}", k, segments.len(), dir.display());
        }
        outcome
    }
}

/// Paths written by `persist` and the artifacts that failed
#[derive(Debug, Default)]
pub struct PersistOutcome {
    pub written: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, WriteError)>,
}

impl PersistOutcome {
    fn record(&mut self, path: PathBuf, result: Result<(), WriteError>) {
        match result {
            Ok(()) => self.written.push(path),
            Err(e) => {
                log::warn!("Could not write {}: {}", path.display(), e);
                self.failed.push((path, e));
            }
        }
    }
}

/// Corrected column in the sign of the raw signal, when correction ran
fn corrected_column(segment: &Segment) -> Option<Vec<f64>> {
    segment
        .correction
        .as_ref()
        .map(|c| c.restored())
        .filter(|c| c.len() == segment.len())
}

pub fn write_segment(path: &Path, segment: &Segment, labels: &ChannelLabels) -> Result<(), WriteError> {
    let mut writer = csv::Writer::from_writer(File::create(path)?);
    let corrected = corrected_column(segment);

    let mut header = vec![labels.temperature.clone(), labels.signal.clone()];
    if corrected.is_some() {
        header.push(format!("{} (corrected)", labels.signal));
    }
    writer.write_record(&header)?;

    let temperature = segment.temperature();
    let signal = segment.signal();
    for i in 0..segment.len() {
        let mut record = vec![temperature[i].to_string(), signal[i].to_string()];
        if let Some(c) = &corrected {
            record.push(c[i].to_string());
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_overlay(path: &Path, segments: &[&Segment], labels: &ChannelLabels) -> Result<(), WriteError> {
    let mut writer = csv::Writer::from_writer(File::create(path)?);
    let any_corrected = segments.iter().any(|s| corrected_column(s).is_some());

    let mut header = vec!["sample".to_string(), labels.temperature.clone(), labels.signal.clone()];
    if any_corrected {
        header.push(format!("{} (corrected)", labels.signal));
    }
    writer.write_record(&header)?;

    for segment in segments {
        let temperature = segment.temperature();
        let signal = segment.signal();
        let corrected = corrected_column(segment);
        for i in 0..segment.len() {
            let mut record = vec![segment.sample.clone(), temperature[i].to_string(), signal[i].to_string()];
            if any_corrected {
                record.push(corrected.as_ref().map(|c| c[i].to_string()).unwrap_or_default());
            }
            writer.write_record(&record)?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn write_peaks(path: &Path, segments: &[&Segment]) -> Result<(), WriteError> {
    let mut writer = csv::Writer::from_writer(File::create(path)?);
    writer.write_record(["sample", "index", "temperature", "prominence"])?;
    for segment in segments {
        let temperatures = segment.peak_temperatures();
        for (peak, t) in segment.peaks.iter().zip(&temperatures) {
            writer.write_record([
                segment.sample.clone(),
                peak.index.to_string(),
                t.to_string(),
                peak.prominence.to_string(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}
