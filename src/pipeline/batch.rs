/// Per-file pipeline and batch runner
///
/// Each file runs read → parse → reconstruct → segment → correct/extract on
/// its own. Files are independent, so with `jobs > 1` they are processed on
/// a rayon pool; aggregation and every write then happen on the calling
/// thread in file order. A failing file is recorded and the batch moves on.

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use rayon::prelude::*;
use thiserror::Error;

use crate::config::AnalysisConfig;
use crate::data::export::{read_export_file, FormatError};
use crate::data::method::MethodProgram;
use crate::data::segment::{FileId, Segment};
use crate::log::processing::ProcessingLog;
use super::aggregate::{ChannelLabels, CycleLibrary, PersistOptions, WriteError};
use super::baseline::correct_baseline;
use super::peaks::{cross_check, find_peaks};
use super::segmenter::{segment_table, Margins, NumericError};
use super::timeline::Timeline;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("format error: {0}")]
    Format(#[from] FormatError),
    #[error("numeric error: {0}")]
    Numeric(#[from] NumericError),
    #[error("write error: {0}")]
    Write(#[from] WriteError),
}

/// Everything one file contributes to the batch
#[derive(Debug)]
pub struct ProcessedFile {
    pub file_id: FileId,
    pub sample: String,
    pub labels: ChannelLabels,
    pub segments: Vec<Segment>,
    pub log: ProcessingLog,
    /// Segments whose baseline correction failed
    pub uncorrected: usize,
}

impl ProcessedFile {
    pub fn peak_count(&self) -> usize {
        self.segments.iter().map(|s| s.peaks.len()).sum()
    }

    pub fn empty_segments(&self) -> usize {
        self.segments.iter().filter(|s| s.is_empty()).count()
    }

    /// Change the sample name used for artifacts and logs
    pub fn rename(&mut self, name: &str) {
        self.log
            .add_entry("Rename", &format!("\"{}\" is taken in this batch, using \"{}\"", self.sample, name), "");
        self.sample = name.to_string();
        self.log.sample = name.to_string();
        for segment in &mut self.segments {
            segment.sample = name.to_string();
        }
    }
}

/// First free name among `sample`, `sample_<id>`, `sample_<id+1>`, ...
fn unique_name(used: &mut HashSet<String>, sample: &str, file_id: FileId) -> String {
    let mut name = sample.to_string();
    let mut n = file_id.0;
    while !used.insert(name.clone()) {
        name = format!("{}_{}", sample, n);
        n += 1;
    }
    name
}

/// Run the single-file pipeline.
pub fn process_file(file_id: FileId, path: &Path, config: &AnalysisConfig) -> Result<ProcessedFile, FileError> {
    let export = read_export_file(path)?;
    let sample = export.sample_name.clone();
    let mut plog = ProcessingLog::new(&sample, path);
    plog.add_entry(
        "Read export",
        &format!(
            "{} channel(s), {} program line(s), {} data row(s)",
            export.channels.len(),
            export.method_lines.len(),
            export.data_lines.len()
        ),
        "",
    );

    let program = MethodProgram::parse(&export.method_lines);
    plog.add_entry(
        "Parse method",
        &format!("{} step(s), {} cycle(s)", program.steps.len(), program.cycles.len()),
        "",
    );
    for issue in &program.issues {
        plog.add_entry("Method issue", &issue.to_string(), "");
    }

    let timeline = Timeline::reconstruct(&program);
    plog.add_entry(
        "Reconstruct timeline",
        &format!(
            "pre-roll {:.3} min, {:.3} min programmed",
            timeline.preroll, timeline.total
        ),
        "",
    );

    let margins = Margins {
        left: config.left_margin,
        right: config.right_margin,
    };
    let segmented = segment_table(&export.data_lines, &timeline, margins)?;
    if segmented.regions.len() != timeline.cycle_count() {
        log::warn!(
            "{}: {} region(s) in the table but {} cycle(s) in the method program",
            sample,
            segmented.regions.len(),
            timeline.cycle_count()
        );
    }
    let mut segments = segmented.realize(file_id, &sample);
    plog.add_entry(
        "Segment",
        &format!(
            "{} row(s), {} sentinel(s), {} region(s)",
            segmented.table.len(),
            segmented.sentinel_rows.len(),
            segments.len()
        ),
        &format!("margins L={:.2} R={:.2} min", margins.left, margins.right),
    );

    let mut uncorrected = 0;
    if config.correct_baseline {
        let params = config.baseline_params();
        for segment in segments.iter_mut().filter(|s| !s.is_empty()) {
            match correct_baseline(&segment.signal(), &params) {
                Ok(correction) => {
                    if config.extract_peaks {
                        segment.peaks = find_peaks(&correction.corrected, config.peak_prominence);
                    }
                    segment.correction = Some(correction);
                }
                Err(e) => {
                    log::warn!("{}: cycle {} left uncorrected: {}", sample, segment.cycle, e);
                    plog.add_entry("Baseline failed", &format!("cycle {}: {}", segment.cycle, e), "");
                    uncorrected += 1;
                }
            }
        }
        plog.add_entry(
            "Baseline",
            &format!(
                "{} segment(s) corrected, {} failed",
                segments.iter().filter(|s| s.correction.is_some()).count(),
                uncorrected
            ),
            &format!(
                "λ={:e}, p={}, iter={}",
                params.lambda, params.asymmetry, params.max_iter
            ),
        );
        if config.extract_peaks {
            plog.add_entry(
                "Extract peaks",
                &format!("{} peak(s)", segments.iter().map(|s| s.peaks.len()).sum::<usize>()),
                &format!("prominence >= {}", config.peak_prominence),
            );
        }
    }

    // Row k of the instrument's peak table belongs to cycle k+1
    for (k, row) in export.instrument_peaks.iter().enumerate() {
        let Some(segment) = segments.iter().find(|s| s.cycle == k + 1) else {
            continue;
        };
        if let Some(cmp) = cross_check(row, &segment.peak_temperatures()) {
            let text = format!(
                "cycle {}: instrument {:.2}, extracted {:.2}, difference {:+.2}",
                k + 1,
                cmp.reported,
                cmp.extracted,
                cmp.difference()
            );
            log::info!("{}: {}", sample, text);
            plog.add_entry("Peak cross-check", &text, "");
        }
    }

    let labels = ChannelLabels {
        temperature: export.temperature_label(),
        signal: export.signal_label(),
    };
    Ok(ProcessedFile {
        file_id,
        sample,
        labels,
        segments,
        log: plog,
        uncorrected,
    })
}

/// Expand inputs: files are kept, directories contribute their `*.txt`
/// files in sorted order.
pub fn discover_inputs(inputs: &[PathBuf]) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(input)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| {
                    p.is_file()
                        && p.extension()
                            .is_some_and(|ext| ext.eq_ignore_ascii_case("txt"))
                })
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileStatus {
    Done {
        segments: usize,
        empty_segments: usize,
        peaks: usize,
        uncorrected: usize,
    },
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: PathBuf,
    pub status: FileStatus,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
    pub cycles: Vec<usize>,
    pub written: Vec<PathBuf>,
    /// Artifacts or logs that could not be written
    pub write_errors: Vec<(PathBuf, String)>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.status, FileStatus::Done { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.files.len() - self.succeeded()
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        for file in &self.files {
            let name = file.path.display();
            match &file.status {
                FileStatus::Done {
                    segments,
                    empty_segments,
                    peaks,
                    uncorrected,
                } => out.push_str(&format!(
                    "  OK     {}: {} segment(s) ({} empty), {} peak(s), {} uncorrected\n",
                    name, segments, empty_segments, peaks, uncorrected
                )),
                FileStatus::Failed(reason) => {
                    out.push_str(&format!("  FAILED {}: {}\n", name, reason))
                }
            }
        }
        out.push_str(&format!(
            "{} file(s) processed, {} failed, {} cycle(s), {} artifact(s) written\n",
            self.succeeded(),
            self.failed(),
            self.cycles.len(),
            self.written.len()
        ));
        for (path, e) in &self.write_errors {
            out.push_str(&format!("  NOT WRITTEN {}: {}\n", path.display(), e));
        }
        out
    }
}

/// Process every file, aggregate by cycle index and persist the artifacts
/// under `out_dir`. `progress(done, total, path)` is called once per file,
/// in file order, as soon as that file and all earlier ones are finished.
///
/// Samples sharing a file stem are renamed `<stem>_<n>` so every file keeps
/// its own artifacts.
pub fn run_batch<F>(paths: &[PathBuf], config: &AnalysisConfig, out_dir: &Path, mut progress: F) -> BatchReport
where
    F: FnMut(usize, usize, &Path),
{
    let total = paths.len();
    log::info!("Processing {} file(s) with {} job(s)", total, config.jobs);

    let mut report = BatchReport::default();
    let mut library = CycleLibrary::new();
    let mut names = HashSet::new();
    let logs_dir = out_dir.join("logs");

    process_in_order(paths, config, |i, result| {
        let path = &paths[i];
        let status = match result {
            Ok(mut done) => {
                let name = unique_name(&mut names, &done.sample, done.file_id);
                if name != done.sample {
                    log::warn!("{}: sample name \"{}\" already used, writing as \"{}\"", path.display(), done.sample, name);
                    done.rename(&name);
                }
                let status = FileStatus::Done {
                    segments: done.segments.len(),
                    empty_segments: done.empty_segments(),
                    peaks: done.peak_count(),
                    uncorrected: done.uncorrected,
                };
                if config.write_logs {
                    if let Err(e) = done.log.save_to_dir(&logs_dir) {
                        log::warn!("{}: could not save processing log: {}", done.sample, e);
                        report.write_errors.push((logs_dir.join(&done.sample), e.to_string()));
                    }
                }
                library.insert_file(done.file_id, done.labels, done.segments);
                status
            }
            Err(e) => {
                log::warn!("{}: {}", path.display(), e);
                FileStatus::Failed(e.to_string())
            }
        };
        report.files.push(FileReport {
            path: path.clone(),
            status,
        });
        progress(i + 1, total, path);
    });

    report.cycles = library.cycle_indices();
    let options = PersistOptions {
        segments: config.save_segments,
        overlay: config.draw_overlay,
        peaks: config.correct_baseline && config.extract_peaks,
    };
    if options.segments || options.overlay || options.peaks {
        let outcome = library.persist(out_dir, options);
        report.written = outcome.written;
        report
            .write_errors
            .extend(outcome.failed.into_iter().map(|(path, e)| (path, FileError::from(e).to_string())));
    }

    log::info!(
        "Batch done: {} ok, {} failed, {} cycle(s), {} write error(s)",
        report.succeeded(),
        report.failed(),
        report.cycles.len(),
        report.write_errors.len()
    );
    report
}

/// Run the per-file pipeline and hand each result to `sink` in file order.
///
/// With `jobs > 1` files run on a rayon pool; results arrive over a channel
/// and are released as soon as every earlier file has been released.
fn process_in_order<S>(paths: &[PathBuf], config: &AnalysisConfig, mut sink: S)
where
    S: FnMut(usize, Result<ProcessedFile, FileError>),
{
    let run = |i: usize, path: &PathBuf| {
        log::info!("Processing {}", path.display());
        process_file(FileId(i), path, config)
    };

    if config.jobs > 1 {
        match rayon::ThreadPoolBuilder::new().num_threads(config.jobs).build() {
            Ok(pool) => {
                let (tx, rx) = mpsc::channel();
                std::thread::scope(|scope| {
                    scope.spawn(|| {
                        pool.install(|| {
                            paths.par_iter().enumerate().for_each_with(tx, |tx, (i, path)| {
                                // the receiver outlives every worker
                                let _ = tx.send((i, run(i, path)));
                            })
                        })
                    });

                    let mut pending = BTreeMap::new();
                    let mut next = 0;
                    for (i, result) in rx {
                        pending.insert(i, result);
                        while let Some(result) = pending.remove(&next) {
                            sink(next, result);
                            next += 1;
                        }
                    }
                });
                return;
            }
            Err(e) => log::warn!("Could not start {} worker(s), running sequentially: {}", config.jobs, e),
        }
    }

    for (i, path) in paths.iter().enumerate() {
        sink(i, run(i, path));
    }
}
