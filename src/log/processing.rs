/// Per-file processing log
///
/// Every stage applied to one export file is recorded with:
/// - Timestamp
/// - Operation name and description
/// - The parameter values in effect
/// - Sequential order
///
/// The log can be exported as human-readable text or JSON and is saved next
/// to the cycle artifacts.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

/// A single log entry representing one stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Sequential operation number (1-based)
    pub sequence: usize,
    pub timestamp: DateTime<Local>,
    pub operation: String,
    pub description: String,
    /// Parameters used, e.g. `margins L=1.90 R=1.90 min`
    pub parameters: String,
}

impl LogEntry {
    pub fn to_text(&self) -> String {
        format!(
            "[{:03}] {} | {} | {}\n      Parameters: {}",
            self.sequence,
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.operation,
            self.description,
            if self.parameters.is_empty() {
                "(n/a)"
            } else {
                &self.parameters
            }
        )
    }
}

/// Ordered record of everything done to one sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingLog {
    pub session_id: String,
    pub session_start: DateTime<Local>,
    pub sample: String,
    pub source_file: String,
    pub software_version: String,
    pub entries: Vec<LogEntry>,
}

impl ProcessingLog {
    pub fn new(sample: &str, source_file: &Path) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            session_start: Local::now(),
            sample: sample.to_string(),
            source_file: source_file.display().to_string(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
            entries: Vec::new(),
        }
    }

    /// Append a stage; also echoed to the diagnostic log at debug level
    pub fn add_entry(&mut self, operation: &str, description: &str, parameters: &str) {
        let seq = self.entries.len() + 1;
        self.entries.push(LogEntry {
            sequence: seq,
            timestamp: Local::now(),
            operation: operation.to_string(),
            description: description.to_string(),
            parameters: parameters.to_string(),
        });
        log::debug!("[{} {:03}] {}: {}", self.sample, seq, operation, description);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str("═══════════════════════════════════════════════════════════════\n");
        out.push_str("  Thermal Cycle Processing Log\n");
        out.push_str("═══════════════════════════════════════════════════════════════\n");
        out.push_str(&format!("  Session ID:  {}\n", self.session_id));
        out.push_str(&format!(
            "  Started:     {}\n",
            self.session_start.format("%Y-%m-%d %H:%M:%S")
        ));
        out.push_str(&format!("  Sample:      {}\n", self.sample));
        out.push_str(&format!("  Source:      {}\n", self.source_file));
        out.push_str(&format!("  Software:    thermocycle v{}\n", self.software_version));
        out.push_str(&format!("  Operations:  {}\n", self.entries.len()));
        out.push_str("───────────────────────────────────────────────────────────────\n\n");

        for entry in &self.entries {
            out.push_str(&entry.to_text());
            out.push_str("\n\n");
        }

        out.push_str("═══════════════════════════════════════════════════════════════\n");
        out
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("JSON error: {}", e))
    }

    pub fn save_text(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.to_text())
    }

    pub fn save_json(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.to_json())
    }

    /// Write `<dir>/<sample>.txt` and `<dir>/<sample>.json`
    pub fn save_to_dir(&self, dir: &Path) -> io::Result<()> {
        std::fs::create_dir_all(dir)?;
        self.save_text(&dir.join(format!("{}.txt", self.sample)))?;
        self.save_json(&dir.join(format!("{}.json", self.sample)))
    }
}
