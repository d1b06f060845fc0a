/// Thermal-analysis instrument export reader
///
/// Text layout, one record per line (blank lines are ignored):
///   - `Sig<N> <title…> <unit>`       channel definitions
///   - `OrgMethod<N>: <step text>`    one line per program step
///   - `Peak …`                       instrument peak table: two more header
///                                    lines, then whitespace-delimited rows
///   - `StartOfData`                  tab-separated data rows follow
///
/// Exports are normally UTF-16 with a byte-order mark; UTF-8 is accepted too.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lines between the `Peak` header and the first peak row
const PEAK_HEADER_LINES: usize = 2;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("file is neither UTF-16 nor UTF-8 text")]
    Encoding,
    #[error("no StartOfData marker found")]
    MissingDataMarker,
    #[error("no OrgMethod lines found")]
    MissingMethod,
    #[error("data table after StartOfData is empty")]
    EmptyTable,
}

/// A recorded channel, from a `Sig<N>` line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDef {
    pub number: usize,
    pub title: String,
    pub unit: String,
}

impl ChannelDef {
    /// `title/unit`, e.g. `Temperature/°C`
    pub fn label(&self) -> String {
        format!("{}/{}", self.title, self.unit)
    }
}

/// One row of the instrument's own peak table, kept verbatim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentPeak {
    pub fields: Vec<String>,
}

impl InstrumentPeak {
    /// Instrument-reported peak temperature (fourth field)
    pub fn temperature(&self) -> Option<f64> {
        self.fields.get(3).and_then(|f| f.parse::<f64>().ok())
    }
}

/// Sections of one export file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportFile {
    pub source_path: PathBuf,
    pub sample_name: String,
    pub channels: Vec<ChannelDef>,
    /// Step text of each `OrgMethod` line, in order
    pub method_lines: Vec<String>,
    pub instrument_peaks: Vec<InstrumentPeak>,
    /// Raw rows after `StartOfData`, trimmed, blank lines removed
    pub data_lines: Vec<String>,
}

impl ExportFile {
    pub fn channel(&self, number: usize) -> Option<&ChannelDef> {
        self.channels.iter().find(|c| c.number == number)
    }

    pub fn temperature_label(&self) -> String {
        self.channel(2)
            .map(|c| c.label())
            .unwrap_or_else(|| "Temperature".to_string())
    }

    pub fn signal_label(&self) -> String {
        self.channel(3)
            .map(|c| c.label())
            .unwrap_or_else(|| "Signal".to_string())
    }
}

/// Read and split an export file
pub fn read_export_file(path: &Path) -> Result<ExportFile, FormatError> {
    let bytes = std::fs::read(path)?;
    let content = decode_text(&bytes)?;
    parse_export(&content, path)
}

/// Decode export bytes: UTF-16 (BOM or NUL-byte heuristic) or UTF-8
pub fn decode_text(bytes: &[u8]) -> Result<String, FormatError> {
    match bytes {
        [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
        [0xEF, 0xBB, 0xBF, rest @ ..] => {
            String::from_utf8(rest.to_vec()).map_err(|_| FormatError::Encoding)
        }
        [_, 0x00, ..] if bytes.len() % 2 == 0 => decode_utf16(bytes, u16::from_le_bytes),
        _ => String::from_utf8(bytes.to_vec()).map_err(|_| FormatError::Encoding),
    }
}

fn decode_utf16(bytes: &[u8], word: fn([u8; 2]) -> u16) -> Result<String, FormatError> {
    if bytes.len() % 2 != 0 {
        return Err(FormatError::Encoding);
    }
    let units: Vec<u16> = bytes.chunks_exact(2).map(|c| word([c[0], c[1]])).collect();
    String::from_utf16(&units).map_err(|_| FormatError::Encoding)
}

/// Split decoded export content into its sections
pub fn parse_export(content: &str, source_path: &Path) -> Result<ExportFile, FormatError> {
    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let mut export = ExportFile {
        source_path: source_path.to_path_buf(),
        sample_name: source_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "sample".to_string()),
        ..Default::default()
    };

    let mut data_start = None;
    let mut in_peak_table = false;
    let mut peak_header_left = 0;

    for (pos, line) in lines.iter().enumerate() {
        if line.starts_with("StartOfData") {
            data_start = Some(pos + 1);
            break;
        }
        if let Some(def) = parse_channel(line) {
            export.channels.push(def);
            continue;
        }
        if let Some(rest) = line.strip_prefix("OrgMethod") {
            let text = rest.split_once(':').map(|(_, t)| t).unwrap_or("");
            export.method_lines.push(text.trim().to_string());
            continue;
        }
        if line.starts_with("Peak") {
            in_peak_table = true;
            peak_header_left = PEAK_HEADER_LINES;
            continue;
        }
        if in_peak_table {
            if peak_header_left > 0 {
                peak_header_left -= 1;
                continue;
            }
            let fields: Vec<String> = line.split_whitespace().map(str::to_string).collect();
            if fields.first().is_some_and(|f| f.parse::<f64>().is_ok()) {
                export.instrument_peaks.push(InstrumentPeak { fields });
            } else {
                in_peak_table = false;
            }
        }
    }

    let data_start = data_start.ok_or(FormatError::MissingDataMarker)?;
    if export.method_lines.is_empty() {
        return Err(FormatError::MissingMethod);
    }
    export.data_lines = lines[data_start..].iter().map(|l| l.to_string()).collect();
    if export.data_lines.is_empty() {
        return Err(FormatError::EmptyTable);
    }

    log::debug!(
        "{}: {} channel(s), {} program step(s), {} instrument peak(s), {} data row(s)",
        export.sample_name,
        export.channels.len(),
        export.method_lines.len(),
        export.instrument_peaks.len(),
        export.data_lines.len()
    );
    Ok(export)
}

fn parse_channel(line: &str) -> Option<ChannelDef> {
    let mut tokens = line.split_whitespace();
    let number = tokens.next()?.strip_prefix("Sig")?.parse::<usize>().ok()?;
    let rest: Vec<&str> = tokens.collect();
    let (unit, title) = rest.split_last()?;
    Some(ChannelDef {
        number,
        title: title.join(" "),
        unit: unit.to_string(),
    })
}
