//! Thermal-cycle analysis for instrument method exports.
//!
//! Parses the method program of an export, reconstructs its timeline,
//! splits the data table into one Segment per thermal cycle, optionally
//! removes a baseline and extracts peaks, and aggregates Segments across
//! files by cycle index.

pub mod config;
pub mod data;
pub mod log;
pub mod pipeline;
