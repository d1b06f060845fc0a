//! thermocycle: split thermal-analysis exports into per-cycle segments.

use clap::Parser;
use std::path::PathBuf;

use thermocycle::config::AnalysisConfig;
use thermocycle::pipeline::batch::{discover_inputs, run_batch};

#[derive(Parser)]
#[command(
    name = "thermocycle",
    version,
    about = "Segment thermal-analysis exports by cycle, correct baselines and extract peaks"
)]
struct Cli {
    /// Export files or directories of *.txt exports
    #[arg(required_unless_present = "dump_config")]
    inputs: Vec<PathBuf>,

    /// Output directory for Cycle<k>/ folders and logs
    #[arg(short, long, default_value = "cycles")]
    out: PathBuf,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Minutes trimmed after each cycle start
    #[arg(long)]
    left_margin: Option<f64>,

    /// Minutes trimmed before each cycle end
    #[arg(long)]
    right_margin: Option<f64>,

    /// Minimum peak prominence
    #[arg(long)]
    prominence: Option<f64>,

    /// Skip baseline correction (and with it peak extraction)
    #[arg(long, default_value_t = false)]
    no_baseline: bool,

    /// Skip peak extraction
    #[arg(long, default_value_t = false)]
    no_peaks: bool,

    /// Do not write per-segment CSVs
    #[arg(long, default_value_t = false)]
    no_save: bool,

    /// Do not write per-cycle overlay CSVs
    #[arg(long, default_value_t = false)]
    no_overlay: bool,

    /// Do not write processing logs
    #[arg(long, default_value_t = false)]
    no_logs: bool,

    /// Worker threads for per-file processing
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Print the effective configuration as JSON and exit
    #[arg(long, default_value_t = false)]
    dump_config: bool,
}

impl Cli {
    fn resolve_config(&self) -> Result<AnalysisConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => AnalysisConfig::load(path)?,
            None => AnalysisConfig::default(),
        };
        if let Some(v) = self.left_margin {
            config.left_margin = v;
        }
        if let Some(v) = self.right_margin {
            config.right_margin = v;
        }
        if let Some(v) = self.prominence {
            config.peak_prominence = v;
        }
        if let Some(v) = self.jobs {
            config.jobs = v;
        }
        config.correct_baseline &= !self.no_baseline;
        config.extract_peaks &= !self.no_peaks;
        config.save_segments &= !self.no_save;
        config.draw_overlay &= !self.no_overlay;
        config.write_logs &= !self.no_logs;
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    if cli.dump_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    log::info!("Starting thermocycle v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Parameters: {}", config.summary());

    let paths = discover_inputs(&cli.inputs)?;
    if paths.is_empty() {
        return Err("no input files found".into());
    }
    std::fs::create_dir_all(&cli.out)?;

    let report = run_batch(&paths, &config, &cli.out, |done, total, path| {
        eprintln!("[{}/{}] {}", done, total, path.display());
    });

    print!("{}", report.summary());
    if report.succeeded() == 0 {
        return Err("no file could be processed".into());
    }
    Ok(())
}
