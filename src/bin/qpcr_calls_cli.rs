use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use qpcr_calls::{analyze_run, QpcrError};
use qpcr_calls::config::{AssayCatalog, Division, Instrument, RunSettings, Thresholds};
use qpcr_calls::error::QpcrResult;

/// Call qPCR results from instrument exports and write a CSV summary.
#[derive(Parser, Debug)]
#[command(name = "qpcr-calls", version, about)]
struct Args {
    /// Instrument that produced the export ("QuantStudio 3", "QuantStudio 5", "Rotor-Gene", "Mic")
    #[arg(short, long, value_parser = parse_setting::<Instrument>)]
    machine: Instrument,

    /// Assay name as listed in the assay catalog
    #[arg(short, long)]
    assay: String,

    /// Analysis workflow: vhf or hiv
    #[arg(short, long, default_value = "vhf", value_parser = parse_setting::<Division>)]
    division: Division,

    /// Assay catalog (TOML)
    #[arg(short, long, default_value = "assays.toml")]
    config: PathBuf,

    /// Threshold overrides (TOML); unset keys keep their defaults
    #[arg(short, long)]
    thresholds: Option<PathBuf>,

    /// Summary columns to keep; repeat or comma-separate. All columns when omitted.
    #[arg(long, value_delimiter = ',')]
    columns: Vec<String>,

    /// Export file(s). Rotor-Gene takes one file per reporter.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn parse_setting<T: FromStr<Err = QpcrError>>(raw: &str) -> Result<T, String> {
    raw.parse().map_err(|e: QpcrError| e.to_string())
}

fn spinner(color: &str, message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
        .template(&format!("{{spinner:.{color}}} {{msg}}"))
    {
        spinner.set_style(style);
    }
    spinner.set_message(message.to_string());
    spinner
}

fn run(args: Args) -> QpcrResult<()> {
    // 1. Settings
    let catalog = AssayCatalog::from_path(&args.config)?;
    let mut settings = RunSettings::new(args.machine, args.assay, args.division);
    if let Some(path) = &args.thresholds {
        settings.thresholds = Thresholds::from_toml_str(&std::fs::read_to_string(path)?)?;
    }

    // 2. Analysis
    let spin = spinner("green", "Analyzing run...");
    let results = analyze_run(&catalog, &settings, &args.files);
    let results = match results {
        Ok(results) => results,
        Err(e) => {
            spin.finish_and_clear();
            if matches!(e, QpcrError::UnknownAssay(_)) {
                let known: Vec<&str> = catalog.assay_names().collect();
                log::info!("Assays in {}: {}", args.config.display(), known.join(", "));
            }
            return Err(e);
        }
    };
    spin.finish_with_message(format!("Called {} wells.", results.table.len()));

    // 3. Summary
    let spin = spinner("yellow", "Writing summary...");
    let columns = (!args.columns.is_empty()).then_some(args.columns.as_slice());
    let written = results.export(columns);
    let path = match written {
        Ok(path) => path,
        Err(e) => {
            spin.finish_and_clear();
            return Err(e);
        }
    };
    spin.finish_with_message(format!("Summary saved: {}", path.display()));
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            // operator-fixable setup problems get their own status
            if e.is_configuration() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
