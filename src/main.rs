//! AIRE pipeline CLI
//!
//! Pulls participant sensor data, aligns it to study-visit windows, and
//! writes cleaned-series and summary-statistics CSV artifacts.

use aire_pipeline::{
    compute_stats, config::Config, device::BlockingDeviceClient, pipeline,
    report::{read_series_csv, Report, ReportEntry, SubjectKey}, survey::BlockingSurveyClient,
    Cohort, PooledKey, RunSession, VERSION,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "aire-pipeline")]
#[command(version = VERSION)]
#[command(about = "Indoor-air-quality analysis for visit-based studies", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis: survey export, sample retrieval, statistics
    Run {
        /// Survey identifier (overrides the configured one)
        #[arg(long)]
        survey_id: Option<String>,

        /// Output directory for CSV artifacts
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Comma-separated environmental variables to analyze
        #[arg(long)]
        variables: Option<String>,

        /// Exceedance threshold for pm25
        #[arg(long)]
        pm25_threshold: Option<f64>,
    },

    /// Recompute summary statistics from previously written series CSVs
    Stats {
        /// Directory containing per-participant series CSVs
        #[arg(long, short)]
        input: PathBuf,

        /// Variable to summarize
        #[arg(long, default_value = "pm25")]
        variable: String,

        /// Output path (defaults to summary_stats_<variable>.csv in the
        /// input directory)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// List the device directory (device id -> serial number)
    Devices,

    /// Show configuration
    Config,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            survey_id,
            output,
            variables,
            pm25_threshold,
        } => {
            cmd_run(survey_id, output, variables, pm25_threshold);
        }
        Commands::Stats {
            input,
            variable,
            output,
        } => {
            cmd_stats(&input, &variable, output);
        }
        Commands::Devices => {
            cmd_devices();
        }
        Commands::Config => {
            cmd_config();
        }
    }
}

fn load_config() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_run(
    survey_id: Option<String>,
    output: Option<PathBuf>,
    variables: Option<String>,
    pm25_threshold: Option<f64>,
) {
    println!("AIRE pipeline v{VERSION}");
    println!();

    let mut config = load_config();
    if let Some(id) = survey_id {
        config.survey.survey_id = id;
    }
    if let Some(dir) = output {
        config.study.output_dir = dir;
    }
    if let Some(list) = variables {
        config.study.variables = list
            .split(',')
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
    }
    if let Some(threshold) = pm25_threshold {
        config.study.pm25_threshold = threshold;
    }

    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
    if let Err(e) = config.ensure_directories() {
        eprintln!("Error: could not create output directory: {e}");
        std::process::exit(1);
    }

    println!("  Survey: {}", config.survey.survey_id);
    println!("  Variables: {}", config.study.variables.join(", "));
    println!("  Output: {:?}", config.study.output_dir);
    println!();

    let survey = match BlockingSurveyClient::new(config.survey.clone()) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error creating survey client: {e}");
            std::process::exit(1);
        }
    };
    let samples = match BlockingDeviceClient::new(config.device.clone()) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error creating device client: {e}");
            std::process::exit(1);
        }
    };

    let now = Utc::now().naive_utc();
    let outcome = match pipeline::run(&config, &survey, &samples, now) {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    match outcome.report.write_series_csvs(&config.study.output_dir) {
        Ok(written) => println!("Wrote {} series file(s)", written.len()),
        Err(e) => eprintln!("Error writing series CSVs: {e}"),
    }

    for variable in &config.study.variables {
        let path = config
            .study
            .output_dir
            .join(format!("summary_stats_{variable}.csv"));
        if let Err(e) = outcome.report.write_summary_csv(&path, variable) {
            eprintln!("Error writing summary for {variable}: {e}");
        }
    }

    println!();
    println!(
        "Assembled {} entries ({} pooled groups)",
        outcome.report.entries.len(),
        outcome.report.pooled_groups().count()
    );
    if !outcome.failures.is_empty() {
        println!("Excluded {} participant(s):", outcome.failures.len());
        for failure in &outcome.failures {
            println!("  {}: {}", failure.id, failure.reason);
        }
    }
}

fn cmd_stats(input: &PathBuf, variable: &str, output: Option<PathBuf>) {
    let config = load_config();

    let mut files: Vec<PathBuf> = match std::fs::read_dir(input) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|ext| ext == "csv").unwrap_or(false))
            .filter(|p| {
                p.file_stem()
                    .map(|stem| !stem.to_string_lossy().starts_with("summary_stats"))
                    .unwrap_or(false)
            })
            .collect(),
        Err(e) => {
            eprintln!("Error reading {input:?}: {e}");
            std::process::exit(1);
        }
    };
    files.sort();

    if files.is_empty() {
        println!("No series CSVs found in {input:?}");
        return;
    }

    let mut report = Report::new();
    let mut session = RunSession::new();

    for path in &files {
        let participant_id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();

        let series = match read_series_csv(path) {
            Ok(series) => series,
            Err(e) => {
                eprintln!("Skipping {path:?}: {e}");
                continue;
            }
        };

        let values = match series.column(variable) {
            Some(values) if !values.is_empty() => values,
            _ => {
                eprintln!("Skipping {participant_id}: no cleaned '{variable}' values");
                continue;
            }
        };

        match compute_stats(&values, variable, config.study.pm25_threshold) {
            Ok(stats) => {
                session.absorb(Cohort::Pooled, variable, &values);
                let mut entry = ReportEntry::participant(Cohort::Pooled, series);
                entry.stats.insert(variable.to_string(), stats);
                report
                    .entries
                    .insert(SubjectKey::Participant(participant_id), entry);
            }
            Err(e) => eprintln!("Skipping {participant_id}: {e}"),
        }
    }

    let pooled = session.values(PooledKey::Overall, variable);
    if !pooled.is_empty() {
        if let Ok(stats) = compute_stats(pooled, variable, config.study.pm25_threshold) {
            let mut entry = ReportEntry::pooled();
            entry.pooled_values.insert(variable.to_string(), pooled.to_vec());
            entry.stats.insert(variable.to_string(), stats);
            report
                .entries
                .insert(SubjectKey::Pooled(PooledKey::Overall), entry);
        }
    }

    let output_path =
        output.unwrap_or_else(|| input.join(format!("summary_stats_{variable}.csv")));
    match report.write_summary_csv(&output_path, variable) {
        Ok(()) => println!(
            "Wrote summary for {} entr(ies) to {:?}",
            report.entries.len(),
            output_path
        ),
        Err(e) => {
            eprintln!("Error writing summary: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_devices() {
    let config = load_config();

    let client = match BlockingDeviceClient::new(config.device.clone()) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error creating device client: {e}");
            std::process::exit(1);
        }
    };

    use aire_pipeline::device::SampleSource;
    match client.device_directory() {
        Ok(directory) => {
            if directory.is_empty() {
                println!("No eligible devices found on the account.");
                return;
            }
            println!("Eligible devices ({}):", directory.len());
            for id in directory.device_ids() {
                // resolve() cannot fail for ids the directory itself returned
                if let Ok(serial) = directory.resolve(id) {
                    println!("  {id} -> {serial}");
                }
            }
        }
        Err(e) => {
            eprintln!("Error fetching device directory: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_config() {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}
