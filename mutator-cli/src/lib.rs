//! Command-line driver for the parameter mutation pipeline
//!
//! Loads a settings file and a raw HTTP request, runs the request through
//! [`ParamMutator`] one or more times, and optionally exports the activity
//! log as CSV.

use anyhow::{Context, Result};
use clap::Parser;
use mutator_core::{HttpRequest, HttpService, LogLevel, MutationOutcome, MutatorSettings, ParamMutator, SubstitutionStatus};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Param Mutator - apply mutation rules to a raw HTTP request
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Settings file with rules (.json or .toml)
    #[arg(long)]
    pub rules: PathBuf,

    /// File holding the raw HTTP request
    #[arg(long)]
    pub request: PathBuf,

    /// Target host used for the log origin
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Target port (defaults to 80, or 443 with --https)
    #[arg(long)]
    pub port: Option<i32>,

    /// Treat the target as HTTPS
    #[arg(long)]
    pub https: bool,

    /// Number of times to run the request through the pipeline
    #[arg(long, default_value_t = 1)]
    pub repeat: u32,

    /// Minimum activity log level (FULL, INFO, OFF)
    #[arg(long)]
    pub log_level: Option<LogLevel>,

    /// Activity log budget in bytes
    #[arg(long)]
    pub log_max_bytes: Option<u64>,

    /// Write the activity log to this CSV file
    #[arg(long)]
    pub csv: Option<PathBuf>,
}

impl Args {
    pub fn service(&self) -> HttpService {
        let default_port = if self.https { 443 } else { 80 };
        HttpService::new(&self.host, self.port.unwrap_or(default_port), self.https)
    }
}

/// Everything one invocation produced
#[derive(Debug)]
pub struct RunReport {
    pub outcomes: Vec<MutationOutcome>,
    pub log_entries: usize,
    pub csv: Option<PathBuf>,
}

/// Install the tracing subscriber. Output goes to stderr so stdout carries
/// only mutated requests.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mutator_core=info,mutator_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Load settings, apply command-line overrides, and build the mutator
pub fn build_mutator(args: &Args) -> Result<ParamMutator> {
    let mut settings = MutatorSettings::load(&args.rules)
        .with_context(|| format!("Failed to load settings from {}", args.rules.display()))?;

    if let Some(level) = args.log_level {
        settings.log.level = level;
    }
    if let Some(max_bytes) = args.log_max_bytes {
        settings.log.max_size_bytes = max_bytes;
    }

    ParamMutator::from_settings(&settings).context("Invalid rule configuration")
}

/// Run the pipeline as described by `args`
pub fn run(args: &Args) -> Result<RunReport> {
    let mutator = build_mutator(args)?;

    let raw = std::fs::read_to_string(&args.request)
        .with_context(|| format!("Failed to read request from {}", args.request.display()))?;
    let request = HttpRequest::parse(args.service(), &raw)
        .with_context(|| format!("Failed to parse request in {}", args.request.display()))?;

    info!(
        "Running {} {} through the pipeline {} time(s)",
        request.method(),
        request.path(),
        args.repeat
    );

    let outcomes: Vec<MutationOutcome> = (0..args.repeat).map(|_| mutator.handle_request(&request)).collect();

    if let Some(path) = &args.csv {
        std::fs::write(path, mutator.log().to_csv())
            .with_context(|| format!("Failed to write CSV to {}", path.display()))?;
        info!("Activity log exported to {}", path.display());
    }

    Ok(RunReport {
        outcomes,
        log_entries: mutator.log().len(),
        csv: args.csv.clone(),
    })
}

/// One-line description of a run
pub fn summary_line(run: usize, outcome: &MutationOutcome) -> String {
    let substitution = match &outcome.substitution {
        SubstitutionStatus::Skipped => "skipped".to_string(),
        SubstitutionStatus::Applied { replacements } => format!("{} replaced", replacements),
        SubstitutionStatus::FellBack { error } => format!("fell back ({})", error),
    };
    format!(
        "run {}: {} params, {} changed, placeholders {}",
        run,
        outcome.all_params.len(),
        outcome.changed_params.len(),
        substitution
    )
}
