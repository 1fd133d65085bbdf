//! scorecard-parse: run the scorecard pipeline on one photo and print the
//! result as JSON.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing::{error, info};

use golfsum_scorecard::config;
use golfsum_scorecard::pipeline::scorecard::ErrorKind;
use golfsum_scorecard::pipeline_config::ConfigError;
use golfsum_scorecard::{PipelineConfig, ReferenceData, ScorecardError, ScorecardParser};

/// Command-line arguments for scorecard-parse
#[derive(Parser, Debug)]
#[command(name = "scorecard-parse")]
#[command(about = "Parse a photographed golf scorecard into a JSON round record")]
#[command(version)]
struct Args {
    /// Scorecard photo (JPEG, PNG or TIFF)
    image: PathBuf,

    /// Rule set: course, practice or generic
    #[arg(short, long, default_value = "course")]
    mode: String,

    /// Attach the debug payload to the output
    #[arg(short, long)]
    debug: bool,

    /// JSON pipeline configuration file
    #[arg(short, long, env = config::CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

#[derive(Error, Debug)]
enum CliError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Parse(#[from] ScorecardError),

    #[error("Cannot serialize result: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// 2 for unusable input, 1 for everything else.
    fn exit_code(&self) -> u8 {
        match self {
            CliError::Read { .. } => 2,
            CliError::Parse(e) if e.kind() == ErrorKind::BadInput => 2,
            _ => 1,
        }
    }
}

fn run(args: &Args) -> Result<String, CliError> {
    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    }
    .with_env_overrides()?;

    let bytes = std::fs::read(&args.image).map_err(|source| CliError::Read {
        path: args.image.clone(),
        source,
    })?;

    info!(
        image = %args.image.display(),
        mode = %args.mode,
        timeout_ms = ?config.timeout_ms,
        "{} v{}",
        config::APP_NAME,
        config::APP_VERSION
    );

    let parser = ScorecardParser::new(Arc::new(ReferenceData::builtin()), config)?;
    let result = parser.parse(&bytes, args.debug, &args.mode)?;

    let json = if args.pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    Ok(json)
}

fn main() -> ExitCode {
    golfsum_scorecard::init_tracing();

    let args = Args::parse();

    match run(&args) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "scorecard-parse failed");
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}
