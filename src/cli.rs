use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::ForecastFamily;

#[derive(Parser, Debug)]
#[command(
    name = "hubview",
    version,
    about = "Reshape forecast hub submissions into visualization payloads"
)]
pub struct Cli {
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Inventory(InventoryArgs),
    Process(ProcessArgs),
    Truth(TruthArgs),
    Status(StatusArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct HubArgs {
    #[arg(long, default_value = "./FluSight-forecast-hub")]
    pub hub_path: PathBuf,

    #[arg(long, value_enum, default_value_t = ForecastFamily::Flusight)]
    pub family: ForecastFamily,

    /// TOML file replacing the family preset.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub target_data: Option<PathBuf>,

    #[arg(long)]
    pub locations: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct InventoryArgs {
    #[command(flatten)]
    pub hub: HubArgs,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long = "model")]
    pub models: Vec<String>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ProcessArgs {
    #[command(flatten)]
    pub hub: HubArgs,

    #[arg(long, default_value = "./processed_data")]
    pub output_path: PathBuf,

    /// Restrict processing to the family's demo models.
    #[arg(long, default_value_t = false)]
    pub demo: bool,

    #[arg(long = "model")]
    pub models: Vec<String>,

    #[arg(long)]
    pub workers: Option<usize>,

    #[command(flatten)]
    pub retention: RetentionArgs,

    #[arg(long, default_value_t = false)]
    pub all_quantiles: bool,

    #[arg(long, default_value_t = false)]
    pub keep_samples: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RetentionArgs {
    #[arg(long, conflicts_with = "full_history")]
    pub truth_since: Option<NaiveDate>,

    #[arg(long, default_value_t = false)]
    pub full_history: bool,
}

#[derive(Args, Debug, Clone)]
pub struct TruthArgs {
    #[command(flatten)]
    pub hub: HubArgs,

    #[arg(long, default_value = "./processed_data")]
    pub output_path: PathBuf,

    #[command(flatten)]
    pub retention: RetentionArgs,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = "./processed_data")]
    pub output_path: PathBuf,

    #[arg(long, value_enum, default_value_t = ForecastFamily::Flusight)]
    pub family: ForecastFamily,
}
