use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "driftscan",
    about = "Detect drift between declared infrastructure and what actually runs",
    version
)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, env = "DRIFT_CONFIG")]
    pub config: PathBuf,

    /// Override settings.log_level (debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override settings.log_format (text, json).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Override the per-kind attribute lists, applied after file and
    /// environment. Grammar: `kind=attr1,attr2;kind2=attr3`.
    #[arg(long)]
    pub attributes: Option<String>,
}
