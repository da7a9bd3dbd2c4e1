use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use acctest_fixture::TemplateId;

#[derive(Debug, Parser)]
#[command(
    name = "acctest",
    about = "Apply, check and destroy real resources to verify their lifecycle",
    version
)]
pub struct Cli {
    /// Log line format.
    #[arg(long, env = "ACCTEST_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List every scenario in the catalog.
    List,

    /// Print the configuration a template generates.
    Render {
        /// Template as `family/variant`, e.g. `storage_share/acl_updated`.
        template: TemplateId,

        #[arg(long)]
        random_integer: Option<i64>,

        #[arg(long)]
        random_string: Option<String>,

        #[arg(long, env = "ARM_TEST_LOCATION", default_value = "westeurope")]
        location: String,

        /// Derive the random values from this UUID instead of a fresh one.
        #[arg(long)]
        seed: Option<uuid::Uuid>,
    },

    /// Run scenarios and report.
    Run {
        /// `family/name` or bare names; all scenarios when empty.
        names: Vec<String>,

        /// Overrides the configured engine.
        #[arg(long)]
        engine: Option<EngineArg>,

        #[arg(long, env = "ACCTEST_CONFIG")]
        config: Option<PathBuf>,

        /// Maximum scenarios in flight.
        #[arg(long)]
        parallel: Option<usize>,

        /// Per-scenario timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,

        #[arg(long, default_value = "text")]
        output: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum EngineArg {
    Local,
    Terraform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}
