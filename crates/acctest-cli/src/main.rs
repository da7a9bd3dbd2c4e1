mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command, LogFormat};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match cli.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }

    match cli.command {
        Command::List => commands::list(),
        Command::Render {
            template,
            random_integer,
            random_string,
            location,
            seed,
        } => commands::render(template, random_integer, random_string, location, seed),
        Command::Run {
            names,
            engine,
            config,
            parallel,
            timeout,
            output,
        } => {
            let passed = commands::run(names, engine, config, parallel, timeout, output).await?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
