//! `cadence` - run a cron job engine from a config file, check that file,
//! or preview when a cron expression fires.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use commands::{next, run, validate};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "cadence", version, about = "In-process cron job scheduling and execution")]
struct Cli {
    /// Job config file [default: ~/.cadence/config.toml]
    #[arg(short, long, global = true, env = "CADENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Override `logging.level` from the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[arg(short, long, global = true, default_value = "table", env = "CADENCE_OUTPUT")]
    output: OutputFormat,

    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine and run its jobs until Ctrl+C or SIGTERM
    Run,

    /// List the next occurrences of a cron expression
    Next(next::NextArgs),

    /// Load the config, register every job and report unusable schedules
    Validate,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let result = match cli.command {
        Commands::Run => run::execute(cli.config, cli.log_level).await,
        Commands::Next(args) => next::execute(args, cli.output),
        Commands::Validate => validate::execute(cli.config, cli.output),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}
