mod replay;
mod scenario;
mod scripted_backend;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use scenario::Scenario;
use std::{io::Write as _, path::PathBuf};

#[derive(Parser, Debug)]
#[command(name = "edit_prediction_cli", about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replays a recorded editing session and prints what the next edit
    /// provider surfaces at every step.
    Replay(ReplayArgs),
}

#[derive(Debug, clap::Args)]
struct ReplayArgs {
    /// Path to a scenario JSON file.
    scenario: PathBuf,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Replay(args) => run_replay(args),
    }
}

fn run_replay(args: ReplayArgs) -> Result<()> {
    let scenario = Scenario::load(&args.scenario)?;
    let report = replay::replay(scenario)?;

    let mut stdout = std::io::stdout().lock();
    match args.format {
        OutputFormat::Text => {
            for step in &report.steps {
                writeln!(stdout, "{step}")?;
            }
            writeln!(
                stdout,
                "{} backend request(s), {} unused response(s)",
                report.backend_requests, report.unused_responses
            )?;
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut stdout, &report)?;
            writeln!(stdout)?;
        }
    }
    Ok(())
}
