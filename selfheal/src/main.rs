//! Self-correcting code-generation workflow CLI.
//!
//! `selfheal run` drives one workflow against the configured collaborator
//! services and prints the terminal projection as JSON. The exit code
//! reflects the terminal reason (see [`selfheal::exit_codes`]).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use selfheal::exit_codes;
use selfheal::io::config::load_config;
use selfheal::logging;
use selfheal::run::Driver;

#[derive(Parser)]
#[command(
    name = "selfheal",
    version,
    about = "Self-correcting code-generation workflow"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate, test, and repair a program for a task until it validates.
    Run {
        /// Natural-language description of the program to build.
        #[arg(long)]
        task: String,
        /// Repair budget; defaults to the configured value.
        #[arg(long)]
        max_attempts: Option<u32>,
        /// Path to the workflow config file.
        #[arg(long, default_value = "selfheal.toml")]
        config: PathBuf,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            task,
            max_attempts,
            config,
        } => cmd_run(&task, max_attempts, &config),
    }
}

fn cmd_run(task: &str, max_attempts: Option<u32>, config_path: &Path) -> Result<i32> {
    if task.trim().is_empty() {
        bail!("task must not be empty");
    }
    let cfg = load_config(config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    let max_attempts = max_attempts.unwrap_or(cfg.max_attempts_default);
    let driver = Driver::from_config(cfg).context("build collaborator clients")?;

    let result = driver.run(task, max_attempts);

    let mut payload = serde_json::to_string_pretty(&result).context("serialize run result")?;
    payload.push('\n');
    print!("{payload}");
    Ok(exit_codes::for_reason(result.reason))
}
