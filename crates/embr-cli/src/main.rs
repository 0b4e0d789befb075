//! The `embr` binary: with no positional argument, an interactive REPL
//! that evaluates one statement per line; with a file path, runs the file
//! and prints a completion notice. See `repl.rs` for the shell-command
//! surface (`help`, `clear`, `exit`/`quit`, `.gc`, `.stats`).

mod repl;

use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use clap::Parser;
use embr_runtime::{Context, Runtime, RuntimeConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "embr", version, about = "Embr — an embeddable JavaScript-like execution engine")]
struct Cli {
    /// Source file to execute. Omit to start an interactive REPL.
    script: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let exit_code = match cli.script {
        Some(path) => match run_file(&path) {
            Ok(()) => 0,
            Err(err) => {
                eprintln!("embr: {err}");
                1
            }
        },
        None => match repl::run() {
            Ok(()) => 0,
            Err(err) => {
                eprintln!("embr: {err}");
                1
            }
        },
    };
    std::process::exit(exit_code);
}

fn run_file(path: &PathBuf) -> Result<()> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("could not read {}: {e}", path.display()))?;

    let runtime = Rc::new(Runtime::with_config(RuntimeConfig::from_env()));
    let mut ctx = Context::new(runtime).map_err(|e| anyhow!(e))?;

    let filename = path.display().to_string();
    ctx.eval(&source, &filename).map_err(|e| anyhow!(e))?;

    println!("{filename}: completed");
    Ok(())
}
