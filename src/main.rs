mod app;
mod args;
mod buffer;
mod client;
mod decoder;
mod dispatcher;
mod editor;
mod error;
mod formatter;
mod profile;
mod utils;
mod view;

use anyhow::{bail, Context, Result};
use args::CommandLineArgs;
use client::TOKEN_ENV_VAR;
use std::io::IsTerminal;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::time::ChronoLocal, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CommandLineArgs::get();

    if !std::io::stdin().is_terminal() || !std::io::stdout().is_terminal() {
        bail!("granite-shell needs an interactive terminal: stdin and stdout must be a TTY");
    }

    let _log_guard = init_logging(&args)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "granite-shell starting");

    let token = std::env::var(TOKEN_ENV_VAR)
        .ok()
        .filter(|t| !t.trim().is_empty());
    if token.is_none() {
        tracing::debug!("{TOKEN_ENV_VAR} is not set");
    }

    app::run(&args, token).await
}

/// The screen belongs to the UI, so logs go to a file. `RUST_LOG` wins over
/// the `-v` default.
fn init_logging(args: &CommandLineArgs) -> Result<WorkerGuard> {
    let log_file = args.log_file();
    let path = Path::new(&log_file);
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .with_context(|| format!("Invalid log file path: {log_file}"))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let default_level = if args.verbose() { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::rfc_3339())
        .with_ansi(false)
        .with_writer(writer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install the log subscriber: {e}"))?;

    Ok(guard)
}
