mod cli;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, error};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> ExitCode {
    let cli = cli::Cli::parse();

    let log_dir = log_dir_for(&cli.data_dir, cli.command.writes_data());
    let _log_guard = init_tracing(log_dir.as_deref());
    debug!("Running {:?}", cli.command);

    match cli::execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Read-only commands never create `logs/`; they only append to one that a
/// writing command already made.
fn log_dir_for(data_dir: &Path, writes_data: bool) -> Option<PathBuf> {
    let logs = data_dir.join("logs");
    (writes_data || logs.is_dir()).then_some(logs)
}

fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries command output, so console logs go to stderr.
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let (file_layer, file_guard) = match log_dir {
        Some(dir) if fs::create_dir_all(dir).is_ok() => {
            let file_appender = tracing_appender::rolling::daily(dir, "copa.log");
            let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer)
                .with_target(true);
            (Some(layer), Some(file_guard))
        }
        _ => (None, None),
    };

    let init_result = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    if let Err(err) = init_result {
        eprintln!("tracing init failed: {err}");
        return None;
    }

    file_guard
}
