mod audit;
mod auth;
mod config;
mod db;
mod engine;
mod error;
mod gpa;
mod grading;
mod ipc;
mod store;
mod workflow;

use config::{Config, LogFormat};
use std::io::{self, BufRead, Write};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logs go to stderr; stdout carries the protocol.
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false)
                    .with_writer(io::stderr),
            )
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(io::stderr))
            .init(),
    }
}

fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_logging(&config);

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
        busy_timeout_ms: config.busy_timeout_ms,
    };
    if let Some(path) = config.workspace.clone() {
        ipc::select_workspace(&mut state, path)?;
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        busy_timeout_ms = config.busy_timeout_ms,
        "gradeflowd started"
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                error!("stdin read failed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back.
                warn!("unparseable request: {e}");
                let resp = ipc::err("", "bad_json", e.to_string(), None);
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(stdout, "{}", resp);
        let _ = stdout.flush();
    }

    info!("stdin closed, shutting down");
    Ok(())
}
