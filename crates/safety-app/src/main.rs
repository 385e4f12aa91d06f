//! Home Safety Functions - Main Entry Point
//!
//! Reads `entity=value` lines from stdin and feeds them to the in-memory host.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use host::InMemoryHost;
use safety_app::{init_logging, AppConfig, SafetyApp};

const DEFAULT_CONFIG: &str = "config/safety.toml";
const TICK: Duration = Duration::from_secs(1);

fn apply_line(host: &InMemoryHost, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let Some((entity, value)) = line.split_once('=') else {
        warn!("Ignoring '{}', expected entity=value", line);
        return;
    };
    if let Err(e) = host.update_entity(entity.trim(), value.trim()) {
        warn!("Failed to update {}: {}", entity.trim(), e);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = AppConfig::load(&path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    init_logging(&config.runtime.log_level)?;

    info!("=== Safety Functions v{} ===", env!("CARGO_PKG_VERSION"));

    let host = Arc::new(InMemoryHost::new());
    let mut app = SafetyApp::start(host.clone(), config).context("starting safety app")?;
    app.pump(&host);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut ticker = tokio::time::interval(TICK);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line.context("reading stdin")? {
                Some(line) => {
                    apply_line(&host, &line);
                    app.pump(&host);
                }
                None => {
                    info!("stdin closed, running on timers only");
                    stdin_open = false;
                }
            },
            _ = ticker.tick() => {
                app.advance(&host, TICK);
            }
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
