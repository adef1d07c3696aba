//! Gateway event runner.
//!
//! Same startup as the server, then one JSON event per stdin line and one
//! JSON response per stdout line. No listener is bound, and logs always go
//! to stderr.

use std::process::ExitCode;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use connect_router::adapter::gateway::{self, GatewayRequest, GatewayResponse};
use connect_router::config::{loader, Cli, LogOutput};
use connect_router::lifecycle::startup::{self, StartupError};
use connect_router::Router;

/// Server startup, with logging moved off stdout.
fn prepare(cli: &Cli) -> Result<Router, StartupError> {
    let mut config = loader::from_cli(cli)?;
    config.observability.log_output = LogOutput::Stderr;
    startup::start(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let router = match prepare(&cli) {
        Ok(router) => router,
        Err(err) => {
            eprintln!("connect-router-events: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = router.run().await {
        tracing::error!(error = %err, "Unable to start router");
        return ExitCode::FAILURE;
    }
    let Some(forwarder) = router.forwarder() else {
        tracing::error!("Router started without a forwarder");
        return ExitCode::FAILURE;
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::error!(error = %err, "Failed to read event");
                return ExitCode::FAILURE;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<GatewayRequest>(&line) {
            Ok(event) => gateway::handle(&forwarder, event).await,
            Err(err) => {
                tracing::warn!(error = %err, "Malformed event");
                GatewayResponse::text(axum::http::StatusCode::BAD_REQUEST, err.to_string())
            }
        };

        let mut encoded = match serde_json::to_vec(&response) {
            Ok(encoded) => encoded,
            Err(err) => {
                tracing::error!(error = %err, "Failed to encode response");
                return ExitCode::FAILURE;
            }
        };
        encoded.push(b'\n');
        if let Err(err) = stdout.write_all(&encoded).await.and(stdout.flush().await) {
            tracing::error!(error = %err, "Failed to write response");
            return ExitCode::FAILURE;
        }
    }

    if let Err(err) = router.stop(router.drain_timeout()).await {
        tracing::error!(error = %err, "Stop failed");
    }
    ExitCode::SUCCESS
}
