//! Connect Router
//!
//! ```text
//!                       ┌──────────────────────────────────────────────┐
//!                       │                CONNECT ROUTER                │
//!     Client Request    │  ┌─────────┐   ┌─────────┐   ┌───────────┐   │
//!     ──────────────────┼─▶│   net   │──▶│  http   │──▶│  routing  │   │
//!                       │  │listener │   │ server  │   │  table    │   │
//!                       │  └─────────┘   └─────────┘   └─────┬─────┘   │
//!                       │                                    ▼         │
//!     Client Response   │  ┌─────────┐   ┌─────────┐   ┌───────────┐   │   mesh TLS
//!     ◀─────────────────┼──│ relay   │◀──│transport│◀──│  mesh     │◀──┼──── Upstream
//!                       │  │         │   │ + retry │   │  dialer   │   │     sidecar
//!                       │  └─────────┘   └─────────┘   └───────────┘   │
//!                       │                                              │
//!                       │  config · lifecycle · observability · consul │
//!                       └──────────────────────────────────────────────┘
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use connect_router::config::Cli;
use connect_router::lifecycle::{signals, startup};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let router = match startup::prepare(&cli) {
        Ok(router) => Arc::new(router),
        Err(err) => {
            eprintln!("connect-router: {err}");
            return ExitCode::FAILURE;
        }
    };

    let stopper = Arc::clone(&router);
    tokio::spawn(async move {
        signals::termination().await;
        if let Err(err) = stopper.stop(stopper.drain_timeout()).await {
            tracing::error!(error = %err, "Stop failed");
        }
    });

    if let Err(err) = router.run().await {
        tracing::error!(error = %err, "Unable to start router");
        return ExitCode::FAILURE;
    }

    match router.listen_and_serve().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "Server failed");
            ExitCode::FAILURE
        }
    }
}
