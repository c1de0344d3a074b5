//! # Blendgraph
//!
//! Formula composition server and CLI.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │           apps/blendgraph (THE BINARY)       │
//! │                                              │
//! │   ┌─────────────┐        ┌─────────────┐     │
//! │   │    CLI      │        │  HTTP API   │     │
//! │   │   (clap)    │        │   (axum)    │     │
//! │   └──────┬──────┘        └──────┬──────┘     │
//! │          └────────────┬─────────┘            │
//! │                       ▼                      │
//! │              ┌─────────────────┐             │
//! │              │ blendgraph-core │             │
//! │              │   (THE LOGIC)   │             │
//! │              └─────────────────┘             │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! blendgraph server --host 0.0.0.0 --port 8080
//! blendgraph import -i catalog.json
//! blendgraph add-ingredient --parent 1 --ingredient 2 -c 250
//! blendgraph flatten --formula 1 --places 3
//! ```

use blendgraph::cli;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // BLENDGRAPH_LOG_FORMAT=json enables machine-parseable output.
    let log_format =
        std::env::var("BLENDGRAPH_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "blendgraph=info,blendgraph_core=info,tower_http=debug".into());

    if log_format == "json" {
        let json = tracing_subscriber::fmt::layer().json();
        tracing_subscriber::registry().with(filter).with(json).init();
    } else {
        let text = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        tracing_subscriber::registry().with(filter).with(text).init();
    }

    if let Err(e) = cli::execute(cli::Cli::parse()).await {
        tracing::error!(error = %e, "blendgraph failed");
        std::process::exit(1);
    }
}
