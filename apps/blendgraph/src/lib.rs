//! # Blendgraph
//!
//! HTTP server and CLI over the `blendgraph-core` composition graph.
//!
//! - `api`: axum router, handlers, auth and rate limiting
//! - `cli`: clap commands for operators
//! - `config`: `blendgraph.toml` plus `BLENDGRAPH_*` overrides

pub mod api;
pub mod cli;
pub mod config;
pub mod error;

pub use config::{AppConfig, BackendKind};
pub use error::AppError;
