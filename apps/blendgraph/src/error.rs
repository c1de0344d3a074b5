//! Application-level errors: everything the core returns, plus file and
//! configuration failures that only the binary can hit.

use blendgraph_core::BlendError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] BlendError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("invalid catalog file: {0}")]
    Catalog(String),

    #[error("server error: {0}")]
    Server(String),
}
