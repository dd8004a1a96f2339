/// Error types for the data source layer.

use futures::task::SpawnError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataSourceError {
    /// The data source was released; its caches are gone.
    #[error("data source instance released")]
    Released,

    #[error("failed to schedule pending resolution: {0}")]
    Spawn(#[from] SpawnError),

    #[error("invalid data config: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DataSourceError>;
