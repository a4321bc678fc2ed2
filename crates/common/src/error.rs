use thiserror::Error;

use crate::ModeKind;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid signal: {0}")]
    Validation(String),

    #[error("Capacity exceeded for {mode}: daily limit {limit}")]
    CapacityExceeded { mode: ModeKind, limit: u32 },

    #[error("Gateway timeout after {timeout_ms}ms during {operation}")]
    GatewayTimeout { operation: String, timeout_ms: u64 },

    #[error("Gateway rejected request: {0}")]
    GatewayRejected(String),

    #[error("Reconciliation conflict: {0}")]
    ReconciliationConflict(String),

    #[error("Unknown position: {0}")]
    UnknownPosition(String),

    #[error("Unknown mode: {0}")]
    UnknownMode(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
