//! Error types for acqbus
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using BusError
pub type Result<T> = std::result::Result<T, BusError>;

/// Unified error type for acqbus operations
#[derive(Debug, Error)]
pub enum BusError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Wire Errors
    // -------------------------------------------------------------------------
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Peer closed the stream cleanly at a frame boundary
    #[error("Peer disconnected")]
    Disconnected,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}
