//! Configuration for acqbus
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

/// Main configuration for an acqbus broker instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Endpoint Configuration
    // -------------------------------------------------------------------------
    /// Unix domain socket path the broker listens on.
    /// A stale socket file left by a previous run is unlinked at bind time.
    pub socket_path: PathBuf,

    // -------------------------------------------------------------------------
    // Delivery Configuration
    // -------------------------------------------------------------------------
    /// Capacity of each connection's outbound frame queue.
    /// A client whose queue fills up is dropped rather than allowed to
    /// stall delivery to other clients.
    pub outbound_queue_capacity: usize,

    /// How often the accept loop re-checks the shutdown flag (milliseconds)
    pub accept_poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/acqbus.sock"),
            outbound_queue_capacity: 4096,
            accept_poll_interval_ms: 50,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the Unix socket path the broker listens on
    pub fn socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.socket_path = path.into();
        self
    }

    /// Set the per-connection outbound queue capacity (in frames)
    pub fn outbound_queue_capacity(mut self, frames: usize) -> Self {
        self.config.outbound_queue_capacity = frames;
        self
    }

    /// Set the accept loop poll interval (in milliseconds)
    pub fn accept_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.accept_poll_interval_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
