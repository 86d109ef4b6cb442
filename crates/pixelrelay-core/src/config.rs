//! Centralized configuration for pixelrelay.
//!
//! Protocol and codec limits are compile-time constants. Server settings,
//! including the benchmark matrix, are plain serde structs that can be loaded
//! from a JSON file and then overridden from the command line.

use crate::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Wire protocol limits and defaults.
pub struct ProtocolConfig;

impl ProtocolConfig {
    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: &'static str = "0.0.0.0";
    pub const DEFAULT_SERVER_ADDR: &'static str = "127.0.0.1:8080";
    pub const MAX_REQUEST_LINE_BYTES: usize = 1024;
    pub const MAX_LENGTH_HEADER_BYTES: usize = 32;
    pub const MAX_PAYLOAD_BYTES: usize = 512 * 1024 * 1024; // 512MB
    /// Ceiling on the row workers a single request may use.
    pub const MAX_WORKERS: usize = 64;
}

/// Image codec limits.
pub struct ImageConfig;

impl ImageConfig {
    /// Upper bound on `width * height` checked from the image header before
    /// the full decode allocates.
    pub const MAX_DECODED_PIXELS: u64 = 100_000_000;
    /// Upper bound on `width * height` of a downscale target.
    pub const MAX_TARGET_PIXELS: u64 = Self::MAX_DECODED_PIXELS;
    pub const DEFAULT_OUTPUT_PATH: &'static str = "output_processed.png";
}

/// Settings for the server-local benchmark run by a `test` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    pub reference_image: PathBuf,
    pub worker_counts: Vec<usize>,
    pub repetitions: u32,
    pub blur_radius: u32,
    pub downscale_width: u32,
    pub downscale_height: u32,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            reference_image: PathBuf::from("test_image.png"),
            worker_counts: vec![1, 2, 4, 8, 16, 32, 64],
            repetitions: 3,
            blur_radius: 3,
            downscale_width: 256,
            downscale_height: 256,
        }
    }
}

impl BenchmarkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.worker_counts.is_empty() {
            return Err(RelayError::Config {
                message: "benchmark worker_counts must not be empty".to_string(),
            });
        }
        if let Some(&too_many) = self
            .worker_counts
            .iter()
            .find(|&&n| n > ProtocolConfig::MAX_WORKERS)
        {
            return Err(RelayError::Config {
                message: format!(
                    "benchmark worker count {} exceeds the maximum of {}",
                    too_many,
                    ProtocolConfig::MAX_WORKERS
                ),
            });
        }
        if self.repetitions == 0 {
            return Err(RelayError::Config {
                message: "benchmark repetitions must be at least 1".to_string(),
            });
        }
        if self.downscale_width == 0 || self.downscale_height == 0 {
            return Err(RelayError::Config {
                message: format!(
                    "benchmark downscale target {}x{} must be non-empty",
                    self.downscale_width, self.downscale_height
                ),
            });
        }
        Ok(())
    }
}

/// Runtime configuration for the image server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest image frame a session will accept.
    pub max_payload_bytes: usize,
    pub benchmark: BenchmarkConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: ProtocolConfig::DEFAULT_HOST.to_string(),
            port: ProtocolConfig::DEFAULT_PORT,
            max_payload_bytes: ProtocolConfig::MAX_PAYLOAD_BYTES,
            benchmark: BenchmarkConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load a configuration file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| RelayError::io_with_path(e, path))?;
        let config: ServerConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(RelayError::Config {
                message: "host must not be empty".to_string(),
            });
        }
        if self.max_payload_bytes == 0 {
            return Err(RelayError::Config {
                message: "max_payload_bytes must be at least 1".to_string(),
            });
        }
        self.benchmark.validate()
    }

    /// The `host:port` string to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
