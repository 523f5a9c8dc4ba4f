//! Configuration management for equeue-sim.
//!
//! Configuration is loaded from the first source that exists:
//! 1. An explicit `--config` path
//! 2. The `EQUEUE_SIM_CONFIG` environment variable
//! 3. Project-local config file (`./equeue-sim.toml`)
//! 4. User config file (`~/.config/equeue-sim/config.toml`)
//! 5. Built-in defaults
//!
//! Partial files are fine: any missing field keeps its default.
//!
//! # Config File Format
//!
//! ```toml
//! # equeue-sim.toml
//!
//! [dram]
//! read_latency = 8
//! read_cycles_per_line = 4
//!
//! [dma]
//! startup_cycles = 2
//! bytes_per_cycle = 4
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::device::cost::{DmaCostParams, MemCostParams};

/// Cost-model configuration for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// DRAM port timing.
    pub dram: MemCostParams,
    /// SRAM port timing.
    pub sram: MemCostParams,
    /// DMA engine timing.
    pub dma: DmaCostParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dram: MemCostParams::dram(),
            sram: MemCostParams::sram(),
            dma: DmaCostParams::default(),
        }
    }
}

impl Config {
    /// Load configuration, trying sources in priority order.
    pub fn load(explicit: Option<&Path>) -> Self {
        if let Some(path) = explicit {
            if let Some(config) = Self::load_from_file(path) {
                return config;
            }
            log::warn!("config {} not usable, falling back", path.display());
        }

        if let Ok(path) = std::env::var("EQUEUE_SIM_CONFIG") {
            log::info!("using EQUEUE_SIM_CONFIG from environment: {}", path);
            if let Some(config) = Self::load_from_file(Path::new(&path)) {
                return config;
            }
        }

        if let Some(config) = Self::load_from_file(Path::new("equeue-sim.toml")) {
            return config;
        }

        if let Some(config) = Self::load_user_config() {
            return config;
        }

        Self::default()
    }

    /// Load configuration from ~/.config/equeue-sim/config.toml
    fn load_user_config() -> Option<Self> {
        let config_path = Self::user_config_path()?;
        Self::load_from_file(&config_path)
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Path of the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("equeue-sim").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# equeue-sim configuration
# Place this file at ~/.config/equeue-sim/config.toml or ./equeue-sim.toml
# Any omitted field keeps its built-in default.

[dram]
read_latency = 8
read_cycles_per_line = 4
write_latency = 8
write_cycles_per_line = 4

[sram]
read_latency = 1
read_cycles_per_line = 1
write_latency = 1
write_cycles_per_line = 1

[dma]
startup_cycles = 2
bytes_per_cycle = 4
"#
        .to_string()
    }
}
