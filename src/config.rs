// src/config.rs

//! Server configuration.
//!
//! Settings come from three places, later ones winning:
//! built-in defaults, an optional JSON file (`--config`), and command-line
//! flags. The result is a plain `Config` the orchestrator consumes.

use crate::composite::LayerStack;
use anyhow::{Context, Result};
use bitflags::bitflags;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

bitflags! {
    /// Network front-ends to run. `UDP` is always on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Protocols: u8 {
        const UDP = 1 << 0;
        const OPC = 1 << 1;
        const PIXEL_PUSHER = 1 << 2;
    }
}

impl Default for Protocols {
    fn default() -> Self {
        Protocols::UDP
    }
}

/// Which display sink the server drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Half-block characters with 24-bit color escapes on stdout.
    #[default]
    Terminal,
    /// In-memory sink; nothing is drawn.
    Headless,
}

// --- Dimension parsing ---

/// A `<width>x<height>` display size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimension {
    pub width: usize,
    pub height: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionError {
    spec: String,
}

impl fmt::Display for DimensionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid size spec '{}'", self.spec)
    }
}

impl std::error::Error for DimensionError {}

impl FromStr for Dimension {
    type Err = DimensionError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = || DimensionError {
            spec: spec.to_string(),
        };
        let (w, h) = spec.split_once('x').ok_or_else(invalid)?;
        let width: usize = w.trim().parse().map_err(|_| invalid())?;
        let height: usize = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Dimension { width, height })
    }
}

// --- Top-level configuration ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub width: usize,
    pub height: usize,
    /// Number of composition layers. Layer 0 is on top.
    pub layers: usize,
    /// Layers not written for this long are cleared.
    pub layer_timeout_secs: u64,
    /// How often the reaper looks for idle layers.
    pub reaper_tick_ms: u64,
    pub protocols: Protocols,
    pub network: NetworkConfig,
    pub daemon: bool,
    pub speed_test: bool,
    pub backend: Backend,
    /// `SCHED_FIFO` priority of the sender thread; 0 disables elevation.
    pub sender_priority: i32,
    pub privileges: PrivilegeConfig,
    /// Layer OPC and PixelPusher draw into. `None` means the last layer.
    pub protocol_layer: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            width: 45,
            height: 35,
            layers: 16,
            layer_timeout_secs: 45,
            reaper_tick_ms: 1000,
            protocols: Protocols::UDP,
            network: NetworkConfig::default(),
            daemon: false,
            speed_test: false,
            backend: Backend::Terminal,
            sender_priority: 5,
            privileges: PrivilegeConfig::default(),
            protocol_layer: None,
        }
    }
}

// --- Network configuration ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub udp_port: u16,
    pub opc_port: u16,
    pub pixel_pusher_discovery_port: u16,
    pub pixel_pusher_data_port: u16,
    /// Interface to wait for before serving PixelPusher. Empty means don't wait.
    pub interface: String,
    pub interface_wait_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            udp_port: 1337,
            opc_port: 7890,
            pixel_pusher_discovery_port: 7331,
            pixel_pusher_data_port: 9897,
            interface: String::new(),
            interface_wait_secs: 30,
        }
    }
}

// --- Privilege drop ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivilegeConfig {
    pub user: String,
    pub group: String,
}

impl Default for PrivilegeConfig {
    fn default() -> Self {
        PrivilegeConfig {
            user: "daemon".to_string(),
            group: "daemon".to_string(),
        }
    }
}

impl Config {
    /// Reads a JSON config file. Missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn layer_timeout(&self) -> Duration {
        Duration::from_secs(self.layer_timeout_secs)
    }

    pub fn reaper_tick(&self) -> Duration {
        Duration::from_millis(self.reaper_tick_ms.max(1))
    }

    pub fn interface_wait(&self) -> Duration {
        Duration::from_secs(self.network.interface_wait_secs)
    }

    /// The layer OPC and PixelPusher write to, clamped to an existing one.
    pub fn protocol_layer(&self) -> usize {
        let last = self.layers.saturating_sub(1);
        self.protocol_layer.map_or(last, |layer| layer.min(last))
    }

    pub fn new_layer_stack(&self) -> LayerStack {
        LayerStack::new(self.width, self.height, self.layers)
    }
}

// --- Command line ---

/// FlaschenTaschen display server.
///
/// By default only the FlaschenTaschen UDP protocol is enabled.
#[derive(Parser, Debug, Default)]
#[command(name = "ft-server", version)]
pub struct Cli {
    /// Output dimension, e.g. 45x35
    #[arg(short = 'D', long, value_name = "WxH")]
    pub dimension: Option<Dimension>,

    /// Network interface to wait for before serving PixelPusher (e.g. eth0)
    #[arg(short = 'I', long)]
    pub interface: Option<String>,

    /// Become a daemon
    #[arg(short, long)]
    pub daemon: bool,

    /// Run the OpenPixelControl protocol
    #[arg(long)]
    pub opc: bool,

    /// Run the PixelPusher protocol
    #[arg(long)]
    pub pixel_pusher: bool,

    /// Don't run the server, just measure output speed
    #[arg(short = 't', long)]
    pub speed_test: bool,

    /// Number of composition layers
    #[arg(long)]
    pub layers: Option<usize>,

    /// Seconds until an idle layer is cleared
    #[arg(long, value_name = "SECS")]
    pub layer_timeout: Option<u64>,

    /// Output backend
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// JSON configuration file; command-line flags take precedence
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Builds the effective configuration: defaults, then the config file,
    /// then flags given on the command line.
    pub fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)?,
            None => Config::default(),
        };
        self.apply_to(&mut config);
        Ok(config)
    }

    fn apply_to(&self, config: &mut Config) {
        if let Some(dim) = self.dimension {
            config.width = dim.width;
            config.height = dim.height;
        }
        if let Some(interface) = &self.interface {
            config.network.interface = interface.clone();
        }
        if let Some(layers) = self.layers {
            config.layers = layers;
        }
        if let Some(timeout) = self.layer_timeout {
            config.layer_timeout_secs = timeout;
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        config.daemon |= self.daemon;
        config.speed_test |= self.speed_test;
        config.protocols |= Protocols::UDP;
        if self.opc {
            config.protocols |= Protocols::OPC;
        }
        if self.pixel_pusher {
            config.protocols |= Protocols::PIXEL_PUSHER;
        }
    }
}
