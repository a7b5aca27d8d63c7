//
// Copyright 2025-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_env_field::EnvField;
use std::net::{AddrParseError, IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Arguments {
    #[arg(
        short = 'c',
        long = "config",
        help = "Path to configuration file",
        default_value = "gateway/config.yaml"
    )]
    pub config_file: String,

    #[arg(
        short = 'e',
        long = "env",
        help = "Path to environment file, .env in the working directory when omitted"
    )]
    pub env_file: Option<String>,

    #[arg(
        short = 'n',
        long = "no-console",
        help = "Run without the interactive operator console until Ctrl-C"
    )]
    pub no_console: bool,

    #[arg(
        short = 'm',
        long = "manual-start",
        help = "Wait for a 'start' console command instead of starting immediately"
    )]
    pub manual_start: bool,
}

impl Default for Arguments {
    fn default() -> Self {
        Self {
            config_file: "config.yaml".to_string(),
            env_file: Some(".env".to_string()),
            no_console: false,
            manual_start: false,
        }
    }
}

/// Error raised while loading the configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to open config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub telnet: TelnetConfig,

    /// Welcome banner sent to every caller by the built-in handler
    #[serde(default)]
    pub banner: Option<String>,

    /// Per-subscriber status event buffer (default: 256)
    #[serde(default = "default_status_buffer")]
    pub status_buffer: usize,
}

fn default_status_buffer() -> usize {
    256
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            telnet: TelnetConfig::default(),
            banner: None,
            status_buffer: default_status_buffer(),
        }
    }
}

impl Configuration {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        tracing::debug!("Loading configuration from file: {}", path);
        let file = std::fs::File::open(path)?;
        let conf = serde_yaml::from_reader(file)?;
        Ok(conf)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TelnetConfig {
    #[serde(default)]
    pub addr: EnvField<TelnetBinding>,

    /// Number of nodes, and so the maximum concurrent sessions (default: 64)
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Idle timeout in seconds (default: 900)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,

    /// Socket write timeout in seconds (default: 30)
    #[serde(default = "default_io_timeout")]
    pub io_timeout: u64,

    /// Shutdown grace period in seconds (default: 5)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: u64,

    /// Text sent to callers refused because every node is busy
    #[serde(default)]
    pub busy_message: Option<String>,

    /// Read buffer size in bytes (default: 4096)
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

fn default_max_sessions() -> usize {
    64
}

fn default_idle_timeout() -> u64 {
    900
}

fn default_io_timeout() -> u64 {
    30
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_read_buffer_size() -> usize {
    4096
}

impl Default for TelnetConfig {
    fn default() -> Self {
        Self {
            addr: Default::default(),
            max_sessions: default_max_sessions(),
            idle_timeout: default_idle_timeout(),
            io_timeout: default_io_timeout(),
            shutdown_grace: default_shutdown_grace(),
            busy_message: None,
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TelnetBinding(SocketAddr);

impl TelnetBinding {
    pub fn to_addr(&self) -> SocketAddr {
        self.0
    }
    pub fn to_ip(&self) -> IpAddr {
        self.0.ip()
    }
    pub fn to_port(&self) -> u16 {
        self.0.port()
    }
}

impl FromStr for TelnetBinding {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(SocketAddr::from_str(s)?))
    }
}

impl Default for TelnetBinding {
    fn default() -> Self {
        Self(SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::new(0, 0, 0, 0),
            2323,
        )))
    }
}

impl std::fmt::Display for TelnetBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runtime settings handed to [`crate::ServerController::start`]
///
/// The server never mutates a configuration once it has been started with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    pub max_sessions: usize,
    pub idle_timeout: Duration,
    pub io_timeout: Duration,
    pub shutdown_grace: Duration,
    pub busy_message: Option<String>,
    pub read_buffer_size: usize,
}

impl ServerConfig {
    /// Listen on every interface at `port` with default limits
    pub fn new(port: u16) -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
            max_sessions: default_max_sessions(),
            idle_timeout: Duration::from_secs(default_idle_timeout()),
            io_timeout: Duration::from_secs(default_io_timeout()),
            shutdown_grace: Duration::from_secs(default_shutdown_grace()),
            busy_message: None,
            read_buffer_size: default_read_buffer_size(),
        }
    }

    pub fn with_bind_address(mut self, bind_address: IpAddr) -> Self {
        self.bind_address = bind_address;
        self
    }

    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, shutdown_grace: Duration) -> Self {
        self.shutdown_grace = shutdown_grace;
        self
    }

    pub fn with_busy_message(mut self, busy_message: impl Into<String>) -> Self {
        self.busy_message = Some(busy_message.into());
        self
    }

    pub fn with_read_buffer_size(mut self, read_buffer_size: usize) -> Self {
        self.read_buffer_size = read_buffer_size;
        self
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Check the limits before any socket is touched
    pub fn validate(&self) -> Result<(), String> {
        if self.max_sessions == 0 {
            return Err("max_sessions must be at least 1".to_string());
        }
        if self.max_sessions > usize::from(u16::MAX) {
            return Err(format!("max_sessions must not exceed {}", u16::MAX));
        }
        if self.idle_timeout.is_zero() {
            return Err("idle_timeout must be greater than zero".to_string());
        }
        if self.io_timeout.is_zero() {
            return Err("io_timeout must be greater than zero".to_string());
        }
        if self.read_buffer_size == 0 {
            return Err("read_buffer_size must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl From<&TelnetConfig> for ServerConfig {
    fn from(config: &TelnetConfig) -> Self {
        Self {
            bind_address: config.addr.to_ip(),
            port: config.addr.to_port(),
            max_sessions: config.max_sessions,
            idle_timeout: Duration::from_secs(config.idle_timeout),
            io_timeout: Duration::from_secs(config.io_timeout),
            shutdown_grace: Duration::from_secs(config.shutdown_grace),
            busy_message: config.busy_message.clone(),
            read_buffer_size: config.read_buffer_size,
        }
    }
}
