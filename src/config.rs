use std::{fs::read_to_string, str::FromStr};

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;

/// Relay socket and client table options.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Tunnel {
    ///
    /// UDP port of the relay socket.
    ///
    /// Ports inside the privileged range are rejected and replaced with the
    /// default.
    ///
    #[serde(default = "Tunnel::port")]
    pub port: u16,
    ///
    /// Ceiling on the number of registered clients.
    ///
    #[serde(default = "Tunnel::max_clients")]
    pub max_clients: usize,
    ///
    /// Ceiling on registered clients per source address.
    ///
    #[serde(default = "Tunnel::ip_limit")]
    pub ip_limit: usize,
    ///
    /// Idle seconds before a client may be evicted or its identifier
    /// rebound by another endpoint.
    ///
    #[serde(default = "Tunnel::client_timeout_secs")]
    pub client_timeout_secs: u64,
}

impl Tunnel {
    fn port() -> u16 {
        50001
    }

    fn max_clients() -> usize {
        200
    }

    fn ip_limit() -> usize {
        8
    }

    fn client_timeout_secs() -> u64 {
        60
    }
}

impl Default for Tunnel {
    fn default() -> Self {
        Self {
            port: Self::port(),
            max_clients: Self::max_clients(),
            ip_limit: Self::ip_limit(),
            client_timeout_secs: Self::client_timeout_secs(),
        }
    }
}

/// Reflection responder options.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Reflection {
    ///
    /// UDP port of the reflection responder. IPv4 only; the reply format
    /// carries four address bytes.
    ///
    #[serde(default = "Reflection::port")]
    pub port: u16,
}

impl Reflection {
    fn port() -> u16 {
        3478
    }
}

impl Default for Reflection {
    fn default() -> Self {
        Self { port: Self::port() }
    }
}

/// Directory service registration.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Master {
    ///
    /// Directory endpoint the heartbeat announces to. When absent the
    /// heartbeat only evicts timed-out clients.
    ///
    #[serde(default)]
    pub url: Option<String>,
    ///
    /// Credential forwarded verbatim to the directory.
    ///
    #[serde(default)]
    pub password: String,
    ///
    /// Instance name shown in the directory listing.
    ///
    #[serde(default = "Master::name")]
    pub name: String,
    ///
    /// Skip the announce step entirely while keeping the eviction pass.
    ///
    #[serde(default)]
    pub no_announce: bool,
}

impl Master {
    fn name() -> String {
        "Unnamed server".to_string()
    }
}

impl Default for Master {
    fn default() -> Self {
        Self {
            url: None,
            password: String::new(),
            name: Self::name(),
            no_announce: false,
        }
    }
}

/// Maintenance command options.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Maintenance {
    ///
    /// Password gating the maintenance command. Absence disables the
    /// command subprotocol entirely.
    ///
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    ///
    /// log level
    ///
    /// An enum representing the available verbosity levels of the logger.
    ///
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub tunnel: Tunnel,
    #[serde(default)]
    pub reflection: Reflection,
    #[serde(default)]
    pub master: Master,
    #[serde(default)]
    pub maintenance: Maintenance,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    ///
    /// Specify the configuration file path
    ///
    /// Example: tunnel-server --config /etc/tunnel-rs/config.toml
    ///
    #[arg(long, short)]
    config: Option<String>,
}

impl Config {
    ///
    /// Load configure from config file and command line parameters.
    ///
    /// Load command line parameters, if the configuration file path is
    /// specified, the configuration is read from the configuration file,
    /// otherwise the default configuration is used.
    ///
    pub fn load() -> Result<Self> {
        let mut config = match Cli::parse().config {
            Some(path) => toml::from_str::<Self>(&read_to_string(&path)?)?,
            None => Self::default(),
        };

        config.sanitize();
        Ok(config)
    }

    /// Out-of-range options fall back to their defaults instead of failing
    /// startup.
    fn sanitize(&mut self) {
        if self.tunnel.port <= 1024 {
            self.tunnel.port = Tunnel::port();
        }

        if self.tunnel.max_clients < 2 {
            self.tunnel.max_clients = Tunnel::max_clients();
        }

        if self.tunnel.ip_limit < 1 {
            self.tunnel.ip_limit = Tunnel::ip_limit();
        }

        self.master.name = self.master.name.replace(';', "");
        if self.master.name.is_empty() {
            self.master.name = Master::name();
        }
    }
}
