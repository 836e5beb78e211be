// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Broker configuration: a TOML base layered with `--key=value` CLI overrides.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};

pub const DEFAULT_TCP_PORT: u16 = 1993;
pub const DEFAULT_WS_PORT: u16 = 53535;
pub const DEFAULT_CONFIG: &str = "/etc/mote/mote.toml";

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Log {
    console_log: bool,
    log_level: LogLevel,
    log_file: Option<String>,
}

impl Log {
    #[must_use]
    pub const fn console_log(&self) -> bool {
        self.console_log
    }

    #[must_use]
    pub const fn log_level(&self) -> LogLevel {
        self.log_level
    }

    #[must_use]
    pub fn log_file(&self) -> Option<&str> {
        self.log_file.as_deref()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct General {
    #[serde(default = "default_pid_file")]
    pub pid_file: String,
}

fn default_pid_file() -> String {
    "/var/run/mote.pid".to_string()
}

impl Default for General {
    fn default() -> Self {
        General {
            pid_file: default_pid_file(),
        }
    }
}

/// Protocol spoken by a single listener.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Ws,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ListenerConfig {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub ssl_cert: Option<PathBuf>,
    pub ssl_key: Option<PathBuf>,
}

impl ListenerConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.ssl_cert.is_some() && self.ssl_key.is_some()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Storage {
    #[serde(default = "default_retained_path")]
    pub retained_path: PathBuf,
}

fn default_retained_path() -> PathBuf {
    PathBuf::from("/var/lib/mote/retained.jsonl")
}

impl Default for Storage {
    fn default() -> Self {
        Storage {
            retained_path: default_retained_path(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub general: General,
    pub listeners: Vec<ListenerConfig>,
    pub log: Log,
    pub storage: Storage,
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|err| Error::from_string(ErrorKind::ConfigError, format!("{err}")))
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        Config {
            general: General::default(),
            listeners: vec![
                ListenerConfig {
                    protocol: Protocol::Tcp,
                    host: "0.0.0.0".to_string(),
                    port: DEFAULT_TCP_PORT,
                    ssl_cert: None,
                    ssl_key: None,
                },
                ListenerConfig {
                    protocol: Protocol::Ws,
                    host: "0.0.0.0".to_string(),
                    port: DEFAULT_WS_PORT,
                    ssl_cert: None,
                    ssl_key: None,
                },
            ],
            log: Log::default(),
            storage: Storage::default(),
        }
    }

    /// Apply `--key=value` overrides onto the base config, in the
    /// teacher's own override style. Unknown keys are ignored.
    pub fn apply_overrides(&mut self, overrides: &HashMap<String, String>) {
        if let Some(host) = overrides.get("host") {
            for listener in &mut self.listeners {
                listener.host = host.clone();
            }
        }
        if let Some(tcp_host) = overrides.get("tcp_host") {
            if let Some(listener) = self.tcp_listener_mut() {
                listener.host = tcp_host.clone();
            }
        }
        if let Some(ws_host) = overrides.get("ws_host") {
            if let Some(listener) = self.ws_listener_mut() {
                listener.host = ws_host.clone();
            }
        }
        if let Some(tcp_port) = overrides.get("tcp_port").and_then(|p| p.parse().ok()) {
            if let Some(listener) = self.tcp_listener_mut() {
                listener.port = tcp_port;
            }
        }
        if let Some(ws_port) = overrides.get("ws_port").and_then(|p| p.parse().ok()) {
            if let Some(listener) = self.ws_listener_mut() {
                listener.port = ws_port;
            }
        }
        if let Some(ssl_cert) = overrides.get("ssl_cert") {
            for listener in &mut self.listeners {
                listener.ssl_cert = Some(PathBuf::from(ssl_cert));
            }
        }
        if let Some(ssl_key) = overrides.get("ssl_key") {
            for listener in &mut self.listeners {
                listener.ssl_key = Some(PathBuf::from(ssl_key));
            }
        }
    }

    fn tcp_listener_mut(&mut self) -> Option<&mut ListenerConfig> {
        self.listeners
            .iter_mut()
            .find(|l| l.protocol == Protocol::Tcp)
    }

    fn ws_listener_mut(&mut self) -> Option<&mut ListenerConfig> {
        self.listeners
            .iter_mut()
            .find(|l| l.protocol == Protocol::Ws)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_both_listeners() {
        let config = Config::with_defaults();
        assert_eq!(config.listeners.len(), 2);
        assert!(config.listeners.iter().any(|l| l.port == DEFAULT_TCP_PORT));
        assert!(config.listeners.iter().any(|l| l.port == DEFAULT_WS_PORT));
    }

    #[test]
    fn overrides_apply_to_matching_listener() {
        let mut config = Config::with_defaults();
        let mut overrides = HashMap::new();
        overrides.insert("tcp_port".to_string(), "2000".to_string());
        config.apply_overrides(&overrides);
        assert_eq!(config.tcp_listener_mut().unwrap().port, 2000);
        assert_eq!(
            config.ws_listener_mut().unwrap().port,
            DEFAULT_WS_PORT
        );
    }
}
