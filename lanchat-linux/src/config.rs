//! Load config from file and environment.

use serde::Deserialize;
use std::net::IpAddr;
use std::path::PathBuf;

/// Daemon configuration. File: ~/.config/lanchat/config.toml or /etc/lanchat/config.toml.
/// Env overrides: LANCHAT_PORT, LANCHAT_BROADCAST_ADDR, LANCHAT_USERNAME.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Chat UDP port (default 9876).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Destination for outgoing frames (default 255.255.255.255, the limited broadcast).
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: IpAddr,
    /// Display name attached to outgoing messages (default $USER, then "anon").
    #[serde(default = "default_username")]
    pub username: String,
}

fn default_port() -> u16 {
    crate::broadcast::BROADCAST_PORT
}
fn default_broadcast_addr() -> IpAddr {
    crate::broadcast::BROADCAST_ADDR
}
fn default_username() -> String {
    std::env::var("USER").unwrap_or_else(|_| "anon".to_string())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            broadcast_addr: default_broadcast_addr(),
            username: default_username(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_else(Config::default);
    if let Ok(s) = std::env::var("LANCHAT_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.port = p;
        }
    }
    if let Ok(s) = std::env::var("LANCHAT_BROADCAST_ADDR") {
        if let Ok(a) = s.parse::<IpAddr>() {
            c.broadcast_addr = a;
        }
    }
    if let Ok(s) = std::env::var("LANCHAT_USERNAME") {
        if !s.trim().is_empty() {
            c.username = s;
        }
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/lanchat/config.toml"));
    }
    out.push(PathBuf::from("/etc/lanchat/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                if let Ok(c) = toml::from_str::<Config>(&s) {
                    return Some(c);
                }
            }
            break;
        }
    }
    None
}
