//! Load config from file and environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use sendlink_net::{TcpSignaling, TransferOptions};
use serde::Deserialize;

/// CLI configuration. File: ~/.config/sendlink/config.toml or /etc/sendlink/config.toml.
/// Env overrides: SENDLINK_RENDEZVOUS_ADDR, SENDLINK_LISTEN_ADDR, SENDLINK_ADVERTISE_ADDR,
/// SENDLINK_LINK_BASE, SENDLINK_CHUNK_SIZE, SENDLINK_NEGOTIATION_TIMEOUT_SECS,
/// SENDLINK_AWAIT_ACK, SENDLINK_ACK_TIMEOUT_SECS, SENDLINK_DOWNLOAD_DIR.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Rendezvous service, `host:port` (default 127.0.0.1:45700).
    #[serde(default = "default_rendezvous_addr")]
    pub rendezvous_addr: String,
    /// Where the initiator listens for its peer (default 0.0.0.0:0, any port).
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Address published to the rendezvous instead of the observed one.
    #[serde(default)]
    pub advertise_addr: Option<SocketAddr>,
    /// Prefix for printed share links.
    #[serde(default = "default_link_base")]
    pub link_base: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_negotiation_timeout_secs")]
    pub negotiation_timeout_secs: u64,
    /// Sender waits for the receiver's acknowledgement (default true).
    #[serde(default = "default_await_ack")]
    pub await_ack: bool,
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
    /// Where received files go (default: current directory).
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
}

fn default_rendezvous_addr() -> String {
    "127.0.0.1:45700".to_string()
}
fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 0))
}
fn default_link_base() -> String {
    "sendlink://open".to_string()
}
fn default_chunk_size() -> usize {
    sendlink_core::chunk::DEFAULT_CHUNK_SIZE
}
fn default_negotiation_timeout_secs() -> u64 {
    300
}
fn default_await_ack() -> bool {
    true
}
fn default_ack_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rendezvous_addr: default_rendezvous_addr(),
            listen_addr: default_listen_addr(),
            advertise_addr: None,
            link_base: default_link_base(),
            chunk_size: default_chunk_size(),
            negotiation_timeout_secs: default_negotiation_timeout_secs(),
            await_ack: default_await_ack(),
            ack_timeout_secs: default_ack_timeout_secs(),
            download_dir: None,
        }
    }
}

impl Config {
    pub fn signaling(&self) -> TcpSignaling {
        TcpSignaling::new(self.rendezvous_addr.clone(), self.listen_addr)
            .with_advertise_addr(self.advertise_addr)
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_secs)
    }

    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            chunk_size: self.chunk_size,
            await_ack: self.await_ack,
            ack_timeout: Duration::from_secs(self.ack_timeout_secs),
        }
    }

    pub fn download_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Apply `SENDLINK_*` overrides. Unparseable values are ignored with a warning.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(name: &str, value: Option<String>) -> Option<T> {
            let value = value?;
            match value.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(var = name, %value, "ignoring unparseable override");
                    None
                }
            }
        }

        if let Some(s) = var("SENDLINK_RENDEZVOUS_ADDR") {
            self.rendezvous_addr = s;
        }
        if let Some(a) = parsed("SENDLINK_LISTEN_ADDR", var("SENDLINK_LISTEN_ADDR")) {
            self.listen_addr = a;
        }
        if let Some(a) = parsed("SENDLINK_ADVERTISE_ADDR", var("SENDLINK_ADVERTISE_ADDR")) {
            self.advertise_addr = Some(a);
        }
        if let Some(s) = var("SENDLINK_LINK_BASE") {
            self.link_base = s;
        }
        if let Some(n) = parsed("SENDLINK_CHUNK_SIZE", var("SENDLINK_CHUNK_SIZE")) {
            self.chunk_size = n;
        }
        if let Some(n) = parsed(
            "SENDLINK_NEGOTIATION_TIMEOUT_SECS",
            var("SENDLINK_NEGOTIATION_TIMEOUT_SECS"),
        ) {
            self.negotiation_timeout_secs = n;
        }
        if let Some(b) = parsed("SENDLINK_AWAIT_ACK", var("SENDLINK_AWAIT_ACK")) {
            self.await_ack = b;
        }
        if let Some(n) = parsed("SENDLINK_ACK_TIMEOUT_SECS", var("SENDLINK_ACK_TIMEOUT_SECS")) {
            self.ack_timeout_secs = n;
        }
        if let Some(p) = var("SENDLINK_DOWNLOAD_DIR") {
            self.download_dir = Some(PathBuf::from(p));
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    c.apply_env(|name| std::env::var(name).ok());
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/sendlink/config.toml"));
    }
    out.push(PathBuf::from("/etc/sendlink/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p).map(|s| toml::from_str::<Config>(&s)) {
                Ok(Ok(c)) => {
                    tracing::debug!(path = %p.display(), "loaded config");
                    return Some(c);
                }
                Ok(Err(e)) => tracing::warn!(path = %p.display(), error = %e, "invalid config, using defaults"),
                Err(e) => tracing::warn!(path = %p.display(), error = %e, "unreadable config, using defaults"),
            }
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let c: Config = toml::from_str(
            r#"
            rendezvous_addr = "rv.example.net:45700"
            await_ack = false
            "#,
        )
        .unwrap();
        assert_eq!(c.rendezvous_addr, "rv.example.net:45700");
        assert!(!c.await_ack);
        assert_eq!(c.chunk_size, 16 * 1024);
        assert_eq!(c.listen_addr, default_listen_addr());
        assert!(c.advertise_addr.is_none());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(toml::from_str::<Config>("chunk = 1").is_err());
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("SENDLINK_LISTEN_ADDR", "127.0.0.1:9000"),
            ("SENDLINK_ADVERTISE_ADDR", "203.0.113.5:9000"),
            ("SENDLINK_CHUNK_SIZE", "4096"),
            ("SENDLINK_AWAIT_ACK", "false"),
            ("SENDLINK_ACK_TIMEOUT_SECS", "nope"),
            ("SENDLINK_DOWNLOAD_DIR", "/tmp/in"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        c.apply_env(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(c.listen_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(c.advertise_addr, Some("203.0.113.5:9000".parse().unwrap()));
        assert_eq!(c.chunk_size, 4096);
        assert!(!c.await_ack);
        // Unparseable value leaves the default alone.
        assert_eq!(c.ack_timeout_secs, 30);
        assert_eq!(c.download_dir(), PathBuf::from("/tmp/in"));
        assert_eq!(c.rendezvous_addr, default_rendezvous_addr());
    }

    #[test]
    fn transfer_options_follow_config() {
        let c = Config {
            chunk_size: 1024,
            ack_timeout_secs: 5,
            ..Config::default()
        };
        let o = c.transfer_options();
        assert_eq!(o.chunk_size, 1024);
        assert!(o.await_ack);
        assert_eq!(o.ack_timeout, Duration::from_secs(5));
        assert_eq!(c.negotiation_timeout(), Duration::from_secs(300));
    }
}
