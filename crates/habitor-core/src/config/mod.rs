//! Sync configuration.
//!
//! A `SyncConfig` comes from an optional JSON file, overlaid with `HABITOR_*`
//! environment variables. With no `remote_url` the app runs purely local.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

pub const ENV_REMOTE_URL: &str = "HABITOR_REMOTE_URL";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "HABITOR_REQUEST_TIMEOUT_SECS";
pub const ENV_PROBE_ADDRESS: &str = "HABITOR_PROBE_ADDRESS";
pub const ENV_PROBE_INTERVAL_SECS: &str = "HABITOR_PROBE_INTERVAL_SECS";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PROBE_INTERVAL_SECS: u64 = 30;

/// Remote endpoint and connectivity probing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Base URL of the document store, e.g. `https://sync.example.com`
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// `host:port` dialled to decide whether the device is online
    #[serde(default)]
    pub probe_address: Option<String>,
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            probe_address: None,
            probe_interval_secs: DEFAULT_PROBE_INTERVAL_SECS,
        }
    }
}

impl SyncConfig {
    /// Read the config file (when it exists), apply the environment, validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)?;
                Self::from_json_str(&raw)?
            }
            _ => Self::default(),
        };
        base.with_overrides(|key| std::env::var(key).ok())?.validated()
    }

    /// Parse a JSON config payload without validating it.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|error| Error::Config(format!("invalid config JSON: {error}")))
    }

    /// Environment-only configuration.
    pub fn from_env() -> Result<Self> {
        Self::default()
            .with_overrides(|key| std::env::var(key).ok())?
            .validated()
    }

    /// Overlay values found by `lookup` on top of `self`.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = normalize_text_option(lookup(ENV_REMOTE_URL)) {
            self.remote_url = Some(url);
        }
        if let Some(address) = normalize_text_option(lookup(ENV_PROBE_ADDRESS)) {
            self.probe_address = Some(address);
        }
        if let Some(raw) = normalize_text_option(lookup(ENV_REQUEST_TIMEOUT_SECS)) {
            self.request_timeout_secs = parse_secs(&raw, ENV_REQUEST_TIMEOUT_SECS)?;
        }
        if let Some(raw) = normalize_text_option(lookup(ENV_PROBE_INTERVAL_SECS)) {
            self.probe_interval_secs = parse_secs(&raw, ENV_PROBE_INTERVAL_SECS)?;
        }
        Ok(self)
    }

    /// Normalize optional fields and reject values that cannot work.
    pub fn validated(mut self) -> Result<Self> {
        self.remote_url = match normalize_text_option(self.remote_url.take()) {
            Some(url) if is_http_url(&url) => Some(url.trim_end_matches('/').to_string()),
            Some(_) => {
                return Err(Error::Config(
                    "remote_url must include http:// or https://".to_string(),
                ))
            }
            None => None,
        };

        self.probe_address = normalize_text_option(self.probe_address.take());
        if let Some(address) = &self.probe_address {
            check_host_port(address).map_err(|reason| {
                Error::Config(format!("probe_address '{address}' is not host:port: {reason}"))
            })?;
        }

        if self.request_timeout_secs == 0 {
            return Err(Error::Config("request_timeout_secs must be positive".to_string()));
        }
        if self.probe_interval_secs == 0 {
            return Err(Error::Config("probe_interval_secs must be positive".to_string()));
        }
        Ok(self)
    }

    pub fn sync_configured(&self) -> bool {
        self.remote_url.is_some()
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// Accepts `host:port` with a DNS name, an IPv4 address or a bracketed IPv6 address
fn check_host_port(address: &str) -> std::result::Result<(), String> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| "missing port".to_string())?;

    match port.parse::<u16>() {
        Ok(0) | Err(_) => return Err(format!("invalid port '{port}'")),
        Ok(_) => {}
    }

    let host = match host.strip_prefix('[') {
        Some(bracketed) => bracketed
            .strip_suffix(']')
            .filter(|ip| ip.parse::<std::net::Ipv6Addr>().is_ok())
            .ok_or_else(|| format!("invalid IPv6 host '{host}'"))?,
        None => host,
    };
    if host.is_empty() {
        return Err("missing host".to_string());
    }
    if !address.starts_with('[') && host.contains(':') {
        return Err("IPv6 hosts must be bracketed".to_string());
    }
    if host.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(format!("invalid host '{host}'"));
    }
    Ok(())
}

const fn default_probe_interval_secs() -> u64 {
    DEFAULT_PROBE_INTERVAL_SECS
}

fn parse_secs(raw: &str, key: &str) -> Result<u64> {
    raw.parse()
        .map_err(|_| Error::Config(format!("{key} must be a whole number of seconds, got '{raw}'")))
}
