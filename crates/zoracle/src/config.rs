//! Plugin options — parsed from TOML.
//!
//! ```toml
//! keep_alive = 300
//! connect_timeout = 5
//! call_timeout = 5
//!
//! [sessions.prod]
//! uri = "tcp://db.example.com:1521"
//! user = "zbx_monitor"
//! password = "secret"
//! service = "ORCLPDB1"
//! ```

use std::collections::HashMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use zoracle_conn::ManagerConfig;

/// Interval between idle-connection scans.
pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(10);

const KEEP_ALIVE_RANGE: RangeInclusive<u64> = 60..=900;
const TIMEOUT_RANGE: RangeInclusive<u64> = 1..=30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PluginOptions {
    /// Seconds an unused connection is kept open.
    pub keep_alive: u64,
    /// Seconds allowed for dial plus handshake.
    pub connect_timeout: u64,
    /// Seconds allowed for a single metric query.
    pub call_timeout: u64,
    /// Named connection presets, usable in place of a URI.
    pub sessions: HashMap<String, SessionConfig>,
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self {
            keep_alive: 300,
            connect_timeout: 5,
            call_timeout: 5,
            sessions: HashMap::new(),
        }
    }
}

/// A named session: connection parameters stored in the config file.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub service: String,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("uri", &self.uri)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("service", &self.service)
            .finish()
    }
}

impl PluginOptions {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("loading {}", path.display()))
    }

    /// Parse and validate.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let options: PluginOptions = toml::from_str(content)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        check_range("keep_alive", self.keep_alive, &KEEP_ALIVE_RANGE)?;
        check_range("connect_timeout", self.connect_timeout, &TIMEOUT_RANGE)?;
        check_range("call_timeout", self.call_timeout, &TIMEOUT_RANGE)?;

        for (name, session) in &self.sessions {
            if name.is_empty() {
                bail!("session names must not be empty");
            }
            if session.uri.trim().is_empty() {
                bail!("session {name:?} has no uri");
            }
        }
        Ok(())
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            keep_alive: Duration::from_secs(self.keep_alive),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            call_timeout: Duration::from_secs(self.call_timeout),
            housekeeping_interval: HOUSEKEEPING_INTERVAL,
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn check_range(name: &str, value: u64, range: &RangeInclusive<u64>) -> anyhow::Result<()> {
    if !range.contains(&value) {
        bail!(
            "{name} = {value} is out of range {}..={}",
            range.start(),
            range.end()
        );
    }
    Ok(())
}
