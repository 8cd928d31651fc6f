//! System configuration and its defaults.
//!
//! All tunables of the orchestration layer live here so the device crate
//! does not repeat constants. Values can be loaded from the environment
//! with [`SystemConfig::from_env`] or deserialized with serde.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default values
pub mod defaults {
    /// Interval between hub status polls after a reset
    pub const RESET_POLL_INTERVAL_MS: u64 = 1000;
    /// Log a warning every this many unsuccessful reset polls
    pub const RESET_WARN_AFTER_POLLS: u32 = 10;
}

/// Environment variable names
pub mod env_vars {
    pub const RESET_POLL_INTERVAL_MS: &str = "ICOSTATE_RESET_POLL_INTERVAL_MS";
    pub const RESET_TIMEOUT_MS: &str = "ICOSTATE_RESET_TIMEOUT_MS";
    pub const LISTENER_POLICY: &str = "ICOSTATE_LISTENER_POLICY";
}

/// How a failing event listener affects the remaining dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerPolicy {
    /// Log the failure and continue with the next listener
    #[default]
    Isolate,
    /// Stop at the first failure and report it to the caller
    FailFast,
}

impl std::str::FromStr for ListenerPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "isolate" => Ok(Self::Isolate),
            "fail_fast" | "fail-fast" | "failfast" => Ok(Self::FailFast),
            other => Err(Error::Config(format!("Unknown listener policy: {other}"))),
        }
    }
}

/// Configuration of the stateful system layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Interval between hub status polls while waiting for a reset to finish
    pub reset_poll_interval_ms: u64,
    /// Give up waiting for the hub after a reset; `None` waits indefinitely
    pub reset_timeout_ms: Option<u64>,
    /// Warn every this many polls while the hub is not ready
    pub reset_warn_after_polls: u32,
    /// Listener failure handling
    pub listener_policy: ListenerPolicy,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            reset_poll_interval_ms: defaults::RESET_POLL_INTERVAL_MS,
            reset_timeout_ms: None,
            reset_warn_after_polls: defaults::RESET_WARN_AFTER_POLLS,
            listener_policy: ListenerPolicy::default(),
        }
    }
}

impl SystemConfig {
    /// Load the configuration, applying environment overrides to the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(env_vars::RESET_POLL_INTERVAL_MS) {
            config.reset_poll_interval_ms = parse_millis(env_vars::RESET_POLL_INTERVAL_MS, &value)?;
        }
        if let Some(value) = lookup(env_vars::RESET_TIMEOUT_MS) {
            config.reset_timeout_ms = Some(parse_millis(env_vars::RESET_TIMEOUT_MS, &value)?);
        }
        if let Some(value) = lookup(env_vars::LISTENER_POLICY) {
            config.listener_policy = value.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the reset poll interval, rounded up to whole milliseconds.
    pub fn with_reset_poll_interval(mut self, interval: Duration) -> Self {
        self.reset_poll_interval_ms = ceil_millis(interval);
        self
    }

    /// Set the reset timeout, rounded up to whole milliseconds.
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout_ms = Some(ceil_millis(timeout));
        self
    }

    /// Set the listener policy.
    pub fn with_listener_policy(mut self, policy: ListenerPolicy) -> Self {
        self.listener_policy = policy;
        self
    }

    /// Reject values the reset loop cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.reset_poll_interval_ms == 0 {
            return Err(Error::Config(
                "reset_poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.reset_warn_after_polls == 0 {
            return Err(Error::Config(
                "reset_warn_after_polls must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn reset_poll_interval(&self) -> Duration {
        Duration::from_millis(self.reset_poll_interval_ms)
    }

    pub fn reset_timeout(&self) -> Option<Duration> {
        self.reset_timeout_ms.map(Duration::from_millis)
    }
}

fn ceil_millis(duration: Duration) -> u64 {
    let mut millis = duration.as_millis();
    if duration.subsec_nanos() % 1_000_000 != 0 {
        millis += 1;
    }
    u64::try_from(millis).unwrap_or(u64::MAX)
}

fn parse_millis(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| Error::Config(format!("Invalid value for {key}: '{value}' ({e})")))
}
