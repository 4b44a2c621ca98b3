//! Deployment configuration
//!
//! Addresses and tuning knobs are data, never literals in the workflow code.
//! Sources are layered: JSON file, then `ORCH_*` environment variables, then
//! command-line flags, each overriding the previous one.

use crate::balances::ReadRetry;
use crate::error::OrchestrationError;
use crate::models::{PoolRef, TokenRef};
use crate::Result;
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
pub const DEFAULT_DECIMALS: u8 = 18;
pub const DEFAULT_INCLUSION_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_DEADLINE_WINDOW_SECS: u64 = 600;

/// Fully resolved settings for one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentConfig {
    pub rpc_url: String,
    /// Signing account; the node's first account when unset.
    pub sender: Option<Address>,
    pub pool: PoolRef,
    pub verifier: Option<Address>,
    pub inclusion_timeout: Duration,
    pub poll_interval: Duration,
    pub deadline_window: Duration,
    pub read_retry: ReadRetry,
}

/// One configuration source; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartialConfig {
    pub rpc_url: Option<String>,
    pub sender: Option<Address>,
    pub pool: Option<Address>,
    pub token_a: Option<Address>,
    pub token_b: Option<Address>,
    pub decimals_a: Option<u8>,
    pub decimals_b: Option<u8>,
    pub verifier: Option<Address>,
    pub inclusion_timeout_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub deadline_window_secs: Option<u64>,
    pub read_retries: Option<usize>,
}

impl PartialConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            OrchestrationError::Config(format!("{}: {}", path.display(), e))
        })
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self {
            rpc_url: env::var("ORCH_RPC_URL").ok(),
            sender: env_var("ORCH_SENDER")?,
            pool: env_var("ORCH_POOL")?,
            token_a: env_var("ORCH_TOKEN_A")?,
            token_b: env_var("ORCH_TOKEN_B")?,
            decimals_a: env_var("ORCH_DECIMALS_A")?,
            decimals_b: env_var("ORCH_DECIMALS_B")?,
            verifier: env_var("ORCH_VERIFIER")?,
            inclusion_timeout_secs: env_var("ORCH_INCLUSION_TIMEOUT_SECS")?,
            poll_interval_ms: env_var("ORCH_POLL_INTERVAL_MS")?,
            deadline_window_secs: env_var("ORCH_DEADLINE_WINDOW_SECS")?,
            read_retries: env_var("ORCH_READ_RETRIES")?,
        })
    }

    /// Layer `overrides` on top of `self`.
    pub fn merge(self, overrides: PartialConfig) -> PartialConfig {
        PartialConfig {
            rpc_url: overrides.rpc_url.or(self.rpc_url),
            sender: overrides.sender.or(self.sender),
            pool: overrides.pool.or(self.pool),
            token_a: overrides.token_a.or(self.token_a),
            token_b: overrides.token_b.or(self.token_b),
            decimals_a: overrides.decimals_a.or(self.decimals_a),
            decimals_b: overrides.decimals_b.or(self.decimals_b),
            verifier: overrides.verifier.or(self.verifier),
            inclusion_timeout_secs: overrides
                .inclusion_timeout_secs
                .or(self.inclusion_timeout_secs),
            poll_interval_ms: overrides.poll_interval_ms.or(self.poll_interval_ms),
            deadline_window_secs: overrides
                .deadline_window_secs
                .or(self.deadline_window_secs),
            read_retries: overrides.read_retries.or(self.read_retries),
        }
    }

    pub fn build(self) -> Result<DeploymentConfig> {
        let pool = self.pool.ok_or_else(|| missing("pool"))?;
        let token_a = TokenRef::new(
            self.token_a.ok_or_else(|| missing("token_a"))?,
            self.decimals_a.unwrap_or(DEFAULT_DECIMALS),
        );
        let token_b = TokenRef::new(
            self.token_b.ok_or_else(|| missing("token_b"))?,
            self.decimals_b.unwrap_or(DEFAULT_DECIMALS),
        );
        let pool = PoolRef::new(pool, token_a, token_b)
            .map_err(|e| OrchestrationError::Config(e.to_string()))?;

        let inclusion_timeout = positive_secs(
            "inclusion_timeout_secs",
            self.inclusion_timeout_secs
                .unwrap_or(DEFAULT_INCLUSION_TIMEOUT_SECS),
        )?;
        let deadline_window = positive_secs(
            "deadline_window_secs",
            self.deadline_window_secs
                .unwrap_or(DEFAULT_DEADLINE_WINDOW_SECS),
        )?;
        let poll_interval =
            Duration::from_millis(self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS).max(1));

        let read_retry = ReadRetry {
            max_retries: self
                .read_retries
                .unwrap_or(ReadRetry::default().max_retries),
            ..ReadRetry::default()
        };

        Ok(DeploymentConfig {
            rpc_url: self.rpc_url.unwrap_or_else(|| DEFAULT_RPC_URL.to_string()),
            sender: self.sender,
            pool,
            verifier: self.verifier,
            inclusion_timeout,
            poll_interval,
            deadline_window,
            read_retry,
        })
    }
}

fn env_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| OrchestrationError::Config(format!("{}: {}", name, e))),
        Err(_) => Ok(None),
    }
}

fn missing(field: &str) -> OrchestrationError {
    OrchestrationError::Config(format!("missing required setting '{}'", field))
}

fn positive_secs(field: &str, secs: u64) -> Result<Duration> {
    if secs == 0 {
        return Err(OrchestrationError::Config(format!(
            "'{}' must be greater than zero",
            field
        )));
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    fn base() -> PartialConfig {
        PartialConfig {
            pool: Some(address!("4AB791880D51CD6A8db850fB14EbB736eCaC12a6")),
            token_a: Some(address!("035d020fFe37b89fB88A9d3eC0bDBc028Dff7848")),
            token_b: Some(address!("77AacFD77b43D11313F0ac31A5f6e340aEd16326")),
            ..PartialConfig::default()
        }
    }

    #[test]
    fn test_defaults_are_applied() {
        let config = base().build().unwrap();

        assert_eq!(config.rpc_url, DEFAULT_RPC_URL);
        assert_eq!(config.pool.token_a.decimals, 18);
        assert_eq!(config.deadline_window, Duration::from_secs(600));
        assert_eq!(config.inclusion_timeout, Duration::from_secs(120));
        assert_eq!(config.sender, None);
        assert_eq!(config.verifier, None);
    }

    #[test]
    fn test_later_sources_override_earlier_ones() {
        let file = PartialConfig {
            rpc_url: Some("http://file:8545".to_string()),
            deadline_window_secs: Some(300),
            ..base()
        };
        let flags = PartialConfig {
            rpc_url: Some("http://flag:8545".to_string()),
            ..PartialConfig::default()
        };

        let config = file.merge(flags).build().unwrap();
        assert_eq!(config.rpc_url, "http://flag:8545");
        assert_eq!(config.deadline_window, Duration::from_secs(300));
    }

    #[test]
    fn test_missing_and_invalid_settings() {
        let no_pool = PartialConfig {
            pool: None,
            ..base()
        };
        assert!(matches!(no_pool.build(), Err(OrchestrationError::Config(_))));

        let same_tokens = PartialConfig {
            token_b: base().token_a,
            ..base()
        };
        assert!(matches!(same_tokens.build(), Err(OrchestrationError::Config(_))));

        let zero_timeout = PartialConfig {
            inclusion_timeout_secs: Some(0),
            ..base()
        };
        assert!(zero_timeout.build().is_err());
    }

    #[test]
    fn test_from_file() {
        let path = env::temp_dir().join(format!("orchestrator-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"{
                "pool": "0x4AB791880D51CD6A8db850fB14EbB736eCaC12a6",
                "token_a": "0x035d020fFe37b89fB88A9d3eC0bDBc028Dff7848",
                "token_b": "0x77AacFD77b43D11313F0ac31A5f6e340aEd16326",
                "verifier": "0x9C982edb7DaFFDA48715E23f426dea88BBE92d84",
                "decimals_b": 6
            }"#,
        )
        .unwrap();

        let config = PartialConfig::from_file(&path).unwrap().build().unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.pool.token_b.decimals, 6);
        assert_eq!(
            config.verifier,
            Some(address!("9C982edb7DaFFDA48715E23f426dea88BBE92d84"))
        );
    }
}
