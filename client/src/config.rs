use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anchor_client::solana_sdk::commitment_config::CommitmentConfig;
use anchor_lang::prelude::Pubkey;
use serde::Deserialize;

use crate::error::{ClientError, Result};
use crate::outbox::DEFAULT_MAX_ATTEMPTS;
use crate::price::COINGECKO_SIMPLE_PRICE;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub rpc_url: String,
    pub commitment: String,
    pub api_base_url: String,
    pub price_api_url: String,
    pub program_id: Option<String>,
    pub token_mint: Option<String>,
    pub default_decimals: u8,
    pub default_presale_identifier: u8,
    pub confirm_timeout_secs: u64,
    pub confirm_poll_interval_ms: u64,
    pub price_poll_interval_secs: u64,
    pub retry: RetryPolicy,
    pub outbox_path: Option<PathBuf>,
    pub outbox_max_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            commitment: "confirmed".to_string(),
            api_base_url: "http://localhost:3000".to_string(),
            price_api_url: COINGECKO_SIMPLE_PRICE.to_string(),
            program_id: None,
            token_mint: None,
            default_decimals: 6,
            default_presale_identifier: 1,
            confirm_timeout_secs: 60,
            confirm_poll_interval_ms: 500,
            price_poll_interval_secs: 60,
            retry: RetryPolicy::default(),
            outbox_path: None,
            outbox_max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

fn parse_key(field: &str, value: &str) -> Result<Pubkey> {
    Pubkey::from_str(value).map_err(|e| ClientError::Config(format!("{field} `{value}`: {e}")))
}

impl ClientConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ClientError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Periods and limits must be non-zero.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("confirm_timeout_secs", self.confirm_timeout_secs),
            ("confirm_poll_interval_ms", self.confirm_poll_interval_ms),
            ("price_poll_interval_secs", self.price_poll_interval_secs),
            ("outbox_max_attempts", u64::from(self.outbox_max_attempts)),
            ("retry.max_attempts", u64::from(self.retry.max_attempts)),
        ];
        match checks.iter().find(|(_, value)| *value == 0) {
            Some((field, _)) => Err(ClientError::Config(format!("{field} must be non-zero"))),
            None => Ok(()),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn program_id(&self) -> Result<Pubkey> {
        match &self.program_id {
            Some(value) => parse_key("program_id", value),
            None => Ok(token_presale::ID),
        }
    }

    pub fn token_mint(&self) -> Result<Option<Pubkey>> {
        self.token_mint
            .as_deref()
            .map(|value| parse_key("token_mint", value))
            .transpose()
    }

    pub fn commitment(&self) -> Result<CommitmentConfig> {
        CommitmentConfig::from_str(&self.commitment)
            .map_err(|_| ClientError::Config(format!("unknown commitment `{}`", self.commitment)))
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn confirm_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_interval_ms)
    }

    pub fn price_poll_interval(&self) -> Duration {
        Duration::from_secs(self.price_poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = ClientConfig::from_toml_str("").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.program_id().unwrap(), token_presale::ID);
        assert_eq!(config.token_mint().unwrap(), None);
        assert_eq!(config.commitment().unwrap(), CommitmentConfig::confirmed());
        assert_eq!(config.confirm_timeout(), Duration::from_secs(60));
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn overrides_are_applied() {
        let mint = Pubkey::new_unique();
        let config = ClientConfig::from_toml_str(&format!(
            r#"
            rpc_url = "http://127.0.0.1:8899"
            commitment = "finalized"
            token_mint = "{mint}"
            default_decimals = 9
            confirm_timeout_secs = 5

            [retry]
            max_attempts = 3
            "#
        ))
        .unwrap();
        assert_eq!(config.rpc_url, "http://127.0.0.1:8899");
        assert_eq!(config.commitment().unwrap(), CommitmentConfig::finalized());
        assert_eq!(config.token_mint().unwrap(), Some(mint));
        assert_eq!(config.default_decimals, 9);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay_ms, 1_000);
    }

    #[test]
    fn bad_values_are_config_errors() {
        let config = ClientConfig {
            program_id: Some("not-a-key".into()),
            commitment: "eventually".into(),
            ..ClientConfig::default()
        };
        assert!(matches!(config.program_id(), Err(ClientError::Config(_))));
        assert!(matches!(config.commitment(), Err(ClientError::Config(_))));
        assert!(ClientConfig::from_toml_str("default_decimals = \"six\"").is_err());
    }

    #[test]
    fn zero_periods_are_rejected() {
        let err = ClientConfig::from_toml_str("price_poll_interval_secs = 0").unwrap_err();
        assert!(err.to_string().contains("price_poll_interval_secs"), "{err}");

        let config = ClientConfig {
            confirm_poll_interval_ms: 0,
            ..ClientConfig::default()
        };
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));
        assert!(ClientConfig::default().validate().is_ok());
    }
}
