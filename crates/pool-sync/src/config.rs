use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anchor_lang::prelude::Pubkey;
use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::CommitmentConfig;
use tracing::info;

use crate::constants::*;
use crate::errors::ConfigError;
use crate::math::LinearFeeCurve;
use crate::transaction::PriorityFeeTier;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub rpc: RpcSettings,
    pub pool: PoolSettings,
    pub sync: SyncSettings,
    pub fees: LinearFeeCurve,
    pub transaction: TransactionSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSettings {
    pub http_url: String,
    pub ws_url: String,
    /// processed | confirmed | finalized
    pub commitment: String,
    pub max_accounts_per_request: usize,
    pub max_requests_per_second: u32,
    pub max_retries: u32,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            http_url: "https://api.mainnet-beta.solana.com".to_string(),
            ws_url: "wss://api.mainnet-beta.solana.com".to_string(),
            commitment: "confirmed".to_string(),
            max_accounts_per_request: MAX_ACCOUNTS_PER_REQUEST,
            max_requests_per_second: DEFAULT_MAX_REQUESTS_PER_SECOND,
            max_retries: 3,
            retry_initial_ms: 200,
            retry_max_ms: 2_000,
        }
    }
}

impl RpcSettings {
    pub fn commitment_config(&self) -> CommitmentConfig {
        match self.commitment.as_str() {
            "processed" => CommitmentConfig::processed(),
            "finalized" => CommitmentConfig::finalized(),
            _ => CommitmentConfig::confirmed(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub program_id: String,
    pub pool_config: String,
}

impl PoolSettings {
    pub fn program_id(&self) -> Result<Pubkey, ConfigError> {
        parse_address("pool.program_id", &self.program_id)
    }

    pub fn pool_config(&self) -> Result<Pubkey, ConfigError> {
        parse_address("pool.pool_config", &self.pool_config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub throttle_ms: u64,
    pub freshness_window_secs: i64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            throttle_ms: DEFAULT_THROTTLE_MS,
            freshness_window_secs: DEFAULT_FRESHNESS_WINDOW_SECS,
        }
    }
}

impl SyncSettings {
    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionSettings {
    pub compute_unit_limit: u32,
    /// micro-lamports per compute unit for each tier
    pub priority_fee_low: u64,
    pub priority_fee_medium: u64,
    pub priority_fee_high: u64,
    pub slippage_bps: u16,
    pub confirm_poll_ms: u64,
    pub confirm_timeout_secs: u64,
}

impl Default for TransactionSettings {
    fn default() -> Self {
        Self {
            compute_unit_limit: DEFAULT_COMPUTE_UNIT_LIMIT,
            priority_fee_low: 1_000,
            priority_fee_medium: 10_000,
            priority_fee_high: 100_000,
            slippage_bps: DEFAULT_SLIPPAGE_BPS,
            confirm_poll_ms: 1_000,
            confirm_timeout_secs: 90,
        }
    }
}

impl TransactionSettings {
    pub fn priority_fee(&self, tier: PriorityFeeTier) -> u64 {
        match tier {
            PriorityFeeTier::Low => self.priority_fee_low,
            PriorityFeeTier::Medium => self.priority_fee_medium,
            PriorityFeeTier::High => self.priority_fee_high,
        }
    }

    pub fn confirm_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }
}

fn parse_address(field: &'static str, value: &str) -> Result<Pubkey, ConfigError> {
    Pubkey::from_str(value.trim()).map_err(|_| ConfigError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

impl Settings {
    /// Loads a TOML file, then applies environment overrides and validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path.as_ref())?;
        let mut settings = Self::from_toml(&raw)?;
        settings.apply_env_overrides();
        settings.validate()?;
        info!(path = %path.as_ref().display(), "configuration loaded");
        Ok(settings)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("POOL_SYNC_RPC_URL") {
            self.rpc.http_url = url;
        }
        if let Ok(url) = env::var("POOL_SYNC_WS_URL") {
            self.rpc.ws_url = url;
        }
        if let Ok(program) = env::var("POOL_SYNC_PROGRAM_ID") {
            self.pool.program_id = program;
        }
        if let Ok(pool) = env::var("POOL_SYNC_POOL_CONFIG") {
            self.pool.pool_config = pool;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let chunk = self.rpc.max_accounts_per_request;
        if chunk == 0 || chunk > 100 {
            return Err(ConfigError::Invalid(format!(
                "rpc.max_accounts_per_request must be within 1..=100, got {chunk}"
            )));
        }
        if self.rpc.max_requests_per_second == 0 {
            return Err(ConfigError::Invalid(
                "rpc.max_requests_per_second must be positive".to_string(),
            ));
        }
        if self.transaction.slippage_bps as u64 > BPS_DENOMINATOR {
            return Err(ConfigError::Invalid(format!(
                "transaction.slippage_bps must not exceed {BPS_DENOMINATOR}"
            )));
        }
        if self.sync.throttle_ms == 0 {
            return Err(ConfigError::Invalid(
                "sync.throttle_ms must be positive".to_string(),
            ));
        }
        if self.fees.max_fee_bps < self.fees.base_fee_bps {
            return Err(ConfigError::Invalid(
                "fees.max_fee_bps must be at least fees.base_fee_bps".to_string(),
            ));
        }
        self.pool.program_id()?;
        self.pool.pool_config()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PROGRAM: &str = "2chVPk6DV21qWuyUA2eHAzATdFSHM7ykv1fVX7Gv6nor";
    const POOL: &str = "11111111111111111111111111111111";

    #[test]
    fn partial_file_uses_defaults() {
        let raw = format!(
            r#"
            [pool]
            program_id = "{PROGRAM}"
            pool_config = "{POOL}"

            [sync]
            throttle_ms = 750
            "#
        );
        let settings = Settings::from_toml(&raw).unwrap();
        assert_eq!(settings.sync.throttle_ms, 750);
        assert_eq!(settings.sync.freshness_window_secs, DEFAULT_FRESHNESS_WINDOW_SECS);
        assert_eq!(settings.rpc.max_accounts_per_request, MAX_ACCOUNTS_PER_REQUEST);
        assert_eq!(settings.fees, LinearFeeCurve::default());
        assert!(settings.validate().is_ok());
        assert_eq!(settings.pool.program_id().unwrap().to_string(), PROGRAM);
    }

    #[test]
    fn load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[pool]\nprogram_id = \"{PROGRAM}\"\npool_config = \"{POOL}\"\n[transaction]\nslippage_bps = 100"
        )
        .unwrap();
        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.transaction.slippage_bps, 100);
        assert_eq!(settings.transaction.priority_fee(PriorityFeeTier::High), 100_000);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut settings = Settings {
            pool: PoolSettings {
                program_id: PROGRAM.to_string(),
                pool_config: POOL.to_string(),
            },
            ..Settings::default()
        };
        assert!(settings.validate().is_ok());

        settings.rpc.max_accounts_per_request = 0;
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
        settings.rpc.max_accounts_per_request = 99;

        settings.transaction.slippage_bps = 10_001;
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
        settings.transaction.slippage_bps = 50;

        settings.pool.pool_config = "not-an-address".to_string();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidAddress {
                field: "pool.pool_config",
                ..
            })
        ));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            Settings::from_toml("[rpc\nhttp_url = 1"),
            Err(ConfigError::Parse(_))
        ));
    }
}
