//! Configuration for a LockID platform node and its clients

use crate::constants;
use crate::error::ConfigError;
use crate::fees::{FeeSchedule, FixedFeeSchedule, SizeFeeSchedule};
use lockid_core::Credits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Environment variable that switches confirmation waiting to block generation
pub const REGTEST_ENV: &str = "REGTEST";

/// Platform configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Credit conversion and pricing
    pub credits: CreditsConfig,
    /// Confirmation waiting
    pub confirmation: ConfirmationConfig,
    /// Client resubmission after retryable rejections
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditsConfig {
    /// Credits granted per locked duff
    pub credits_per_duff: Credits,
    /// Maximum operations in one documents batch
    pub max_batch_operations: usize,
    /// Fee schedule
    pub fees: FeeConfig,
}

/// Which fee schedule prices transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum FeeConfig {
    /// Price per serialized byte
    Size { price_per_byte: Credits },
    /// Constant fee per transition kind
    Fixed {
        identity_create: Credits,
        identity_top_up: Credits,
        per_document_operation: Credits,
    },
}

impl FeeConfig {
    pub fn build(&self) -> Arc<dyn FeeSchedule> {
        match *self {
            FeeConfig::Size { price_per_byte } => Arc::new(SizeFeeSchedule { price_per_byte }),
            FeeConfig::Fixed {
                identity_create,
                identity_top_up,
                per_document_operation,
            } => Arc::new(FixedFeeSchedule {
                identity_create,
                identity_top_up,
                per_document_operation,
            }),
        }
    }
}

/// How clients wait for lock transactions to confirm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitMode {
    /// Poll chain status
    Poll,
    /// Request block production (regtest)
    Generate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    pub mode: WaitMode,
    /// Seconds between status reads in poll mode
    pub poll_interval_secs: u64,
    /// Confirmations a lock needs before the validator accepts it
    pub min_confirmations: u64,
}

/// Backoff between resubmissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub strategy: BackoffStrategy,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Total submission attempts; unbounded when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            credits: CreditsConfig::default(),
            confirmation: ConfirmationConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for CreditsConfig {
    fn default() -> Self {
        let fees = FixedFeeSchedule::default();
        Self {
            credits_per_duff: constants::CREDITS_PER_DUFF,
            max_batch_operations: constants::MAX_BATCH_OPERATIONS,
            fees: FeeConfig::Fixed {
                identity_create: fees.identity_create,
                identity_top_up: fees.identity_top_up,
                per_document_operation: fees.per_document_operation,
            },
        }
    }
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            mode: WaitMode::Poll,
            poll_interval_secs: constants::POLL_INTERVAL_SECS,
            min_confirmations: constants::MIN_CONFIRMATIONS,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: None,
        }
    }
}

impl PlatformConfig {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: PlatformConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default configuration directory
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir().unwrap_or_default().join("lockid")
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        let regtest = std::env::var(REGTEST_ENV).ok();
        self.apply_regtest_flag(regtest.as_deref());
    }

    /// `REGTEST=true` switches waiting to block generation
    pub fn apply_regtest_flag(&mut self, value: Option<&str>) {
        if value.map_or(false, |v| v.eq_ignore_ascii_case("true")) {
            self.confirmation.mode = WaitMode::Generate;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.credits.credits_per_duff == 0 {
            return Err(ConfigError::Invalid(
                "credits_per_duff cannot be zero".to_string(),
            ));
        }

        if self.credits.max_batch_operations == 0 {
            return Err(ConfigError::Invalid(
                "max_batch_operations cannot be zero".to_string(),
            ));
        }

        if self.confirmation.mode == WaitMode::Poll && self.confirmation.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs cannot be zero in poll mode".to_string(),
            ));
        }

        if self.retry.initial_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "Retry initial delay cannot be zero".to_string(),
            ));
        }

        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return Err(ConfigError::Invalid(
                "Retry max delay is below the initial delay".to_string(),
            ));
        }

        if self.retry.max_attempts == Some(0) {
            return Err(ConfigError::Invalid(
                "max_attempts must allow at least one attempt".to_string(),
            ));
        }

        Ok(())
    }
}
