//! Engine configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use timetoken_chain::OracleRequestParams;
use timetoken_types::Subject;

use crate::error::EngineError;
use crate::logging::LogFormat;

/// Configuration for a [`ReconciliationEngine`](crate::ReconciliationEngine).
///
/// Loaded from a TOML file via [`EngineConfig::from_toml_file`] or built
/// programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Ethereum JSON-RPC endpoint. Must be able to sign for the sender, since
    /// requests go out through `eth_sendTransaction`.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Deployed access-credential contract.
    #[serde(default)]
    pub contract_address: String,

    /// Account that pays for `requestVerification`. Defaults to the subject.
    #[serde(default)]
    pub sender_address: Option<String>,

    /// Base URL of the off-chain verification service.
    #[serde(default = "default_verification_url")]
    pub verification_url: String,

    /// Chainlink Functions billing subscription.
    #[serde(default)]
    pub subscription_id: u64,

    /// DON-hosted secrets slot.
    #[serde(default)]
    pub secrets_slot: u8,

    /// DON-hosted secrets version.
    #[serde(default)]
    pub secrets_version: u64,

    /// Seconds between callback polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Polls before a monitoring session gives up.
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    /// Upper bound on waiting for the request transaction to be included.
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,

    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,

    /// How long an unmonitored pending request blocks new submissions.
    #[serde(default = "default_claim_ttl_secs")]
    pub claim_ttl_secs: u64,

    /// Lifetime of session-cached levels (display hints only).
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_rpc_url() -> String {
    "http://127.0.0.1:8545".to_string()
}

fn default_verification_url() -> String {
    "http://127.0.0.1:4000".to_string()
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_max_poll_attempts() -> u32 {
    30
}

fn default_confirmation_timeout_secs() -> u64 {
    120
}

fn default_receipt_poll_interval_ms() -> u64 {
    1000
}

fn default_claim_ttl_secs() -> u64 {
    900
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl EngineConfig {
    pub fn from_toml_file(path: &str) -> Result<Self, EngineError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, EngineError> {
        toml::from_str(s).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, EngineError> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Check timing and address settings.
    ///
    /// An empty `contract_address` is accepted here so that engines built on
    /// injected collaborators need not configure one; see
    /// [`EngineConfig::contract`].
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.poll_interval_secs == 0 {
            return Err(EngineError::Config("poll_interval_secs must be > 0".into()));
        }
        if self.max_poll_attempts == 0 {
            return Err(EngineError::Config("max_poll_attempts must be > 0".into()));
        }
        if self.confirmation_timeout_secs == 0 {
            return Err(EngineError::Config(
                "confirmation_timeout_secs must be > 0".into(),
            ));
        }
        if self.receipt_poll_interval_ms == 0 {
            return Err(EngineError::Config(
                "receipt_poll_interval_ms must be > 0".into(),
            ));
        }
        // A live monitor must never outlast the claim it is watching over.
        if self.claim_ttl() < self.monitor_window() {
            return Err(EngineError::Config(format!(
                "claim_ttl_secs ({}) must cover poll_interval_secs * max_poll_attempts ({})",
                self.claim_ttl_secs,
                self.monitor_window().as_secs()
            )));
        }
        if !self.contract_address.is_empty() {
            self.contract()?;
        }
        self.sender()?;
        self.log_format.parse::<LogFormat>()?;
        Ok(())
    }

    /// The configured contract address, required for RPC-backed engines.
    pub fn contract(&self) -> Result<Subject, EngineError> {
        if self.contract_address.is_empty() {
            return Err(EngineError::Config("contract_address is not set".into()));
        }
        Subject::parse(&self.contract_address)
            .map_err(|e| EngineError::Config(format!("contract_address: {e}")))
    }

    pub fn sender(&self) -> Result<Option<Subject>, EngineError> {
        self.sender_address
            .as_deref()
            .map(|raw| {
                Subject::parse(raw).map_err(|e| EngineError::Config(format!("sender_address: {e}")))
            })
            .transpose()
    }

    pub fn oracle_params(&self) -> OracleRequestParams {
        OracleRequestParams {
            secrets_slot: self.secrets_slot,
            secrets_version: self.secrets_version,
            subscription_id: self.subscription_id,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Longest a monitoring session can run.
    pub fn monitor_window(&self) -> Duration {
        self.poll_interval() * self.max_poll_attempts
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn claim_ttl(&self) -> Duration {
        Duration::from_secs(self.claim_ttl_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            contract_address: String::new(),
            sender_address: None,
            verification_url: default_verification_url(),
            subscription_id: 0,
            secrets_slot: 0,
            secrets_version: 0,
            poll_interval_secs: default_poll_interval_secs(),
            max_poll_attempts: default_max_poll_attempts(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
            claim_ttl_secs: default_claim_ttl_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}
