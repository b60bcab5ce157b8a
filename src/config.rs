use std::collections::BTreeSet;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::breaker::BreakerPolicy;
use crate::engine::{EngineConfig, DEFAULT_DEQUEUE_INTERVAL, DEFAULT_SHUTDOWN_GRACE};
use crate::lifecycle::AckMode;
use crate::resilience::{Backoff, RetryPolicy};

/// Whether message lifecycles are persisted to the audit store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditMode {
    #[default]
    Persisted,
    Disabled,
}

/// Handler retry policy as loaded from configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, so 1 disables retries.
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default)]
    pub exponential: bool,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        let backoff = if self.backoff_ms == 0 {
            Backoff::None
        } else if self.exponential {
            Backoff::Exponential {
                initial: Duration::from_millis(self.backoff_ms),
                multiplier: self.multiplier,
                max: Duration::from_millis(self.max_backoff_ms),
            }
        } else {
            Backoff::Fixed(Duration::from_millis(self.backoff_ms))
        };
        RetryPolicy::new(self.max_attempts, backoff)
    }
}

/// One tracked circuit breaker as loaded from configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerEntry {
    pub name: String,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_open_duration_ms")]
    pub open_duration_ms: u64,
}

impl BreakerEntry {
    pub fn policy(&self) -> BreakerPolicy {
        BreakerPolicy::default()
            .with_failure_threshold(self.failure_threshold)
            .with_success_threshold(self.success_threshold)
            .with_open_duration(Duration::from_millis(self.open_duration_ms))
    }
}

/// Bounded retry applied to every individual audit-store write.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditWriteConfig {
    #[serde(default = "default_audit_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_audit_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for AuditWriteConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_audit_attempts(),
            backoff_ms: default_audit_backoff_ms(),
        }
    }
}

impl AuditWriteConfig {
    pub fn policy(&self) -> RetryPolicy {
        let backoff = if self.backoff_ms == 0 {
            Backoff::None
        } else {
            Backoff::Fixed(Duration::from_millis(self.backoff_ms))
        };
        RetryPolicy::new(self.max_attempts, backoff)
    }
}

/// Structured configuration for one consumer instance.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    pub topic: String,
    pub group: String,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_poll_batch")]
    pub poll_batch: usize,
    #[serde(default)]
    pub ack_mode: AckMode,
    #[serde(default)]
    pub audit: AuditMode,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub breakers: Vec<BreakerEntry>,
    #[serde(default)]
    pub audit_write: AuditWriteConfig,
}

impl ConsumerConfig {
    /// Minimal valid configuration for the given topic and group.
    pub fn new(topic: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
            max_concurrency: default_max_concurrency(),
            queue_capacity: default_queue_capacity(),
            poll_batch: default_poll_batch(),
            ack_mode: AckMode::default(),
            audit: AuditMode::default(),
            retry: None,
            breakers: Vec::new(),
            audit_write: AuditWriteConfig::default(),
        }
    }

    /// Parses and validates a JSON configuration document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.trim().is_empty() {
            return Err(ConfigError::MissingField("topic"));
        }
        if self.group.trim().is_empty() {
            return Err(ConfigError::MissingField("group"));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::invalid("max_concurrency", "must be >= 1"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid("queue_capacity", "must be >= 1"));
        }
        if self.poll_batch == 0 {
            return Err(ConfigError::invalid("poll_batch", "must be >= 1"));
        }
        if let Some(retry) = &self.retry {
            if retry.max_attempts == 0 {
                return Err(ConfigError::invalid("retry.max_attempts", "must be >= 1"));
            }
            if retry.exponential && retry.multiplier < 1.0 {
                return Err(ConfigError::invalid(
                    "retry.multiplier",
                    "must be >= 1.0 for exponential backoff",
                ));
            }
        }
        if self.audit_write.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "audit_write.max_attempts",
                "must be >= 1",
            ));
        }
        let mut seen = BTreeSet::new();
        for breaker in &self.breakers {
            if breaker.name.trim().is_empty() {
                return Err(ConfigError::invalid("breakers.name", "must not be empty"));
            }
            if !seen.insert(breaker.name.clone()) {
                return Err(ConfigError::DuplicateBreaker {
                    name: breaker.name.clone(),
                });
            }
            if breaker.failure_threshold == 0 {
                return Err(ConfigError::invalid(
                    "breakers.failure_threshold",
                    "must be >= 1",
                ));
            }
            if breaker.success_threshold == 0 {
                return Err(ConfigError::invalid(
                    "breakers.success_threshold",
                    "must be >= 1",
                ));
            }
            if breaker.open_duration_ms == 0 {
                return Err(ConfigError::invalid(
                    "breakers.open_duration_ms",
                    "must be > 0",
                ));
            }
        }
        Ok(())
    }

    /// Engine sizing derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_concurrency: self.max_concurrency,
            queue_capacity: self.queue_capacity,
            dequeue_interval: DEFAULT_DEQUEUE_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Handler retry policy, when configured.
    pub fn retry_policy(&self) -> Option<RetryPolicy> {
        self.retry.as_ref().map(RetryConfig::policy)
    }
}

/// Errors surfaced while loading or validating configuration. These are the
/// unrecoverable startup failures allowed to halt the instance.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required config field: {0}")]
    MissingField(&'static str),
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("duplicate breaker name: {name}")]
    DuplicateBreaker { name: String },
    #[error("audit mode is persisted but no audit store was provided")]
    MissingAuditStore,
    #[error("failed to parse config document: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

fn default_max_concurrency() -> usize {
    1
}

fn default_queue_capacity() -> usize {
    512
}

fn default_poll_batch() -> usize {
    500
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_open_duration_ms() -> u64 {
    30_000
}

fn default_audit_attempts() -> u32 {
    3
}

fn default_audit_backoff_ms() -> u64 {
    50
}
