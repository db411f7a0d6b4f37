// src/config.rs - Configuration for sharing, distribution, recovery and storage

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest accepted base delay between publish attempts
pub const MAX_RETRY_DELAY_MS: u64 = 60_000;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub sharing: SharingConfig,
    pub distribution: DistributionConfig,
    pub recovery: RecoveryConfig,
    pub storage: StorageConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharingConfig {
    /// Lower bound on the bit width of generated field primes
    pub min_field_bits: u64,
    /// Largest secret accepted by split (in bytes)
    pub max_secret_bytes: usize,
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            min_field_bits: 256,
            max_secret_bytes: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionConfig {
    /// Relays used when a group does not name its own
    pub default_relays: Vec<String>,
    /// Expiration attached to share envelopes (in seconds, none when unset)
    pub share_expiration_seconds: Option<u64>,
    /// Publish attempts per recipient before recording a failure
    pub max_attempts: u32,
    /// Base delay between attempts (in milliseconds)
    pub retry_delay_ms: u64,
    /// Maximum number of recipients published to concurrently
    pub max_concurrent_sends: usize,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            default_relays: Vec::new(),
            share_expiration_seconds: None,
            max_attempts: 3,
            retry_delay_ms: 250,
            max_concurrent_sends: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Lifetime of a recovery request (in seconds)
    pub default_expiration_seconds: u64,
    /// Longest lifetime a caller may ask for (in seconds)
    pub max_expiration_seconds: u64,
    /// Responses held per request while the request itself is not yet known
    pub max_parked_responses: usize,
    /// Unknown request ids with parked responses; the oldest is evicted past this
    pub max_parked_requests: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            default_expiration_seconds: 24 * 60 * 60, // 24 hours
            max_expiration_seconds: 7 * 24 * 60 * 60, // 1 week
            max_parked_responses: 64,
            max_parked_requests: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend type: "memory", "file"
    pub backend: String,
    /// Directory for the file backend
    pub data_directory: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            data_directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether to record Prometheus metrics
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Detailed validation result with specific error information
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub success: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub suggested_fix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub recommendation: Option<String>,
}

/// Short human-readable view of the effective configuration
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub storage_backend: String,
    pub relay_count: usize,
    pub recovery_expiration_seconds: u64,
    pub max_attempts: u32,
    pub min_field_bits: u64,
    pub metrics_enabled: bool,
}

impl Config {
    /// Load configuration from `SHAREKEEPER_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        let mut parse_errors = Vec::new();

        debug!("Loading configuration from environment variables");

        if let Ok(relays) = std::env::var("SHAREKEEPER_RELAYS") {
            debug!("Found SHAREKEEPER_RELAYS: {}", relays);
            config.distribution.default_relays = relays
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect();
        }

        parse_var(
            "SHAREKEEPER_SHARE_EXPIRATION_SECONDS",
            &mut parse_errors,
            |v: u64| config.distribution.share_expiration_seconds = Some(v),
        );
        parse_var("SHAREKEEPER_MAX_ATTEMPTS", &mut parse_errors, |v: u32| {
            config.distribution.max_attempts = v
        });
        parse_var("SHAREKEEPER_RETRY_DELAY_MS", &mut parse_errors, |v: u64| {
            config.distribution.retry_delay_ms = v
        });
        parse_var("SHAREKEEPER_MAX_CONCURRENT_SENDS", &mut parse_errors, |v: usize| {
            config.distribution.max_concurrent_sends = v
        });
        parse_var(
            "SHAREKEEPER_RECOVERY_EXPIRATION_SECONDS",
            &mut parse_errors,
            |v: u64| config.recovery.default_expiration_seconds = v,
        );
        parse_var("SHAREKEEPER_MIN_FIELD_BITS", &mut parse_errors, |v: u64| {
            config.sharing.min_field_bits = v
        });
        parse_var("SHAREKEEPER_MAX_SECRET_BYTES", &mut parse_errors, |v: usize| {
            config.sharing.max_secret_bytes = v
        });
        parse_var("SHAREKEEPER_METRICS_ENABLED", &mut parse_errors, |v: bool| {
            config.metrics.enabled = v
        });

        if let Ok(backend) = std::env::var("SHAREKEEPER_STORAGE_BACKEND") {
            debug!("Found SHAREKEEPER_STORAGE_BACKEND: {}", backend);
            config.storage.backend = backend;
        }

        if let Ok(data_dir) = std::env::var("SHAREKEEPER_DATA_DIRECTORY") {
            debug!("Found SHAREKEEPER_DATA_DIRECTORY: {}", data_dir);
            config.storage.data_directory = Some(data_dir);
        }

        if !parse_errors.is_empty() {
            anyhow::bail!(
                "Configuration parsing errors:\n{}",
                parse_errors.join("\n")
            );
        }

        config.validate()?;

        info!(
            storage_backend = %config.storage.backend,
            relays = config.distribution.default_relays.len(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Validate configuration, failing on the first set of errors
    pub fn validate(&self) -> Result<()> {
        let result = self.validate_detailed();

        for warning in &result.warnings {
            warn!(field = %warning.field, "{}", warning.message);
        }

        if !result.success {
            let messages: Vec<String> = result
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            anyhow::bail!("Invalid configuration:\n{}", messages.join("\n"));
        }

        Ok(())
    }

    pub fn validate_detailed(&self) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.sharing.min_field_bits < 128 {
            errors.push(ValidationError {
                field: "sharing.min_field_bits".to_string(),
                message: format!(
                    "Field primes of {} bits are too small",
                    self.sharing.min_field_bits
                ),
                suggested_fix: Some("Use at least 128 bits (256 recommended)".to_string()),
            });
        }

        if self.sharing.max_secret_bytes == 0 {
            errors.push(ValidationError {
                field: "sharing.max_secret_bytes".to_string(),
                message: "Secrets must be allowed to hold at least one byte".to_string(),
                suggested_fix: None,
            });
        } else if self.sharing.max_secret_bytes > 8192 {
            warnings.push(ValidationWarning {
                field: "sharing.max_secret_bytes".to_string(),
                message: "Very large secrets make prime generation slow".to_string(),
                recommendation: Some("Keep secrets under 8 KiB".to_string()),
            });
        }

        if self.distribution.max_attempts == 0 {
            errors.push(ValidationError {
                field: "distribution.max_attempts".to_string(),
                message: "At least one publish attempt is required".to_string(),
                suggested_fix: Some("Set max_attempts to 1 or more".to_string()),
            });
        }

        if self.distribution.retry_delay_ms > MAX_RETRY_DELAY_MS {
            errors.push(ValidationError {
                field: "distribution.retry_delay_ms".to_string(),
                message: format!(
                    "Retry delay of {} ms exceeds the {} ms limit",
                    self.distribution.retry_delay_ms, MAX_RETRY_DELAY_MS
                ),
                suggested_fix: Some("Use a delay of a few hundred milliseconds".to_string()),
            });
        }

        if self.distribution.max_concurrent_sends == 0 {
            errors.push(ValidationError {
                field: "distribution.max_concurrent_sends".to_string(),
                message: "Concurrency limit must be positive".to_string(),
                suggested_fix: Some("Set max_concurrent_sends to 1 or more".to_string()),
            });
        }

        for relay in &self.distribution.default_relays {
            match url::Url::parse(relay) {
                Ok(parsed) if matches!(parsed.scheme(), "ws" | "wss") => {
                    if parsed.scheme() == "ws" {
                        warnings.push(ValidationWarning {
                            field: "distribution.default_relays".to_string(),
                            message: format!("Relay {relay} is not using TLS"),
                            recommendation: Some("Prefer wss:// relays".to_string()),
                        });
                    }
                }
                _ => errors.push(ValidationError {
                    field: "distribution.default_relays".to_string(),
                    message: format!("Relay {relay} is not a ws:// or wss:// URL"),
                    suggested_fix: None,
                }),
            }
        }

        if self.recovery.default_expiration_seconds == 0 {
            errors.push(ValidationError {
                field: "recovery.default_expiration_seconds".to_string(),
                message: "Recovery requests must live for a positive duration".to_string(),
                suggested_fix: Some("Use 86400 (24 hours)".to_string()),
            });
        }

        if self.recovery.default_expiration_seconds > self.recovery.max_expiration_seconds {
            errors.push(ValidationError {
                field: "recovery.default_expiration_seconds".to_string(),
                message: "Default expiration exceeds the maximum expiration".to_string(),
                suggested_fix: None,
            });
        }

        match self.storage.backend.as_str() {
            "memory" => {}
            "file" => {
                if self
                    .storage
                    .data_directory
                    .as_deref()
                    .map_or(true, str::is_empty)
                {
                    errors.push(ValidationError {
                        field: "storage.data_directory".to_string(),
                        message: "File storage requires a data directory".to_string(),
                        suggested_fix: Some("Set SHAREKEEPER_DATA_DIRECTORY".to_string()),
                    });
                }
            }
            backend => errors.push(ValidationError {
                field: "storage.backend".to_string(),
                message: format!("Unsupported storage backend: {backend}"),
                suggested_fix: Some("Use 'memory' or 'file'".to_string()),
            }),
        }

        ValidationResult {
            success: errors.is_empty(),
            errors,
            warnings,
        }
    }

    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            storage_backend: self.storage.backend.clone(),
            relay_count: self.distribution.default_relays.len(),
            recovery_expiration_seconds: self.recovery.default_expiration_seconds,
            max_attempts: self.distribution.max_attempts,
            min_field_bits: self.sharing.min_field_bits,
            metrics_enabled: self.metrics.enabled,
        }
    }

    pub fn recovery_expiration(&self) -> Duration {
        Duration::from_secs(self.recovery.default_expiration_seconds)
    }

    pub fn max_recovery_expiration(&self) -> Duration {
        Duration::from_secs(self.recovery.max_expiration_seconds)
    }

    pub fn share_expiration(&self) -> Option<Duration> {
        self.distribution
            .share_expiration_seconds
            .map(Duration::from_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.distribution.retry_delay_ms)
    }
}

fn parse_var<T, F>(name: &str, errors: &mut Vec<String>, apply: F)
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: FnOnce(T),
{
    if let Ok(raw) = std::env::var(name) {
        match raw.parse::<T>() {
            Ok(value) => {
                debug!("Found {}: {}", name, raw);
                apply(value);
            }
            Err(e) => errors.push(format!("Invalid {name} '{raw}': {e}")),
        }
    }
}
