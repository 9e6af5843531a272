//! Configuration validation.
//!
//! Checks that configured values are present and within valid ranges
//! before any service is built from them.

use thiserror::Error;

use crate::config::{Config, MemoryConfig, ObservabilityConfig, SummarizerConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["json", "pretty"];

impl Validate for Config {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors: Vec<ValidationError> = [
            self.memory.validate(),
            self.observability.validate(),
            self.summarizer.validate(),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple(errors)),
        }
    }
}

impl Config {
    /// Load, apply environment overrides, and validate.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load_with_env()?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

impl Validate for MemoryConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.summary_threshold < self.buffer_window {
            return Err(ValidationError::Conflict {
                reason: format!(
                    "memory.summary_threshold ({}) must be >= memory.buffer_window ({})",
                    self.summary_threshold, self.buffer_window
                ),
            });
        }

        for (field, value) in [
            ("memory.store_timeout_ms", self.store_timeout_ms),
            ("memory.lock_timeout_ms", self.lock_timeout_ms),
            ("memory.summarizer_timeout_ms", self.summarizer_timeout_ms),
        ] {
            if value == 0 {
                return Err(ValidationError::InvalidValue {
                    field: field.into(),
                    reason: "must be greater than zero".into(),
                });
            }
        }

        if let Some(path) = &self.db_path {
            if path.trim().is_empty() {
                return Err(ValidationError::InvalidValue {
                    field: "memory.db_path".into(),
                    reason: "must not be empty".into(),
                });
            }
        }

        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("expected one of {LOG_LEVELS:?}, got '{}'", self.log_level),
            });
        }
        if !LOG_FORMATS.contains(&self.log_format.as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("expected one of {LOG_FORMATS:?}, got '{}'", self.log_format),
            });
        }
        Ok(())
    }
}

impl Validate for SummarizerConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.model.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "summarizer.model".into(),
                reason: "must not be empty".into(),
            });
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ValidationError::InvalidValue {
                field: "summarizer.temperature".into(),
                reason: format!("{} is outside 0.0..=2.0", self.temperature),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test_case(5, 5, true ; "threshold equal to window")]
    #[test_case(5, 15, true ; "threshold above window")]
    #[test_case(10, 3, false ; "threshold below window")]
    #[test_case(0, 0, true ; "zero window")]
    fn test_memory_threshold_vs_window(window: usize, threshold: usize, ok: bool) {
        let config = MemoryConfig {
            buffer_window: window,
            summary_threshold: threshold,
            ..MemoryConfig::default()
        };
        assert_eq!(config.validate().is_ok(), ok);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = MemoryConfig {
            store_timeout_ms: 0,
            ..MemoryConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("memory.store_timeout_ms"));
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        let config = ObservabilityConfig {
            log_format: "xml".into(),
            ..ObservabilityConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_multiple_errors_collected() {
        let mut config = Config::default();
        config.memory.summary_threshold = 1;
        config.summarizer.temperature = 5.0;

        match config.validate() {
            Err(ValidationError::Multiple(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }
}
