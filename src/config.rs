//! Application constants, data directories and pipeline tuning.
//!
//! `PipelineConfig::default()` carries the values every stage runs with;
//! `PipelineConfig::from_env()` layers `DOSSIER_*` overrides on top.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "Dossier";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "dossier=info"
}

/// Get the application data directory
/// ~/Dossier/ on all platforms, current directory when no home is known.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Get the classification ledger directory
pub fn ledger_dir() -> PathBuf {
    app_data_dir().join("ledger")
}

/// Get the generated artifact directory
pub fn output_dir() -> PathBuf {
    app_data_dir().join("output")
}

/// Get the per-node guidance directory
pub fn guidance_dir() -> PathBuf {
    app_data_dir().join("guidance")
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Retry/backoff tuning for every oracle call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (total attempts = max_retries + 1).
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Minimum spacing between two oracle requests sharing one limiter.
    pub min_request_interval_ms: u64,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            min_request_interval_ms: 350,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Module used when the oracle names no known module.
    pub fallback_module: String,
    /// Deepest taxonomy level the traversal will descend to (module = 0).
    pub max_depth: usize,
    /// Characters of document text quoted in each prompt.
    pub excerpt_chars: usize,
    /// Documents classified concurrently by `classify_all`.
    pub batch_size: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            fallback_module: "5".into(),
            max_depth: 5,
            excerpt_chars: 4_000,
            batch_size: 3,
        }
    }
}

/// Scoring thresholds for generated artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityThresholds {
    pub min_length: usize,
    pub max_length: usize,
    pub min_sections: usize,
    /// Markers that must appear verbatim somewhere in the artifact.
    pub required_elements: Vec<String>,
    /// Expected citation count is the evidence count clamped to this range.
    pub min_expected_citations: usize,
    pub max_expected_citations: usize,
    /// Score needed (with zero structural errors) for an artifact to be valid.
    pub pass_score: u8,
    /// Below this score a valid artifact is still sent back for revision.
    pub refine_below: u8,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_length: 500,
            max_length: 50_000,
            min_sections: 1,
            required_elements: vec!["\\section".into(), "\\label".into()],
            min_expected_citations: 3,
            max_expected_citations: 10,
            pass_score: 60,
            refine_below: 70,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub batch_size: usize,
    pub inter_batch_delay_ms: u64,
    /// Offset between the starts of two nodes in the same batch.
    pub stagger_ms: u64,
    pub enable_refinement: bool,
    pub max_revisions: u32,
    /// Evidence items quoted in one generation prompt.
    pub max_evidence_items: usize,
    /// Characters kept from each already-written related artifact.
    pub related_preview_chars: usize,
    pub quality: QualityThresholds,
}

impl GenerationConfig {
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            batch_size: 3,
            inter_batch_delay_ms: 2_000,
            stagger_ms: 500,
            enable_refinement: true,
            max_revisions: 2,
            max_evidence_items: 15,
            related_preview_chars: 2_000,
            quality: QualityThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "llama3.1".into(),
            timeout_secs: 300,
        }
    }
}

/// Effective configuration of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub retry: RetryConfig,
    pub classifier: ClassifierConfig,
    pub generation: GenerationConfig,
    pub oracle: OracleConfig,
}

// ═══════════════════════════════════════════════════════════
// Environment overrides
// ═══════════════════════════════════════════════════════════

impl PipelineConfig {
    /// Defaults with `DOSSIER_*` environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults with overrides read through `lookup` (testable without touching the process env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("DOSSIER_OLLAMA_URL") {
            config.oracle.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = lookup("DOSSIER_MODEL") {
            config.oracle.model = model;
        }
        if let Some(module) = lookup("DOSSIER_FALLBACK_MODULE") {
            config.classifier.fallback_module = module.trim().to_string();
        }
        if let Some(raw) = lookup("DOSSIER_BATCH_SIZE") {
            let size: usize = parse_var("DOSSIER_BATCH_SIZE", &raw)?;
            if size == 0 {
                return Err(invalid("DOSSIER_BATCH_SIZE", &raw));
            }
            config.generation.batch_size = size;
            config.classifier.batch_size = size;
        }
        if let Some(raw) = lookup("DOSSIER_MAX_RETRIES") {
            config.retry.max_retries = parse_var("DOSSIER_MAX_RETRIES", &raw)?;
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| invalid(key, raw))
}

fn invalid(key: &str, raw: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: raw.to_string(),
    }
}
