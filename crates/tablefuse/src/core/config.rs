//! Configuration loading and management.
//!
//! This module provides utilities for loading pipeline configuration from various
//! sources (TOML, YAML, JSON) and discovering configuration files in the project hierarchy.

use crate::plugins::DomainTag;
use crate::validation::repair::RepairMode;
use crate::{Result, TableFuseError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main pipeline configuration.
///
/// Every field has a default, so an empty file is a valid configuration.
///
/// # Example
///
/// ```rust
/// use tablefuse::core::config::PipelineConfig;
///
/// // Create with defaults
/// let config = PipelineConfig::default();
/// assert_eq!(config.repair.max_prompt_rows, 20);
///
/// // Load from TOML file
/// // let config = PipelineConfig::from_toml_file("tablefuse.toml")?;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub collection: CollectionConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub repair: RepairConfig,

    #[serde(default)]
    pub ai: AiCallConfig,

    #[serde(default)]
    pub header: HeaderConfig,

    #[serde(default)]
    pub pivot: PivotConfig,

    #[serde(default)]
    pub preprocessing: PreprocessingConfig,

    /// Result cache (None = no caching)
    #[serde(default)]
    pub cache: Option<CacheConfig>,

    /// Maximum tables processed concurrently per document (None = num_cpus * 2).
    #[serde(default)]
    pub max_concurrent_tables: Option<usize>,
}

/// Candidate collection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Pixels an embedded word may overhang a cell and still count as inside it.
    #[serde(default)]
    pub containment_tolerance: f64,

    /// Per-cell OCR results below this confidence (0.0-1.0) are discarded.
    #[serde(default)]
    pub min_ocr_confidence: f64,
}

/// Tier-1 warning thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Warn when the share of empty cells exceeds this ratio (0.0-1.0).
    #[serde(default = "default_empty_ratio")]
    pub empty_ratio_warning: f64,

    /// Warn when the share of duplicated data rows exceeds this ratio (0.0-1.0).
    #[serde(default = "default_duplicate_ratio")]
    pub duplicate_ratio_warning: f64,
}

/// Tier-3 repair settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairConfig {
    #[serde(default)]
    pub mode: RepairMode,

    /// Data rows included in the repair prompt.
    #[serde(default = "default_prompt_rows")]
    pub max_prompt_rows: usize,

    /// Characters of raw transcription / page context included in the prompt.
    #[serde(default = "default_context_chars")]
    pub max_context_chars: usize,

    #[serde(default = "default_output_tokens")]
    pub max_output_tokens: u32,
}

/// Timeout and retry budget applied to every outbound AI call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiCallConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries for transient failures only.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Header detection heuristics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderConfig {
    /// Upper bound on leading rows treated as column headers.
    #[serde(default = "default_max_header_rows")]
    pub max_header_rows: usize,

    /// Labels up to this many characters count as short.
    #[serde(default = "default_short_label_chars")]
    pub short_label_chars: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotConfig {
    /// Name of the leading output column holding row-header values.
    #[serde(default = "default_row_label_column")]
    pub row_label_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Skip detection and always use this domain.
    #[serde(default)]
    pub domain: Option<DomainTag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache directory (None = `.tablefuse/cache` under the current directory)
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}
fn default_empty_ratio() -> f64 {
    0.5
}
fn default_duplicate_ratio() -> f64 {
    0.3
}
fn default_prompt_rows() -> usize {
    20
}
fn default_context_chars() -> usize {
    2000
}
fn default_output_tokens() -> u32 {
    4096
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    2
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_max_header_rows() -> usize {
    3
}
fn default_short_label_chars() -> usize {
    12
}
fn default_row_label_column() -> String {
    "row_label".to_string()
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            containment_tolerance: 0.0,
            min_ocr_confidence: 0.0,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            empty_ratio_warning: default_empty_ratio(),
            duplicate_ratio_warning: default_duplicate_ratio(),
        }
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            mode: RepairMode::default(),
            max_prompt_rows: default_prompt_rows(),
            max_context_chars: default_context_chars(),
            max_output_tokens: default_output_tokens(),
        }
    }
}

impl Default for AiCallConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_backoff_ms(),
        }
    }
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            max_header_rows: default_max_header_rows(),
            short_label_chars: default_short_label_chars(),
        }
    }
}

impl Default for PivotConfig {
    fn default() -> Self {
        Self {
            row_label_column: default_row_label_column(),
        }
    }
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            domain: None,
        }
    }
}

impl CacheConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(".tablefuse")
                .join("cache")
        })
    }
}

fn check_ratio(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(TableFuseError::validation(format!(
            "{} must be between 0.0 and 1.0, got {}",
            name, value
        )));
    }
    Ok(())
}

impl PipelineConfig {
    /// Effective concurrency limit for [`process_document`](crate::core::pipeline::TablePipeline::process_document).
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent_tables.unwrap_or_else(|| num_cpus::get() * 2).max(1)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.ai.timeout_secs == 0 {
            return Err(TableFuseError::validation("ai.timeout_secs must be greater than 0"));
        }
        if self.repair.max_prompt_rows == 0 {
            return Err(TableFuseError::validation("repair.max_prompt_rows must be greater than 0"));
        }
        if self.header.max_header_rows == 0 {
            return Err(TableFuseError::validation("header.max_header_rows must be greater than 0"));
        }
        if !self.collection.containment_tolerance.is_finite() || self.collection.containment_tolerance < 0.0 {
            return Err(TableFuseError::validation(format!(
                "collection.containment_tolerance must be a non-negative number, got {}",
                self.collection.containment_tolerance
            )));
        }
        if self.max_concurrent_tables == Some(0) {
            return Err(TableFuseError::validation("max_concurrent_tables must be greater than 0"));
        }
        check_ratio("collection.min_ocr_confidence", self.collection.min_ocr_confidence)?;
        check_ratio("validation.empty_ratio_warning", self.validation.empty_ratio_warning)?;
        check_ratio("validation.duplicate_ratio_warning", self.validation.duplicate_ratio_warning)?;
        if self.pivot.row_label_column.trim().is_empty() {
            return Err(TableFuseError::validation("pivot.row_label_column must not be empty"));
        }
        Ok(())
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `TableFuseError::Validation` if the file doesn't exist, is
    /// invalid TOML, or holds values rejected by [`validate`](Self::validate).
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_config(path.as_ref())?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| TableFuseError::validation(format!("Invalid TOML in {}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_config(path.as_ref())?;
        let config: Self = serde_yaml_ng::from_str(&content)
            .map_err(|e| TableFuseError::validation(format!("Invalid YAML in {}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_config(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| TableFuseError::validation(format!("Invalid JSON in {}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, picking the format from the file extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "toml" => Self::from_toml_file(path),
            "yaml" | "yml" => Self::from_yaml_file(path),
            "json" => Self::from_json_file(path),
            other => Err(TableFuseError::validation(format!(
                "Unsupported config file extension '{}' for {}",
                other,
                path.display()
            ))),
        }
    }

    /// Discover configuration file in parent directories.
    ///
    /// Searches for `tablefuse.toml` in current directory and parent directories.
    ///
    /// # Returns
    ///
    /// - `Some(config)` if found
    /// - `None` if no config file found
    pub fn discover() -> Result<Option<Self>> {
        let mut current = std::env::current_dir().map_err(TableFuseError::Io)?;

        loop {
            let tablefuse_toml = current.join("tablefuse.toml");
            if tablefuse_toml.exists() {
                return Ok(Some(Self::from_toml_file(tablefuse_toml)?));
            }

            if let Some(parent) = current.parent() {
                current = parent.to_path_buf();
            } else {
                break;
            }
        }

        Ok(None)
    }
}

fn read_config(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| TableFuseError::validation(format!("Failed to read config file {}: {}", path.display(), e)))
}
