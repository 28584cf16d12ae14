use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Crate-wide configuration, constructed once and threaded through the
/// synchronizer, extractors, and query compiler as a value.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Query-compilation target dialect.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Mroonga-style engine: bare terms are implicitly required; the
    /// compiled string is prefixed with a relevance-weighting directive.
    Mroonga,
    /// ngram/InnoDB-style boolean mode: required terms carry a `+` prefix.
    Ngram,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_dialect")]
    pub dialect: Dialect,
    /// Relevance-weighting directive prepended to mroonga-dialect output.
    /// Kept as a plain configuration constant; the two engine versions
    /// disagree on the weighted variant and there is no schema migration
    /// between them.
    #[serde(default = "default_weight_directive")]
    pub weight_directive: String,
    /// Keep HTML markup in indexed text instead of stripping it.
    #[serde(default)]
    pub index_html: bool,
    /// Expand shortcode content before markup stripping.
    #[serde(default)]
    pub expand_shortcodes: bool,
    /// Inline referenced reusable-block content before markup stripping.
    #[serde(default)]
    pub expand_blocks: bool,
    /// Per-tick batch size override. 0 selects the automatic rule
    /// (100 for small collections, 1000 once the backlog is large).
    #[serde(default)]
    pub batch_limit: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dialect: default_dialect(),
            weight_directive: default_weight_directive(),
            index_html: false,
            expand_shortcodes: false,
            expand_blocks: false,
            batch_limit: 0,
        }
    }
}

fn default_dialect() -> Dialect {
    Dialect::Ngram
}
fn default_weight_directive() -> String {
    "*D+".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractConfig {
    /// Root directory attachment file paths are resolved against.
    #[serde(default = "default_media_root")]
    pub media_root: PathBuf,
    /// Per-format auto-extraction enablement.
    #[serde(default = "default_true")]
    pub pdf: bool,
    #[serde(default = "default_true")]
    pub word: bool,
    #[serde(default = "default_true")]
    pub excel: bool,
    #[serde(default = "default_true")]
    pub powerpoint: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            media_root: default_media_root(),
            pdf: true,
            word: true,
            excel: true,
            powerpoint: true,
        }
    }
}

fn default_media_root() -> PathBuf {
    PathBuf::from("media")
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Delay before a self-scheduled follow-up tick fires.
    #[serde(default = "default_retick_delay_ms")]
    pub retick_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retick_delay_ms: default_retick_delay_ms(),
        }
    }
}

fn default_retick_delay_ms() -> u64 {
    1000
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.index.weight_directive.contains(char::is_whitespace) {
        anyhow::bail!("index.weight_directive must not contain whitespace");
    }

    Ok(config)
}
