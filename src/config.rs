use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub ingest: Option<IngestConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    5
}
fn default_busy_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct DedupConfig {
    #[serde(default = "default_near_duplicate_threshold")]
    pub near_duplicate_threshold: f64,
    #[serde(default = "default_promotion_margin")]
    pub promotion_margin: f64,
    #[serde(default = "default_partial_overlap_threshold")]
    pub partial_overlap_threshold: f64,
    #[serde(default = "default_true")]
    pub fuzzy_enabled: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            near_duplicate_threshold: default_near_duplicate_threshold(),
            promotion_margin: default_promotion_margin(),
            partial_overlap_threshold: default_partial_overlap_threshold(),
            fuzzy_enabled: true,
        }
    }
}

fn default_near_duplicate_threshold() -> f64 {
    0.85
}
fn default_promotion_margin() -> f64 {
    0.05
}
fn default_partial_overlap_threshold() -> f64 {
    0.5
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct QualityConfig {
    /// Extra lexicon words, one per line, merged into the built-in list.
    #[serde(default)]
    pub lexicon_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    pub root: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_collection() -> String {
    "default".to_string()
}

pub(crate) fn default_include_globs() -> Vec<String> {
    vec!["**/*.txt".to_string(), "**/*.md".to_string()]
}

impl Config {
    /// Configuration with every default applied and the database at `db_path`.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
                max_connections: default_max_connections(),
                busy_timeout_secs: default_busy_timeout_secs(),
            },
            dedup: DedupConfig::default(),
            quality: QualityConfig::default(),
            ingest: None,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.db.max_connections == 0 {
        anyhow::bail!("db.max_connections must be >= 1");
    }

    let dedup = &config.dedup;
    if !(0.0..=1.0).contains(&dedup.near_duplicate_threshold) {
        anyhow::bail!("dedup.near_duplicate_threshold must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&dedup.partial_overlap_threshold) {
        anyhow::bail!("dedup.partial_overlap_threshold must be in [0.0, 1.0]");
    }
    if !(0.0..1.0).contains(&dedup.promotion_margin) {
        anyhow::bail!("dedup.promotion_margin must be in [0.0, 1.0)");
    }

    if let Some(ingest) = &config.ingest {
        if ingest.collection.trim().is_empty() {
            anyhow::bail!("ingest.collection must not be empty");
        }
        if ingest.include_globs.is_empty() {
            anyhow::bail!("ingest.include_globs must contain at least one pattern");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse("[db]\npath = \"./data/dedup.sqlite\"\n").unwrap();
        assert_eq!(config.dedup.near_duplicate_threshold, 0.85);
        assert_eq!(config.dedup.promotion_margin, 0.05);
        assert_eq!(config.dedup.partial_overlap_threshold, 0.5);
        assert!(config.dedup.fuzzy_enabled);
        assert!(config.quality.lexicon_path.is_none());
        assert!(config.ingest.is_none());
    }

    #[test]
    fn ingest_section_defaults() {
        let config = parse(
            r#"
            [db]
            path = "x.sqlite"

            [ingest]
            root = "./docs"
            "#,
        )
        .unwrap();
        let ingest = config.ingest.unwrap();
        assert_eq!(ingest.collection, "default");
        assert_eq!(ingest.include_globs, default_include_globs());
        assert!(!ingest.follow_symlinks);
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let err = parse(
            r#"
            [db]
            path = "x.sqlite"

            [dedup]
            near_duplicate_threshold = 1.5
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("near_duplicate_threshold"));
    }

    #[test]
    fn rejects_full_margin() {
        assert!(parse("[db]\npath = \"x\"\n[dedup]\npromotion_margin = 1.0\n").is_err());
    }
}
