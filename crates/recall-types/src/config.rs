//! Configuration loading for agent-recall.
//!
//! Layered config: defaults -> config file -> env vars.
//! The default config file lives at ~/.config/agent-recall/config.toml.
//!
//! Pipeline components each carry a typed config struct with explicit
//! defaults. Individual queries may carry partial overrides
//! ([`PipelineOverrides`]) which are merged over the configured values with
//! [`PipelineConfig::with_overrides`].

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::RecallError;

/// Query rewrite configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewriteConfig {
    /// Master switch for the rewrite collaborator (intent classification
    /// always runs regardless)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Hypothetical document generation
    #[serde(default)]
    pub enable_hyde: bool,

    /// Synonym / related-term expansion
    #[serde(default)]
    pub enable_expansion: bool,

    /// Split multi-part questions into sub-queries
    #[serde(default)]
    pub enable_decomposition: bool,

    /// Maximum variants kept from a rewrite
    #[serde(default = "default_max_variants")]
    pub max_variants: usize,

    /// Rewrite collaborator timeout (ms)
    #[serde(default = "default_rewrite_timeout")]
    pub timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_variants() -> usize {
    5
}

fn default_rewrite_timeout() -> u64 {
    1500
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            enable_hyde: false,
            enable_expansion: false,
            enable_decomposition: false,
            max_variants: default_max_variants(),
            timeout_ms: default_rewrite_timeout(),
        }
    }
}

/// Lexical (full-text) search configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexicalConfig {
    /// Over-fetch multiplier applied to the requested limit
    #[serde(default = "default_over_fetch")]
    pub over_fetch_factor: usize,

    /// Per-variant search timeout (ms)
    #[serde(default = "default_search_timeout")]
    pub timeout_ms: u64,
}

fn default_over_fetch() -> usize {
    5
}

fn default_search_timeout() -> u64 {
    2000
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            over_fetch_factor: default_over_fetch(),
            timeout_ms: default_search_timeout(),
        }
    }
}

/// Semantic (vector similarity) search configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum similarity for a semantic hit to count as a match
    #[serde(default = "default_semantic_threshold")]
    pub threshold: f32,

    #[serde(default = "default_over_fetch")]
    pub over_fetch_factor: usize,

    #[serde(default = "default_search_timeout")]
    pub timeout_ms: u64,
}

fn default_semantic_threshold() -> f32 {
    0.7
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_semantic_threshold(),
            over_fetch_factor: default_over_fetch(),
            timeout_ms: default_search_timeout(),
        }
    }
}

/// Hierarchical (coarse-to-fine summary) retrieval configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Only apply to semantic or hybrid searches
    #[serde(default = "default_true")]
    pub semantic_queries_only: bool,

    /// Minimum similarity for a summary or leaf to be selected
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    /// Beam widening factor per level
    #[serde(default = "default_expansion_factor")]
    pub expansion_factor: usize,

    /// Upper bound on candidates returned
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    #[serde(default = "default_hierarchical_timeout")]
    pub timeout_ms: u64,
}

fn default_min_similarity() -> f32 {
    0.5
}

fn default_expansion_factor() -> usize {
    3
}

fn default_max_candidates() -> usize {
    100
}

fn default_hierarchical_timeout() -> u64 {
    3000
}

impl Default for HierarchicalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            semantic_queries_only: true,
            min_similarity: default_min_similarity(),
            expansion_factor: default_expansion_factor(),
            max_candidates: default_max_candidates(),
            timeout_ms: default_hierarchical_timeout(),
        }
    }
}

/// Tag attachment configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagsConfig {
    /// Attach tags to fetched entries
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Use the batched tag lookup when the repository offers one
    #[serde(default = "default_true")]
    pub prefer_batch: bool,

    #[serde(default = "default_search_timeout")]
    pub timeout_ms: u64,
}

impl Default for TagsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefer_batch: true,
            timeout_ms: default_search_timeout(),
        }
    }
}

/// Weights for the final ranking formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingConfig {
    #[serde(default = "default_half")]
    pub lexical_weight: f32,

    #[serde(default = "default_half")]
    pub semantic_weight: f32,

    /// Boost per tag matching the include list
    #[serde(default = "default_tag_boost")]
    pub tag_boost: f32,

    /// Cap on the total tag boost
    #[serde(default = "default_max_tag_boost")]
    pub max_tag_boost: f32,

    /// Boost for entries with an explicit relation to `related_to`
    #[serde(default = "default_relation_boost")]
    pub relation_boost: f32,
}

fn default_half() -> f32 {
    0.5
}

fn default_tag_boost() -> f32 {
    0.1
}

fn default_max_tag_boost() -> f32 {
    0.3
}

fn default_relation_boost() -> f32 {
    0.2
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            lexical_weight: default_half(),
            semantic_weight: default_half(),
            tag_boost: default_tag_boost(),
            max_tag_boost: default_max_tag_boost(),
            relation_boost: default_relation_boost(),
        }
    }
}

/// Configuration for every pipeline component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub rewrite: RewriteConfig,

    #[serde(default)]
    pub lexical: LexicalConfig,

    #[serde(default)]
    pub semantic: SemanticConfig,

    #[serde(default)]
    pub hierarchical: HierarchicalConfig,

    #[serde(default)]
    pub tags: TagsConfig,

    #[serde(default)]
    pub ranking: RankingConfig,
}

impl PipelineConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.semantic.threshold) {
            return Err(format!(
                "semantic.threshold must be 0.0-1.0, got {}",
                self.semantic.threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.hierarchical.min_similarity) {
            return Err(format!(
                "hierarchical.min_similarity must be 0.0-1.0, got {}",
                self.hierarchical.min_similarity
            ));
        }
        if self.hierarchical.expansion_factor == 0 {
            return Err("hierarchical.expansion_factor must be > 0".to_string());
        }
        if self.hierarchical.max_candidates == 0 {
            return Err("hierarchical.max_candidates must be > 0".to_string());
        }
        if self.lexical.over_fetch_factor == 0 || self.semantic.over_fetch_factor == 0 {
            return Err("over_fetch_factor must be > 0".to_string());
        }
        if self.rewrite.max_variants == 0 {
            return Err("rewrite.max_variants must be > 0".to_string());
        }
        Ok(())
    }

    /// Return a copy with every set override field applied verbatim.
    ///
    /// Values are not clamped; call [`validate`](Self::validate) on the
    /// result to reject out-of-range overrides.
    pub fn with_overrides(&self, overrides: &PipelineOverrides) -> Self {
        let mut merged = self.clone();
        if let Some(o) = &overrides.rewrite {
            o.apply(&mut merged.rewrite);
        }
        if let Some(o) = &overrides.hierarchical {
            o.apply(&mut merged.hierarchical);
        }
        if let Some(o) = &overrides.tags {
            o.apply(&mut merged.tags);
        }
        if let Some(threshold) = overrides.semantic_threshold {
            merged.semantic.threshold = threshold;
        }
        merged
    }
}

/// Partial override of [`RewriteConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RewriteOverride {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub enable_hyde: Option<bool>,
    #[serde(default)]
    pub enable_expansion: Option<bool>,
    #[serde(default)]
    pub enable_decomposition: Option<bool>,
    #[serde(default)]
    pub max_variants: Option<usize>,
}

impl RewriteOverride {
    fn apply(&self, cfg: &mut RewriteConfig) {
        if let Some(v) = self.enabled {
            cfg.enabled = v;
        }
        if let Some(v) = self.enable_hyde {
            cfg.enable_hyde = v;
        }
        if let Some(v) = self.enable_expansion {
            cfg.enable_expansion = v;
        }
        if let Some(v) = self.enable_decomposition {
            cfg.enable_decomposition = v;
        }
        if let Some(v) = self.max_variants {
            cfg.max_variants = v;
        }
    }
}

/// Partial override of [`HierarchicalConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalOverride {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub semantic_queries_only: Option<bool>,
    #[serde(default)]
    pub min_similarity: Option<f32>,
    #[serde(default)]
    pub expansion_factor: Option<usize>,
    #[serde(default)]
    pub max_candidates: Option<usize>,
}

impl HierarchicalOverride {
    fn apply(&self, cfg: &mut HierarchicalConfig) {
        if let Some(v) = self.enabled {
            cfg.enabled = v;
        }
        if let Some(v) = self.semantic_queries_only {
            cfg.semantic_queries_only = v;
        }
        if let Some(v) = self.min_similarity {
            cfg.min_similarity = v;
        }
        if let Some(v) = self.expansion_factor {
            cfg.expansion_factor = v;
        }
        if let Some(v) = self.max_candidates {
            cfg.max_candidates = v;
        }
    }
}

/// Partial override of [`TagsConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagsOverride {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub prefer_batch: Option<bool>,
}

impl TagsOverride {
    fn apply(&self, cfg: &mut TagsConfig) {
        if let Some(v) = self.enabled {
            cfg.enabled = v;
        }
        if let Some(v) = self.prefer_batch {
            cfg.prefer_batch = v;
        }
    }
}

/// Per-query overrides, one optional block per component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineOverrides {
    #[serde(default)]
    pub rewrite: Option<RewriteOverride>,
    #[serde(default)]
    pub hierarchical: Option<HierarchicalOverride>,
    #[serde(default)]
    pub tags: Option<TagsOverride>,
    #[serde(default)]
    pub semantic_threshold: Option<f32>,
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Path to the lexical search index directory
    #[serde(default = "default_search_index_path")]
    pub search_index_path: String,

    /// Default result limit when a query does not set one
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Retrieval pipeline configuration
    #[serde(default)]
    pub retrieval: PipelineConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_search_index_path() -> String {
    ProjectDirs::from("", "", "agent-recall")
        .map(|p| p.data_local_dir().join("lexical-index"))
        .unwrap_or_else(|| PathBuf::from("./lexical-index"))
        .to_string_lossy()
        .to_string()
}

fn default_limit() -> usize {
    20
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            search_index_path: default_search_index_path(),
            default_limit: default_limit(),
            retrieval: PipelineConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/agent-recall/config.toml)
    /// 3. Explicit config file (optional)
    /// 4. Environment variables (RECALL_*, `__` separates nested keys)
    pub fn load(config_path: Option<&str>) -> Result<Self, RecallError> {
        let config_dir = ProjectDirs::from("", "", "agent-recall")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("log_level", default_log_level())
            .map_err(|e| RecallError::Config(e.to_string()))?
            .set_default("search_index_path", default_search_index_path())
            .map_err(|e| RecallError::Config(e.to_string()))?
            .set_default("default_limit", default_limit() as i64)
            .map_err(|e| RecallError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Format: RECALL_LOG_LEVEL, RECALL_RETRIEVAL__SEMANTIC__THRESHOLD, etc.
        builder = builder.add_source(
            Environment::with_prefix("RECALL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| RecallError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| RecallError::Config(e.to_string()))?;

        settings.retrieval.validate().map_err(RecallError::Config)?;
        Ok(settings)
    }
}
