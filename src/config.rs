//! Configuration file support.
//!
//! A single [`Config`] is loaded once at startup (JSON by default, TOML when
//! the file ends in `.toml`) and handed by reference to every component.
//! Credentials never live in the file; see [`crate::FigmaAuth`] and
//! [`crate::GithubAuth`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::change::CacheWriteMode;
use crate::error::{Result, SyncError};
use crate::figma_client::FigmaImageFormat;
use crate::filter::{CollisionPolicy, FilterCombinator, PatternFilter};
use crate::report::ReportFormat;

pub const DEFAULT_CACHE_FILE: &str = ".figma_cache.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub naming_prefixes: NamingPrefixes,
    pub filter_patterns: FilterPatterns,
    pub api_settings: ApiSettings,
    pub output_settings: OutputSettings,
    pub target_nodes: TargetNodes,
    pub export_settings: ExportSettings,
    pub github: GithubSettings,
}

/// Prefixes stripped from node names to form exported file names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingPrefixes {
    pub svg_exporter: String,
    pub img_exporter: String,
    pub icon_exporter: String,
}

impl Default for NamingPrefixes {
    fn default() -> Self {
        Self {
            svg_exporter: "svg_exporter_".to_string(),
            img_exporter: "img_exporter_".to_string(),
            icon_exporter: "icon_exporter_".to_string(),
        }
    }
}

impl NamingPrefixes {
    /// Non-empty prefixes, longest first so `icon_exporter_x_` style overlaps
    /// strip the most specific match.
    pub fn all(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = [&self.svg_exporter, &self.img_exporter, &self.icon_exporter]
            .into_iter()
            .filter(|p| !p.is_empty())
            .cloned()
            .collect();
        prefixes.sort_by(|a, b| b.len().cmp(&a.len()));
        prefixes
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterPatterns {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub case_sensitive: bool,
    /// How the pattern filter and the target-node filter combine. Required
    /// whenever the target filter is active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combinator: Option<FilterCombinator>,
}

impl Default for FilterPatterns {
    fn default() -> Self {
        Self {
            include: vec!["svg_exporter_*".to_string()],
            exclude: Vec::new(),
            case_sensitive: false,
            combinator: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub requests_per_minute: u32,
    /// Per-request timeout in seconds
    pub timeout: u64,
    /// Sleep before retrying a 429 response
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    pub max_retries: u32,
    pub max_concurrent_requests: usize,
    /// `depth` query parameter for tree fetches
    pub depth: u32,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.figma.com/v1".to_string(),
            requests_per_minute: 60,
            timeout: 30,
            retry_delay: Duration::from_secs(60),
            max_retries: 3,
            max_concurrent_requests: 5,
            depth: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub default_output_dir: PathBuf,
    pub report_formats: Vec<ReportFormat>,
    /// Defaults to `<output>/.figma_cache.json`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_file: Option<PathBuf>,
    /// Write a JSON sidecar next to every exported asset
    pub write_metadata: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            default_output_dir: PathBuf::from("exports/"),
            report_formats: vec![ReportFormat::Json, ReportFormat::Markdown],
            cache_file: None,
            write_metadata: true,
        }
    }
}

impl OutputSettings {
    pub fn cache_path(&self, output_dir: &Path) -> PathBuf {
        self.cache_file
            .clone()
            .unwrap_or_else(|| output_dir.join(DEFAULT_CACHE_FILE))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetNodes {
    pub enabled: bool,
    pub node_ids: Vec<String>,
    pub export_mode: FigmaImageFormat,
    /// Descendants of a target node count as targets too
    pub process_children: bool,
}

impl Default for TargetNodes {
    fn default() -> Self {
        Self {
            enabled: true,
            node_ids: Vec::new(),
            export_mode: FigmaImageFormat::Svg,
            process_children: true,
        }
    }
}

impl TargetNodes {
    pub fn is_active(&self) -> bool {
        self.enabled && !self.node_ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub batch_size: usize,
    #[serde(with = "humantime_serde")]
    pub delay_between_batches: Duration,
    pub scale: f32,
    pub collision_policy: CollisionPolicy,
    pub cache_write: CacheWriteMode,
    pub max_depth: usize,
    pub max_dimension: f64,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            delay_between_batches: Duration::from_millis(1500),
            scale: 1.0,
            collision_policy: CollisionPolicy::Rename,
            cache_write: CacheWriteMode::OnDetect,
            max_depth: 5,
            max_dimension: 2000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubSettings {
    pub api_url: String,
    /// Branch to commit to; the repository default branch when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub commit_message: String,
    pub create_repo: bool,
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            branch: None,
            commit_message: "chore(figma): sync exported assets".to_string(),
            create_repo: true,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);
        if is_toml {
            toml::from_str(&raw).map_err(|e| SyncError::config(format!("invalid TOML: {e}")))
        } else {
            Ok(serde_json::from_str(&raw)?)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.export_settings.batch_size == 0 {
            return Err(SyncError::config("export_settings.batch_size must be at least 1"));
        }
        if self.api_settings.requests_per_minute == 0 {
            return Err(SyncError::config(
                "api_settings.requests_per_minute must be at least 1",
            ));
        }
        if self.api_settings.max_concurrent_requests == 0 {
            return Err(SyncError::config(
                "api_settings.max_concurrent_requests must be at least 1",
            ));
        }
        let scale = self.export_settings.scale;
        if !(scale > 0.0 && scale <= 4.0) {
            return Err(SyncError::config(format!(
                "export_settings.scale must be in (0, 4], got {scale}"
            )));
        }
        url::Url::parse(&self.api_settings.base_url)?;
        PatternFilter::from_config(&self.filter_patterns)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::NodeFilter;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.export_settings.batch_size, 10);
        assert_eq!(
            cfg.export_settings.delay_between_batches,
            Duration::from_millis(1500)
        );
        assert_eq!(cfg.api_settings.retry_delay, Duration::from_secs(60));
        assert_eq!(cfg.api_settings.max_retries, 3);
        assert_eq!(cfg.filter_patterns.include, vec!["svg_exporter_*"]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: Config = serde_json::from_str(
            r#"{
                "filter_patterns": {"include": ["icon_*"], "exclude": ["temp_*"], "combinator": "and"},
                "api_settings": {"retry_delay": "5s"},
                "target_nodes": {"node_ids": ["1:2"]}
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.filter_patterns.include, vec!["icon_*"]);
        assert!(!cfg.filter_patterns.case_sensitive);
        assert_eq!(cfg.filter_patterns.combinator, Some(FilterCombinator::And));
        assert_eq!(cfg.api_settings.retry_delay, Duration::from_secs(5));
        assert_eq!(cfg.api_settings.base_url, "https://api.figma.com/v1");
        assert!(cfg.target_nodes.is_active());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn combinator_can_come_from_the_command_line() {
        let mut cfg = Config::default();
        cfg.target_nodes.node_ids = vec!["1:2".into()];
        assert!(cfg.validate().is_ok());

        let err = NodeFilter::from_config(&cfg, None).unwrap_err();
        assert!(err.to_string().contains("combinator"));
        assert!(NodeFilter::from_config(&cfg, Some(FilterCombinator::Or)).is_ok());

        cfg.target_nodes.enabled = false;
        assert!(NodeFilter::from_config(&cfg, None).is_ok());
    }

    #[test]
    fn rejects_zero_batch_size_and_bad_patterns() {
        let mut cfg = Config::default();
        cfg.export_settings.batch_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.filter_patterns.include = vec!["icon_[".into()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn loads_toml_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("figsync.toml");
        std::fs::write(
            &path,
            r#"
[export_settings]
batch_size = 4
delay_between_batches = "250ms"
collision_policy = "skip"
"#,
        )
        .unwrap();
        let cfg = Config::from_file(&path).unwrap();
        assert_eq!(cfg.export_settings.batch_size, 4);
        assert_eq!(
            cfg.export_settings.delay_between_batches,
            Duration::from_millis(250)
        );
        assert_eq!(cfg.export_settings.collision_policy, CollisionPolicy::Skip);
    }

    #[test]
    fn prefixes_sorted_longest_first() {
        let prefixes = NamingPrefixes {
            svg_exporter: "svg_".into(),
            img_exporter: String::new(),
            icon_exporter: "svg_icon_".into(),
        };
        assert_eq!(prefixes.all(), vec!["svg_icon_", "svg_"]);
    }

    #[test]
    fn cache_path_defaults_inside_output_dir() {
        let settings = OutputSettings::default();
        assert_eq!(
            settings.cache_path(Path::new("out")),
            PathBuf::from("out").join(DEFAULT_CACHE_FILE)
        );
    }
}
