//! Run reports: `export_report.json` and `export_summary.md`.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::change::{CacheWriteMode, ChangeStats, NodeInfo};
use crate::config::Config;
use crate::error::Result;
use crate::export::{ExportJob, ExportStatus, ExportSummary};
use crate::figma_client::FigmaImageFormat;
use crate::filter::{CollisionPolicy, FilterCombinator, FilterOutcome};
use crate::node_id::ResolvedNode;
use crate::readiness::DevReadyStatus;

pub const JSON_REPORT_FILE: &str = "export_report.json";
pub const MARKDOWN_REPORT_FILE: &str = "export_summary.md";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    Markdown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSummary {
    pub total: usize,
    pub kept: usize,
    pub pattern_matches: usize,
    pub target_matches: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combinator: Option<FilterCombinator>,
}

impl From<&FilterOutcome> for FilterSummary {
    fn from(outcome: &FilterOutcome) -> Self {
        Self {
            total: outcome.total,
            kept: outcome.kept.len(),
            pattern_matches: outcome.pattern_matches,
            target_matches: outcome.target_matches,
            combinator: outcome.combinator,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    pub page_name: String,
    pub nodes: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Per-page job counts, pages in order of first appearance.
pub fn page_summaries(jobs: &[ExportJob]) -> Vec<PageSummary> {
    let mut pages: Vec<PageSummary> = Vec::new();
    let mut index: HashMap<Option<String>, usize> = HashMap::new();
    for job in jobs {
        let slot = *index.entry(job.page_id.clone()).or_insert_with(|| {
            pages.push(PageSummary {
                page_id: job.page_id.clone(),
                page_name: job
                    .page_name
                    .clone()
                    .unwrap_or_else(|| "(no page)".to_string()),
                ..Default::default()
            });
            pages.len() - 1
        });
        let page = &mut pages[slot];
        page.nodes += 1;
        match job.status {
            ExportStatus::Completed => page.completed += 1,
            ExportStatus::Failed => page.failed += 1,
            ExportStatus::Skipped => page.skipped += 1,
            ExportStatus::Pending | ExportStatus::Processing => {}
        }
    }
    pages
}

/// The settings that shaped the run, echoed into the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigEcho {
    pub batch_size: usize,
    pub delay_between_batches_ms: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub requests_per_minute: u32,
    pub scale: f32,
    pub format: FigmaImageFormat,
    pub collision_policy: CollisionPolicy,
    pub cache_write: CacheWriteMode,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub target_node_ids: Vec<String>,
}

impl ConfigEcho {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.export_settings.batch_size,
            delay_between_batches_ms: config.export_settings.delay_between_batches.as_millis() as u64,
            max_retries: config.api_settings.max_retries,
            retry_delay_secs: config.api_settings.retry_delay.as_secs(),
            requests_per_minute: config.api_settings.requests_per_minute,
            scale: config.export_settings.scale,
            format: config.target_nodes.export_mode,
            collision_policy: config.export_settings.collision_policy,
            cache_write: config.export_settings.cache_write,
            include: config.filter_patterns.include.clone(),
            exclude: config.filter_patterns.exclude.clone(),
            target_node_ids: if config.target_nodes.enabled {
                config.target_nodes.node_ids.clone()
            } else {
                Vec::new()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub sync_id: String,
    pub timestamp: DateTime<Utc>,
    pub file_key: String,
    pub file_name: String,
    pub file_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_node: Option<ResolvedNode>,
    pub dry_run: bool,
    pub force: bool,
    pub change_stats: ChangeStats,
    pub dev_ready: BTreeMap<DevReadyStatus, usize>,
    pub filter: FilterSummary,
    pub export: ExportSummary,
    pub pages: Vec<PageSummary>,
    pub config: ConfigEcho,
    pub elapsed_ms: u64,
    pub nodes: Vec<NodeInfo>,
    pub deleted: Vec<NodeInfo>,
    pub jobs: Vec<ExportJob>,
}

impl SyncReport {
    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Figma export summary\n");
        let _ = writeln!(
            out,
            "**Date:** {}  ",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let _ = writeln!(
            out,
            "**File:** {} (`{}`, version {})  ",
            self.file_name, self.file_key, self.file_version
        );
        if let Some(resolved) = &self.resolved_node {
            let _ = writeln!(
                out,
                "**Node:** `{}` (requested `{}`)  ",
                resolved.resolved_id, resolved.original_id
            );
        }
        let _ = writeln!(out, "**Sync id:** `{}`", self.sync_id);
        if self.dry_run {
            let _ = writeln!(out, "\n> Dry run: nothing was written.");
        }

        let _ = writeln!(out, "\n## Overview\n");
        let _ = writeln!(out, "- Nodes scanned: {}", self.filter.total);
        let _ = writeln!(out, "- Nodes selected: {}", self.filter.kept);
        let _ = writeln!(out, "- Exported: {}", self.export.completed);
        let _ = writeln!(out, "- Failed: {}", self.export.failed);
        let _ = writeln!(out, "- Skipped: {}", self.export.skipped);
        let _ = writeln!(
            out,
            "- Dev-ready: {}",
            self.dev_ready.get(&DevReadyStatus::Ready).copied().unwrap_or(0)
        );
        let _ = writeln!(out, "- Elapsed: {:.1}s", self.elapsed_ms as f64 / 1000.0);

        let _ = writeln!(out, "\n## Changes\n");
        let _ = writeln!(out, "- New: {}", self.change_stats.new);
        let _ = writeln!(out, "- Modified: {}", self.change_stats.modified);
        let _ = writeln!(out, "- Unchanged: {}", self.change_stats.unchanged);
        let _ = writeln!(out, "- Deleted: {}", self.change_stats.deleted);

        let _ = writeln!(out, "\n## Dev-ready status\n");
        for (status, count) in &self.dev_ready {
            let _ = writeln!(out, "- {}: {}", status.as_str(), count);
        }

        if !self.pages.is_empty() {
            let _ = writeln!(out, "\n## Pages\n");
            let _ = writeln!(out, "| Page | Nodes | Exported | Failed | Skipped |");
            let _ = writeln!(out, "|------|------:|---------:|-------:|--------:|");
            for page in &self.pages {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} | {} |",
                    page.page_name, page.nodes, page.completed, page.failed, page.skipped
                );
            }
        }

        let failed: Vec<&ExportJob> = self
            .jobs
            .iter()
            .filter(|j| j.status == ExportStatus::Failed)
            .collect();
        if !failed.is_empty() {
            let _ = writeln!(out, "\n## Failures\n");
            for job in failed {
                let _ = writeln!(
                    out,
                    "- `{}` {}: {}",
                    job.node_id,
                    job.node_name,
                    job.error.as_deref().unwrap_or("unknown error")
                );
            }
        }

        if !self.deleted.is_empty() {
            let _ = writeln!(out, "\n## Deleted in Figma\n");
            for node in &self.deleted {
                let _ = writeln!(out, "- `{}` {}", node.id(), node.name());
            }
        }

        let _ = writeln!(out, "\n## Configuration\n");
        let _ = writeln!(out, "- Batch size: {}", self.config.batch_size);
        let _ = writeln!(
            out,
            "- Delay between batches: {}ms",
            self.config.delay_between_batches_ms
        );
        let _ = writeln!(out, "- Max retries: {}", self.config.max_retries);
        let _ = writeln!(out, "- Format: {}", self.config.format.as_str());
        if let Some(combinator) = self.filter.combinator {
            let _ = writeln!(out, "- Filter combinator: {:?}", combinator);
        }
        out
    }

    /// Write one file per requested format into `dir`.
    pub fn write_reports(&self, dir: &Path, formats: &[ReportFormat]) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::new();
        for format in formats {
            let path = match format {
                ReportFormat::Json => {
                    let path = dir.join(JSON_REPORT_FILE);
                    std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
                    path
                }
                ReportFormat::Markdown => {
                    let path = dir.join(MARKDOWN_REPORT_FILE);
                    std::fs::write(&path, self.render_markdown())?;
                    path
                }
            };
            info!(path = %path.display(), "report written");
            written.push(path);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readiness::status_counts;

    fn job(id: &str, page: Option<(&str, &str)>, status: ExportStatus) -> ExportJob {
        ExportJob {
            node_id: id.into(),
            node_name: format!("node {id}"),
            page_id: page.map(|(id, _)| id.to_string()),
            page_name: page.map(|(_, name)| name.to_string()),
            format: FigmaImageFormat::Svg,
            status,
            file_name: id.replace(':', "-"),
            file_path: None,
            file_size: None,
            checksum: None,
            error: (status == ExportStatus::Failed).then(|| "boom".to_string()),
            skip_reason: None,
            exported_at: None,
            change_status: crate::change::ChangeStatus::New,
            dev_ready_status: DevReadyStatus::Unknown,
        }
    }

    fn report(jobs: Vec<ExportJob>) -> SyncReport {
        SyncReport {
            sync_id: "abc".into(),
            timestamp: Utc::now(),
            file_key: "KEY".into(),
            file_name: "Icons".into(),
            file_version: "42".into(),
            resolved_node: None,
            dry_run: false,
            force: false,
            change_stats: ChangeStats {
                new: 3,
                ..Default::default()
            },
            dev_ready: status_counts(&[DevReadyStatus::Ready]),
            filter: FilterSummary::default(),
            export: ExportSummary::from_jobs(&jobs),
            pages: page_summaries(&jobs),
            config: ConfigEcho::from_config(&Config::default()),
            elapsed_ms: 1500,
            nodes: Vec::new(),
            deleted: Vec::new(),
            jobs,
        }
    }

    #[test]
    fn groups_jobs_by_page_in_first_seen_order() {
        let jobs = vec![
            job("1:1", Some(("0:2", "Icons")), ExportStatus::Completed),
            job("1:2", Some(("0:1", "Logos")), ExportStatus::Failed),
            job("1:3", Some(("0:2", "Icons")), ExportStatus::Skipped),
            job("1:4", None, ExportStatus::Completed),
        ];
        let pages = page_summaries(&jobs);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].page_name, "Icons");
        assert_eq!((pages[0].nodes, pages[0].completed, pages[0].skipped), (2, 1, 1));
        assert_eq!(pages[1].failed, 1);
        assert_eq!(pages[2].page_name, "(no page)");
    }

    #[test]
    fn markdown_lists_counts_and_failures() {
        let md = report(vec![
            job("1:1", Some(("0:1", "Icons")), ExportStatus::Completed),
            job("1:2", Some(("0:1", "Icons")), ExportStatus::Failed),
        ])
        .render_markdown();
        assert!(md.starts_with("# Figma export summary"));
        assert!(md.contains("- New: 3"));
        assert!(md.contains("- Exported: 1"));
        assert!(md.contains("| Icons | 2 | 1 | 1 | 0 |"));
        assert!(md.contains("`1:2` node 1:2: boom"));
        assert!(md.contains("- ready: 1"));
    }

    #[test]
    fn writes_requested_formats_only() {
        let dir = tempfile::tempdir().unwrap();
        let written = report(Vec::new())
            .write_reports(dir.path(), &[ReportFormat::Json])
            .unwrap();
        assert_eq!(written, vec![dir.path().join(JSON_REPORT_FILE)]);
        assert!(!dir.path().join(MARKDOWN_REPORT_FILE).exists());

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&written[0]).unwrap()).unwrap();
        assert_eq!(json["fileVersion"], "42");
        assert_eq!(json["changeStats"]["new"], 3);
        assert_eq!(json["devReady"]["ready"], 1);
        assert_eq!(json["config"]["batchSize"], 10);
    }
}
