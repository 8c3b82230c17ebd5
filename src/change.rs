//! Change detection against the on-disk node cache.
//!
//! The cache maps node id to the `(lastModified, version)` pair seen on the
//! previous run plus the export metadata recorded for it. Each run compares
//! the current node list against it and rewrites it in full.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::readiness::DevReadyStatus;
use crate::types::NodeRecord;

pub const DELETED_NODE_TYPE: &str = "DELETED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    New,
    Modified,
    Unchanged,
    Deleted,
}

impl ChangeStatus {
    pub fn needs_export(&self) -> bool {
        matches!(self, ChangeStatus::New | ChangeStatus::Modified)
    }
}

/// When the cache is rewritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheWriteMode {
    /// At detection time, before anything is exported. A run that aborts
    /// after detection still advances every node.
    #[default]
    OnDetect,
    /// After export. Nodes whose export failed or was cancelled keep their
    /// previous entry and are detected again next run.
    AfterExport,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachedNode {
    pub name: String,
    pub last_modified: Option<String>,
    pub version: i64,
    pub exported_at: Option<String>,
    pub dev_ready_score: f64,
    pub status: DevReadyStatus,
    pub svg_size: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeCache {
    pub nodes: BTreeMap<String, CachedNode>,
    pub last_export: Option<String>,
    pub file_version: Option<String>,
}

impl ChangeCache {
    /// Read the cache at `path`. A missing, unreadable or malformed file
    /// yields an empty cache.
    pub fn load(path: &Path) -> Self {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no change cache yet");
                return Self::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read change cache, starting fresh");
                return Self::default();
            }
        };
        match serde_json::from_str::<ChangeCache>(&raw) {
            Ok(cache) => {
                info!(path = %path.display(), nodes = cache.nodes.len(), "loaded change cache");
                cache
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "change cache is corrupt, starting fresh");
                Self::default()
            }
        }
    }

    /// Write to a temp file next to `path`, then rename over it.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, serde_json::to_string_pretty(self)?)?;
        fs::rename(&temp_path, path)?;
        debug!(path = %path.display(), nodes = self.nodes.len(), "saved change cache");
        Ok(())
    }
}

/// A node with its change classification and dev-ready assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    #[serde(flatten)]
    pub record: NodeRecord,
    pub change_status: ChangeStatus,
    pub status: DevReadyStatus,
    pub dev_ready_score: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svg_size: Option<u64>,
}

impl NodeInfo {
    pub fn new(record: NodeRecord, change_status: ChangeStatus) -> Self {
        Self {
            record,
            change_status,
            status: DevReadyStatus::Unknown,
            dev_ready_score: 0.0,
            issues: Vec::new(),
            exported_at: None,
            svg_size: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    fn deleted(id: &str, cached: &CachedNode) -> Self {
        let record = NodeRecord {
            id: id.to_string(),
            name: cached.name.clone(),
            node_type: DELETED_NODE_TYPE.to_string(),
            width: 0.0,
            height: 0.0,
            last_modified: cached.last_modified.clone(),
            version: cached.version,
            path: String::new(),
            depth: 0,
            page_id: None,
            page_name: None,
            ancestor_ids: Vec::new(),
        };
        Self {
            status: cached.status,
            dev_ready_score: cached.dev_ready_score,
            exported_at: cached.exported_at.clone(),
            svg_size: cached.svg_size,
            ..Self::new(record, ChangeStatus::Deleted)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStats {
    pub new: usize,
    pub modified: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

impl ChangeStats {
    fn record(&mut self, status: ChangeStatus) {
        match status {
            ChangeStatus::New => self.new += 1,
            ChangeStatus::Modified => self.modified += 1,
            ChangeStatus::Unchanged => self.unchanged += 1,
            ChangeStatus::Deleted => self.deleted += 1,
        }
    }

    /// Nodes present in the current fetch.
    pub fn current(&self) -> usize {
        self.new + self.modified + self.unchanged
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChangeReport {
    /// Current nodes, in input order
    pub nodes: Vec<NodeInfo>,
    /// Cached nodes missing from the current fetch, sorted by id
    pub deleted: Vec<NodeInfo>,
    pub stats: ChangeStats,
}

pub struct ChangeDetector {
    path: PathBuf,
    previous: ChangeCache,
    mode: CacheWriteMode,
}

impl ChangeDetector {
    pub fn open(path: impl Into<PathBuf>, mode: CacheWriteMode) -> Self {
        let path = path.into();
        let previous = ChangeCache::load(&path);
        Self {
            path,
            previous,
            mode,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> CacheWriteMode {
        self.mode
    }

    pub fn previous(&self) -> &ChangeCache {
        &self.previous
    }

    /// Classify `current` against the cache.
    ///
    /// In [`CacheWriteMode::OnDetect`] the new snapshot is written before
    /// returning; a failed write is logged and does not fail detection.
    pub fn detect_changes(&mut self, current: &[NodeRecord], file_version: &str) -> ChangeReport {
        let mut report = ChangeReport::default();
        let mut seen = HashSet::with_capacity(current.len());

        for record in current {
            seen.insert(record.id.as_str());
            let status = match self.previous.nodes.get(&record.id) {
                None => ChangeStatus::New,
                Some(cached)
                    if cached.last_modified == record.last_modified
                        && cached.version == record.version =>
                {
                    ChangeStatus::Unchanged
                }
                Some(_) => ChangeStatus::Modified,
            };
            report.stats.record(status);
            report.nodes.push(NodeInfo::new(record.clone(), status));
        }

        for (id, cached) in &self.previous.nodes {
            if !seen.contains(id.as_str()) {
                report.stats.record(ChangeStatus::Deleted);
                report.deleted.push(NodeInfo::deleted(id, cached));
            }
        }

        info!(
            new = report.stats.new,
            modified = report.stats.modified,
            unchanged = report.stats.unchanged,
            deleted = report.stats.deleted,
            "change detection complete"
        );

        if self.mode == CacheWriteMode::OnDetect {
            if let Err(e) = self.commit(&report.nodes, &HashSet::new(), file_version) {
                warn!(path = %self.path.display(), error = %e, "could not write change cache");
            }
        }
        report
    }

    /// Rewrite the cache from `nodes`.
    ///
    /// Ids in `hold_back` keep their previous entry (or stay absent if they
    /// had none) when running in [`CacheWriteMode::AfterExport`]. Fields the
    /// node does not carry yet (`exported_at`, `svg_size`) are taken from the
    /// previous entry.
    pub fn commit(
        &mut self,
        nodes: &[NodeInfo],
        hold_back: &HashSet<String>,
        file_version: &str,
    ) -> Result<()> {
        let mut snapshot = ChangeCache {
            nodes: BTreeMap::new(),
            last_export: Some(Utc::now().to_rfc3339()),
            file_version: Some(file_version.to_string()),
        };
        for node in nodes {
            let previous = self.previous.nodes.get(node.id());
            if self.mode == CacheWriteMode::AfterExport && hold_back.contains(node.id()) {
                if let Some(previous) = previous {
                    snapshot.nodes.insert(node.id().to_string(), previous.clone());
                }
                continue;
            }
            snapshot.nodes.insert(
                node.id().to_string(),
                CachedNode {
                    name: node.record.name.clone(),
                    last_modified: node.record.last_modified.clone(),
                    version: node.record.version,
                    exported_at: node
                        .exported_at
                        .clone()
                        .or_else(|| previous.and_then(|p| p.exported_at.clone())),
                    dev_ready_score: node.dev_ready_score,
                    status: node.status,
                    svg_size: node.svg_size.or_else(|| previous.and_then(|p| p.svg_size)),
                },
            );
        }
        snapshot.save(&self.path)?;
        info!(path = %self.path.display(), nodes = snapshot.nodes.len(), "change cache updated");
        self.previous = snapshot;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, modified: &str, version: i64) -> NodeRecord {
        NodeRecord {
            id: id.into(),
            name: format!("node-{id}"),
            node_type: "COMPONENT".into(),
            width: 24.0,
            height: 24.0,
            last_modified: Some(modified.into()),
            version,
            path: format!("Page/node-{id}"),
            depth: 2,
            page_id: None,
            page_name: None,
            ancestor_ids: Vec::new(),
        }
    }

    #[test]
    fn first_run_is_all_new_second_run_all_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let nodes = vec![record("1:1", "t1", 1), record("1:2", "t1", 1)];

        let mut detector = ChangeDetector::open(&path, CacheWriteMode::OnDetect);
        let first = detector.detect_changes(&nodes, "10");
        assert_eq!(first.stats.new, 2);
        assert!(path.exists());

        let mut detector = ChangeDetector::open(&path, CacheWriteMode::OnDetect);
        let second = detector.detect_changes(&nodes, "10");
        assert_eq!(second.stats.unchanged, 2);
        assert_eq!(second.stats.current(), nodes.len());
        assert_eq!(detector.previous().file_version.as_deref(), Some("10"));
    }

    #[test]
    fn classifies_modified_and_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut detector = ChangeDetector::open(&path, CacheWriteMode::OnDetect);
        detector.detect_changes(
            &[record("1", "t1", 1), record("2", "t1", 1), record("3", "t1", 1)],
            "1",
        );

        let mut detector = ChangeDetector::open(&path, CacheWriteMode::OnDetect);
        let report = detector.detect_changes(
            &[record("1", "t1", 1), record("2", "t2", 1), record("4", "t1", 1)],
            "2",
        );
        let statuses: Vec<ChangeStatus> = report.nodes.iter().map(|n| n.change_status).collect();
        assert_eq!(
            statuses,
            vec![ChangeStatus::Unchanged, ChangeStatus::Modified, ChangeStatus::New]
        );
        assert_eq!(report.stats.deleted, 1);
        assert_eq!(report.deleted[0].id(), "3");
        assert_eq!(report.deleted[0].record.node_type, DELETED_NODE_TYPE);
        assert_eq!(report.deleted[0].record.width, 0.0);

        // Deleted nodes drop out of the rewritten cache.
        assert!(!detector.previous().nodes.contains_key("3"));
    }

    #[test]
    fn version_bump_alone_is_a_modification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        ChangeDetector::open(&path, CacheWriteMode::OnDetect).detect_changes(&[record("1", "t", 1)], "1");
        let report = ChangeDetector::open(&path, CacheWriteMode::OnDetect)
            .detect_changes(&[record("1", "t", 2)], "1");
        assert_eq!(report.stats.modified, 1);
    }

    #[test]
    fn corrupt_cache_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{ not json").unwrap();
        let mut detector = ChangeDetector::open(&path, CacheWriteMode::AfterExport);
        assert!(detector.previous().nodes.is_empty());
        let report = detector.detect_changes(&[record("1", "t", 1)], "1");
        assert_eq!(report.stats.new, 1);
    }

    #[test]
    fn reads_cache_written_by_older_tools() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(
            &path,
            r#"{"nodes": {"1:1": {"name": "a", "last_modified": null, "version": 0,
                "exported_at": null, "dev_ready_score": 0.5, "status": "review", "svg_size": null}},
               "last_export": "2025-01-01T00:00:00", "file_version": "3"}"#,
        )
        .unwrap();
        let cache = ChangeCache::load(&path);
        assert_eq!(cache.nodes["1:1"].status, DevReadyStatus::Review);
    }

    #[test]
    fn after_export_mode_defers_and_holds_back_failures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let nodes = vec![record("1", "t", 1), record("2", "t", 1)];

        let mut detector = ChangeDetector::open(&path, CacheWriteMode::AfterExport);
        let report = detector.detect_changes(&nodes, "1");
        assert!(!path.exists());

        let mut infos = report.nodes;
        infos[0].exported_at = Some("now".into());
        infos[0].svg_size = Some(42);
        let hold_back: HashSet<String> = ["2".to_string()].into();
        detector.commit(&infos, &hold_back, "1").unwrap();

        let cache = ChangeCache::load(&path);
        assert_eq!(cache.nodes["1"].svg_size, Some(42));
        assert!(!cache.nodes.contains_key("2"));

        let report = ChangeDetector::open(&path, CacheWriteMode::AfterExport).detect_changes(&nodes, "1");
        assert_eq!(report.stats.unchanged, 1);
        assert_eq!(report.stats.new, 1);
    }

    #[test]
    fn on_detect_mode_advances_even_failed_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let nodes = vec![record("1", "t", 1)];
        let mut detector = ChangeDetector::open(&path, CacheWriteMode::OnDetect);
        let report = detector.detect_changes(&nodes, "1");
        let hold_back: HashSet<String> = ["1".to_string()].into();
        detector.commit(&report.nodes, &hold_back, "1").unwrap();

        let report = ChangeDetector::open(&path, CacheWriteMode::OnDetect).detect_changes(&nodes, "1");
        assert_eq!(report.stats.unchanged, 1);
    }

    #[test]
    fn commit_carries_export_metadata_forward() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let nodes = vec![record("1", "t", 1)];
        let mut detector = ChangeDetector::open(&path, CacheWriteMode::AfterExport);
        let mut infos = detector.detect_changes(&nodes, "1").nodes;
        infos[0].exported_at = Some("earlier".into());
        infos[0].svg_size = Some(7);
        detector.commit(&infos, &HashSet::new(), "1").unwrap();

        let mut detector = ChangeDetector::open(&path, CacheWriteMode::AfterExport);
        let infos = detector.detect_changes(&nodes, "2").nodes;
        detector.commit(&infos, &HashSet::new(), "2").unwrap();
        let cache = ChangeCache::load(&path);
        assert_eq!(cache.nodes["1"].exported_at.as_deref(), Some("earlier"));
        assert_eq!(cache.nodes["1"].svg_size, Some(7));
        assert_eq!(cache.file_version.as_deref(), Some("2"));
    }
}
