//! End-to-end sync: fetch, detect, filter, score, export, report, publish.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::change::{CacheWriteMode, ChangeDetector, NodeInfo};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::export::{
    plan_jobs, EngineSettings, ExportEngine, ExportJob, ExportStatus, ExportSummary,
    DRY_RUN_REASON,
};
use crate::figma_client::{fetch_nodes_concurrently, FigmaApi};
use crate::filter::{FileNamer, FilterCombinator, NodeFilter};
use crate::github::{GithubPublisher, PublishSummary};
use crate::jobs::{JobRegistry, SyncJob};
use crate::node_id::{NodeResolver, ResolvedNode, ROOT_NODE_ID};
use crate::readiness::{status_counts, DevReadyScorer};
use crate::report::{page_summaries, ConfigEcho, FilterSummary, SyncReport};
use crate::types::{collect_nodes, CollectOptions, NodeRecord};

#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    pub file_key: String,
    /// Subtree to sync; the whole file when unset
    pub node_id: Option<String>,
    /// Overrides `output_settings.default_output_dir`
    pub output_dir: Option<PathBuf>,
    /// Export every selected node, changed or not
    pub force: bool,
    /// Detect, filter and score only; write nothing
    pub dry_run: bool,
    /// Overrides `filter_patterns.combinator`
    pub combinator: Option<FilterCombinator>,
    pub publish: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub output_dir: PathBuf,
    pub report_files: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<SyncJob>,
    pub report: SyncReport,
}

pub struct SyncPipeline<'a, A: FigmaApi + ?Sized> {
    api: &'a A,
    config: &'a Config,
    registry: Arc<JobRegistry>,
    scorer: DevReadyScorer,
    publisher: Option<GithubPublisher>,
}

impl<'a, A: FigmaApi + ?Sized> SyncPipeline<'a, A> {
    pub fn new(api: &'a A, config: &'a Config) -> Self {
        Self {
            api,
            config,
            registry: Arc::new(JobRegistry::new()),
            scorer: DevReadyScorer::default(),
            publisher: None,
        }
    }

    /// Jobs run by this pipeline are registered in `registry`, where they
    /// can be watched and cancelled.
    pub fn with_registry(mut self, registry: Arc<JobRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_publisher(mut self, publisher: GithubPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub async fn run(&self, request: SyncRequest) -> Result<SyncOutcome> {
        if request.file_key.trim().is_empty() {
            return Err(SyncError::config(
                "no Figma file key: pass --file-key or set FIGMA_FILE_KEY",
            ));
        }
        if request.publish && self.publisher.is_none() {
            return Err(SyncError::config(
                "publishing requested but GitHub is not configured",
            ));
        }
        // Fail on filter misconfiguration before any network call.
        let filter = NodeFilter::from_config(self.config, request.combinator)?;

        let (sync_id, cancel) = self.registry.create(&request.file_key).await;
        self.registry.start(sync_id).await;

        let result = self.execute(sync_id, &cancel, &filter, &request).await;
        match &result {
            Ok(outcome) => {
                for job in outcome.report.jobs.iter().filter(|j| j.status == ExportStatus::Failed) {
                    let reason = job.error.as_deref().unwrap_or("unknown error");
                    self.registry
                        .push_error(sync_id, format!("{}: {}", job.node_id, reason))
                        .await;
                }
            }
            Err(e) => self.registry.push_error(sync_id, e.to_string()).await,
        }
        self.registry.finish(sync_id, result.is_ok()).await;

        let mut outcome = result?;
        outcome.job = self.registry.get(sync_id).await;
        Ok(outcome)
    }

    async fn execute(
        &self,
        sync_id: Uuid,
        cancel: &CancellationToken,
        filter: &NodeFilter,
        request: &SyncRequest,
    ) -> Result<SyncOutcome> {
        let started = Instant::now();
        let config = self.config;
        let key = request.file_key.as_str();
        let depth = Some(config.api_settings.depth);

        let wants_subtree = request
            .node_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty() && *id != ROOT_NODE_ID);

        let (file, resolved) = match wants_subtree {
            None => (self.api.file(key, depth).await?, None),
            Some(node_id) => {
                let file = self.api.file(key, Some(1)).await?;
                let resolved = NodeResolver::new(self.api, depth).resolve(key, node_id).await?;
                (file, Some(resolved))
            }
        };
        info!(
            file = %file.name,
            version = %file.version,
            node = resolved.as_ref().map(|r| r.resolved_id.as_str()).unwrap_or("document"),
            "fetched Figma tree"
        );

        let root = resolved
            .as_ref()
            .map(|r| &r.document)
            .unwrap_or(&file.document);
        let collect = CollectOptions {
            max_depth: config.export_settings.max_depth,
            max_dimension: config.export_settings.max_dimension,
        };
        let mut records = collect_nodes(root, &collect);
        self.add_missing_targets(sync_id, filter, key, &collect, &mut records)
            .await;

        let output_dir = request
            .output_dir
            .clone()
            .unwrap_or_else(|| config.output_settings.default_output_dir.clone());
        let cache_mode = if request.dry_run {
            CacheWriteMode::AfterExport
        } else {
            config.export_settings.cache_write
        };
        let mut detector =
            ChangeDetector::open(config.output_settings.cache_path(&output_dir), cache_mode);
        let changes = detector.detect_changes(&records, &file.version);
        let mut nodes = changes.nodes;

        for node in nodes.iter_mut() {
            let assessment = self.scorer.assess(
                &node.record.name,
                node.record.width,
                node.record.height,
                &node.record.node_type,
            );
            node.dev_ready_score = assessment.score;
            node.status = assessment.status;
            node.issues = assessment.issues;
        }

        let filtered = filter.apply(&records);
        let kept: HashSet<&str> = filtered.kept.iter().map(|n| n.id.as_str()).collect();
        let selected = select_nodes(&nodes, &kept);
        let dev_ready = status_counts(selected.iter().map(|n| &n.status));
        self.registry
            .record_stats(sync_id, changes.stats, dev_ready.clone())
            .await;

        let mut namer = FileNamer::from_config(config);
        let mut jobs = plan_jobs(
            &selected,
            &mut namer,
            config.target_nodes.export_mode,
            request.force,
        );

        let export = if request.dry_run {
            for job in jobs.iter_mut().filter(|j| j.status == ExportStatus::Pending) {
                job.skip(DRY_RUN_REASON);
            }
            ExportSummary::from_jobs(&jobs)
        } else {
            let progress = self.registry.progress_handle(sync_id).await;
            let engine = ExportEngine::new(
                self.api,
                key,
                EngineSettings::from_config(config, &output_dir),
            )
            .with_cancellation(cancel.clone());
            engine
                .run(&mut jobs, &mut nodes, &move |done, total| {
                    if let Some(progress) = &progress {
                        progress.set(done, total);
                    }
                })
                .await?
        };

        if !request.dry_run {
            let hold_back: HashSet<String> = jobs
                .iter()
                .filter(|j| j.status == ExportStatus::Failed || j.is_cancelled())
                .map(|j| j.node_id.clone())
                .collect();
            if let Err(e) = detector.commit(&nodes, &hold_back, &file.version) {
                warn!(error = %e, "could not update change cache");
                self.registry
                    .push_error(sync_id, format!("cache not updated: {e}"))
                    .await;
            }
        }

        let report = SyncReport {
            sync_id: sync_id.to_string(),
            timestamp: Utc::now(),
            file_key: key.to_string(),
            file_name: file.name.clone(),
            file_version: file.version.clone(),
            resolved_node: resolved,
            dry_run: request.dry_run,
            force: request.force,
            change_stats: changes.stats,
            dev_ready,
            filter: FilterSummary::from(&filtered),
            export,
            pages: page_summaries(&jobs),
            config: ConfigEcho::from_config(config),
            elapsed_ms: started.elapsed().as_millis() as u64,
            nodes: select_nodes(&nodes, &kept),
            deleted: changes.deleted,
            jobs,
        };

        let report_files = if request.dry_run {
            Vec::new()
        } else {
            report.write_reports(&output_dir, &config.output_settings.report_formats)?
        };

        let publish = match (&self.publisher, request.publish && !request.dry_run) {
            (Some(publisher), true) => {
                let files = publishable_files(&report.jobs, &report_files, &output_dir);
                Some(publisher.publish(&files).await?)
            }
            _ => None,
        };

        info!(
            %sync_id,
            exported = report.export.completed,
            failed = report.export.failed,
            skipped = report.export.skipped,
            elapsed_ms = report.elapsed_ms,
            "sync finished"
        );
        Ok(SyncOutcome {
            output_dir,
            report_files,
            publish,
            job: None,
            report,
        })
    }

    /// Target ids that the traversal did not reach are fetched directly.
    async fn add_missing_targets(
        &self,
        sync_id: Uuid,
        filter: &NodeFilter,
        key: &str,
        collect: &CollectOptions,
        records: &mut Vec<NodeRecord>,
    ) {
        let missing = filter.missing_targets(records);
        if missing.is_empty() {
            return;
        }
        info!(count = missing.len(), "fetching target nodes outside the traversed tree");
        let fetched = fetch_nodes_concurrently(
            self.api,
            key,
            &missing,
            Some(self.config.api_settings.depth),
            self.config.api_settings.max_concurrent_requests,
        )
        .await;

        let mut known: HashSet<String> = records.iter().map(|r| r.id.clone()).collect();
        for (id, result) in fetched {
            match result {
                Ok(Some(document)) => {
                    for record in collect_nodes(&document, collect) {
                        if known.insert(record.id.clone()) {
                            records.push(record);
                        }
                    }
                }
                Ok(None) => {
                    warn!(node_id = %id, "target node not found");
                    self.registry
                        .push_error(sync_id, format!("target node {id} not found"))
                        .await;
                }
                Err(e) => {
                    warn!(node_id = %id, error = %e, "target node fetch failed");
                    self.registry
                        .push_error(sync_id, format!("target node {id}: {e}"))
                        .await;
                }
            }
        }
    }
}

fn select_nodes(nodes: &[NodeInfo], kept: &HashSet<&str>) -> Vec<NodeInfo> {
    nodes
        .iter()
        .filter(|n| kept.contains(n.id()))
        .cloned()
        .collect()
}

/// Exported assets, their sidecars, and the reports.
fn publishable_files(
    jobs: &[ExportJob],
    report_files: &[PathBuf],
    output_dir: &std::path::Path,
) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for job in jobs.iter().filter(|j| j.status == ExportStatus::Completed) {
        if let Some(path) = &job.file_path {
            files.push(path.clone());
        }
        let sidecar = output_dir.join(format!("{}.json", job.file_name));
        if sidecar.exists() {
            files.push(sidecar);
        }
    }
    files.extend(report_files.iter().cloned());
    files
}

/// Resolve a node id without syncing, for the `resolve` command.
pub async fn resolve_node<A: FigmaApi + ?Sized>(
    api: &A,
    config: &Config,
    file_key: &str,
    node_id: &str,
) -> Result<ResolvedNode> {
    NodeResolver::new(api, Some(config.api_settings.depth))
        .resolve(file_key, node_id)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeCache;
    use crate::figma_client::memory::tests_support::document_with;
    use crate::figma_client::memory::InMemoryFigmaApi;
    use crate::jobs::SyncJobStatus;
    use std::time::Duration;

    fn config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.output_settings.default_output_dir = dir.to_path_buf();
        config.export_settings.delay_between_batches = Duration::ZERO;
        config.filter_patterns.include = vec!["svg_exporter_*".into(), "icon_*".into()];
        config.filter_patterns.exclude = vec!["temp_*".into()];
        config
    }

    fn request() -> SyncRequest {
        SyncRequest {
            file_key: "KEY".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn rejects_missing_file_key_and_combinator_before_network() {
        let dir = tempfile::tempdir().unwrap();
        let api = InMemoryFigmaApi::from_document("1", document_with(&[]));
        let mut cfg = config(dir.path());

        let err = SyncPipeline::new(&api, &cfg)
            .run(SyncRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));

        cfg.target_nodes.node_ids = vec!["1:1".into()];
        let err = SyncPipeline::new(&api, &cfg).run(request()).await.unwrap_err();
        assert!(err.to_string().contains("combine"));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let api = InMemoryFigmaApi::from_document("1", document_with(&[("1:1", "icon_a")]));
        let cfg = config(&out);
        let outcome = SyncPipeline::new(&api, &cfg)
            .run(SyncRequest {
                dry_run: true,
                ..request()
            })
            .await
            .unwrap();
        assert_eq!(outcome.report.export.skipped, 1);
        assert!(outcome.report_files.is_empty());
        assert!(!out.exists());
        assert!(api.export_batches().is_empty());
    }

    #[tokio::test]
    async fn resolves_subtree_by_dash_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = document_with(&[("5:1", "icon_a")]);
        doc.children[0].children[0].children = vec![
            crate::figma_client::memory::tests_support::sized("5:2", "icon_inner", "INSTANCE", 16.0),
        ];
        let api = InMemoryFigmaApi::from_document("1", doc);
        let cfg = config(dir.path());
        let outcome = SyncPipeline::new(&api, &cfg)
            .run(SyncRequest {
                node_id: Some("5-1".into()),
                ..request()
            })
            .await
            .unwrap();
        let resolved = outcome.report.resolved_node.as_ref().unwrap();
        assert_eq!(resolved.resolved_id, "5:1");
        assert_eq!(outcome.report.export.completed, 2);
        assert_eq!(outcome.job.unwrap().status, SyncJobStatus::Completed);
    }

    #[tokio::test]
    async fn fetches_targets_outside_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        let api = InMemoryFigmaApi::from_document("1", document_with(&[("1:1", "icon_a")]))
            .with_node(
                "9:9",
                crate::figma_client::memory::tests_support::sized("9:9", "logo", "FRAME", 32.0),
            );
        let mut cfg = config(dir.path());
        cfg.target_nodes.node_ids = vec!["9:9".into()];
        cfg.filter_patterns.combinator = Some(FilterCombinator::Or);

        let outcome = SyncPipeline::new(&api, &cfg).run(request()).await.unwrap();
        let exported: Vec<&str> = outcome
            .report
            .jobs
            .iter()
            .map(|j| j.node_id.as_str())
            .collect();
        assert_eq!(exported, vec!["1:1", "9:9"]);
        assert_eq!(outcome.report.filter.target_matches, 1);
    }

    #[tokio::test]
    async fn after_export_cache_retries_failed_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let doc = document_with(&[("1:1", "icon_a"), ("1:2", "icon_b")]);
        let mut cfg = config(dir.path());
        cfg.export_settings.cache_write = CacheWriteMode::AfterExport;

        let failing = InMemoryFigmaApi::from_document("1", doc.clone()).with_failing_download("1:2");
        let first = SyncPipeline::new(&failing, &cfg).run(request()).await.unwrap();
        assert_eq!(first.report.export.failed, 1);
        assert_eq!(first.job.as_ref().unwrap().errors.len(), 1);

        let cache = ChangeCache::load(&cfg.output_settings.cache_path(dir.path()));
        assert!(cache.nodes.contains_key("1:1"));
        assert!(!cache.nodes.contains_key("1:2"));

        let healthy = InMemoryFigmaApi::from_document("1", doc);
        let second = SyncPipeline::new(&healthy, &cfg).run(request()).await.unwrap();
        assert_eq!(second.report.change_stats.unchanged, 1);
        assert_eq!(second.report.change_stats.new, 1);
        assert_eq!(second.report.export.completed, 1);
    }
}
