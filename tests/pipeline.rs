use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use figsync_lib::figma_client::memory::InMemoryFigmaApi;
use figsync_lib::{
    BoundingBox, CacheWriteMode, ChangeCache, Config, ExportStatus, FigmaApi, FigmaDocumentNode,
    FigmaFileResponse, FigmaImageResponse, FilterCombinator, ImageExportOptions, JobRegistry,
    SyncJobStatus, SyncPipeline, SyncRequest,
};
use serde_json::Value;
use tempfile::TempDir;

fn component(id: &str, name: &str, size: f64) -> FigmaDocumentNode {
    FigmaDocumentNode {
        id: id.into(),
        name: name.into(),
        node_type: "COMPONENT".into(),
        absolute_bounding_box: Some(BoundingBox {
            x: 0.0,
            y: 0.0,
            width: size,
            height: size,
        }),
        last_modified: Some("2024-01-01T00:00:00Z".into()),
        ..Default::default()
    }
}

fn document(pages: Vec<(&str, &str, Vec<FigmaDocumentNode>)>) -> FigmaDocumentNode {
    FigmaDocumentNode {
        id: "0:0".into(),
        name: "Document".into(),
        node_type: "DOCUMENT".into(),
        children: pages
            .into_iter()
            .map(|(id, name, children)| FigmaDocumentNode {
                id: id.into(),
                name: name.into(),
                node_type: "CANVAS".into(),
                children,
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

fn three_nodes() -> FigmaDocumentNode {
    document(vec![(
        "0:1",
        "Icons",
        vec![
            component("1", "svg_exporter_button", 24.0),
            component("2", "icon_home", 24.0),
            component("3", "temp_draft", 24.0),
        ],
    )])
}

fn config(out: &Path) -> Config {
    let mut config = Config::default();
    config.output_settings.default_output_dir = out.to_path_buf();
    config.export_settings.delay_between_batches = Duration::ZERO;
    config.filter_patterns.include = vec!["svg_exporter_*".into(), "icon_*".into()];
    config.filter_patterns.exclude = vec!["temp_*".into()];
    config
}

fn request() -> SyncRequest {
    SyncRequest {
        file_key: "FILE".into(),
        ..Default::default()
    }
}

fn job_ids(jobs: &[figsync_lib::ExportJob]) -> Vec<&str> {
    jobs.iter().map(|j| j.node_id.as_str()).collect()
}

#[tokio::test]
async fn include_exclude_selects_expected_nodes_in_order() {
    let dir = TempDir::new().expect("tempdir");
    let api = InMemoryFigmaApi::from_document("100", three_nodes());
    let cfg = config(dir.path());

    let outcome = SyncPipeline::new(&api, &cfg).run(request()).await.unwrap();
    assert_eq!(job_ids(&outcome.report.jobs), vec!["1", "2"]);
    assert_eq!(outcome.report.filter.total, 3);
    assert_eq!(outcome.report.filter.kept, 2);
    assert_eq!(api.export_batches(), vec![vec!["1".to_string(), "2".to_string()]]);
}

#[tokio::test]
async fn full_sync_writes_assets_sidecars_reports_and_cache() {
    let dir = TempDir::new().expect("tempdir");
    let api = InMemoryFigmaApi::from_document("100", three_nodes())
        .with_asset("1", r#"<svg viewBox="0 0 24 24"><path d="M0 0h24"/></svg>"#);
    let cfg = config(dir.path());

    let outcome = SyncPipeline::new(&api, &cfg).run(request()).await.unwrap();
    let report = &outcome.report;
    assert_eq!(report.export.completed, 2);
    assert_eq!(report.export.failed, 0);
    assert_eq!(report.change_stats.new, 3);
    assert_eq!(outcome.job.as_ref().unwrap().status, SyncJobStatus::Completed);

    let svg = std::fs::read_to_string(dir.path().join("button.svg")).unwrap();
    assert!(svg.starts_with("<svg viewBox"));
    assert!(dir.path().join("icon-home.svg").exists());

    let sidecar: Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("button.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(sidecar["id"], "1");
    assert_eq!(sidecar["fileKey"], "FILE");
    assert_eq!(sidecar["fileName"], "button.svg");
    assert_eq!(sidecar["checksum"].as_str().unwrap().len(), 64);

    assert!(dir.path().join("export_report.json").exists());
    let summary = std::fs::read_to_string(dir.path().join("export_summary.md")).unwrap();
    assert!(summary.contains("Icons"));

    let cache = ChangeCache::load(&cfg.output_settings.cache_path(dir.path()));
    assert_eq!(cache.nodes.len(), 3);
    assert_eq!(cache.file_version.as_deref(), Some("100"));
    assert!(cache.nodes["1"].exported_at.is_some());
    assert!(cache.nodes["3"].exported_at.is_none());
}

#[tokio::test]
async fn second_run_skips_unchanged_nodes() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = config(dir.path());

    let first = InMemoryFigmaApi::from_document("100", three_nodes());
    SyncPipeline::new(&first, &cfg).run(request()).await.unwrap();

    let second = InMemoryFigmaApi::from_document("100", three_nodes());
    let outcome = SyncPipeline::new(&second, &cfg).run(request()).await.unwrap();
    assert_eq!(outcome.report.change_stats.unchanged, 3);
    assert_eq!(outcome.report.export.completed, 0);
    assert_eq!(outcome.report.export.skipped, 2);
    assert!(second.export_batches().is_empty());

    let forced = InMemoryFigmaApi::from_document("100", three_nodes());
    let outcome = SyncPipeline::new(&forced, &cfg)
        .run(SyncRequest {
            force: true,
            ..request()
        })
        .await
        .unwrap();
    assert_eq!(outcome.report.export.completed, 2);
}

#[tokio::test]
async fn detects_modified_and_deleted_nodes() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = config(dir.path());

    let first = InMemoryFigmaApi::from_document("100", three_nodes());
    SyncPipeline::new(&first, &cfg).run(request()).await.unwrap();

    let mut edited = component("2", "icon_home", 24.0);
    edited.last_modified = Some("2024-02-01T00:00:00Z".into());
    let doc = document(vec![(
        "0:1",
        "Icons",
        vec![component("1", "svg_exporter_button", 24.0), edited],
    )]);
    let api = InMemoryFigmaApi::from_document("101", doc);
    let outcome = SyncPipeline::new(&api, &cfg).run(request()).await.unwrap();

    let stats = outcome.report.change_stats;
    assert_eq!((stats.new, stats.modified, stats.unchanged, stats.deleted), (0, 1, 1, 1));
    assert_eq!(outcome.report.deleted.len(), 1);
    assert_eq!(outcome.report.deleted[0].id(), "3");
    assert_eq!(api.export_batches(), vec![vec!["2".to_string()]]);

    let cache = ChangeCache::load(&cfg.output_settings.cache_path(dir.path()));
    assert!(!cache.nodes.contains_key("3"));
}

#[tokio::test]
async fn one_bad_node_does_not_stop_the_others() {
    let dir = TempDir::new().expect("tempdir");
    let doc = document(vec![(
        "0:1",
        "Icons",
        vec![
            component("1:1", "icon_a", 24.0),
            component("1:2", "icon_b", 24.0),
            component("1:3", "icon_c", 24.0),
            component("1:4", "icon_d", 24.0),
        ],
    )]);
    let api = InMemoryFigmaApi::from_document("1", doc)
        .with_unrenderable("1:2")
        .with_asset("1:3", "")
        .with_failing_download("1:4");
    let mut cfg = config(dir.path());
    cfg.export_settings.batch_size = 2;
    cfg.export_settings.cache_write = CacheWriteMode::AfterExport;

    let outcome = SyncPipeline::new(&api, &cfg).run(request()).await.unwrap();
    let statuses: Vec<ExportStatus> = outcome.report.jobs.iter().map(|j| j.status).collect();
    assert_eq!(
        statuses,
        vec![
            ExportStatus::Completed,
            ExportStatus::Failed,
            ExportStatus::Failed,
            ExportStatus::Failed
        ]
    );
    assert_eq!(outcome.report.export.batches, 2);
    assert_eq!(outcome.job.as_ref().unwrap().errors.len(), 3);
    assert!(dir.path().join("icon-a.svg").exists());

    let cache = ChangeCache::load(&cfg.output_settings.cache_path(dir.path()));
    assert_eq!(cache.nodes.keys().collect::<Vec<_>>(), vec!["1:1"]);
}

#[tokio::test]
async fn name_collisions_get_suffixes() {
    let dir = TempDir::new().expect("tempdir");
    let doc = document(vec![(
        "0:1",
        "Icons",
        vec![
            component("1:1", "icon_home", 24.0),
            component("1:2", "svg_exporter_icon_home", 24.0),
        ],
    )]);
    let api = InMemoryFigmaApi::from_document("1", doc);
    let cfg = config(dir.path());

    let outcome = SyncPipeline::new(&api, &cfg).run(request()).await.unwrap();
    let names: Vec<&str> = outcome.report.jobs.iter().map(|j| j.file_name.as_str()).collect();
    assert_eq!(names, vec!["icon-home", "icon-home-2"]);
    assert!(dir.path().join("icon-home-2.svg").exists());
}

#[tokio::test]
async fn target_ids_combine_with_patterns() {
    let dir = TempDir::new().expect("tempdir");
    let mut cfg = config(dir.path());
    cfg.target_nodes.node_ids = vec!["3".into()];

    let api = InMemoryFigmaApi::from_document("1", three_nodes());
    let outcome = SyncPipeline::new(&api, &cfg)
        .run(SyncRequest {
            combinator: Some(FilterCombinator::Or),
            ..request()
        })
        .await
        .unwrap();
    assert_eq!(job_ids(&outcome.report.jobs), vec!["1", "2", "3"]);

    let api = InMemoryFigmaApi::from_document("1", three_nodes());
    let outcome = SyncPipeline::new(&api, &cfg)
        .run(SyncRequest {
            combinator: Some(FilterCombinator::And),
            force: true,
            ..request()
        })
        .await
        .unwrap();
    assert!(outcome.report.jobs.is_empty());
}

#[tokio::test]
async fn unresolvable_node_fails_the_job() {
    let dir = TempDir::new().expect("tempdir");
    let registry = Arc::new(JobRegistry::new());
    let api = InMemoryFigmaApi::from_document("1", FigmaDocumentNode {
        id: "0:0".into(),
        node_type: "DOCUMENT".into(),
        ..Default::default()
    });
    let cfg = config(dir.path());

    let err = SyncPipeline::new(&api, &cfg)
        .with_registry(registry.clone())
        .run(SyncRequest {
            node_id: Some("77-88".into()),
            ..request()
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("77-88"));

    let jobs = registry.list().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, SyncJobStatus::Failed);
    assert!(!jobs[0].errors.is_empty());
}

/// Cancels every registered job as soon as the first render is requested.
struct CancelOnExport {
    inner: InMemoryFigmaApi,
    registry: Arc<JobRegistry>,
}

#[async_trait]
impl FigmaApi for CancelOnExport {
    async fn file(&self, file_key: &str, depth: Option<u32>) -> figsync_lib::Result<FigmaFileResponse> {
        self.inner.file(file_key, depth).await
    }

    async fn node(
        &self,
        file_key: &str,
        node_id: &str,
        depth: Option<u32>,
    ) -> figsync_lib::Result<Option<FigmaDocumentNode>> {
        self.inner.node(file_key, node_id, depth).await
    }

    async fn export_images(
        &self,
        file_key: &str,
        node_ids: &[String],
        options: &ImageExportOptions,
    ) -> figsync_lib::Result<FigmaImageResponse> {
        self.registry.cancel_unfinished().await;
        self.inner.export_images(file_key, node_ids, options).await
    }

    async fn download(&self, url: &str) -> figsync_lib::Result<Vec<u8>> {
        self.inner.download(url).await
    }
}

#[tokio::test]
async fn registry_cancellation_stops_after_the_current_batch() {
    let dir = TempDir::new().expect("tempdir");
    let registry = Arc::new(JobRegistry::new());
    let api = CancelOnExport {
        inner: InMemoryFigmaApi::from_document("1", three_nodes()),
        registry: registry.clone(),
    };
    let mut cfg = config(dir.path());
    cfg.export_settings.batch_size = 1;
    cfg.export_settings.cache_write = CacheWriteMode::AfterExport;

    let outcome = SyncPipeline::new(&api, &cfg)
        .with_registry(registry.clone())
        .run(request())
        .await
        .unwrap();
    assert_eq!(outcome.report.export.completed, 1);
    assert_eq!(outcome.report.jobs[1].status, ExportStatus::Skipped);
    assert_eq!(outcome.report.jobs[1].skip_reason.as_deref(), Some("cancelled"));
    assert_eq!(outcome.job.as_ref().unwrap().status, SyncJobStatus::Cancelled);
    assert_eq!(api.inner.export_batches().len(), 1);

    // Cancelled nodes are not cached, so the next run picks them up.
    let cache = ChangeCache::load(&cfg.output_settings.cache_path(dir.path()));
    assert!(cache.nodes.contains_key("1"));
    assert!(!cache.nodes.contains_key("2"));
}
