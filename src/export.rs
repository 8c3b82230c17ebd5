//! Batch export of rendered nodes to disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::change::{ChangeStatus, NodeInfo};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::figma_client::{FigmaApi, FigmaImageFormat, ImageExportOptions};
use crate::filter::{FileNamer, NameAssignment};
use crate::readiness::DevReadyStatus;

pub const MAX_FILENAME_LEN: usize = 100;
pub const CANCELLED_REASON: &str = "cancelled";
pub const UNCHANGED_REASON: &str = "unchanged";
pub const DRY_RUN_REASON: &str = "dry run";

const INVALID_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
static SEPARATOR_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-_]+").expect("static regex"));

/// File stem for a node name: invalid path characters replaced, lowercased,
/// spaces turned into `-`, separator runs collapsed, at most 100 chars.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if INVALID_FILENAME_CHARS.contains(&c) { '_' } else { c })
        .collect();
    let lowered = replaced.to_lowercase().replace(' ', "-");
    let collapsed = SEPARATOR_RUNS.replace_all(&lowered, "-");
    let trimmed = collapsed.trim_matches(|c| c == '-' || c == '_');
    let truncated: String = trimmed.chars().take(MAX_FILENAME_LEN).collect();
    let stem = truncated.trim_end_matches(|c| c == '-' || c == '_');
    if stem.is_empty() {
        "unnamed".to_string()
    } else {
        stem.to_string()
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJob {
    pub node_id: String,
    pub node_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_name: Option<String>,
    pub format: FigmaImageFormat,
    pub status: ExportStatus,
    /// Stem without extension
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<String>,
    pub change_status: ChangeStatus,
    pub dev_ready_status: DevReadyStatus,
}

impl ExportJob {
    fn from_node(node: &NodeInfo, format: FigmaImageFormat, file_name: String) -> Self {
        Self {
            node_id: node.record.id.clone(),
            node_name: node.record.name.clone(),
            page_id: node.record.page_id.clone(),
            page_name: node.record.page_name.clone(),
            format,
            status: ExportStatus::Pending,
            file_name,
            file_path: None,
            file_size: None,
            checksum: None,
            error: None,
            skip_reason: None,
            exported_at: None,
            change_status: node.change_status,
            dev_ready_status: node.status,
        }
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = ExportStatus::Skipped;
        self.skip_reason = Some(reason.into());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ExportStatus::Failed;
        self.error = Some(error.into());
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == ExportStatus::Skipped && self.skip_reason.as_deref() == Some(CANCELLED_REASON)
    }
}

/// One job per node, in node order.
///
/// Without `force`, nodes that did not change since the last run are skipped.
/// File names are assigned for every node so that suffixes stay stable
/// between runs.
pub fn plan_jobs(
    nodes: &[NodeInfo],
    namer: &mut FileNamer,
    format: FigmaImageFormat,
    force: bool,
) -> Vec<ExportJob> {
    nodes
        .iter()
        .map(|node| {
            let mut job = match namer.assign(&node.record.name) {
                NameAssignment::Assigned(stem) => ExportJob::from_node(node, format, stem),
                NameAssignment::Collision(stem) => {
                    let mut job = ExportJob::from_node(node, format, stem.clone());
                    job.skip(format!("file name '{stem}' already taken"));
                    job
                }
            };
            if job.status == ExportStatus::Pending && !force && !node.change_status.needs_export() {
                job.skip(UNCHANGED_REASON);
            }
            job
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub batches: usize,
    pub bytes_written: u64,
    pub duration_ms: u64,
}

impl ExportSummary {
    pub fn from_jobs(jobs: &[ExportJob]) -> Self {
        let mut summary = Self {
            total: jobs.len(),
            ..Default::default()
        };
        for job in jobs {
            match job.status {
                ExportStatus::Completed => {
                    summary.completed += 1;
                    summary.bytes_written += job.file_size.unwrap_or(0);
                }
                ExportStatus::Failed => summary.failed += 1,
                ExportStatus::Skipped => summary.skipped += 1,
                ExportStatus::Pending | ExportStatus::Processing => {}
            }
        }
        summary
    }
}

/// Sidecar written next to every exported asset.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AssetMetadata<'a> {
    #[serde(flatten)]
    node: &'a NodeInfo,
    file_key: &'a str,
    file_name: String,
    file_size: u64,
    checksum: &'a str,
    export_settings: &'a ImageExportOptions,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub output_dir: PathBuf,
    pub options: ImageExportOptions,
    pub batch_size: usize,
    pub delay_between_batches: Duration,
    pub write_metadata: bool,
}

impl EngineSettings {
    pub fn from_config(config: &Config, output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            options: ImageExportOptions {
                format: config.target_nodes.export_mode,
                scale: config.export_settings.scale,
                ..Default::default()
            },
            batch_size: config.export_settings.batch_size.max(1),
            delay_between_batches: config.export_settings.delay_between_batches,
            write_metadata: config.output_settings.write_metadata,
        }
    }
}

pub struct ExportEngine<'a, A: FigmaApi + ?Sized> {
    api: &'a A,
    file_key: &'a str,
    settings: EngineSettings,
    cancel: CancellationToken,
}

impl<'a, A: FigmaApi + ?Sized> ExportEngine<'a, A> {
    pub fn new(api: &'a A, file_key: &'a str, settings: EngineSettings) -> Self {
        Self {
            api,
            file_key,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Export every pending job, batch by batch.
    ///
    /// A failure is recorded on the job it belongs to and never aborts the
    /// run. `progress` is called after each batch with `(done, total)` over
    /// the pending jobs. `nodes` supplies sidecar metadata and receives
    /// `exported_at` / `svg_size` for completed exports.
    pub async fn run(
        &self,
        jobs: &mut [ExportJob],
        nodes: &mut [NodeInfo],
        progress: &(dyn Fn(usize, usize) + Send + Sync),
    ) -> Result<ExportSummary> {
        let started = Instant::now();
        tokio::fs::create_dir_all(&self.settings.output_dir).await?;

        let pending: Vec<usize> = jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| job.status == ExportStatus::Pending)
            .map(|(idx, _)| idx)
            .collect();
        let node_index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (node.record.id.clone(), idx))
            .collect();

        let total = pending.len();
        let batches: Vec<&[usize]> = pending.chunks(self.settings.batch_size).collect();
        info!(
            jobs = total,
            batches = batches.len(),
            batch_size = self.settings.batch_size,
            "starting export"
        );

        let mut done = 0;
        let mut batches_run = 0;
        for (batch_no, batch) in batches.iter().enumerate() {
            if batch_no > 0 && !self.pause_between_batches().await {
                break;
            }
            if self.cancel.is_cancelled() {
                break;
            }
            batches_run += 1;
            self.export_batch(batch, jobs, nodes, &node_index).await;
            done += batch.len();
            progress(done, total);
        }

        if self.cancel.is_cancelled() {
            let mut cancelled = 0;
            for &idx in &pending {
                if jobs[idx].status == ExportStatus::Pending {
                    jobs[idx].skip(CANCELLED_REASON);
                    cancelled += 1;
                }
            }
            warn!(cancelled, "export cancelled");
        }

        let mut summary = ExportSummary::from_jobs(jobs);
        summary.batches = batches_run;
        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            "export finished"
        );
        Ok(summary)
    }

    /// Sleep the configured delay. Returns `false` when cancelled meanwhile.
    async fn pause_between_batches(&self) -> bool {
        let delay = self.settings.delay_between_batches;
        if delay.is_zero() {
            return !self.cancel.is_cancelled();
        }
        debug!(delay_ms = delay.as_millis() as u64, "waiting between batches");
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn export_batch(
        &self,
        batch: &[usize],
        jobs: &mut [ExportJob],
        nodes: &mut [NodeInfo],
        node_index: &HashMap<String, usize>,
    ) {
        let ids: Vec<String> = batch.iter().map(|&idx| jobs[idx].node_id.clone()).collect();
        for &idx in batch {
            jobs[idx].status = ExportStatus::Processing;
        }

        let images = match self
            .api
            .export_images(self.file_key, &ids, &self.settings.options)
            .await
        {
            Ok(response) => response.images,
            Err(e) => {
                warn!(batch = ?ids, error = %e, "image export request failed");
                for &idx in batch {
                    jobs[idx].fail(e.to_string());
                }
                return;
            }
        };

        for &idx in batch {
            let job = &mut jobs[idx];
            let Some(url) = images.get(&job.node_id).cloned().flatten() else {
                warn!(node_id = %job.node_id, "no render URL returned");
                job.fail("Figma returned no render URL for this node");
                continue;
            };
            let node = node_index.get(&job.node_id).map(|&i| &mut nodes[i]);
            match self.save_asset(job, &url, node).await {
                Ok(()) => debug!(
                    node_id = %job.node_id,
                    file = %job.file_name,
                    bytes = job.file_size.unwrap_or(0),
                    "exported"
                ),
                Err(e) => {
                    warn!(node_id = %job.node_id, error = %e, "export failed");
                    job.fail(e.to_string());
                }
            }
        }
    }

    async fn save_asset(
        &self,
        job: &mut ExportJob,
        url: &str,
        node: Option<&mut NodeInfo>,
    ) -> Result<()> {
        let body = self.api.download(url).await?;
        validate_body(job.format, &body)?;

        let path = self
            .settings
            .output_dir
            .join(format!("{}.{}", job.file_name, job.format.extension()));
        tokio::fs::write(&path, &body).await?;

        let checksum = sha256_hex(&body);
        let exported_at = Utc::now().to_rfc3339();
        let size = body.len() as u64;

        if let Some(node) = node {
            node.exported_at = Some(exported_at.clone());
            node.svg_size = Some(size);
            if self.settings.write_metadata {
                let metadata = AssetMetadata {
                    node: &*node,
                    file_key: self.file_key,
                    file_name: format!("{}.{}", job.file_name, job.format.extension()),
                    file_size: size,
                    checksum: &checksum,
                    export_settings: &self.settings.options,
                };
                let sidecar = self
                    .settings
                    .output_dir
                    .join(format!("{}.json", job.file_name));
                tokio::fs::write(&sidecar, serde_json::to_vec_pretty(&metadata)?).await?;
            }
        }

        job.status = ExportStatus::Completed;
        job.file_path = Some(path);
        job.file_size = Some(size);
        job.checksum = Some(checksum);
        job.exported_at = Some(exported_at);
        Ok(())
    }
}

fn validate_body(format: FigmaImageFormat, body: &[u8]) -> Result<()> {
    if body.is_empty() {
        return Err(SyncError::Export("downloaded asset is empty".to_string()));
    }
    if format == FigmaImageFormat::Svg {
        let starts_with_tag = body
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|&b| b == b'<');
        if !starts_with_tag {
            return Err(SyncError::Export(
                "downloaded SVG does not start with a tag".to_string(),
            ));
        }
    }
    Ok(())
}
