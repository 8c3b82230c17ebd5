use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use figsync_lib::github::{GithubAuth, GithubPublisher};
use figsync_lib::{
    FigmaApiClient, FigmaAuth, FigsyncOutput, JobRegistry, SyncError, SyncJobStatus, SyncOutput,
    SyncPipeline, SyncRequest, FIGSYNC_OUTPUT_VERSION,
};
use tracing::{info, warn};

use crate::cli::{CombineArg, OutputFormat};
use crate::formatting::{render_error, write_output};
use crate::settings::load_config;

pub struct SyncArgs {
    pub file_key: String,
    pub node_id: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub force: bool,
    pub dry_run: bool,
    pub combine: Option<CombineArg>,
    pub publish: bool,
}

/// Run the sync command.
///
/// Exit codes: 0 when every selected node exported (or was skipped), 1 when
/// at least one node failed, 2 on fatal errors.
pub async fn run_sync(
    config_path: Option<PathBuf>,
    args: SyncArgs,
    format: OutputFormat,
    output: Option<PathBuf>,
) -> ExitCode {
    let config = match load_config(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => return render_error(err, format, output.clone()),
    };
    let Some(auth) = FigmaAuth::from_env() else {
        return render_error(
            SyncError::config("FIGMA_API_TOKEN is not set"),
            format,
            output.clone(),
        );
    };
    let client = match FigmaApiClient::new(auth, &config.api_settings) {
        Ok(client) => client,
        Err(err) => return render_error(err, format, output.clone()),
    };

    let registry = Arc::new(JobRegistry::new());
    let mut pipeline = SyncPipeline::new(&client, &config).with_registry(registry.clone());
    if args.publish && !args.dry_run {
        let publisher = GithubAuth::from_env()
            .and_then(|auth| GithubPublisher::new(auth, &config.github));
        match publisher {
            Ok(publisher) => pipeline = pipeline.with_publisher(publisher),
            Err(err) => return render_error(err, format, output.clone()),
        }
    }

    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let jobs = registry.cancel_unfinished().await;
            warn!(jobs, "interrupt received, finishing the current batch");
        }
    });

    let request = SyncRequest {
        file_key: args.file_key,
        node_id: args.node_id,
        output_dir: args.output_dir,
        force: args.force,
        dry_run: args.dry_run,
        combinator: args.combine.map(Into::into),
        publish: args.publish && !args.dry_run,
    };
    let result = pipeline.run(request).await;
    signal_task.abort();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => return render_error(err, format, output.clone()),
    };
    if outcome.job.as_ref().map(|job| job.status) == Some(SyncJobStatus::Cancelled) {
        info!("sync cancelled; unexported nodes will be retried next run");
    }
    let failed = outcome.report.export.failed > 0;

    let body = FigsyncOutput::Sync(SyncOutput {
        version: FIGSYNC_OUTPUT_VERSION.to_string(),
        outcome,
    });
    if let Err(err) = write_output(&body, format, output.clone()) {
        return render_error(err, format, output);
    }
    if failed {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}
