use std::path::PathBuf;
use std::process::ExitCode;

use figsync_lib::{
    candidates, resolve_node, FigmaApiClient, FigmaAuth, FigsyncOutput, NodeIdFormat,
    ResolveOutput, SyncError, FIGSYNC_OUTPUT_VERSION,
};

use crate::cli::OutputFormat;
use crate::formatting::{render_error, write_output};
use crate::settings::load_config;

/// Run the resolve command. `--offline` only lists the candidate ids.
pub async fn run_resolve(
    config_path: Option<PathBuf>,
    node_id: String,
    file_key: Option<String>,
    offline: bool,
    format: OutputFormat,
    output: Option<PathBuf>,
) -> ExitCode {
    let config = match load_config(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => return render_error(err, format, output.clone()),
    };

    let resolved = if offline {
        None
    } else {
        let Some(file_key) = file_key.filter(|k| !k.trim().is_empty()) else {
            return render_error(
                SyncError::config("no Figma file key: pass --file-key, set FIGMA_FILE_KEY or use --offline"),
                format,
                output.clone(),
            );
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
        match resolve_node(&client, &config, &file_key, &node_id).await {
            Ok(resolved) => Some(resolved),
            Err(err) => return render_error(err, format, output.clone()),
        }
    };

    let body = FigsyncOutput::Resolve(ResolveOutput {
        version: FIGSYNC_OUTPUT_VERSION.to_string(),
        format: NodeIdFormat::detect(&node_id),
        candidates: candidates(&node_id),
        node_id,
        resolved,
    });
    if let Err(err) = write_output(&body, format, output.clone()) {
        return render_error(err, format, output);
    }
    ExitCode::SUCCESS
}
