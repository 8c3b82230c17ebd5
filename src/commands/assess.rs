use std::path::PathBuf;
use std::process::ExitCode;

use figsync_lib::{AssessOutput, DevReadyScorer, FigsyncOutput, FIGSYNC_OUTPUT_VERSION};

use crate::cli::OutputFormat;
use crate::formatting::{render_error, write_output};
use crate::settings::load_config;

/// Run the assess command. Works offline; the config is only validated.
pub fn run_assess(
    config_path: Option<PathBuf>,
    name: String,
    width: f64,
    height: f64,
    node_type: String,
    format: OutputFormat,
    output: Option<PathBuf>,
) -> ExitCode {
    if let Err(err) = load_config(config_path.as_deref()) {
        return render_error(err, format, output.clone());
    }
    let node_type = node_type.to_uppercase();
    let assessment = DevReadyScorer::default().assess(&name, width, height, &node_type);

    let body = FigsyncOutput::Assess(AssessOutput {
        version: FIGSYNC_OUTPUT_VERSION.to_string(),
        name,
        width,
        height,
        node_type,
        score: assessment.score,
        status: assessment.status,
        issues: assessment.issues,
    });
    if let Err(err) = write_output(&body, format, output.clone()) {
        return render_error(err, format, output);
    }
    ExitCode::SUCCESS
}
