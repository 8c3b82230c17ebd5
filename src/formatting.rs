//! Command output: JSON for machines, a short summary for terminals.
//!
//! `--format pretty` only renders the human summary when stdout is a
//! terminal and no `--out` file was given; otherwise it falls back to
//! indented JSON so pipes and files always carry the full payload.

use std::fmt::Write as _;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use figsync_lib::{
    AssessOutput, DevReadyStatus, ErrorOutput, ExportStatus, FigsyncOutput, ResolveOutput,
    SyncError, SyncJobStatus, SyncOutput, FIGSYNC_OUTPUT_VERSION,
};

use crate::cli::OutputFormat;

/// Failed jobs listed in the sync summary before truncating.
const MAX_FAILURES_SHOWN: usize = 10;

pub fn write_output(
    body: &FigsyncOutput,
    format: OutputFormat,
    output: Option<PathBuf>,
) -> figsync_lib::Result<()> {
    let human = format == OutputFormat::Pretty
        && output.is_none()
        && std::io::stdout().is_terminal();
    let palette = if std::env::var_os("NO_COLOR").is_some() {
        Palette::Plain
    } else {
        Palette::Ansi
    };
    let content = render(body, format, human.then_some(palette))?;
    emit(&content, output.as_deref())
}

/// Print `err` as an `error` payload and return the fatal exit code.
///
/// When the payload cannot be written to `output` it goes to stdout instead.
pub fn render_error(err: SyncError, format: OutputFormat, output: Option<PathBuf>) -> ExitCode {
    tracing::error!(error = %err, "command failed");
    let payload = err.to_payload();
    let body = FigsyncOutput::Error(ErrorOutput {
        version: FIGSYNC_OUTPUT_VERSION.to_string(),
        message: Some(payload.message.clone()),
        error: payload,
    });

    if let Err(write_err) = write_output(&body, format, output.clone()) {
        eprintln!("Failed to write error output: {write_err}");
        if output.is_some() {
            if let Ok(content) = render(&body, format, None) {
                println!("{content}");
            }
        }
    }
    // 1 belongs to syncs that finished with failed nodes.
    ExitCode::from(2)
}

fn render(
    body: &FigsyncOutput,
    format: OutputFormat,
    human: Option<Palette>,
) -> figsync_lib::Result<String> {
    Ok(match (format, human) {
        (OutputFormat::Pretty, Some(palette)) => summarize(body, palette),
        (OutputFormat::Pretty, None) => serde_json::to_string_pretty(body)?,
        (OutputFormat::Json, _) => serde_json::to_string(body)?,
    })
}

fn emit(content: &str, output: Option<&Path>) -> figsync_lib::Result<()> {
    match output {
        Some(path) => std::fs::write(path, content)?,
        None => println!("{content}"),
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Palette {
    Plain,
    Ansi,
}

#[derive(Debug, Clone, Copy)]
enum Tone {
    Good,
    Warn,
    Bad,
    Info,
}

impl Palette {
    fn paint(self, text: impl std::fmt::Display, tone: Tone) -> String {
        let code = match tone {
            Tone::Good => 32,
            Tone::Warn => 33,
            Tone::Bad => 31,
            Tone::Info => 36,
        };
        match self {
            Palette::Plain => text.to_string(),
            Palette::Ansi => format!("\x1b[{code}m{text}\x1b[0m"),
        }
    }
}

fn status_tone(status: DevReadyStatus) -> Tone {
    match status {
        DevReadyStatus::Ready | DevReadyStatus::Approved => Tone::Good,
        DevReadyStatus::Review => Tone::Warn,
        DevReadyStatus::Draft => Tone::Bad,
        DevReadyStatus::Unknown => Tone::Info,
    }
}

/// Human summary of any output mode.
pub fn summarize(body: &FigsyncOutput, palette: Palette) -> String {
    match body {
        FigsyncOutput::Sync(out) => sync_summary(out, palette),
        FigsyncOutput::Resolve(out) => resolve_summary(out, palette),
        FigsyncOutput::Assess(out) => assess_summary(out, palette),
        FigsyncOutput::Error(out) => {
            let mut text = format!("{} {}", palette.paint("ERROR", Tone::Bad), out.error.message);
            if let Some(hint) = &out.error.remediation {
                text.push_str(&format!("\nHint: {hint}"));
            }
            text
        }
    }
}

fn sync_summary(out: &SyncOutput, palette: Palette) -> String {
    let outcome = &out.outcome;
    let report = &outcome.report;
    let export = &report.export;
    let cancelled = outcome
        .job
        .as_ref()
        .is_some_and(|job| job.status == SyncJobStatus::Cancelled);

    let (label, tone) = if report.dry_run {
        ("DRY RUN", Tone::Info)
    } else if cancelled {
        ("CANCELLED", Tone::Warn)
    } else if export.failed > 0 {
        ("PARTIAL", Tone::Warn)
    } else {
        ("OK", Tone::Good)
    };
    let mut buf = String::new();
    let _ = writeln!(
        buf,
        "{} {} ({}) at version {}",
        palette.paint(label, tone),
        report.file_name,
        report.file_key,
        report.file_version
    );

    if let Some(resolved) = &report.resolved_node {
        let how = match (&resolved.matched_name, resolved.is_fallback()) {
            (Some(name), _) => format!(" by name \"{name}\""),
            (None, true) => " via fallback id".to_string(),
            (None, false) => String::new(),
        };
        let _ = writeln!(
            buf,
            "  node      {} -> {}{}",
            resolved.original_id,
            resolved.resolved_id,
            palette.paint(how, Tone::Warn)
        );
    }

    let changes = &report.change_stats;
    let _ = writeln!(
        buf,
        "  changes   +{} ~{} ={} -{}",
        changes.new, changes.modified, changes.unchanged, changes.deleted
    );
    let _ = writeln!(
        buf,
        "  selected  {}/{} nodes",
        report.filter.kept, report.filter.total
    );

    let readiness: Vec<String> = report
        .dev_ready
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(status, count)| palette.paint(format!("{count} {}", status.as_str()), status_tone(*status)))
        .collect();
    if !readiness.is_empty() {
        let _ = writeln!(buf, "  readiness {}", readiness.join(" / "));
    }

    let failed_tone = if export.failed > 0 { Tone::Bad } else { Tone::Good };
    let _ = writeln!(
        buf,
        "  export    {} written, {} failed, {} skipped, {} bytes in {} batch(es)",
        palette.paint(export.completed, Tone::Good),
        palette.paint(export.failed, failed_tone),
        export.skipped,
        export.bytes_written,
        export.batches
    );

    let failures: Vec<_> = report
        .jobs
        .iter()
        .filter(|job| job.status == ExportStatus::Failed)
        .collect();
    for job in failures.iter().take(MAX_FAILURES_SHOWN) {
        let _ = writeln!(
            buf,
            "    {} {} ({}): {}",
            palette.paint("x", Tone::Bad),
            job.node_name,
            job.node_id,
            job.error.as_deref().unwrap_or("no reason recorded")
        );
    }
    if failures.len() > MAX_FAILURES_SHOWN {
        let _ = writeln!(buf, "    ... {} more in the report", failures.len() - MAX_FAILURES_SHOWN);
    }
    if !report.deleted.is_empty() {
        let _ = writeln!(buf, "  removed   {} node(s) since the last run", report.deleted.len());
    }

    let _ = writeln!(buf, "  output    {}", outcome.output_dir.display());
    for file in &outcome.report_files {
        let _ = writeln!(buf, "  report    {}", file.display());
    }
    if let Some(publish) = &outcome.publish {
        let _ = writeln!(
            buf,
            "  github    {} uploaded to {}",
            publish.uploaded.len(),
            publish.repository
        );
        for failure in &publish.failed {
            let _ = writeln!(
                buf,
                "    {} {}: {}",
                palette.paint("x", Tone::Bad),
                failure.path,
                failure.error
            );
        }
    }
    buf.trim_end().to_string()
}

fn resolve_summary(out: &ResolveOutput, palette: Palette) -> String {
    let format = out
        .format
        .map(|f| format!("{f:?}").to_lowercase())
        .unwrap_or_else(|| "not an id".to_string());
    let mut buf = format!(
        "{} [{format}]\n  candidates {}",
        out.node_id,
        out.candidates.join(" -> ")
    );
    match &out.resolved {
        Some(resolved) => {
            let tone = if resolved.is_fallback() { Tone::Warn } else { Tone::Good };
            let _ = write!(
                buf,
                "\n  resolved   {}",
                palette.paint(&resolved.resolved_id, tone)
            );
            if !resolved.document.name.is_empty() {
                let _ = write!(buf, " \"{}\"", resolved.document.name);
            }
            let _ = write!(buf, "\n  attempts   {}", resolved.attempts.join(", "));
        }
        None => buf.push_str("\n  (offline: nothing fetched)"),
    }
    buf
}

fn assess_summary(out: &AssessOutput, palette: Palette) -> String {
    let mut buf = format!(
        "{} ({} {}x{}): {} {:.0}/100",
        out.name,
        out.node_type,
        out.width,
        out.height,
        palette.paint(out.status.as_str(), status_tone(out.status)),
        out.score * 100.0
    );
    for issue in &out.issues {
        let _ = write!(buf, "\n  - {issue}");
    }
    buf
}
