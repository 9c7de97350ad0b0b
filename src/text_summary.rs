//! Text summary builder for CLI output.

use crate::model::{format_bytes, UploadState};
use crate::orchestrator::session::Session;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary from a session snapshot. Missing results print as `-`.
pub(crate) fn build_text_summary(session: &Session) -> TextSummary {
    let mut lines = Vec::new();

    match session.selected_file.as_ref() {
        Some(file) => lines.push(format!(
            "File: {} ({})",
            file.name,
            format_bytes(file.size_bytes)
        )),
        None => lines.push("File: -".into()),
    }

    let upload = match &session.upload {
        UploadState::Idle => "not submitted".to_string(),
        UploadState::Uploading {
            bytes_sent,
            total_bytes,
        } => format!(
            "uploading {} / {}",
            format_bytes(*bytes_sent),
            format_bytes(*total_bytes)
        ),
        UploadState::Accepted { filename, .. } => format!("accepted as {filename}"),
        UploadState::Failed { error } => format!("failed: {error}"),
    };
    lines.push(format!("Upload: {upload}"));
    if let Some(id) = session.upload_id.as_deref() {
        lines.push(format!("Upload ID: {id}"));
    }

    let status = if session.status.is_empty() {
        "-"
    } else {
        session.status.as_str()
    };
    lines.push(format!("Status: {status}"));

    match session.metadata.as_ref() {
        Some(m) => {
            lines.push(format!("Resolution: {}", m.resolution));
            lines.push(format!("FPS: {}", m.fps));
            lines.push(format!("Duration: {} s", m.duration));
        }
        None => lines.push("Metadata: -".into()),
    }

    lines.push(format!(
        "Enhanced video: {}",
        session.result_locator.as_deref().unwrap_or("-")
    ));
    lines.push(format!("Channel: {}", session.channel.label()));

    TextSummary { lines }
}
