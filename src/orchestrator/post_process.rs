//! Post-session processing: snapshot exports for headless runs and the TUI.

use super::session::Session;
use anyhow::{Context, Result};
use std::path::Path;
#[cfg(feature = "tui")]
use std::path::PathBuf;

/// Result of post-session processing, ready for presentation layers.
pub(crate) struct ProcessedSession {
    pub export_messages: Vec<String>,
    pub export_failed: bool,
}

/// Write the session snapshot as pretty JSON, creating parent dirs as needed.
pub(crate) fn export_json(path: &Path, session: &Session) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let out = serde_json::to_string_pretty(session)?;
    std::fs::write(path, out).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Snapshot file name for the TUI save key, in the working directory.
#[cfg(feature = "tui")]
pub(crate) fn snapshot_path() -> PathBuf {
    let ts = time::OffsetDateTime::now_utc()
        .format(time::macros::format_description!(
            "[year][month][day]-[hour][minute][second]"
        ))
        .unwrap_or_else(|_| "latest".into());
    PathBuf::from(format!("vproc-session-{ts}.json"))
}

/// Run exports requested on the command line for a finished session.
pub(crate) fn process_session_completion(
    export_path: Option<&Path>,
    session: &Session,
) -> ProcessedSession {
    let mut processed = ProcessedSession {
        export_messages: Vec::new(),
        export_failed: false,
    };
    if let Some(path) = export_path {
        match export_json(path, session) {
            Ok(()) => processed
                .export_messages
                .push(format!("Exported JSON: {}", path.display())),
            Err(e) => {
                processed.export_failed = true;
                processed
                    .export_messages
                    .push(format!("Export JSON failed: {e:#}"));
            }
        }
    }
    processed
}
