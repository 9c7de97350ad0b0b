use anyhow::{anyhow, Context, Result};
use std::sync::mpsc as std_mpsc;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

use super::state::UiState;

static CLIPBOARD: OnceLock<std_mpsc::Sender<String>> = OnceLock::new();
const CLIPBOARD_HOLD: Duration = Duration::from_secs(2);

/// Save the current session snapshot as JSON in the working directory.
/// Returns the absolute path of the written file.
pub fn save_snapshot(state: &UiState) -> Result<std::path::PathBuf> {
    let current_dir = std::env::current_dir().context("get current directory")?;
    let path = current_dir.join(crate::orchestrator::snapshot_path());
    crate::orchestrator::export_json(&path, &state.session)?;
    Ok(path)
}

/// Save the snapshot and report the outcome on the info line.
pub fn save_and_show_path(state: &mut UiState) {
    match save_snapshot(state) {
        Ok(path) => {
            state.set_info(format!("Saved: {}", path.display()), false);
            state.last_saved_path = Some(path);
        }
        Err(e) => state.set_info(format!("Save failed: {e:#}"), true),
    }
}

/// Sender for the clipboard thread. Arboard ties the clipboard contents to the
/// owning `Clipboard` on Linux, so each copy is held for a while before the
/// next one is taken.
fn clipboard_sender() -> &'static std_mpsc::Sender<String> {
    CLIPBOARD.get_or_init(|| {
        let (tx, rx) = std_mpsc::channel::<String>();
        std::thread::spawn(move || {
            for text in rx {
                let copied = arboard::Clipboard::new().and_then(|mut c| c.set_text(text));
                match copied {
                    Ok(()) => std::thread::sleep(CLIPBOARD_HOLD),
                    Err(e) => warn!(error = %e, "clipboard copy failed"),
                }
            }
        });
        tx
    })
}

/// Hand a result URL to the clipboard thread; never blocks the UI.
pub fn copy_to_clipboard(text: &str) -> Result<()> {
    clipboard_sender()
        .send(text.to_owned())
        .map_err(|_| anyhow!("clipboard thread is gone"))
}
