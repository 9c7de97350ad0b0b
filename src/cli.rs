use crate::logging::{self, LogTarget};
use crate::model::{CorrelationMode, InfoEvent, RunConfig, UploadState};
use crate::orchestrator::session::Session;
use crate::orchestrator::{process_session_completion, run_controller, UiCommand, UiUpdate};
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// A line of headless output and the stream it belongs on.
enum OutputLine {
    /// Results: the JSON snapshot or the final summary.
    Stdout(String),
    /// Progress: status changes, notices and export reports.
    Stderr(String),
}

/// Write headless output from a blocking thread so the controller never waits
/// on a slow terminal or pipe. Dropping the sender flushes and ends the writer.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let mut out = std::io::LineWriter::new(std::io::stdout().lock());
        let mut err = std::io::LineWriter::new(std::io::stderr().lock());
        while let Some(line) = rx.blocking_recv() {
            let _ = match line {
                OutputLine::Stdout(msg) => writeln!(out, "{msg}"),
                OutputLine::Stderr(msg) => writeln!(err, "{msg}"),
            };
        }
        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

/// How far a headless run follows the session before printing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WaitFor {
    /// The service accepted the upload
    Accepted,
    /// Metadata was published
    Metadata,
    /// The enhanced video was published
    Enhanced,
    /// Both metadata and the enhanced video were published
    Complete,
}

impl WaitFor {
    pub fn reached(self, session: &Session) -> bool {
        match self {
            WaitFor::Accepted => matches!(session.upload, UploadState::Accepted { .. }),
            WaitFor::Metadata => session.metadata_known(),
            WaitFor::Enhanced => session.enhanced(),
            WaitFor::Complete => session.metadata_known() && session.enhanced(),
        }
    }

    fn label(self) -> &'static str {
        match self {
            WaitFor::Accepted => "upload acceptance",
            WaitFor::Metadata => "metadata",
            WaitFor::Enhanced => "the enhanced video",
            WaitFor::Complete => "metadata and the enhanced video",
        }
    }
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "vproc",
    version,
    about = "Upload a video to a processing service and follow its progress, with optional TUI"
)]
pub struct Cli {
    /// Video file to upload
    pub file: Option<PathBuf>,

    /// Base URL of the processing service
    #[arg(long, default_value = "http://localhost:8000")]
    pub base_url: String,

    /// Path of the ingestion endpoint, relative to the base URL
    #[arg(long, default_value = "/upload/")]
    pub upload_path: String,

    /// Path of the push notification channel, relative to the base URL
    #[arg(long, default_value = "/ws")]
    pub ws_path: String,

    /// Path under which enhanced videos are published
    #[arg(long, default_value = "/processed_videos/")]
    pub results_path: String,

    /// Print the session as JSON once the wait target is reached (no TUI)
    #[arg(long, conflicts_with = "text")]
    pub json: bool,

    /// Print status changes and a text summary (no TUI)
    #[arg(long)]
    pub text: bool,

    /// What to wait for before printing in --json/--text mode
    #[arg(long, value_enum, default_value_t = WaitFor::Complete)]
    pub wait_for: WaitFor,

    /// Give up waiting after this long in --json/--text mode
    #[arg(long, default_value = "10m")]
    pub timeout: humantime::Duration,

    /// Connect timeout for the upload and the push channel
    #[arg(long, default_value = "10s")]
    pub connect_timeout: humantime::Duration,

    /// Overall timeout for one upload request
    #[arg(long, default_value = "30m")]
    pub upload_timeout: humantime::Duration,

    /// Delay before reconnecting a dropped push channel
    #[arg(long, default_value = "2s")]
    pub reconnect_delay: humantime::Duration,

    /// Do not reconnect a dropped push channel
    #[arg(long)]
    pub no_reconnect: bool,

    /// How notifications are matched to the current upload
    #[arg(long, value_enum, default_value_t = CorrelationMode::Lenient)]
    pub correlation: CorrelationMode,

    /// Export the final session snapshot as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Upload FILE as soon as the TUI starts
    #[arg(long)]
    pub upload_on_launch: bool,

    /// Log filter (e.g. warn, info, vproc=debug); RUST_LOG overrides it
    #[arg(long, default_value = "warn")]
    pub log_level: String,

    /// Log to this file instead of the default location
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

pub async fn run(args: Cli) -> Result<()> {
    #[cfg(feature = "tui")]
    {
        if !args.json && !args.text {
            // The TUI owns the terminal; logs go to a file or nowhere.
            if let Some(path) = args.log_file.clone().or_else(logging::default_log_file) {
                logging::init(&args.log_level, LogTarget::File(path))?;
            }
            return crate::tui::run(args).await;
        }
    }

    // Without TUI support every run is headless.
    let target = match args.log_file.clone() {
        Some(path) => LogTarget::File(path),
        None => LogTarget::Stderr,
    };
    logging::init(&args.log_level, target)?;
    if args.file.is_none() {
        return Err(anyhow!("a FILE is required with --json or --text"));
    }
    run_headless(args).await
}

/// Build a `RunConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> RunConfig {
    RunConfig {
        base_url: args.base_url.clone(),
        upload_path: args.upload_path.clone(),
        ws_path: args.ws_path.clone(),
        results_path: args.results_path.clone(),
        connect_timeout: Duration::from(args.connect_timeout),
        upload_timeout: Duration::from(args.upload_timeout),
        reconnect_delay: (!args.no_reconnect).then(|| Duration::from(args.reconnect_delay)),
        correlation: args.correlation,
        user_agent: format!("vproc/{}", env!("CARGO_PKG_VERSION")),
    }
}

/// Upload FILE, follow the session until the wait target, then print it.
async fn run_headless(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let file = args
        .file
        .clone()
        .context("a FILE is required with --json or --text")?;
    // Surface the real reason before any connection is made.
    crate::engine::upload::inspect_file(&file).await?;

    let (out_tx, out_handle) = spawn_output_writer();
    let (update_tx, mut update_rx) = mpsc::unbounded_channel::<UiUpdate>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let handle = tokio::spawn(run_controller(cfg, update_tx, cmd_rx));
    let _ = cmd_tx.send(UiCommand::SelectFile(file));
    let _ = cmd_tx.send(UiCommand::Submit);

    let deadline = tokio::time::sleep(Duration::from(args.timeout));
    tokio::pin!(deadline);
    let mut last_status = String::new();

    let outcome: Result<()> = loop {
        tokio::select! {
            update = update_rx.recv() => match update {
                Some(UiUpdate::Session(session)) => {
                    if session.status != last_status {
                        last_status = session.status.clone();
                        if args.text && !last_status.is_empty() {
                            let _ = out_tx.send(OutputLine::Stderr(format!("Status: {last_status}")));
                        }
                    }
                    if let UploadState::Failed { error } = &session.upload {
                        break Err(anyhow!("upload failed: {error}"));
                    }
                    if args.wait_for.reached(&session) {
                        break Ok(());
                    }
                }
                Some(UiUpdate::Info(info)) => {
                    if args.text {
                        let _ = out_tx.send(OutputLine::Stderr(info.to_message()));
                    }
                    if matches!(info, InfoEvent::NoFileSelected | InfoEvent::InvalidFile { .. }) {
                        break Err(anyhow!(info.to_message()));
                    }
                }
                None => break Err(anyhow!("controller stopped unexpectedly")),
            },
            _ = &mut deadline => {
                break Err(anyhow!(
                    "timed out after {} waiting for {}",
                    args.timeout,
                    args.wait_for.label()
                ));
            }
            _ = tokio::signal::ctrl_c() => break Err(anyhow!("interrupted")),
        }
    };

    let _ = cmd_tx.send(UiCommand::Quit);
    let session = handle.await.context("controller task failed")??;

    // Exports and output happen even when the wait failed, so partial results are not lost.
    let processed = process_session_completion(args.export_json.as_deref(), &session);
    for msg in processed.export_messages {
        let _ = out_tx.send(OutputLine::Stderr(msg));
    }
    if args.json {
        let out = serde_json::to_string_pretty(&session)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    } else {
        let summary = crate::text_summary::build_text_summary(&session);
        for line in summary.lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }

    drop(out_tx);
    let _ = out_handle.await;
    if processed.export_failed && outcome.is_ok() {
        return Err(anyhow!("session export failed"));
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{temp_video, FakeCollaborator};
    use reqwest::StatusCode;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("vproc").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_point_at_a_local_service() {
        let args = parse(&[]);
        let cfg = build_config(&args);
        assert_eq!(cfg.base_url, "http://localhost:8000");
        assert_eq!(cfg.upload_path, "/upload/");
        assert_eq!(cfg.ws_path, "/ws");
        assert_eq!(cfg.results_path, "/processed_videos/");
        assert_eq!(cfg.reconnect_delay, Some(Duration::from_secs(2)));
        assert_eq!(cfg.correlation, CorrelationMode::Lenient);
        assert_eq!(args.wait_for, WaitFor::Complete);
        assert!(args.file.is_none());
    }

    #[test]
    fn no_reconnect_disables_the_delay() {
        let cfg = build_config(&parse(&["--no-reconnect", "--correlation", "strict"]));
        assert_eq!(cfg.reconnect_delay, None);
        assert_eq!(cfg.correlation, CorrelationMode::Strict);
    }

    #[test]
    fn json_and_text_are_exclusive() {
        assert!(Cli::try_parse_from(["vproc", "--json", "--text", "clip.mp4"]).is_err());
    }

    #[test]
    fn wait_targets_follow_session_fields() {
        let mut session = Session::new();
        assert!(!WaitFor::Accepted.reached(&session));

        session.upload = UploadState::Accepted {
            upload_id: "u-1".into(),
            filename: "clip.mp4".into(),
        };
        assert!(WaitFor::Accepted.reached(&session));
        assert!(!WaitFor::Complete.reached(&session));

        session.result_locator = Some("http://x/processed_videos/enhanced_clip.mp4".into());
        assert!(WaitFor::Enhanced.reached(&session));
        assert!(!WaitFor::Metadata.reached(&session));
        assert!(!WaitFor::Complete.reached(&session));
    }

    #[tokio::test]
    async fn headless_run_exports_once_accepted() {
        let collab = FakeCollaborator::spawn().await;
        let (dir, path) = temp_video("clip.mp4", b"frames");
        let export = dir.path().join("session.json");
        let base_url = collab.base_url.clone();
        let args = parse(&[
            "--json",
            "--wait-for",
            "accepted",
            "--no-reconnect",
            "--base-url",
            &base_url,
            "--export-json",
            export.to_str().unwrap(),
            path.to_str().unwrap(),
        ]);

        run_headless(args).await.unwrap();

        let session: Session =
            serde_json::from_str(&std::fs::read_to_string(&export).unwrap()).unwrap();
        assert_eq!(session.status, "Processing...");
        assert_eq!(collab.upload_hits(), 1);
    }

    #[tokio::test]
    async fn failed_export_still_reports_the_wait_outcome() {
        let collab = FakeCollaborator::spawn().await;
        collab.reject_uploads(StatusCode::SERVICE_UNAVAILABLE);
        let (dir, path) = temp_video("clip.mp4", b"frames");
        // A directory cannot be overwritten by the export.
        let export = dir.path().join("taken");
        std::fs::create_dir(&export).unwrap();
        let base_url = collab.base_url.clone();
        let args = parse(&[
            "--json",
            "--no-reconnect",
            "--base-url",
            &base_url,
            "--export-json",
            export.to_str().unwrap(),
            path.to_str().unwrap(),
        ]);

        let err = run_headless(args).await.unwrap_err();
        assert!(err.to_string().starts_with("upload failed"));
        assert!(export.is_dir());
    }

    #[tokio::test]
    async fn export_failure_fails_an_otherwise_good_run() {
        let collab = FakeCollaborator::spawn().await;
        let (dir, path) = temp_video("clip.mp4", b"frames");
        let export = dir.path().join("taken");
        std::fs::create_dir(&export).unwrap();
        let base_url = collab.base_url.clone();
        let args = parse(&[
            "--json",
            "--wait-for",
            "accepted",
            "--no-reconnect",
            "--base-url",
            &base_url,
            "--export-json",
            export.to_str().unwrap(),
            path.to_str().unwrap(),
        ]);

        let err = run_headless(args).await.unwrap_err();
        assert_eq!(err.to_string(), "session export failed");
        assert_eq!(collab.upload_hits(), 1);
    }

    #[tokio::test]
    async fn headless_run_fails_when_the_upload_is_rejected() {
        let collab = FakeCollaborator::spawn().await;
        collab.reject_uploads(StatusCode::SERVICE_UNAVAILABLE);
        let (_dir, path) = temp_video("clip.mp4", b"frames");
        let base_url = collab.base_url.clone();
        let args = parse(&[
            "--text",
            "--no-reconnect",
            "--base-url",
            &base_url,
            path.to_str().unwrap(),
        ]);

        let err = run_headless(args).await.unwrap_err();
        assert!(err.to_string().starts_with("upload failed"));
    }

    #[tokio::test]
    async fn headless_run_rejects_a_missing_file_without_uploading() {
        let collab = FakeCollaborator::spawn().await;
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.mp4");
        let base_url = collab.base_url.clone();
        let args = parse(&["--json", "--base-url", &base_url, missing.to_str().unwrap()]);

        assert!(run_headless(args).await.is_err());
        assert_eq!(collab.upload_hits(), 0);
    }
}
