//! Session lifecycle controller.
//!
//! Owns the [`Session`] and is the only code that changes it. UI commands, push
//! channel events and upload results are handled one at a time from a single
//! task, and a snapshot is published to presentation layers after each change.

use super::session::{Applied, Session};
use crate::engine::channel::{self, ChannelHandle};
use crate::engine::{upload, ServiceClient};
use crate::error::{SubmitError, UploadError};
use crate::model::{ChannelEvent, InfoEvent, RunConfig, UploadProgress, UploadReceipt};
use anyhow::Result;
use rand::RngCore;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

/// Commands emitted by UI layers.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    SelectFile(PathBuf),
    Submit,
    /// Release the push channel and mount a fresh one.
    Reconnect,
    Disconnect,
    Quit,
}

/// What the controller tells presentation layers.
#[derive(Debug, Clone)]
pub(crate) enum UiUpdate {
    // Boxed to keep the enum small; Session carries the notification log.
    Session(Box<Session>),
    Info(InfoEvent),
}

type UploadResult = Result<Result<UploadReceipt, UploadError>, JoinError>;

/// A spawned upload, tagged with the id it was submitted under.
struct UploadTask {
    upload_id: String,
    handle: JoinHandle<Result<UploadReceipt, UploadError>>,
}

/// Generate a random identifier for one submission.
fn gen_upload_id() -> String {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    format!("{:016x}", u64::from_le_bytes(b))
}

pub(crate) struct Controller {
    cfg: RunConfig,
    client: ServiceClient,
    session: Session,
    update_tx: UnboundedSender<UiUpdate>,
    channel: Option<ChannelHandle>,
    next_conn_id: u64,
    channel_tx: UnboundedSender<ChannelEvent>,
    channel_rx: UnboundedReceiver<ChannelEvent>,
    progress_tx: UnboundedSender<UploadProgress>,
    progress_rx: UnboundedReceiver<UploadProgress>,
    upload: Option<UploadTask>,
}

impl Controller {
    pub fn new(cfg: RunConfig, update_tx: UnboundedSender<UiUpdate>) -> Result<Self> {
        let client = ServiceClient::new(&cfg)?;
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        Ok(Self {
            cfg,
            client,
            session: Session::new(),
            update_tx,
            channel: None,
            next_conn_id: 0,
            channel_tx,
            channel_rx,
            progress_tx,
            progress_rx,
            upload: None,
        })
    }

    /// Open the push channel unless one is already live.
    pub fn mount(&mut self) {
        if self.channel.as_ref().is_some_and(|c| !c.is_finished()) {
            debug!("push channel already mounted");
            return;
        }
        self.next_conn_id += 1;
        let handle = channel::connect(
            &self.client,
            self.next_conn_id,
            self.cfg.reconnect_delay,
            self.channel_tx.clone(),
        );
        // Replacing a finished handle drops it.
        self.channel = Some(handle);
        self.session.channel_connecting();
        self.publish();
    }

    /// Close the push channel and wait for the connection to be released.
    pub async fn unmount(&mut self) {
        if let Some(handle) = self.channel.take() {
            handle.close().await;
            self.session.channel_down();
            self.publish();
        }
    }

    /// Replace the selected file. An upload already in flight keeps running but
    /// its outcome no longer belongs to the session.
    pub async fn select_file(&mut self, path: &Path) {
        match upload::inspect_file(path).await {
            Ok(file) => {
                info!(file = %file.name, size_bytes = file.size_bytes, "file selected");
                let info = self.session.select_file(file);
                self.publish();
                self.notify(info);
            }
            Err(e) => {
                self.notify(InfoEvent::InvalidFile {
                    path: e.path,
                    reason: e.reason,
                });
            }
        }
    }

    /// Start uploading the selected file. Refusals are reported to the UI and
    /// returned; they never touch the network.
    pub fn submit(&mut self) -> Result<(), SubmitError> {
        let Some(file) = self.session.selected_file.clone() else {
            self.notify(InfoEvent::NoFileSelected);
            return Err(SubmitError::NoFileSelected);
        };
        if self.upload.is_some() {
            self.notify(InfoEvent::UploadInFlight);
            return Err(SubmitError::UploadInFlight);
        }

        // Leftover progress from a previous upload must not leak into this one.
        while self.progress_rx.try_recv().is_ok() {}

        let upload_id = gen_upload_id();
        self.session.upload_started(upload_id.clone(), file.size_bytes);
        self.publish();

        let client = self.client.clone();
        let progress_tx = self.progress_tx.clone();
        let id = upload_id.clone();
        let handle = tokio::spawn(async move {
            upload::submit(&client, &file, &id, Some(progress_tx)).await
        });
        self.upload = Some(UploadTask { upload_id, handle });
        Ok(())
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        let current = self.channel.as_ref().map(|c| c.conn_id());
        if current != Some(event.conn_id()) {
            debug!(conn_id = event.conn_id(), ?current, "ignoring event from released channel");
            return;
        }

        match event {
            ChannelEvent::Connected { .. } => {
                self.session.channel_connected();
                self.publish();
                self.notify(InfoEvent::ChannelConnected);
            }
            ChannelEvent::Notification { notification, .. } => {
                let status = notification.status().to_string();
                let client = &self.client;
                let verdict = self.session.apply_notification(
                    notification,
                    self.cfg.correlation,
                    |filename| client.result_url(filename).to_string(),
                );
                self.publish();
                if verdict == Applied::Foreign {
                    debug!(%status, "notification for another upload");
                    self.notify(InfoEvent::ForeignNotification { status });
                }
            }
            ChannelEvent::ProtocolError { error, .. } => {
                self.session.protocol_error();
                self.publish();
                self.notify(InfoEvent::MalformedNotification { error });
            }
            ChannelEvent::Disconnected { reason, .. } => {
                if self.cfg.reconnect_delay.is_some() {
                    self.session.channel_connecting();
                } else {
                    self.session.channel_down();
                }
                self.publish();
                self.notify(InfoEvent::ChannelLost { reason });
            }
        }
    }

    fn on_progress(&mut self, progress: UploadProgress) {
        if self.session.upload_progress(progress) {
            self.publish();
        }
    }

    fn on_upload_done(&mut self, upload_id: &str, res: UploadResult) {
        if self.session.upload_id.as_deref() != Some(upload_id) {
            debug!(upload_id, "dropping outcome of an upload for a replaced file");
            return;
        }
        let info = match res {
            Ok(Ok(receipt)) => {
                if let Some(message) = receipt.message.as_deref() {
                    debug!(message, "service acknowledged upload");
                }
                self.session.upload_accepted(receipt)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "upload failed");
                self.session.upload_failed(e.to_string())
            }
            Err(e) => {
                warn!(error = %e, "upload task failed");
                self.session.upload_failed(format!("upload task failed: {e}"))
            }
        };
        self.publish();
        self.notify(info);
    }

    fn publish(&self) {
        let _ = self
            .update_tx
            .send(UiUpdate::Session(Box::new(self.session.clone())));
    }

    fn notify(&self, info: InfoEvent) {
        if info.is_error() {
            warn!(message = %info.to_message(), "session notice");
        } else {
            debug!(message = %info.to_message(), "session notice");
        }
        let _ = self.update_tx.send(UiUpdate::Info(info));
    }

    /// Mount the push channel and process commands and events until `Quit`
    /// (or until every command sender is gone). Returns the final session.
    pub async fn run(mut self, mut cmd_rx: UnboundedReceiver<UiCommand>) -> Result<Session> {
        self.mount();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(UiCommand::SelectFile(path)) => self.select_file(&path).await,
                        Some(UiCommand::Submit) => {
                            let _ = self.submit();
                        }
                        Some(UiCommand::Reconnect) => {
                            self.unmount().await;
                            self.mount();
                        }
                        Some(UiCommand::Disconnect) => self.unmount().await,
                        Some(UiCommand::Quit) | None => break,
                    }
                }
                Some(event) = self.channel_rx.recv() => self.on_channel_event(event),
                Some(progress) = self.progress_rx.recv() => self.on_progress(progress),
                // Only borrow the JoinHandle here; it is cleared once this branch wins.
                done = wait_upload(&mut self.upload) => {
                    if let Some(task) = self.upload.take() {
                        self.on_upload_done(&task.upload_id, done);
                    }
                }
            }
        }

        // Outstanding uploads are not cancelled; only the channel is released.
        if self.upload.take().is_some() {
            info!("leaving in-flight upload detached");
        }
        self.unmount().await;
        Ok(self.session)
    }
}

async fn wait_upload(upload: &mut Option<UploadTask>) -> UploadResult {
    match upload.as_mut() {
        Some(task) => (&mut task.handle).await,
        None => futures::future::pending().await,
    }
}

/// Run a controller for `cfg` until it is told to quit.
pub(crate) async fn run_controller(
    cfg: RunConfig,
    update_tx: UnboundedSender<UiUpdate>,
    cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<Session> {
    Controller::new(cfg, update_tx)?.run(cmd_rx).await
}
