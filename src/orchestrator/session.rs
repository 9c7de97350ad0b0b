//! Session state and the transitions that fold producer events into it.
//!
//! Nothing here does I/O; the controller feeds events in and publishes the
//! resulting snapshots.

use crate::model::{
    ChannelStatus, CorrelationMode, InfoEvent, Notification, SelectedFile, UploadProgress,
    UploadReceipt, UploadState, VideoMetadata, STATUS_PROCESSING,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const MAX_LOG_ENTRIES: usize = 200;

/// One line in the notification log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: String,
    pub status: String,
    pub applied: bool,
}

/// Client-side record of the current upload and whatever the service has
/// reported about it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub selected_file: Option<SelectedFile>,
    pub status: String,
    pub metadata: Option<VideoMetadata>,
    pub result_locator: Option<String>,
    pub upload: UploadState,
    pub upload_id: Option<String>,
    pub channel: ChannelStatus,
    pub started_at: Option<String>,
    pub accepted_at: Option<String>,
    pub updated_at: Option<String>,
    #[serde(skip)]
    pub log: VecDeque<LogEntry>,
}

/// Result of offering a notification to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Applied,
    /// Identified a different upload, or could not be tied to this one in strict mode.
    Foreign,
}

pub(crate) fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}

impl Session {
    pub fn new() -> Self {
        Self {
            started_at: Some(now_rfc3339()),
            ..Default::default()
        }
    }

    pub fn upload_in_flight(&self) -> bool {
        matches!(self.upload, UploadState::Uploading { .. })
    }

    /// Replace the selected file. A new file starts a new session: results and
    /// correlation from the previous upload are cleared, the status line is kept.
    pub fn select_file(&mut self, file: SelectedFile) -> InfoEvent {
        let info = InfoEvent::FileSelected {
            name: file.name.clone(),
            size_bytes: file.size_bytes,
        };
        self.selected_file = Some(file);
        self.metadata = None;
        self.result_locator = None;
        self.upload_id = None;
        self.upload = UploadState::Idle;
        self.accepted_at = None;
        self.touch();
        info
    }

    pub fn upload_started(&mut self, upload_id: String, total_bytes: u64) {
        self.upload_id = Some(upload_id);
        self.upload = UploadState::Uploading {
            bytes_sent: 0,
            total_bytes,
        };
        self.touch();
    }

    /// Returns false when the progress belongs to an upload that already finished.
    pub fn upload_progress(&mut self, progress: UploadProgress) -> bool {
        match &mut self.upload {
            UploadState::Uploading {
                bytes_sent,
                total_bytes,
            } => {
                *bytes_sent = progress.bytes_sent;
                *total_bytes = progress.total_bytes;
                true
            }
            _ => false,
        }
    }

    pub fn upload_accepted(&mut self, receipt: UploadReceipt) -> InfoEvent {
        let info = InfoEvent::UploadAccepted {
            filename: receipt.filename.clone(),
        };
        self.status = STATUS_PROCESSING.to_string();
        self.upload_id = Some(receipt.upload_id.clone());
        self.upload = UploadState::Accepted {
            upload_id: receipt.upload_id,
            filename: receipt.filename,
        };
        self.accepted_at = Some(now_rfc3339());
        self.touch();
        info
    }

    /// The status line is deliberately left alone.
    pub fn upload_failed(&mut self, error: String) -> InfoEvent {
        self.upload = UploadState::Failed {
            error: error.clone(),
        };
        self.touch();
        InfoEvent::UploadFailed { error }
    }

    pub fn channel_connecting(&mut self) {
        self.channel = ChannelStatus::Connecting;
        self.touch();
    }

    pub fn channel_connected(&mut self) {
        self.channel = ChannelStatus::Connected;
        self.touch();
    }

    pub fn channel_down(&mut self) {
        self.channel = ChannelStatus::Disconnected;
        self.touch();
    }

    /// A push message was dropped. The status line is left alone.
    pub fn protocol_error(&mut self) {
        self.channel = match self.channel {
            ChannelStatus::Degraded { dropped } => ChannelStatus::Degraded {
                dropped: dropped + 1,
            },
            _ => ChannelStatus::Degraded { dropped: 1 },
        };
        self.touch();
    }

    /// Decide whether `notification` belongs to this session.
    pub fn correlate(&self, notification: &Notification, mode: CorrelationMode) -> Applied {
        if mode == CorrelationMode::Off {
            return Applied::Applied;
        }
        let theirs = notification.correlation();
        if theirs.is_empty() {
            // Untagged messages cannot be tied to anything; only strict mode drops them.
            return match mode {
                CorrelationMode::Strict => Applied::Foreign,
                _ => Applied::Applied,
            };
        }
        let (our_id, our_name) = match &self.upload {
            UploadState::Accepted {
                upload_id,
                filename,
            } => (Some(upload_id.as_str()), Some(filename.as_str())),
            UploadState::Uploading { .. } => (
                self.upload_id.as_deref(),
                self.selected_file.as_ref().map(|f| f.name.as_str()),
            ),
            UploadState::Idle | UploadState::Failed { .. } => (None, None),
        };

        let matched = match (theirs.upload_id.as_deref(), our_id) {
            (Some(a), Some(b)) => Some(a == b),
            (Some(_), None) => Some(false),
            (None, _) => match (theirs.filename.as_deref(), our_name) {
                (Some(a), Some(b)) => Some(a == b),
                (Some(_), None) => Some(false),
                (None, _) => None,
            },
        };

        match (mode, matched) {
            (_, Some(true)) => Applied::Applied,
            // Nothing in flight: in lenient mode we still show what the service reports.
            (CorrelationMode::Lenient, Some(false)) if our_id.is_none() && our_name.is_none() => {
                Applied::Applied
            }
            (CorrelationMode::Lenient, None) => Applied::Applied,
            _ => Applied::Foreign,
        }
    }

    /// Fold one notification into the session. `locate` turns the filename of
    /// an `Enhanced` notification into the result URL.
    pub fn apply_notification(
        &mut self,
        notification: Notification,
        mode: CorrelationMode,
        locate: impl FnOnce(&str) -> String,
    ) -> Applied {
        let verdict = self.correlate(&notification, mode);
        self.record(notification.status(), verdict == Applied::Applied);
        if verdict == Applied::Foreign {
            return verdict;
        }

        self.status = notification.status().to_string();
        match notification {
            Notification::MetadataExtracted { metadata, .. } => {
                if self.metadata.is_none() {
                    self.metadata = Some(metadata);
                }
            }
            Notification::Enhanced { filename, .. } => {
                if self.result_locator.is_none() {
                    self.result_locator = Some(locate(&filename));
                }
            }
            Notification::Other { .. } => {}
        }
        self.touch();
        verdict
    }

    pub fn metadata_known(&self) -> bool {
        self.metadata.is_some()
    }

    pub fn enhanced(&self) -> bool {
        self.result_locator.is_some()
    }

    fn record(&mut self, status: &str, applied: bool) {
        self.log.push_back(LogEntry {
            at: now_rfc3339(),
            status: status.to_string(),
            applied,
        });
        while self.log.len() > MAX_LOG_ENTRIES {
            self.log.pop_front();
        }
    }

    fn touch(&mut self) {
        self.updated_at = Some(now_rfc3339());
    }
}
