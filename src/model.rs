use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub base_url: String,
    pub upload_path: String,
    pub ws_path: String,
    pub results_path: String,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub upload_timeout: Duration,
    /// `None` disables reconnecting after the push channel drops.
    #[serde(with = "humantime_serde")]
    pub reconnect_delay: Option<Duration>,
    pub correlation: CorrelationMode,
    pub user_agent: String,
}

/// How strictly notifications must be tied to the current upload before they are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMode {
    /// Apply every notification to the current session.
    Off,
    /// Drop notifications that identify a different upload; apply uncorrelated ones.
    #[default]
    Lenient,
    /// Apply only notifications that identify the current upload.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub resolution: String,
    pub fps: f64,
    pub duration: f64,
}

/// Identifiers a push message may carry to tie it to an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correlation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl Correlation {
    pub fn is_empty(&self) -> bool {
        self.upload_id.is_none() && self.filename.is_none()
    }
}

/// A push message from the collaborator, classified by its `status` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    MetadataExtracted {
        metadata: VideoMetadata,
        correlation: Correlation,
    },
    Enhanced {
        filename: String,
        correlation: Correlation,
    },
    Other {
        status: String,
        correlation: Correlation,
    },
}

pub const STATUS_METADATA_EXTRACTED: &str = "metadata_extracted";
pub const STATUS_ENHANCED: &str = "enhanced";
pub const STATUS_PROCESSING: &str = "Processing...";

impl Notification {
    /// The status tag exactly as it appeared on the wire.
    pub fn status(&self) -> &str {
        match self {
            Notification::MetadataExtracted { .. } => STATUS_METADATA_EXTRACTED,
            Notification::Enhanced { .. } => STATUS_ENHANCED,
            Notification::Other { status, .. } => status,
        }
    }

    pub fn correlation(&self) -> &Correlation {
        match self {
            Notification::MetadataExtracted { correlation, .. }
            | Notification::Enhanced { correlation, .. }
            | Notification::Other { correlation, .. } => correlation,
        }
    }
}

/// Events produced by the notification channel adapter.
///
/// `conn_id` identifies the mount that produced the event so the controller can
/// ignore stragglers from a connection it already released.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Connected { conn_id: u64 },
    Notification { conn_id: u64, notification: Notification },
    ProtocolError { conn_id: u64, error: String },
    Disconnected { conn_id: u64, reason: String },
}

impl ChannelEvent {
    pub fn conn_id(&self) -> u64 {
        match self {
            ChannelEvent::Connected { conn_id }
            | ChannelEvent::Notification { conn_id, .. }
            | ChannelEvent::ProtocolError { conn_id, .. }
            | ChannelEvent::Disconnected { conn_id, .. } => *conn_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub bytes_sent: u64,
    pub total_bytes: u64,
}

/// What the ingestion endpoint told us about an accepted upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub upload_id: String,
    /// Name the collaborator will use in its notifications.
    pub filename: String,
    pub message: Option<String>,
}

/// A file the user picked, not yet read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedFile {
    pub path: PathBuf,
    pub name: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UploadState {
    #[default]
    Idle,
    Uploading {
        bytes_sent: u64,
        total_bytes: u64,
    },
    Accepted {
        upload_id: String,
        filename: String,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChannelStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Connected, but some frames could not be understood.
    Degraded { dropped: u64 },
}

impl ChannelStatus {
    pub fn label(&self) -> String {
        match self {
            ChannelStatus::Disconnected => "disconnected".into(),
            ChannelStatus::Connecting => "connecting".into(),
            ChannelStatus::Connected => "connected".into(),
            ChannelStatus::Degraded { dropped } => {
                format!("degraded ({dropped} malformed message(s) dropped)")
            }
        }
    }
}

/// Structured notices emitted by the controller and consumed by UI/CLI layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    NoFileSelected,
    UploadInFlight,
    FileSelected { name: String, size_bytes: u64 },
    InvalidFile { path: PathBuf, reason: String },
    UploadAccepted { filename: String },
    UploadFailed { error: String },
    ChannelConnected,
    ChannelLost { reason: String },
    MalformedNotification { error: String },
    ForeignNotification { status: String },
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::NoFileSelected => "Please select a file!".to_string(),
            InfoEvent::UploadInFlight => "An upload is already in progress".to_string(),
            InfoEvent::FileSelected { name, size_bytes } => {
                format!("Selected {} ({})", name, format_bytes(*size_bytes))
            }
            InfoEvent::InvalidFile { path, reason } => {
                format!("Cannot use {}: {}", path.display(), reason)
            }
            InfoEvent::UploadAccepted { filename } => format!("Uploaded {}", filename),
            InfoEvent::UploadFailed { error } => format!("Upload failed: {}", error),
            InfoEvent::ChannelConnected => "Notification channel connected".to_string(),
            InfoEvent::ChannelLost { reason } => {
                format!("Notification channel lost: {}", reason)
            }
            InfoEvent::MalformedNotification { error } => {
                format!("Dropped malformed notification: {}", error)
            }
            InfoEvent::ForeignNotification { status } => {
                format!("Ignored '{}' notification for another upload", status)
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            InfoEvent::NoFileSelected
                | InfoEvent::InvalidFile { .. }
                | InfoEvent::UploadFailed { .. }
                | InfoEvent::MalformedNotification { .. }
        )
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
