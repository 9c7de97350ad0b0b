//! Push channel adapter.
//!
//! Holds one WebSocket connection to the service, turns each text frame into a
//! [`Notification`] and forwards it, in arrival order, as a [`ChannelEvent`].
//! Frames that cannot be understood are reported and skipped; they never close
//! the connection.

use crate::engine::ServiceClient;
use crate::error::ProtocolError;
use crate::model::{
    ChannelEvent, Correlation, Notification, VideoMetadata, STATUS_ENHANCED,
    STATUS_METADATA_EXTRACTED,
};
use futures::StreamExt;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Raw push record. Only `status` is required; everything else depends on the tag.
#[derive(Debug, Deserialize)]
struct WireNotification {
    status: String,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    upload_id: Option<String>,
}

/// Parse one push message.
pub fn parse_notification(text: &str) -> Result<Notification, ProtocolError> {
    let wire: WireNotification = serde_json::from_str(text)?;
    if wire.status.is_empty() {
        return Err(ProtocolError::MissingField {
            status: wire.status,
            field: "status",
        });
    }

    let correlation = Correlation {
        upload_id: wire.upload_id.filter(|s| !s.is_empty()),
        filename: wire.filename.clone().filter(|s| !s.is_empty()),
    };

    match wire.status.as_str() {
        STATUS_METADATA_EXTRACTED => {
            let metadata = wire
                .metadata
                .filter(|v| !v.is_null())
                .and_then(|v| serde_json::from_value::<VideoMetadata>(v).ok())
                .ok_or_else(|| ProtocolError::MissingField {
                    status: wire.status.clone(),
                    field: "metadata",
                })?;
            Ok(Notification::MetadataExtracted {
                metadata,
                correlation,
            })
        }
        STATUS_ENHANCED => {
            let filename = correlation
                .filename
                .clone()
                .ok_or_else(|| ProtocolError::MissingField {
                    status: wire.status.clone(),
                    field: "filename",
                })?;
            Ok(Notification::Enhanced {
                filename,
                correlation,
            })
        }
        _ => Ok(Notification::Other {
            status: wire.status,
            correlation,
        }),
    }
}

/// Owns the task behind one mounted push channel.
///
/// Dropping the handle aborts the task, which closes the socket.
pub struct ChannelHandle {
    conn_id: u64,
    task: Option<JoinHandle<()>>,
}

impl ChannelHandle {
    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map(|t| t.is_finished()).unwrap_or(true)
    }

    /// Abort the connection task and wait until it is gone.
    pub async fn close(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        debug!(conn_id = self.conn_id, "push channel released");
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Mount a push channel. Events are tagged with `conn_id`.
pub fn connect(
    client: &ServiceClient,
    conn_id: u64,
    reconnect_delay: Option<Duration>,
    event_tx: UnboundedSender<ChannelEvent>,
) -> ChannelHandle {
    let url = client.ws_url().clone();
    let connect_timeout = client.connect_timeout;
    let task = tokio::spawn(async move {
        run_channel(url, connect_timeout, conn_id, reconnect_delay, event_tx).await
    });
    ChannelHandle {
        conn_id,
        task: Some(task),
    }
}

async fn run_channel(
    url: Url,
    connect_timeout: Duration,
    conn_id: u64,
    reconnect_delay: Option<Duration>,
    event_tx: UnboundedSender<ChannelEvent>,
) {
    loop {
        let reason = match tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await
        {
            Err(_) => format!(
                "connect timed out after {}",
                humantime::format_duration(connect_timeout)
            ),
            Ok(Err(e)) => format!("connect failed: {e}"),
            Ok(Ok((mut ws, _))) => {
                info!(conn_id, url = %url, "push channel connected");
                if event_tx.send(ChannelEvent::Connected { conn_id }).is_err() {
                    return;
                }

                let reason = loop {
                    let forwarded = match ws.next().await {
                        Some(Ok(Message::Text(text))) => {
                            forward(conn_id, parse_notification(&text), &event_tx)
                        }
                        Some(Ok(Message::Binary(data))) => {
                            forward(conn_id, Err(ProtocolError::NonText(data.len())), &event_tx)
                        }
                        Some(Ok(Message::Close(frame))) => {
                            break match frame {
                                Some(f) if !f.reason.is_empty() => {
                                    format!("closed by server: {}", f.reason)
                                }
                                _ => "closed by server".to_string(),
                            };
                        }
                        // Ping/pong are answered by tungstenite.
                        Some(Ok(_)) => true,
                        Some(Err(e)) => break format!("receive failed: {e}"),
                        None => break "connection closed".to_string(),
                    };
                    if !forwarded {
                        return;
                    }
                };
                reason
            }
        };

        warn!(conn_id, %reason, "push channel down");
        if event_tx
            .send(ChannelEvent::Disconnected {
                conn_id,
                reason: reason.clone(),
            })
            .is_err()
        {
            return;
        }

        let Some(delay) = reconnect_delay else {
            return;
        };
        debug!(conn_id, delay = %humantime::format_duration(delay), "reconnecting push channel");
        tokio::time::sleep(delay).await;
    }
}

/// Returns false once nobody is listening.
fn forward(
    conn_id: u64,
    parsed: Result<Notification, ProtocolError>,
    event_tx: &UnboundedSender<ChannelEvent>,
) -> bool {
    let event = match parsed {
        Ok(notification) => {
            debug!(conn_id, status = notification.status(), "notification received");
            ChannelEvent::Notification {
                conn_id,
                notification,
            }
        }
        Err(error) => {
            warn!(conn_id, %error, "dropping malformed push message");
            ChannelEvent::ProtocolError {
                conn_id,
                error: error.to_string(),
            }
        }
    };
    event_tx.send(event).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{config_for, next_event, wait_until, FakeCollaborator};
    use serde_json::json;
    use tokio::sync::mpsc;

    #[test]
    fn parses_metadata_notification() {
        let n = parse_notification(
            r#"{"status":"metadata_extracted","metadata":{"resolution":"1920x1080","fps":30,"duration":12.5}}"#,
        )
        .unwrap();
        assert_eq!(
            n,
            Notification::MetadataExtracted {
                metadata: VideoMetadata {
                    resolution: "1920x1080".into(),
                    fps: 30.0,
                    duration: 12.5,
                },
                correlation: Correlation::default(),
            }
        );
    }

    #[test]
    fn parses_enhanced_notification_with_null_metadata() {
        // The service sends every field on every message.
        let n = parse_notification(r#"{"filename":"clip.mp4","status":"enhanced","metadata":null}"#)
            .unwrap();
        assert_eq!(
            n,
            Notification::Enhanced {
                filename: "clip.mp4".into(),
                correlation: Correlation {
                    upload_id: None,
                    filename: Some("clip.mp4".into()),
                },
            }
        );
    }

    #[test]
    fn unknown_status_is_kept_verbatim() {
        let n = parse_notification(r#"{"status":"queued","upload_id":"u-1"}"#).unwrap();
        assert_eq!(n.status(), "queued");
        assert_eq!(n.correlation().upload_id.as_deref(), Some("u-1"));
    }

    #[test]
    fn rejects_malformed_messages() {
        assert!(matches!(
            parse_notification("not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            parse_notification(r#"{"filename":"clip.mp4"}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            parse_notification(r#"{"status":""}"#),
            Err(ProtocolError::MissingField { field: "status", .. })
        ));
        assert!(matches!(
            parse_notification(r#"{"status":"metadata_extracted","metadata":null}"#),
            Err(ProtocolError::MissingField { field: "metadata", .. })
        ));
        assert!(matches!(
            parse_notification(r#"{"status":"metadata_extracted","metadata":{"fps":"fast"}}"#),
            Err(ProtocolError::MissingField { field: "metadata", .. })
        ));
        assert!(matches!(
            parse_notification(r#"{"status":"enhanced"}"#),
            Err(ProtocolError::MissingField { field: "filename", .. })
        ));
    }

    #[tokio::test]
    async fn forwards_notifications_in_arrival_order() {
        let collab = FakeCollaborator::spawn().await;
        let client = ServiceClient::new(&config_for(&collab.base_url)).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = connect(&client, 7, None, tx);

        assert!(matches!(
            next_event(&mut rx).await,
            ChannelEvent::Connected { conn_id: 7 }
        ));
        wait_until("server sees the connection", || collab.live_connections() == 1).await;

        let statuses: Vec<String> = (0..20).map(|i| format!("step_{i}")).collect();
        for status in &statuses {
            collab.push_json(json!({ "status": status }));
        }

        for expected in &statuses {
            match next_event(&mut rx).await {
                ChannelEvent::Notification {
                    conn_id,
                    notification,
                } => {
                    assert_eq!(conn_id, 7);
                    assert_eq!(notification.status(), expected);
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn malformed_frames_do_not_close_the_channel() {
        let collab = FakeCollaborator::spawn().await;
        let client = ServiceClient::new(&config_for(&collab.base_url)).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = connect(&client, 1, None, tx);
        next_event(&mut rx).await;
        wait_until("server sees the connection", || collab.live_connections() == 1).await;

        collab.push("{ not json");
        collab.push_binary(vec![1, 2, 3]);
        collab.push_json(json!({ "status": "enhanced", "filename": "clip.mp4" }));

        assert!(matches!(
            next_event(&mut rx).await,
            ChannelEvent::ProtocolError { .. }
        ));
        assert!(matches!(
            next_event(&mut rx).await,
            ChannelEvent::ProtocolError { .. }
        ));
        match next_event(&mut rx).await {
            ChannelEvent::Notification { notification, .. } => {
                assert_eq!(notification.status(), STATUS_ENHANCED)
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(collab.live_connections(), 1);
    }

    #[tokio::test]
    async fn dropping_the_handle_releases_the_connection() {
        let collab = FakeCollaborator::spawn().await;
        let client = ServiceClient::new(&config_for(&collab.base_url)).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = connect(&client, 1, None, tx);
        next_event(&mut rx).await;
        wait_until("server sees the connection", || collab.live_connections() == 1).await;

        drop(handle);
        wait_until("server sees the disconnect", || collab.live_connections() == 0).await;
    }

    #[tokio::test]
    async fn reconnects_after_the_server_drops_the_connection() {
        let collab = FakeCollaborator::spawn().await;
        let client = ServiceClient::new(&config_for(&collab.base_url)).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = connect(&client, 3, Some(Duration::from_millis(20)), tx);
        next_event(&mut rx).await;
        wait_until("server sees the connection", || collab.live_connections() == 1).await;

        collab.close_connections();
        assert!(matches!(
            next_event(&mut rx).await,
            ChannelEvent::Disconnected { conn_id: 3, .. }
        ));
        assert!(matches!(
            next_event(&mut rx).await,
            ChannelEvent::Connected { conn_id: 3 }
        ));
        wait_until("second connection", || collab.total_connections() == 2).await;
    }

    #[tokio::test]
    async fn without_reconnect_a_dropped_channel_stays_down() {
        let collab = FakeCollaborator::spawn().await;
        let client = ServiceClient::new(&config_for(&collab.base_url)).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = connect(&client, 1, None, tx);
        next_event(&mut rx).await;
        wait_until("server sees the connection", || collab.live_connections() == 1).await;

        collab.close_connections();
        assert!(matches!(
            next_event(&mut rx).await,
            ChannelEvent::Disconnected { .. }
        ));
        wait_until("adapter task ends", || handle.is_finished()).await;
        assert_eq!(collab.total_connections(), 1);
    }
}
