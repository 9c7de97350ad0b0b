//! One-shot submission of a video to the ingestion endpoint.
//!
//! Success only means the service accepted the file. Processing results arrive
//! later on the push channel.

use crate::engine::ServiceClient;
use crate::error::{InvalidFile, UploadError};
use crate::model::{SelectedFile, UploadProgress, UploadReceipt};
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

/// Chunk size for streaming the file body (64 KB)
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;
/// Rejection bodies are cut to this many characters before they reach the UI.
const MAX_ERROR_BODY_CHARS: usize = 200;

#[derive(Debug, Default, Deserialize)]
struct UploadAck {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    filename: Option<String>,
}

/// Check that `path` names a readable regular file and describe it.
pub async fn inspect_file(path: &Path) -> Result<SelectedFile, InvalidFile> {
    let invalid = |reason: String| InvalidFile {
        path: path.to_path_buf(),
        reason,
    };
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| invalid(e.to_string()))?;
    if !meta.is_file() {
        return Err(invalid("not a regular file".into()));
    }
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.to_string())
        .ok_or_else(|| invalid("file name is not valid UTF-8".into()))?;
    Ok(SelectedFile {
        path: path.to_path_buf(),
        name,
        size_bytes: meta.len(),
    })
}

/// Stream `file` to the ingestion endpoint as the multipart field `file`,
/// tagged with `upload_id`.
pub async fn submit(
    client: &ServiceClient,
    file: &SelectedFile,
    upload_id: &str,
    progress_tx: Option<UnboundedSender<UploadProgress>>,
) -> Result<UploadReceipt, UploadError> {
    let io_err = |source| UploadError::Io {
        path: file.path.clone(),
        source,
    };
    let handle = tokio::fs::File::open(&file.path).await.map_err(io_err)?;
    let total_bytes = handle.metadata().await.map_err(io_err)?.len();

    info!(upload_id, file = %file.name, total_bytes, "uploading");

    // Count bytes as they are handed to reqwest; close enough to bytes on the wire for a progress bar.
    let body_stream = futures::stream::unfold(
        (Some(handle), 0u64, progress_tx),
        move |(handle, sent, tx)| async move {
            let Some(mut handle) = handle else {
                return None;
            };
            let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
            match handle.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    let sent = sent + n as u64;
                    if let Some(tx) = tx.as_ref() {
                        let _ = tx.send(UploadProgress {
                            bytes_sent: sent,
                            total_bytes,
                        });
                    }
                    Some((Ok::<Bytes, std::io::Error>(Bytes::from(buf)), (Some(handle), sent, tx)))
                }
                Err(e) => Some((Err(e), (None, sent, tx))),
            }
        },
    );

    let mime = mime_guess::from_path(&file.path).first_or_octet_stream();
    let part = Part::stream_with_length(reqwest::Body::wrap_stream(body_stream), total_bytes)
        .file_name(file.name.clone())
        .mime_str(mime.as_ref())?;
    let form = Form::new()
        .part("file", part)
        .text("upload_id", upload_id.to_string());

    let resp = client
        .http
        .post(client.upload_url().clone())
        .multipart(form)
        .send()
        .await?;

    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        let body: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
        warn!(upload_id, %status, body = %body, "upload rejected");
        return Err(UploadError::Rejected { status, body });
    }

    // The body is optional; only the HTTP status decides acceptance.
    let ack: UploadAck = serde_json::from_str(&text).unwrap_or_default();
    let filename = ack
        .filename
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| file.name.clone());
    info!(upload_id, filename = %filename, "upload accepted");

    Ok(UploadReceipt {
        upload_id: upload_id.to_string(),
        filename,
        message: ack.message,
    })
}
