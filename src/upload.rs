use std::path::Path;

use anyhow::{Context, Result};
use futures::StreamExt;
use log::{error, info};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use tokio::fs::File;
use tokio::sync::watch;
use tokio_util::io::ReaderStream;

const UPLOAD_ENDPOINT: &str = "Upload.php";
const FILE_FIELD: &str = "fileToUpload";
const SUBMIT_FIELD: &str = "submit";
const SUBMIT_VALUE: &str = "Upload File";

/// Ships session archives to the collector. Transport failures never escape
/// this boundary: they are logged and the send completes anyway, so callers
/// treat "returned" as "safe to proceed", not "succeeded".
#[derive(Clone)]
pub struct UploadClient {
    client: Client,
    base_url: String,
}

impl UploadClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn upload_url(&self) -> String {
        format!("{}{}", self.base_url, UPLOAD_ENDPOINT)
    }

    /// Sends the file as a multipart POST, publishing fractional progress
    /// (non-decreasing, within `[0, 1]`) on `progress` as bytes stream off
    /// disk. The returned future resolving is the one and only completion
    /// signal, success or not.
    pub async fn send(&self, path: &Path, progress: watch::Sender<f32>) {
        if let Err(err) = self.try_send(path, progress).await {
            error!("Playtest data upload error: {err:#}");
        }
    }

    async fn try_send(&self, path: &Path, progress: watch::Sender<f32>) -> Result<()> {
        let file = File::open(path)
            .await
            .with_context(|| format!("failed to open upload input {}", path.display()))?;
        let total = file
            .metadata()
            .await
            .with_context(|| format!("failed to stat upload input {}", path.display()))?
            .len();
        let file_name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("playtest")
            .to_owned();

        let mut sent: u64 = 0;
        let stream = ReaderStream::new(file).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                let fraction = if total == 0 {
                    1.0
                } else {
                    (sent as f64 / total as f64).min(1.0) as f32
                };
                let _ = progress.send(fraction);
            }
            chunk
        });

        let part = Part::stream_with_length(Body::wrap_stream(stream), total).file_name(file_name);
        let form = Form::new()
            .part(FILE_FIELD, part)
            .text(SUBMIT_FIELD, SUBMIT_VALUE);

        let url = self.upload_url();
        info!("Going to wait for playtest data upload completion now...");
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("upload request to {url} failed"))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_success() {
            info!("Playtest data upload completed: {body}");
        } else {
            error!("Playtest data upload rejected ({status}): {body}");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_url_appends_the_fixed_endpoint() {
        let client = UploadClient::new("http://example.com/playtests/");
        assert_eq!(client.upload_url(), "http://example.com/playtests/Upload.php");
    }

    #[tokio::test]
    async fn send_completes_even_when_the_collector_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.zip");
        std::fs::write(&archive, b"payload").unwrap();

        // Port 9 (discard) is refused on any sane test box; the error must be
        // swallowed and send() must still return.
        let client = UploadClient::new("http://127.0.0.1:9/");
        let (progress_tx, progress_rx) = watch::channel(0.0_f32);
        client.send(&archive, progress_tx).await;

        let fraction = *progress_rx.borrow();
        assert!((0.0..=1.0).contains(&fraction));
    }
}
