use std::time::{Duration, Instant};

use anyhow::Context;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::Endpoint;

/// Streams a fixed-size download from the endpoint's control server and emits
/// one bits-per-second sample per elapsed interval.
pub(crate) struct DownloadStream {
    size_bytes: u64,
    interval: Duration,
}

impl DownloadStream {
    pub(crate) fn new(size_bytes: u64, interval: Duration) -> Self {
        Self { size_bytes, interval }
    }

    pub(crate) async fn run(
        &self,
        client: &reqwest::Client,
        endpoint: &Endpoint,
        samples: mpsc::Sender<u64>,
    ) -> anyhow::Result<()> {
        let url = format!(
            "http://{}/download?bytes={}",
            endpoint.control_authority(),
            self.size_bytes
        );
        log::debug!("download transfer from {url}");

        let response = client
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .context("download request failed")?;
        let mut stream = response.bytes_stream();

        let mut received: u64 = 0;
        let mut window_start = Instant::now();
        let mut window_base: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("download stream interrupted")?;
            received += chunk.len() as u64;

            let now = Instant::now();
            let elapsed = now.duration_since(window_start);
            if elapsed >= self.interval {
                let raw = bits_per_sec(received - window_base, elapsed);
                if samples.send(raw).await.is_err() {
                    // Receiver dropped, the test was cancelled.
                    return Ok(());
                }
                window_start = now;
                window_base = received;
            }
        }

        log::debug!("download transfer finished, {received} bytes");
        Ok(())
    }
}

/// Normalizes a window's byte delta to whole bits per second.
pub(crate) fn bits_per_sec(byte_delta: u64, elapsed: Duration) -> u64 {
    let millis = elapsed.as_millis().max(1);
    (byte_delta as u128 * 8 * 1000 / millis) as u64
}
