use std::time::{Duration, Instant};

use anyhow::Context;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use super::download::bits_per_sec;
use super::Endpoint;

const CHUNK_SIZE: usize = 1_000_000;

/// Uploads a random payload in fixed-size chunks and emits one
/// bits-per-second sample per elapsed interval.
pub(crate) struct UploadStream {
    payload: Vec<u8>,
    interval: Duration,
}

impl UploadStream {
    pub(crate) fn new(size_bytes: usize, interval: Duration) -> Self {
        let mut rng = rand::rngs::StdRng::from_entropy();
        let payload: Vec<u8> = (0..size_bytes).map(|_| rng.gen()).collect();
        Self { payload, interval }
    }

    pub(crate) async fn run(
        &self,
        client: &reqwest::Client,
        endpoint: &Endpoint,
        samples: mpsc::Sender<u64>,
    ) -> anyhow::Result<()> {
        let url = format!("http://{}/upload", endpoint.control_authority());
        log::debug!("upload transfer to {url}, {} bytes", self.payload.len());

        let mut sent: u64 = 0;
        let mut window_start = Instant::now();
        let mut window_base: u64 = 0;

        for chunk in self.payload.chunks(CHUNK_SIZE) {
            client
                .post(&url)
                .body(chunk.to_vec())
                .send()
                .await
                .and_then(|response| response.error_for_status())
                .context("upload request failed")?;
            sent += chunk.len() as u64;

            let now = Instant::now();
            let elapsed = now.duration_since(window_start);
            if elapsed >= self.interval {
                let raw = bits_per_sec(sent - window_base, elapsed);
                if samples.send(raw).await.is_err() {
                    // Receiver dropped, the test was cancelled.
                    return Ok(());
                }
                window_start = now;
                window_base = sent;
            }
        }

        log::debug!("upload transfer finished, {sent} bytes");
        Ok(())
    }
}
