use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::net::UdpSocket;

use super::Endpoint;

const PING_PAYLOAD: &[u8] = b"ranspeed";

/// One UDP echo round trip against the endpoint's ping port, in milliseconds.
///
/// The responder is expected to echo the datagram back; any reply counts, the
/// payload is not inspected.
pub(crate) async fn round_trip(endpoint: &Endpoint, timeout: Duration) -> anyhow::Result<u64> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("could not bind a ping socket")?;
    socket
        .connect((endpoint.host.as_str(), endpoint.ping_port))
        .await
        .with_context(|| format!("unreachable ping target {}", endpoint.host))?;

    let start = Instant::now();
    socket.send(PING_PAYLOAD).await.context("ping send failed")?;

    let mut reply = [0u8; 64];
    tokio::time::timeout(timeout, socket.recv(&mut reply))
        .await
        .map_err(|_| anyhow::anyhow!("ping to {} timed out after {timeout:?}", endpoint.host))?
        .context("ping receive failed")?;

    Ok(start.elapsed().as_millis() as u64)
}
