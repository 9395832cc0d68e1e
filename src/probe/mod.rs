//! Network measurement boundary.
//!
//! The engine drives an abstract [`NetworkProbe`]; [`HttpProbe`] is the
//! production implementation: UDP echo for latency, streaming HTTP transfers
//! for throughput, and an optional balancer query that returns a set of
//! candidate measurement servers.

pub mod download;
pub mod ping;
pub mod upload;

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::config::TestConfig;
use crate::error::SpeedTestError;
use crate::stats::Direction;

/// How the measurement server is located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMode {
    /// Ask the balancer for candidate servers.
    Balancer,
    /// Measure against the given address directly.
    Direct,
}

/// One measurement server: an HTTP control/throughput port and a UDP echo
/// port on the same host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub control_port: u16,
    pub ping_port: u16,
}

impl Endpoint {
    /// Parses `host`, `host:port`, `[v6addr]`, or `[v6addr]:port`. The host
    /// is stored without brackets; an explicit port overrides the configured
    /// control port.
    pub fn parse(address: &str, config: &TestConfig) -> Result<Self, SpeedTestError> {
        let bad = || SpeedTestError::InvalidArgument(format!("malformed address: {address:?}"));
        let address = address.trim();
        if address.is_empty() {
            return Err(bad());
        }

        let (host, port) = if address.starts_with('[') {
            if let Some(end) = address.find(']') {
                let host = &address[1..end];
                match &address[end + 1..] {
                    "" => (host, None),
                    rest => {
                        let port = rest.strip_prefix(':').ok_or_else(bad)?;
                        (host, Some(port))
                    }
                }
            } else {
                return Err(bad());
            }
        } else if address.matches(':').count() > 1 {
            // Bare IPv6, no port.
            (address, None)
        } else {
            match address.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (address, None),
            }
        };

        if host.is_empty() {
            return Err(bad());
        }
        let control_port = match port {
            Some(p) => p.parse().map_err(|_| bad())?,
            None => config.control_port,
        };
        Ok(Self {
            host: host.to_string(),
            control_port,
            ping_port: config.ping_port,
        })
    }

    /// `host:port` authority for URLs, bracketing IPv6 hosts.
    pub fn control_authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.control_port)
        } else {
            format!("{}:{}", self.host, self.control_port)
        }
    }
}

/// The I/O side of a speed test. All methods are driven sequentially by the
/// engine; `measure` streams raw bits-per-second samples until the transfer
/// completes.
#[async_trait]
pub trait NetworkProbe: Send + Sync + 'static {
    /// Resolves the candidate measurement servers for this run.
    async fn resolve(&self, mode: RoutingMode, address: &str) -> anyhow::Result<Vec<Endpoint>>;

    /// One latency observation against `endpoint`, in milliseconds.
    async fn ping(&self, endpoint: &Endpoint) -> anyhow::Result<u64>;

    /// Runs one throughput transfer, sending a sample per elapsed interval.
    /// Returning `Ok` means the transfer ran to completion; the sender is
    /// dropped either way.
    async fn measure(
        &self,
        direction: Direction,
        endpoint: &Endpoint,
        samples: mpsc::Sender<u64>,
    ) -> anyhow::Result<()>;
}

/// Server record returned by the balancer's `/addr` listing.
#[derive(Debug, Deserialize)]
struct ServerRecord {
    ip: String,
    port: Option<u16>,
}

/// Production probe: UDP echo latency plus streaming HTTP throughput.
pub struct HttpProbe {
    client: reqwest::Client,
    config: TestConfig,
}

impl HttpProbe {
    pub fn new(config: TestConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl NetworkProbe for HttpProbe {
    async fn resolve(&self, mode: RoutingMode, address: &str) -> anyhow::Result<Vec<Endpoint>> {
        let seed = Endpoint::parse(address, &self.config)?;
        match mode {
            RoutingMode::Direct => Ok(vec![seed]),
            RoutingMode::Balancer => {
                let url = format!("http://{}/addr", seed.control_authority());
                log::debug!("querying balancer at {url}");
                let records: Vec<ServerRecord> = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .and_then(reqwest::Response::error_for_status)
                    .context("balancer request failed")?
                    .json()
                    .await
                    .context("balancer returned an unreadable server list")?;
                Ok(records
                    .into_iter()
                    .map(|record| Endpoint {
                        host: record.ip,
                        control_port: record.port.unwrap_or(self.config.control_port),
                        ping_port: self.config.ping_port,
                    })
                    .collect())
            }
        }
    }

    async fn ping(&self, endpoint: &Endpoint) -> anyhow::Result<u64> {
        ping::round_trip(endpoint, self.config.ping_timeout).await
    }

    async fn measure(
        &self,
        direction: Direction,
        endpoint: &Endpoint,
        samples: mpsc::Sender<u64>,
    ) -> anyhow::Result<()> {
        match direction {
            Direction::Download => {
                download::DownloadStream::new(
                    self.config.download_size_bytes(),
                    self.config.sample_interval,
                )
                .run(&self.client, endpoint, samples)
                .await
            }
            Direction::Upload => {
                upload::UploadStream::new(
                    self.config.upload_size_bytes(),
                    self.config.sample_interval,
                )
                .run(&self.client, endpoint, samples)
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TestConfig {
        TestConfig::default()
    }

    #[test]
    fn bare_host_gets_default_ports() {
        let ep = Endpoint::parse("measure.example.org", &config()).unwrap();
        assert_eq!(ep.host, "measure.example.org");
        assert_eq!(ep.control_port, 5000);
        assert_eq!(ep.ping_port, 49121);
    }

    #[test]
    fn explicit_port_overrides_control_port_only() {
        let ep = Endpoint::parse("10.0.0.7:8080", &config()).unwrap();
        assert_eq!(ep.host, "10.0.0.7");
        assert_eq!(ep.control_port, 8080);
        assert_eq!(ep.ping_port, 49121);
    }

    #[test]
    fn ipv6_with_and_without_port() {
        let ep = Endpoint::parse("[2001:db8::1]:9000", &config()).unwrap();
        assert_eq!(ep.host, "2001:db8::1");
        assert_eq!(ep.control_port, 9000);
        assert_eq!(ep.control_authority(), "[2001:db8::1]:9000");

        let ep = Endpoint::parse("[::1]", &config()).unwrap();
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.control_port, 5000);

        let ep = Endpoint::parse("2001:db8::1", &config()).unwrap();
        assert_eq!(ep.host, "2001:db8::1");
        assert_eq!(ep.control_port, 5000);
    }

    #[test]
    fn malformed_addresses_are_rejected() {
        for bad in ["", "  ", "host:notaport", "host:70000", "[::1", "[::1]x", ":5000"] {
            assert!(
                matches!(
                    Endpoint::parse(bad, &config()),
                    Err(SpeedTestError::InvalidArgument(_))
                ),
                "expected rejection of {bad:?}"
            );
        }
    }

    #[test]
    fn ipv4_authority_has_no_brackets() {
        let ep = Endpoint::parse("192.0.2.1:5000", &config()).unwrap();
        assert_eq!(ep.control_authority(), "192.0.2.1:5000");
    }
}
