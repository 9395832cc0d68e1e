use std::time::Duration;

/// Tunables for one speed test run.
///
/// Defaults mirror the reference measurement deployment: an HTTP control and
/// throughput endpoint on port 5000 and a UDP echo responder on port 49121.
/// The engine only reads this configuration; persisting user overrides is the
/// caller's concern.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Address used when the caller does not supply one.
    pub default_address: String,
    /// Route through the balancer by default.
    pub use_balancer: bool,
    /// HTTP port for throughput transfers and balancer queries.
    pub control_port: u16,
    /// UDP port of the echo responder used for latency probes.
    pub ping_port: u16,
    pub ping_timeout: Duration,
    pub download_size_mb: u64,
    pub upload_size_mb: u64,
    /// Cadence at which the throughput probes emit one raw sample.
    pub sample_interval: Duration,
    /// Digit count for instantaneous display fractions.
    pub instant_precision: usize,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            default_address: "localhost".to_string(),
            use_balancer: true,
            control_port: 5000,
            ping_port: 49121,
            ping_timeout: Duration::from_secs(2),
            download_size_mb: 100,
            upload_size_mb: 50,
            sample_interval: Duration::from_millis(100),
            instant_precision: 2,
        }
    }
}

impl TestConfig {
    pub fn download_size_bytes(&self) -> u64 {
        self.download_size_mb * 1_000_000
    }

    pub fn upload_size_bytes(&self) -> usize {
        (self.upload_size_mb * 1_000_000) as usize
    }
}
