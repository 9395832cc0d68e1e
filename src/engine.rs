//! Test orchestration: the phase state machine and the event stream.
//!
//! [`SpeedTestEngine`] drives a full measurement run (ping, then download,
//! then upload) on a spawned task. The probe streams raw samples over a
//! bounded channel into a single driver loop, which ingests them, converts
//! them for display, and forwards [`TestEvent`]s to the one subscriber
//! returned by [`SpeedTestEngine::new`]. A single receiver means events are
//! always delivered in order and never concurrently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::TestConfig;
use crate::convert::{self, DisplayPair};
use crate::error::SpeedTestError;
use crate::probe::{Endpoint, NetworkProbe, RoutingMode};
use crate::stats::{Direction, SpeedStatistics};

const SAMPLE_QUEUE: usize = 32;

/// Where the engine currently is in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    Idle,
    Pinging,
    Downloading,
    Uploading,
    Finished,
    Stopped,
    Error,
}

/// Progress notifications for one run, delivered in order on a single
/// channel. `*SpeedUpdate` events carry the sequence ingested so far plus the
/// newest sample both raw and converted for display; `*Finish` events carry
/// the frozen sequence and its average.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestEvent {
    PingUpdate {
        millis: u64,
    },
    DownloadStart,
    DownloadSpeedUpdate {
        samples: Vec<u64>,
        bits_per_sec: u64,
        instant: DisplayPair,
    },
    DownloadFinish {
        samples: Vec<u64>,
        average: DisplayPair,
    },
    UploadStart,
    UploadSpeedUpdate {
        samples: Vec<u64>,
        bits_per_sec: u64,
        instant: DisplayPair,
    },
    UploadFinish {
        samples: Vec<u64>,
        average: DisplayPair,
    },
    Finish,
    Stop,
    FatalError {
        message: String,
        cause: String,
    },
}

enum Outcome {
    Completed,
    Cancelled,
}

/// State shared between the control surface and the driver task.
///
/// `muted` is flipped by `stop()` under the state lock and checked before
/// every state change and event emission, so no event can be enqueued after
/// the `Stop` notification.
struct Shared {
    state: Mutex<PhaseState>,
    stats: Mutex<SpeedStatistics>,
    muted: AtomicBool,
}

impl Shared {
    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Moves to `next` unless the run has been stopped in the meantime.
    fn advance(&self, next: PhaseState) -> bool {
        let mut state = self.state.lock().unwrap();
        if self.is_muted() {
            return false;
        }
        *state = next;
        true
    }

    /// Enqueues an event unless the run has been stopped. Holding the state
    /// lock here orders every emission against `stop()`: once `Stop` is
    /// queued, nothing else can follow it. The event channel is unbounded,
    /// so a lagging subscriber delays delivery but never loses an event;
    /// each per-phase finish notification and the terminal event arrive
    /// exactly once.
    fn emit(&self, events: &mpsc::UnboundedSender<TestEvent>, event: TestEvent) {
        let _state = self.state.lock().unwrap();
        if self.is_muted() {
            return;
        }
        let _ = events.send(event);
    }
}

/// Drives multi-phase speed tests against a [`NetworkProbe`].
///
/// One engine runs at most one test at a time; `start` on an active engine is
/// rejected. A finished, stopped, or failed engine is re-armable with a fresh
/// `start`. Constructed explicitly and owned by its caller; there is no
/// process-wide instance.
pub struct SpeedTestEngine {
    shared: Arc<Shared>,
    probe: Arc<dyn NetworkProbe>,
    events: mpsc::UnboundedSender<TestEvent>,
    config: TestConfig,
}

impl SpeedTestEngine {
    /// Creates an engine and the receiving end of its event stream.
    pub fn new(
        probe: Arc<dyn NetworkProbe>,
        config: TestConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TestEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let engine = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PhaseState::Idle),
                stats: Mutex::new(SpeedStatistics::new()),
                muted: AtomicBool::new(false),
            }),
            probe,
            events,
            config,
        };
        (engine, receiver)
    }

    pub fn state(&self) -> PhaseState {
        *self.shared.state.lock().unwrap()
    }

    /// Average of a completed phase, if it has produced samples.
    pub fn average(&self, direction: Direction) -> Result<DisplayPair, SpeedTestError> {
        self.shared.stats.lock().unwrap().average(direction)
    }

    /// Begins a new test run. Must be called within a tokio runtime.
    ///
    /// The run waits `initial_delay` before touching the network so that the
    /// subscriber can settle; the delay has no effect on measured values.
    /// Rejected while a run is active.
    pub fn start(
        &self,
        use_balancer: bool,
        address: &str,
        initial_delay: Duration,
    ) -> Result<(), SpeedTestError> {
        {
            let mut state = self.shared.state.lock().unwrap();
            match *state {
                PhaseState::Idle
                | PhaseState::Finished
                | PhaseState::Stopped
                | PhaseState::Error => {}
                active => {
                    return Err(SpeedTestError::InvalidState(format!(
                        "a test is already running ({active:?})"
                    )))
                }
            }
            *state = PhaseState::Pinging;
            self.shared.muted.store(false, Ordering::SeqCst);
        }
        self.shared.stats.lock().unwrap().reset();

        let mode = if use_balancer {
            RoutingMode::Balancer
        } else {
            RoutingMode::Direct
        };
        log::info!("starting speed test against {address} ({mode:?} routing)");

        tokio::spawn(run_test(
            Arc::clone(&self.shared),
            Arc::clone(&self.probe),
            self.events.clone(),
            self.config.clone(),
            mode,
            address.to_string(),
            initial_delay,
        ));
        Ok(())
    }

    /// Halts the active run. After `stop` returns, the only event the
    /// subscriber can still receive for this run is `Stop`; the in-progress
    /// phase emits no finish notification. A no-op when no run is active.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            match *state {
                PhaseState::Pinging | PhaseState::Downloading | PhaseState::Uploading => {}
                _ => return,
            }
            *state = PhaseState::Stopped;
            self.shared.muted.store(true, Ordering::SeqCst);
            let _ = self.events.send(TestEvent::Stop);
        }
        log::info!("speed test stopped");
    }
}

async fn run_test(
    shared: Arc<Shared>,
    probe: Arc<dyn NetworkProbe>,
    events: mpsc::UnboundedSender<TestEvent>,
    config: TestConfig,
    mode: RoutingMode,
    address: String,
    initial_delay: Duration,
) {
    if !initial_delay.is_zero() {
        tokio::time::sleep(initial_delay).await;
    }

    match run_phases(&shared, &probe, &events, &config, mode, &address).await {
        Ok(Outcome::Completed) => {
            if shared.advance(PhaseState::Finished) {
                log::info!("speed test finished");
                shared.emit(&events, TestEvent::Finish);
            }
        }
        Ok(Outcome::Cancelled) => {
            // stop() already moved the state machine and queued `Stop`.
        }
        Err(err) => {
            if shared.advance(PhaseState::Error) {
                let (message, cause) = match err {
                    SpeedTestError::Probe { message, source } => {
                        (message, format!("{source:#}"))
                    }
                    other => (other.to_string(), String::new()),
                };
                log::error!("speed test failed: {message} ({cause})");
                shared.emit(&events, TestEvent::FatalError { message, cause });
            }
        }
    }
}

async fn run_phases(
    shared: &Arc<Shared>,
    probe: &Arc<dyn NetworkProbe>,
    events: &mpsc::UnboundedSender<TestEvent>,
    config: &TestConfig,
    mode: RoutingMode,
    address: &str,
) -> Result<Outcome, SpeedTestError> {
    // A stop issued during the start delay must halt the run before it
    // touches the network.
    if shared.is_muted() {
        return Ok(Outcome::Cancelled);
    }

    let candidates = probe
        .resolve(mode, address)
        .await
        .map_err(|err| SpeedTestError::probe("could not resolve a measurement server", err))?;
    if candidates.is_empty() {
        return Err(SpeedTestError::probe(
            "no servers are available right now",
            anyhow::anyhow!("the balancer returned an empty server list"),
        ));
    }

    // Ping every candidate and keep the closest one for the transfers.
    let mut best: Option<(Endpoint, u64)> = None;
    for endpoint in candidates {
        if shared.is_muted() {
            return Ok(Outcome::Cancelled);
        }
        match probe.ping(&endpoint).await {
            Ok(millis) => {
                shared.emit(events, TestEvent::PingUpdate { millis });
                if best.as_ref().map_or(true, |(_, lowest)| millis < *lowest) {
                    best = Some((endpoint, millis));
                }
            }
            Err(err) => {
                log::warn!("candidate {} did not answer the ping: {err:#}", endpoint.host);
            }
        }
    }
    let (endpoint, latency) = best.ok_or_else(|| {
        SpeedTestError::probe(
            "no servers are available right now",
            anyhow::anyhow!("every candidate failed the latency probe"),
        )
    })?;
    log::debug!("measuring against {} ({latency} ms)", endpoint.host);

    for direction in [Direction::Download, Direction::Upload] {
        let (state, start_event) = match direction {
            Direction::Download => (PhaseState::Downloading, TestEvent::DownloadStart),
            Direction::Upload => (PhaseState::Uploading, TestEvent::UploadStart),
        };
        if !shared.advance(state) {
            return Ok(Outcome::Cancelled);
        }
        shared.emit(events, start_event);
        if let Outcome::Cancelled =
            run_direction(shared, probe, events, config, &endpoint, direction).await?
        {
            return Ok(Outcome::Cancelled);
        }
    }
    Ok(Outcome::Completed)
}

/// Runs one throughput phase: streams samples from the probe worker, ingests
/// them in arrival order, and closes the phase with a frozen average.
async fn run_direction(
    shared: &Arc<Shared>,
    probe: &Arc<dyn NetworkProbe>,
    events: &mpsc::UnboundedSender<TestEvent>,
    config: &TestConfig,
    endpoint: &Endpoint,
    direction: Direction,
) -> Result<Outcome, SpeedTestError> {
    let (samples_tx, mut samples_rx) = mpsc::channel(SAMPLE_QUEUE);
    let worker_probe = Arc::clone(probe);
    let worker_endpoint = endpoint.clone();
    let worker = tokio::spawn(async move {
        worker_probe
            .measure(direction, &worker_endpoint, samples_tx)
            .await
    });

    while let Some(raw) = samples_rx.recv().await {
        if shared.is_muted() {
            worker.abort();
            return Ok(Outcome::Cancelled);
        }
        let instant = match convert::speed_with_precision(raw as i64, config.instant_precision) {
            Ok(pair) => pair,
            Err(err) => {
                log::warn!("skipping unusable sample {raw}: {err}");
                continue;
            }
        };
        let snapshot = {
            let mut stats = shared.stats.lock().unwrap();
            if let Err(err) = stats.ingest(direction, raw) {
                log::warn!("dropping sample {raw}: {err}");
                continue;
            }
            stats.samples(direction).to_vec()
        };
        let event = match direction {
            Direction::Download => TestEvent::DownloadSpeedUpdate {
                samples: snapshot,
                bits_per_sec: raw,
                instant,
            },
            Direction::Upload => TestEvent::UploadSpeedUpdate {
                samples: snapshot,
                bits_per_sec: raw,
                instant,
            },
        };
        shared.emit(events, event);
    }

    match worker.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            let message = match direction {
                Direction::Download => "download measurement failed",
                Direction::Upload => "upload measurement failed",
            };
            return Err(SpeedTestError::probe(message, err));
        }
        Err(err) if err.is_cancelled() => return Ok(Outcome::Cancelled),
        Err(err) => {
            return Err(SpeedTestError::probe(
                "measurement worker crashed",
                anyhow::Error::new(err),
            ))
        }
    }

    if shared.is_muted() {
        return Ok(Outcome::Cancelled);
    }

    let (sequence, average) = {
        let mut stats = shared.stats.lock().unwrap();
        stats.freeze(direction);
        let average = match stats.average(direction) {
            Ok(pair) => pair,
            Err(SpeedTestError::EmptySequence) => {
                log::warn!("{direction:?} phase produced no samples, reporting zero");
                DisplayPair::ZERO
            }
            Err(err) => return Err(err),
        };
        (stats.samples(direction).to_vec(), average)
    };
    let event = match direction {
        Direction::Download => TestEvent::DownloadFinish {
            samples: sequence,
            average,
        },
        Direction::Upload => TestEvent::UploadFinish {
            samples: sequence,
            average,
        },
    };
    shared.emit(events, event);
    Ok(Outcome::Completed)
}
