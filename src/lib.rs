//! Client engine for multi-phase network speed tests.
//!
//! A test runs ping, download, and upload phases against a measurement
//! server (located directly or through a balancer) and reports progress as an
//! ordered stream of [`TestEvent`]s. Raw bits-per-second samples are reduced
//! into display values by [`convert`] and [`stats`]; the actual network I/O
//! sits behind the [`probe::NetworkProbe`] trait.

pub mod config;
pub mod convert;
pub mod engine;
pub mod error;
pub mod probe;
pub mod stats;

pub use config::TestConfig;
pub use convert::{speed_with_precision, DisplayPair};
pub use engine::{PhaseState, SpeedTestEngine, TestEvent};
pub use error::SpeedTestError;
pub use probe::{Endpoint, HttpProbe, NetworkProbe, RoutingMode};
pub use stats::{split_initial_batch, Direction, SpeedStatistics};
