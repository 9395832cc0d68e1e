use thiserror::Error;

/// Errors produced by the speed test engine and its statistics layer.
///
/// `InvalidArgument` covers malformed sample input and is always recoverable
/// locally (the offending sample is skipped). `Probe` is fatal to the current
/// test run and is surfaced exactly once through the event stream.
#[derive(Debug, Error)]
pub enum SpeedTestError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("cannot average an empty sample sequence")]
    EmptySequence,

    #[error("{message}")]
    Probe {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl SpeedTestError {
    pub fn probe(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Probe {
            message: message.into(),
            source,
        }
    }
}
