use std::time::Duration;

use speed_test_types::ROUNDS;
use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum SpeedTestError {
    #[error("a speed test run is already in progress")]
    RunInProgress,
    #[error("failed to connect to {uri}: {source}")]
    Connect {
        uri: String,
        #[source]
        source: tungstenite::Error,
    },
    #[error("transport error during round {round}: {source}")]
    Transport {
        round: usize,
        #[source]
        source: tungstenite::Error,
    },
    #[error("connection closed after {completed} of {} rounds", ROUNDS)]
    ConnectionClosed { completed: usize },
    #[error("no reply for round {round} within {timeout:?}")]
    RoundTimeout { round: usize, timeout: Duration },
    #[error("reply for round {round} is timestamped before its request")]
    NegativeSample { round: usize },
    #[error("unexpected {event} while {state}")]
    UnexpectedEvent {
        event: &'static str,
        state: &'static str,
    },
}
