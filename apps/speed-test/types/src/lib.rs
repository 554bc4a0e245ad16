use std::{path::PathBuf, time::Duration};

/// Token the client sends to request one round.
pub const CONTROL_TOKEN: &str = "start";

/// Path of the speed test WebSocket route.
pub const WS_PATH: &str = "/ws";

pub const DEFAULT_HOST: &str = "localhost:8080";
pub const DEFAULT_PORT: u16 = 8080;

/// Number of request/reply rounds in one measurement run.
pub const ROUNDS: usize = 50;

/// Assumed data size transferred per round, in MB, used for the rate conversion.
pub const REFERENCE_PAYLOAD_MB: f64 = 10.0;

/// Size of the payload the server generates when no payload file is given.
pub const REFERENCE_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Largest reply payload, in bytes. The server refuses to serve more and the
/// client refuses to read more.
pub const MAX_PAYLOAD_BYTES: usize = 64 << 20;

/// Builds the WebSocket URI of the speed test route on `host` (`host:port`).
pub fn endpoint_uri(host: &str) -> String {
    format!("ws://{host}{WS_PATH}")
}

#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::Parser))]
pub struct SpeedTestOptions {
    /// Abort the run when a round's reply does not arrive within this time.
    ///
    /// Unset means a stalled run waits forever.
    #[serde(default, with = "humantime_serde")]
    #[cfg_attr(
        feature = "clap",
        clap(long, value_parser = duration_parser, env = "SPEED_TEST_ROUND_TIMEOUT")
    )]
    pub round_timeout: Option<Duration>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::Parser))]
pub struct ServerOptions {
    /// Interval between heartbeat pings sent to each client. Must be non-zero.
    #[serde(with = "humantime_serde")]
    #[cfg_attr(
        feature = "clap",
        clap(long, value_parser = non_zero_duration_parser, default_value = "5s")
    )]
    pub heartbeat: Duration,

    /// Close a connection when nothing was heard from the client for this long.
    #[serde(with = "humantime_serde")]
    #[cfg_attr(feature = "clap", clap(long, value_parser = duration_parser, default_value = "10s"))]
    pub client_timeout: Duration,

    /// File served as the reply payload. A generated buffer is used when unset.
    #[cfg_attr(feature = "clap", clap(long, env = "SPEED_TEST_PAYLOAD_FILE"))]
    pub payload_file: Option<PathBuf>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(5),
            client_timeout: Duration::from_secs(10),
            payload_file: None,
        }
    }
}

#[cfg(feature = "clap")]
#[inline]
fn duration_parser(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

#[cfg(feature = "clap")]
fn non_zero_duration_parser(s: &str) -> Result<Duration, String> {
    match humantime::parse_duration(s) {
        Ok(d) if d.is_zero() => Err("duration must be greater than zero".to_owned()),
        Ok(d) => Ok(d),
        Err(e) => Err(e.to_string()),
    }
}
