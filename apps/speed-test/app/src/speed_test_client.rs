use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use futures::{Sink, SinkExt, Stream, StreamExt};
use speed_test_types::{endpoint_uri, SpeedTestOptions, CONTROL_TOKEN, MAX_PAYLOAD_BYTES};
use tokio::{
    sync::{watch, Mutex, OwnedMutexGuard},
    task::JoinHandle,
};
use tokio_tungstenite::tungstenite::{
    self, error::ProtocolError, protocol::WebSocketConfig, Message,
};

use crate::{
    errors::SpeedTestError,
    sampler::{Action, Event, Sampler, SamplerState},
    session::RunReport,
};

/// Observable outputs of the speed test.
#[derive(Debug)]
pub struct RunOutputs {
    in_progress: watch::Sender<bool>,
    final_rate: watch::Sender<f64>,
}

impl Default for RunOutputs {
    fn default() -> Self {
        Self::new()
    }
}

impl RunOutputs {
    pub fn new() -> Self {
        Self {
            in_progress: watch::Sender::new(false),
            final_rate: watch::Sender::new(0.0),
        }
    }

    pub fn in_progress(&self) -> watch::Receiver<bool> {
        self.in_progress.subscribe()
    }

    pub fn final_rate(&self) -> watch::Receiver<f64> {
        self.final_rate.subscribe()
    }

    fn set_in_progress(&self, value: bool) {
        self.in_progress.send_if_modified(|current| {
            let changed = *current != value;
            *current = value;
            changed
        });
    }

    // The rate goes out before the flag drops so that anyone reacting to
    // `in_progress == false` already reads the new value.
    fn publish(&self, report: &RunReport) {
        self.final_rate.send_replace(report.rate_mb_per_s);
        self.set_in_progress(false);
    }
}

/// Entry point for measurement runs against one server.
///
/// At most one run is active at a time; results are delivered through the
/// [`in_progress`](SpeedTest::in_progress) and
/// [`final_rate`](SpeedTest::final_rate) channels.
pub struct SpeedTest {
    uri: String,
    options: SpeedTestOptions,
    sampler: Arc<Mutex<Sampler>>,
    outputs: Arc<RunOutputs>,
}

impl SpeedTest {
    pub fn new(host: &str, options: SpeedTestOptions) -> Self {
        Self {
            uri: endpoint_uri(host),
            options,
            sampler: Arc::new(Mutex::new(Sampler::new())),
            outputs: Arc::new(RunOutputs::new()),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn in_progress(&self) -> watch::Receiver<bool> {
        self.outputs.in_progress()
    }

    /// Throughput of the last completed run in MB/s, 0 before the first one.
    pub fn final_rate(&self) -> watch::Receiver<f64> {
        self.outputs.final_rate()
    }

    /// Spawns a new run and returns without waiting for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_run(
        &self,
    ) -> Result<JoinHandle<Result<RunReport, SpeedTestError>>, SpeedTestError> {
        let mut sampler = self
            .sampler
            .clone()
            .try_lock_owned()
            .map_err(|_| SpeedTestError::RunInProgress)?;
        sampler.connect()?;
        let uri = self.uri.clone();
        let round_timeout = self.options.round_timeout;
        let outputs = self.outputs.clone();
        Ok(tokio::spawn(async move {
            run(sampler, uri, round_timeout, outputs).await
        }))
    }
}

async fn run(
    mut sampler: OwnedMutexGuard<Sampler>,
    uri: String,
    round_timeout: Option<Duration>,
    outputs: Arc<RunOutputs>,
) -> Result<RunReport, SpeedTestError> {
    let result = async {
        let stream = connect_to_host(&uri).await?;
        tracing::debug!(%uri, "connection open");
        run_session(stream, &mut sampler, round_timeout, &outputs).await
    }
    .await;
    match &result {
        Ok(report) => {
            tracing::info!(
                mean_ms = report.mean_ms,
                rate_mb_per_s = report.rate_mb_per_s,
                "speed test finished"
            );
        }
        Err(err) => {
            tracing::error!(err = %err, "speed test run failed");
            sampler.reset();
            outputs.set_in_progress(false);
        }
    }
    result
}

pub(crate) fn ws_config() -> WebSocketConfig {
    WebSocketConfig::default()
        .max_message_size(Some(MAX_PAYLOAD_BYTES))
        .max_frame_size(Some(MAX_PAYLOAD_BYTES))
}

/// Opens the WebSocket connection to the speed test route.
pub async fn connect_to_host(
    uri: &str,
) -> Result<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    SpeedTestError,
> {
    let (stream, _resp) =
        tokio_tungstenite::connect_async_with_config(uri, Some(ws_config()), false)
            .await
            .map_err(|source| {
                tracing::error!(err = %source, %uri, "failed to connect");
                SpeedTestError::Connect {
                    uri: uri.to_owned(),
                    source,
                }
            })?;
    Ok(stream)
}

/// Drives a connected sampler through all rounds on `stream`.
///
/// The sampler must be in the connecting state. The stream is closed before the
/// result is published on `outputs`.
pub async fn run_session<S>(
    mut stream: S,
    sampler: &mut Sampler,
    round_timeout: Option<Duration>,
    outputs: &RunOutputs,
) -> Result<RunReport, SpeedTestError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin,
{
    let mut action = sampler.handle(Event::Opened, Instant::now())?;
    loop {
        let round = current_round(sampler);
        match action {
            Action::SendToken => {
                outputs.set_in_progress(true);
                sampler.request_sent(Instant::now())?;
                stream
                    .send(Message::text(CONTROL_TOKEN))
                    .await
                    .map_err(|source| SpeedTestError::Transport { round, source })?;
            }
            Action::Close => {
                if let Err(err) = stream.close().await {
                    tracing::warn!(err = %err, "error closing connection");
                }
                drop(stream);
                let report = sampler.finish()?;
                outputs.publish(&report);
                return Ok(report);
            }
        }

        let reply = wait_for_reply(&mut stream, round, sampler);
        match round_timeout {
            Some(timeout) => tokio::time::timeout(timeout, reply)
                .await
                .map_err(|_| SpeedTestError::RoundTimeout { round, timeout })??,
            None => reply.await?,
        }
        action = sampler.handle(Event::ReplyReceived, Instant::now())?;
    }
}

fn current_round(sampler: &Sampler) -> usize {
    match sampler.state() {
        SamplerState::Sampling(session) => session.round(),
        _ => 0,
    }
}

async fn wait_for_reply<S>(
    stream: &mut S,
    round: usize,
    sampler: &Sampler,
) -> Result<(), SpeedTestError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(_) | Message::Binary(_))) => return Ok(()),
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(?frame, round, "server closed the connection");
                break;
            }
            Some(Ok(other)) => {
                tracing::trace!(msg = ?other, "ignoring control frame");
            }
            Some(Err(
                tungstenite::Error::ConnectionClosed
                | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake),
            )) => break,
            Some(Err(source)) => return Err(SpeedTestError::Transport { round, source }),
            None => break,
        }
    }
    let completed = match sampler.state() {
        SamplerState::Sampling(session) => session.rounds_completed(),
        _ => 0,
    };
    Err(SpeedTestError::ConnectionClosed { completed })
}
