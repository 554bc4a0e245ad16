//! Latency sampler state machine.
//!
//! The machine performs no I/O. The driver feeds it [`Event`]s with the time
//! they were observed and carries out the returned [`Action`]. A run goes
//! `Idle -> Connecting -> Sampling(1..=ROUNDS) -> Finalizing -> Idle`, and the
//! only way to get another request sent is to report the previous reply, so
//! rounds can never be pipelined.

use std::time::Instant;

use crate::{
    errors::SpeedTestError,
    session::{RunReport, Session},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The connection to the server is open.
    Opened,
    /// A data message arrived on the connection.
    ReplyReceived,
}

impl Event {
    fn name(self) -> &'static str {
        match self {
            Event::Opened => "connection open",
            Event::ReplyReceived => "reply",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Send the control token for the next round.
    SendToken,
    /// Close the connection; then call [`Sampler::finish`].
    Close,
}

#[derive(Debug, Default)]
pub enum SamplerState {
    #[default]
    Idle,
    Connecting,
    Sampling(Session),
    Finalizing(RunReport),
}

impl SamplerState {
    fn name(&self) -> &'static str {
        match self {
            SamplerState::Idle => "idle",
            SamplerState::Connecting => "connecting",
            SamplerState::Sampling(_) => "sampling",
            SamplerState::Finalizing(_) => "finalizing",
        }
    }
}

#[derive(Debug, Default)]
pub struct Sampler {
    state: SamplerState,
}

impl Sampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SamplerState {
        &self.state
    }

    /// Whether rounds are in flight or the result is still being computed.
    pub fn in_progress(&self) -> bool {
        matches!(
            self.state,
            SamplerState::Sampling(_) | SamplerState::Finalizing(_)
        )
    }

    /// Begins a run. Fails unless the sampler is idle.
    pub fn connect(&mut self) -> Result<(), SpeedTestError> {
        match self.state {
            SamplerState::Idle => {
                self.state = SamplerState::Connecting;
                Ok(())
            }
            _ => Err(SpeedTestError::RunInProgress),
        }
    }

    pub fn handle(&mut self, event: Event, now: Instant) -> Result<Action, SpeedTestError> {
        match (event, &mut self.state) {
            (Event::Opened, SamplerState::Connecting) => {
                self.state = SamplerState::Sampling(Session::start(now));
                Ok(Action::SendToken)
            }
            (Event::ReplyReceived, SamplerState::Sampling(session)) => {
                let sample = session.record_reply(now)?;
                tracing::debug!(
                    round = session.round(),
                    elapsed_ms = sample,
                    "round trip completed"
                );
                if !session.is_complete() {
                    session.next_round();
                    return Ok(Action::SendToken);
                }
                let SamplerState::Sampling(session) = std::mem::take(&mut self.state) else {
                    unreachable!("state matched as sampling");
                };
                self.state = SamplerState::Finalizing(session.into_report());
                Ok(Action::Close)
            }
            (event, state) => Err(SpeedTestError::UnexpectedEvent {
                event: event.name(),
                state: state.name(),
            }),
        }
    }

    /// Stamps the start of the current round. Call right before sending its token.
    pub fn request_sent(&mut self, now: Instant) -> Result<(), SpeedTestError> {
        match &mut self.state {
            SamplerState::Sampling(session) => {
                session.request_sent(now);
                Ok(())
            }
            state => Err(SpeedTestError::UnexpectedEvent {
                event: "request sent",
                state: state.name(),
            }),
        }
    }

    /// Hands out the result once the connection is closed, returning to idle.
    pub fn finish(&mut self) -> Result<RunReport, SpeedTestError> {
        match std::mem::take(&mut self.state) {
            SamplerState::Finalizing(report) => Ok(report),
            other => {
                let state = other.name();
                self.state = other;
                Err(SpeedTestError::UnexpectedEvent {
                    event: "finish",
                    state,
                })
            }
        }
    }

    /// Drops any run in progress.
    pub fn reset(&mut self) {
        self.state = SamplerState::Idle;
    }
}
