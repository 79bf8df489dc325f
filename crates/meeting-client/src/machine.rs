//! Reconnect state machine.
//!
//! Pure and synchronous: [`ReconnectMachine::handle`] takes an [`Input`] and
//! returns the [`Effect`]s the driver must carry out (open a channel, arm a
//! timer, emit an event). No I/O and no clocks live here, so every transition
//! is testable without a runtime.
//!
//! ```text
//! Idle ──connect──> Connecting ──opened──> Open ──disconnect──> ClosedClean
//!                      │   ▲                 │
//!               timeout│   │retry timer      │abnormal close
//!                      ▼   │                 ▼
//!           Failed(Timeout)──abnormal──> ClosedAbnormal ──(attempts ≥ max)──> Failed(MaxAttempts)
//! ```

use crate::errors::ClientError;
use std::time::Duration;

/// WebSocket close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Backoff policy for automatic reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry; doubled for each later one.
    pub base_delay: Duration,
    /// Abnormal closes tolerated before giving up.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// `base_delay × 2^attempt`, saturating.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2_u32.saturating_pow(attempt))
    }
}

/// Why the session is in the `Failed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Timeout,
    MaxAttempts,
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    ClosedClean,
    ClosedAbnormal,
    Failed(FailureReason),
}

/// Something that happened to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Caller asked to connect.
    Connect {
        meeting_id: String,
        participant_id: String,
    },
    /// The transport finished opening the channel.
    Opened,
    /// The transport could not open the channel.
    ConnectFailed(String),
    /// The connect timer elapsed.
    ConnectTimedOut,
    /// The channel closed; `Some(1000)` is a clean close.
    Closed { code: Option<u16> },
    /// The retry timer elapsed.
    RetryTimerFired,
    /// Caller asked to disconnect.
    Disconnect,
}

/// Work the driver must do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    OpenChannel {
        meeting_id: String,
        participant_id: String,
    },
    StartConnectTimer(Duration),
    CancelConnectTimer,
    ScheduleRetry(Duration),
    CancelRetry,
    /// Drop the open channel and abandon any in-flight attempt.
    CloseChannel,
    EmitError(ClientError),
    StateChanged(SessionState),
}

/// Reconnect state machine for one client session.
#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    state: SessionState,
    attempt: u32,
    target: Option<(String, String)>,
    policy: RetryPolicy,
    connect_timeout: Duration,
}

impl ReconnectMachine {
    #[must_use]
    pub fn new(policy: RetryPolicy, connect_timeout: Duration) -> Self {
        Self {
            state: SessionState::Idle,
            attempt: 0,
            target: None,
            policy,
            connect_timeout,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Retries scheduled since the channel was last open.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Apply one input and return the resulting effects, in order.
    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        match input {
            Input::Connect {
                meeting_id,
                participant_id,
            } => self.on_connect(meeting_id, participant_id),
            Input::Opened => self.on_opened(),
            Input::ConnectFailed(reason) => {
                if self.state == SessionState::Connecting {
                    let mut effects = vec![Effect::EmitError(ClientError::ConnectFailed(reason))];
                    effects.extend(self.on_abnormal_close(None, false));
                    effects
                } else {
                    Vec::new()
                }
            }
            Input::ConnectTimedOut => self.on_timeout(),
            Input::Closed { code } => self.on_closed(code),
            Input::RetryTimerFired => self.on_retry_timer(),
            Input::Disconnect => self.on_disconnect(),
        }
    }

    fn transition(&mut self, state: SessionState, effects: &mut Vec<Effect>) {
        self.state = state;
        effects.push(Effect::StateChanged(state));
    }

    fn open_effects(&mut self, effects: &mut Vec<Effect>) {
        if let Some((meeting_id, participant_id)) = self.target.clone() {
            effects.push(Effect::OpenChannel {
                meeting_id,
                participant_id,
            });
            effects.push(Effect::StartConnectTimer(self.connect_timeout));
            self.transition(SessionState::Connecting, effects);
        }
    }

    fn on_connect(&mut self, meeting_id: String, participant_id: String) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.state {
            SessionState::Connecting | SessionState::Open => {}
            SessionState::ClosedAbnormal => {
                effects.push(Effect::CancelRetry);
                self.attempt = 0;
                self.target = Some((meeting_id, participant_id));
                self.open_effects(&mut effects);
            }
            SessionState::Idle | SessionState::ClosedClean | SessionState::Failed(_) => {
                self.attempt = 0;
                self.target = Some((meeting_id, participant_id));
                self.open_effects(&mut effects);
            }
        }
        effects
    }

    fn on_opened(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.state == SessionState::Connecting {
            self.attempt = 0;
            effects.push(Effect::CancelConnectTimer);
            self.transition(SessionState::Open, &mut effects);
        } else {
            // Late open from an abandoned attempt.
            effects.push(Effect::CloseChannel);
        }
        effects
    }

    fn on_timeout(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.state == SessionState::Connecting {
            effects.push(Effect::CloseChannel);
            effects.push(Effect::EmitError(ClientError::ConnectionTimeout));
            self.transition(SessionState::Failed(FailureReason::Timeout), &mut effects);
        }
        effects
    }

    fn on_closed(&mut self, code: Option<u16>) -> Vec<Effect> {
        if code == Some(CLOSE_NORMAL) {
            let mut effects = Vec::new();
            if matches!(self.state, SessionState::Open | SessionState::Connecting) {
                effects.push(Effect::CancelConnectTimer);
                self.attempt = 0;
                self.transition(SessionState::ClosedClean, &mut effects);
            }
            return effects;
        }
        self.on_abnormal_close(code, true)
    }

    fn on_abnormal_close(&mut self, code: Option<u16>, report: bool) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.state {
            SessionState::Open
            | SessionState::Connecting
            | SessionState::Failed(FailureReason::Timeout) => {}
            _ => return effects,
        }

        if self.state == SessionState::Connecting {
            effects.push(Effect::CancelConnectTimer);
        }
        if report {
            effects.push(Effect::EmitError(ClientError::AbnormalClose { code }));
        }

        if self.attempt >= self.policy.max_attempts {
            effects.push(Effect::EmitError(ClientError::MaxRetriesExceeded {
                attempts: self.attempt,
            }));
            self.transition(SessionState::Failed(FailureReason::MaxAttempts), &mut effects);
            return effects;
        }

        let delay = self.policy.delay_for(self.attempt);
        self.attempt += 1;
        self.transition(SessionState::ClosedAbnormal, &mut effects);
        effects.push(Effect::ScheduleRetry(delay));
        effects
    }

    fn on_retry_timer(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.state == SessionState::ClosedAbnormal {
            self.open_effects(&mut effects);
        }
        effects
    }

    fn on_disconnect(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if matches!(self.state, SessionState::Idle | SessionState::ClosedClean) {
            return effects;
        }
        effects.push(Effect::CancelRetry);
        effects.push(Effect::CancelConnectTimer);
        effects.push(Effect::CloseChannel);
        self.attempt = 0;
        self.transition(SessionState::ClosedClean, &mut effects);
        effects
    }
}
