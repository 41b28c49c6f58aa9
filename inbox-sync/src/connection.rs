//! Connection lifecycle state machine.
//!
//! Pure logic, no I/O: every input returns the [`Effect`]s the driver must
//! perform (dial, write a frame, arm a timer, notify listeners). This keeps
//! the reconnect rules testable without a socket or a clock.
//!
//! Reconnect rules:
//! - a close with code 1000, or any close the application asked for, is final
//! - a close whose reason carries `{"Retry-After": "<s>"}` retries after `<s>`
//! - any other close or error retries on the backoff schedule
//! - a server reconnect directive closes with 1000 and retries after its delay
//! - at most one retry is pending at a time

use std::time::Duration;

use crate::backoff::Backoff;
use crate::protocol::{parse_retry_after, MessageEvent, ReconnectDirective, NORMAL_CLOSURE};

/// Socket lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
}

/// Notifications delivered to lifecycle listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Opened,
    Closed { code: u16, reason: String },
    Error(String),
    /// The backoff schedule ran out; no further reconnects will happen
    RetriesExhausted,
    Message(MessageEvent),
}

/// Work the driver must carry out.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Dial the server
    Open,
    /// Write a text frame
    Send(String),
    /// Send a close frame and drop the transport
    Close { code: u16, reason: String },
    ScheduleRetry(Duration),
    CancelRetry,
    SchedulePing(Duration),
    CancelPing,
    Notify(SocketEvent),
}

#[derive(Debug)]
pub struct ConnectionManager {
    state: SocketState,
    backoff: Backoff,
    /// Consecutive failed attempts since the last successful open
    attempt: usize,
    /// Set by [`ConnectionManager::close`]; suppresses reconnects
    app_close: bool,
    retry_pending: bool,
}

impl ConnectionManager {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: SocketState::Idle,
            backoff,
            attempt: 0,
            app_close: false,
            retry_pending: false,
        }
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SocketState::Open
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    /// Start connecting. A no-op while a socket already exists.
    pub fn connect(&mut self) -> Vec<Effect> {
        if self.state != SocketState::Idle {
            log::debug!("connect ignored, socket is {:?}", self.state);
            return Vec::new();
        }
        let mut effects = Vec::new();
        if self.retry_pending {
            self.retry_pending = false;
            effects.push(Effect::CancelRetry);
        }
        self.app_close = false;
        self.state = SocketState::Connecting;
        effects.push(Effect::Open);
        effects
    }

    /// Application-initiated close. Cancels any pending retry and
    /// suppresses reconnection until the next [`connect`](Self::connect).
    pub fn close(&mut self, code: u16, reason: &str) -> Vec<Effect> {
        self.app_close = true;
        let mut effects = Vec::new();
        if self.retry_pending {
            self.retry_pending = false;
            effects.push(Effect::CancelRetry);
        }
        match self.state {
            SocketState::Open | SocketState::Connecting => {
                self.state = SocketState::Closing;
                effects.push(Effect::Close {
                    code,
                    reason: reason.to_string(),
                });
            }
            SocketState::Idle | SocketState::Closing => {}
        }
        effects
    }

    /// Close the transport without marking it as application-initiated,
    /// so the usual reconnect rules still apply.
    pub fn force_close(&mut self, code: u16, reason: &str) -> Vec<Effect> {
        if !matches!(self.state, SocketState::Open | SocketState::Connecting) {
            return Vec::new();
        }
        self.state = SocketState::Closing;
        vec![Effect::Close {
            code,
            reason: reason.to_string(),
        }]
    }

    /// Write a frame if open; otherwise the frame is dropped.
    pub fn send(&mut self, text: String) -> Vec<Effect> {
        if self.state != SocketState::Open {
            log::warn!("Dropping outbound frame, socket is {:?}", self.state);
            return Vec::new();
        }
        vec![Effect::Send(text)]
    }

    pub fn handle_open(&mut self) -> Vec<Effect> {
        if self.state != SocketState::Connecting {
            log::debug!("open ignored, socket is {:?}", self.state);
            return Vec::new();
        }
        self.state = SocketState::Open;
        self.attempt = 0;
        log::info!("Push socket open");
        vec![Effect::Notify(SocketEvent::Opened)]
    }

    pub fn handle_close(&mut self, code: u16, reason: &str) -> Vec<Effect> {
        if self.state == SocketState::Idle {
            return Vec::new();
        }
        self.state = SocketState::Idle;
        log::info!("Push socket closed: code={code} reason={reason:?}");

        let mut effects = vec![Effect::Notify(SocketEvent::Closed {
            code,
            reason: reason.to_string(),
        })];
        if self.app_close || code == NORMAL_CLOSURE {
            return effects;
        }
        effects.extend(self.schedule_retry(parse_retry_after(reason)));
        effects
    }

    pub fn handle_error(&mut self, error: &str) -> Vec<Effect> {
        log::warn!("Push socket error: {error}");
        let mut effects = vec![Effect::Notify(SocketEvent::Error(error.to_string()))];
        if self.state == SocketState::Connecting {
            self.state = SocketState::Idle;
        }
        if !self.app_close {
            effects.extend(self.schedule_retry(None));
        }
        effects
    }

    /// Server asked us to go away and come back after a delay.
    pub fn handle_reconnect(&mut self, directive: &ReconnectDirective) -> Vec<Effect> {
        log::info!(
            "Server requested reconnect in {:?}: {}",
            directive.retry_after(),
            directive.message
        );
        let mut effects = self.force_close(NORMAL_CLOSURE, &directive.message);
        effects.extend(self.schedule_retry(Some(directive.retry_after())));
        effects
    }

    /// The pending retry timer fired.
    pub fn retry_elapsed(&mut self) -> Vec<Effect> {
        if !self.retry_pending {
            return Vec::new();
        }
        self.retry_pending = false;
        if self.app_close {
            return Vec::new();
        }
        self.connect()
    }

    fn schedule_retry(&mut self, hint: Option<Duration>) -> Vec<Effect> {
        if self.retry_pending {
            log::debug!("Retry already pending");
            return Vec::new();
        }
        let delay = match hint {
            Some(delay) => delay,
            None => match self.backoff.delay_for(self.attempt) {
                Some(delay) => {
                    self.attempt += 1;
                    delay
                }
                None => {
                    log::error!(
                        "Giving up on push socket after {} reconnect attempts",
                        self.attempt
                    );
                    return vec![Effect::Notify(SocketEvent::RetriesExhausted)];
                }
            },
        };
        log::debug!("Reconnecting in {delay:?}");
        self.retry_pending = true;
        vec![Effect::ScheduleRetry(delay)]
    }
}
