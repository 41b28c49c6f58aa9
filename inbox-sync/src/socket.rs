//! Inbox socket: connection lifecycle, heartbeat and request correlation
//! composed into one sans-IO state machine.
//!
//! On every open the socket subscribes to the user's channel and asks the
//! server for its heartbeat configuration.

use crate::config::ConnectionConfig;
use crate::connection::{ConnectionManager, Effect, SocketEvent, SocketState};
use crate::heartbeat::{Heartbeat, Tick};
use crate::protocol::{
    ClientEnvelope, ResponseKind, ServerFrame, ServerResponse, PING_TIMEOUT_CLOSURE,
};
use crate::transaction::TransactionManager;

#[derive(Debug)]
pub struct InboxSocket {
    user_id: String,
    connection: ConnectionManager,
    heartbeat: Heartbeat,
    requests: TransactionManager,
}

impl InboxSocket {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            user_id: config.user_id.clone(),
            connection: ConnectionManager::new(config.backoff()),
            heartbeat: Heartbeat::new(config.ping_interval, config.max_outstanding_pings),
            requests: TransactionManager::new(config.transaction_retention),
        }
    }

    pub fn state(&self) -> SocketState {
        self.connection.state()
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_open()
    }

    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    pub fn requests(&self) -> &TransactionManager {
        &self.requests
    }

    pub fn connect(&mut self) -> Vec<Effect> {
        self.connection.connect()
    }

    pub fn close(&mut self, code: u16, reason: &str) -> Vec<Effect> {
        self.connection.close(code, reason)
    }

    /// Send a request and track it until the server responds.
    pub fn send(&mut self, envelope: ClientEnvelope) -> Vec<Effect> {
        let text = match envelope.encode() {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to encode {:?} request: {e}", envelope.action);
                return Vec::new();
            }
        };
        let effects = self.connection.send(text);
        if !effects.is_empty() {
            if let Err(e) = self.requests.add_outstanding_request(envelope) {
                log::warn!("{e}");
            }
        }
        effects
    }

    pub fn handle_open(&mut self) -> Vec<Effect> {
        let mut effects = self.connection.handle_open();
        if effects.is_empty() {
            return effects;
        }
        self.heartbeat.reset();
        effects.push(Effect::SchedulePing(self.heartbeat.interval()));
        effects.extend(self.send(ClientEnvelope::subscribe(&self.user_id)));
        effects.extend(self.send(ClientEnvelope::get_config()));
        effects
    }

    pub fn handle_text(&mut self, text: &str) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.is_open() {
            effects.push(Effect::SchedulePing(self.heartbeat.interval()));
        }

        let frame = match ServerFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Ignoring undecodable frame: {e}");
                return effects;
            }
        };

        match frame {
            ServerFrame::Response(response) => effects.extend(self.handle_response(response)),
            ServerFrame::Action(action) => {
                // Server pings bypass request tracking; the pong echoes the tid.
                match ClientEnvelope::pong(action.tid).encode() {
                    Ok(text) => effects.extend(self.connection.send(text)),
                    Err(e) => log::error!("Failed to encode pong: {e}"),
                }
            }
            ServerFrame::Reconnect(directive) => {
                effects.push(Effect::CancelPing);
                effects.extend(self.connection.handle_reconnect(&directive));
            }
            ServerFrame::Event(event) => {
                effects.push(Effect::Notify(SocketEvent::Message(event)));
            }
        }
        effects
    }

    fn handle_response(&mut self, response: ServerResponse) -> Vec<Effect> {
        match response.response {
            ResponseKind::Pong => {
                self.heartbeat.handle_pong(response);
                Vec::new()
            }
            ResponseKind::Config => {
                let config = response.heartbeat_config();
                self.complete(response);
                match config {
                    Some(config) => {
                        self.heartbeat.apply_config(config);
                        vec![Effect::SchedulePing(self.heartbeat.interval())]
                    }
                    None => {
                        log::warn!("Config response without heartbeat settings");
                        Vec::new()
                    }
                }
            }
            ResponseKind::Ack => {
                self.complete(response);
                Vec::new()
            }
        }
    }

    fn complete(&mut self, response: ServerResponse) {
        match self.requests.add_response(response) {
            Ok(txn) => log::debug!(
                "{:?} acknowledged in {:?}",
                txn.request.action,
                txn.latency().unwrap_or_default()
            ),
            Err(e) => log::debug!("{e}"),
        }
    }

    pub fn handle_close(&mut self, code: u16, reason: &str) -> Vec<Effect> {
        self.heartbeat.reset();
        self.requests.clear_outstanding_requests();
        let mut effects = vec![Effect::CancelPing];
        effects.extend(self.connection.handle_close(code, reason));
        effects
    }

    pub fn handle_error(&mut self, error: &str) -> Vec<Effect> {
        self.connection.handle_error(error)
    }

    pub fn ping_elapsed(&mut self) -> Vec<Effect> {
        if !self.is_open() {
            return Vec::new();
        }
        match self.heartbeat.tick() {
            Tick::Ping(ping) => match ping.encode() {
                Ok(text) => {
                    let mut effects = self.connection.send(text);
                    effects.push(Effect::SchedulePing(self.heartbeat.interval()));
                    effects
                }
                Err(e) => {
                    log::error!("Failed to encode ping: {e}");
                    Vec::new()
                }
            },
            Tick::Timeout => {
                log::warn!(
                    "{} pings unanswered, closing push socket",
                    self.heartbeat.unanswered()
                );
                let mut effects = vec![Effect::CancelPing];
                effects.extend(self.connection.force_close(PING_TIMEOUT_CLOSURE, "ping timeout"));
                effects
            }
        }
    }

    pub fn retry_elapsed(&mut self) -> Vec<Effect> {
        self.connection.retry_elapsed()
    }
}
