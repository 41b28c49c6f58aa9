//! Client-side liveness checking.
//!
//! While the socket is open a ping is due `ping_interval` after the last
//! inbound frame. Each ping stays outstanding until any pong arrives; once
//! `max_outstanding_pings` are unanswered the next tick reports a timeout
//! instead of pinging again.

use std::time::Duration;

use crate::protocol::{ClientEnvelope, HeartbeatConfig, ServerResponse};
use crate::transaction::TransactionManager;

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_OUTSTANDING_PINGS: u32 = 3;

/// Result of a heartbeat timer firing.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// Send this ping and arm the timer again
    Ping(ClientEnvelope),
    /// Too many pings went unanswered
    Timeout,
}

#[derive(Debug)]
pub struct Heartbeat {
    default_interval: Duration,
    default_max_outstanding: u32,
    interval: Duration,
    max_outstanding: u32,
    pings: TransactionManager,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new(DEFAULT_PING_INTERVAL, DEFAULT_MAX_OUTSTANDING_PINGS)
    }
}

impl Heartbeat {
    pub fn new(interval: Duration, max_outstanding: u32) -> Self {
        Self {
            default_interval: interval,
            default_max_outstanding: max_outstanding,
            interval,
            max_outstanding,
            pings: TransactionManager::default(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_outstanding(&self) -> u32 {
        self.max_outstanding
    }

    pub fn unanswered(&self) -> usize {
        self.pings.outstanding_len()
    }

    /// Apply server-supplied settings for the rest of this connection.
    pub fn apply_config(&mut self, config: HeartbeatConfig) {
        match Duration::try_from_secs_f64(config.ping_interval) {
            Ok(interval) if !interval.is_zero() => self.interval = interval,
            _ => log::warn!("Ignoring ping interval {}", config.ping_interval),
        }
        if config.max_outstanding_pings > 0 {
            self.max_outstanding = config.max_outstanding_pings;
        }
        log::debug!(
            "Heartbeat configured: interval={:?} max_outstanding={}",
            self.interval,
            self.max_outstanding
        );
    }

    pub fn tick(&mut self) -> Tick {
        if self.pings.outstanding_len() >= self.max_outstanding as usize {
            return Tick::Timeout;
        }
        let mut ping = ClientEnvelope::ping();
        if let Some(latency) = self.pings.mean_latency() {
            ping = ping.with_stats(serde_json::json!({
                "latency": latency.as_millis() as u64,
            }));
        }
        if let Err(e) = self.pings.add_outstanding_request(ping.clone()) {
            log::warn!("Failed to track ping: {e}");
        }
        Tick::Ping(ping)
    }

    /// Any pong proves the server is alive, so every outstanding ping is
    /// forgiven.
    pub fn handle_pong(&mut self, response: ServerResponse) {
        if let Err(e) = self.pings.add_response(response) {
            log::debug!("Pong without matching ping: {e}");
        }
        self.pings.clear_outstanding_requests();
    }

    /// Forget per-connection state and fall back to the configured defaults.
    pub fn reset(&mut self) {
        self.interval = self.default_interval;
        self.max_outstanding = self.default_max_outstanding;
        self.pings.clear_outstanding_requests();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ClientAction, ResponseKind};

    fn pong(tid: &str) -> ServerResponse {
        ServerResponse {
            tid: tid.into(),
            response: ResponseKind::Pong,
            data: None,
        }
    }

    fn expect_ping(tick: Tick) -> ClientEnvelope {
        match tick {
            Tick::Ping(envelope) => envelope,
            Tick::Timeout => panic!("Expected a ping"),
        }
    }

    #[test]
    fn test_defaults() {
        let hb = Heartbeat::default();
        assert_eq!(hb.interval(), Duration::from_secs(60));
        assert_eq!(hb.max_outstanding(), 3);
    }

    #[test]
    fn test_timeout_after_max_unanswered() {
        let mut hb = Heartbeat::new(Duration::from_secs(1), 2);
        let first = expect_ping(hb.tick());
        assert_eq!(first.action, ClientAction::Ping);
        expect_ping(hb.tick());
        assert_eq!(hb.unanswered(), 2);
        assert_eq!(hb.tick(), Tick::Timeout);
    }

    #[test]
    fn test_any_pong_resets() {
        let mut hb = Heartbeat::new(Duration::from_secs(1), 2);
        let first = expect_ping(hb.tick());
        expect_ping(hb.tick());

        hb.handle_pong(pong(&first.tid));
        assert_eq!(hb.unanswered(), 0);
        expect_ping(hb.tick());

        hb.handle_pong(pong("unrelated"));
        assert_eq!(hb.unanswered(), 0);
    }

    #[test]
    fn test_latency_reported_in_stats() {
        let mut hb = Heartbeat::default();
        let first = expect_ping(hb.tick());
        assert!(first.stats.is_none());
        hb.handle_pong(pong(&first.tid));

        let second = expect_ping(hb.tick());
        assert!(second.stats.unwrap().get("latency").is_some());
    }

    #[test]
    fn test_config_override_until_reset() {
        let mut hb = Heartbeat::default();
        hb.apply_config(HeartbeatConfig {
            ping_interval: 15.0,
            max_outstanding_pings: 1,
        });
        assert_eq!(hb.interval(), Duration::from_secs(15));
        assert_eq!(hb.max_outstanding(), 1);

        hb.reset();
        assert_eq!(hb.interval(), Duration::from_secs(60));
        assert_eq!(hb.max_outstanding(), 3);
    }

    #[test]
    fn test_huge_ping_interval_ignored() {
        let mut hb = Heartbeat::default();
        hb.apply_config(HeartbeatConfig {
            ping_interval: 1e30,
            max_outstanding_pings: 2,
        });
        assert_eq!(hb.interval(), Duration::from_secs(60));
        assert_eq!(hb.max_outstanding(), 2);
    }

    #[test]
    fn test_invalid_config_ignored() {
        let mut hb = Heartbeat::default();
        hb.apply_config(HeartbeatConfig {
            ping_interval: -4.0,
            max_outstanding_pings: 0,
        });
        assert_eq!(hb.interval(), Duration::from_secs(60));
        assert_eq!(hb.max_outstanding(), 3);
    }
}
