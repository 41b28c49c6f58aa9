//! Request/response correlation by transaction id.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::protocol::{ClientEnvelope, ServerResponse};

/// Default number of completed transactions kept for latency stats.
pub const DEFAULT_RETENTION: usize = 10;

/// One request and, once it arrives, its response.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub request: ClientEnvelope,
    pub response: Option<ServerResponse>,
    pub start: Instant,
    pub end: Option<Instant>,
}

impl Transaction {
    fn new(request: ClientEnvelope) -> Self {
        Self {
            request,
            response: None,
            start: Instant::now(),
            end: None,
        }
    }

    pub fn latency(&self) -> Option<Duration> {
        self.end.map(|end| end.duration_since(self.start))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    #[error("Duplicate transaction id: {0}")]
    Duplicate(String),
    #[error("No outstanding request for transaction id: {0}")]
    NotFound(String),
}

/// Tracks outstanding requests and a bounded history of completed ones.
#[derive(Debug)]
pub struct TransactionManager {
    outstanding: HashMap<String, Transaction>,
    completed: VecDeque<Transaction>,
    retention: usize,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl TransactionManager {
    pub fn new(retention: usize) -> Self {
        Self {
            outstanding: HashMap::new(),
            completed: VecDeque::with_capacity(retention),
            retention,
        }
    }

    pub fn add_outstanding_request(
        &mut self,
        request: ClientEnvelope,
    ) -> Result<(), TransactionError> {
        if self.outstanding.contains_key(&request.tid) {
            return Err(TransactionError::Duplicate(request.tid));
        }
        self.outstanding
            .insert(request.tid.clone(), Transaction::new(request));
        Ok(())
    }

    /// Complete the request matching `response.tid` and return it.
    pub fn add_response(
        &mut self,
        response: ServerResponse,
    ) -> Result<Transaction, TransactionError> {
        let Some(mut transaction) = self.outstanding.remove(&response.tid) else {
            return Err(TransactionError::NotFound(response.tid));
        };
        transaction.end = Some(Instant::now());
        transaction.response = Some(response);

        if self.retention > 0 {
            if self.completed.len() == self.retention {
                self.completed.pop_front();
            }
            self.completed.push_back(transaction.clone());
        }
        Ok(transaction)
    }

    pub fn clear_outstanding_requests(&mut self) {
        self.outstanding.clear();
    }

    pub fn outstanding_len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_outstanding(&self, tid: &str) -> bool {
        self.outstanding.contains_key(tid)
    }

    /// Completed transactions, oldest first.
    pub fn completed(&self) -> impl Iterator<Item = &Transaction> {
        self.completed.iter()
    }

    /// Mean latency over the retained completed transactions.
    pub fn mean_latency(&self) -> Option<Duration> {
        let latencies: Vec<Duration> = self.completed.iter().filter_map(Transaction::latency).collect();
        if latencies.is_empty() {
            return None;
        }
        let total: Duration = latencies.iter().sum();
        Some(total / latencies.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ResponseKind;

    fn response_for(request: &ClientEnvelope) -> ServerResponse {
        ServerResponse {
            tid: request.tid.clone(),
            response: ResponseKind::Pong,
            data: None,
        }
    }

    #[test]
    fn test_correlates_response() {
        let mut txns = TransactionManager::default();
        let ping = ClientEnvelope::ping();
        txns.add_outstanding_request(ping.clone()).unwrap();
        assert_eq!(txns.outstanding_len(), 1);

        let done = txns.add_response(response_for(&ping)).unwrap();
        assert_eq!(done.request, ping);
        assert!(done.latency().is_some());
        assert_eq!(txns.outstanding_len(), 0);
        assert_eq!(txns.completed().count(), 1);
        assert!(txns.mean_latency().is_some());
    }

    #[test]
    fn test_duplicate_tid_rejected() {
        let mut txns = TransactionManager::default();
        let ping = ClientEnvelope::ping();
        txns.add_outstanding_request(ping.clone()).unwrap();
        assert_eq!(
            txns.add_outstanding_request(ping.clone()),
            Err(TransactionError::Duplicate(ping.tid))
        );
    }

    #[test]
    fn test_unknown_response() {
        let mut txns = TransactionManager::default();
        let err = txns
            .add_response(response_for(&ClientEnvelope::ping()))
            .unwrap_err();
        assert!(matches!(err, TransactionError::NotFound(_)));
        assert!(err.to_string().contains("No outstanding request"));
    }

    #[test]
    fn test_retention_bound() {
        let mut txns = TransactionManager::new(3);
        let mut tids = Vec::new();
        for _ in 0..5 {
            let ping = ClientEnvelope::ping();
            tids.push(ping.tid.clone());
            txns.add_outstanding_request(ping.clone()).unwrap();
            txns.add_response(response_for(&ping)).unwrap();
        }
        let kept: Vec<_> = txns.completed().map(|t| t.request.tid.clone()).collect();
        assert_eq!(kept, tids[2..].to_vec());
    }

    #[test]
    fn test_clear_outstanding() {
        let mut txns = TransactionManager::default();
        let ping = ClientEnvelope::ping();
        txns.add_outstanding_request(ping.clone()).unwrap();
        txns.clear_outstanding_requests();
        assert!(!txns.is_outstanding(&ping.tid));
        assert!(txns.add_response(response_for(&ping)).is_err());
    }
}
