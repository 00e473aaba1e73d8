//! Connection Governor — per-principal connection caps, reconnect backoff,
//! global admission queueing, and ping/pong health tracking.
//!
//! A `Mutex`-guarded session table tracks open connections per principal,
//! a reconnect-timestamp ring buffer per principal drives the exponential
//! backoff, and a FIFO queue holds principals past the system-wide
//! membership cap until a slot frees up.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::ConnectionError;

/// Opaque handle for one open connection, unique for the governor's lifetime.
pub type ConnectionId = u64;

const MAX_CONNECTIONS_PER_PRINCIPAL: usize = 2;
const RECONNECT_WINDOW: Duration = Duration::from_secs(10);
const RECONNECT_STRIKE_THRESHOLD: usize = 3;
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const DEFAULT_MAX_MISSED_PINGS: u32 = 3;

/// Outcome of requesting admission into active room membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// The principal is now counted against the system capacity.
    Admitted,
    /// The system is at capacity; the principal is queued at this position
    /// (0-indexed, 0 meaning "next in line").
    Queued(usize),
}

struct Inner {
    next_id: ConnectionId,
    connections_by_principal: HashMap<i64, HashSet<ConnectionId>>,
    close_history: HashMap<i64, VecDeque<Instant>>,
    backoff_strikes: HashMap<i64, u32>,
    backoff_until: HashMap<i64, Instant>,
    ping_failures: HashMap<ConnectionId, u32>,
    active_principals: HashSet<i64>,
    admission_queue: VecDeque<i64>,
}

/// Tracks connection counts, reconnect backoff, admission queueing, and
/// ping health. One instance is shared across the whole server.
pub struct ConnectionGovernor {
    inner: Mutex<Inner>,
    system_capacity: usize,
    max_missed_pings: u32,
}

impl ConnectionGovernor {
    pub fn new(system_capacity: usize) -> Self {
        Self::with_max_missed_pings(system_capacity, DEFAULT_MAX_MISSED_PINGS)
    }

    /// Same as [`ConnectionGovernor::new`] but with an explicit
    /// `PING_MAX_MISSED` threshold instead of the default of 3.
    pub fn with_max_missed_pings(system_capacity: usize, max_missed_pings: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                connections_by_principal: HashMap::new(),
                close_history: HashMap::new(),
                backoff_strikes: HashMap::new(),
                backoff_until: HashMap::new(),
                ping_failures: HashMap::new(),
                active_principals: HashSet::new(),
                admission_queue: VecDeque::new(),
            }),
            system_capacity,
            max_missed_pings: max_missed_pings.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Registers a new connection for `principal_id`, enforcing the
    /// per-principal cap and any active reconnect backoff.
    pub fn open_connection(&self, principal_id: i64) -> Result<ConnectionId, ConnectionError> {
        let now = Instant::now();
        let mut inner = self.lock();

        if let Some(&until) = inner.backoff_until.get(&principal_id) {
            if now < until {
                return Err(ConnectionError::ReconnectionThrottled(until - now));
            }
            inner.backoff_until.remove(&principal_id);
        }

        let open_count = inner
            .connections_by_principal
            .get(&principal_id)
            .map(|set| set.len())
            .unwrap_or(0);
        if open_count >= MAX_CONNECTIONS_PER_PRINCIPAL {
            return Err(ConnectionError::TooManyConnections);
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .connections_by_principal
            .entry(principal_id)
            .or_default()
            .insert(id);
        Ok(id)
    }

    /// Records that `conn_id` closed for `principal_id`, updating the
    /// reconnect-backoff ring buffer. If 3 or more closes happened within
    /// the last 10 seconds, the next [`open_connection`](Self::open_connection)
    /// call is throttled for `min(1 * 2^n, 60)` seconds.
    pub fn close_connection(&self, principal_id: i64, conn_id: ConnectionId) {
        let now = Instant::now();
        let mut inner = self.lock();

        if let Some(set) = inner.connections_by_principal.get_mut(&principal_id) {
            set.remove(&conn_id);
            if set.is_empty() {
                inner.connections_by_principal.remove(&principal_id);
            }
        }
        inner.ping_failures.remove(&conn_id);

        let history = inner.close_history.entry(principal_id).or_default();
        history.push_back(now);
        while let Some(&front) = history.front() {
            if now.duration_since(front) > RECONNECT_WINDOW {
                history.pop_front();
            } else {
                break;
            }
        }

        if history.len() >= RECONNECT_STRIKE_THRESHOLD {
            let strikes = inner.backoff_strikes.entry(principal_id).or_insert(0);
            let delay_secs = 1u64.checked_shl(*strikes).unwrap_or(u64::MAX);
            let delay = Duration::from_secs(delay_secs).min(MAX_BACKOFF);
            inner.backoff_until.insert(principal_id, now + delay);
            *strikes += 1;
            tracing::warn!(principal_id, delay = ?delay, "imposing reconnect backoff");
        } else {
            inner.backoff_strikes.remove(&principal_id);
        }
    }

    /// Requests admission into active room membership, queueing the
    /// principal FIFO if the system is already at `system_capacity`.
    pub fn admit_or_queue(&self, principal_id: i64) -> AdmissionOutcome {
        let mut inner = self.lock();

        if inner.active_principals.contains(&principal_id) {
            return AdmissionOutcome::Admitted;
        }

        if inner.active_principals.len() < self.system_capacity {
            inner.active_principals.insert(principal_id);
            return AdmissionOutcome::Admitted;
        }

        if !inner.admission_queue.contains(&principal_id) {
            inner.admission_queue.push_back(principal_id);
        }
        let position = inner
            .admission_queue
            .iter()
            .position(|&p| p == principal_id)
            .unwrap_or(0);
        AdmissionOutcome::Queued(position)
    }

    /// Called on every membership teardown: frees the departing principal's
    /// capacity slot and admits the earliest queued waiter, if any.
    pub fn on_departure(&self, principal_id: i64) -> Option<i64> {
        let mut inner = self.lock();
        inner.active_principals.remove(&principal_id);

        let next = inner.admission_queue.pop_front()?;
        inner.active_principals.insert(next);
        Some(next)
    }

    /// Records that `conn_id` missed a scheduled ping. Returns
    /// `ConnectionTimeout` once 3 consecutive pings have gone unanswered.
    pub fn record_missed_ping(&self, conn_id: ConnectionId) -> Result<(), ConnectionError> {
        let mut inner = self.lock();
        let failures = inner.ping_failures.entry(conn_id).or_insert(0);
        *failures += 1;
        if *failures >= self.max_missed_pings {
            inner.ping_failures.remove(&conn_id);
            return Err(ConnectionError::ConnectionTimeout);
        }
        Ok(())
    }

    /// Resets the missed-ping counter for `conn_id` on a received pong.
    pub fn record_pong(&self, conn_id: ConnectionId) {
        let mut inner = self.lock();
        inner.ping_failures.insert(conn_id, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_connections_per_principal() {
        let gov = ConnectionGovernor::new(100);
        gov.open_connection(1).unwrap();
        gov.open_connection(1).unwrap();
        let err = gov.open_connection(1).unwrap_err();
        assert_eq!(err, ConnectionError::TooManyConnections);
    }

    #[test]
    fn closing_frees_a_slot() {
        let gov = ConnectionGovernor::new(100);
        let a = gov.open_connection(1).unwrap();
        gov.open_connection(1).unwrap();
        gov.close_connection(1, a);
        assert!(gov.open_connection(1).is_ok());
    }

    #[test]
    fn three_closes_in_window_trigger_backoff() {
        let gov = ConnectionGovernor::new(100);
        for _ in 0..3 {
            let id = gov.open_connection(1).unwrap();
            gov.close_connection(1, id);
        }
        let err = gov.open_connection(1).unwrap_err();
        assert!(matches!(err, ConnectionError::ReconnectionThrottled(_)));
    }

    #[test]
    fn admits_up_to_capacity_then_queues() {
        let gov = ConnectionGovernor::new(2);
        assert_eq!(gov.admit_or_queue(1), AdmissionOutcome::Admitted);
        assert_eq!(gov.admit_or_queue(2), AdmissionOutcome::Admitted);
        assert_eq!(gov.admit_or_queue(3), AdmissionOutcome::Queued(0));
    }

    #[test]
    fn departure_admits_earliest_waiter() {
        let gov = ConnectionGovernor::new(1);
        gov.admit_or_queue(1);
        gov.admit_or_queue(2);
        let admitted = gov.on_departure(1);
        assert_eq!(admitted, Some(2));
    }

    #[test]
    fn repeated_admission_is_idempotent() {
        let gov = ConnectionGovernor::new(2);
        assert_eq!(gov.admit_or_queue(1), AdmissionOutcome::Admitted);
        assert_eq!(gov.admit_or_queue(1), AdmissionOutcome::Admitted);
    }

    #[test]
    fn three_missed_pings_time_out() {
        let gov = ConnectionGovernor::new(100);
        let conn = gov.open_connection(1).unwrap();
        assert!(gov.record_missed_ping(conn).is_ok());
        assert!(gov.record_missed_ping(conn).is_ok());
        let err = gov.record_missed_ping(conn).unwrap_err();
        assert_eq!(err, ConnectionError::ConnectionTimeout);
    }

    #[test]
    fn pong_resets_missed_ping_count() {
        let gov = ConnectionGovernor::new(100);
        let conn = gov.open_connection(1).unwrap();
        gov.record_missed_ping(conn).unwrap();
        gov.record_missed_ping(conn).unwrap();
        gov.record_pong(conn);
        assert!(gov.record_missed_ping(conn).is_ok());
        assert!(gov.record_missed_ping(conn).is_ok());
    }

    #[test]
    fn configurable_missed_ping_threshold_is_honored() {
        let gov = ConnectionGovernor::with_max_missed_pings(100, 1);
        let conn = gov.open_connection(1).unwrap();
        let err = gov.record_missed_ping(conn).unwrap_err();
        assert_eq!(err, ConnectionError::ConnectionTimeout);
    }
}
