//! Rate Limit Engine — fixed-window counters with sticky block-on-exceed.
//!
//! A `Mutex<HashMap>` keyed by `(principal_id, action)` tracks one counter
//! window per key, with periodic eviction once the table grows large. This
//! is a strict fixed window rather than a sliding approximation, and it
//! also remembers a "sticky" block once a key exceeds its limit — a caller
//! who trips the limit stays denied for the policy's block duration even
//! after the window rolls over, rather than being allowed to burst again at
//! the window boundary.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use studyhall_types::Action;

/// (limit, window, block-on-exceed) for one action.
#[derive(Debug, Clone, Copy)]
struct Policy {
    limit: u32,
    window: Duration,
    block: Duration,
}

fn policy_for(action: Action) -> Policy {
    match action {
        Action::Api => Policy {
            limit: 100,
            window: Duration::from_secs(60),
            block: Duration::from_secs(60),
        },
        Action::IdentityCreate => Policy {
            limit: 5,
            window: Duration::from_secs(60),
            block: Duration::from_secs(60),
        },
        Action::JoinAttempt => Policy {
            limit: 5,
            window: Duration::from_secs(60),
            block: Duration::from_secs(300),
        },
        Action::ChatSend => Policy {
            limit: 10,
            window: Duration::from_secs(60),
            block: Duration::from_secs(30),
        },
    }
}

#[derive(Debug, Clone)]
struct WindowState {
    count: u32,
    window_start: Instant,
    blocked_until: Option<Instant>,
}

/// Outcome of a [`RateLimitEngine::check`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckResult {
    pub allowed: bool,
    pub remaining: u32,
    /// How long until the caller may try again; zero when `allowed`.
    pub retry_after: Duration,
    /// How long until this counter's window (or sticky block) clears,
    /// surfaced to clients as `X-RateLimit-Reset` regardless of outcome.
    pub reset_after: Duration,
}

/// Principals and their rate-limited actions, one counter per
/// `(principal_id, Action)` pair.
#[derive(Debug)]
pub struct RateLimitEngine {
    state: Mutex<HashMap<(i64, Action), WindowState>>,
}

impl RateLimitEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Checks and increments the counter for `(principal_id, action)`.
    ///
    /// A counter at or past its sticky block returns `denied` without
    /// incrementing. Otherwise the counter increments; exceeding the
    /// policy's limit sets a sticky block for the policy's block duration
    /// and returns `denied`.
    pub fn check(&self, principal_id: i64, action: Action) -> CheckResult {
        let policy = policy_for(action);
        let now = Instant::now();
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if state.len() > 10_000 {
            state.retain(|_, ws| {
                now.duration_since(ws.window_start) <= policy.window + policy.block
            });
        }

        let ws = state.entry((principal_id, action)).or_insert(WindowState {
            count: 0,
            window_start: now,
            blocked_until: None,
        });

        if let Some(blocked_until) = ws.blocked_until {
            if now < blocked_until {
                return CheckResult {
                    allowed: false,
                    remaining: 0,
                    retry_after: blocked_until - now,
                    reset_after: blocked_until - now,
                };
            }
            ws.blocked_until = None;
        }

        if now.duration_since(ws.window_start) >= policy.window {
            ws.window_start = now;
            ws.count = 0;
        }

        ws.count += 1;

        if ws.count > policy.limit {
            let blocked_until = now + policy.block;
            ws.blocked_until = Some(blocked_until);
            tracing::warn!(
                principal_id,
                action = action.as_str(),
                "rate limit exceeded, imposing sticky block"
            );
            return CheckResult {
                allowed: false,
                remaining: 0,
                retry_after: policy.block,
                reset_after: policy.block,
            };
        }

        CheckResult {
            allowed: true,
            remaining: policy.limit - ws.count,
            retry_after: Duration::ZERO,
            reset_after: policy.window.saturating_sub(now.duration_since(ws.window_start)),
        }
    }

    /// Extends the sticky block for `(principal_id, action)` by the
    /// policy's block duration, logging the repeat offense. Used when a
    /// caller is judged abusive by a signal outside the counter itself
    /// (for example, a request flagged as `MALICIOUS_INPUT`).
    pub fn record_violation(&self, principal_id: i64, action: Action) {
        let policy = policy_for(action);
        let now = Instant::now();
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let ws = state.entry((principal_id, action)).or_insert(WindowState {
            count: 0,
            window_start: now,
            blocked_until: None,
        });

        let base = ws.blocked_until.filter(|&b| b > now).unwrap_or(now);
        ws.blocked_until = Some(base + policy.block);
        tracing::warn!(
            principal_id,
            action = action.as_str(),
            "recording rate-limit violation, extending sticky block"
        );
    }
}

impl Default for RateLimitEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_within_limit() {
        let engine = RateLimitEngine::new();
        for _ in 0..10 {
            let result = engine.check(1, Action::ChatSend);
            assert!(result.allowed);
        }
    }

    #[test]
    fn denies_past_limit_and_sets_block() {
        let engine = RateLimitEngine::new();
        for _ in 0..10 {
            assert!(engine.check(1, Action::ChatSend).allowed);
        }
        let result = engine.check(1, Action::ChatSend);
        assert!(!result.allowed);
        assert!(result.retry_after > Duration::ZERO);
    }

    #[test]
    fn denies_without_incrementing_while_blocked() {
        let engine = RateLimitEngine::new();
        for _ in 0..10 {
            engine.check(1, Action::ChatSend);
        }
        let first_block = engine.check(1, Action::ChatSend);
        let second_block = engine.check(1, Action::ChatSend);
        assert!(!first_block.allowed && !second_block.allowed);
        // Both refer to the same sticky block, so retry_after should not grow.
        assert!(second_block.retry_after <= first_block.retry_after);
    }

    #[test]
    fn keys_are_independent_by_principal_and_action() {
        let engine = RateLimitEngine::new();
        for _ in 0..10 {
            engine.check(1, Action::ChatSend);
        }
        assert!(!engine.check(1, Action::ChatSend).allowed);
        assert!(engine.check(2, Action::ChatSend).allowed);
        assert!(engine.check(1, Action::Api).allowed);
    }

    #[test]
    fn record_violation_extends_block() {
        let engine = RateLimitEngine::new();
        engine.record_violation(1, Action::JoinAttempt);
        let result = engine.check(1, Action::JoinAttempt);
        assert!(!result.allowed);
        assert!(result.retry_after > Duration::from_secs(250));
    }

    #[test]
    fn policies_differ_by_action() {
        let engine = RateLimitEngine::new();
        for _ in 0..5 {
            assert!(engine.check(1, Action::IdentityCreate).allowed);
        }
        assert!(!engine.check(1, Action::IdentityCreate).allowed);

        for _ in 0..5 {
            assert!(engine.check(2, Action::JoinAttempt).allowed);
        }
        assert!(!engine.check(2, Action::JoinAttempt).allowed);
    }
}
