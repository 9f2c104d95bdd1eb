//! Retry/backoff policy for tool dispatch. New plumbing — see
//! `DESIGN.md`'s C6 entry: the teacher has no generic exponential-backoff
//! helper, only sqlite cron scheduling (`agent/cron_runner.rs`) and a
//! fixed-interval ngrok poll (`tunnel/ngrok.rs`).

use std::time::Duration;

use rand::Rng;

use crate::error::AgentError;

pub const MAX_RETRIES: u32 = 3;
const BASE_MS: u64 = 500;
const CAP_MS: u64 = 8000;

/// `min(500 * 2^attempt, 8000)ms` plus up to 1s of jitter, so concurrent
/// retries from many conversations don't all land on the same tick.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = BASE_MS.saturating_mul(1u64 << attempt.min(16));
    let base = exp.min(CAP_MS);
    let jitter = rand::rng().random_range(0..1000);
    Duration::from_millis(base + jitter)
}

/// Non-retryable: any 4xx other than 408/429, plus validation failures.
/// `AgentError::is_retryable` already encodes exactly this policy (rate
/// limits, dependency/LLM/timeout/http failures retry; bad request,
/// forbidden, not-found, policy violations do not).
pub fn is_retryable_for_orchestrator(err: &AgentError) -> bool {
    err.is_retryable()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_then_caps() {
        let d0 = backoff_delay(0).as_millis();
        let d3 = backoff_delay(3).as_millis();
        let d10 = backoff_delay(10).as_millis();
        assert!(d0 >= 500 && d0 < 1500);
        assert!(d3 >= 4000 && d3 < 5000);
        assert!(d10 >= 8000 && d10 < 9000);
    }

    #[test]
    fn retryable_matches_agent_error_policy() {
        assert!(is_retryable_for_orchestrator(&AgentError::Timeout("x".into())));
        assert!(is_retryable_for_orchestrator(&AgentError::ServiceUnavailable("x".into())));
        assert!(!is_retryable_for_orchestrator(&AgentError::BadRequest("x".into())));
        assert!(!is_retryable_for_orchestrator(&AgentError::ToolNotFound("x".into())));
    }
}
