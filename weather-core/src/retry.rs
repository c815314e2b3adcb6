use std::{future::Future, time::Duration};

use tracing::warn;

/// Outcome of a single attempt that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Worth another attempt: timeouts, connection errors, 5xx and friends.
    Transient(String),
    /// Retrying would not help: malformed bodies, 4xx, missing fields.
    Permanent(String),
}

/// Bounded retry with a fixed delay between attempts.
///
/// Sleeps on the tokio timer, so tests can drive it with a paused clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    /// One retry, 300ms apart.
    fn default() -> Self {
        Self {
            max_attempts: 2,
            delay: Duration::from_millis(300),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), delay }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Worst-case wall time of a call whose attempts are each bounded by
    /// `per_attempt`.
    pub fn budget(&self, per_attempt: Duration) -> Duration {
        let attempts = self.max_attempts.max(1);
        per_attempt * attempts + self.delay * (attempts - 1)
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    /// `label` only feeds the log line.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, Failure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Failure>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(Failure::Transient(msg)) if attempt < attempts => {
                    warn!(%label, attempt, error = %msg, "transient failure, retrying");
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };
    use tokio::time::Instant;

    fn counting_op(
        calls: Arc<AtomicU32>,
        script: Vec<Result<u32, Failure>>,
    ) -> impl FnMut() -> std::future::Ready<Result<u32, Failure>> {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) as usize;
            std::future::ready(script[n.min(script.len() - 1)].clone())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_once_after_fixed_delay() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();
        let started = Instant::now();

        let out = policy
            .run(
                "test",
                counting_op(calls.clone(), vec![Err(Failure::Transient("reset".into())), Ok(7)]),
            )
            .await;

        assert_eq!(out, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn second_transient_failure_propagates() {
        let calls = Arc::new(AtomicU32::new(0));
        let op = counting_op(calls.clone(), vec![Err(Failure::Transient("timeout".into()))]);
        let out = RetryPolicy::default().run("test", op).await;

        assert_eq!(out, Err(Failure::Transient("timeout".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();
        let op = counting_op(calls.clone(), vec![Err(Failure::Permanent("bad json".into()))]);
        let out = RetryPolicy::default().run("test", op).await;

        assert_eq!(out, Err(Failure::Permanent("bad json".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[test]
    fn budget_covers_every_attempt_and_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.budget(Duration::from_secs(5)), Duration::from_millis(10_300));
        assert_eq!(RetryPolicy::none().budget(Duration::from_secs(5)), Duration::from_secs(5));
    }
}
