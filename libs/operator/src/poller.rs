//! Generic predicate-driven polling with timeouts.
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug)]
pub struct PollOptions {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    TimedOut,
    Cancelled,
}

/// Drives `predicate` on a schedule until it returns `true`, `cancel` is
/// triggered, or `opts.timeout` elapses.
///
/// Used by `host::reconcile_host` to await ClickHouse version availability
/// (`skip_stopped=true` is the caller's concern, expressed by simply not
/// calling this for a stopped host).
pub async fn poll<F, Fut>(
    opts: PollOptions,
    cancel: &CancellationToken,
    mut predicate: F,
) -> PollOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + opts.timeout;
    loop {
        if cancel.is_cancelled() {
            return PollOutcome::Cancelled;
        }
        if predicate().await {
            return PollOutcome::Ready;
        }
        if tokio::time::Instant::now() >= deadline {
            return PollOutcome::TimedOut;
        }
        tokio::select! {
            _ = tokio::time::sleep(opts.interval) => {}
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn succeeds_once_predicate_is_true() {
        let calls = AtomicUsize::new(0);
        let cancel = CancellationToken::new();
        let opts = PollOptions {
            interval: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        };
        let outcome = poll(opts, &cancel, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { n >= 2 }
        })
        .await;
        assert_eq!(outcome, PollOutcome::Ready);
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn times_out_when_predicate_never_succeeds() {
        let cancel = CancellationToken::new();
        let opts = PollOptions {
            interval: Duration::from_millis(1),
            timeout: Duration::from_millis(5),
        };
        let outcome = poll(opts, &cancel, || async { false }).await;
        assert_eq!(outcome, PollOutcome::TimedOut);
    }

    #[tokio::test]
    async fn cancellation_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let opts = PollOptions::default();
        let outcome = poll(opts, &cancel, || async { false }).await;
        assert_eq!(outcome, PollOutcome::Cancelled);
    }
}
