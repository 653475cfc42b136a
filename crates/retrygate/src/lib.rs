//! A predictable, callback-driven attempt/retry/success/failure loop.
//!
//! Used by the servicer to self-verify it is reachable right after boot, and
//! generically reusable for any transient-connection wait. Any error raised
//! by the predicate is swallowed and treated exactly like a `false` result -
//! this is intentional, not a bug: predicates are expected to fail
//! transiently, and this loop is their buffer so the caller never has to
//! sort transport noise from a genuine "still not ready".

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub const DEFAULT_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Optional lifecycle hooks. All are skipped silently when absent.
#[derive(Default)]
pub struct Callbacks {
    pub on_try: Option<Box<dyn FnMut(u32, u32) + Send>>,
    pub on_retry: Option<Box<dyn FnMut(u32, u32) + Send>>,
    pub on_success: Option<Box<dyn FnMut(u32, u32) + Send>>,
    pub on_failure: Option<Box<dyn FnMut(u32, u32) + Send>>,
}

/// Attempts `predicate` up to `max_attempts` times, waiting `delay` between
/// attempts. Returns `true` on the first successful attempt, `false` once
/// attempts are exhausted. Observes `cancel` at the sleep point only.
pub async fn try_connection<P, Fut>(
    mut predicate: P,
    delay: Option<Duration>,
    max_attempts: Option<u32>,
    mut callbacks: Callbacks,
    cancel: Option<&CancellationToken>,
) -> bool
where
    P: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, BoxError>>,
{
    let delay = delay.unwrap_or(DEFAULT_DELAY);
    let max_attempts = max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);

    let mut i = 0u32;
    while i < max_attempts {
        if let Some(cb) = callbacks.on_try.as_mut() {
            cb(i, max_attempts);
        }

        let succeeded = match predicate().await {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!(attempt = i, error = %e, "retry predicate raised, treated as failed attempt");
                false
            }
        };

        if succeeded {
            if let Some(cb) = callbacks.on_success.as_mut() {
                cb(i, max_attempts);
            }
            return true;
        }

        i += 1;
        if i < max_attempts {
            if let Some(cb) = callbacks.on_retry.as_mut() {
                cb(i, max_attempts);
            }
            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = token.cancelled() => return false,
                    }
                }
                None => sleep(delay).await,
            }
        }
    }

    if let Some(cb) = callbacks.on_failure.as_mut() {
        cb(max_attempts, max_attempts);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    enum Event {
        Try(u32, u32),
        Retry(u32, u32),
        Success(u32, u32),
        Failure(u32, u32),
    }

    fn recording_callbacks(log: Arc<Mutex<Vec<Event>>>) -> Callbacks {
        let l1 = log.clone();
        let l2 = log.clone();
        let l3 = log.clone();
        let l4 = log.clone();
        Callbacks {
            on_try: Some(Box::new(move |i, n| l1.lock().unwrap().push(Event::Try(i, n)))),
            on_retry: Some(Box::new(move |i, n| l2.lock().unwrap().push(Event::Retry(i, n)))),
            on_success: Some(Box::new(move |i, n| l3.lock().unwrap().push(Event::Success(i, n)))),
            on_failure: Some(Box::new(move |i, n| l4.lock().unwrap().push(Event::Failure(i, n)))),
        }
    }

    #[tokio::test]
    async fn succeeds_on_exact_attempt() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let attempt = Arc::new(Mutex::new(0u32));
        let k = 2u32;
        let ok = try_connection(
            {
                let attempt = attempt.clone();
                move || {
                    let attempt = attempt.clone();
                    async move {
                        let mut a = attempt.lock().unwrap();
                        let result = *a == k;
                        *a += 1;
                        Ok(result)
                    }
                }
            },
            Some(Duration::from_millis(1)),
            Some(5),
            recording_callbacks(log.clone()),
            None,
        )
        .await;

        assert!(ok);
        let events = log.lock().unwrap().clone();
        let tries: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, Event::Try(_, _)))
            .collect();
        assert_eq!(tries.len(), 3); // try(0), try(1), try(2)
        assert!(matches!(events.last(), Some(Event::Success(2, 5))));
    }

    #[tokio::test]
    async fn exhausts_attempts_with_expected_trace() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ok = try_connection(
            || async { Ok(false) },
            Some(Duration::from_millis(1)),
            Some(3),
            recording_callbacks(log.clone()),
            None,
        )
        .await;

        assert!(!ok);
        let events = log.lock().unwrap().clone();
        let kinds: Vec<&'static str> = events
            .iter()
            .map(|e| match e {
                Event::Try(_, _) => "try",
                Event::Retry(_, _) => "retry",
                Event::Success(_, _) => "success",
                Event::Failure(_, _) => "failure",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["try", "retry", "try", "retry", "try", "failure"]
        );
        assert!(matches!(events.last(), Some(Event::Failure(3, 3))));
    }

    #[tokio::test]
    async fn predicate_error_is_swallowed_like_false() {
        let ok = try_connection(
            || async { Err::<bool, BoxError>("transient".into()) },
            Some(Duration::from_millis(1)),
            Some(2),
            Callbacks::default(),
            None,
        )
        .await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn cancellation_stops_the_wait() {
        let token = CancellationToken::new();
        token.cancel();
        let ok = try_connection(
            || async { Ok(false) },
            Some(Duration::from_secs(60)),
            Some(3),
            Callbacks::default(),
            Some(&token),
        )
        .await;
        assert!(!ok);
    }
}
