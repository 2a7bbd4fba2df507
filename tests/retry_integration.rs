//! Waiting on eventual consistency: retry loops in front of a cached service.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use certcache::prelude::*;
use certcache::testing::{CallLog, Script};
use certcache::{RejectCode, RetryError};

fn not_open_yet() -> BackendError {
    BackendError::Transport("ledger not synced".to_string())
}

#[tokio::test(start_paused = true)]
async fn unbounded_retry_waits_until_backend_catches_up() {
    let log = CallLog::new();
    let script = Script::fail_then(3, not_open_yet(), 42u64);
    let task = certcache::retry(
        {
            let log = log.clone();
            move || futures::future::ready(script.at(log.record()))
        },
        RetryPolicy::exponential(Duration::from_secs(2)),
        BackendError::classify,
        |_: &RetryEvent<'_, BackendError>| {},
    )
    .unwrap();

    let outcome = task.outcome().await.unwrap();

    assert_eq!(outcome.success(), Some(42));
    assert_eq!(log.offsets_ms(), vec![0, 2_000, 6_000, 14_000]);
}

#[tokio::test(start_paused = true)]
async fn retries_go_through_the_cache_and_bypass_failures() {
    let service: CachedService = CachedService::default();
    let alice = Identity::from("alice");
    let log = CallLog::new();
    let script = Script::fail_then(2, not_open_yet(), 7u32);

    let outcome = Retry::new(RetryPolicy::exponential(Duration::from_millis(100)))
        .unwrap()
        .classify(|error: &CallError<BackendError>| match error {
            CallError::Backend(error) => BackendError::classify(error),
            CallError::Caller(_) => ErrorClass::Terminal,
        })
        .run(|| {
            let log = log.clone();
            let script = script.clone();
            let service = &service;
            let alice = &alice;
            async move {
                service
                    .cached_call(alice, Consistency::Certified, "neuron", &1u64, move || async move {
                        script.at(log.record())
                    })
                    .await
            }
        })
        .await;

    assert_eq!(outcome, RetryOutcome::Success(7));
    assert_eq!(log.count(), 3);
    // Failures were never cached; the success is.
    assert_eq!(service.store().len(&alice), 1);
}

#[tokio::test(start_paused = true)]
async fn bounded_retry_reports_exhaustion() {
    let log = CallLog::new();
    let outcome = Retry::new(RetryPolicy::exponential(Duration::from_millis(100)).with_max_attempts(10))
        .unwrap()
        .classify(BackendError::classify)
        .run(|| {
            log.record();
            futures::future::ready(Err::<(), _>(not_open_yet()))
        })
        .await;

    assert_eq!(outcome.attempts(), Some(10));
    let error = outcome.into_result().unwrap_err();
    assert!(matches!(error, RetryError::Exhausted { attempts: 10, .. }));
    assert_eq!(error.into_error(), Some(not_open_yet()));
    assert_eq!(log.count(), 10);
}

#[tokio::test(start_paused = true)]
async fn rejection_is_not_retried() {
    let log = CallLog::new();
    let outcome = Retry::new(RetryPolicy::exponential(Duration::from_millis(100)))
        .unwrap()
        .classify(BackendError::classify)
        .run(|| {
            log.record();
            futures::future::ready(Err::<(), _>(BackendError::Rejected(
                RejectCode::ResourceClosed,
            )))
        })
        .await;

    assert_eq!(
        outcome,
        RetryOutcome::Terminal(BackendError::Rejected(RejectCode::ResourceClosed))
    );
    assert_eq!(log.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelling_a_spawned_loop_stops_further_attempts() {
    let log = CallLog::new();
    let escalated = Arc::new(AtomicU32::new(0));
    let task = certcache::retry(
        {
            let log = log.clone();
            move || {
                log.record();
                futures::future::ready(Err::<(), _>(not_open_yet()))
            }
        },
        RetryPolicy::exponential(Duration::from_secs(1)),
        BackendError::classify,
        {
            let escalated = escalated.clone();
            escalate_after(2, move |_: &RetryEvent<'_, BackendError>| {
                escalated.fetch_add(1, Ordering::SeqCst);
            })
        },
    )
    .unwrap();

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert_eq!(log.count(), 3);
    assert_eq!(escalated.load(Ordering::SeqCst), 1);

    let cancel = task.cancel_handle();
    cancel.cancel();
    assert!(cancel.is_cancelled());

    let outcome = task.outcome().await.unwrap();
    assert!(outcome.is_cancelled());
    tokio::time::sleep(Duration::from_secs(3_600)).await;
    assert_eq!(log.count(), 3);
}
