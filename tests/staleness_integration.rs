//! Out-of-order reads must never overwrite newer state.

use std::sync::Mutex;
use std::time::Duration;

use certcache::prelude::*;

#[tokio::test(start_paused = true)]
async fn slow_certified_read_from_older_sync_is_dropped() {
    let service: CachedService<&'static str> = CachedService::default();
    let alice = Identity::from("alice");
    let shown = Mutex::new(Vec::new());
    let commit = |level: Consistency, value: &'static str| {
        shown.lock().unwrap().push((level, value));
    };

    let sync_a = service.sync_entity(
        &alice,
        "acct-1",
        "account",
        &"acct-1",
        move |level| async move {
            match level {
                Consistency::Query => Ok::<_, BackendError>("a-query"),
                Consistency::Certified => {
                    tokio::time::sleep(Duration::from_millis(1000)).await;
                    Ok("a-certified")
                }
            }
        },
        commit,
    );
    let sync_b = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        // A write lands between the two syncs.
        service
            .mutate(&alice, || async { Ok::<_, BackendError>(()) })
            .await
            .unwrap();
        service
            .sync_entity(
                &alice,
                "acct-1",
                "account",
                &"acct-1",
                move |level| async move {
                    match level {
                        Consistency::Query => Ok::<_, BackendError>("b-query"),
                        Consistency::Certified => {
                            tokio::time::sleep(Duration::from_millis(200)).await;
                            Ok("b-certified")
                        }
                    }
                },
                commit,
            )
            .await
    };

    let (report_a, report_b) = tokio::join!(sync_a, sync_b);
    let report_a = report_a.unwrap();
    let report_b = report_b.unwrap();

    assert_eq!(report_a.query, ReadOutcome::Committed);
    assert_eq!(report_a.certified, ReadOutcome::Superseded);
    assert!(report_b.query.is_committed());
    assert!(report_b.certified.is_committed());
    assert_eq!(
        *shown.lock().unwrap(),
        vec![
            (Consistency::Query, "a-query"),
            (Consistency::Query, "b-query"),
            (Consistency::Certified, "b-certified"),
        ]
    );

    // The late result from before the write was not cached either.
    let cached = service
        .cached_call(&alice, Consistency::Certified, "account", &"acct-1", || async {
            Ok::<_, BackendError>("reloaded")
        })
        .await
        .unwrap();
    assert_eq!(cached, "b-certified");
}

#[tokio::test(start_paused = true)]
async fn races_on_different_entities_do_not_interfere() {
    let guard: GenerationGuard<u32> = GenerationGuard::new();
    let committed = &Mutex::new(Vec::new());

    let slow = guard.with_race(1, |race| async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        race.apply("one", |v| committed.lock().unwrap().push(v))
    });
    let fast = guard.with_race(2, |race| async move {
        race.apply("two", |v| committed.lock().unwrap().push(v))
    });
    let (slow, fast) = tokio::join!(slow, fast);

    assert!(slow);
    assert!(fast);
    assert_eq!(*committed.lock().unwrap(), vec!["two", "one"]);
}

#[tokio::test(start_paused = true)]
async fn newer_race_wins_even_when_it_settles_first() {
    let guard: GenerationGuard<&'static str> = GenerationGuard::new();
    let shown = &Mutex::new(None);

    let older = guard.with_race("proposal-9", |race| async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        race.apply(1, |v| *shown.lock().unwrap() = Some(v))
    });
    let newer = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        guard
            .with_race("proposal-9", |race| async move {
                race.apply(2, |v| *shown.lock().unwrap() = Some(v))
            })
            .await
    };
    let (older, newer) = tokio::join!(older, newer);

    assert!(!older);
    assert!(newer);
    assert_eq!(*shown.lock().unwrap(), Some(2));
}
