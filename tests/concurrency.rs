//! Concurrent publish, fan-out and cancellation tests.

use herald::{
    scope, DropReason, EventInput, EventQuery, Sequence, Store, StoreConfig, SubscriptionConfig,
    SubscriptionFilter, SubscriptionState,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn test_store(dir: &TempDir) -> Arc<Store> {
    Arc::new(
        Store::create(StoreConfig {
            path: dir.path().join("store"),
            create_if_missing: true,
            event_cache_size: 1024,
            sync_interval: 100,
        })
        .unwrap(),
    )
}

fn ping(channel: u64) -> EventInput {
    EventInput::new("message.sent", scope::channel(channel))
}

fn all_sequences(store: &Store, scope: &str) -> Vec<u64> {
    let mut out = Vec::new();
    let mut from = Sequence(1);
    loop {
        let page = store
            .get_events(EventQuery::scope(scope).from(from).limit(100))
            .unwrap();
        out.extend(page.events.iter().map(|e| e.sequence.0));
        if !page.has_more {
            return out;
        }
        from = page.next_sequence;
    }
}

#[test]
fn test_store_is_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    fn assert_send<T: Send>() {}
    assert_send_sync::<Store>();
    assert_send::<herald::Subscription>();
    assert_send_sync::<herald::CancelHandle>();
}

// --- Ordering ---

#[test]
fn test_concurrent_publishers_get_gap_free_sequences() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let threads = 8;
    let per_thread = 100;

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                (0..per_thread)
                    .map(|_| store.publish(ping(1)).unwrap().sequence.0)
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for seq in handle.join().unwrap() {
            assert!(seen.insert(seq), "sequence {} assigned twice", seq);
        }
    }

    let total = (threads * per_thread) as u64;
    assert_eq!(seen, (1..=total).collect::<HashSet<_>>());
    assert_eq!(all_sequences(&store, "channel:1"), (1..=total).collect::<Vec<_>>());
    assert_eq!(store.latest_sequence("channel:1"), Sequence(total));
}

#[test]
fn test_concurrent_scopes_are_independent() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let handles: Vec<_> = (1..=4u64)
        .map(|channel| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..50 {
                    store.publish(ping(channel)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for channel in 1..=4u64 {
        assert_eq!(
            all_sequences(&store, &scope::channel(channel)),
            (1..=50).collect::<Vec<_>>()
        );
    }
}

#[test]
fn test_live_delivery_is_ordered_per_scope() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let mut subscription = store.subscribe(SubscriptionConfig {
        buffer_size: 10_000,
        ..SubscriptionConfig::live(SubscriptionFilter::scopes(["channel:1"]))
    });

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..200 {
                    store.publish(ping(1)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut received = Vec::new();
    while let Some(event) = subscription.try_recv().unwrap() {
        received.push(event.sequence.0);
    }
    assert_eq!(received, (1..=800).collect::<Vec<_>>());
}

// --- Catch-up under load ---

#[test]
fn test_catch_up_while_publishing() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let total = 500u64;

    let publisher = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for _ in 0..total {
                store.publish(ping(1)).unwrap();
            }
        })
    };

    // Join mid-stream.
    let deadline = Instant::now() + Duration::from_secs(10);
    while store.latest_sequence("channel:1") < Sequence(100) && Instant::now() < deadline {
        thread::yield_now();
    }

    let mut subscription = store.subscribe(SubscriptionConfig::from_sequence(
        SubscriptionFilter::scopes(["channel:1"]),
        Sequence(1),
    ));

    let mut received = Vec::new();
    while (received.len() as u64) < total {
        match subscription.recv_timeout(Duration::from_secs(5)).unwrap() {
            Some(event) => received.push(event.sequence.0),
            None => break,
        }
    }
    publisher.join().unwrap();

    // Every event exactly once, in order, across the replay/live boundary.
    assert_eq!(received, (1..=total).collect::<Vec<_>>());
    assert!(subscription.try_recv().unwrap().is_none());
}

// --- Isolation ---

#[test]
fn test_dropped_subscription_is_skipped() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let x = store.subscribe(SubscriptionConfig::live(SubscriptionFilter::scopes(["channel:1"])));
    let mut y = store.subscribe(SubscriptionConfig::live(SubscriptionFilter::scopes(["channel:1"])));
    assert_eq!(store.subscription_count(), 2);

    // Dropping X unregisters it before the publish.
    drop(x);

    let receipt = store.publish(ping(1)).unwrap();
    let event = y.recv_timeout(Duration::from_millis(100)).unwrap().unwrap();
    assert_eq!(event.event_id, receipt.event_id);
    assert_eq!(store.subscription_count(), 1);
}

#[test]
fn test_failed_send_during_publish_spares_others() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let mut x = store.subscribe(SubscriptionConfig {
        buffer_size: 1,
        ..SubscriptionConfig::live(SubscriptionFilter::scopes(["channel:1"]))
    });
    let mut y = store.subscribe(SubscriptionConfig::live(SubscriptionFilter::scopes(["channel:1"])));

    let first = store.publish(ping(1)).unwrap();
    // X is still registered with a full buffer; this send to it fails.
    let second = store.publish(ping(1)).unwrap();
    assert_eq!(second.sequence, Sequence(2));
    assert_eq!(store.subscription_count(), 1);

    let ids: Vec<_> = std::iter::from_fn(|| y.try_recv().unwrap())
        .map(|e| e.event_id)
        .collect();
    assert_eq!(ids, vec![first.event_id.clone(), second.event_id]);

    assert_eq!(x.try_recv().unwrap().unwrap().event_id, first.event_id);
    assert!(x.try_recv().unwrap().is_none());
    assert_eq!(x.close_reason(), Some(DropReason::BufferOverflow));
}

#[test]
fn test_slow_subscriber_dropped_without_affecting_others() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let mut slow = store.subscribe(SubscriptionConfig {
        buffer_size: 4,
        ..Default::default()
    });
    let mut fast = store.subscribe(SubscriptionConfig::default());

    for _ in 0..10 {
        store.publish(ping(1)).unwrap();
    }

    let mut fast_seen = Vec::new();
    while let Some(event) = fast.try_recv().unwrap() {
        fast_seen.push(event.sequence.0);
    }
    assert_eq!(fast_seen, (1..=10).collect::<Vec<_>>());

    let mut slow_seen = Vec::new();
    while let Some(event) = slow.try_recv().unwrap() {
        slow_seen.push(event.sequence.0);
    }
    assert_eq!(slow_seen, vec![1, 2, 3, 4]);
    assert_eq!(slow.state(), SubscriptionState::Closed);
    assert_eq!(slow.close_reason(), Some(DropReason::BufferOverflow));
    assert_eq!(store.subscription_count(), 1);
}

// --- Cancellation ---

#[test]
fn test_cancel_wakes_blocked_consumer() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let mut subscription = store.subscribe(SubscriptionConfig::default());
    let cancel = subscription.cancel_handle();

    let consumer = thread::spawn(move || {
        let result = subscription.recv().unwrap();
        (result, subscription.state(), subscription.close_reason())
    });

    thread::sleep(Duration::from_millis(50));
    cancel.cancel();
    cancel.cancel();

    let (result, state, reason) = consumer.join().unwrap();
    assert!(result.is_none());
    assert_eq!(state, SubscriptionState::Closed);
    assert_eq!(reason, Some(DropReason::Unsubscribed));
    assert!(cancel.is_cancelled());
    assert_eq!(store.subscription_count(), 0);
}

#[test]
fn test_cancel_discards_buffered_events() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let mut subscription = store.subscribe(SubscriptionConfig::default());
    store.publish(ping(1)).unwrap();
    store.publish(ping(1)).unwrap();

    subscription.cancel_handle().cancel();

    assert!(subscription.try_recv().unwrap().is_none());
    assert_eq!(subscription.state(), SubscriptionState::Closed);

    // Publishing after cancellation is unaffected.
    assert_eq!(store.publish(ping(1)).unwrap().sequence, Sequence(3));
}

#[test]
fn test_concurrent_unsubscribe_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let subscription = store.subscribe(SubscriptionConfig::default());
    let id = subscription.id();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.unsubscribe(id))
        })
        .collect();

    let removed = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|removed| *removed)
        .count();
    assert_eq!(removed, 1);

    // Dropping afterwards is also a no-op.
    drop(subscription);
    assert_eq!(store.subscription_count(), 0);
}

#[test]
fn test_subscription_churn_during_publish() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let publisher = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 0..300u64 {
                store.publish(ping(i % 3)).unwrap();
            }
        })
    };

    let churners: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..50 {
                    let mut subscription = store.subscribe(SubscriptionConfig::default());
                    let _ = subscription.try_recv().unwrap();
                }
            })
        })
        .collect();

    publisher.join().unwrap();
    for churner in churners {
        churner.join().unwrap();
    }

    assert_eq!(store.subscription_count(), 0);
    assert_eq!(store.stats().event_count, 300);
}
