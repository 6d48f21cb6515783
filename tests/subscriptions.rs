//! Live delivery through the event database.

use relay_store::{
    CancelToken, Event, EventDb, Filter, IngestOutcome, Kind, QueryOptions, StoreConfig,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn test_db(dir: &TempDir) -> EventDb {
    EventDb::open(StoreConfig {
        path: dir.path().join("events.sqlite3"),
        ..Default::default()
    })
    .unwrap()
}

fn make_event(pubkey: &str, kind: Kind, created_at: u64, tags: Vec<Vec<&str>>) -> Event {
    let mut event = Event {
        id: String::new(),
        pubkey: pubkey.to_string(),
        created_at,
        kind,
        tags: tags
            .into_iter()
            .map(|t| t.into_iter().map(String::from).collect())
            .collect(),
        content: format!("event at {}", created_at),
        sig: String::new(),
    };
    event.id = event.compute_id();
    event
}

fn note(pubkey: &str, created_at: u64) -> Event {
    make_event(pubkey, Kind::TEXT_NOTE, created_at, vec![])
}

#[test]
fn test_matching_event_is_delivered() {
    let dir = TempDir::new().unwrap();
    let db = test_db(&dir);
    let sub = db.subscribe(vec![Filter::new().authors(["alice"])], CancelToken::new());

    db.store_event(&note("bob", 1), &CancelToken::new()).unwrap();
    let mine = note("alice", 2);
    db.store_event(&mine, &CancelToken::new()).unwrap();

    let received = sub.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(received.id, mine.id);
    assert!(sub.try_recv().is_err());
}

#[test]
fn test_past_events_are_not_replayed() {
    let dir = TempDir::new().unwrap();
    let db = test_db(&dir);
    let old = note("alice", 1);
    db.store_event(&old, &CancelToken::new()).unwrap();

    let sub = db.subscribe(vec![Filter::new()], CancelToken::new());
    assert!(sub.recv_timeout(Duration::from_millis(50)).is_err());

    // History is available through a query.
    let history = db
        .query(&[Filter::new()], QueryOptions::default(), &CancelToken::new())
        .unwrap();
    assert_eq!(history, vec![old]);
}

#[test]
fn test_delivery_order_follows_commit_order() {
    let dir = TempDir::new().unwrap();
    let db = test_db(&dir);
    let sub = db.subscribe(vec![Filter::new().kinds([1u32])], CancelToken::new());

    let events: Vec<Event> = [30, 10, 20].iter().map(|ts| note("alice", *ts)).collect();
    for event in &events {
        db.store_event(event, &CancelToken::new()).unwrap();
    }

    let received: Vec<u64> = sub.take(3).map(|e| e.created_at).collect();
    assert_eq!(received, vec![30, 10, 20]);
}

#[test]
fn test_cancelled_subscription_gets_nothing() {
    let dir = TempDir::new().unwrap();
    let db = test_db(&dir);
    let cancel = CancelToken::new();
    let sub = db.subscribe(vec![Filter::new()], cancel.clone());

    cancel.cancel();
    db.store_event(&note("alice", 1), &CancelToken::new()).unwrap();

    assert!(sub.recv().is_none());
    assert!(sub.is_closed());
    assert_eq!(db.subscriptions().subscription_count(), 0);
}

#[test]
fn test_cancel_wakes_blocked_consumer() {
    let dir = TempDir::new().unwrap();
    let db = test_db(&dir);
    let cancel = CancelToken::new();
    let sub = db.subscribe(vec![Filter::new()], cancel.clone());

    let consumer = thread::spawn(move || sub.count());
    thread::sleep(Duration::from_millis(50));
    cancel.cancel();

    assert_eq!(consumer.join().unwrap(), 0);
}

#[test]
fn test_deadline_ends_subscription() {
    let dir = TempDir::new().unwrap();
    let db = test_db(&dir);
    let sub = db.subscribe(vec![Filter::new()], CancelToken::with_timeout(Duration::from_millis(50)));

    let start = Instant::now();
    assert!(sub.recv().is_none());
    assert!(start.elapsed() >= Duration::from_millis(40));
    assert!(sub.is_closed());
}

#[test]
fn test_concurrent_producer_and_consumer() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(test_db(&dir));
    let sub = db.subscribe(vec![Filter::new().kinds([1u32])], CancelToken::new());

    let producer = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            for ts in 0..50 {
                db.store_event(&note("alice", ts), &CancelToken::new()).unwrap();
            }
        })
    };

    let received: Vec<u64> = sub.take(50).map(|e| e.created_at).collect();
    producer.join().unwrap();
    assert_eq!(received, (0..50).collect::<Vec<_>>());
}

#[test]
fn test_ephemeral_delivered_not_stored() {
    let dir = TempDir::new().unwrap();
    let db = test_db(&dir);
    let sub = db.subscribe(vec![Filter::new().kinds([20_000u32])], CancelToken::new());

    let ping = make_event("alice", Kind(20_000), 1, vec![]);
    let outcome = db.store_event(&ping, &CancelToken::new()).unwrap();
    assert!(matches!(outcome, IngestOutcome::Ephemeral(_)));

    assert_eq!(sub.recv_timeout(Duration::from_secs(1)).unwrap().id, ping.id);
    assert_eq!(db.count(&[Filter::new()], &CancelToken::new()).unwrap(), 0);
}

#[test]
fn test_local_filter_on_live_events() {
    let dir = TempDir::new().unwrap();
    let db = test_db(&dir);
    db.store().add_local_author("alice").unwrap();
    let sub = db.subscribe(vec![Filter::new().local(true)], CancelToken::new());

    db.store_event(&note("bob", 1), &CancelToken::new()).unwrap();
    db.store_event(&note("alice", 2), &CancelToken::new()).unwrap();

    let received = sub.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(received.pubkey, "alice");
    assert!(sub.try_recv().is_err());
}

#[test]
fn test_reaction_counted_once() {
    let dir = TempDir::new().unwrap();
    let db = test_db(&dir);
    let target = "c".repeat(64);
    let reaction = make_event("alice", Kind::REACTION, 1, vec![vec!["e", target.as_str()]]);

    let cancel = CancelToken::new();
    db.store_event(&reaction, &cancel).unwrap();
    assert!(db.store_event(&reaction, &cancel).unwrap().is_duplicate());

    let stats = db.stats().event_stats(&target).unwrap().unwrap();
    assert_eq!(stats.reactions_count, 1);

    let other = make_event("bob", Kind::REACTION, 2, vec![vec!["e", target.as_str()]]);
    db.store_event(&other, &cancel).unwrap();
    assert_eq!(db.stats().event_stats(&target).unwrap().unwrap().reactions_count, 2);
}

#[test]
fn test_slow_subscriber_is_dropped() {
    let dir = TempDir::new().unwrap();
    let db = EventDb::open(StoreConfig {
        path: dir.path().join("events.sqlite3"),
        subscription_buffer: 2,
        ..Default::default()
    })
    .unwrap();
    let slow = db.subscribe(vec![Filter::new()], CancelToken::new());
    let fast = db.subscribe(vec![Filter::new()], CancelToken::new());

    for ts in 0..5 {
        db.store_event(&note("alice", ts), &CancelToken::new()).unwrap();
        fast.try_recv().unwrap();
    }

    assert!(slow.is_closed());
    assert!(!fast.is_closed());
    assert_eq!(db.subscriptions().subscription_count(), 1);
}
