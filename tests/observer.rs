//! Observer tests: exactly-once delivery, ordering, backpressure, teardown.

use journalkv::{ChangeOp, Db, EntryId, Key, ObserverConfig};
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;

fn fast_config() -> ObserverConfig {
    ObserverConfig {
        interval: Duration::from_millis(10),
        ..Default::default()
    }
}

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

#[test]
fn test_first_pass_delivers_backlog_in_order() {
    let db = Db::in_memory();
    for i in 1..=5 {
        db.write("mydb", "kv", format!("k{i}"), json!({"n": i}))
            .unwrap();
    }

    let observer = db.observe("mydb", fast_config());

    let mut ids = Vec::new();
    for _ in 0..5 {
        let entry = observer.recv_timeout(RECV_TIMEOUT).unwrap();
        ids.push(entry.id);
    }
    assert_eq!(
        ids,
        vec![EntryId(1), EntryId(2), EntryId(3), EntryId(4), EntryId(5)]
    );

    // No duplicates across subsequent polls.
    assert!(observer.recv_timeout(Duration::from_millis(100)).is_err());
    observer.stop();
}

#[test]
fn test_writes_after_start_are_observed() {
    let db = Db::in_memory();
    let observer = db.observe("mydb", fast_config());

    db.write("mydb", "kv", "later", json!("v")).unwrap();

    let entry = observer.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(entry.key, Key::from("later"));
    assert_eq!(entry.value(), Some(&json!("v")));
    observer.stop();
}

#[test]
fn test_exactly_once_across_many_polls() {
    let db = Db::in_memory();
    let observer = db.observe("mydb", fast_config());

    for i in 0..20 {
        db.write("mydb", "kv", format!("k{i}"), json!(i)).unwrap();
    }

    let mut seen = HashSet::new();
    for _ in 0..20 {
        let entry = observer.recv_timeout(RECV_TIMEOUT).unwrap();
        assert!(seen.insert(entry.id), "entry {} delivered twice", entry.id);
    }

    // Leave the observer polling a few more passes; nothing new arrives.
    assert!(observer.recv_timeout(Duration::from_millis(100)).is_err());
    observer.stop();
}

#[test]
fn test_deletes_are_observed_as_tombstones() {
    let db = Db::in_memory();
    db.write("mydb", "kv", "k", json!("v")).unwrap();
    db.delete("mydb", "kv", "k").unwrap();

    let observer = db.observe("mydb", fast_config());

    let write = observer.recv_timeout(RECV_TIMEOUT).unwrap();
    assert!(matches!(write.op, ChangeOp::Write { .. }));

    let tombstone = observer.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(tombstone.op, ChangeOp::Delete);
    assert_eq!(tombstone.key, Key::from("k"));
    observer.stop();
}

#[test]
fn test_full_buffer_backpressures_without_loss() {
    let db = Db::in_memory();
    for i in 0..10 {
        db.write("mydb", "kv", format!("k{i}"), json!(i)).unwrap();
    }

    // Buffer far smaller than the backlog: delivery must pause and resume
    // as the consumer drains, with no loss or duplication.
    let observer = db.observe(
        "mydb",
        ObserverConfig {
            interval: Duration::from_millis(10),
            buffer_size: 2,
        },
    );

    let mut ids = Vec::new();
    for _ in 0..10 {
        ids.push(observer.recv_timeout(RECV_TIMEOUT).unwrap().id);
    }
    assert_eq!(ids, (1..=10).map(EntryId).collect::<Vec<_>>());
    assert!(observer.recv_timeout(Duration::from_millis(100)).is_err());
    observer.stop();
}

#[test]
fn test_stop_halts_polling() {
    let db = Db::in_memory();
    let observer = db.observe("mydb", fast_config());

    db.write("mydb", "kv", "before", json!(1)).unwrap();
    observer.recv_timeout(RECV_TIMEOUT).unwrap();
    observer.stop();

    // Writes after stop are not an error; there is simply no one polling.
    db.write("mydb", "kv", "after", json!(2)).unwrap();
}

#[test]
fn test_dropping_the_handle_stops_the_task() {
    let db = Db::in_memory();
    {
        let _observer = db.observe("mydb", fast_config());
        db.write("mydb", "kv", "k", json!(1)).unwrap();
    }
    // Handle dropped; a later observer starts from its own empty
    // delivered-set and replays the full log.
    let observer = db.observe("mydb", fast_config());
    let entry = observer.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(entry.id, EntryId(1));
    observer.stop();
}

#[test]
fn test_observer_on_empty_database_is_quiet() {
    let db = Db::in_memory();
    let observer = db.observe("fresh", fast_config());
    assert!(observer.recv_timeout(Duration::from_millis(100)).is_err());
    observer.stop();

    // The observer's lazy open provisioned the change log only; the record
    // collection appears once a writer names it.
    db.write("fresh", "kv", "k", json!(1)).unwrap();
    assert_eq!(db.read("fresh", "kv", "k").unwrap(), Some(json!(1)));
}

#[test]
fn test_truncation_does_not_cause_redelivery() {
    let db = Db::in_memory();
    for i in 0..5 {
        db.write("mydb", "kv", format!("k{i}"), json!(i)).unwrap();
    }

    let observer = db.observe("mydb", fast_config());
    for _ in 0..5 {
        observer.recv_timeout(RECV_TIMEOUT).unwrap();
    }

    db.truncate_change_log("mydb", EntryId(6)).unwrap();
    db.write("mydb", "kv", "new", json!("x")).unwrap();

    let entry = observer.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(entry.id, EntryId(6));
    assert!(observer.recv_timeout(Duration::from_millis(100)).is_err());
    observer.stop();
}
