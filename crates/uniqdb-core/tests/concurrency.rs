//! Concurrent writers racing for the same unique values.

use std::sync::{Arc, Barrier};
use std::thread;

use serde_json::json;
use uniqdb_core::{Document, ModelMeta, Store, StoreConfig};

const WRITERS: usize = 8;

fn shared_store() -> Arc<Store> {
    let store = Store::open(StoreConfig::temporary()).unwrap();
    store
        .register(ModelMeta::new("User").unique(["email"]))
        .unwrap();
    Arc::new(store)
}

#[test]
fn test_one_winner_per_value() {
    let store = shared_store();
    let barrier = Arc::new(Barrier::new(WRITERS));

    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut doc =
                    Document::from_json("User", json!({"email": "race@example.com", "writer": i}))
                        .unwrap();
                barrier.wait();
                store.put(&mut doc)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    let losers = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.is_unique_violation()))
        .count();

    assert_eq!(winners, 1);
    assert_eq!(losers, WRITERS - 1);
    assert_eq!(store.count("User"), 1);
    assert_eq!(store.markers().count("User"), 1);
}

#[test]
fn test_distinct_values_all_succeed() {
    let store = shared_store();

    thread::scope(|s| {
        for i in 0..WRITERS {
            let store = &store;
            s.spawn(move || {
                for j in 0..20 {
                    let email = format!("user{}-{}@example.com", i, j);
                    let mut doc = Document::from_json("User", json!({"email": email})).unwrap();
                    store.put(&mut doc).unwrap();
                }
            });
        }
    });

    assert_eq!(store.count("User"), WRITERS * 20);
    assert_eq!(store.markers().count("User"), WRITERS * 20);
    assert!(store.rebuild_markers("User").unwrap().is_clean());
}

#[test]
fn test_delete_and_reinsert_race() {
    let store = shared_store();
    let mut doc = Document::from_json("User", json!({"email": "swap@example.com"})).unwrap();
    let key = store.put(&mut doc).unwrap();

    thread::scope(|s| {
        s.spawn(|| {
            assert!(store.delete(&key).unwrap());
        });
        s.spawn(|| {
            // May run before or after the delete; never both stored.
            let mut again =
                Document::from_json("User", json!({"email": "swap@example.com"})).unwrap();
            let _ = store.put(&mut again);
        });
    });

    assert!(store.count("User") <= 1);
    assert_eq!(store.markers().count("User"), store.count("User"));
}
