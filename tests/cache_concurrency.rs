use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use menu_cache::cache::{CachedResponse, ResponseCache, TtlStore};

const THREADS: usize = 8;
const KEYS_PER_THREAD: usize = 200;
const TTL: Duration = Duration::from_secs(60);
const SHARED_KEYS: usize = 16;
const SHORT_TTL: Duration = Duration::from_millis(5);
const RUN_FOR: Duration = Duration::from_millis(300);

#[test]
fn interleaved_writers_leave_a_consistent_store() {
    let store: Arc<TtlStore<usize>> = Arc::new(TtlStore::new());

    let workers: Vec<_> = (0..THREADS)
        .map(|worker| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..KEYS_PER_THREAD {
                    let key = format!("w{worker}:k{i}");
                    store.set(key.as_str(), i, TTL);
                    assert_eq!(store.get(&key), Some(i));
                    // Every other key is removed again.
                    if i % 2 == 0 {
                        assert!(store.delete(&key));
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker thread");
    }

    let stats = store.stats();
    assert_eq!(store.size(), THREADS * KEYS_PER_THREAD / 2);
    assert_eq!(stats.total, (THREADS * KEYS_PER_THREAD) as u64);
    assert_eq!(stats.hits, (THREADS * KEYS_PER_THREAD) as u64);
    assert_eq!(stats.evictions, (THREADS * KEYS_PER_THREAD / 2) as u64);
}

#[test]
fn last_write_wins_under_contention() {
    let store: Arc<TtlStore<usize>> = Arc::new(TtlStore::new());

    let writers: Vec<_> = (0..THREADS)
        .map(|worker| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..KEYS_PER_THREAD {
                    store.set("shared", worker, TTL);
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().expect("writer thread");
    }

    let value = store.get("shared").expect("shared key present");
    assert!(value < THREADS);
    assert_eq!(store.size(), 1);
}

#[test]
fn concurrent_readers_and_tag_invalidation_agree_on_counts() {
    let cache = Arc::new(ResponseCache::default());
    let keys: Vec<String> = (0..KEYS_PER_THREAD)
        .map(|i| ResponseCache::generate_key("GET", "/api/menus", &format!("page={i}")))
        .collect();
    for key in &keys {
        cache.set(
            key,
            CachedResponse::new(StatusCode::OK, &HeaderMap::new(), Bytes::from_static(b"[]")),
            TTL,
            ["menus"],
        );
    }

    let keys = Arc::new(keys);
    let readers: Vec<_> = (0..THREADS)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let keys = Arc::clone(&keys);
            thread::spawn(move || {
                for key in keys.iter() {
                    cache.get(key);
                }
            })
        })
        .collect();

    let removed = cache.invalidate_by_tag("menus");

    for reader in readers {
        reader.join().expect("reader thread");
    }

    let counters = cache.counters();
    assert_eq!(removed, KEYS_PER_THREAD);
    assert_eq!(
        counters.hits + counters.misses,
        (THREADS * KEYS_PER_THREAD) as u64
    );
    assert_eq!(cache.size(), 0);
    assert_eq!(cache.tag_count(), 0);
}

#[test]
fn mixed_operations_on_shared_keys_stay_consistent() {
    let store: Arc<TtlStore<usize>> = Arc::new(TtlStore::new());

    let workers: Vec<_> = (0..THREADS)
        .map(|worker| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let deadline = Instant::now() + RUN_FOR;
                let (mut sets, mut gets) = (0u64, 0u64);
                let mut i = worker;
                while Instant::now() < deadline {
                    let key = format!("shared:{}", i % SHARED_KEYS);
                    match i % 4 {
                        0 | 1 => {
                            store.set(key.as_str(), i, SHORT_TTL);
                            sets += 1;
                        }
                        2 => {
                            store.get(&key);
                            gets += 1;
                        }
                        _ => {
                            store.delete(&key);
                        }
                    }
                    if worker == 0 && i % 64 == 0 {
                        store.purge_expired();
                    }
                    i += 1;
                }
                (sets, gets)
            })
        })
        .collect();

    let (mut sets, mut gets) = (0u64, 0u64);
    for worker in workers {
        let (s, g) = worker.join().expect("worker thread");
        sets += s;
        gets += g;
    }

    assert!(store.size() <= SHARED_KEYS);
    assert!(store.keys().len() <= SHARED_KEYS);

    thread::sleep(SHORT_TTL * 4);
    store.purge_expired();
    assert_eq!(store.size(), 0);
    assert!(store.keys().is_empty());

    let stats = store.stats();
    assert_eq!(stats.total, sets);
    assert_eq!(stats.hits + stats.misses, gets);
    assert!(stats.evictions <= sets);
}
