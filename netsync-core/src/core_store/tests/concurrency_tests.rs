/*
    Concurrent writer tests

    Tests covering:
    1. Racing remote applies on one key keep the newest version
    2. Local writes from many threads each get a distinct version
    3. Concurrent provider reports for one link merge without losing annotations
    4. update_with increments from many threads without lost updates
*/

use crate::core_clock::{LogicalClock, LogicalTimestamp, VersionedValue};
use crate::core_store::link_store::link_timestamps;
use crate::core_store::{
    ConnectPoint, Link, LinkDescription, LinkStore, LinkType, ReplicatedStore, StoreResult,
    TimestampProvider, Update,
};
use crate::ids::DeviceId;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_racing_applies_keep_newest() {
    let clock = Arc::new(LogicalClock::new());
    let store: Arc<ReplicatedStore<_, Link>> =
        Arc::new(ReplicatedStore::new("links", link_timestamps(clock)));
    let desc = LinkDescription::new(
        ConnectPoint::new(DeviceId::new("of:1"), 1),
        ConnectPoint::new(DeviceId::new("of:2"), 1),
        LinkType::Direct,
    );
    let key = desc.key();

    let handles: Vec<_> = (0..8u64)
        .map(|t| {
            let store = store.clone();
            let key = key.clone();
            let desc = desc.clone();
            thread::spawn(move || {
                for seq in 0..50u64 {
                    let link = Link::from_description(format!("p{}", t), desc.clone());
                    let ts = LogicalTimestamp::new(1, seq * 8 + t);
                    store.apply(key.clone(), VersionedValue::new(Some(link), ts)).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let held = store.versioned(&key).unwrap();
    assert_eq!(held.timestamp(), LogicalTimestamp::new(1, 49 * 8 + 7));
    assert_eq!(held.value().as_ref().map(|l| l.provider_id.as_str()), Some("p7"));
}

#[test]
fn test_parallel_local_writes_are_all_versioned() {
    let clock = Arc::new(LogicalClock::new());
    clock.set_term(&DeviceId::new("of:9"), 3).unwrap();
    let store: Arc<ReplicatedStore<_, Link>> =
        Arc::new(ReplicatedStore::new("links", link_timestamps(clock.clone())));

    let handles: Vec<_> = (0..4u64)
        .map(|port| {
            let store = store.clone();
            thread::spawn(move || {
                let desc = LinkDescription::new(
                    ConnectPoint::new(DeviceId::new("of:1"), port),
                    ConnectPoint::new(DeviceId::new("of:9"), port),
                    LinkType::Direct,
                );
                store.upsert(desc.key(), Link::from_description("lldp", desc)).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.len(), 4);
    let mut seqs: Vec<u64> = store
        .entries()
        .values()
        .map(|v| v.timestamp().sequence())
        .collect();
    seqs.sort_unstable();
    assert_eq!(seqs, vec![0, 1, 2, 3]);
    assert!(store.entries().values().all(|v| v.timestamp().term() == 3));
}

#[test]
fn test_concurrent_link_reports_keep_every_annotation() {
    const THREADS: usize = 8;
    const ROUNDS: u64 = 50;

    let clock = Arc::new(LogicalClock::new());
    clock.set_term(&DeviceId::new("of:2"), 1).unwrap();
    let links = LinkStore::new(clock);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let links = links.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                for port in 0..ROUNDS {
                    let desc = LinkDescription::new(
                        ConnectPoint::new(DeviceId::new("of:1"), port),
                        ConnectPoint::new(DeviceId::new("of:2"), port),
                        LinkType::Direct,
                    )
                    .with_annotation(format!("seen-by-{}", t), "yes");
                    barrier.wait();
                    links.create_or_update_link(&format!("p{}", t), desc).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(links.link_count(), ROUNDS as usize);
    for link in links.links() {
        assert_eq!(link.annotations.len(), THREADS, "lost annotations on {}", link.key());
    }
}

#[test]
fn test_update_with_sees_previous_writer() {
    let clock = Arc::new(LogicalClock::new());
    clock.set_term(&DeviceId::new("of:1"), 1).unwrap();
    let timestamps: Arc<dyn TimestampProvider<String>> =
        Arc::new(move |_: &String| -> StoreResult<LogicalTimestamp> {
            Ok(clock.timestamp(&DeviceId::new("of:1"))?)
        });
    let store: Arc<ReplicatedStore<String, u64>> = Arc::new(ReplicatedStore::new("counters", timestamps));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    store
                        .update_with("hits".to_string(), |held| Update::Put(held.copied().unwrap_or(0) + 1))
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.get(&"hits".to_string()), Some(400));
    assert_eq!(store.update_with("hits".to_string(), |_| Update::Keep).unwrap(), None);
}
