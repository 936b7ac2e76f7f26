//! Concurrency tests: racing registration, reference counting and weak
//! dereference against destruction.

mod common;

use basalt::error::ErrorSink;
use basalt::{ClassDef, InstanceCore, InstanceHeader, InstanceRef, Object};
use common::*;
use std::alloc::Layout;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

#[test]
fn concurrent_registration_yields_one_descriptor() {
    let rt = test_runtime();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let rt = rt.clone();
        handles.push(thread::spawn(move || scalar_class(&rt)));
    }
    let classes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for pair in classes.windows(2) {
        assert_eq!(pair[0], pair[1]);
    }
}

#[test]
fn concurrent_interface_ids_are_consistent() {
    let rt = test_runtime();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let rt = rt.clone();
        handles.push(thread::spawn(move || {
            (rt.interface_id("Render"), rt.interface_id("Persist"))
        }));
    }
    let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for pair in ids.windows(2) {
        assert_eq!(pair[0], pair[1]);
    }
    let (render, persist) = ids[0];
    assert_ne!(render, persist);
}

static TRACKED_DESTROYS: AtomicUsize = AtomicUsize::new(0);

unsafe fn tracked_clear(_obj: InstanceRef, release_refs: bool) {
    if release_refs {
        TRACKED_DESTROYS.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn racing_releases_destroy_exactly_once() {
    let rt = test_runtime();
    let tracked = rt.register_class(&ClassDef {
        name: "Tracked",
        super_class: rt.object_class(),
        public_layout: Layout::new::<InstanceCore>(),
        private_layout: Layout::new::<InstanceHeader>(),
        init: None,
        assign: None,
        clear: Some(tracked_clear),
        interfaces: &[],
    });

    const INSTANCES: usize = 50;
    const THREADS: usize = 8;
    for _ in 0..INSTANCES {
        let obj = Object::create(&rt, tracked, ErrorSink::ignore()).unwrap();
        let clones: Vec<Object> = (0..THREADS).map(|_| obj.clone()).collect();
        drop(obj);
        let mut handles = Vec::new();
        for clone in clones {
            handles.push(thread::spawn(move || drop(clone)));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
    assert_eq!(TRACKED_DESTROYS.load(Ordering::SeqCst), INSTANCES);
}

#[test]
fn deref_races_with_destruction_without_dangling() {
    let rt = test_runtime();
    for _ in 0..100 {
        let obj = scalar_new(&rt, 123, ErrorSink::ignore()).unwrap();
        let weak = obj.weak_ref().unwrap();
        let weak_clone = weak.clone();

        let reader = thread::spawn(move || {
            let mut observed_live = 0;
            loop {
                match weak_clone.deref() {
                    Some(strong) => {
                        // A successful upgrade must always see valid data.
                        assert_eq!(scalar_value(&strong), 123);
                        observed_live += 1;
                    }
                    None => return observed_live,
                }
            }
        });

        drop(obj);
        reader.join().unwrap();
        assert!(!weak.is_set());
    }
}

#[test]
fn shared_runtime_creates_instances_from_many_threads() {
    let rt = test_runtime();
    let created = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for t in 0..4 {
        let rt = rt.clone();
        let created = Arc::clone(&created);
        handles.push(thread::spawn(move || {
            for i in 0..64 {
                let value = (t * 1000 + i) as i64;
                let obj = scalar_new(&rt, value, ErrorSink::ignore()).unwrap();
                assert_eq!(scalar_value(&obj), value);
                created.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(created.load(Ordering::Relaxed), 4 * 64);
}
