use std::collections::HashSet;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use tether::testing::RecordingEngine;
use tether::{Handle, NativeRef, ResourceKind, SessionRoot};

const THREADS: usize = 8;

#[test]
fn racing_disposal_and_finalization_unbind_once() {
    for _ in 0..50 {
        let engine = RecordingEngine::new();
        let root = engine.bound_root();
        let child = Arc::new(engine.bound_child(&root, ResourceKind::Results));
        let native = child.native().unwrap();
        let barrier = Barrier::new(THREADS);

        thread::scope(|s| {
            for _ in 0..THREADS {
                let child = Arc::clone(&child);
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    child.release();
                    // The last clone to go runs the finalization trigger.
                    drop(child);
                });
            }
        });
        drop(child);

        root.release();
        assert_eq!(engine.unbind_count(native), 1);
    }
}

#[test]
fn children_dropped_on_many_threads_all_unbind_before_root() {
    let engine = RecordingEngine::new();
    let root = engine.bound_root();
    let root_native = root.native().unwrap();

    let children: Vec<Handle> = (0..THREADS * 16)
        .map(|i| {
            let kind = if i % 2 == 0 {
                ResourceKind::Query
            } else {
                ResourceKind::Results
            };
            engine.bound_child(&root, kind)
        })
        .collect();
    let natives: HashSet<NativeRef> = children.iter().map(|c| c.native().unwrap()).collect();

    let barrier = Barrier::new(THREADS);
    let mut batches: Vec<Vec<Handle>> = (0..THREADS).map(|_| Vec::new()).collect();
    for (i, child) in children.into_iter().enumerate() {
        batches[i % THREADS].push(child);
    }

    thread::scope(|s| {
        for batch in batches {
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                drop(batch);
            });
        }
    });

    assert_eq!(root.pending_len(), natives.len());
    root.release();

    let records = engine.records();
    assert_eq!(records.len(), natives.len() + 1);
    assert_eq!(records.last().unwrap().native, root_native);
    let unbound: HashSet<NativeRef> = records[..natives.len()].iter().map(|r| r.native).collect();
    assert_eq!(unbound, natives);
}

#[test]
fn root_release_racing_child_releases_never_loses_or_repeats() {
    for _ in 0..50 {
        let engine = RecordingEngine::new();
        let root = engine.bound_root();
        let root_native = root.native().unwrap();
        let children: Vec<Handle> = (0..THREADS)
            .map(|_| engine.bound_child(&root, ResourceKind::List))
            .collect();
        let natives: Vec<NativeRef> = children.iter().map(|c| c.native().unwrap()).collect();
        let barrier = Barrier::new(THREADS + 1);

        thread::scope(|s| {
            for child in children {
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    child.release();
                });
            }
            let root = root.clone();
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                root.release();
            });
        });

        for native in &natives {
            assert_eq!(engine.unbind_count(*native), 1);
        }
        assert_eq!(engine.unbind_count(root_native), 1);

        // Children queued before the root finalized precede it; the rest
        // were unbound on the spot afterwards.
        let stats = root.stats();
        assert_eq!(stats.drained + stats.immediate, THREADS as u64);
        let root_pos = engine.position(root_native).unwrap();
        assert_eq!(root_pos as u64, stats.drained);
    }
}

#[test]
fn concurrent_drains_and_creations_keep_exactly_once() {
    let engine = RecordingEngine::new();
    let root = engine.bound_root();
    let created: Vec<Vec<NativeRef>> = thread::scope(|s| {
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let root = root.clone();
                s.spawn(move || {
                    let mut seen = Vec::new();
                    for i in 0..64 {
                        let child = engine.bound_child(&root, ResourceKind::Table);
                        seen.push(child.native().unwrap());
                        drop(child);
                        if i % 8 == 0 {
                            root.drain_pending();
                        }
                    }
                    seen
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    root.release();
    for native in created.into_iter().flatten() {
        assert_eq!(engine.unbind_count(native), 1);
    }
    assert_eq!(root.stats().failures, 0);
}

#[test]
fn unrelated_roots_release_in_parallel() {
    let engine = RecordingEngine::new();
    let roots: Vec<SessionRoot> = (0..THREADS).map(|_| engine.bound_root()).collect();
    let root_natives: Vec<NativeRef> = roots.iter().map(|r| r.native().unwrap()).collect();

    thread::scope(|s| {
        for root in &roots {
            let engine = Arc::clone(&engine);
            s.spawn(move || {
                for _ in 0..16 {
                    drop(engine.bound_child(root, ResourceKind::Query));
                }
                root.release();
            });
        }
    });

    for native in root_natives {
        assert_eq!(engine.unbind_count(native), 1);
    }
    assert_eq!(engine.records().len(), THREADS * 17);
}

#[test]
fn bind_racing_release_unbinds_only_what_was_produced() {
    for _ in 0..500 {
        let engine = RecordingEngine::new();
        let root = engine.bound_root();
        let root_native = root.native().unwrap();
        let child = Handle::new(&root, ResourceKind::Query, engine.unbinder(ResourceKind::Query));
        let produced: Mutex<Option<NativeRef>> = Mutex::new(None);
        let barrier = Barrier::new(2);

        thread::scope(|s| {
            s.spawn(|| {
                barrier.wait();
                // Either outcome is fine; what matters is what gets unbound.
                let _ = child.bind(|| {
                    let native = engine.allocate();
                    *produced.lock().unwrap() = Some(native);
                    Ok(native)
                });
            });
            s.spawn(|| {
                barrier.wait();
                child.release();
            });
        });

        assert!(child.is_released());
        assert!(child.native().unwrap_err().is_use_after_release());
        root.release();

        match produced.into_inner().unwrap() {
            Some(native) => {
                assert_eq!(engine.unbind_count(native), 1);
                assert!(engine.position(native).unwrap() < engine.position(root_native).unwrap());
                assert_eq!(engine.records().len(), 2);
            }
            None => assert_eq!(engine.records().len(), 1),
        }
        assert_eq!(engine.unbind_count(root_native), 1);
    }
}

#[test]
fn concurrent_root_releases_unbind_everything_once() {
    for _ in 0..50 {
        let engine = RecordingEngine::new();
        let root = engine.bound_root();
        let root_native = root.native().unwrap();
        let natives: Vec<NativeRef> = (0..4)
            .map(|_| {
                let child = engine.bound_child(&root, ResourceKind::Results);
                let native = child.native().unwrap();
                drop(child);
                native
            })
            .collect();
        let barrier = Barrier::new(THREADS);

        thread::scope(|s| {
            for _ in 0..THREADS {
                let root = root.clone();
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    root.release();
                });
            }
        });

        let records = engine.records();
        assert_eq!(records.len(), natives.len() + 1);
        for native in &natives {
            assert_eq!(engine.unbind_count(*native), 1);
        }
        assert_eq!(engine.unbind_count(root_native), 1);
        assert_eq!(records.last().unwrap().native, root_native);
        assert!(root.is_released());
    }
}
