#![forbid(unsafe_code)]

//! Stress tests for the thread-safe policy.
//!
//! Events and connections are shared across OS threads while subscribers
//! are connected, revoked, and invoked concurrently. Each test checks an
//! exact final count, so a lost or duplicated invocation fails it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use parking_lot::Mutex;
use tether_core::{ConnectionState, DisconnectError, Event, EventConfig, SyncConnection, SyncEvent};
use tracing::{Level, info};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(Level::INFO)
        .try_init();
}

const DELTAS: [i64; 6] = [1, 2, -2, -1, 1, 1];
const ITERATIONS: usize = 500;

#[test]
fn six_threads_counter_has_no_lost_updates() {
    init_tracing();
    let event: Arc<SyncEvent<i64>> = Arc::new(Event::new());
    let counter = Arc::new(Mutex::new(0i64));
    let c = Arc::clone(&counter);
    let _conn = event.connect(move |delta| {
        let mut value = c.lock();
        *value += *delta;
    });

    let handles: Vec<_> = DELTAS
        .iter()
        .map(|&delta| {
            let event = Arc::clone(&event);
            thread::spawn(move || {
                for _ in 0..ITERATIONS {
                    event.notify(&delta);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let total = *counter.lock();
    info!(total, "counter after concurrent dispatch");
    assert_eq!(total, (ITERATIONS as i64) * DELTAS.iter().sum::<i64>());
    assert_eq!(total, 1000);
}

#[test]
fn connect_and_disconnect_churn_during_dispatch() {
    init_tracing();
    let event: Arc<SyncEvent<(), usize>> = Arc::new(Event::with_config(EventConfig::new("churn")));
    let permanent_calls = Arc::new(AtomicUsize::new(0));
    let p = Arc::clone(&permanent_calls);
    let _permanent = event.connect(move |_| {
        p.fetch_add(1, Ordering::SeqCst);
        1
    });

    let dispatchers: Vec<_> = (0..3)
        .map(|_| {
            let event = Arc::clone(&event);
            thread::spawn(move || {
                let mut emitted = 0usize;
                for _ in 0..ITERATIONS {
                    let results = event.emit(&());
                    // The permanent subscriber always contributes its 1.
                    assert!(results.contains(&1));
                    emitted += 1;
                }
                emitted
            })
        })
        .collect();

    let churners: Vec<_> = (0..3)
        .map(|_| {
            let event = Arc::clone(&event);
            thread::spawn(move || {
                for _ in 0..ITERATIONS {
                    let conn = event.connect(|_| 2);
                    thread::yield_now();
                    drop(conn);
                }
            })
        })
        .collect();

    for h in churners {
        h.join().unwrap();
    }
    let emitted: usize = dispatchers.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(permanent_calls.load(Ordering::SeqCst), emitted);
    assert_eq!(event.subscriber_count(), 1);
    assert_eq!(event.emit(&()), vec![1]);
}

#[test]
fn disconnect_from_other_thread_stops_future_dispatch() {
    init_tracing();
    let event: Arc<SyncEvent<()>> = Arc::new(Event::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let conn = event.connect(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    let running = Arc::new(AtomicBool::new(true));
    let dispatcher = {
        let (event, running) = (Arc::clone(&event), Arc::clone(&running));
        thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                event.notify(&());
            }
        })
    };

    let closer = thread::spawn(move || {
        let mut conn = conn;
        thread::yield_now();
        conn.try_disconnect()
    });
    assert_eq!(closer.join().unwrap(), Ok(()));
    running.store(false, Ordering::SeqCst);
    dispatcher.join().unwrap();

    let settled = calls.load(Ordering::SeqCst);
    for _ in 0..10 {
        event.notify(&());
    }
    assert_eq!(calls.load(Ordering::SeqCst), settled);
    assert!(!event.has_subscribers());
}

#[test]
fn self_disconnect_under_concurrent_dispatch() {
    init_tracing();
    let event: Arc<SyncEvent<()>> = Arc::new(Event::new());
    let own: Arc<Mutex<Option<SyncConnection>>> = Arc::new(Mutex::new(None));
    let calls = Arc::new(AtomicUsize::new(0));

    let (o, c) = (Arc::clone(&own), Arc::clone(&calls));
    let conn = event.connect(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
        let taken = o.lock().take();
        drop(taken);
    });
    *own.lock() = Some(conn);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let event = Arc::clone(&event);
            thread::spawn(move || {
                for _ in 0..50 {
                    event.notify(&());
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    // Dispatches that snapshotted before the disconnect may each run it once.
    let total = calls.load(Ordering::SeqCst);
    assert!((1..=4).contains(&total), "ran {total} times");
    assert!(!event.has_subscribers());
}

#[test]
fn connection_outlives_event_on_another_thread() {
    init_tracing();
    let event: SyncEvent<()> = Event::new();
    let conn = event.connect(|_| {});
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
    let (dropped_tx, dropped_rx) = std::sync::mpsc::channel::<()>();

    let holder = thread::spawn(move || {
        let mut conn = conn;
        assert!(conn.is_connected());
        ready_tx.send(()).unwrap();
        dropped_rx.recv().unwrap();
        assert_eq!(conn.state(), ConnectionState::Orphaned);
        conn.try_disconnect()
    });

    ready_rx.recv().unwrap();
    drop(event);
    dropped_tx.send(()).unwrap();
    assert_eq!(holder.join().unwrap(), Err(DisconnectError::Orphaned));
}

#[test]
fn nested_dispatch_across_threads() {
    init_tracing();
    let event: Arc<SyncEvent<u32, u32>> = Arc::new(Event::new());
    let weak = Arc::downgrade(&event);
    let _recursive = event.connect(move |depth| {
        if *depth < 3 {
            if let Some(event) = weak.upgrade() {
                return event.emit(&(depth + 1)).iter().sum::<u32>() + 1;
            }
        }
        1
    });

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let event = Arc::clone(&event);
            thread::spawn(move || event.emit(&0))
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), vec![4]);
    }
}
