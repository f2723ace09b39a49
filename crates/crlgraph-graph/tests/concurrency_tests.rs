use crlgraph_graph::{CrlGraphError, Universe, UniverseConfig};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_concurrent_writers_under_one_parent() {
    let u = Universe::with_defaults().unwrap();
    let parent = {
        let mut tx = u.begin();
        u.new_element(&mut tx, Some("urn:test:parent")).unwrap()
    };

    let threads = 8;
    let per_thread = 20;
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let u = u.clone();
            thread::spawn(move || {
                for i in 0..per_thread {
                    let mut tx = u.begin();
                    let child = u.new_element(&mut tx, None).unwrap();
                    u.set_owner(&mut tx, child, Some(parent)).unwrap();
                    u.set_name(&mut tx, child, &format!("child-{t}-{i}")).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut tx = u.begin_read();
    let owned = u.owned(&mut tx, parent).unwrap();
    assert_eq!(owned.len(), threads * per_thread);
    for child in owned {
        assert_eq!(u.owner(&mut tx, child).unwrap(), Some(parent));
        assert!(u.name(&mut tx, child).unwrap().is_some());
    }
}

#[test]
fn test_shared_readers_do_not_block_each_other() {
    let u = Universe::with_defaults().unwrap();
    let e = {
        let mut tx = u.begin();
        let e = u.new_element(&mut tx, None).unwrap();
        u.set_name(&mut tx, e, "shared").unwrap();
        e
    };

    let mut first = u.begin_read();
    assert_eq!(u.name(&mut first, e).unwrap().as_deref(), Some("shared"));

    let u2 = u.clone();
    let reader = thread::spawn(move || {
        let mut second = u2.begin_read();
        u2.name(&mut second, e).unwrap()
    });
    assert_eq!(reader.join().unwrap().as_deref(), Some("shared"));
    drop(first);
}

#[test]
fn test_repeated_reads_lock_once() {
    let u = Universe::with_defaults().unwrap();
    let mut tx = u.begin();
    let e = u.new_element(&mut tx, None).unwrap();
    tx.release();

    let before = tx.lock_acquisitions();
    u.version(&mut tx, e).unwrap();
    u.version(&mut tx, e).unwrap();
    u.snapshot(&mut tx, e).unwrap();
    assert_eq!(tx.lock_acquisitions(), before + 1);
    assert_eq!(tx.held(), 1);
    assert_eq!(tx.release(), 1);
}

#[test]
fn test_bounded_wait_reports_lock_timeout() {
    let config = UniverseConfig {
        lock_wait_timeout_ms: Some(50),
        ..UniverseConfig::default()
    };
    let u = Universe::new(config).unwrap();
    let (low, high) = {
        let mut tx = u.begin();
        let a = u.new_element(&mut tx, None).unwrap();
        let b = u.new_element(&mut tx, None).unwrap();
        (a.min(b), a.max(b))
    };

    let mut holder = u.begin();
    u.version(&mut holder, low).unwrap();

    let waiter = {
        let u = u.clone();
        thread::spawn(move || {
            let mut tx = u.begin();
            u.version(&mut tx, high).unwrap();
            // Out of ascending order and held elsewhere
            u.version(&mut tx, low)
        })
    };
    match waiter.join().unwrap() {
        Err(CrlGraphError::LockTimeout { node, .. }) => assert_eq!(node, low),
        other => panic!("unexpected {other:?}"),
    }
    drop(holder);
}

#[test]
fn test_reader_going_down_in_id_order_does_not_deadlock_a_writer() {
    let u = Universe::with_defaults().unwrap();
    let (element, literal) = {
        let mut tx = u.begin();
        let e = u.new_element(&mut tx, None).unwrap();
        let l = u.new_literal(&mut tx, "r", None).unwrap();
        u.set_owner(&mut tx, l, Some(e)).unwrap();
        (e, l)
    };
    let (low, high) = (element.min(literal), element.max(literal));

    let (done_tx, done_rx) = crossbeam_channel::unbounded();
    let (locked_tx, locked_rx) = crossbeam_channel::bounded(1);

    let reader = {
        let u = u.clone();
        let done = done_tx.clone();
        thread::spawn(move || {
            let mut tx = u.begin_read();
            let first = u.version(&mut tx, high);
            locked_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(200));
            let second = u.version(&mut tx, low);
            done.send(("reader", first.is_ok() && second.is_ok())).unwrap();
        })
    };
    let writer = {
        let u = u.clone();
        thread::spawn(move || {
            locked_rx.recv().unwrap();
            let mut tx = u.begin();
            let result = u.set_literal_value(&mut tx, literal, "w");
            drop(tx);
            done_tx.send(("writer", result.is_ok())).unwrap();
        })
    };

    for _ in 0..2 {
        let (who, ok) = done_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("reader and writer must both finish");
        assert!(ok, "{who} failed");
    }
    reader.join().unwrap();
    writer.join().unwrap();

    let mut tx = u.begin_read();
    assert_eq!(u.literal_value(&mut tx, literal).unwrap().as_deref(), Some("w"));
}

#[test]
fn test_exclusive_transaction_refuses_contended_lower_node() {
    let u = Universe::with_defaults().unwrap();
    let (low, high) = {
        let mut tx = u.begin();
        let a = u.new_element(&mut tx, None).unwrap();
        let b = u.new_element(&mut tx, None).unwrap();
        (a.min(b), a.max(b))
    };

    let mut holder = u.begin();
    u.version(&mut holder, low).unwrap();

    let waiter = {
        let u = u.clone();
        thread::spawn(move || {
            let mut tx = u.begin();
            u.version(&mut tx, high).unwrap();
            let result = u.version(&mut tx, low);
            (result, tx.held())
        })
    };
    match waiter.join().unwrap() {
        (Err(CrlGraphError::LockOrder { node }), held) => {
            assert_eq!(node, low);
            assert_eq!(held, 1);
        }
        other => panic!("unexpected {other:?}"),
    }
    drop(holder);
}

#[test]
fn test_wait_idle_drains_every_transaction() {
    let u = Universe::with_defaults().unwrap();
    let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = hits.clone();
    u.register_function("urn:test:slow", move |_call| {
        thread::sleep(Duration::from_millis(10));
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    });

    for i in 0..4 {
        let mut tx = u.begin();
        let e = u.new_element(&mut tx, None).unwrap();
        u.set_uri(&mut tx, e, Some("urn:test:slow")).unwrap();
        u.set_uri(&mut tx, e, Some(&format!("urn:test:done-{i}"))).unwrap();
    }
    u.wait_idle(Some(Duration::from_secs(5))).unwrap();
    assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 4);
}
