use kernel_sync::TicketMutex;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

#[test]
fn ticket_mutex_lock_and_try_lock() {
    let m = TicketMutex::new(5_u32);
    {
        let mut g = m.lock();
        *g += 1;
        assert!(m.is_locked());
        assert!(m.try_lock().is_none());
    }
    assert!(!m.is_locked());
    assert_eq!(*m.try_lock().expect("free"), 6);
}

#[test]
fn baton_keeps_lock_held_until_adopted() {
    let m = TicketMutex::new(Vec::<u32>::new());
    let mut g = m.lock();
    g.push(1);
    let baton = g.hand_off();

    // no guard exists, yet the lock is still taken
    assert!(m.is_locked());
    assert!(m.try_lock().is_none());

    let mut g = m.adopt(baton);
    g.push(2);
    drop(g);

    assert!(!m.is_locked());
    assert_eq!(*m.lock(), vec![1, 2]);
}

#[test]
fn baton_crosses_threads() {
    let m = Arc::new(TicketMutex::new(0_u64));
    let (tx, rx) = mpsc::channel();

    let mut g = m.lock();
    *g = 10;
    tx.send(g.hand_off()).unwrap();

    let remote = {
        let m = Arc::clone(&m);
        thread::spawn(move || {
            let baton = rx.recv().unwrap();
            let mut g = m.adopt(baton);
            *g += 1;
        })
    };
    remote.join().unwrap();

    assert!(!m.is_locked());
    assert_eq!(*m.lock(), 11);
}

#[test]
#[should_panic(expected = "baton belongs to a different lock")]
fn adopting_foreign_baton_panics() {
    let a = TicketMutex::new(());
    let b = TicketMutex::new(());
    let baton = a.lock().hand_off();
    let _g = b.adopt(baton);
}

#[test]
fn ticket_mutex_is_exclusive_under_contention() {
    let threads = 4;
    let iters = 2_000;
    let m = Arc::new(TicketMutex::new(0_usize));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let m = Arc::clone(&m);
            thread::spawn(move || {
                for _ in 0..iters {
                    *m.lock() += 1;
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(*m.lock(), threads * iters);
}
