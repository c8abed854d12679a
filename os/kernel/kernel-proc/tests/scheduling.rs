use kernel_proc::param::QUANTUM_TICKS;
use kernel_proc::{KernelConfig, Machine, Pid, Priority, ProcState};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// One executed tick: who ran it, at which level, and the accounting after it.
#[derive(Debug, Copy, Clone)]
struct Tick {
    pid: Pid,
    level: Priority,
    after: (Priority, u32),
}

fn run_cpu_bound(procs: usize, ticks: u32) -> Vec<Tick> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let shared = Arc::clone(&log);

    Machine::boot(KernelConfig::default().with_phys_pages(128))
        .run(move |init| {
            for _ in 0..procs {
                let log = Arc::clone(&shared);
                init.fork(move |p| {
                    for _ in 0..ticks {
                        let level = p.info().priority;
                        p.compute(1);
                        let after = p.info();
                        log.lock().unwrap().push(Tick {
                            pid: p.pid(),
                            level,
                            after: (after.priority, after.ticks_used),
                        });
                    }
                })
                .unwrap();
            }
            for _ in 0..procs {
                init.wait().unwrap();
            }
        })
        .unwrap();

    Arc::try_unwrap(log).unwrap().into_inner().unwrap()
}

#[test]
fn fifth_tick_demotes_to_low_priority() {
    let log = run_cpu_bound(2, 6);
    assert_eq!(log.len(), 12);

    let mut pids: Vec<Pid> = log.iter().map(|t| t.pid).collect();
    pids.sort_unstable();
    pids.dedup();
    for pid in pids {
        let mine: Vec<_> = log.iter().filter(|t| t.pid == pid).collect();
        let after: Vec<_> = mine.iter().map(|t| t.after).collect();
        assert_eq!(
            after,
            vec![
                (Priority::High, 1),
                (Priority::High, 2),
                (Priority::High, 3),
                (Priority::High, 4),
                (Priority::Low, 0),
                (Priority::Low, 1),
            ],
            "accounting of {pid}"
        );
        // no sixth tick at priority 0
        let high = mine.iter().filter(|t| t.level == Priority::High).count();
        assert_eq!(high, QUANTUM_TICKS as usize);
    }
}

#[test]
fn low_priority_never_runs_while_high_work_is_runnable() {
    let procs = 3;
    let ticks = 8_u32;
    let low_ticks = Arc::new(AtomicU32::new(0));
    let violations = Arc::new(Mutex::new(Vec::new()));

    Machine::boot(KernelConfig::default().with_phys_pages(128))
        .run({
            let (low_ticks, violations) = (Arc::clone(&low_ticks), Arc::clone(&violations));
            move |init| {
                for _ in 0..procs {
                    let (low_ticks, violations) = (Arc::clone(&low_ticks), Arc::clone(&violations));
                    init.fork(move |p| {
                        for _ in 0..ticks {
                            // the table as seen while this process holds the CPU
                            let table = p.ps();
                            let me = table.iter().find(|q| q.pid == p.pid()).unwrap();
                            if me.priority == Priority::Low {
                                low_ticks.fetch_add(1, Ordering::SeqCst);
                                let waiting: Vec<Pid> = table
                                    .iter()
                                    .filter(|q| q.state == ProcState::Runnable && q.priority == Priority::High)
                                    .map(|q| q.pid)
                                    .collect();
                                if !waiting.is_empty() {
                                    violations.lock().unwrap().push((p.pid(), waiting));
                                }
                            }
                            p.compute(1);
                        }
                    })
                    .unwrap();
                }
                for _ in 0..procs {
                    init.wait().unwrap();
                }
            }
        })
        .unwrap();

    assert_eq!(*violations.lock().unwrap(), vec![]);
    assert_eq!(low_ticks.load(Ordering::SeqCst), 3 * (ticks - QUANTUM_TICKS));
}

#[test]
fn new_work_preempts_a_demoted_process() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let shared = Arc::clone(&order);

    Machine::boot(KernelConfig::default().with_phys_pages(128))
        .run(move |init| {
            let hog_log = Arc::clone(&shared);
            let stop = Arc::new(AtomicBool::new(false));
            let hog_stop = Arc::clone(&stop);
            let hog = init
                .fork(move |p| {
                    while !hog_stop.load(Ordering::SeqCst) {
                        p.compute(1);
                        hog_log.lock().unwrap().push("hog");
                    }
                })
                .unwrap();

            // let the hog use up its quantum
            init.sleep(2 * u64::from(QUANTUM_TICKS));

            let fresh_log = Arc::clone(&shared);
            let fresh = init
                .fork(move |p| {
                    fresh_log.lock().unwrap().push("fresh start");
                    p.compute(2);
                    fresh_log.lock().unwrap().push("fresh done");
                })
                .unwrap();
            assert_eq!(init.wait(), Ok(fresh));

            stop.store(true, Ordering::SeqCst);
            assert_eq!(init.wait(), Ok(hog));
        })
        .unwrap();

    let order = order.lock().unwrap();
    let start = order.iter().position(|e| *e == "fresh start").unwrap();
    // the hog is at priority 1 and does not run between the two entries
    assert_eq!(order[start + 1], "fresh done", "{order:?}");
}

#[test]
fn every_cpu_runs_its_own_scheduler() {
    let report = Machine::boot(KernelConfig::default().with_cpus(4).with_phys_pages(256))
        .run(|init| {
            let children: Vec<Pid> = (0..8)
                .map(|_| init.fork(|p| p.compute(20)).unwrap())
                .collect();
            let mut reaped: Vec<Pid> = (0..8).map(|_| init.wait().unwrap()).collect();
            reaped.sort_unstable();
            assert_eq!(reaped, children);
        })
        .unwrap();

    assert_eq!(report.dispatches.len(), 4);
    // each child is dispatched at least once per tick, plus its first run
    assert!(report.dispatches.iter().sum::<u64>() >= 8 * 21);
}
