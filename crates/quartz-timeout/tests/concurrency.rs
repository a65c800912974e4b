//! Cross-thread scheduling: concurrent add/del against a running tick driver,
//! and record migration when several CPUs fight over one timeout.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

use quartz_tick::CpuId;
use quartz_timeout::TimeoutScheduler;

const CPU0: CpuId = CpuId::new(0);
const CPU1: CpuId = CpuId::new(1);

fn tick_all(sched: &TimeoutScheduler) {
    sched.advance_tick();
    for cpu in 0..sched.ncpus() {
        let cpu = CpuId::new(cpu as u16);
        if sched.hardclock_update(cpu) {
            sched.softclock(cpu);
        }
    }
}

#[test]
fn add_del_racing_the_tick_driver() {
    let sched = Arc::new(TimeoutScheduler::new(2, 100));
    let fired = Arc::new(AtomicU32::new(0));
    let f = fired.clone();
    let id = sched.set(move |_, _| {
        f.fetch_add(1, Ordering::SeqCst);
    });

    let done = Arc::new(AtomicBool::new(false));
    let driver = {
        let sched = sched.clone();
        let done = done.clone();
        thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                tick_all(&sched);
            }
        })
    };

    const ITERS: u32 = 10_000;
    for i in 0..ITERS {
        let cpu = if i % 2 == 0 { CPU0 } else { CPU1 };
        sched.add(cpu, id, 1);
        sched.del(id);
    }
    done.store(true, Ordering::SeqCst);
    driver.join().unwrap();

    // Whatever interleaving happened, no scheduling can fire more than once.
    assert!(fired.load(Ordering::SeqCst) <= ITERS);

    // The last operation was a del; nothing may be left queued.
    for _ in 0..4 {
        tick_all(&sched);
    }
    assert!(!sched.pending(id));
}

#[test]
fn concurrent_adds_on_distinct_cpus_each_fire_once() {
    const NCPUS: usize = 4;
    const PER_CPU: usize = 64;
    let sched = Arc::new(TimeoutScheduler::new(NCPUS, 100));

    let mut workers = Vec::new();
    for cpu in 0..NCPUS {
        let sched = sched.clone();
        workers.push(thread::spawn(move || {
            let cpu = CpuId::new(cpu as u16);
            (0..PER_CPU)
                .map(|i| {
                    let fired = Arc::new(AtomicU32::new(0));
                    let f = fired.clone();
                    let id = sched.set(move |_, _| {
                        f.fetch_add(1, Ordering::SeqCst);
                    });
                    let rel = (i % 300 + 1) as i32;
                    assert!(sched.add(cpu, id, rel));
                    (id, fired)
                })
                .collect::<Vec<_>>()
        }));
    }
    let all: Vec<_> = workers
        .into_iter()
        .flat_map(|w| w.join().unwrap())
        .collect();

    for _ in 0..301 {
        tick_all(&sched);
    }
    for (id, fired) in all {
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!sched.pending(id));
        assert!(sched.triggered(id));
    }
}

#[test]
fn migration_race_leaves_exactly_one_queued_record() {
    let sched = Arc::new(TimeoutScheduler::new(2, 100));
    let fired = Arc::new(AtomicU32::new(0));
    let f = fired.clone();
    let id = sched.set(move |_, _| {
        f.fetch_add(1, Ordering::SeqCst);
    });

    let threads: Vec<_> = [CPU0, CPU1]
        .into_iter()
        .map(|cpu| {
            let sched = sched.clone();
            thread::spawn(move || {
                for _ in 0..2_000 {
                    sched.add(cpu, id, 1);
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    // No ticks ran, so nothing fired; the record must live on exactly one
    // wheel, however the adds interleaved.
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert!(sched.pending(id));
    let queued = sched.pending_dump(CPU0).len() + sched.pending_dump(CPU1).len();
    assert_eq!(queued, 1);

    for _ in 0..3 {
        tick_all(&sched);
    }
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(!sched.pending(id));
}
