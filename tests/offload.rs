//! Offload round-trips over the real epoll backend: post on the reactor
//! thread, execute on pool threads, complete back on the reactor.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use hive_io::config::PoolRegistry;
use hive_io::{
    ControlFlags, EpollDriver, Error, Notify, PoolConfig, Reactor, Role, Task, ThreadPool, Worker,
};

fn registry(directive: &str) -> PoolRegistry {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut registry = PoolRegistry::new();
    registry.parse_directive(directive).unwrap();
    registry
}

fn pump(worker: &mut Worker<EpollDriver>, done: &AtomicUsize, target: usize) {
    let deadline = Instant::now() + Duration::from_secs(30);

    while done.load(SeqCst) < target {
        assert!(Instant::now() < deadline, "completions stalled");
        worker
            .process(Some(Duration::from_millis(100)))
            .unwrap();
    }
}

#[test]
fn offload_round_trip_with_overflow() {
    let registry = registry("thread_pool default threads=2 max_queue=4");
    let mut worker = Worker::init(&registry, Role::Worker).unwrap();

    let reactor_thread = thread::current().id();
    let completions = Arc::new(AtomicUsize::new(0));
    let values = Arc::new(Mutex::new(Vec::new()));

    // Park both workers so the intake depth is observable.
    let entry = Arc::new(Barrier::new(3));
    let exit = Arc::new(Barrier::new(3));

    for _ in 0..2 {
        let entry = entry.clone();
        let exit = exit.clone();
        let done = completions.clone();

        let blocker = Task::new(
            move |_| {
                entry.wait();
                exit.wait();
            },
            Box::new(move |ev| {
                assert!(ev.is_complete());
                done.fetch_add(1, SeqCst);
            }),
        );

        worker.pool("default").unwrap().post(blocker).unwrap();
    }

    entry.wait();

    // Both threads busy: four sleepers fill the queue to max_queue.
    for i in 0..4u64 {
        let done = completions.clone();
        let values = values.clone();
        let seen = Arc::new(AtomicUsize::new(usize::MAX));
        let store = seen.clone();
        let expected = reactor_thread;

        let sleeper = Task::new(
            move |_| {
                thread::sleep(Duration::from_millis(10));
                store.store(i as usize, SeqCst);
            },
            Box::new(move |ev| {
                assert!(ev.is_complete());
                assert!(!ev.is_active());
                assert_eq!(thread::current().id(), expected);

                values.lock().unwrap().push(seen.load(SeqCst));
                done.fetch_add(1, SeqCst);
            }),
        );

        worker.pool("default").unwrap().post(sleeper).unwrap();
    }

    assert_eq!(worker.pool("default").unwrap().waiting(), 4);

    // The fifth concurrent post is rejected and hands the task back.
    let rejected = Task::new(|_| {}, Box::new(|_| {}));
    let err = worker.pool("default").unwrap().post(rejected).unwrap_err();

    assert!(matches!(
        err.error,
        Error::QueueOverflow { ref pool, depth } if pool == "default" && depth == 4
    ));
    assert!(!err.task.event.is_active());

    exit.wait();
    pump(&mut worker, &completions, 6);

    let mut values = values.lock().unwrap().clone();
    values.sort_unstable();
    assert_eq!(values, vec![0, 1, 2, 3]);
}

#[test]
fn rejected_task_can_run_inline() {
    let registry = registry("thread_pool default threads=1 max_queue=1");
    let mut worker = Worker::init(&registry, Role::Worker).unwrap();

    let gate = Arc::new(Barrier::new(2));
    let completions = Arc::new(AtomicUsize::new(0));

    let held = gate.clone();
    let done = completions.clone();
    let blocker = Task::new(
        move |_| {
            held.wait();
        },
        Box::new(move |_| {
            done.fetch_add(1, SeqCst);
        }),
    );
    worker.pool("default").unwrap().post(blocker).unwrap();

    // Wait until the single thread has taken the blocker, then fill the
    // queue back up.
    let deadline = Instant::now() + Duration::from_secs(5);
    while worker.pool("default").unwrap().waiting() > 0 {
        assert!(Instant::now() < deadline);
        thread::yield_now();
    }

    let done = completions.clone();
    let filler = Task::new(
        |_| {},
        Box::new(move |_| {
            done.fetch_add(1, SeqCst);
        }),
    );
    worker.pool("default").unwrap().post(filler).unwrap();

    let ran = Arc::new(AtomicUsize::new(0));
    let mark = ran.clone();
    let overflow = Task::new(
        move |_| {
            mark.fetch_add(1, SeqCst);
        },
        Box::new(|_| {}),
    );

    let mut err = worker.pool("default").unwrap().post(overflow).unwrap_err();

    // Degrade gracefully: run the handed-back task on this thread.
    err.task.execute();
    assert_eq!(ran.load(SeqCst), 1);
    assert!(!err.task.event.is_error());

    gate.wait();
    pump(&mut worker, &completions, 2);
}

#[test]
fn drain_race_ten_thousand_tasks() {
    let registry = registry("thread_pool default threads=1");
    let mut worker = Worker::init(&registry, Role::Worker).unwrap();

    const TASKS: usize = 10_000;

    let completions = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(vec![false; TASKS]));
    let mut ids = Vec::with_capacity(TASKS);

    for i in 0..TASKS {
        let done = completions.clone();
        let seen = seen.clone();

        let task = Task::new(
            move |task| {
                task.event.data = i as u64;
            },
            Box::new(move |ev| {
                let mut seen = seen.lock().unwrap();
                let slot = ev.data as usize;
                assert!(!seen[slot], "completion {} dispatched twice", slot);
                seen[slot] = true;
                done.fetch_add(1, SeqCst);
            }),
        );

        let id = worker.pool("default").unwrap().post(task).unwrap();
        ids.push(id);

        // Keep the completion side moving while posting.
        if i % 128 == 0 {
            worker.process(Some(Duration::from_millis(0))).unwrap();
        }
    }

    // Post order is id order on a single submitting thread.
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    pump(&mut worker, &completions, TASKS);

    assert!(seen.lock().unwrap().iter().all(|&s| s), "completion lost");
    assert_eq!(worker.pool("default").unwrap().waiting(), 0);
    assert!(worker.pool("default").unwrap().idle());
}

#[test]
fn notify_coalescing_drains_everything() {
    let registry = registry("thread_pool default threads=4 max_queue=1024");
    let mut worker = Worker::init(&registry, Role::Worker).unwrap();

    const TASKS: usize = 100;

    let completions = Arc::new(AtomicUsize::new(0));

    for _ in 0..TASKS {
        let done = completions.clone();
        let task = Task::new(
            |_| {},
            Box::new(move |_| {
                done.fetch_add(1, SeqCst);
            }),
        );
        worker.pool("default").unwrap().post(task).unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(30);
    let mut wakeups = 0;

    while completions.load(SeqCst) < TASKS {
        assert!(Instant::now() < deadline, "completions stalled");

        let n = worker.process(Some(Duration::from_millis(100))).unwrap();
        if n > 0 {
            wakeups += 1;
        }
    }

    // 100 signals may coalesce, but never into zero wake-ups and never
    // into more than one per signal.
    assert!(wakeups >= 1);
    assert!(wakeups <= TASKS);
    assert_eq!(completions.load(SeqCst), TASKS);
}

#[test]
fn worker_panic_sets_error_bit() {
    let registry = registry("thread_pool default threads=1");
    let mut worker = Worker::init(&registry, Role::Worker).unwrap();

    let completions = Arc::new(AtomicUsize::new(0));
    let errors = Arc::new(AtomicUsize::new(0));

    let done = completions.clone();
    let failed = errors.clone();

    let task = Task::new(
        |_| panic!("worker handler exploded"),
        Box::new(move |ev| {
            if ev.is_error() {
                failed.fetch_add(1, SeqCst);
            }
            done.fetch_add(1, SeqCst);
        }),
    );

    worker.pool("default").unwrap().post(task).unwrap();
    pump(&mut worker, &completions, 1);

    assert_eq!(errors.load(SeqCst), 1);
}

#[test]
fn completion_handler_may_repost() {
    let mut reactor = Reactor::new(EpollDriver::new().unwrap()).unwrap();

    let config = PoolConfig::new("chain", 2, 64);
    let pool = Arc::new(ThreadPool::new(&config).unwrap());
    pool.attach(&mut reactor).unwrap();

    let completions = Arc::new(AtomicUsize::new(0));
    let done = completions.clone();
    let chain = pool.clone();

    let task = Task::new(
        |_| {},
        Box::new(move |_| {
            if done.fetch_add(1, SeqCst) == 0 {
                // First completion posts a follow-up from inside the
                // reactor-side handler.
                let done = done.clone();
                let followup = Task::new(
                    |_| {},
                    Box::new(move |_| {
                        done.fetch_add(1, SeqCst);
                    }),
                );
                chain.post(followup).unwrap();
            }
        }),
    );

    pool.post(task).unwrap();

    let deadline = Instant::now() + Duration::from_secs(30);
    while completions.load(SeqCst) < 2 {
        assert!(Instant::now() < deadline, "completions stalled");
        reactor.process(Some(Duration::from_millis(100))).unwrap();
    }
}

#[test]
fn master_role_starts_no_pools() {
    let registry = registry("thread_pool default threads=2");
    let worker = Worker::init(&registry, Role::Master).unwrap();

    assert_eq!(worker.pools().count(), 0);
    assert!(matches!(
        worker.pool("default"),
        Err(Error::UnknownPool(_))
    ));
}

#[test]
fn single_role_starts_declared_and_default_pools() {
    let mut registry = PoolRegistry::new();
    registry
        .parse_directive("thread_pool uploads threads=1 max_queue=8")
        .unwrap();

    let worker = Worker::init(&registry, Role::Single).unwrap();

    let uploads = worker.pool("uploads").unwrap();
    assert_eq!(uploads.threads(), 1);
    assert_eq!(uploads.max_queue(), 8);

    // The default pool is auto-provided alongside.
    let default = worker.pool("default").unwrap();
    assert_eq!(default.threads(), 32);
    assert_eq!(default.max_queue(), 65536);
}

#[test]
fn oneshot_rearm_over_epoll() {
    use std::os::unix::io::AsRawFd;

    let mut reactor = Reactor::new(EpollDriver::new().unwrap()).unwrap();

    // An eventfd gives the test a real pollable descriptor to fire.
    let source = Notify::new().unwrap();
    let key = reactor.register(source.as_raw_fd());

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    {
        let conn = reactor.conn_mut(key).unwrap();
        conn.read.set_oneshot(true);
        conn.read.set_handler(Box::new(move |ev| {
            assert!(!ev.is_active());
            counter.fetch_add(1, SeqCst);
        }));
    }

    reactor.handle_read(key, ControlFlags::empty()).unwrap();
    assert!(reactor.conn(key).unwrap().read.is_active());

    source.signal().unwrap();

    let deadline = Instant::now() + Duration::from_secs(30);
    while hits.load(SeqCst) < 1 {
        assert!(Instant::now() < deadline, "first fire lost");
        reactor.process(Some(Duration::from_millis(100))).unwrap();
    }

    // Consumed at fire time.
    assert!(!reactor.conn(key).unwrap().read.is_active());

    // The usual re-arm discipline: drain, report "not ready", call the
    // helper again. The fd is still in the epoll set, so this must go
    // through a modify, not a second add.
    source.drain().unwrap();
    reactor.conn_mut(key).unwrap().read.set_ready(false);
    reactor.handle_read(key, ControlFlags::empty()).unwrap();
    assert!(reactor.conn(key).unwrap().read.is_active());

    source.signal().unwrap();

    while hits.load(SeqCst) < 2 {
        assert!(Instant::now() < deadline, "re-armed fire lost");
        reactor.process(Some(Duration::from_millis(100))).unwrap();
    }

    reactor.deregister(key, ControlFlags::empty()).unwrap();
}

#[test]
fn idle_process_returns_within_timeout() {
    let mut reactor = Reactor::new(EpollDriver::new().unwrap()).unwrap();

    let start = Instant::now();
    let n = reactor.process(Some(Duration::from_millis(50))).unwrap();

    assert_eq!(n, 0);
    assert!(start.elapsed() >= Duration::from_millis(40));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn shutdown_runs_queued_tasks_first() {
    let registry = registry("thread_pool default threads=1");
    let mut worker = Worker::init(&registry, Role::Worker).unwrap();

    let executed = Arc::new(AtomicUsize::new(0));

    for _ in 0..16 {
        let ran = executed.clone();
        let task = Task::new(
            move |_| {
                ran.fetch_add(1, SeqCst);
            },
            Box::new(|_| {}),
        );
        worker.pool("default").unwrap().post(task).unwrap();
    }

    // Poison lands behind the queued tasks; all of them still execute.
    worker.shutdown();

    assert_eq!(executed.load(SeqCst), 16);
}
