//! Offload thread pools.
//!
//! A [`ThreadPool`] moves blocking work off the reactor thread. Intake
//! and completion travel through the intrusive lock-free queues in
//! [`queue`]; workers are gated by a counting semaphore; finished tasks
//! wake the reactor through its [`Notify`](crate::Notify) channel and
//! their completion handlers run on the reactor thread.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::Ordering::{AcqRel, Relaxed, SeqCst};
use std::sync::atomic::{fence, AtomicPtr, AtomicU64, AtomicUsize};
use std::sync::Arc;
use std::thread;

use log::{debug, error};

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::event::{Event, EventHandler};
use crate::notify::Notify;
use crate::reactor::{Driver, Reactor};
use crate::sys;

mod queue;
mod semaphore;

use queue::TaskQueue;
use semaphore::Semaphore;

/// Work executed on a pool thread. Receives the task so it can record
/// its outcome in the task's captures or the event's `error` bit;
/// failure must never cross the thread boundary any other way.
pub type TaskWork = Box<dyn FnOnce(&mut Task) + Send>;

/// One unit of offloaded work.
///
/// Runs on a pool thread, completes on the reactor: after the work
/// returns, the task crosses the completion queue and its event handler
/// is invoked on the reactor thread with `complete` set and `active`
/// cleared. The task is owned by the pool from post to completion.
pub struct Task {
    id: u64,
    work: Option<TaskWork>,
    pub event: Event,
    next: AtomicPtr<Task>,
}

impl Task {
    pub fn new<W>(work: W, done: EventHandler) -> Box<Task>
    where
        W: FnOnce(&mut Task) + Send + 'static,
    {
        let mut event = Event::new();
        event.set_handler(done);

        Box::new(Task {
            id: 0,
            work: Some(Box::new(work)),
            event,
            next: AtomicPtr::new(ptr::null_mut()),
        })
    }

    /// Shutdown sentinel: a worker that dequeues it exits its cycle.
    fn exit() -> Box<Task> {
        Box::new(Task {
            id: 0,
            work: None,
            event: Event::new(),
            next: AtomicPtr::new(ptr::null_mut()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Run the work in place. A panic is contained here and recorded in
    /// the event's `error` bit.
    ///
    /// This is also the degradation path for a rejected post: the
    /// caller may execute the returned task inline and then invoke its
    /// completion event itself.
    pub fn execute(&mut self) {
        if let Some(work) = self.work.take() {
            let outcome = {
                let task = &mut *self;
                panic::catch_unwind(AssertUnwindSafe(move || work(task)))
            };

            if outcome.is_err() {
                self.event.set_error(true);
            }
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Task")
            .field("id", &self.id)
            .field("event", &self.event)
            .finish()
    }
}

/// A rejected post, handing the task back so the caller can degrade
/// gracefully (run it inline, or fail the request).
pub struct PostError {
    pub error: Error,
    pub task: Box<Task>,
}

impl fmt::Debug for PostError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("PostError")
            .field("error", &self.error)
            .finish()
    }
}

impl fmt::Display for PostError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.error)
    }
}

impl std::error::Error for PostError {}

struct PoolInner {
    name: String,
    threads: usize,
    max_queue: usize,
    queue: TaskQueue,
    done: TaskQueue,
    sem: Semaphore,
    notify: Notify,
    waiting: AtomicUsize,
    next_id: AtomicU64,
}

/// A named set of worker threads draining one intake queue.
pub struct ThreadPool {
    inner: Arc<PoolInner>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(config: &PoolConfig) -> Result<ThreadPool> {
        let notify = Notify::new().map_err(Error::Platform)?;

        let inner = Arc::new(PoolInner {
            name: config.name.clone(),
            threads: config.threads,
            max_queue: config.max_queue,
            queue: TaskQueue::new(),
            done: TaskQueue::new(),
            sem: Semaphore::new(),
            notify,
            waiting: AtomicUsize::new(0),
            next_id: AtomicU64::new(0),
        });

        let mut threads = Vec::with_capacity(config.threads);

        for n in 0..config.threads {
            let worker = inner.clone();

            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.name, n))
                .spawn(move || worker_cycle(worker));

            match spawned {
                Ok(handle) => threads.push(handle),
                Err(err) => {
                    error!(
                        "thread pool \"{}\": thread creation failed: {}",
                        config.name, err
                    );

                    let mut pool = ThreadPool { inner, threads };
                    pool.shutdown();

                    return Err(Error::Platform(err));
                }
            }
        }

        Ok(ThreadPool { inner, threads })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn threads(&self) -> usize {
        self.inner.threads
    }

    pub fn max_queue(&self) -> usize {
        self.inner.max_queue
    }

    /// Tasks posted but not yet taken by a worker.
    pub fn waiting(&self) -> usize {
        self.inner.waiting.load(Relaxed)
    }

    /// True when neither queue holds a task.
    pub fn idle(&self) -> bool {
        self.inner.queue.is_empty() && self.inner.done.is_empty()
    }

    pub fn notify(&self) -> &Notify {
        &self.inner.notify
    }

    /// Submit a task.
    ///
    /// Rejects with `QueueOverflow` once `max_queue` tasks are waiting,
    /// handing the task back untouched with its event still inactive.
    /// On success the task's id is assigned and its event marked active;
    /// the id is monotonic per pool in post order.
    pub fn post(&self, task: Box<Task>) -> std::result::Result<u64, PostError> {
        let inner = &self.inner;
        let mut depth = inner.waiting.load(Relaxed);

        loop {
            if depth >= inner.max_queue {
                error!(
                    "thread pool \"{}\" queue overflow: {} tasks waiting",
                    inner.name, depth
                );

                return Err(PostError {
                    error: Error::QueueOverflow {
                        pool: inner.name.clone(),
                        depth,
                    },
                    task,
                });
            }

            match inner
                .waiting
                .compare_exchange_weak(depth, depth + 1, AcqRel, Relaxed)
            {
                Ok(_) => break,
                Err(current) => depth = current,
            }
        }

        let mut task = task;
        let id = inner.next_id.fetch_add(1, Relaxed);

        task.id = id;
        task.event.set_complete(false);
        task.event.set_active(true);

        let ptr = Box::into_raw(task);

        unsafe { inner.queue.push(ptr) };
        inner.sem.post();

        debug!("task #{} added to thread pool \"{}\"", id, inner.name);

        Ok(id)
    }

    /// Bind this pool's completion drain to `reactor` through the
    /// notify channel. Returns the channel's pseudo-connection key.
    pub fn attach<D: Driver>(&self, reactor: &mut Reactor<D>) -> Result<usize> {
        let inner = self.inner.clone();
        let notify = self.inner.notify.clone();

        reactor.register_notify(
            &notify,
            Box::new(move |_| {
                drain_completions(&inner);
            }),
        )
    }

    /// Drain the completion queue on the calling (reactor) thread,
    /// firing each task's completion event.
    pub fn drain(&self) {
        drain_completions(&self.inner);
    }

    /// Stop the pool: one poison task per thread, then join.
    ///
    /// Tasks queued ahead of the poison still execute; completions
    /// still parked when the pool is dropped are released undispatched.
    pub fn shutdown(&mut self) {
        if self.threads.is_empty() {
            return;
        }

        for _ in 0..self.threads.len() {
            let ptr = Box::into_raw(Task::exit());

            unsafe { self.inner.queue.push(ptr) };
            self.inner.sem.post();
        }

        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }

        debug!("thread pool \"{}\" stopped", self.inner.name);
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Completions still parked in the done queue are released by
        // the queue itself once the last reference goes away.
        self.shutdown();
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("ThreadPool")
            .field("name", &self.inner.name)
            .field("threads", &self.inner.threads)
            .field("max_queue", &self.inner.max_queue)
            .finish()
    }
}

fn worker_cycle(inner: Arc<PoolInner>) {
    if let Err(err) = sys::mask_all_signals() {
        error!("thread pool \"{}\": sigmask failed: {}", inner.name, err);
    }

    let current = thread::current();
    let name = current.name().unwrap_or("worker");

    debug!("thread {} in pool \"{}\" started", name, inner.name);

    loop {
        inner.sem.wait();

        // The semaphore said a task is due; a publisher may still be
        // between its tail claim and its store.
        let ptr = loop {
            let ptr = unsafe { inner.queue.pop() };

            if !ptr.is_null() {
                break ptr;
            }

            thread::yield_now();
        };

        let mut task = unsafe { Box::from_raw(ptr) };

        if task.work.is_none() {
            debug!("thread {} in pool \"{}\" exiting", name, inner.name);
            break;
        }

        inner.waiting.fetch_sub(1, AcqRel);

        debug!("run task #{} in thread pool \"{}\"", task.id, inner.name);

        task.execute();

        debug!("complete task #{} in thread pool \"{}\"", task.id, inner.name);

        let ptr = Box::into_raw(task);

        // Everything the handler wrote must be visible before the
        // completion publication.
        fence(SeqCst);

        unsafe { inner.done.push(ptr) };

        if let Err(err) = inner.notify.signal() {
            error!("thread pool \"{}\": notify failed: {}", inner.name, err);
        }
    }
}

fn drain_completions(inner: &PoolInner) {
    let _ = inner.notify.drain();

    loop {
        let ptr = unsafe { inner.done.pop() };

        if ptr.is_null() {
            return;
        }

        let mut task = unsafe { Box::from_raw(ptr) };

        task.event.set_complete(true);
        task.event.set_active(false);

        debug!(
            "task #{} completed in thread pool \"{}\"",
            task.id, inner.name
        );

        task.event.invoke();
    }
}
