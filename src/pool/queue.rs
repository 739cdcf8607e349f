//! Intrusive lock-free task queue.
//!
//! `first` holds the head task; `last_p` points at the tail link cell:
//! the head cell itself while the queue is empty, otherwise the tail
//! task's `next` field. A producer claims the tail link cell with one
//! CAS of `last_p`, then publishes its task with a release store
//! through the claimed cell; the two steps together atomically append
//! the task. Producers are lock-free; consumers coordinate through a
//! light spin lock and repair `last_p` on the non-empty-to-empty
//! transition.

use std::hint;
use std::ptr;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::sync::atomic::{AtomicBool, AtomicPtr};

use super::Task;

pub(crate) struct TaskQueue {
    // Heap head cell, so its address survives moves of the queue
    // itself. Freed in Drop.
    first: *mut AtomicPtr<Task>,
    last_p: AtomicPtr<AtomicPtr<Task>>,
    lock: AtomicBool,
}

unsafe impl Send for TaskQueue {}
unsafe impl Sync for TaskQueue {}

impl TaskQueue {
    pub fn new() -> TaskQueue {
        let first = Box::into_raw(Box::new(AtomicPtr::new(ptr::null_mut())));

        TaskQueue {
            first,
            last_p: AtomicPtr::new(first),
            lock: AtomicBool::new(false),
        }
    }

    #[inline]
    fn head(&self) -> *mut AtomicPtr<Task> {
        self.first
    }

    /// Append `task`. Callable from any thread.
    ///
    /// Safety: `task` must be a live pointer obtained from
    /// `Box::into_raw` and must not be touched by the caller until it
    /// comes back out of [`pop`](TaskQueue::pop).
    pub unsafe fn push(&self, task: *mut Task) {
        (*task).next.store(ptr::null_mut(), Relaxed);

        let tail = &(*task).next as *const AtomicPtr<Task> as *mut AtomicPtr<Task>;

        loop {
            let lp = self.last_p.load(Acquire);

            if self
                .last_p
                .compare_exchange_weak(lp, tail, AcqRel, Acquire)
                .is_ok()
            {
                // The claimed link cell has exactly one writer: us. The
                // release store publishes every prior write to the task.
                (*lp).store(task, Release);
                break;
            }
        }
    }

    /// Detach the head task, or null when the queue is empty.
    ///
    /// Null is also returned while an appender is between its tail
    /// claim and its publication; a caller that knows an item is due
    /// (semaphore-gated) yields and retries.
    pub unsafe fn pop(&self) -> *mut Task {
        while self.lock.swap(true, Acquire) {
            hint::spin_loop();
        }

        let task = self.pop_locked();

        self.lock.store(false, Release);

        task
    }

    unsafe fn pop_locked(&self) -> *mut Task {
        let task = (*self.first).load(Acquire);

        if task.is_null() {
            return ptr::null_mut();
        }

        let next = (*task).next.load(Acquire);
        (*self.first).store(next, Release);

        if next.is_null() {
            // We may have taken the tail; retire the tail link back to
            // the head cell.
            let tail = &(*task).next as *const AtomicPtr<Task> as *mut AtomicPtr<Task>;

            if self
                .last_p
                .compare_exchange(tail, self.head(), AcqRel, Acquire)
                .is_err()
            {
                // An appender already claimed our tail link; await its
                // publication, then restore the head it linked.
                loop {
                    let linked = (*task).next.load(Acquire);

                    if !linked.is_null() {
                        (*self.first).store(linked, Release);
                        break;
                    }

                    hint::spin_loop();
                }
            }
        }

        task
    }

    pub fn is_empty(&self) -> bool {
        unsafe { (*self.first).load(Acquire).is_null() }
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        // No other thread can hold the queue any more; release whatever
        // is still linked, then the head cell.
        unsafe {
            loop {
                let task = self.pop();

                if task.is_null() {
                    break;
                }

                drop(Box::from_raw(task));
            }

            drop(Box::from_raw(self.first));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::channel;
    use std::sync::Arc;
    use std::thread;

    use super::super::Task;
    use super::TaskQueue;

    fn task(id: u64) -> *mut Task {
        let mut task = Task::new(|_| {}, Box::new(|_| {}));
        task.id = id;
        Box::into_raw(task)
    }

    unsafe fn reclaim(ptr: *mut Task) -> u64 {
        let task = Box::from_raw(ptr);
        task.id
    }

    #[test]
    fn fifo_single_thread() {
        let queue = TaskQueue::new();

        assert!(queue.is_empty());
        assert!(unsafe { queue.pop() }.is_null());

        unsafe {
            queue.push(task(1));
            queue.push(task(2));
            queue.push(task(3));
        }

        unsafe {
            assert_eq!(reclaim(queue.pop()), 1);
            assert_eq!(reclaim(queue.pop()), 2);
            assert_eq!(reclaim(queue.pop()), 3);
        }

        assert!(unsafe { queue.pop() }.is_null());
        assert!(queue.is_empty());
    }

    #[test]
    fn empty_one_empty_transitions() {
        let queue = TaskQueue::new();

        for round in 0..1000 {
            unsafe {
                queue.push(task(round));
                assert_eq!(reclaim(queue.pop()), round);
                assert!(queue.pop().is_null());
            }
        }
    }

    #[test]
    fn concurrent_producers_single_consumer() {
        let nthreads = 8;
        let nmsgs = 1000;
        let queue = Arc::new(TaskQueue::new());
        let (tx, rx) = channel();

        for t in 0..nthreads {
            let queue = queue.clone();
            let tx = tx.clone();

            thread::spawn(move || {
                for i in 0..nmsgs {
                    unsafe { queue.push(task((t * nmsgs + i) as u64)) };
                }
                tx.send(()).unwrap();
            });
        }

        let mut seen = vec![false; nthreads * nmsgs];
        let mut count = 0;

        while count < nthreads * nmsgs {
            let ptr = unsafe { queue.pop() };

            if ptr.is_null() {
                thread::yield_now();
                continue;
            }

            let id = unsafe { reclaim(ptr) } as usize;
            assert!(!seen[id], "task {} delivered twice", id);
            seen[id] = true;
            count += 1;
        }

        for _ in 0..nthreads {
            rx.recv().unwrap();
        }

        assert!(unsafe { queue.pop() }.is_null());
    }

    #[test]
    fn concurrent_producers_and_consumers() {
        let nproducers = 4;
        let nconsumers = 4;
        let nmsgs = 2000;
        let queue = Arc::new(TaskQueue::new());
        let (tx, rx) = channel();

        for t in 0..nproducers {
            let queue = queue.clone();

            thread::spawn(move || {
                for i in 0..nmsgs {
                    unsafe { queue.push(task((t * nmsgs + i) as u64)) };
                }
            });
        }

        for _ in 0..nconsumers {
            let queue = queue.clone();
            let tx = tx.clone();

            thread::spawn(move || {
                let mut ids = Vec::new();

                while ids.len() < nmsgs {
                    let ptr = unsafe { queue.pop() };

                    if ptr.is_null() {
                        thread::yield_now();
                        continue;
                    }

                    ids.push(unsafe { reclaim(ptr) });
                }

                tx.send(ids).unwrap();
            });
        }

        let mut seen = vec![false; nproducers * nmsgs];

        for _ in 0..nconsumers {
            for id in rx.recv().unwrap() {
                assert!(!seen[id as usize], "task {} delivered twice", id);
                seen[id as usize] = true;
            }
        }

        assert!(seen.iter().all(|&s| s), "task lost");
    }
}
