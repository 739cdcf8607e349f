use std::sync::{Condvar, Mutex};

/// Counting semaphore gating worker dequeues.
#[derive(Debug)]
pub(crate) struct Semaphore {
    count: Mutex<usize>,
    condvar: Condvar,
}

impl Semaphore {
    pub fn new() -> Semaphore {
        Semaphore {
            count: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    pub fn post(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;

        self.condvar.notify_one();
    }

    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();

        loop {
            if *count > 0 {
                *count -= 1;
                return;
            }

            count = self.condvar.wait(count).unwrap();
        }
    }

}
