use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::driver::Direction;

/// Deadline queue for event timers.
///
/// Keys are (absolute milliseconds since reactor start, insertion seq);
/// the seq disambiguates equal deadlines. Insert, remove and min are
/// O(log n).
pub(crate) struct TimerQueue {
    entries: BTreeMap<(u64, u64), (usize, Direction)>,
    seq: u64,
    start: Instant,
}

impl TimerQueue {
    pub fn new() -> TimerQueue {
        TimerQueue {
            entries: BTreeMap::new(),
            seq: 0,
            start: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn schedule(&mut self, deadline_ms: u64, key: usize, dir: Direction) -> (u64, u64) {
        self.seq += 1;
        let timer_key = (deadline_ms, self.seq);
        self.entries.insert(timer_key, (key, dir));
        timer_key
    }

    pub fn cancel(&mut self, timer_key: (u64, u64)) {
        self.entries.remove(&timer_key);
    }

    /// Time until the earliest deadline; zero if it is already due.
    pub fn next_timeout(&self) -> Option<Duration> {
        let (&(deadline_ms, _), _) = self.entries.iter().next()?;
        Some(Duration::from_millis(
            deadline_ms.saturating_sub(self.now_ms()),
        ))
    }

    /// Pop every entry due at `now_ms` into `due`.
    pub fn expire(&mut self, now_ms: u64, due: &mut Vec<(usize, Direction)>) {
        while let Some((&timer_key, &entry)) = self.entries.iter().next() {
            if timer_key.0 > now_ms {
                break;
            }

            self.entries.remove(&timer_key);
            due.push(entry);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
