//! The per-worker event loop core.
//!
//! A [`Reactor`] owns one backend driver, the connection registry, the
//! timer queue and the deferred-invocation list. It is strictly
//! single-threaded: every event handler, registration helper, timer
//! expiration and completion handler runs on the thread that calls
//! [`Reactor::process`]. The only cross-thread entry point is a
//! [`Notify`](crate::Notify) channel registered through
//! [`Reactor::register_notify`].

use std::collections::VecDeque;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;
use std::{cmp, mem};

use log::debug;
use slab::Slab;

use crate::capability::Capability;
use crate::error::{Error, Result};
use crate::event::{Event, EventFlags, EventHandler};
use crate::notify::Notify;
use crate::token::Token;

pub use driver::{ControlFlags, Direction, Driver, Fired};
pub use epoll::EpollDriver;

mod driver;
mod epoll;
mod timer;

use timer::TimerQueue;

/// One registered descriptor: a read event and a write event sharing an
/// fd and a registry slot.
pub struct Conn {
    fd: RawFd,
    key: usize,
    registered: bool,
    pub read: Event,
    pub write: Event,
}

impl Conn {
    fn new(fd: RawFd, key: usize, instance: bool) -> Conn {
        let mut read = Event::new();
        let mut write = Event::new();

        read.set_instance(instance);
        write.set_instance(instance);
        write.set_write(true);

        Conn {
            fd,
            key,
            registered: false,
            read,
            write,
        }
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    #[inline]
    pub fn key(&self) -> usize {
        self.key
    }

    /// Whether the kernel currently holds a registration for this fd.
    ///
    /// Owned by the backend: drivers set it on the first kernel add and
    /// clear it on the final delete (or when the fd closes). It is
    /// deliberately separate from the events' `active` bookkeeping, so
    /// re-arming an event whose registration was consumed goes through
    /// a modify instead of a second add.
    #[inline]
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    #[inline]
    pub fn set_registered(&mut self, on: bool) {
        self.registered = on;
    }

    /// The token the backend carries through the kernel for this
    /// registration.
    #[inline]
    pub fn token(&self) -> Token {
        Token::new(self.key, self.read.is_instance())
    }

    #[inline]
    pub fn event(&self, dir: Direction) -> &Event {
        match dir {
            Direction::Read => &self.read,
            Direction::Write => &self.write,
        }
    }

    #[inline]
    pub fn event_mut(&mut self, dir: Direction) -> &mut Event {
        match dir {
            Direction::Read => &mut self.read,
            Direction::Write => &mut self.write,
        }
    }
}

/// The per-worker reactor: one driver, one registry, one thread.
pub struct Reactor<D: Driver> {
    driver: D,
    conns: Slab<Conn>,
    generations: Vec<bool>,
    timer: TimerQueue,
    posted: VecDeque<(usize, Direction)>,
    fired: Vec<Fired>,
}

impl<D: Driver> Reactor<D> {
    pub fn new(mut driver: D) -> Result<Reactor<D>> {
        driver.init().map_err(Error::Platform)?;

        Ok(Reactor {
            driver,
            conns: Slab::new(),
            generations: Vec::new(),
            timer: TimerQueue::new(),
            posted: VecDeque::new(),
            fired: Vec::new(),
        })
    }

    #[inline]
    pub fn capabilities(&self) -> Capability {
        self.driver.capabilities()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Claim a registry slot for `fd` and return its key.
    ///
    /// No kernel registration happens here; that is driven by the
    /// readiness helpers. Reusing a slot flips its generation bit so a
    /// notification still in flight for the previous occupant is
    /// recognised as stale.
    pub fn register(&mut self, fd: RawFd) -> usize {
        let entry = self.conns.vacant_entry();
        let key = entry.key();

        let instance = if key < self.generations.len() {
            self.generations[key] = !self.generations[key];
            self.generations[key]
        } else {
            self.generations.resize(key + 1, false);
            false
        };

        entry.insert(Conn::new(fd, key, instance));
        key
    }

    /// Tear down a registration: remove any kernel interest, cancel its
    /// timers, drop its posted entries and release the slot.
    pub fn deregister(&mut self, key: usize, flags: ControlFlags) -> Result<()> {
        {
            let conn = self.conns.get_mut(key).ok_or(Error::UnknownConn(key))?;

            if conn.read.is_active() || conn.write.is_active() || conn.is_registered() {
                self.driver.del_conn(conn, flags).map_err(Error::Backend)?;
            }
        }

        let mut conn = self.conns.remove(key);

        if let Some(tk) = conn.read.timer_key.take() {
            self.timer.cancel(tk);
        }
        if let Some(tk) = conn.write.timer_key.take() {
            self.timer.cancel(tk);
        }

        self.posted.retain(|&(k, _)| k != key);

        Ok(())
    }

    pub fn conn(&self, key: usize) -> Option<&Conn> {
        self.conns.get(key)
    }

    pub fn conn_mut(&mut self, key: usize) -> Option<&mut Conn> {
        self.conns.get_mut(key)
    }

    /// Bring the kernel registration for the read side of `key` in line
    /// with the event's state.
    ///
    /// Under clear semantics a non-active, non-ready event is armed once
    /// and stays armed. Under level semantics a non-active, non-ready
    /// event is armed, and an armed event whose readiness has been
    /// observed (or whose fd is closing) is disarmed so the kernel does
    /// not storm the loop; the consumer re-arms after it reports "not
    /// ready". Backends with implicit registration need no calls at all.
    pub fn handle_read(&mut self, key: usize, flags: ControlFlags) -> Result<()> {
        self.handle(key, Direction::Read, flags)
    }

    /// Symmetric write variant of [`handle_read`](Reactor::handle_read).
    pub fn handle_write(&mut self, key: usize, flags: ControlFlags) -> Result<()> {
        self.handle(key, Direction::Write, flags)
    }

    fn handle(&mut self, key: usize, dir: Direction, flags: ControlFlags) -> Result<()> {
        let caps = self.driver.capabilities();
        let conn = self.conns.get_mut(key).ok_or(Error::UnknownConn(key))?;

        if caps.is_clear() {
            let ev = conn.event(dir);

            if !ev.is_active() && !ev.is_ready() {
                let mut mode = ControlFlags::clear();

                // A oneshot event asks the kernel to consume the filter
                // with it.
                if ev.is_oneshot() {
                    mode.insert(ControlFlags::oneshot());
                }

                self.driver
                    .add(conn, dir, mode)
                    .map_err(Error::Backend)?;
                conn.event_mut(dir).set_active(true);
            }

            return Ok(());
        }

        if caps.is_level() {
            let ev = conn.event(dir);

            if !ev.is_active() && !ev.is_ready() {
                self.driver
                    .add(conn, dir, ControlFlags::level())
                    .map_err(Error::Backend)?;
                conn.event_mut(dir).set_active(true);
            } else if ev.is_active() && (ev.is_ready() || flags.is_close()) {
                self.driver
                    .del(conn, dir, flags | ControlFlags::level())
                    .map_err(Error::Backend)?;
                conn.event_mut(dir).set_active(false);
            }

            return Ok(());
        }

        // Completion-based and globally-registered backends: nothing to
        // arm or disarm per event.
        Ok(())
    }

    /// Level-only toggle used when the caller knows the backend is
    /// level-triggered and flips the event against its readiness.
    pub fn handle_level_read(&mut self, key: usize) -> Result<()> {
        self.handle_level(key, Direction::Read)
    }

    pub fn handle_level_write(&mut self, key: usize) -> Result<()> {
        self.handle_level(key, Direction::Write)
    }

    fn handle_level(&mut self, key: usize, dir: Direction) -> Result<()> {
        let conn = self.conns.get_mut(key).ok_or(Error::UnknownConn(key))?;
        let ev = conn.event(dir);

        if ev.is_active() && ev.is_ready() {
            self.driver
                .del(conn, dir, ControlFlags::level())
                .map_err(Error::Backend)?;
            conn.event_mut(dir).set_active(false);
        } else if !ev.is_active() && !ev.is_ready() {
            self.driver
                .add(conn, dir, ControlFlags::level())
                .map_err(Error::Backend)?;
            conn.event_mut(dir).set_active(true);
        }

        Ok(())
    }

    /// Register both directions at once through the backend's batched
    /// form.
    pub fn add_conn(&mut self, key: usize) -> Result<()> {
        let conn = self.conns.get_mut(key).ok_or(Error::UnknownConn(key))?;

        self.driver.add_conn(conn).map_err(Error::Backend)?;

        conn.read.set_active(true);
        conn.write.set_active(true);

        Ok(())
    }

    pub fn del_conn(&mut self, key: usize, flags: ControlFlags) -> Result<()> {
        let conn = self.conns.get_mut(key).ok_or(Error::UnknownConn(key))?;

        self.driver.del_conn(conn, flags).map_err(Error::Backend)?;

        conn.read.set_active(false);
        conn.write.set_active(false);

        Ok(())
    }

    /// Arm (or re-arm) the timer for one direction of `key`.
    pub fn add_timer(&mut self, key: usize, dir: Direction, after: Duration) -> Result<()> {
        let conn = self.conns.get_mut(key).ok_or(Error::UnknownConn(key))?;

        if let Some(tk) = conn.event_mut(dir).timer_key.take() {
            self.timer.cancel(tk);
        }

        let deadline = self.timer.now_ms() + after.as_millis() as u64;
        let tk = self.timer.schedule(deadline, key, dir);

        if let Some(conn) = self.conns.get_mut(key) {
            let ev = conn.event_mut(dir);
            ev.timer_key = Some(tk);
            ev.flags_mut().insert(EventFlags::timer_set());
            ev.set_timedout(false);
        }

        Ok(())
    }

    pub fn del_timer(&mut self, key: usize, dir: Direction) -> Result<()> {
        let conn = self.conns.get_mut(key).ok_or(Error::UnknownConn(key))?;
        let ev = conn.event_mut(dir);

        if let Some(tk) = ev.timer_key.take() {
            self.timer.cancel(tk);
        }
        ev.flags_mut().remove(EventFlags::timer_set());

        Ok(())
    }

    /// Defer one direction of `key` for invocation after the current
    /// process cycle. Posting an already-posted event is a no-op.
    pub fn post(&mut self, key: usize, dir: Direction) -> Result<()> {
        let conn = self.conns.get_mut(key).ok_or(Error::UnknownConn(key))?;
        let ev = conn.event_mut(dir);

        if !ev.is_posted() {
            ev.set_posted(true);
            self.posted.push_back((key, dir));
        }

        Ok(())
    }

    /// Bind `handler` to the notify channel and arm it with the
    /// backend. Returns the channel's pseudo-connection key.
    pub fn register_notify(&mut self, notify: &Notify, handler: EventHandler) -> Result<usize> {
        let key = self.register(notify.as_raw_fd());

        if let Some(conn) = self.conns.get_mut(key) {
            conn.read.set_handler(handler);
        }

        self.handle_read(key, ControlFlags::empty())?;

        Ok(key)
    }

    /// One reactor cycle: wait on the kernel (clamped by the nearest
    /// timer), dispatch ready events, expire timers, drain the posted
    /// list. Handlers run synchronously on the calling thread.
    pub fn process(&mut self, timeout: Option<Duration>) -> Result<usize> {
        let timeout = match (timeout, self.timer.next_timeout()) {
            (Some(a), Some(b)) => Some(cmp::min(a, b)),
            (a, b) => a.or(b),
        };

        let mut fired = mem::take(&mut self.fired);

        let n = match self.driver.wait(timeout, &mut fired) {
            Ok(n) => n,
            Err(err) => {
                self.fired = fired;
                return Err(Error::Platform(err));
            }
        };

        for f in fired.drain(..) {
            self.dispatch_fired(f);
        }
        self.fired = fired;

        self.expire_timers();
        self.drain_posted();

        Ok(n)
    }

    fn dispatch_fired(&mut self, f: Fired) {
        let caps = self.driver.capabilities();
        let key = f.token.key();

        match self.conns.get(key) {
            Some(conn) => {
                if caps.is_instance() && conn.read.is_instance() != f.token.instance() {
                    debug!(
                        "stale event: slot {} instance {} != {}",
                        key,
                        f.token.instance(),
                        conn.read.is_instance()
                    );
                    return;
                }
            }
            None => {
                debug!("stale event: slot {} is vacant", key);
                return;
            }
        }

        if f.ready.is_readable() || f.ready.is_error() || f.ready.is_hup() {
            self.fire(key, Direction::Read, &f, caps);
        }

        if f.ready.is_writable() || f.ready.is_error() {
            self.fire(key, Direction::Write, &f, caps);
        }
    }

    fn fire(&mut self, key: usize, dir: Direction, f: &Fired, caps: Capability) {
        let conn = match self.conns.get_mut(key) {
            Some(conn) => conn,
            None => return,
        };

        let ev = conn.event_mut(dir);

        if !ev.is_active() || ev.is_disabled() {
            return;
        }

        // A oneshot filter is consumed by the kernel at fire time.
        if caps.is_oneshot() || ev.is_oneshot() {
            ev.set_active(false);
        }

        if f.ready.is_error() {
            ev.set_error(true);
        }

        if dir == Direction::Read && f.ready.is_hup() {
            ev.set_pending_eof(true);
        }

        ev.available = f.available;
        ev.set_ready(true);

        ev.invoke();
    }

    fn expire_timers(&mut self) {
        if self.timer.is_empty() {
            return;
        }

        let now = self.timer.now_ms();
        let mut due = Vec::new();
        self.timer.expire(now, &mut due);

        for (key, dir) in due {
            let conn = match self.conns.get_mut(key) {
                Some(conn) => conn,
                None => continue,
            };

            let ev = conn.event_mut(dir);
            ev.timer_key = None;
            ev.flags_mut().remove(EventFlags::timer_set());
            ev.set_timedout(true);
            ev.invoke();
        }
    }

    fn drain_posted(&mut self) {
        while let Some((key, dir)) = self.posted.pop_front() {
            let conn = match self.conns.get_mut(key) {
                Some(conn) => conn,
                None => continue,
            };

            let ev = conn.event_mut(dir);
            ev.set_posted(false);
            ev.invoke();
        }
    }
}

impl<D: Driver> Drop for Reactor<D> {
    fn drop(&mut self) {
        let _ = self.driver.done();
    }
}
