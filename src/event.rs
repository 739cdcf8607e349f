use std::{fmt, ops};

/// Handler invoked when an event fires. Runs on the reactor thread.
///
/// A handler may replace itself by storing a new handler through the
/// `&mut Event` it receives; otherwise the previous handler stays bound.
pub type EventHandler = Box<dyn FnMut(&mut Event) + Send>;

/// Backend-private slot value meaning "not registered".
pub const INVALID_INDEX: usize = 0xd0d0_d0d0;

/// State bits of one event, packed into a single word.
///
/// Every bit has a single-thread-at-a-time owner (the submitter before a
/// post, the pool until the completion drain, the reactor afterwards),
/// so no atomicity is needed.
#[derive(Copy, PartialEq, Eq, Clone)]
pub struct EventFlags(u32);

const ONESHOT: u32         = 0b0000_0000_0000_0000_0001;
const WRITE: u32           = 0b0000_0000_0000_0000_0010;
const INSTANCE: u32        = 0b0000_0000_0000_0000_0100;
const ACTIVE: u32          = 0b0000_0000_0000_0000_1000;
const DISABLED: u32        = 0b0000_0000_0000_0001_0000;
const POSTED: u32          = 0b0000_0000_0000_0010_0000;
const READY: u32           = 0b0000_0000_0000_0100_0000;
const COMPLETE: u32        = 0b0000_0000_0000_1000_0000;
const PENDING_EOF: u32     = 0b0000_0000_0001_0000_0000;
const ERROR: u32           = 0b0000_0000_0010_0000_0000;
const TIMEDOUT: u32        = 0b0000_0000_0100_0000_0000;
const TIMER_SET: u32       = 0b0000_0000_1000_0000_0000;
const DELAYED: u32         = 0b0000_0001_0000_0000_0000;
const ACCEPT: u32          = 0b0000_0010_0000_0000_0000;
const DEFERRED_ACCEPT: u32 = 0b0000_0100_0000_0000_0000;
const READ_DISCARDED: u32  = 0b0000_1000_0000_0000_0000;
const UNEXPECTED_EOF: u32  = 0b0001_0000_0000_0000_0000;
const OVERFLOW: u32        = 0b0010_0000_0000_0000_0000;

impl EventFlags {
    #[inline]
    pub fn empty() -> EventFlags {
        EventFlags(0)
    }

    #[inline]
    pub fn oneshot() -> EventFlags {
        EventFlags(ONESHOT)
    }

    #[inline]
    pub fn write() -> EventFlags {
        EventFlags(WRITE)
    }

    #[inline]
    pub fn instance() -> EventFlags {
        EventFlags(INSTANCE)
    }

    #[inline]
    pub fn active() -> EventFlags {
        EventFlags(ACTIVE)
    }

    #[inline]
    pub fn disabled() -> EventFlags {
        EventFlags(DISABLED)
    }

    #[inline]
    pub fn posted() -> EventFlags {
        EventFlags(POSTED)
    }

    #[inline]
    pub fn ready() -> EventFlags {
        EventFlags(READY)
    }

    #[inline]
    pub fn complete() -> EventFlags {
        EventFlags(COMPLETE)
    }

    #[inline]
    pub fn pending_eof() -> EventFlags {
        EventFlags(PENDING_EOF)
    }

    #[inline]
    pub fn error() -> EventFlags {
        EventFlags(ERROR)
    }

    #[inline]
    pub fn timedout() -> EventFlags {
        EventFlags(TIMEDOUT)
    }

    #[inline]
    pub fn timer_set() -> EventFlags {
        EventFlags(TIMER_SET)
    }

    #[inline]
    pub fn delayed() -> EventFlags {
        EventFlags(DELAYED)
    }

    #[inline]
    pub fn accept() -> EventFlags {
        EventFlags(ACCEPT)
    }

    #[inline]
    pub fn deferred_accept() -> EventFlags {
        EventFlags(DEFERRED_ACCEPT)
    }

    #[inline]
    pub fn read_discarded() -> EventFlags {
        EventFlags(READ_DISCARDED)
    }

    #[inline]
    pub fn unexpected_eof() -> EventFlags {
        EventFlags(UNEXPECTED_EOF)
    }

    #[inline]
    pub fn overflow() -> EventFlags {
        EventFlags(OVERFLOW)
    }

    #[inline]
    pub fn contains(self, other: EventFlags) -> bool {
        (self & other) == other
    }

    #[inline]
    pub fn insert(&mut self, other: EventFlags) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: EventFlags) {
        self.0 &= !other.0;
    }
}

impl ops::BitOr for EventFlags {
    type Output = EventFlags;

    #[inline]
    fn bitor(self, other: EventFlags) -> EventFlags {
        EventFlags(self.0 | other.0)
    }
}

impl ops::BitAnd for EventFlags {
    type Output = EventFlags;

    #[inline]
    fn bitand(self, other: EventFlags) -> EventFlags {
        EventFlags(self.0 & other.0)
    }
}

impl ops::Sub for EventFlags {
    type Output = EventFlags;

    #[inline]
    fn sub(self, other: EventFlags) -> EventFlags {
        EventFlags(self.0 & !other.0)
    }
}

impl fmt::Debug for EventFlags {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let mut one = false;
        let flags = [
            (EventFlags::oneshot(), "Oneshot"),
            (EventFlags::write(), "Write"),
            (EventFlags::instance(), "Instance"),
            (EventFlags::active(), "Active"),
            (EventFlags::disabled(), "Disabled"),
            (EventFlags::posted(), "Posted"),
            (EventFlags::ready(), "Ready"),
            (EventFlags::complete(), "Complete"),
            (EventFlags::pending_eof(), "PendingEof"),
            (EventFlags::error(), "Error"),
            (EventFlags::timedout(), "Timedout"),
            (EventFlags::timer_set(), "TimerSet"),
            (EventFlags::delayed(), "Delayed"),
            (EventFlags::accept(), "Accept"),
            (EventFlags::deferred_accept(), "DeferredAccept"),
            (EventFlags::read_discarded(), "ReadDiscarded"),
            (EventFlags::unexpected_eof(), "UnexpectedEof"),
            (EventFlags::overflow(), "Overflow"),
        ];

        write!(fmt, "EventFlags {{")?;

        for &(flag, msg) in &flags {
            if self.contains(flag) {
                if one {
                    write!(fmt, " | ")?
                }
                write!(fmt, "{}", msg)?;

                one = true
            }
        }

        write!(fmt, "}}")?;

        Ok(())
    }
}

/// State record for one I/O direction on one descriptor, or for one
/// asynchronous completion.
///
/// An event is owned by its containing connection or task; it is reset
/// on reuse and never copied while registered. `active` is set iff the
/// bound reactor currently holds a registration for it; `ready` means at
/// least one byte of I/O is known possible without blocking, and the
/// consumer clears it on observing `EAGAIN`.
pub struct Event {
    flags: EventFlags,
    handler: Option<EventHandler>,

    /// Backend-private slot; `INVALID_INDEX` when not registered.
    pub index: usize,

    /// Bytes known readable (or writable buffer space) where the backend
    /// reports a count; -1 where readiness is only a boolean.
    pub available: i64,

    /// Opaque back-reference to the owning connection or task context.
    pub data: u64,

    pub(crate) timer_key: Option<(u64, u64)>,
}

impl Event {
    pub fn new() -> Event {
        Event {
            flags: EventFlags::empty(),
            handler: None,
            index: INVALID_INDEX,
            available: -1,
            data: 0,
            timer_key: None,
        }
    }

    /// Clear all state for reuse, dropping any bound handler.
    pub fn reset(&mut self) {
        self.flags = EventFlags::empty();
        self.handler = None;
        self.index = INVALID_INDEX;
        self.available = -1;
        self.data = 0;
        self.timer_key = None;
    }

    pub fn set_handler(&mut self, handler: EventHandler) {
        self.handler = Some(handler);
    }

    pub fn take_handler(&mut self) -> Option<EventHandler> {
        self.handler.take()
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Fire the event: run the bound handler with the event itself.
    ///
    /// The handler is detached while it runs, so it may bind a
    /// replacement through the `&mut Event`; if it does not, it stays
    /// bound for the next fire.
    pub fn invoke(&mut self) {
        if let Some(mut handler) = self.handler.take() {
            handler(self);

            if self.handler.is_none() {
                self.handler = Some(handler);
            }
        }
    }

    #[inline]
    pub fn flags(&self) -> EventFlags {
        self.flags
    }

    #[inline]
    pub fn flags_mut(&mut self) -> &mut EventFlags {
        &mut self.flags
    }

    #[inline]
    pub fn is_oneshot(&self) -> bool {
        self.flags.contains(EventFlags::oneshot())
    }

    #[inline]
    pub fn set_oneshot(&mut self, on: bool) {
        self.set(EventFlags::oneshot(), on)
    }

    #[inline]
    pub fn is_write(&self) -> bool {
        self.flags.contains(EventFlags::write())
    }

    #[inline]
    pub(crate) fn set_write(&mut self, on: bool) {
        self.set(EventFlags::write(), on)
    }

    #[inline]
    pub fn is_instance(&self) -> bool {
        self.flags.contains(EventFlags::instance())
    }

    #[inline]
    pub(crate) fn set_instance(&mut self, on: bool) {
        self.set(EventFlags::instance(), on)
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.flags.contains(EventFlags::active())
    }

    #[inline]
    pub fn set_active(&mut self, on: bool) {
        self.set(EventFlags::active(), on)
    }

    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.flags.contains(EventFlags::disabled())
    }

    #[inline]
    pub fn set_disabled(&mut self, on: bool) {
        self.set(EventFlags::disabled(), on)
    }

    #[inline]
    pub fn is_posted(&self) -> bool {
        self.flags.contains(EventFlags::posted())
    }

    #[inline]
    pub(crate) fn set_posted(&mut self, on: bool) {
        self.set(EventFlags::posted(), on)
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.flags.contains(EventFlags::ready())
    }

    #[inline]
    pub fn set_ready(&mut self, on: bool) {
        self.set(EventFlags::ready(), on)
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.flags.contains(EventFlags::complete())
    }

    #[inline]
    pub fn set_complete(&mut self, on: bool) {
        self.set(EventFlags::complete(), on)
    }

    #[inline]
    pub fn is_pending_eof(&self) -> bool {
        self.flags.contains(EventFlags::pending_eof())
    }

    #[inline]
    pub fn set_pending_eof(&mut self, on: bool) {
        self.set(EventFlags::pending_eof(), on)
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.flags.contains(EventFlags::error())
    }

    #[inline]
    pub fn set_error(&mut self, on: bool) {
        self.set(EventFlags::error(), on)
    }

    #[inline]
    pub fn is_timedout(&self) -> bool {
        self.flags.contains(EventFlags::timedout())
    }

    #[inline]
    pub fn set_timedout(&mut self, on: bool) {
        self.set(EventFlags::timedout(), on)
    }

    #[inline]
    pub fn is_timer_set(&self) -> bool {
        self.flags.contains(EventFlags::timer_set())
    }

    #[inline]
    fn set(&mut self, flag: EventFlags, on: bool) {
        if on {
            self.flags.insert(flag);
        } else {
            self.flags.remove(flag);
        }
    }
}

impl Default for Event {
    fn default() -> Event {
        Event::new()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Event")
            .field("flags", &self.flags)
            .field("index", &self.index)
            .field("available", &self.available)
            .field("data", &self.data)
            .field("handler", &self.handler.as_ref().map(|_| "fn"))
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering::Relaxed;
    use std::sync::Arc;

    #[test]
    fn flags_start_clear() {
        let ev = Event::new();
        assert_eq!(ev.flags(), EventFlags::empty());
        assert_eq!(ev.index, INVALID_INDEX);
        assert!(!ev.is_active());
        assert!(!ev.is_ready());
    }

    #[test]
    fn invoke_keeps_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut ev = Event::new();

        let counter = hits.clone();
        ev.set_handler(Box::new(move |_| {
            counter.fetch_add(1, Relaxed);
        }));

        ev.invoke();
        ev.invoke();

        assert_eq!(hits.load(Relaxed), 2);
        assert!(ev.has_handler());
    }

    #[test]
    fn invoke_honours_replacement() {
        let mut ev = Event::new();

        ev.set_handler(Box::new(|ev| {
            ev.set_handler(Box::new(|ev| {
                ev.data = 2;
            }));
            ev.data = 1;
        }));

        ev.invoke();
        assert_eq!(ev.data, 1);

        ev.invoke();
        assert_eq!(ev.data, 2);
    }

    #[test]
    fn reset_clears_everything() {
        let mut ev = Event::new();
        ev.set_active(true);
        ev.set_ready(true);
        ev.data = 7;
        ev.index = 3;
        ev.set_handler(Box::new(|_| {}));

        ev.reset();

        assert_eq!(ev.flags(), EventFlags::empty());
        assert_eq!(ev.index, INVALID_INDEX);
        assert_eq!(ev.data, 0);
        assert!(!ev.has_handler());
    }
}
