use std::{fmt, ops};

/// Semantics a bound reactor backend provides.
///
/// A backend writes its capability set once at init; every registration
/// helper branches on these flags instead of on the backend type, so the
/// event-management logic stays capability-driven.
#[derive(Copy, PartialEq, Eq, Clone, PartialOrd, Ord)]
pub struct Capability(usize);

const LEVEL: usize    = 0b0000_0000_0001;
const ONESHOT: usize  = 0b0000_0000_0010;
const CLEAR: usize    = 0b0000_0000_0100;
const KQUEUE: usize   = 0b0000_0000_1000;
const LOWAT: usize    = 0b0000_0001_0000;
const INSTANCE: usize = 0b0000_0010_0000;
const GREEDY: usize   = 0b0000_0100_0000;
const EDGE: usize     = 0b0000_1000_0000;
const RTSIG: usize    = 0b0001_0000_0000;
const AIO: usize      = 0b0010_0000_0000;
const IOCP: usize     = 0b0100_0000_0000;

impl Capability {
    #[inline]
    pub fn empty() -> Capability {
        Capability(0)
    }

    /// Filter re-arms automatically; readiness reported each cycle.
    #[inline]
    pub fn level() -> Capability {
        Capability(LEVEL)
    }

    /// Filter is consumed on notification; no explicit delete needed.
    #[inline]
    pub fn oneshot() -> Capability {
        Capability(ONESHOT)
    }

    /// Edge-triggered: only transitions reported, initial level once.
    #[inline]
    pub fn clear() -> Capability {
        Capability(CLEAR)
    }

    /// Backend reports eof, errno and an available count per event.
    #[inline]
    pub fn kqueue() -> Capability {
        Capability(KQUEUE)
    }

    /// Supports low-water-mark registration.
    #[inline]
    pub fn lowat() -> Capability {
        Capability(LOWAT)
    }

    /// Notifications carry a generation bit that filters stale events.
    #[inline]
    pub fn instance() -> Capability {
        Capability(INSTANCE)
    }

    /// Consumer must drain to EAGAIN per notification.
    #[inline]
    pub fn greedy() -> Capability {
        Capability(GREEDY)
    }

    /// Edges only, no initial level.
    #[inline]
    pub fn edge() -> Capability {
        Capability(EDGE)
    }

    /// No per-event register/unregister; registration is global.
    #[inline]
    pub fn rtsig() -> Capability {
        Capability(RTSIG)
    }

    /// Completion semantics; no readiness model.
    #[inline]
    pub fn aio() -> Capability {
        Capability(AIO)
    }

    /// Handle registered once for the lifetime of the fd.
    #[inline]
    pub fn iocp() -> Capability {
        Capability(IOCP)
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_level(self) -> bool {
        self.contains(Capability::level())
    }

    #[inline]
    pub fn is_oneshot(self) -> bool {
        self.contains(Capability::oneshot())
    }

    #[inline]
    pub fn is_clear(self) -> bool {
        self.contains(Capability::clear())
    }

    #[inline]
    pub fn is_kqueue(self) -> bool {
        self.contains(Capability::kqueue())
    }

    #[inline]
    pub fn is_lowat(self) -> bool {
        self.contains(Capability::lowat())
    }

    #[inline]
    pub fn is_instance(self) -> bool {
        self.contains(Capability::instance())
    }

    #[inline]
    pub fn is_greedy(self) -> bool {
        self.contains(Capability::greedy())
    }

    #[inline]
    pub fn is_edge(self) -> bool {
        self.contains(Capability::edge())
    }

    #[inline]
    pub fn is_rtsig(self) -> bool {
        self.contains(Capability::rtsig())
    }

    #[inline]
    pub fn is_aio(self) -> bool {
        self.contains(Capability::aio())
    }

    #[inline]
    pub fn is_iocp(self) -> bool {
        self.contains(Capability::iocp())
    }

    #[inline]
    pub fn contains(self, other: Capability) -> bool {
        (self & other) == other
    }

    #[inline]
    pub fn insert(&mut self, other: Capability) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Capability) {
        self.0 &= !other.0;
    }

    pub fn as_usize(self) -> usize {
        self.0
    }
}

impl ops::BitOr for Capability {
    type Output = Capability;

    #[inline]
    fn bitor(self, other: Capability) -> Capability {
        Capability(self.0 | other.0)
    }
}

impl ops::BitAnd for Capability {
    type Output = Capability;

    #[inline]
    fn bitand(self, other: Capability) -> Capability {
        Capability(self.0 & other.0)
    }
}

impl ops::Sub for Capability {
    type Output = Capability;

    #[inline]
    fn sub(self, other: Capability) -> Capability {
        Capability(self.0 & !other.0)
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let mut one = false;
        let flags = [
            (Capability::level(), "Level"),
            (Capability::oneshot(), "Oneshot"),
            (Capability::clear(), "Clear"),
            (Capability::kqueue(), "Kqueue"),
            (Capability::lowat(), "Lowat"),
            (Capability::instance(), "Instance"),
            (Capability::greedy(), "Greedy"),
            (Capability::edge(), "Edge"),
            (Capability::rtsig(), "Rtsig"),
            (Capability::aio(), "Aio"),
            (Capability::iocp(), "Iocp"),
        ];

        for &(flag, msg) in &flags {
            if self.contains(flag) {
                if one {
                    write!(fmt, " | ")?
                }
                write!(fmt, "{}", msg)?;

                one = true
            }
        }

        if !one {
            write!(fmt, "(empty)")?;
        }

        Ok(())
    }
}
