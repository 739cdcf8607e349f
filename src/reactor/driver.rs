use std::io;
use std::time::Duration;
use std::{fmt, ops};

use crate::capability::Capability;
use crate::ready::Ready;
use crate::token::Token;

use super::Conn;

/// One I/O direction on a descriptor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    #[inline]
    pub fn other(self) -> Direction {
        match self {
            Direction::Read => Direction::Write,
            Direction::Write => Direction::Read,
        }
    }
}

/// Flags passed through the driver operations.
///
/// The filter-mode triad {level, oneshot, clear} selects how the kernel
/// re-arms the registration; the remaining bits qualify the operation
/// itself.
#[derive(Copy, PartialEq, Eq, Clone, PartialOrd, Ord)]
pub struct ControlFlags(usize);

const LEVEL: usize   = 0b000_0001;
const ONESHOT: usize = 0b000_0010;
const CLEAR: usize   = 0b000_0100;
const CLOSE: usize   = 0b000_1000;
const DISABLE: usize = 0b001_0000;
const LOWAT: usize   = 0b010_0000;
const VNODE: usize   = 0b100_0000;

impl ControlFlags {
    #[inline]
    pub fn empty() -> ControlFlags {
        ControlFlags(0)
    }

    #[inline]
    pub fn level() -> ControlFlags {
        ControlFlags(LEVEL)
    }

    #[inline]
    pub fn oneshot() -> ControlFlags {
        ControlFlags(ONESHOT)
    }

    #[inline]
    pub fn clear() -> ControlFlags {
        ControlFlags(CLEAR)
    }

    /// The file is about to be closed; the backend must flush any
    /// pending removal without touching the dying descriptor.
    #[inline]
    pub fn close() -> ControlFlags {
        ControlFlags(CLOSE)
    }

    #[inline]
    pub fn disable() -> ControlFlags {
        ControlFlags(DISABLE)
    }

    #[inline]
    pub fn lowat() -> ControlFlags {
        ControlFlags(LOWAT)
    }

    #[inline]
    pub fn vnode() -> ControlFlags {
        ControlFlags(VNODE)
    }

    #[inline]
    pub fn is_level(self) -> bool {
        self.contains(ControlFlags::level())
    }

    #[inline]
    pub fn is_oneshot(self) -> bool {
        self.contains(ControlFlags::oneshot())
    }

    #[inline]
    pub fn is_clear(self) -> bool {
        self.contains(ControlFlags::clear())
    }

    #[inline]
    pub fn is_close(self) -> bool {
        self.contains(ControlFlags::close())
    }

    #[inline]
    pub fn is_disable(self) -> bool {
        self.contains(ControlFlags::disable())
    }

    #[inline]
    pub fn is_lowat(self) -> bool {
        self.contains(ControlFlags::lowat())
    }

    #[inline]
    pub fn is_vnode(self) -> bool {
        self.contains(ControlFlags::vnode())
    }

    #[inline]
    pub fn contains(self, other: ControlFlags) -> bool {
        (self & other) == other
    }

    #[inline]
    pub fn insert(&mut self, other: ControlFlags) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: ControlFlags) {
        self.0 &= !other.0;
    }
}

impl ops::BitOr for ControlFlags {
    type Output = ControlFlags;

    #[inline]
    fn bitor(self, other: ControlFlags) -> ControlFlags {
        ControlFlags(self.0 | other.0)
    }
}

impl ops::BitAnd for ControlFlags {
    type Output = ControlFlags;

    #[inline]
    fn bitand(self, other: ControlFlags) -> ControlFlags {
        ControlFlags(self.0 & other.0)
    }
}

impl ops::Sub for ControlFlags {
    type Output = ControlFlags;

    #[inline]
    fn sub(self, other: ControlFlags) -> ControlFlags {
        ControlFlags(self.0 & !other.0)
    }
}

impl fmt::Debug for ControlFlags {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let mut one = false;
        let flags = [
            (ControlFlags::level(), "Level"),
            (ControlFlags::oneshot(), "Oneshot"),
            (ControlFlags::clear(), "Clear"),
            (ControlFlags::close(), "Close"),
            (ControlFlags::disable(), "Disable"),
            (ControlFlags::lowat(), "Lowat"),
            (ControlFlags::vnode(), "Vnode"),
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

/// One kernel notification as collected by a backend's wait.
#[derive(Debug, Clone, Copy)]
pub struct Fired {
    pub token: Token,
    pub ready: Ready,

    /// Bytes the backend knows are transferable, or -1 where readiness
    /// is only boolean.
    pub available: i64,
}

/// The operations a reactor backend supplies.
///
/// The calling code reads these operations through the trait only; the
/// backend declares its semantics once through [`capabilities`] and the
/// registration helpers branch on those flags, never on the backend
/// type.
///
/// Every operation returns `io::Result`. A failed `add`/`del` is fatal
/// for the affected connection; a failed [`wait`] is fatal for the
/// worker.
///
/// [`capabilities`]: Driver::capabilities
/// [`wait`]: Driver::wait
pub trait Driver {
    fn capabilities(&self) -> Capability;

    fn init(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn done(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Register one direction of `conn` with the kernel.
    ///
    /// The conn is mutable so the backend can keep its kernel
    /// bookkeeping on it (the [`registered`](Conn::is_registered) bit);
    /// that state is what distinguishes a fresh registration from a
    /// re-arm of a consumed one.
    fn add(&mut self, conn: &mut Conn, dir: Direction, flags: ControlFlags) -> io::Result<()>;

    /// Remove one direction of `conn` from the kernel.
    fn del(&mut self, conn: &mut Conn, dir: Direction, flags: ControlFlags) -> io::Result<()>;

    fn enable(&mut self, conn: &mut Conn, dir: Direction, flags: ControlFlags) -> io::Result<()> {
        self.add(conn, dir, flags)
    }

    fn disable(&mut self, conn: &mut Conn, dir: Direction, flags: ControlFlags) -> io::Result<()> {
        self.del(conn, dir, flags)
    }

    /// Register both directions at once. Backends with no batched form
    /// fall back to two single-direction adds.
    fn add_conn(&mut self, conn: &mut Conn) -> io::Result<()> {
        self.add(conn, Direction::Read, ControlFlags::empty())?;
        self.add(conn, Direction::Write, ControlFlags::empty())
    }

    /// Remove both directions at once.
    fn del_conn(&mut self, conn: &mut Conn, flags: ControlFlags) -> io::Result<()> {
        self.del(conn, Direction::Read, flags)?;
        self.del(conn, Direction::Write, flags)
    }

    /// Perform one kernel wait and collect ready notifications into
    /// `fired`. Interrupted waits report zero events.
    fn wait(&mut self, timeout: Option<Duration>, fired: &mut Vec<Fired>) -> io::Result<usize>;
}
