use std::io;
use std::time::Duration;

use libc::{EPOLLERR, EPOLLET, EPOLLHUP, EPOLLIN, EPOLLONESHOT, EPOLLOUT, EPOLLPRI, EPOLLRDHUP};

use crate::capability::Capability;
use crate::ready::Ready;
use crate::sys;
use crate::token::Token;

use super::driver::{ControlFlags, Direction, Driver, Fired};
use super::Conn;

/// Edge-triggered epoll backend.
///
/// Reports transitions only (clear semantics), so consumers must drain
/// to EAGAIN per notification (greedy), and filters stale wake-ups with
/// the token generation bit (instance).
pub struct EpollDriver {
    epoll: sys::Epoll,
    events: Vec<libc::epoll_event>,
}

impl EpollDriver {
    pub fn new() -> io::Result<EpollDriver> {
        EpollDriver::with_capacity(512)
    }

    pub fn with_capacity(capacity: usize) -> io::Result<EpollDriver> {
        Ok(EpollDriver {
            epoll: sys::Epoll::new()?,
            events: Vec::with_capacity(capacity),
        })
    }
}

fn interest(dir: Direction) -> u32 {
    match dir {
        Direction::Read => (EPOLLIN | EPOLLRDHUP) as u32,
        Direction::Write => EPOLLOUT as u32,
    }
}

fn mode(flags: ControlFlags) -> u32 {
    let mut kind = 0;

    if !flags.is_level() {
        kind |= EPOLLET;
    }

    if flags.is_oneshot() {
        kind |= EPOLLONESHOT;
    }

    kind as u32
}

fn ready_from_epoll(epoll: u32) -> Ready {
    let epoll = epoll as libc::c_int;
    let mut kind = Ready::empty();

    if (epoll & EPOLLIN) != 0 || (epoll & EPOLLPRI) != 0 {
        kind = kind | Ready::readable();
    }

    if (epoll & EPOLLOUT) != 0 {
        kind = kind | Ready::writable();
    }

    if (epoll & EPOLLERR) != 0 {
        kind = kind | Ready::error();
    }

    if (epoll & EPOLLRDHUP) != 0 || (epoll & EPOLLHUP) != 0 {
        kind = kind | Ready::hup();
    }

    kind
}

impl Driver for EpollDriver {
    fn capabilities(&self) -> Capability {
        Capability::clear() | Capability::greedy() | Capability::instance()
    }

    fn add(&mut self, conn: &mut Conn, dir: Direction, flags: ControlFlags) -> io::Result<()> {
        let mut kind = interest(dir) | mode(flags);

        // One epoll registration carries both directions; fold the
        // armed sibling's interest in.
        if conn.event(dir.other()).is_active() {
            kind |= interest(dir.other());
        }

        // The conn's registration bit picks ADD vs MOD, so re-arming an
        // event whose oneshot filter was consumed modifies the existing
        // registration instead of hitting EEXIST.
        if conn.is_registered() {
            self.epoll.modify(conn.fd(), conn.token().into(), kind)
        } else {
            self.epoll.add(conn.fd(), conn.token().into(), kind)?;
            conn.set_registered(true);
            Ok(())
        }
    }

    fn del(&mut self, conn: &mut Conn, dir: Direction, flags: ControlFlags) -> io::Result<()> {
        // Closing the fd flushes the kernel registration by itself.
        if flags.is_close() {
            conn.set_registered(false);
            return Ok(());
        }

        if conn.event(dir.other()).is_active() {
            let kind = interest(dir.other()) | EPOLLET as u32;
            self.epoll.modify(conn.fd(), conn.token().into(), kind)
        } else if conn.is_registered() {
            self.epoll.delete(conn.fd())?;
            conn.set_registered(false);
            Ok(())
        } else {
            Ok(())
        }
    }

    fn add_conn(&mut self, conn: &mut Conn) -> io::Result<()> {
        let kind = interest(Direction::Read) | interest(Direction::Write) | EPOLLET as u32;

        if conn.is_registered() {
            self.epoll.modify(conn.fd(), conn.token().into(), kind)
        } else {
            self.epoll.add(conn.fd(), conn.token().into(), kind)?;
            conn.set_registered(true);
            Ok(())
        }
    }

    fn del_conn(&mut self, conn: &mut Conn, flags: ControlFlags) -> io::Result<()> {
        if flags.is_close() {
            conn.set_registered(false);
            return Ok(());
        }

        if conn.is_registered() {
            self.epoll.delete(conn.fd())?;
            conn.set_registered(false);
        }

        Ok(())
    }

    fn wait(&mut self, timeout: Option<Duration>, fired: &mut Vec<Fired>) -> io::Result<usize> {
        fired.clear();

        let n = match self.epoll.wait(&mut self.events, timeout) {
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(err) => return Err(err),
        };

        for event in &self.events {
            fired.push(Fired {
                token: Token(event.u64),
                ready: ready_from_epoll(event.events),
                available: -1,
            });
        }

        Ok(n)
    }
}
