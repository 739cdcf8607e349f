//! Thin wrappers over the Linux syscalls the reactor core relies on.

macro_rules! syscall {
    ($fn:ident ( $($arg:expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

mod fd;
pub mod epoll;
pub mod eventfd;

pub use epoll::Epoll;
pub use eventfd::EventFd;
pub use fd::FileDesc;

use std::io;

/// Block every signal for the calling thread.
///
/// Offload workers must not steal signals from the reactor thread, so
/// each worker masks everything before entering its cycle.
pub fn mask_all_signals() -> io::Result<()> {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        if libc::sigfillset(&mut set) == -1 {
            return Err(io::Error::last_os_error());
        }

        let err = libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
        if err != 0 {
            return Err(io::Error::from_raw_os_error(err));
        }
    }

    Ok(())
}
