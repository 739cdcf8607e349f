//! Event and offload core for high-performance network server workers:
//! a capability-driven event reactor over heterogeneous kernel
//! notification mechanisms, and thread pools with lock-free intake and
//! completion queues that move blocking work off the event loop and
//! wake it back up through an eventfd channel.
//!
//! ## Usage
//!
//! First, add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! hive-io = "0.1"
//! ```
//!
//! # Example
//!
//! Offload a blocking job and observe its completion on the reactor
//! thread:
//!
//! ```no_run
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use hive_io::config::PoolRegistry;
//! use hive_io::{Role, Task, Worker};
//!
//! let mut registry = PoolRegistry::new();
//! registry.parse_directive("thread_pool uploads threads=4 max_queue=256").unwrap();
//!
//! let mut worker = Worker::init(&registry, Role::Worker).unwrap();
//!
//! let seen = Arc::new(AtomicBool::new(false));
//! let done = seen.clone();
//!
//! let task = Task::new(
//!     |_task| {
//!         // runs on a pool thread; may block
//!     },
//!     Box::new(move |ev| {
//!         assert!(ev.is_complete());
//!         done.store(true, Ordering::Release);
//!     }),
//! );
//!
//! worker.pool("uploads").unwrap().post(task).unwrap();
//!
//! while !seen.load(Ordering::Acquire) {
//!     worker.process(Some(Duration::from_millis(100))).unwrap();
//! }
//! ```

mod sys;

mod capability;
pub mod config;
mod error;
mod event;
mod notify;
pub mod pool;
mod reactor;
mod ready;
mod token;
mod worker;

pub use capability::Capability;

pub use error::{Error, Result};

pub use event::{Event, EventFlags, EventHandler, INVALID_INDEX};

pub use notify::Notify;

pub use ready::Ready;

pub use token::Token;

pub use reactor::{Conn, ControlFlags, Direction, Driver, EpollDriver, Fired, Reactor};

pub use pool::{PostError, Task, ThreadPool};

pub use config::{PoolConfig, PoolRegistry};

pub use worker::{Role, Worker};
