//! Process pool: distribute tasks over re-executed worker processes.
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────────────────┐
//!                      │        Dispatcher        │
//!                      │  reader · assigner · idle│
//!                      └──▲──────┬───────▲────────┘
//!          shared notify  │      │ tasks │ results   (dedicated, per worker)
//!        ┌────────────────┼──────┼───────┼──────────────┐
//!        │                │    ┌─▼───────┴─┐            │
//!        │                ├────┤ Worker 1  │            │
//!        │                │    └───────────┘      ...   │
//!        │                │    ┌───────────┐            │
//!        │                └────┤ Worker N  │            │
//!        │                     └───────────┘            │
//!        └──────────────────────────────────────────────┘
//! ```
//!
//! Every worker writes its pid to the one shared notification pipe when a
//! result is ready, and the result itself to its own dedicated pipe. The
//! dispatcher reads pids off the shared pipe to learn which dedicated pipe
//! to read next, so small notices never queue behind large payloads.
//!
//! # Roles
//!
//! The same program runs as dispatcher and as worker. Call [`Pool::run`]
//! unconditionally from `main`: in the dispatcher it spawns the workers by
//! re-executing the program with the role marker set, and in a worker it
//! serves tasks until the dispatcher kills it.
//!
//! ```no_run
//! use spawnpool::Pool;
//!
//! let stats = Pool::<u64>::new()
//!     .dispatch(|tasks| {
//!         for n in 1..=5 {
//!             tasks.send(n).unwrap();
//!         }
//!     })
//!     .work(|tasks, results| {
//!         for n in tasks {
//!             results.send(n * 2).unwrap();
//!         }
//!     })
//!     .collect(|results| {
//!         for doubled in results {
//!             println!("{doubled}");
//!         }
//!     })
//!     .run(2)
//!     .unwrap();
//! assert_eq!(stats.tasks_done, 5);
//! ```

mod codec;
mod dispatcher;
mod ipc;
mod manifest;
mod proc;
mod protocol;
mod signals;
mod spawn;
mod worker;

pub use dispatcher::PoolStats;
pub use manifest::{ChannelManifest, Role};

use crate::config::PoolConfig;
use crate::error::{Result, SpawnError};
use crossbeam_channel::{Receiver, Sender};
use dispatcher::Dispatcher;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Values that can travel between dispatcher and workers.
///
/// Tasks and results share one type, fixed when the pool is built. They
/// travel as bincode, so types that need a self-describing format
/// (`#[serde(untagged)]`, `serde_json::Value`) are not supported.
pub trait Payload: Serialize + DeserializeOwned + Send + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Send + 'static {}

/// Task producer: runs in the dispatcher and ends the stream by dropping the sender.
pub type DispatchFn<T> = Box<dyn FnOnce(Sender<T>) + Send>;

/// Task processor: runs in each worker, one result per task.
pub type WorkFn<T> = Box<dyn FnOnce(Receiver<T>, Sender<T>) + Send>;

/// Result consumer: runs on the dispatcher's calling thread.
pub type CollectFn<T> = Box<dyn FnOnce(Receiver<T>)>;

/// A process pool over payload type `T`.
pub struct Pool<T: Payload> {
    config: PoolConfig,
    dispatch: Option<DispatchFn<T>>,
    work: Option<WorkFn<T>>,
    collect: Option<CollectFn<T>>,
}

impl<T: Payload> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Payload> Pool<T> {
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    pub fn with_config(config: PoolConfig) -> Self {
        Self {
            config,
            dispatch: None,
            work: None,
            collect: None,
        }
    }

    /// Register the task producer.
    pub fn dispatch<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Sender<T>) + Send + 'static,
    {
        self.dispatch = Some(Box::new(f));
        self
    }

    /// Register the task processor.
    pub fn work<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Receiver<T>, Sender<T>) + Send + 'static,
    {
        self.work = Some(Box::new(f));
        self
    }

    /// Register a result consumer. Without one, results are discarded.
    pub fn collect<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Receiver<T>) + 'static,
    {
        self.collect = Some(Box::new(f));
        self
    }

    /// Run the pool with `workers` worker processes.
    ///
    /// In the dispatcher this returns after every result has been delivered
    /// and every worker terminated. In a worker it never returns `Ok`.
    ///
    /// Configuration errors are reported before anything is spawned.
    pub fn run(self, workers: usize) -> Result<PoolStats> {
        let dispatch = self
            .dispatch
            .ok_or_else(|| SpawnError::Config("no dispatch function registered".into()))?;
        let work = self
            .work
            .ok_or_else(|| SpawnError::Config("no work function registered".into()))?;
        if workers == 0 {
            return Err(SpawnError::Config("worker count must be at least 1".into()));
        }

        match Role::detect(&self.config)? {
            Role::Dispatcher => {
                Dispatcher::launch(&self.config, workers)?.run(dispatch, self.collect)
            }
            Role::Worker(manifest) => match worker::run_worker(&manifest, work)? {},
        }
    }
}
