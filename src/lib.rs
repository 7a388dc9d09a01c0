//! spawnpool - a process pool over re-executed worker processes.
//!
//! The dispatcher and its workers are the same program. [`Pool::run`]
//! decides the role from the environment: the dispatcher spawns workers and
//! streams tasks to them, and each worker processes tasks until killed.
//! Communication runs over anonymous pipes: JSON lines for completion
//! notices, length-prefixed bincode frames for tasks and results.
//!
//! See [`pool`] for the architecture.

pub mod config;
pub mod error;
pub mod logging;
pub mod pool;

pub use config::PoolConfig;
pub use crossbeam_channel::{Receiver, Sender};
pub use error::{Result, SpawnError};
pub use pool::{
    ChannelManifest, CollectFn, DispatchFn, Payload, Pool, PoolStats, Role, WorkFn,
};
