//! Role detection and the channel descriptor manifest.
//!
//! A worker learns which of its inherited descriptors belong to which
//! channel from a manifest the dispatcher serializes into the role-marker
//! environment variable. The manifest always has two groups: the
//! dispatcher's shared channel first, then the worker's dedicated channel.

use super::ipc::{Actor, ActorFds};
use crate::config::PoolConfig;
use crate::error::{Result, SpawnError};
use serde::{Deserialize, Serialize};
use std::os::unix::io::RawFd;

/// Descriptors a spawned worker inherits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelManifest {
    /// The dispatcher's own channel (shared notification path).
    pub shared: ActorFds,
    /// This worker's dedicated task/result channel.
    pub dedicated: ActorFds,
}

impl ChannelManifest {
    pub fn new(shared: &Actor, dedicated: &Actor) -> Result<Self> {
        Ok(Self {
            shared: shared.fds()?,
            dedicated: dedicated.fds()?,
        })
    }

    /// All eight descriptors in inheritance order.
    pub fn descriptors(&self) -> [RawFd; 8] {
        let mut fds = [0; 8];
        fds[..4].copy_from_slice(&self.shared.to_array());
        fds[4..].copy_from_slice(&self.dedicated.to_array());
        fds
    }

    pub fn to_env_value(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_env_value(value: &str) -> Result<Self> {
        serde_json::from_str(value)
            .map_err(|e| SpawnError::Bootstrap(format!("Invalid channel manifest: {}", e)))
    }

    /// Reconstruct the (parent, self) channel pair in a worker.
    ///
    /// # Safety
    /// Must be called at most once per process, with a manifest describing
    /// descriptors inherited from the dispatcher.
    pub unsafe fn open(&self) -> Result<(Actor, Actor)> {
        let parent = unsafe { Actor::from_fds(self.shared)? };
        let this = unsafe { Actor::from_fds(self.dedicated)? };
        Ok((parent, this))
    }
}

/// Which side of the pool this process plays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Dispatcher,
    Worker(ChannelManifest),
}

impl Role {
    /// Inspect the role-marker variable named in `config`.
    pub fn detect(config: &PoolConfig) -> Result<Self> {
        match std::env::var(&config.worker_env) {
            Ok(value) => Ok(Self::Worker(ChannelManifest::from_env_value(&value)?)),
            Err(std::env::VarError::NotPresent) => Ok(Self::Dispatcher),
            Err(std::env::VarError::NotUnicode(_)) => Err(SpawnError::Bootstrap(format!(
                "{} is not valid UTF-8",
                config.worker_env
            ))),
        }
    }

    pub fn is_dispatcher(&self) -> bool {
        matches!(self, Self::Dispatcher)
    }
}
