//! Messages on the shared notification path.
//!
//! Task and result payloads are plain `T` values on each worker's dedicated
//! channel; the only structured message is the completion notice a worker
//! writes to the dispatcher's shared pipe before its result.

use serde::{Deserialize, Serialize};

/// "Worker `pid` has a result ready on its dedicated output."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub pid: u32,
}

impl Completion {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }
}
