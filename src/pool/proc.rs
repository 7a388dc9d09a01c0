//! Dispatcher-side handle for one worker process.

use super::codec::{FrameReader, FrameWriter};
use super::signals::{TerminationReason, analyze_wait_status};
use crate::error::{Result, SpawnError};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Mutex;

/// OS process behind a worker handle.
#[derive(Debug)]
struct Proc {
    pid: Pid,
    reaped: bool,
}

impl Proc {
    fn kill(&mut self) -> Result<TerminationReason> {
        if self.reaped {
            return Ok(TerminationReason::Unknown);
        }
        // ESRCH means it already died; waitpid below still reaps it.
        if let Err(e) = signal::kill(self.pid, Signal::SIGKILL)
            && e != nix::errno::Errno::ESRCH
        {
            return Err(SpawnError::Bootstrap(format!(
                "Failed to send SIGKILL to {}: {}",
                self.pid, e
            )));
        }
        let status = loop {
            match waitpid(self.pid, None) {
                Err(nix::errno::Errno::EINTR) => continue,
                other => break other,
            }
        };
        self.reaped = true;
        status
            .map(analyze_wait_status)
            .map_err(|e| SpawnError::Bootstrap(format!("waitpid({}) failed: {}", self.pid, e)))
    }

    #[cfg(test)]
    fn is_running(&mut self) -> bool {
        if self.reaped {
            return false;
        }
        use nix::sys::wait::{WaitPidFlag, WaitStatus};
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => true,
            _ => {
                self.reaped = true;
                false
            }
        }
    }
}

/// Handle to a worker: its identity, process, and the dispatcher's ends of
/// its dedicated channel.
///
/// The task writer is only used by the task assigner and the result reader
/// only by the completion reader, so both locks are uncontended in steady
/// state.
pub struct WorkerHandle {
    pid: u32,
    process: Mutex<Option<Proc>>,
    tasks: Mutex<Option<FrameWriter>>,
    results: Mutex<Option<FrameReader>>,
}

impl WorkerHandle {
    /// Wrap a spawned process and the dispatcher's ends of its dedicated channel.
    pub fn new(pid: u32, tasks: FrameWriter, results: FrameReader) -> Self {
        Self {
            pid,
            process: Mutex::new(Some(Proc {
                pid: Pid::from_raw(pid as i32),
                reaped: false,
            })),
            tasks: Mutex::new(Some(tasks)),
            results: Mutex::new(Some(results)),
        }
    }

    /// A handle with no OS process behind it, for workers served by threads
    /// in tests.
    #[cfg(test)]
    pub fn detached(pid: u32, tasks: FrameWriter, results: FrameReader) -> Self {
        Self {
            pid,
            process: Mutex::new(None),
            tasks: Mutex::new(Some(tasks)),
            results: Mutex::new(Some(results)),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Send one task down the dedicated input pipe.
    pub fn send_task<T: Serialize>(&self, task: &T) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        match tasks.as_mut() {
            Some(writer) => writer.write(task),
            None => Err(SpawnError::ChannelClosed),
        }
    }

    /// Read one result from the dedicated output pipe.
    pub fn recv_result<T: DeserializeOwned>(&self) -> Result<T> {
        let mut results = self.results.lock().unwrap_or_else(|e| e.into_inner());
        match results.as_mut() {
            Some(reader) => reader.read(),
            None => Err(SpawnError::ChannelClosed),
        }
    }

    /// Whether the worker process is still alive.
    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        let mut process = self.process.lock().unwrap_or_else(|e| e.into_inner());
        process.as_mut().is_some_and(Proc::is_running)
    }

    /// Kill and reap the process, then close the dedicated channel.
    ///
    /// Workers never exit on their own, so this is the only way they end.
    /// Calling it again is a no-op.
    pub fn terminate(&self) -> Result<()> {
        // Kill first: a dead worker unblocks anyone still reading its pipe,
        // so taking the endpoint locks below cannot wait forever.
        let killed = self.kill_process();
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.results.lock().unwrap_or_else(|e| e.into_inner()).take();
        killed
    }

    fn kill_process(&self) -> Result<()> {
        let mut process = self.process.lock().unwrap_or_else(|e| e.into_inner());
        let Some(proc) = process.as_mut() else {
            return Ok(());
        };
        if proc.reaped {
            return Ok(());
        }
        let reason = proc.kill()?;
        if reason.is_teardown() {
            tracing::debug!(pid = self.pid, reason = %reason, "Worker terminated");
        } else {
            tracing::warn!(pid = self.pid, reason = %reason, "Worker ended abnormally");
        }
        Ok(())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let _ = self.terminate();
    }
}
