//! Worker process spawning.
//!
//! Workers are the same program re-executed with the role marker set.
//! `std::process::Command` forks and execs, which is safe once the
//! dispatcher has threads, unlike a bare `fork()`.

use super::codec::{FrameReader, FrameWriter};
use super::ipc::{Actor, set_cloexec};
use super::manifest::ChannelManifest;
use super::proc::WorkerHandle;
use crate::config::PoolConfig;
use crate::error::{Result, SpawnError};
use std::os::unix::io::BorrowedFd;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::sync::Once;
use std::thread::JoinHandle;

static IGNORE_SIGPIPE: Once = Once::new();

/// Ignore SIGPIPE so a write to a dead peer fails with EPIPE instead of
/// killing the process.
pub fn ignore_sigpipe() {
    IGNORE_SIGPIPE.call_once(|| {
        // Safety: SIG_IGN installs no handler code.
        unsafe {
            nix::sys::signal::signal(
                nix::sys::signal::Signal::SIGPIPE,
                nix::sys::signal::SigHandler::SigIgn,
            )
            .ok();
        }
    });
}

/// Spawn one worker wired to the dispatcher's `shared` channel and a fresh
/// dedicated channel.
///
/// The child inherits exactly the eight descriptors named in its manifest;
/// everything else the dispatcher has open stays close-on-exec.
pub fn spawn_worker(config: &PoolConfig, shared: &Actor) -> Result<WorkerHandle> {
    let mut dedicated = Actor::open()?;
    let manifest = ChannelManifest::new(shared, &dedicated)?;

    let program = config.worker_program().map_err(|e| {
        SpawnError::Bootstrap(format!("Failed to resolve worker executable: {}", e))
    })?;

    let mut cmd = Command::new(&program);
    cmd.args(config.worker_args());
    cmd.env(&config.worker_env, manifest.to_env_value()?);

    // Workers write straight to the dispatcher's terminal.
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::inherit());
    cmd.stderr(Stdio::inherit());

    let inherited = manifest.descriptors();
    // Safety: runs between fork and exec and only calls fcntl, which is
    // async-signal-safe. The descriptors are open in the parent and
    // therefore in the forked child.
    unsafe {
        cmd.pre_exec(move || {
            for fd in inherited {
                set_cloexec(BorrowedFd::borrow_raw(fd), false)?;
            }
            Ok(())
        });
    }

    let child = cmd.spawn().map_err(|e| {
        SpawnError::Bootstrap(format!(
            "Failed to spawn worker {}: {}",
            program.display(),
            e
        ))
    })?;
    let pid = child.id();

    // The child owns these ends now; keeping our copies would hide EOF.
    drop(dedicated.input.take_read_end());
    drop(dedicated.output.take_write_end());

    let tasks = dedicated
        .input
        .take_write_end()
        .map(FrameWriter::new)
        .ok_or_else(|| SpawnError::Bootstrap("Task pipe already closed".into()))?;
    let results = dedicated
        .output
        .take_read_end()
        .map(FrameReader::new)
        .ok_or_else(|| SpawnError::Bootstrap("Result pipe already closed".into()))?;

    tracing::debug!(
        pid,
        program = %program.display(),
        descriptors = ?inherited,
        "Spawned worker"
    );

    Ok(WorkerHandle::new(pid, tasks, results))
}

/// Start one named activity thread.
pub fn spawn_activity<F, T>(name: &str, f: F) -> Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|e| SpawnError::Bootstrap(format!("Failed to spawn {} thread: {}", name, e)))
}
