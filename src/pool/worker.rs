//! Worker side of the pool.
//!
//! Runs when the role marker is present. Tasks arrive on the dedicated
//! channel, go through the user's processing function, and every result is
//! announced on the dispatcher's shared notification path before its payload
//! is written to the dedicated output.

use super::codec::{Encoder, FrameReader, FrameWriter};
use super::ipc::Actor;
use super::manifest::ChannelManifest;
use super::protocol::Completion;
use super::spawn::{ignore_sigpipe, spawn_activity};
use super::{Payload, WorkFn};
use crate::error::{Result, SpawnError};
use crossbeam_channel::bounded;
use std::convert::Infallible;
use tracing::{debug, trace};

/// The three pipe ends a worker uses.
pub struct WorkerChannels {
    /// Write end of the dispatcher's shared notification pipe.
    notify: Encoder,
    /// Read end of this worker's dedicated task pipe.
    tasks: FrameReader,
    /// Write end of this worker's dedicated result pipe.
    results: FrameWriter,
}

impl WorkerChannels {
    pub fn new(notify: Encoder, tasks: FrameReader, results: FrameWriter) -> Self {
        Self {
            notify,
            tasks,
            results,
        }
    }

    /// Pick the worker's ends out of the inherited (parent, self) channels
    /// and close the rest.
    pub fn from_actors(mut parent: Actor, mut this: Actor) -> Result<Self> {
        let missing = |what: &str| SpawnError::Bootstrap(format!("Inherited {} is closed", what));

        let notify = parent
            .input
            .take_write_end()
            .ok_or_else(|| missing("notification pipe"))?;
        let tasks = this
            .input
            .take_read_end()
            .ok_or_else(|| missing("task pipe"))?;
        let results = this
            .output
            .take_write_end()
            .ok_or_else(|| missing("result pipe"))?;

        parent.close();
        this.close();

        Ok(Self::new(
            Encoder::new(notify),
            FrameReader::new(tasks),
            FrameWriter::new(results),
        ))
    }
}

/// Worker entry point: adopt the inherited channels and serve tasks.
///
/// Never returns `Ok`. The dispatcher ends workers by killing them; if the
/// kill is preceded by the dedicated channel closing, this returns
/// [`SpawnError::ChannelClosed`].
pub fn run_worker<T: Payload>(manifest: &ChannelManifest, work: WorkFn<T>) -> Result<Infallible> {
    ignore_sigpipe();

    // Safety: the manifest came from our role marker and this is the only
    // place that adopts its descriptors.
    let (parent, this) = unsafe { manifest.open()? };
    let channels = WorkerChannels::from_actors(parent, this)?;

    let pid = std::process::id();
    debug!(pid, "Worker started");
    serve(channels, pid, work)
}

/// Serve tasks until the dedicated channel closes.
///
/// `pid` is the identity announced on the notification path.
pub fn serve<T: Payload>(channels: WorkerChannels, pid: u32, work: WorkFn<T>) -> Result<Infallible> {
    let WorkerChannels {
        mut notify,
        mut tasks,
        mut results,
    } = channels;

    let (task_tx, task_rx) = bounded::<T>(0);
    let (result_tx, result_rx) = bounded::<T>(0);

    let ingestion = spawn_activity("task-ingestion", move || -> Result<Infallible> {
        loop {
            let task: T = tasks.read()?;
            if task_tx.send(task).is_err() {
                return Err(SpawnError::Protocol(
                    "Processing function stopped accepting tasks".into(),
                ));
            }
        }
    })?;

    let processor = spawn_activity("task-processor", move || work(task_rx, result_tx))?;

    let mut reported = 0usize;
    for result in result_rx.iter() {
        // Identity first: the dispatcher reads our result pipe only after
        // seeing our pid.
        notify.encode(&Completion::new(pid))?;
        results.write(&result)?;
        reported += 1;
        trace!(pid, reported, "Reported result");
    }

    if processor.join().is_err() {
        return Err(SpawnError::Protocol("Processing function panicked".into()));
    }
    match ingestion.join() {
        Ok(Err(e)) => {
            debug!(pid, reported, error = %e, "Task ingestion stopped");
            Err(e)
        }
        Ok(Ok(never)) => match never {},
        Err(_) => Err(SpawnError::Protocol("Task ingestion panicked".into())),
    }
}
