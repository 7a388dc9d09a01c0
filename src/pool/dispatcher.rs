//! Dispatcher: owns the worker registry and coordinates task assignment
//! with result collection.
//!
//! Three activities run concurrently once the pool is filled:
//!
//! 1. the completion reader decodes pids from the shared notification pipe,
//!    reads one result from that worker's dedicated pipe, publishes it and
//!    marks the worker idle;
//! 2. the task assigner pairs each produced task with an idle worker, then
//!    drains outstanding work and terminates every worker;
//! 3. the calling thread seeds the idle queue with every pid, then hands the
//!    result stream to the collector.
//!
//! Teardown closes every copy of the notification pipe's write end, so the
//! completion reader sees EOF and the result stream closes behind the last
//! result.

use super::codec::Decoder;
use super::ipc::Actor;
use super::proc::WorkerHandle;
use super::protocol::Completion;
use super::spawn::{ignore_sigpipe, spawn_activity, spawn_worker};
use super::{CollectFn, DispatchFn, Payload};
use crate::config::PoolConfig;
use crate::error::{Result, SpawnError};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use serde::Serialize;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Worker pid → handle. Filled before any activity starts, read-only after.
type Registry = HashMap<u32, WorkerHandle>;

/// Summary of one dispatcher run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Number of worker processes in the pool.
    pub workers: usize,
    /// Tasks handed to workers.
    pub tasks_sent: usize,
    /// Results received back.
    pub tasks_done: usize,
    /// Pids of the (now terminated) workers, ascending.
    pub worker_pids: Vec<u32>,
}

/// The coordinating side of a pool.
pub struct Dispatcher<T> {
    registry: Registry,
    notifications: Decoder,
    _payload: PhantomData<fn(T) -> T>,
}

impl<T: Payload> Dispatcher<T> {
    /// Spawn `workers` processes and wire them to a fresh shared channel.
    ///
    /// If any spawn fails, the workers already started are terminated when
    /// the partial registry is dropped.
    pub fn launch(config: &PoolConfig, workers: usize) -> Result<Self> {
        ignore_sigpipe();
        let started = Instant::now();
        let mut shared = Actor::open()?;

        let mut registry = Registry::with_capacity(workers);
        for _ in 0..workers {
            let handle = spawn_worker(config, &shared)?;
            registry.insert(handle.pid(), handle);
        }

        let notifications = shared
            .input
            .take_read_end()
            .map(Decoder::new)
            .ok_or_else(|| SpawnError::Bootstrap("Notification pipe already closed".into()))?;
        // Only workers may hold the notification write end from here on.
        shared.close();

        info!(
            workers,
            spawn_time_ms = started.elapsed().as_millis(),
            "Worker pool filled"
        );
        Ok(Self::from_parts(registry, notifications))
    }

    /// Assemble a dispatcher from already-wired workers.
    pub fn from_parts(registry: Registry, notifications: Decoder) -> Self {
        Self {
            registry,
            notifications,
            _payload: PhantomData,
        }
    }

    /// Run the pool to completion.
    ///
    /// `produce` runs on its own thread and ends the task stream by dropping
    /// its sender. `collect` (if any) runs on the calling thread and sees the
    /// result stream close after the last result. Returns once every worker
    /// has been terminated.
    pub fn run(self, produce: DispatchFn<T>, collect: Option<CollectFn<T>>) -> Result<PoolStats> {
        let Self {
            registry,
            notifications,
            ..
        } = self;
        let workers = registry.len();
        let mut worker_pids: Vec<u32> = registry.keys().copied().collect();
        worker_pids.sort_unstable();

        let registry = Arc::new(registry);
        let tasks_done = Arc::new(AtomicUsize::new(0));
        let (idle_tx, idle_rx) = bounded::<u32>(workers);
        let (task_tx, task_rx) = bounded::<T>(0);
        let (result_tx, result_rx) = unbounded::<T>();

        let reader = {
            let registry = Arc::clone(&registry);
            let tasks_done = Arc::clone(&tasks_done);
            let idle_tx = idle_tx.clone();
            spawn_activity("completion-reader", move || {
                read_completions(notifications, &registry, result_tx, idle_tx, &tasks_done)
            })?
        };

        let assigner = {
            let registry = Arc::clone(&registry);
            let tasks_done = Arc::clone(&tasks_done);
            spawn_activity("task-assigner", move || {
                assign_tasks(task_rx, idle_rx, &registry, &tasks_done)
            })?
        };

        let producer = spawn_activity("task-producer", move || produce(task_tx))?;

        for pid in &worker_pids {
            // Fails only if the assigner already gave up; its error is reported below.
            if idle_tx.send(*pid).is_err() {
                break;
            }
        }
        drop(idle_tx);
        debug!(workers, "Idle queue seeded");

        match collect {
            Some(collect) => collect(result_rx),
            None => result_rx.iter().for_each(drop),
        }

        let read_outcome = reader
            .join()
            .unwrap_or_else(|_| Err(SpawnError::Protocol("Completion reader panicked".into())));
        let assign_outcome = assigner
            .join()
            .unwrap_or_else(|_| Err(SpawnError::Protocol("Task assigner panicked".into())));

        read_outcome?;
        let tasks_sent = assign_outcome?;

        if producer.join().is_err() {
            warn!("Task producer panicked after its stream was consumed");
        }

        let stats = PoolStats {
            workers,
            tasks_sent,
            tasks_done: tasks_done.load(Ordering::Acquire),
            worker_pids,
        };
        info!(
            workers = stats.workers,
            tasks_sent = stats.tasks_sent,
            tasks_done = stats.tasks_done,
            "Worker pool drained and terminated"
        );
        Ok(stats)
    }
}

/// Completion reader: one pid from the shared path, then one result from
/// that worker's dedicated path.
///
/// Returns `Ok` when the notification pipe reaches EOF, which happens only
/// after every worker has been terminated.
fn read_completions<T: Payload>(
    mut notifications: Decoder,
    registry: &Registry,
    results: Sender<T>,
    idle: Sender<u32>,
    tasks_done: &AtomicUsize,
) -> Result<()> {
    while let Some(Completion { pid }) = notifications.try_decode::<Completion>()? {
        let worker = registry.get(&pid).ok_or_else(|| {
            warn!(pid, "Completion notice from unknown worker");
            SpawnError::UnknownWorker(pid)
        })?;

        let result: T = worker.recv_result()?;
        if results.send(result).is_err() {
            trace!(pid, "Result collector gone; discarding result");
        }

        // Count before releasing the worker so the drain check never waits
        // on a push that already happened.
        let done = tasks_done.fetch_add(1, Ordering::AcqRel) + 1;
        // Errors only once the assigner has finished and dropped its receiver.
        let _ = idle.send(pid);
        trace!(pid, tasks_done = done, "Task completed");
    }

    debug!("Notification path closed");
    Ok(())
}

/// Task assigner: dispatch, drain, terminate.
///
/// Workers are terminated whatever the outcome, so a failed run never
/// leaves processes behind.
fn assign_tasks<T: Payload>(
    tasks: Receiver<T>,
    idle: Receiver<u32>,
    registry: &Registry,
    tasks_done: &AtomicUsize,
) -> Result<usize> {
    let outcome = dispatch_and_drain(tasks, &idle, registry, tasks_done);
    if let Err(e) = &outcome {
        warn!(error = %e, "Dispatch failed; tearing down workers");
    }

    for worker in registry.values() {
        if let Err(e) = worker.terminate() {
            warn!(pid = worker.pid(), error = %e, "Failed to terminate worker");
        }
    }
    debug!(workers = registry.len(), "All workers terminated");
    outcome
}

fn dispatch_and_drain<T: Payload>(
    tasks: Receiver<T>,
    idle: &Receiver<u32>,
    registry: &Registry,
    tasks_done: &AtomicUsize,
) -> Result<usize> {
    let lost = || SpawnError::Protocol("Completion reader stopped before all results arrived".into());

    let mut tasks_sent = 0;
    for task in tasks.iter() {
        let pid = idle.recv().map_err(|_| lost())?;
        let worker = registry
            .get(&pid)
            .ok_or(SpawnError::UnknownWorker(pid))?;
        worker.send_task(&task)?;
        tasks_sent += 1;
        trace!(pid, tasks_sent, "Assigned task");
    }
    drop(tasks);

    debug!(
        tasks_sent,
        tasks_done = tasks_done.load(Ordering::Acquire),
        "Task stream exhausted; draining"
    );
    while tasks_done.load(Ordering::Acquire) < tasks_sent {
        idle.recv().map_err(|_| lost())?;
    }
    Ok(tasks_sent)
}
