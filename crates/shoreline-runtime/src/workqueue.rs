//! `WorkQueue`: per-locality task threads implementing [`Dispatcher`].
//!
//! One OS thread per locality, bound to that node's CPUs. Each thread pops
//! from its own lock-free bounded queue and parks when idle; `submit`
//! unparks it.
//!
//! A job error asks the task's `on_error` what to do. `Stop` ends that
//! locality's worker: later submits to it fail with `Cancelled`, and tasks
//! already queued behind it only get their cleanup, when the queue stops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use shoreline_core::{Dispatcher, ErrorAction, Result, ShorelineError, Task};

use crate::locality::Topology;

/// Idle workers re-check the shutdown flag at least this often
const PARK_TIMEOUT: Duration = Duration::from_millis(100);

struct Lane {
    queue: ArrayQueue<Task>,
    shutdown: AtomicBool,
    /// Worker exited because a job asked it to
    stopped: AtomicBool,
}

struct Worker {
    lane: Arc<Lane>,
    handle: Option<JoinHandle<()>>,
}

pub struct WorkQueue {
    workers: Vec<Worker>,
}

impl WorkQueue {
    /// Spawn one worker per node of `topology`.
    pub fn new(topology: &Topology, depth: usize) -> Result<Self> {
        let mut workers = Vec::with_capacity(topology.nodes());
        for locality in 0..topology.nodes() {
            let lane = Arc::new(Lane {
                queue: ArrayQueue::new(depth.max(1)),
                shutdown: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            });
            let worker_lane = Arc::clone(&lane);
            let topology = topology.clone();
            let handle = thread::Builder::new()
                .name(format!("shoreline-wq-{}", locality))
                .spawn(move || {
                    if let Err(err) = topology.bind_current_thread(locality) {
                        tracing::warn!(locality, %err, "could not bind work queue thread");
                    }
                    worker_loop(&worker_lane, locality);
                })?;
            workers.push(Worker {
                lane,
                handle: Some(handle),
            });
        }
        tracing::debug!(localities = workers.len(), "work queue started");
        Ok(Self { workers })
    }

    /// Stop all workers and clean up tasks that never ran.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        for worker in &self.workers {
            worker.lane.shutdown.store(true, Ordering::SeqCst);
            if let Some(handle) = &worker.handle {
                handle.thread().unpark();
            }
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    tracing::error!("work queue thread panicked");
                }
            }
            let mut discarded = 0usize;
            while let Some(task) = worker.lane.queue.pop() {
                task.discard();
                discarded += 1;
            }
            if discarded > 0 {
                tracing::debug!(discarded, "discarded queued tasks");
            }
        }
    }
}

impl Dispatcher for WorkQueue {
    fn submit(&self, locality: usize, task: Task) -> Result<()> {
        let Some(worker) = self.workers.get(locality) else {
            task.discard();
            return Err(ShorelineError::config(format!(
                "no work queue for locality {}",
                locality
            )));
        };
        if worker.lane.shutdown.load(Ordering::Acquire) || worker.lane.stopped.load(Ordering::Acquire) {
            task.discard();
            return Err(ShorelineError::Cancelled);
        }
        if let Err(task) = worker.lane.queue.push(task) {
            task.discard();
            return Err(ShorelineError::ResourceExhaustion("work queue full"));
        }
        if let Some(handle) = &worker.handle {
            handle.thread().unpark();
        }
        Ok(())
    }

    fn localities(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("localities", &self.workers.len())
            .finish()
    }
}

fn worker_loop(lane: &Lane, locality: usize) {
    loop {
        match lane.queue.pop() {
            Some(task) => {
                if task.run() == ErrorAction::Stop {
                    tracing::warn!(locality, "work queue worker stopped by task");
                    lane.stopped.store(true, Ordering::Release);
                    return;
                }
            }
            None => {
                if lane.shutdown.load(Ordering::Acquire) {
                    return;
                }
                thread::park_timeout(PARK_TIMEOUT);
            }
        }
    }
}
