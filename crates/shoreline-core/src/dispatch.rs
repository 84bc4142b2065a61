//! Deferred task dispatch contract
//!
//! Work that must run on a particular locality (currently: resizing a
//! shard, so the new storage is first touched from local memory) is wrapped
//! in a [`Task`] and handed to a [`Dispatcher`].

use crate::error::{Result, ShorelineError};

/// The work itself
pub type Job = Box<dyn FnOnce() -> Result<()> + Send>;

/// Decides what happens after a job failed
pub type ErrorHandler = Box<dyn FnOnce(&ShorelineError) -> ErrorAction + Send>;

/// Runs exactly once per task, with the job's error if it failed.
/// Also runs (with `None`) for tasks discarded at shutdown.
pub type CleanupHandler = Box<dyn FnOnce(Option<&ShorelineError>) + Send>;

/// What a worker does after a job error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Keep processing the queue
    Continue,
    /// Stop the worker that ran the job
    Stop,
}

/// A job plus its error and cleanup callbacks
pub struct Task {
    job: Job,
    on_error: Option<ErrorHandler>,
    on_cleanup: Option<CleanupHandler>,
}

impl Task {
    pub fn new(job: impl FnOnce() -> Result<()> + Send + 'static) -> Self {
        Self {
            job: Box::new(job),
            on_error: None,
            on_cleanup: None,
        }
    }

    pub fn on_error(mut self, f: impl FnOnce(&ShorelineError) -> ErrorAction + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_cleanup(mut self, f: impl FnOnce(Option<&ShorelineError>) + Send + 'static) -> Self {
        self.on_cleanup = Some(Box::new(f));
        self
    }

    /// Run the job, then its callbacks. Without an error handler a failed
    /// job does not stop the worker.
    pub fn run(self) -> ErrorAction {
        match (self.job)() {
            Ok(()) => {
                if let Some(cleanup) = self.on_cleanup {
                    cleanup(None);
                }
                ErrorAction::Continue
            }
            Err(err) => {
                let action = self.on_error.map_or(ErrorAction::Continue, |f| f(&err));
                if let Some(cleanup) = self.on_cleanup {
                    cleanup(Some(&err));
                }
                action
            }
        }
    }

    /// Drop the task without running it
    pub fn discard(self) {
        if let Some(cleanup) = self.on_cleanup {
            cleanup(None);
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("on_error", &self.on_error.is_some())
            .field("on_cleanup", &self.on_cleanup.is_some())
            .finish()
    }
}

/// Schedules tasks onto a locality
pub trait Dispatcher: Send + Sync {
    /// Queue `task` to run on `locality`.
    ///
    /// Fails with `Configuration` for an unknown locality.
    fn submit(&self, locality: usize, task: Task) -> Result<()>;

    /// Number of localities tasks can be submitted to
    fn localities(&self) -> usize;
}

/// Runs every task immediately on the submitting thread
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn submit(&self, _locality: usize, task: Task) -> Result<()> {
        task.run();
        Ok(())
    }

    fn localities(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_success_runs_cleanup() {
        let cleaned = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&cleaned);
        let action = Task::new(|| Ok(()))
            .on_error(|_| panic!("no error expected"))
            .on_cleanup(move |err| {
                assert!(err.is_none());
                c.fetch_add(1, Ordering::SeqCst);
            })
            .run();
        assert_eq!(action, ErrorAction::Continue);
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_error_path() {
        let cleaned = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&cleaned);
        let action = Task::new(|| Err(ShorelineError::ResourceExhaustion("test")))
            .on_error(|err| {
                assert!(matches!(err, ShorelineError::ResourceExhaustion(_)));
                ErrorAction::Stop
            })
            .on_cleanup(move |err| {
                assert!(err.is_some());
                c.fetch_add(1, Ordering::SeqCst);
            })
            .run();
        assert_eq!(action, ErrorAction::Stop);
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);

        // No handler: keep going
        let action = Task::new(|| Err(ShorelineError::Cancelled)).run();
        assert_eq!(action, ErrorAction::Continue);
    }

    #[test]
    fn test_discard_only_cleans_up() {
        let cleaned = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&cleaned);
        Task::new(|| panic!("must not run"))
            .on_cleanup(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .discard();
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_inline_dispatcher() {
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        InlineDispatcher
            .submit(0, Task::new(move || {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(InlineDispatcher.localities(), 1);
    }
}
