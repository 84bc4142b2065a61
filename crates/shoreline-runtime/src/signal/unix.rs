//! Unix shutdown signals via `sigwait`

use std::os::unix::thread::JoinHandleExt;
use std::thread::{self, JoinHandle};

use nix::sys::pthread::pthread_kill;
use nix::sys::signal::{SigSet, Signal};
use shoreline_core::{CancellationToken, Result, ShorelineError};

fn shutdown_set() -> SigSet {
    let mut set = SigSet::empty();
    set.add(Signal::SIGINT);
    set.add(Signal::SIGTERM);
    set
}

/// Block SIGINT and SIGTERM in the calling thread.
///
/// Call from the main thread before spawning anything; the mask is
/// inherited, so no other thread ever runs a default handler.
pub fn block_shutdown_signals() -> Result<()> {
    shutdown_set()
        .thread_block()
        .map_err(|errno| ShorelineError::Transport(errno.into()))
}

/// Thread that turns the first shutdown signal into a cancelled token
pub struct SignalWaiter {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SignalWaiter {
    pub fn spawn(token: CancellationToken) -> Result<Self> {
        let waiter_token = token.clone();
        let handle = thread::Builder::new()
            .name("shoreline-signal".into())
            .spawn(move || wait_loop(&waiter_token))?;
        Ok(Self {
            token,
            handle: Some(handle),
        })
    }

    /// Cancel the token (if no signal did yet) and join the waiter.
    pub fn stop(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        let Some(handle) = self.handle.take() else { return };
        self.token.cancel();
        if !handle.is_finished() {
            // Blocked in sigwait; the signal is masked, so it only wakes it
            if let Err(errno) = pthread_kill(handle.as_pthread_t(), Signal::SIGTERM) {
                tracing::warn!(%errno, "could not wake signal thread");
                return;
            }
        }
        let _ = handle.join();
    }
}

impl Drop for SignalWaiter {
    fn drop(&mut self) {
        self.finish();
    }
}

fn wait_loop(token: &CancellationToken) {
    let set = shutdown_set();
    loop {
        match set.wait() {
            Ok(signal) => {
                if !token.is_cancelled() {
                    tracing::info!(signal = signal.as_str(), "shutting down");
                    token.cancel();
                }
                return;
            }
            Err(nix::errno::Errno::EINTR) => continue,
            Err(errno) => {
                tracing::error!(%errno, "sigwait failed");
                token.cancel();
                return;
            }
        }
    }
}
