//! The sync/async bridge.
//!
//! A router owns one [`BackgroundLoop`]: a dedicated thread running a
//! current-thread tokio runtime. It is started on first use and hosts async
//! handlers on behalf of callers that cannot suspend (`apply_sync`), plus
//! fire-and-forget units scheduled from outside any runtime (`emit`).
//!
//! Stopping the loop drops its runtime, which cancels whatever is still
//! scheduled on it. A stopped loop starts again on the next use.

use std::{
    sync::{Mutex, MutexGuard, PoisonError, mpsc},
    thread::{self, JoinHandle, ThreadId},
    time::Duration,
};
use tidings_core::DispatchError;
use tokio::{runtime::Handle, sync::oneshot};

pub(crate) struct BackgroundLoop {
    thread_name: String,
    start_timeout: Duration,
    state: Mutex<Option<LoopThread>>,
}

pub(crate) struct LoopThread {
    handle: Handle,
    thread_id: ThreadId,
    shutdown: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl LoopThread {
    fn start(name: &str, start_timeout: Duration) -> Result<Self, DispatchError> {
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<Handle, String>>(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(runtime.handle().clone()));
                // Either an explicit stop or the sender being dropped ends the loop.
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
            })
            .map_err(|err| DispatchError::BridgeUnavailable(err.to_string()))?;

        let thread_id = join.thread().id();
        match ready_rx.recv_timeout(start_timeout) {
            Ok(Ok(handle)) => {
                tracing::debug!(thread = name, "background loop started");
                Ok(Self {
                    handle,
                    thread_id,
                    shutdown: shutdown_tx,
                    join,
                })
            }
            Ok(Err(msg)) => Err(DispatchError::BridgeUnavailable(msg)),
            Err(_) => Err(DispatchError::BridgeUnavailable(format!(
                "background loop did not start within {start_timeout:?}"
            ))),
        }
    }

    /// Signal the loop to stop and wait for its thread, unless called from it.
    pub(crate) fn shutdown(self) {
        let _ = self.shutdown.send(());
        if thread::current().id() != self.thread_id {
            let _ = self.join.join();
        }
        tracing::debug!("background loop stopped");
    }

    /// Signal the loop to stop without waiting. Returns the thread to join.
    pub(crate) fn signal(self) -> Option<JoinHandle<()>> {
        let _ = self.shutdown.send(());
        (thread::current().id() != self.thread_id).then_some(self.join)
    }
}

impl BackgroundLoop {
    pub(crate) fn new(thread_name: String, start_timeout: Duration) -> Self {
        Self {
            thread_name,
            start_timeout,
            state: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<LoopThread>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runtime handle of the loop, starting it if needed.
    pub(crate) fn handle(&self) -> Result<Handle, DispatchError> {
        let mut state = self.lock();
        if let Some(running) = state.as_ref() {
            return Ok(running.handle.clone());
        }
        let started = LoopThread::start(&self.thread_name, self.start_timeout)?;
        let handle = started.handle.clone();
        *state = Some(started);
        Ok(handle)
    }

    /// Returns true if the caller is running on the loop thread.
    pub(crate) fn is_loop_thread(&self) -> bool {
        let current = thread::current().id();
        self.lock()
            .as_ref()
            .is_some_and(|running| running.thread_id == current)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.lock().is_some()
    }

    /// Detach the running loop, if any, leaving the bridge stopped.
    pub(crate) fn take(&self) -> Option<LoopThread> {
        self.lock().take()
    }

    /// Stop the loop and wait for its thread. Idempotent.
    pub(crate) fn stop(&self) {
        if let Some(running) = self.take() {
            running.shutdown();
        }
    }
}
