//! Process-wide shutdown-signal handling.
//!
//! Routers built with `RouterConfig::handle_signals` register their
//! outstanding-work set here and unregister on close. The first registration
//! starts a listener thread that waits for a termination signal, cancels the
//! background work of every registered router and exits the process with
//! status 130.
//!
//! ## Unix
//! SIGINT, SIGTERM and SIGQUIT are handled, with [`tokio::signal::ctrl_c`]
//! awaited as a fallback.
//!
//! ## Windows
//! Only [`tokio::signal::ctrl_c`] is awaited.

use crate::outstanding::Outstanding;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, Once, OnceLock, PoisonError, Weak},
    thread,
};

/// Exit status used after a termination signal.
pub const SIGNAL_EXIT_CODE: i32 = 130;

/// Routers whose background work is cancelled on a termination signal.
#[derive(Default)]
pub struct ShutdownRegistry {
    routers: Mutex<HashMap<u64, Weak<Outstanding>>>,
}

static REGISTRY: OnceLock<ShutdownRegistry> = OnceLock::new();
static LISTENER: Once = Once::new();

/// The process-wide registry.
pub fn registry() -> &'static ShutdownRegistry {
    REGISTRY.get_or_init(ShutdownRegistry::default)
}

impl ShutdownRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Weak<Outstanding>>> {
        self.routers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, router: u64, outstanding: &Arc<Outstanding>) {
        self.lock().insert(router, Arc::downgrade(outstanding));
    }

    /// Forget a router. Unknown ids are ignored.
    pub(crate) fn unregister(&self, router: u64) {
        self.lock().remove(&router);
    }

    /// Number of registered routers.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no router is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Cancel the outstanding background work of every registered router.
    ///
    /// Returns the number of units cancelled. Routers stay registered.
    pub fn cancel_all(&self) -> usize {
        let live: Vec<Arc<Outstanding>> = {
            let mut routers = self.lock();
            routers.retain(|_, weak| weak.strong_count() > 0);
            routers.values().filter_map(Weak::upgrade).collect()
        };
        live.iter().map(|outstanding| outstanding.cancel_all()).sum()
    }
}

/// Register a router's outstanding work and make sure the listener runs.
pub(crate) fn register(router: u64, outstanding: &Arc<Outstanding>) {
    let registry = registry();
    registry.track(router, outstanding);
    LISTENER.call_once(|| spawn_listener(registry));
}

fn spawn_listener(registry: &'static ShutdownRegistry) {
    let spawned = thread::Builder::new()
        .name("tidings-signals".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    tracing::error!(error = %err, "cannot start signal listener runtime");
                    return;
                }
            };
            match runtime.block_on(wait_for_shutdown_signal()) {
                Ok(()) => {
                    let cancelled = registry.cancel_all();
                    tracing::warn!(cancelled, "termination signal received, exiting");
                    std::process::exit(SIGNAL_EXIT_CODE);
                }
                Err(err) => tracing::error!(error = %err, "cannot install signal handlers"),
            }
        });
    if let Err(err) = spawned {
        tracing::error!(error = %err, "cannot spawn signal listener thread");
    }
}

/// Completes when the process receives a termination signal.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Completes when the process receives ctrl-c.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
