//! Signal service collaborator.
//!
//! The signal breaker operator registers against this facade instead of the
//! process signal table directly, so pipelines shut down the same way under
//! real SIGINT/SIGTERM/SIGQUIT and under test-driven signal injection.

use std::sync::{Arc, Mutex};

use tracing::warn;

/// Process signals a pipeline reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Interrupt,
    Terminate,
    Quit,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Interrupt => write!(f, "SIGINT"),
            Signal::Terminate => write!(f, "SIGTERM"),
            Signal::Quit => write!(f, "SIGQUIT"),
        }
    }
}

/// Shared handler type: invoked with the delivered signal, must return
/// promptly.
pub type SignalHandler = Arc<dyn Fn(Signal) + Send + Sync>;

/// Signal delivery facade.
pub trait SignalService: Send + Sync {
    /// Register `handler` for the given signal set. Registration lasts
    /// until the returned guard is dropped.
    fn register(&self, signals: &[Signal], handler: SignalHandler) -> SignalRegistration;
}

/// Guard for an active signal registration; unregisters on drop.
pub struct SignalRegistration {
    unregister: Option<Box<dyn FnOnce() + Send>>,
}

impl SignalRegistration {
    pub fn new(unregister: impl FnOnce() + Send + 'static) -> Self {
        Self { unregister: Some(Box::new(unregister)) }
    }
}

impl Drop for SignalRegistration {
    fn drop(&mut self) {
        if let Some(unregister) = self.unregister.take() {
            unregister();
        }
    }
}

/// Tokio-backed signal service listening on the real process signal table.
#[cfg(unix)]
pub struct TokioSignals {
    handle: tokio::runtime::Handle,
}

#[cfg(unix)]
impl TokioSignals {
    /// Capture the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime context.
    pub fn new() -> Self {
        Self { handle: tokio::runtime::Handle::current() }
    }
}

#[cfg(unix)]
impl Default for TokioSignals {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
impl SignalService for TokioSignals {
    fn register(&self, signals: &[Signal], handler: SignalHandler) -> SignalRegistration {
        use tokio::signal::unix::{signal, SignalKind};

        let mut tasks = Vec::with_capacity(signals.len());
        for &sig in signals {
            let kind = match sig {
                Signal::Interrupt => SignalKind::interrupt(),
                Signal::Terminate => SignalKind::terminate(),
                Signal::Quit => SignalKind::quit(),
            };
            let handler = handler.clone();
            let task = self.handle.spawn(async move {
                match signal(kind) {
                    Ok(mut listener) => {
                        while listener.recv().await.is_some() {
                            handler(sig);
                        }
                    }
                    Err(e) => warn!(signal = %sig, error = %e, "can't listen for signal"),
                }
            });
            tasks.push(task);
        }

        SignalRegistration::new(move || {
            for task in &tasks {
                task.abort();
            }
        })
    }
}

/// In-process signal service for tests: deliver signals with
/// [`raise`](ManualSignals::raise).
pub struct ManualSignals {
    inner: Arc<Mutex<ManualSignalsInner>>,
}

struct ManualSignalsInner {
    next_id: u64,
    registrations: Vec<(u64, Vec<Signal>, SignalHandler)>,
}

impl ManualSignals {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualSignalsInner {
                next_id: 0,
                registrations: Vec::new(),
            })),
        }
    }

    /// Deliver `signal` to every registration listening for it.
    pub fn raise(&self, signal: Signal) {
        let handlers: Vec<SignalHandler> = {
            let inner = self.inner.lock().unwrap();
            inner
                .registrations
                .iter()
                .filter(|(_, signals, _)| signals.contains(&signal))
                .map(|(_, _, handler)| handler.clone())
                .collect()
        };
        for handler in handlers {
            handler(signal);
        }
    }

    /// Number of live registrations.
    pub fn registered(&self) -> usize {
        self.inner.lock().unwrap().registrations.len()
    }
}

impl Default for ManualSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalService for ManualSignals {
    fn register(&self, signals: &[Signal], handler: SignalHandler) -> SignalRegistration {
        let id = {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.registrations.push((id, signals.to_vec(), handler));
            id
        };
        let registry = self.inner.clone();
        SignalRegistration::new(move || {
            let mut inner = registry.lock().unwrap();
            inner.registrations.retain(|(rid, _, _)| *rid != id);
        })
    }
}
