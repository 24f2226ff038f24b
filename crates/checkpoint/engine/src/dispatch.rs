//! Resolution dispatcher.
//!
//! Sensor callbacks must return quickly, so permit resolution runs on a
//! background task by default. Runs carry no shared state besides storage,
//! and a failed run is logged and dropped: the next reading of the same gate
//! event schedules another pass.

use crate::config::DispatchMode;
use crate::matcher::{PermitMatcher, Resolution};
use crate::{EngineError, EngineResult};
use checkpoint_types::GateEventId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::{JoinError, JoinSet};

#[derive(Clone)]
pub struct ResolutionDispatcher {
    matcher: Arc<PermitMatcher>,
    tasks: Arc<Mutex<JoinSet<()>>>,
    shutdown: Arc<AtomicBool>,
    mode: DispatchMode,
}

impl ResolutionDispatcher {
    pub fn new(matcher: Arc<PermitMatcher>, mode: DispatchMode) -> Self {
        Self {
            matcher,
            tasks: Arc::new(Mutex::new(JoinSet::new())),
            shutdown: Arc::new(AtomicBool::new(false)),
            mode,
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Schedule a resolution pass for `gate_event_id`.
    ///
    /// In background mode this returns once the pass is spawned; in inline
    /// mode it returns the pass's own error, if any.
    pub async fn dispatch(&self, gate_event_id: GateEventId) -> EngineResult<()> {
        if self.is_shut_down() {
            tracing::warn!(gate_event_id = %gate_event_id, "Dispatcher closed, dropping resolution");
            return Err(EngineError::DispatcherClosed(gate_event_id));
        }

        match self.mode {
            DispatchMode::Inline => self.matcher.resolve(gate_event_id).await.map(|resolution| {
                log_resolution(&resolution);
            }),
            DispatchMode::Background => {
                let matcher = self.matcher.clone();
                let mut tasks = self.tasks();
                while let Some(finished) = tasks.try_join_next() {
                    log_join(finished);
                }
                tasks.spawn(async move {
                    match matcher.resolve(gate_event_id).await {
                        Ok(resolution) => log_resolution(&resolution),
                        Err(e) => tracing::error!(
                            gate_event_id = %gate_event_id,
                            error = %e,
                            "Permit resolution failed"
                        ),
                    }
                });
                Ok(())
            }
        }
    }

    /// Wait until every pass spawned so far has finished. Passes spawned
    /// while waiting are not waited for.
    pub async fn wait_idle(&self) {
        let mut running = std::mem::take(&mut *self.tasks());
        while let Some(finished) = running.join_next().await {
            log_join(finished);
        }
    }

    /// Refuse new passes and wait for the running ones. Started passes are
    /// never aborted.
    pub async fn shutdown(&self) {
        let already_set = self.shutdown.swap(true, Ordering::SeqCst);
        if !already_set {
            tracing::info!(in_flight = self.in_flight(), "Draining resolution dispatcher");
        }
        self.wait_idle().await;
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Passes spawned and not yet reaped
    pub fn in_flight(&self) -> usize {
        self.tasks().len()
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn log_join(result: Result<(), JoinError>) {
    if let Err(e) = result {
        tracing::error!(error = %e, "Permit resolution task panicked");
    }
}

fn log_resolution(resolution: &Resolution) {
    match resolution {
        Resolution::Attached {
            gate_event_id,
            permit_id,
            origin,
            changes,
        } => tracing::debug!(
            gate_event_id = %gate_event_id,
            permit_id = %permit_id,
            origin = ?origin,
            changes = changes.len(),
            "Gate event attached"
        ),
        Resolution::Unattached { gate_event_id } => {
            tracing::debug!(gate_event_id = %gate_event_id, "Gate event left unattached")
        }
    }
}
