//! Gate engine: wires the correlator, matcher and dispatcher over one storage
//! backend and one session store.

use crate::config::EngineConfig;
use crate::correction::{PlateCorrection, PlateCorrector};
use crate::correlator::EventCorrelator;
use crate::dispatch::ResolutionDispatcher;
use crate::matcher::{PermitMatcher, Resolution};
use crate::session::GateSessionTracker;
use crate::EngineResult;
use checkpoint_storage::{CheckpointStorage, SessionStore};
use checkpoint_types::{GateEventId, PlateEvent, PlateEventId, WeightEvent};
use std::sync::Arc;

/// Entry point used by ingress: one instance per process, cheap to share
/// behind an `Arc`.
pub struct GateEngine {
    config: EngineConfig,
    storage: Arc<dyn CheckpointStorage>,
    matcher: Arc<PermitMatcher>,
    dispatcher: ResolutionDispatcher,
    correlator: EventCorrelator,
    corrector: PlateCorrector,
}

impl GateEngine {
    pub fn new(
        config: EngineConfig,
        storage: Arc<dyn CheckpointStorage>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let matcher = Arc::new(PermitMatcher::new(storage.clone()));
        let dispatcher = ResolutionDispatcher::new(matcher.clone(), config.dispatch.mode);
        let tracker = GateSessionTracker::new(sessions, storage.clone(), config.session.clone());
        let correlator = EventCorrelator::new(storage.clone(), tracker, dispatcher.clone());
        let corrector = PlateCorrector::new(storage.clone());

        tracing::info!(
            session_ttl_secs = config.session.ttl_secs,
            expected_devices = ?config.session.expected_devices,
            dispatch = ?config.dispatch.mode,
            "Gate engine initialised"
        );

        Self {
            config,
            storage,
            matcher,
            dispatcher,
            correlator,
            corrector,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn CheckpointStorage> {
        &self.storage
    }

    /// Correlate a stored plate reading.
    pub async fn on_plate_detected(&self, event: &PlateEvent) -> EngineResult<GateEventId> {
        self.correlator.on_plate_detected(event).await
    }

    /// Correlate a stored weight reading.
    pub async fn on_weight_detected(&self, event: &WeightEvent) -> EngineResult<GateEventId> {
        self.correlator.on_weight_detected(event).await
    }

    /// Run one resolution pass for `gate_event_id` and wait for it.
    pub async fn resolve(&self, gate_event_id: GateEventId) -> EngineResult<Resolution> {
        self.matcher.resolve(gate_event_id).await
    }

    /// Apply an operator plate correction.
    ///
    /// When the reading's gate event is still unattached, a resolution pass
    /// is scheduled so the corrected plate gets a chance to match.
    pub async fn correct_plate(
        &self,
        plate_event_id: PlateEventId,
        corrected: &str,
        corrected_by: Option<&str>,
    ) -> EngineResult<PlateCorrection> {
        let correction = self
            .corrector
            .correct_plate(plate_event_id, corrected, corrected_by)
            .await?;
        if let (None, Some(gate_event_id)) =
            (correction.permit_id, correction.plate_event.gate_event_id)
        {
            self.dispatcher.dispatch(gate_event_id).await?;
        }
        Ok(correction)
    }

    /// Wait for every resolution pass scheduled so far.
    pub async fn wait_idle(&self) {
        self.dispatcher.wait_idle().await;
    }

    /// Stop accepting resolution work and drain what is running.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
        tracing::info!("Gate engine stopped");
    }
}
