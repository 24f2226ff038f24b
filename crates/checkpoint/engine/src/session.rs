//! Gate Session Tracker.
//!
//! A gate has several sensors that report one physical pass independently and
//! within seconds of each other. The tracker folds those reports into one
//! gate event by keeping, per gate, the active gate event id and the number of
//! device reports still expected, both with a short TTL in the shared session
//! store. There is no explicit close: a session ends when its keys expire or
//! its device quota runs out.
//!
//! Acquisition is check-then-act. Two devices racing on a gate with no live
//! session may open two gate events; the matcher still attaches both to the
//! same permit by plate.

use crate::config::{ExpectedDevices, SessionConfig};
use crate::EngineResult;
use checkpoint_storage::{CheckpointStorage, SessionStore};
use checkpoint_types::{GateEventId, GateId};
use chrono::Utc;
use std::sync::Arc;

pub struct GateSessionTracker {
    sessions: Arc<dyn SessionStore>,
    storage: Arc<dyn CheckpointStorage>,
    config: SessionConfig,
}

impl GateSessionTracker {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        storage: Arc<dyn CheckpointStorage>,
        config: SessionConfig,
    ) -> Self {
        Self {
            sessions,
            storage,
            config,
        }
    }

    /// Gate event currently aggregating readings at `gate_id`, opening a new
    /// one when no live session with remaining device quota exists.
    ///
    /// Session store failures count as "no active session".
    pub async fn acquire_session(&self, gate_id: GateId) -> EngineResult<GateEventId> {
        let id_key = self.config.active_gate_key(gate_id);
        let count_key = self.config.active_gate_count_key(gate_id);

        let active = self.read(&id_key, gate_id).await;
        let remaining = self.read(&count_key, gate_id).await;
        if let (Some(active), Some(remaining)) = (active, remaining) {
            if active > 0 && remaining > 0 {
                tracing::debug!(
                    gate_id = %gate_id,
                    gate_event_id = active,
                    remaining,
                    "Reusing gate session"
                );
                return Ok(GateEventId::new(active));
            }
        }

        let gate_event = self.storage.create_gate_event(gate_id, Utc::now()).await?;
        let expected = self.expected_devices(gate_id).await;
        let ttl = self.config.ttl();

        if let Err(e) = self
            .sessions
            .set_with_ttl(&id_key, gate_event.id.get(), ttl)
            .await
        {
            tracing::warn!(gate_id = %gate_id, error = %e, "Failed to store active gate event");
        }
        if let Err(e) = self
            .sessions
            .set_with_ttl(&count_key, i64::from(expected), ttl)
            .await
        {
            tracing::warn!(gate_id = %gate_id, error = %e, "Failed to store gate device quota");
        }

        tracing::debug!(
            gate_id = %gate_id,
            gate_event_id = %gate_event.id,
            expected_devices = expected,
            ttl_secs = self.config.ttl_secs,
            "Opened gate session"
        );
        Ok(gate_event.id)
    }

    /// Consume one device slot of the gate's session. Best effort: an expired
    /// session is left expired.
    pub async fn release_one_device(&self, gate_id: GateId) {
        let count_key = self.config.active_gate_count_key(gate_id);
        match self.sessions.decrement(&count_key).await {
            Ok(Some(remaining)) => {
                tracing::debug!(gate_id = %gate_id, remaining, "Released gate device slot")
            }
            Ok(None) => tracing::debug!(gate_id = %gate_id, "Gate session already expired"),
            Err(e) => {
                tracing::warn!(gate_id = %gate_id, error = %e, "Failed to release gate device slot")
            }
        }
    }

    async fn read(&self, key: &str, gate_id: GateId) -> Option<i64> {
        match self.sessions.get(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(gate_id = %gate_id, key, error = %e, "Session store read failed");
                None
            }
        }
    }

    async fn expected_devices(&self, gate_id: GateId) -> u32 {
        match self.config.expected_devices {
            ExpectedDevices::Fixed { count } => count,
            ExpectedDevices::Configured => match self.storage.gate_device_count(gate_id).await {
                Ok(count) => count,
                Err(e) => {
                    tracing::warn!(gate_id = %gate_id, error = %e, "Failed to count gate devices");
                    0
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkpoint_storage::{GateEventStore, InMemoryCheckpointStorage, InMemorySessionStore};
    use checkpoint_types::{DeviceAssignment, Gate};
    use std::time::Duration;

    fn tracker(config: SessionConfig) -> (GateSessionTracker, Arc<InMemoryCheckpointStorage>) {
        let storage = Arc::new(
            InMemoryCheckpointStorage::with_topology(
                [Gate::new(GateId::new(1), "entry").entry()],
                [
                    DeviceAssignment::camera("CAM-1", GateId::new(1)),
                    DeviceAssignment::camera("CAM-2", GateId::new(1)),
                    DeviceAssignment::scale("SCALE-1", GateId::new(1)),
                ],
            )
            .unwrap(),
        );
        let tracker = GateSessionTracker::new(
            Arc::new(InMemorySessionStore::new()),
            storage.clone(),
            config,
        );
        (tracker, storage)
    }

    #[tokio::test(start_paused = true)]
    async fn session_is_reused_until_device_quota_is_spent() {
        let (tracker, _) = tracker(SessionConfig::default());
        let gate = GateId::new(1);

        let first = tracker.acquire_session(gate).await.unwrap();
        tracker.release_one_device(gate).await;
        let second = tracker.acquire_session(gate).await.unwrap();
        tracker.release_one_device(gate).await;
        let third = tracker.acquire_session(gate).await.unwrap();
        tracker.release_one_device(gate).await;
        let fourth = tracker.acquire_session(gate).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second, third);
        assert_ne!(third, fourth);
    }

    #[tokio::test(start_paused = true)]
    async fn session_expires_after_ttl() {
        let (tracker, storage) = tracker(SessionConfig::default());
        let gate = GateId::new(1);

        let first = tracker.acquire_session(gate).await.unwrap();
        tracker.release_one_device(gate).await;
        tokio::time::advance(Duration::from_secs(16)).await;
        let second = tracker.acquire_session(gate).await.unwrap();

        assert_ne!(first, second);
        let reopened = storage.get_gate_event(second).await.unwrap().unwrap();
        assert_eq!(reopened.gate_id, gate);
        assert!(reopened.permit_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_quota_overrides_device_count() {
        let config = SessionConfig {
            expected_devices: ExpectedDevices::Fixed { count: 1 },
            ..SessionConfig::default()
        };
        let (tracker, _) = tracker(config);
        let gate = GateId::new(1);

        let first = tracker.acquire_session(gate).await.unwrap();
        tracker.release_one_device(gate).await;
        let second = tracker.acquire_session(gate).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn gate_without_devices_never_reuses() {
        let (tracker, storage) = tracker(SessionConfig::default());
        storage.register_gate(Gate::new(GateId::new(9), "bare")).unwrap();

        let first = tracker.acquire_session(GateId::new(9)).await.unwrap();
        let second = tracker.acquire_session(GateId::new(9)).await.unwrap();
        assert_ne!(first, second);
    }
}
