//! Backend selection and engine lifecycle for one checkpointd process.

use crate::config::{DaemonConfig, SessionStoreConfig, StorageConfig};
use crate::error::{DaemonError, DaemonResult};
use crate::replay::{parse_line, ReplayStep};
use checkpoint_engine::{EngineError, GateEngine};
use checkpoint_storage::postgres::{PostgresCheckpointStorage, PostgresSessionStore};
use checkpoint_storage::{
    CheckpointStorage, InMemoryCheckpointStorage, InMemorySessionStore, QueryWindow,
    SessionStore,
};
use checkpoint_types::{GateEventId, Permit};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Counters of one replay run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    /// Sensor records read
    pub readings: usize,
    /// Readings linked to a gate event
    pub correlated: usize,
    /// Readings from devices without a gate
    pub dropped: usize,
    /// Readings whose correlation failed for another reason
    pub failed: usize,
}

pub struct CheckpointNode {
    engine: GateEngine,
    storage: Arc<dyn CheckpointStorage>,
}

impl CheckpointNode {
    /// Open the configured backends, seed topology and start the engine.
    pub async fn start(config: &DaemonConfig) -> DaemonResult<Self> {
        config.validate().map_err(DaemonError::Config)?;

        let topology = &config.topology;
        let (storage, pool) = match &config.storage {
            StorageConfig::Memory => {
                let storage = InMemoryCheckpointStorage::with_topology(
                    topology.gates.iter().cloned(),
                    topology.devices.iter().cloned(),
                )?;
                tracing::info!(
                    gates = topology.gates.len(),
                    devices = topology.devices.len(),
                    "Using in-memory storage"
                );
                (Arc::new(storage) as Arc<dyn CheckpointStorage>, None)
            }
            StorageConfig::Postgres {
                url,
                max_connections,
                connect_timeout_secs,
            } => {
                let storage = PostgresCheckpointStorage::connect_with_options(
                    url,
                    *max_connections,
                    *connect_timeout_secs,
                )
                .await?;
                for gate in &topology.gates {
                    storage.upsert_gate(gate).await?;
                }
                for device in &topology.devices {
                    storage.upsert_device(device).await?;
                }
                tracing::info!(
                    max_connections,
                    gates = topology.gates.len(),
                    devices = topology.devices.len(),
                    "Using PostgreSQL storage"
                );
                let pool = storage.pool().clone();
                (Arc::new(storage) as Arc<dyn CheckpointStorage>, Some(pool))
            }
        };

        let sessions: Arc<dyn SessionStore> = match (&config.session_store, pool) {
            (SessionStoreConfig::Memory, _) => Arc::new(InMemorySessionStore::new()),
            (SessionStoreConfig::Postgres { url: Some(url) }, _) => {
                Arc::new(PostgresSessionStore::connect(url).await?)
            }
            (SessionStoreConfig::Postgres { url: None }, Some(pool)) => {
                Arc::new(PostgresSessionStore::from_pool(pool).await?)
            }
            (SessionStoreConfig::Postgres { url: None }, None) => {
                return Err(DaemonError::Config(
                    "session_store.url is required when storage is in memory".to_string(),
                ))
            }
        };

        let engine = GateEngine::new(config.engine.clone(), storage.clone(), sessions);
        Ok(Self { engine, storage })
    }

    pub fn engine(&self) -> &GateEngine {
        &self.engine
    }

    /// Store one step's reading and correlate it. Pauses return `None`.
    pub async fn ingest(&self, step: ReplayStep) -> DaemonResult<Option<GateEventId>> {
        let gate_event_id = match step {
            ReplayStep::Plate(event) => {
                let event = self.storage.record_plate_event(event).await?;
                self.engine.on_plate_detected(&event).await?
            }
            ReplayStep::Weight(event) => {
                let event = self.storage.record_weight_event(event).await?;
                self.engine.on_weight_detected(&event).await?
            }
            ReplayStep::Pause(duration) => {
                tokio::time::sleep(duration).await;
                return Ok(None);
            }
        };
        Ok(Some(gate_event_id))
    }

    /// Feed an NDJSON stream through the engine and wait for resolution to
    /// settle. Malformed lines abort the run; correlation failures are
    /// counted and skipped.
    pub async fn replay<R>(&self, reader: R) -> DaemonResult<ReplaySummary>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut summary = ReplaySummary::default();
        let mut lines = reader.lines();
        let mut line_no = 0;

        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            let Some(record) = parse_line(line_no, &line)? else {
                continue;
            };
            let step = record.into_step();
            let is_reading = !matches!(step, ReplayStep::Pause(_));
            if is_reading {
                summary.readings += 1;
            }

            match self.ingest(step).await {
                Ok(Some(_)) => summary.correlated += 1,
                Ok(None) => {}
                Err(DaemonError::Engine(EngineError::UnassignedDevice(_))) => {
                    summary.dropped += 1
                }
                Err(DaemonError::Engine(e)) => {
                    tracing::error!(line = line_no, error = %e, "Correlation failed");
                    summary.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        self.engine.wait_idle().await;
        tracing::info!(
            readings = summary.readings,
            correlated = summary.correlated,
            dropped = summary.dropped,
            failed = summary.failed,
            "Replay finished"
        );
        Ok(summary)
    }

    /// Every permit, newest first.
    pub async fn permits(&self) -> DaemonResult<Vec<Permit>> {
        Ok(self.storage.list_permits(QueryWindow::default()).await?)
    }

    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }
}
