//! PostgreSQL adapter for checkpoint storage.
//!
//! This adapter is the transactional source-of-truth backend. Gate, flow step
//! and device tables are created if missing but are written by configuration
//! management, never by the engine. Gate sessions live in an `UNLOGGED` table
//! so several engine instances behind a load balancer share them.

use crate::session::SessionStore;
use crate::traits::{
    AuditStore, DeviceDirectory, GateEventStore, PermitStore, QueryWindow, SensorEventStore,
    TopologyStore,
};
use crate::{SessionResult, SessionStoreError, StorageError, StorageResult};
use async_trait::async_trait;
use checkpoint_types::{
    AuditAction, DeviceAssignment, DeviceId, DeviceKind, DeviceRole, FlowId, FlowStep, FlowStepId,
    Gate, GateEvent, GateEventId, GateId, NewPermit, NewPlateEvent, NewWeightEvent, Permit,
    PermitAudit, PermitAuditAppend, PermitAuditId, PermitId, PlateEvent, PlateEventId,
    SystemEventId, WeightEvent, WeightEventId,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;

const PLATE_EVENT_COLUMNS: &str = "id, system_event_id, camera_id, camera_name, plate, \
     plate_corrected, corrected_by, image_key, timestamp, gate_event_id";
const WEIGHT_EVENT_COLUMNS: &str =
    "id, system_event_id, scale_id, weight, timestamp, gate_event_id";
const PERMIT_COLUMNS: &str = "id, plate_front, plate_back, total_weight, entry_time, exit_time, \
     is_closed, is_void, flow_id, current_step_sequence, last_activity_at";

/// PostgreSQL-backed storage adapter.
#[derive(Clone)]
pub struct PostgresCheckpointStorage {
    pool: PgPool,
}

impl PostgresCheckpointStorage {
    /// Connect to PostgreSQL and initialize required schema.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    /// Connect with explicit pool parameters.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = connect_pool(database_url, max_connections, connect_timeout_secs).await?;
        Self::from_pool(pool).await
    }

    /// Create adapter from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert or replace a gate and its flow step.
    pub async fn upsert_gate(&self, gate: &Gate) -> StorageResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            r#"
            INSERT INTO checkpoint_gates (id, name, is_entry, is_exit)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
               SET name = EXCLUDED.name,
                   is_entry = EXCLUDED.is_entry,
                   is_exit = EXCLUDED.is_exit
            "#,
        )
        .bind(gate.id.get())
        .bind(&gate.name)
        .bind(gate.is_entry)
        .bind(gate.is_exit)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        sqlx::query("DELETE FROM checkpoint_flow_steps WHERE gate_id = $1")
            .bind(gate.id.get())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        if let Some(step) = &gate.flow_step {
            sqlx::query(
                "INSERT INTO checkpoint_flow_steps (id, flow_id, gate_id, sequence) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(step.id.get())
            .bind(step.flow_id.get())
            .bind(gate.id.get())
            .bind(step.sequence)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_conflict)?;
        }

        tx.commit().await.map_err(backend)
    }

    /// Insert or rebind a device.
    pub async fn upsert_device(&self, device: &DeviceAssignment) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO checkpoint_devices (device_id, kind, gate_id, role)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (device_id) DO UPDATE
               SET kind = EXCLUDED.kind,
                   gate_id = EXCLUDED.gate_id,
                   role = EXCLUDED.role
            "#,
        )
        .bind(device.device_id.as_str())
        .bind(device.kind.as_str())
        .bind(device.gate_id.get())
        .bind(device.role.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn init_schema(&self) -> StorageResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS checkpoint_gates (
                id BIGINT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                is_entry BOOLEAN NOT NULL DEFAULT FALSE,
                is_exit BOOLEAN NOT NULL DEFAULT FALSE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS checkpoint_flow_steps (
                id BIGINT PRIMARY KEY,
                flow_id BIGINT NOT NULL,
                gate_id BIGINT NOT NULL UNIQUE,
                sequence INTEGER NOT NULL,
                UNIQUE (flow_id, sequence)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS checkpoint_devices (
                device_id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                gate_id BIGINT,
                role TEXT NOT NULL DEFAULT 'unspecified'
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS checkpoint_gate_events (
                id BIGSERIAL PRIMARY KEY,
                gate_id BIGINT NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                permit_id BIGINT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS checkpoint_plate_events (
                id BIGSERIAL PRIMARY KEY,
                system_event_id BIGINT,
                camera_id TEXT NOT NULL,
                camera_name TEXT NOT NULL DEFAULT '',
                plate TEXT NOT NULL,
                plate_corrected TEXT,
                corrected_by TEXT,
                image_key TEXT,
                timestamp TIMESTAMPTZ NOT NULL,
                gate_event_id BIGINT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS checkpoint_weight_events (
                id BIGSERIAL PRIMARY KEY,
                system_event_id BIGINT,
                scale_id TEXT NOT NULL,
                weight DOUBLE PRECISION NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                gate_event_id BIGINT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS checkpoint_permits (
                id BIGSERIAL PRIMARY KEY,
                plate_front TEXT NOT NULL,
                plate_back TEXT NOT NULL DEFAULT '',
                total_weight DOUBLE PRECISION NOT NULL DEFAULT 0,
                entry_time TIMESTAMPTZ NOT NULL,
                exit_time TIMESTAMPTZ,
                is_closed BOOLEAN NOT NULL DEFAULT FALSE,
                is_void BOOLEAN NOT NULL DEFAULT FALSE,
                flow_id BIGINT,
                current_step_sequence INTEGER NOT NULL,
                last_activity_at TIMESTAMPTZ NOT NULL,
                CHECK ((exit_time IS NOT NULL) = is_closed)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS checkpoint_permit_audit (
                id BIGSERIAL PRIMARY KEY,
                permit_id BIGINT NOT NULL,
                action TEXT NOT NULL,
                actor TEXT NOT NULL,
                changes JSONB NOT NULL,
                comment TEXT NOT NULL,
                recorded_at TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS checkpoint_plate_events_gate_event_idx ON checkpoint_plate_events (gate_event_id)",
            "CREATE INDEX IF NOT EXISTS checkpoint_weight_events_gate_event_idx ON checkpoint_weight_events (gate_event_id)",
            "CREATE INDEX IF NOT EXISTS checkpoint_permits_open_front_idx ON checkpoint_permits (plate_front) WHERE NOT is_closed",
            "CREATE INDEX IF NOT EXISTS checkpoint_permits_open_back_idx ON checkpoint_permits (plate_back) WHERE NOT is_closed",
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceDirectory for PostgresCheckpointStorage {
    async fn device_gate(&self, device_id: &DeviceId) -> StorageResult<DeviceAssignment> {
        let row = sqlx::query(
            "SELECT device_id, kind, gate_id, role FROM checkpoint_devices \
             WHERE device_id = $1 AND gate_id IS NOT NULL",
        )
        .bind(device_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        match row {
            Some(row) => device_row_to_record(row),
            None => Err(StorageError::NotFound(format!(
                "{device_id} has no gate assignment"
            ))),
        }
    }

    async fn gate_device_count(&self, gate_id: GateId) -> StorageResult<u32> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM checkpoint_devices WHERE gate_id = $1")
                .bind(gate_id.get())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        u32::try_from(count)
            .map_err(|_| StorageError::InvalidInput("device count out of range".to_string()))
    }
}

#[async_trait]
impl TopologyStore for PostgresCheckpointStorage {
    async fn gate(&self, gate_id: GateId) -> StorageResult<Option<Gate>> {
        let row = sqlx::query(
            r#"
            SELECT g.id, g.name, g.is_entry, g.is_exit,
                   s.id AS step_id, s.flow_id, s.sequence
              FROM checkpoint_gates g
              LEFT JOIN checkpoint_flow_steps s ON s.gate_id = g.id
             WHERE g.id = $1
            "#,
        )
        .bind(gate_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(gate_row_to_record).transpose()
    }
}

#[async_trait]
impl GateEventStore for PostgresCheckpointStorage {
    async fn create_gate_event(
        &self,
        gate_id: GateId,
        timestamp: DateTime<Utc>,
    ) -> StorageResult<GateEvent> {
        let row = sqlx::query(
            "INSERT INTO checkpoint_gate_events (gate_id, timestamp, permit_id) \
             VALUES ($1, $2, NULL) RETURNING id, gate_id, timestamp, permit_id",
        )
        .bind(gate_id.get())
        .bind(timestamp)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;
        gate_event_row_to_record(row)
    }

    async fn get_gate_event(&self, gate_event_id: GateEventId) -> StorageResult<Option<GateEvent>> {
        let row = sqlx::query(
            "SELECT id, gate_id, timestamp, permit_id FROM checkpoint_gate_events WHERE id = $1",
        )
        .bind(gate_event_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        row.map(gate_event_row_to_record).transpose()
    }

    async fn attach_permit(
        &self,
        gate_event_id: GateEventId,
        permit_id: PermitId,
    ) -> StorageResult<PermitId> {
        // COALESCE keeps an existing link; RETURNING reports whichever won.
        let stored: Option<i64> = sqlx::query_scalar(
            "UPDATE checkpoint_gate_events SET permit_id = COALESCE(permit_id, $2) \
             WHERE id = $1 RETURNING permit_id",
        )
        .bind(gate_event_id.get())
        .bind(permit_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?
        .flatten();

        stored
            .map(PermitId::new)
            .ok_or_else(|| StorageError::NotFound(format!("{gate_event_id} not found")))
    }

    async fn gate_events_for_permit(&self, permit_id: PermitId) -> StorageResult<Vec<GateEvent>> {
        let rows = sqlx::query(
            "SELECT id, gate_id, timestamp, permit_id FROM checkpoint_gate_events \
             WHERE permit_id = $1 ORDER BY id ASC",
        )
        .bind(permit_id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        rows.into_iter().map(gate_event_row_to_record).collect()
    }
}

#[async_trait]
impl SensorEventStore for PostgresCheckpointStorage {
    async fn record_plate_event(&self, event: NewPlateEvent) -> StorageResult<PlateEvent> {
        let sql = format!(
            "INSERT INTO checkpoint_plate_events \
                (system_event_id, camera_id, camera_name, plate, image_key, timestamp) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {PLATE_EVENT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(event.system_event_id.map(SystemEventId::get))
            .bind(event.camera_id.as_str())
            .bind(&event.camera_name)
            .bind(&event.plate)
            .bind(&event.image_key)
            .bind(event.timestamp)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_conflict)?;
        plate_event_row_to_record(row)
    }

    async fn record_weight_event(&self, event: NewWeightEvent) -> StorageResult<WeightEvent> {
        let sql = format!(
            "INSERT INTO checkpoint_weight_events (system_event_id, scale_id, weight, timestamp) \
             VALUES ($1, $2, $3, $4) RETURNING {WEIGHT_EVENT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(event.system_event_id.map(SystemEventId::get))
            .bind(event.scale_id.as_str())
            .bind(event.weight)
            .bind(event.timestamp)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_conflict)?;
        weight_event_row_to_record(row)
    }

    async fn get_plate_event(&self, id: PlateEventId) -> StorageResult<Option<PlateEvent>> {
        let sql = format!("SELECT {PLATE_EVENT_COLUMNS} FROM checkpoint_plate_events WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        row.map(plate_event_row_to_record).transpose()
    }

    async fn get_weight_event(&self, id: WeightEventId) -> StorageResult<Option<WeightEvent>> {
        let sql =
            format!("SELECT {WEIGHT_EVENT_COLUMNS} FROM checkpoint_weight_events WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        row.map(weight_event_row_to_record).transpose()
    }

    async fn link_plate_event(
        &self,
        id: PlateEventId,
        gate_event_id: GateEventId,
    ) -> StorageResult<()> {
        let result =
            sqlx::query("UPDATE checkpoint_plate_events SET gate_event_id = $2 WHERE id = $1")
                .bind(id.get())
                .bind(gate_event_id.get())
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("{id} not found")));
        }
        Ok(())
    }

    async fn link_weight_event(
        &self,
        id: WeightEventId,
        gate_event_id: GateEventId,
    ) -> StorageResult<()> {
        let result =
            sqlx::query("UPDATE checkpoint_weight_events SET gate_event_id = $2 WHERE id = $1")
                .bind(id.get())
                .bind(gate_event_id.get())
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("{id} not found")));
        }
        Ok(())
    }

    async fn plate_events_for(&self, gate_event_id: GateEventId) -> StorageResult<Vec<PlateEvent>> {
        let sql = format!(
            "SELECT {PLATE_EVENT_COLUMNS} FROM checkpoint_plate_events \
             WHERE gate_event_id = $1 ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(gate_event_id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        rows.into_iter().map(plate_event_row_to_record).collect()
    }

    async fn weight_events_for(
        &self,
        gate_event_id: GateEventId,
    ) -> StorageResult<Vec<WeightEvent>> {
        let sql = format!(
            "SELECT {WEIGHT_EVENT_COLUMNS} FROM checkpoint_weight_events \
             WHERE gate_event_id = $1 ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(gate_event_id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        rows.into_iter().map(weight_event_row_to_record).collect()
    }

    async fn correct_plate(
        &self,
        id: PlateEventId,
        corrected: Option<String>,
        corrected_by: Option<String>,
    ) -> StorageResult<PlateEvent> {
        let sql = format!(
            "UPDATE checkpoint_plate_events SET plate_corrected = $2, corrected_by = $3 \
             WHERE id = $1 RETURNING {PLATE_EVENT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id.get())
            .bind(corrected)
            .bind(corrected_by)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .ok_or_else(|| StorageError::NotFound(format!("{id} not found")))?;
        plate_event_row_to_record(row)
    }
}

#[async_trait]
impl PermitStore for PostgresCheckpointStorage {
    async fn create_permit(&self, permit: NewPermit) -> StorageResult<Permit> {
        let sql = format!(
            "INSERT INTO checkpoint_permits \
                (plate_front, plate_back, total_weight, entry_time, exit_time, is_closed, \
                 is_void, flow_id, current_step_sequence, last_activity_at) \
             VALUES ($1, '', 0, $2, NULL, FALSE, FALSE, $3, $4, $5) RETURNING {PERMIT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&permit.plate_front)
            .bind(permit.entry_time)
            .bind(permit.flow_id.map(FlowId::get))
            .bind(permit.current_step_sequence)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_conflict)?;
        permit_row_to_record(row)
    }

    async fn get_permit(&self, permit_id: PermitId) -> StorageResult<Option<Permit>> {
        let sql = format!("SELECT {PERMIT_COLUMNS} FROM checkpoint_permits WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(permit_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        row.map(permit_row_to_record).transpose()
    }

    async fn find_open_permit_by_plates(
        &self,
        plates: &[String],
    ) -> StorageResult<Option<Permit>> {
        if plates.is_empty() {
            return Ok(None);
        }
        let sql = format!(
            "SELECT {PERMIT_COLUMNS} FROM checkpoint_permits \
             WHERE NOT is_closed AND (plate_front = ANY($1) OR plate_back = ANY($1)) \
             ORDER BY id ASC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(plates)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        row.map(permit_row_to_record).transpose()
    }

    async fn save_permit(&self, permit: &Permit) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE checkpoint_permits
               SET plate_front = $2,
                   plate_back = $3,
                   total_weight = $4,
                   entry_time = $5,
                   exit_time = $6,
                   is_closed = $7,
                   is_void = $8,
                   flow_id = $9,
                   current_step_sequence = $10,
                   last_activity_at = $11
             WHERE id = $1
            "#,
        )
        .bind(permit.id.get())
        .bind(&permit.plate_front)
        .bind(&permit.plate_back)
        .bind(permit.total_weight)
        .bind(permit.entry_time)
        .bind(permit.exit_time)
        .bind(permit.is_closed)
        .bind(permit.is_void)
        .bind(permit.flow_id.map(FlowId::get))
        .bind(permit.current_step_sequence)
        .bind(permit.last_activity_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("{} not found", permit.id)));
        }
        Ok(())
    }

    async fn list_permits(&self, window: QueryWindow) -> StorageResult<Vec<Permit>> {
        let limit = if window.limit == 0 {
            i64::MAX
        } else {
            to_i64(window.limit)?
        };
        let sql = format!(
            "SELECT {PERMIT_COLUMNS} FROM checkpoint_permits ORDER BY id DESC LIMIT $1 OFFSET $2"
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .bind(to_i64(window.offset)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        rows.into_iter().map(permit_row_to_record).collect()
    }
}

#[async_trait]
impl AuditStore for PostgresCheckpointStorage {
    async fn append_permit_audit(&self, entry: PermitAuditAppend) -> StorageResult<PermitAudit> {
        let row = sqlx::query(
            "INSERT INTO checkpoint_permit_audit \
                (permit_id, action, actor, changes, comment, recorded_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, permit_id, action, actor, changes, comment, recorded_at",
        )
        .bind(entry.permit_id.get())
        .bind(entry.action.as_str())
        .bind(&entry.actor)
        .bind(&entry.changes)
        .bind(&entry.comment)
        .bind(entry.recorded_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;
        audit_row_to_record(row)
    }

    async fn list_permit_audit(&self, permit_id: PermitId) -> StorageResult<Vec<PermitAudit>> {
        let rows = sqlx::query(
            "SELECT id, permit_id, action, actor, changes, comment, recorded_at \
               FROM checkpoint_permit_audit WHERE permit_id = $1 ORDER BY id ASC",
        )
        .bind(permit_id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        rows.into_iter().map(audit_row_to_record).collect()
    }
}

/// Session store shared by every engine instance using the same database.
#[derive(Clone)]
pub struct PostgresSessionStore {
    pool: PgPool,
}

impl PostgresSessionStore {
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let pool = connect_pool(database_url, 10, 5).await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        sqlx::query(
            r#"
            CREATE UNLOGGED TABLE IF NOT EXISTS checkpoint_gate_sessions (
                key TEXT PRIMARY KEY,
                value BIGINT NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn get(&self, key: &str) -> SessionResult<Option<i64>> {
        sqlx::query_scalar(
            "SELECT value FROM checkpoint_gate_sessions \
             WHERE key = $1 AND expires_at > clock_timestamp()",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(session_unavailable)
    }

    async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> SessionResult<()> {
        sqlx::query(
            r#"
            INSERT INTO checkpoint_gate_sessions (key, value, expires_at)
            VALUES ($1, $2, clock_timestamp() + make_interval(secs => $3))
            ON CONFLICT (key) DO UPDATE
               SET value = EXCLUDED.value,
                   expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(session_unavailable)?;
        Ok(())
    }

    async fn decrement(&self, key: &str) -> SessionResult<Option<i64>> {
        sqlx::query_scalar(
            "UPDATE checkpoint_gate_sessions SET value = value - 1 \
             WHERE key = $1 AND expires_at > clock_timestamp() RETURNING value",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(session_unavailable)
    }
}

async fn connect_pool(
    database_url: &str,
    max_connections: u32,
    connect_timeout_secs: u64,
) -> StorageResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(connect_timeout_secs))
        .connect(database_url)
        .await
        .map_err(|e| StorageError::Backend(format!("failed to connect postgres: {e}")))
}

fn device_row_to_record(row: PgRow) -> StorageResult<DeviceAssignment> {
    let kind: String = row.try_get("kind").map_err(backend)?;
    let role: String = row.try_get("role").map_err(backend)?;
    Ok(DeviceAssignment {
        device_id: DeviceId::new(row.try_get::<String, _>("device_id").map_err(backend)?),
        kind: parse_device_kind(&kind)?,
        gate_id: GateId::new(row.try_get("gate_id").map_err(backend)?),
        role: DeviceRole::parse(&role).ok_or_else(|| {
            StorageError::Serialization(format!("unknown device role: {role}"))
        })?,
    })
}

fn gate_row_to_record(row: PgRow) -> StorageResult<Gate> {
    let step_id: Option<i64> = row.try_get("step_id").map_err(backend)?;
    let flow_step = match step_id {
        Some(step_id) => Some(FlowStep {
            id: FlowStepId::new(step_id),
            flow_id: FlowId::new(row.try_get("flow_id").map_err(backend)?),
            sequence: row.try_get("sequence").map_err(backend)?,
        }),
        None => None,
    };
    Ok(Gate {
        id: GateId::new(row.try_get("id").map_err(backend)?),
        name: row.try_get("name").map_err(backend)?,
        is_entry: row.try_get("is_entry").map_err(backend)?,
        is_exit: row.try_get("is_exit").map_err(backend)?,
        flow_step,
    })
}

fn gate_event_row_to_record(row: PgRow) -> StorageResult<GateEvent> {
    let permit_id: Option<i64> = row.try_get("permit_id").map_err(backend)?;
    Ok(GateEvent {
        id: GateEventId::new(row.try_get("id").map_err(backend)?),
        gate_id: GateId::new(row.try_get("gate_id").map_err(backend)?),
        timestamp: row.try_get("timestamp").map_err(backend)?,
        permit_id: permit_id.map(PermitId::new),
    })
}

fn plate_event_row_to_record(row: PgRow) -> StorageResult<PlateEvent> {
    let system_event_id: Option<i64> = row.try_get("system_event_id").map_err(backend)?;
    let gate_event_id: Option<i64> = row.try_get("gate_event_id").map_err(backend)?;
    Ok(PlateEvent {
        id: PlateEventId::new(row.try_get("id").map_err(backend)?),
        system_event_id: system_event_id.map(SystemEventId::new),
        camera_id: DeviceId::new(row.try_get::<String, _>("camera_id").map_err(backend)?),
        camera_name: row.try_get("camera_name").map_err(backend)?,
        plate: row.try_get("plate").map_err(backend)?,
        plate_corrected: row.try_get("plate_corrected").map_err(backend)?,
        corrected_by: row.try_get("corrected_by").map_err(backend)?,
        image_key: row.try_get("image_key").map_err(backend)?,
        timestamp: row.try_get("timestamp").map_err(backend)?,
        gate_event_id: gate_event_id.map(GateEventId::new),
    })
}

fn weight_event_row_to_record(row: PgRow) -> StorageResult<WeightEvent> {
    let system_event_id: Option<i64> = row.try_get("system_event_id").map_err(backend)?;
    let gate_event_id: Option<i64> = row.try_get("gate_event_id").map_err(backend)?;
    Ok(WeightEvent {
        id: WeightEventId::new(row.try_get("id").map_err(backend)?),
        system_event_id: system_event_id.map(SystemEventId::new),
        scale_id: DeviceId::new(row.try_get::<String, _>("scale_id").map_err(backend)?),
        weight: row.try_get("weight").map_err(backend)?,
        timestamp: row.try_get("timestamp").map_err(backend)?,
        gate_event_id: gate_event_id.map(GateEventId::new),
    })
}

fn permit_row_to_record(row: PgRow) -> StorageResult<Permit> {
    let flow_id: Option<i64> = row.try_get("flow_id").map_err(backend)?;
    Ok(Permit {
        id: PermitId::new(row.try_get("id").map_err(backend)?),
        plate_front: row.try_get("plate_front").map_err(backend)?,
        plate_back: row.try_get("plate_back").map_err(backend)?,
        total_weight: row.try_get("total_weight").map_err(backend)?,
        entry_time: row.try_get("entry_time").map_err(backend)?,
        exit_time: row.try_get("exit_time").map_err(backend)?,
        is_closed: row.try_get("is_closed").map_err(backend)?,
        is_void: row.try_get("is_void").map_err(backend)?,
        flow_id: flow_id.map(FlowId::new),
        current_step_sequence: row.try_get("current_step_sequence").map_err(backend)?,
        last_activity_at: row.try_get("last_activity_at").map_err(backend)?,
    })
}

fn audit_row_to_record(row: PgRow) -> StorageResult<PermitAudit> {
    let action: String = row.try_get("action").map_err(backend)?;
    Ok(PermitAudit {
        id: PermitAuditId::new(row.try_get("id").map_err(backend)?),
        permit_id: PermitId::new(row.try_get("permit_id").map_err(backend)?),
        action: AuditAction::parse(&action).ok_or_else(|| {
            StorageError::Serialization(format!("unknown audit action: {action}"))
        })?,
        actor: row.try_get("actor").map_err(backend)?,
        changes: row.try_get("changes").map_err(backend)?,
        comment: row.try_get("comment").map_err(backend)?,
        recorded_at: row.try_get("recorded_at").map_err(backend)?,
    })
}

fn parse_device_kind(raw: &str) -> StorageResult<DeviceKind> {
    match raw {
        "camera" => Ok(DeviceKind::Camera),
        "scale" => Ok(DeviceKind::Scale),
        other => Err(StorageError::Serialization(format!(
            "unknown device kind: {other}"
        ))),
    }
}

fn backend(err: sqlx::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

fn session_unavailable(err: sqlx::Error) -> SessionStoreError {
    SessionStoreError::Unavailable(err.to_string())
}

fn map_sqlx_conflict(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StorageError::Conflict(db_err.message().to_string());
        }
    }
    StorageError::Backend(err.to_string())
}

fn to_i64(value: usize) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::InvalidInput("window value too large".to_string()))
}
