// Event Store (C8): a SQLite-backed document store behind a pooled
// connection handle. The host project already depends on rusqlite + r2d2 +
// r2d2_sqlite for its own lifetime-statistics storage; this reuses that
// stack rather than introducing a networked document database, translating
// the contract (insert/query/aggregate/group-by/device CRUD, the full index
// set) onto relational tables and real SQL indexes.
//
// Every public operation is `async fn` and dispatches its blocking rusqlite
// work onto `tokio::task::spawn_blocking`, so a slow disk never stalls the
// proxy's event loop — this is a deliberate deviation from the dedicated
// writer-thread pattern used elsewhere in the host project, chosen because
// the contract here is phrased as async calls the proxy awaits inline.

pub mod api;
mod schema;

use crate::model::{CaptureMode, ContextMetadata, DeviceInfo, DeviceRecord, Event};
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("background task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Default)]
pub struct EventFilters {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub program: Option<String>,
    pub project: Option<String>,
    pub capture_mode: Option<CaptureMode>,
    pub is_token_consuming: Option<bool>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct UsageSummary {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub request_count: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct GroupedUsage {
    pub key: String,
    pub usage: UsageSummary,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TimeBucket {
    pub bucket: String,
    pub usage: UsageSummary,
}

#[derive(Clone)]
pub struct EventStore {
    pool: Pool<SqliteConnectionManager>,
}

fn capture_mode_str(mode: CaptureMode) -> &'static str {
    match mode {
        CaptureMode::KnownOnly => "known_only",
        CaptureMode::CaptureAll => "capture_all",
    }
}

fn capture_mode_from_str(s: &str) -> CaptureMode {
    match s {
        "capture_all" => CaptureMode::CaptureAll,
        _ => CaptureMode::KnownOnly,
    }
}

impl EventStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        });
        let pool = Pool::builder().max_size(8).build(manager)?;
        let conn = pool.get()?;
        schema::ensure_schema(&conn)?;
        Ok(Self { pool })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(4).build(manager)?;
        let conn = pool.get()?;
        schema::ensure_schema(&conn)?;
        Ok(Self { pool })
    }

    pub async fn insert_event(&self, event: Event) -> Result<String, StoreError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || insert_event_blocking(&pool, &event)).await?
    }

    pub async fn get_event(&self, id: &str) -> Result<Option<Event>, StoreError> {
        let pool = self.pool.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || get_event_blocking(&pool, &id)).await?
    }

    pub async fn query_events(
        &self,
        filters: EventFilters,
        skip: u64,
        limit: u64,
    ) -> Result<(Vec<Event>, u64), StoreError> {
        let pool = self.pool.clone();
        let limit = limit.min(200);
        tokio::task::spawn_blocking(move || query_events_blocking(&pool, &filters, skip, limit)).await?
    }

    pub async fn aggregate_usage(&self, filters: EventFilters) -> Result<UsageSummary, StoreError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || aggregate_usage_blocking(&pool, &filters)).await?
    }

    pub async fn usage_by_model(&self, filters: EventFilters) -> Result<Vec<GroupedUsage>, StoreError> {
        self.usage_by_column("model", filters, false).await
    }

    pub async fn usage_by_program(&self, filters: EventFilters) -> Result<Vec<GroupedUsage>, StoreError> {
        self.usage_by_column("program", filters, false).await
    }

    pub async fn usage_by_project(&self, filters: EventFilters) -> Result<Vec<GroupedUsage>, StoreError> {
        self.usage_by_column("project", filters, false).await
    }

    pub async fn usage_by_device(&self, filters: EventFilters) -> Result<Vec<GroupedUsage>, StoreError> {
        // The device variant defaults is_token_consuming = true when unset.
        let mut filters = filters;
        if filters.is_token_consuming.is_none() {
            filters.is_token_consuming = Some(true);
        }
        self.usage_by_column("device_id", filters, false).await
    }

    async fn usage_by_column(
        &self,
        column: &'static str,
        filters: EventFilters,
        _unused: bool,
    ) -> Result<Vec<GroupedUsage>, StoreError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || usage_by_column_blocking(&pool, column, &filters)).await?
    }

    pub async fn usage_over_time(
        &self,
        filters: EventFilters,
        granularity: &str,
    ) -> Result<Vec<TimeBucket>, StoreError> {
        let pool = self.pool.clone();
        let granularity = granularity.to_string();
        tokio::task::spawn_blocking(move || usage_over_time_blocking(&pool, &filters, &granularity)).await?
    }

    pub async fn delete_all_events(&self) -> Result<u64, StoreError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            let deleted = conn.execute("DELETE FROM events", [])?;
            Ok(deleted as u64)
        })
        .await?
    }

    /// Upserts a device's display name. `metadata` of `None` leaves any
    /// existing metadata untouched (e.g. a plain rename) rather than
    /// clobbering it with a null.
    pub async fn register_device(
        &self,
        device_id: &str,
        name: &str,
        metadata: Option<Value>,
    ) -> Result<(), StoreError> {
        let pool = self.pool.clone();
        let device_id = device_id.to_string();
        let name = name.to_string();
        let metadata = metadata.map(|v| v.to_string());
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            conn.execute(
                "INSERT INTO devices (device_id, name, first_seen, metadata) VALUES (?1, ?2, ?3, COALESCE(?4, '{}'))
                 ON CONFLICT(device_id) DO UPDATE SET name = excluded.name, metadata = COALESCE(?4, devices.metadata)",
                params![device_id, name, Utc::now().to_rfc3339(), metadata],
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn get_devices(&self) -> Result<Vec<DeviceRecord>, StoreError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            let mut stmt = conn.prepare("SELECT device_id, name, first_seen, metadata FROM devices ORDER BY first_seen DESC")?;
            let rows = stmt.query_map([], |row| {
                let first_seen: String = row.get(2)?;
                let metadata: String = row.get(3)?;
                Ok(DeviceRecord {
                    device_id: row.get(0)?,
                    name: row.get(1)?,
                    first_seen: DateTime::parse_from_rfc3339(&first_seen)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
        .await?
    }

    pub async fn delete_device(&self, device_id: &str) -> Result<bool, StoreError> {
        let pool = self.pool.clone();
        let device_id = device_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            let affected = conn.execute("DELETE FROM devices WHERE device_id = ?1", params![device_id])?;
            Ok(affected > 0)
        })
        .await?
    }

    pub async fn health_check(&self) -> bool {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            pool.get()
                .ok()
                .and_then(|conn| conn.query_row("SELECT 1", [], |_| Ok(())).ok())
                .is_some()
        })
        .await
        .unwrap_or(false)
    }
}

fn insert_event_blocking(
    pool: &Pool<SqliteConnectionManager>,
    event: &Event,
) -> Result<String, StoreError> {
    let conn = pool.get()?;
    let id = event
        .id
        .clone()
        .unwrap_or_else(|| format!("{}-{}", event.timestamp.timestamp_millis(), rand_suffix()));
    let res = conn.execute(
        "INSERT INTO events (
            id, timestamp, duration_ms, provider, host, path, model, user_agent, client_type,
            input_tokens, output_tokens, total_tokens, cache_creation_tokens, cache_read_tokens,
            estimated_input_tokens, messages, response_status, response_stop_reason, streaming,
            context, program, project, provider_tags, estimated_cost, capture_mode, device,
            device_id, is_token_consuming, has_budget_tokens, raw_request, raw_response
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24,?25,?26,?27,?28,?29,?30,?31)",
        params![
            id,
            event.timestamp.to_rfc3339(),
            event.duration_ms,
            event.provider,
            event.host,
            event.path,
            event.model,
            event.user_agent,
            event.client_type,
            event.input_tokens,
            event.output_tokens,
            event.total_tokens,
            event.cache_creation_tokens,
            event.cache_read_tokens,
            event.estimated_input_tokens,
            serde_json::to_string(&event.messages).unwrap_or_default(),
            event.response_status,
            event.response_stop_reason,
            event.streaming,
            serde_json::to_string(&event.context).unwrap_or_default(),
            event.program,
            event.project,
            serde_json::to_string(&event.provider_tags).unwrap_or_default(),
            event.estimated_cost,
            capture_mode_str(event.capture_mode),
            serde_json::to_string(&event.device).unwrap_or_default(),
            event.device_id,
            event.is_token_consuming,
            event.has_budget_tokens,
            event.raw_request.as_ref().map(|v| v.to_string()),
            event.raw_response.as_ref().map(|v| v.to_string()),
        ],
    );
    match res {
        Ok(_) => Ok(id),
        Err(e) => {
            tracing::error!(provider = %event.provider, host = %event.host, "event store insert failed: {e}");
            Err(StoreError::Sqlite(e))
        }
    }
}

fn rand_suffix() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..6).map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap()).collect()
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
    let timestamp: String = row.get("timestamp")?;
    let messages: String = row.get("messages")?;
    let context: String = row.get("context")?;
    let provider_tags: String = row.get("provider_tags")?;
    let device: String = row.get("device")?;
    let capture_mode: String = row.get("capture_mode")?;
    let raw_request: Option<String> = row.get("raw_request")?;
    let raw_response: Option<String> = row.get("raw_response")?;

    Ok(Event {
        id: Some(row.get("id")?),
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        duration_ms: row.get::<_, i64>("duration_ms")? as u64,
        provider: row.get("provider")?,
        host: row.get("host")?,
        path: row.get("path")?,
        model: row.get("model")?,
        user_agent: row.get("user_agent")?,
        client_type: row.get("client_type")?,
        input_tokens: row.get::<_, i64>("input_tokens")? as u64,
        output_tokens: row.get::<_, i64>("output_tokens")? as u64,
        total_tokens: row.get::<_, i64>("total_tokens")? as u64,
        cache_creation_tokens: row.get::<_, i64>("cache_creation_tokens")? as u64,
        cache_read_tokens: row.get::<_, i64>("cache_read_tokens")? as u64,
        estimated_input_tokens: row.get::<_, i64>("estimated_input_tokens")? as u64,
        messages: serde_json::from_str(&messages).unwrap_or_default(),
        response_status: row.get::<_, i64>("response_status")? as u16,
        response_stop_reason: row.get("response_stop_reason")?,
        streaming: row.get("streaming")?,
        context: serde_json::from_str::<ContextMetadata>(&context).unwrap_or_default(),
        program: row.get("program")?,
        project: row.get("project")?,
        provider_tags: serde_json::from_str(&provider_tags).unwrap_or_default(),
        estimated_cost: row.get("estimated_cost")?,
        capture_mode: capture_mode_from_str(&capture_mode),
        device: serde_json::from_str::<DeviceInfo>(&device).unwrap_or_default(),
        device_id: row.get("device_id")?,
        is_token_consuming: row.get("is_token_consuming")?,
        has_budget_tokens: row.get("has_budget_tokens")?,
        raw_request: raw_request.and_then(|s| serde_json::from_str(&s).ok()),
        raw_response: raw_response.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

fn get_event_blocking(pool: &Pool<SqliteConnectionManager>, id: &str) -> Result<Option<Event>, StoreError> {
    let conn = pool.get()?;
    conn.query_row("SELECT * FROM events WHERE id = ?1", params![id], row_to_event)
        .optional()
        .map_err(StoreError::from)
}

struct FilterClause {
    sql: String,
    values: Vec<Box<dyn rusqlite::ToSql>>,
}

fn build_filter_clause(filters: &EventFilters) -> FilterClause {
    let mut clauses = Vec::new();
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(v) = &filters.provider {
        clauses.push("provider = ?".to_string());
        values.push(Box::new(v.clone()));
    }
    if let Some(v) = &filters.model {
        clauses.push("model = ?".to_string());
        values.push(Box::new(v.clone()));
    }
    if let Some(v) = &filters.program {
        clauses.push("program = ?".to_string());
        values.push(Box::new(v.clone()));
    }
    if let Some(v) = &filters.project {
        clauses.push("project = ?".to_string());
        values.push(Box::new(v.clone()));
    }
    if let Some(v) = filters.capture_mode {
        clauses.push("capture_mode = ?".to_string());
        values.push(Box::new(capture_mode_str(v).to_string()));
    }
    if let Some(v) = filters.is_token_consuming {
        clauses.push("is_token_consuming = ?".to_string());
        values.push(Box::new(v));
    }
    if let Some(v) = filters.date_from {
        clauses.push("timestamp >= ?".to_string());
        values.push(Box::new(v.to_rfc3339()));
    }
    if let Some(v) = filters.date_to {
        clauses.push("timestamp <= ?".to_string());
        values.push(Box::new(v.to_rfc3339()));
    }

    let sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    FilterClause { sql, values }
}

fn query_events_blocking(
    pool: &Pool<SqliteConnectionManager>,
    filters: &EventFilters,
    skip: u64,
    limit: u64,
) -> Result<(Vec<Event>, u64), StoreError> {
    let conn = pool.get()?;
    let clause = build_filter_clause(filters);

    let count_sql = format!("SELECT COUNT(*) FROM events{}", clause.sql);
    let total: i64 = conn.query_row(
        &count_sql,
        rusqlite::params_from_iter(clause.values.iter().map(|v| v.as_ref())),
        |row| row.get(0),
    )?;

    let list_sql = format!(
        "SELECT * FROM events{} ORDER BY timestamp DESC LIMIT ?{} OFFSET ?{}",
        clause.sql,
        clause.values.len() + 1,
        clause.values.len() + 2
    );
    let mut stmt = conn.prepare(&list_sql)?;
    let mut all_values: Vec<&dyn rusqlite::ToSql> = clause.values.iter().map(|v| v.as_ref()).collect();
    all_values.push(&limit);
    all_values.push(&skip);
    let events = stmt
        .query_map(rusqlite::params_from_iter(all_values), row_to_event)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok((events, total as u64))
}

fn aggregate_usage_blocking(
    pool: &Pool<SqliteConnectionManager>,
    filters: &EventFilters,
) -> Result<UsageSummary, StoreError> {
    let conn = pool.get()?;
    let clause = build_filter_clause(filters);
    let sql = format!(
        "SELECT COALESCE(SUM(input_tokens),0), COALESCE(SUM(output_tokens),0),
                COALESCE(SUM(cache_creation_tokens),0), COALESCE(SUM(cache_read_tokens),0), COUNT(*)
         FROM events{}",
        clause.sql
    );
    conn.query_row(
        &sql,
        rusqlite::params_from_iter(clause.values.iter().map(|v| v.as_ref())),
        |row| {
            Ok(UsageSummary {
                input_tokens: row.get::<_, i64>(0)? as u64,
                output_tokens: row.get::<_, i64>(1)? as u64,
                cache_creation_tokens: row.get::<_, i64>(2)? as u64,
                cache_read_tokens: row.get::<_, i64>(3)? as u64,
                request_count: row.get::<_, i64>(4)? as u64,
            })
        },
    )
    .map_err(StoreError::from)
}

fn usage_by_column_blocking(
    pool: &Pool<SqliteConnectionManager>,
    column: &str,
    filters: &EventFilters,
) -> Result<Vec<GroupedUsage>, StoreError> {
    let conn = pool.get()?;
    let clause = build_filter_clause(filters);
    let sql = format!(
        "SELECT {column}, COALESCE(SUM(input_tokens),0), COALESCE(SUM(output_tokens),0),
                COALESCE(SUM(cache_creation_tokens),0), COALESCE(SUM(cache_read_tokens),0), COUNT(*)
         FROM events{}
         GROUP BY {column}
         ORDER BY SUM(input_tokens) DESC",
        clause.sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        rusqlite::params_from_iter(clause.values.iter().map(|v| v.as_ref())),
        |row| {
            Ok(GroupedUsage {
                key: row.get::<_, Option<String>>(0)?.unwrap_or_else(|| "unknown".to_string()),
                usage: UsageSummary {
                    input_tokens: row.get::<_, i64>(1)? as u64,
                    output_tokens: row.get::<_, i64>(2)? as u64,
                    cache_creation_tokens: row.get::<_, i64>(3)? as u64,
                    cache_read_tokens: row.get::<_, i64>(4)? as u64,
                    request_count: row.get::<_, i64>(5)? as u64,
                },
            })
        },
    )?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

fn truncate_sql(granularity: &str) -> &'static str {
    match granularity {
        "hour" => "strftime('%Y-%m-%dT%H:00:00Z', timestamp)",
        "week" => "strftime('%Y-%W', timestamp)",
        _ => "strftime('%Y-%m-%d', timestamp)",
    }
}

fn usage_over_time_blocking(
    pool: &Pool<SqliteConnectionManager>,
    filters: &EventFilters,
    granularity: &str,
) -> Result<Vec<TimeBucket>, StoreError> {
    let conn = pool.get()?;
    let clause = build_filter_clause(filters);
    let bucket_expr = truncate_sql(granularity);
    let sql = format!(
        "SELECT {bucket_expr} AS bucket, COALESCE(SUM(input_tokens),0), COALESCE(SUM(output_tokens),0),
                COALESCE(SUM(cache_creation_tokens),0), COALESCE(SUM(cache_read_tokens),0), COUNT(*)
         FROM events{}
         GROUP BY bucket
         ORDER BY bucket ASC",
        clause.sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        rusqlite::params_from_iter(clause.values.iter().map(|v| v.as_ref())),
        |row| {
            Ok(TimeBucket {
                bucket: row.get(0)?,
                usage: UsageSummary {
                    input_tokens: row.get::<_, i64>(1)? as u64,
                    output_tokens: row.get::<_, i64>(2)? as u64,
                    cache_creation_tokens: row.get::<_, i64>(3)? as u64,
                    cache_read_tokens: row.get::<_, i64>(4)? as u64,
                    request_count: row.get::<_, i64>(5)? as u64,
                },
            })
        },
    )?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CaptureMode, ContextMetadata, DeviceInfo};

    fn sample_event(provider: &str, input: u64, output: u64) -> Event {
        Event {
            id: None,
            timestamp: Utc::now(),
            duration_ms: 10,
            provider: provider.to_string(),
            host: "api.anthropic.com".to_string(),
            path: "/v1/messages".to_string(),
            model: Some("claude-sonnet-4".to_string()),
            user_agent: Some("claude-code/1.0".to_string()),
            client_type: "claude-code".to_string(),
            input_tokens: input,
            output_tokens: output,
            total_tokens: input + output,
            cache_creation_tokens: 0,
            cache_read_tokens: 0,
            estimated_input_tokens: input,
            messages: vec![],
            response_status: 200,
            response_stop_reason: Some("end_turn".to_string()),
            streaming: false,
            context: ContextMetadata::default(),
            program: Some("claude-code".to_string()),
            project: None,
            provider_tags: vec!["anthropic".to_string()],
            estimated_cost: 0.01,
            capture_mode: CaptureMode::KnownOnly,
            device: DeviceInfo::default(),
            device_id: "device-abc".to_string(),
            is_token_consuming: true,
            has_budget_tokens: false,
            raw_request: None,
            raw_response: None,
        }
    }

    fn temp_store() -> (tempfile::TempDir, EventStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(&dir.path().join("events.db")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let (_dir, store) = temp_store();
        let id = store.insert_event(sample_event("anthropic", 10, 3)).await.unwrap();
        let fetched = store.get_event(&id).await.unwrap().unwrap();
        assert_eq!(fetched.input_tokens, 10);
        assert_eq!(fetched.output_tokens, 3);
        assert_eq!(fetched.total_tokens, 13);
    }

    #[tokio::test]
    async fn query_events_filters_by_provider() {
        let (_dir, store) = temp_store();
        store.insert_event(sample_event("anthropic", 1, 1)).await.unwrap();
        store.insert_event(sample_event("openai", 1, 1)).await.unwrap();

        let filters = EventFilters {
            provider: Some("openai".to_string()),
            ..Default::default()
        };
        let (events, total) = store.query_events(filters, 0, 50).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(events[0].provider, "openai");
    }

    #[tokio::test]
    async fn aggregate_usage_sums_tokens() {
        let (_dir, store) = temp_store();
        store.insert_event(sample_event("anthropic", 10, 5)).await.unwrap();
        store.insert_event(sample_event("anthropic", 20, 7)).await.unwrap();
        let summary = store.aggregate_usage(EventFilters::default()).await.unwrap();
        assert_eq!(summary.input_tokens, 30);
        assert_eq!(summary.output_tokens, 12);
        assert_eq!(summary.request_count, 2);
    }

    #[tokio::test]
    async fn device_registry_survives_event_deletion() {
        let (_dir, store) = temp_store();
        store.register_device("device-abc", "my laptop", None).await.unwrap();
        store.insert_event(sample_event("anthropic", 1, 1)).await.unwrap();
        store.delete_all_events().await.unwrap();
        let devices = store.get_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "my laptop");
    }

    #[tokio::test]
    async fn register_device_rename_preserves_existing_metadata() {
        let (_dir, store) = temp_store();
        store
            .register_device("device-abc", "laptop", Some(serde_json::json!({"arch": "arm64"})))
            .await
            .unwrap();
        store.register_device("device-abc", "work laptop", None).await.unwrap();
        let devices = store.get_devices().await.unwrap();
        assert_eq!(devices[0].name, "work laptop");
        assert_eq!(devices[0].metadata["arch"], "arm64");
    }
}
