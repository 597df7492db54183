// Table definitions and the index set backing every query path C8 exposes:
// by provider, by model, by program/project, by device, by capture mode, and
// by time range, plus a devices table for the registry endpoints.

use rusqlite::Connection;

pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            timestamp TEXT NOT NULL,
            duration_ms INTEGER NOT NULL,
            provider TEXT NOT NULL,
            host TEXT NOT NULL,
            path TEXT NOT NULL,
            model TEXT,
            user_agent TEXT,
            client_type TEXT NOT NULL,
            input_tokens INTEGER NOT NULL DEFAULT 0,
            output_tokens INTEGER NOT NULL DEFAULT 0,
            total_tokens INTEGER NOT NULL DEFAULT 0,
            cache_creation_tokens INTEGER NOT NULL DEFAULT 0,
            cache_read_tokens INTEGER NOT NULL DEFAULT 0,
            estimated_input_tokens INTEGER NOT NULL DEFAULT 0,
            messages TEXT NOT NULL DEFAULT '[]',
            response_status INTEGER NOT NULL DEFAULT 0,
            response_stop_reason TEXT,
            streaming INTEGER NOT NULL DEFAULT 0,
            context TEXT NOT NULL DEFAULT '{}',
            program TEXT,
            project TEXT,
            provider_tags TEXT NOT NULL DEFAULT '[]',
            estimated_cost REAL NOT NULL DEFAULT 0,
            capture_mode TEXT NOT NULL DEFAULT 'known_only',
            device TEXT NOT NULL DEFAULT '{}',
            device_id TEXT NOT NULL,
            is_token_consuming INTEGER NOT NULL DEFAULT 0,
            has_budget_tokens INTEGER NOT NULL DEFAULT 0,
            raw_request TEXT,
            raw_response TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
        CREATE INDEX IF NOT EXISTS idx_events_provider ON events(provider);
        CREATE INDEX IF NOT EXISTS idx_events_model ON events(model);
        CREATE INDEX IF NOT EXISTS idx_events_program ON events(program);
        CREATE INDEX IF NOT EXISTS idx_events_project ON events(project);
        CREATE INDEX IF NOT EXISTS idx_events_device_id ON events(device_id);
        CREATE INDEX IF NOT EXISTS idx_events_client_type ON events(client_type);
        CREATE INDEX IF NOT EXISTS idx_events_capture_mode ON events(capture_mode);
        CREATE INDEX IF NOT EXISTS idx_events_is_token_consuming ON events(is_token_consuming);
        CREATE INDEX IF NOT EXISTS idx_events_provider_timestamp ON events(provider, timestamp);
        CREATE INDEX IF NOT EXISTS idx_events_model_timestamp ON events(model, timestamp);
        CREATE INDEX IF NOT EXISTS idx_events_program_timestamp ON events(program, timestamp);
        CREATE INDEX IF NOT EXISTS idx_events_project_timestamp ON events(project, timestamp);
        CREATE INDEX IF NOT EXISTS idx_events_device_id_timestamp ON events(device_id, timestamp);

        CREATE TABLE IF NOT EXISTS devices (
            device_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            first_seen TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}'
        );
        ",
    )
}
