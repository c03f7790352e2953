//! SQLite schema for the append-only conversation log.

pub const SCHEMA_VERSION: i64 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS records (
    id            TEXT PRIMARY KEY,
    parent_id     TEXT REFERENCES records(id),
    role          TEXT NOT NULL,
    content       TEXT NOT NULL,
    tool_name     TEXT,
    tool_call_id  TEXT,
    created_at    TEXT NOT NULL,
    metadata      TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_records_parent ON records(parent_id);

CREATE TABLE IF NOT EXISTS conversations (
    name        TEXT PRIMARY KEY,
    leaf_id     TEXT NOT NULL REFERENCES records(id),
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
"#;
