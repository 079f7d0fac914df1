// src/store/schema.rs
// Idempotent schema bootstrap. At this scale (two core tables plus two
// single-row config tables) a full migration runner is unwarranted; the
// teacher's own `terminal/store.rs` bootstraps the same way with
// `CREATE TABLE IF NOT EXISTS` at pool-open time.

pub const STATEMENTS: &[&str] = &[
    "PRAGMA foreign_keys = ON",
    "CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        tool TEXT NOT NULL,
        topic TEXT NOT NULL,
        model TEXT,
        mode TEXT NOT NULL,
        permission_mode TEXT NOT NULL,
        project_path TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        last_activity INTEGER NOT NULL,
        session_id TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_conversations_project_path ON conversations(project_path)",
    "CREATE INDEX IF NOT EXISTS idx_conversations_status ON conversations(status)",
    "CREATE INDEX IF NOT EXISTS idx_conversations_last_activity ON conversations(last_activity)",
    "CREATE TABLE IF NOT EXISTS messages (
        id TEXT NOT NULL,
        conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
        type TEXT NOT NULL,
        role TEXT,
        content TEXT,
        timestamp INTEGER NOT NULL,
        is_partial INTEGER NOT NULL DEFAULT 0,
        tool_id TEXT,
        tool_name TEXT,
        is_error INTEGER,
        metadata BLOB NOT NULL,
        PRIMARY KEY (conversation_id, id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_messages_conversation_timestamp ON messages(conversation_id, timestamp)",
    "CREATE TABLE IF NOT EXISTS pending_notifications (
        conversation_id TEXT NOT NULL,
        topic TEXT NOT NULL,
        is_turn_complete INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS session_config (
        id INTEGER PRIMARY KEY CHECK (id = 0),
        inactivity_timeout_ms INTEGER NOT NULL,
        max_concurrent_sessions INTEGER NOT NULL,
        auto_resume_enabled INTEGER NOT NULL,
        history_buffer_capacity INTEGER NOT NULL,
        outbound_queue_capacity INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS auth_token (
        id INTEGER PRIMARY KEY CHECK (id = 0),
        token TEXT NOT NULL
    )",
];
