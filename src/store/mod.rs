// src/store/mod.rs
// Durable conversation + message persistence (spec §4.1). A single
// `SqlitePool` backs everything; SQLite's own writer serialization plus
// WAL gives us "single-writer, concurrent readers" (spec §5) without a
// hand-rolled actor, matching the teacher's `session/manager.rs`, which
// uses the same runtime `sqlx::query`/`query_as` + `.bind(...)` style
// rather than the compile-time `query!` macros (those need an offline
// query cache we have no way to generate here).

mod schema;

use crate::error::{AppError, AppResult};
use crate::model::{
    Conversation, ConversationFilter, ConversationPatch, ConversationStatus, Mode,
    PendingNotification, PermissionMode, SessionConfig, Tool,
};
use crate::parsers::block::Block;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn open(path: &str) -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.run_schema().await?;
        Ok(store)
    }

    pub async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn run_schema(&self) -> anyhow::Result<()> {
        for statement in schema::STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    // ---- conversations ----------------------------------------------

    pub async fn create_conversation(&self, c: &Conversation) -> AppResult<()> {
        let existing = sqlx::query("SELECT id FROM conversations WHERE id = ?")
            .bind(&c.id)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            return Err(AppError::Conflict(format!("conversation {} exists", c.id)));
        }
        sqlx::query(
            "INSERT INTO conversations
             (id, tool, topic, model, mode, permission_mode, project_path, status,
              created_at, updated_at, last_activity, session_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&c.id)
        .bind(c.tool.as_str())
        .bind(&c.topic)
        .bind(&c.model)
        .bind(c.mode.as_str())
        .bind(c.permission_mode.as_str())
        .bind(&c.project_path)
        .bind(c.status.as_str())
        .bind(c.created_at)
        .bind(c.updated_at)
        .bind(c.last_activity)
        .bind(&c.session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_conversation(row: &sqlx::sqlite::SqliteRow) -> AppResult<Conversation> {
        let tool_str: String = row.try_get("tool")?;
        let mode_str: String = row.try_get("mode")?;
        let perm_str: String = row.try_get("permission_mode")?;
        let status_str: String = row.try_get("status")?;
        Ok(Conversation {
            id: row.try_get("id")?,
            tool: Tool::parse(&tool_str).ok_or_else(|| AppError::IOError("bad tool".into()))?,
            topic: row.try_get("topic")?,
            model: row.try_get("model")?,
            mode: Mode::parse(&mode_str).ok_or_else(|| AppError::IOError("bad mode".into()))?,
            permission_mode: PermissionMode::parse(&perm_str)
                .ok_or_else(|| AppError::IOError("bad permission_mode".into()))?,
            project_path: row.try_get("project_path")?,
            status: ConversationStatus::parse(&status_str)
                .ok_or_else(|| AppError::IOError("bad status".into()))?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_activity: row.try_get("last_activity")?,
            session_id: row.try_get("session_id")?,
        })
    }

    pub async fn get_conversation(&self, id: &str) -> AppResult<Conversation> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("conversation {id}")))?;
        Self::row_to_conversation(&row)
    }

    pub async fn update_conversation(&self, id: &str, patch: &ConversationPatch) -> AppResult<Conversation> {
        let mut c = self.get_conversation(id).await?;
        if let Some(topic) = &patch.topic {
            c.topic = topic.clone();
        }
        if let Some(status) = &patch.status {
            c.status = ConversationStatus::parse(status)
                .ok_or_else(|| AppError::ParseError(format!("bad status {status}")))?;
        }
        if let Some(session_id) = &patch.session_id {
            c.session_id = Some(session_id.clone());
        }
        if let Some(last_activity) = patch.last_activity {
            c.last_activity = last_activity;
        }
        c.updated_at = crate::model::now_ms();
        sqlx::query(
            "UPDATE conversations SET topic = ?, status = ?, session_id = ?,
             last_activity = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&c.topic)
        .bind(c.status.as_str())
        .bind(&c.session_id)
        .bind(c.last_activity)
        .bind(c.updated_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(c)
    }

    pub async fn delete_conversation(&self, id: &str) -> AppResult<()> {
        // Idempotent: deleting a nonexistent id is not an error (spec §8
        // round-trip property: "delete; delete" succeeds).
        sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM pending_notifications WHERE conversation_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_conversations(&self, filter: &ConversationFilter) -> AppResult<Vec<Conversation>> {
        let mut sql = String::from("SELECT * FROM conversations WHERE 1=1");
        if filter.project_path.is_some() {
            sql.push_str(" AND project_path = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.active_since.is_some() {
            sql.push_str(" AND last_activity >= ?");
        }
        sql.push_str(" ORDER BY last_activity DESC");
        let mut q = sqlx::query(&sql);
        if let Some(p) = &filter.project_path {
            q = q.bind(p);
        }
        if let Some(s) = &filter.status {
            q = q.bind(s);
        }
        if let Some(t) = filter.active_since {
            q = q.bind(t);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_conversation).collect()
    }

    pub async fn load_active_conversations(&self) -> AppResult<Vec<Conversation>> {
        self.list_conversations(&ConversationFilter {
            status: Some("active".to_string()),
            ..Default::default()
        })
        .await
    }

    /// Crash-recovery rule: mark every `active` conversation `suspended`
    /// on boot, since no live PTY survives a restart (spec §4.1).
    pub async fn suspend_all_active(&self) -> AppResult<Vec<Conversation>> {
        let actives = self.load_active_conversations().await?;
        let mut out = Vec::with_capacity(actives.len());
        for c in actives {
            let updated = self
                .update_conversation(
                    &c.id,
                    &ConversationPatch {
                        status: Some("suspended".to_string()),
                        ..Default::default()
                    },
                )
                .await?;
            out.push(updated);
        }
        Ok(out)
    }

    // ---- messages -----------------------------------------------------

    /// Upserts by `(conversation_id, id)` unconditionally — the row may
    /// already exist from an earlier partial emission of this same block
    /// id regardless of whether *this* call is itself partial or the
    /// terminal `isPartial:false` one (spec §3 "for partial blocks, may
    /// upsert by id"; §8 invariant: the Store must hold the row before
    /// broadcast for *every* `isPartial:false` block, not only ones whose
    /// id happens to be new).
    pub async fn append_message(&self, conversation_id: &str, block: &Block) -> AppResult<()> {
        let metadata = serde_json::to_vec(block).map_err(|e| AppError::ParseError(e.to_string()))?;
        let block_type = serde_json::to_value(block.block_type)
            .ok()
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_default();
        let role = block
            .role
            .and_then(|r| serde_json::to_value(r).ok())
            .and_then(|v| v.as_str().map(|s| s.to_string()));
        let is_partial = block.is_partial.unwrap_or(false);

        sqlx::query(
            "INSERT INTO messages
             (id, conversation_id, type, role, content, timestamp, is_partial,
              tool_id, tool_name, is_error, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(conversation_id, id) DO UPDATE SET
               content = excluded.content,
               is_partial = excluded.is_partial,
               is_error = excluded.is_error,
               metadata = excluded.metadata",
        )
        .bind(&block.id)
        .bind(conversation_id)
        .bind(&block_type)
        .bind(&role)
        .bind(&block.content)
        .bind(block.timestamp)
        .bind(is_partial)
        .bind(&block.tool_id)
        .bind(&block.tool_name)
        .bind(block.is_error)
        .bind(&metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_messages(
        &self,
        conversation_id: &str,
        limit: i64,
        before: Option<i64>,
    ) -> AppResult<Vec<Block>> {
        let rows = if let Some(before) = before {
            sqlx::query(
                "SELECT metadata FROM messages WHERE conversation_id = ? AND timestamp < ?
                 ORDER BY timestamp DESC, rowid DESC LIMIT ?",
            )
            .bind(conversation_id)
            .bind(before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT metadata FROM messages WHERE conversation_id = ?
                 ORDER BY timestamp DESC, rowid DESC LIMIT ?",
            )
            .bind(conversation_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };
        let mut blocks: Vec<Block> = rows
            .iter()
            .map(|r| {
                let bytes: Vec<u8> = r.try_get("metadata")?;
                serde_json::from_slice::<Block>(&bytes).map_err(|e| AppError::ParseError(e.to_string()))
            })
            .collect::<AppResult<Vec<_>>>()?;
        blocks.reverse();
        Ok(blocks)
    }

    // ---- pending notifications -----------------------------------------

    /// Queue a turn-completion signal. Bounded per conversation: newest
    /// wins on overflow (spec §3 `PendingNotification`).
    pub async fn queue_notification(&self, n: &PendingNotification) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO pending_notifications (conversation_id, topic, is_turn_complete, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&n.conversation_id)
        .bind(&n.topic)
        .bind(n.is_turn_complete)
        .bind(n.created_at)
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "DELETE FROM pending_notifications WHERE conversation_id = ? AND rowid NOT IN
             (SELECT rowid FROM pending_notifications WHERE conversation_id = ?
              ORDER BY created_at DESC LIMIT 20)",
        )
        .bind(&n.conversation_id)
        .bind(&n.conversation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Destructive drain: matches the source behavior flagged in spec §9
    /// ("drained destructively without acknowledgement") since there is
    /// no original implementation available to confirm an ack-cursor
    /// alternative. See DESIGN.md for the explicit open-question ruling.
    pub async fn drain_pending_notifications(&self) -> AppResult<Vec<PendingNotification>> {
        let rows = sqlx::query(
            "SELECT conversation_id, topic, is_turn_complete, created_at FROM pending_notifications
             ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        let out = rows
            .iter()
            .map(|r| {
                Ok(PendingNotification {
                    conversation_id: r.try_get("conversation_id")?,
                    topic: r.try_get("topic")?,
                    is_turn_complete: r.try_get("is_turn_complete")?,
                    created_at: r.try_get("created_at")?,
                })
            })
            .collect::<AppResult<Vec<_>>>()?;
        sqlx::query("DELETE FROM pending_notifications").execute(&self.pool).await?;
        Ok(out)
    }

    // ---- session config -------------------------------------------------

    pub async fn get_session_config(&self, defaults: &SessionConfig) -> AppResult<SessionConfig> {
        let row = sqlx::query("SELECT * FROM session_config WHERE id = 0")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => Ok(SessionConfig {
                inactivity_timeout_ms: r.try_get("inactivity_timeout_ms")?,
                max_concurrent_sessions: r.try_get("max_concurrent_sessions")?,
                auto_resume_enabled: r.try_get("auto_resume_enabled")?,
                history_buffer_capacity: r.try_get("history_buffer_capacity")?,
                outbound_queue_capacity: r.try_get("outbound_queue_capacity")?,
            }),
            None => {
                self.set_session_config(defaults).await?;
                Ok(defaults.clone())
            }
        }
    }

    pub async fn set_session_config(&self, cfg: &SessionConfig) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO session_config
             (id, inactivity_timeout_ms, max_concurrent_sessions, auto_resume_enabled,
              history_buffer_capacity, outbound_queue_capacity)
             VALUES (0, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               inactivity_timeout_ms = excluded.inactivity_timeout_ms,
               max_concurrent_sessions = excluded.max_concurrent_sessions,
               auto_resume_enabled = excluded.auto_resume_enabled,
               history_buffer_capacity = excluded.history_buffer_capacity,
               outbound_queue_capacity = excluded.outbound_queue_capacity",
        )
        .bind(cfg.inactivity_timeout_ms)
        .bind(cfg.max_concurrent_sessions)
        .bind(cfg.auto_resume_enabled)
        .bind(cfg.history_buffer_capacity)
        .bind(cfg.outbound_queue_capacity)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- bearer token ---------------------------------------------------

    pub async fn get_or_create_token(&self) -> AppResult<String> {
        let row = sqlx::query("SELECT token FROM auth_token WHERE id = 0")
            .fetch_optional(&self.pool)
            .await?;
        if let Some(r) = row {
            return Ok(r.try_get("token")?);
        }
        let token = crate::auth::generate_token();
        sqlx::query("INSERT INTO auth_token (id, token) VALUES (0, ?)")
            .bind(&token)
            .execute(&self.pool)
            .await?;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConversationStatus;
    use crate::parsers::block::{Block, Role};

    async fn test_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sqlite3");
        let store = Store::open(path.to_str().unwrap()).await.unwrap();
        (store, dir)
    }

    fn conv(id: &str, status: ConversationStatus) -> Conversation {
        let now = crate::model::now_ms();
        Conversation {
            id: id.to_string(),
            tool: Tool::Claude,
            topic: "topic".into(),
            model: None,
            mode: Mode::Agent,
            permission_mode: PermissionMode::Default,
            project_path: "/tmp/p".into(),
            status,
            created_at: now,
            updated_at: now,
            last_activity: now,
            session_id: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_conversation_round_trips() {
        let (store, _dir) = test_store().await;
        let c = conv("c1", ConversationStatus::Active);
        store.create_conversation(&c).await.unwrap();
        let fetched = store.get_conversation("c1").await.unwrap();
        assert_eq!(fetched.id, "c1");
        assert_eq!(fetched.status, ConversationStatus::Active);
    }

    #[tokio::test]
    async fn test_create_conversation_rejects_duplicate_id() {
        let (store, _dir) = test_store().await;
        let c = conv("c1", ConversationStatus::Active);
        store.create_conversation(&c).await.unwrap();
        let err = store.create_conversation(&c).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_delete_conversation_is_idempotent() {
        let (store, _dir) = test_store().await;
        let c = conv("c1", ConversationStatus::Active);
        store.create_conversation(&c).await.unwrap();
        store.delete_conversation("c1").await.unwrap();
        store.delete_conversation("c1").await.unwrap();
        assert!(store.get_conversation("c1").await.is_err());
    }

    #[tokio::test]
    async fn test_suspend_all_active_marks_only_active_conversations() {
        let (store, _dir) = test_store().await;
        store.create_conversation(&conv("active1", ConversationStatus::Active)).await.unwrap();
        store.create_conversation(&conv("ended1", ConversationStatus::Ended)).await.unwrap();

        let updated = store.suspend_all_active().await.unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].id, "active1");

        let reloaded = store.get_conversation("active1").await.unwrap();
        assert_eq!(reloaded.status, ConversationStatus::Suspended);
        let ended = store.get_conversation("ended1").await.unwrap();
        assert_eq!(ended.status, ConversationStatus::Ended);
    }

    #[tokio::test]
    async fn test_append_message_then_get_messages_orders_oldest_first() {
        let (store, _dir) = test_store().await;
        let c = conv("c1", ConversationStatus::Active);
        store.create_conversation(&c).await.unwrap();

        for i in 0..3 {
            let block = Block::text(format!("b{i}"), i as i64, Role::Assistant, format!("msg {i}"), false);
            store.append_message("c1", &block).await.unwrap();
        }

        let blocks = store.get_messages("c1", 10, None).await.unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].id, "b0");
        assert_eq!(blocks[2].id, "b2");
    }

    #[tokio::test]
    async fn test_append_message_updates_in_place_while_partial() {
        let (store, _dir) = test_store().await;
        store.create_conversation(&conv("c1", ConversationStatus::Active)).await.unwrap();

        let partial = Block::text("b0", 0, Role::Assistant, "partial", true);
        store.append_message("c1", &partial).await.unwrap();
        let mut still_streaming = partial.clone();
        still_streaming.content = Some("partial more".into());
        store.append_message("c1", &still_streaming).await.unwrap();

        let blocks = store.get_messages("c1", 10, None).await.unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].content.as_deref(), Some("partial more"));
        assert_eq!(blocks[0].is_partial, Some(true));
    }

    /// The terminal `isPartial:false` emission must upsert the same row a
    /// prior partial emission created, not collide with the
    /// `(conversation_id, id)` primary key (spec §3/§8 finalization).
    #[tokio::test]
    async fn test_append_message_finalizes_a_previously_partial_block() {
        let (store, _dir) = test_store().await;
        store.create_conversation(&conv("c1", ConversationStatus::Active)).await.unwrap();

        let partial = Block::text("b0", 0, Role::Assistant, "partial", true);
        store.append_message("c1", &partial).await.unwrap();
        let mut done = partial.clone();
        done.content = Some("complete".into());
        done.is_partial = Some(false);
        store.append_message("c1", &done).await.unwrap();

        let blocks = store.get_messages("c1", 10, None).await.unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].content.as_deref(), Some("complete"));
        assert_eq!(blocks[0].is_partial, Some(false));
    }

    #[tokio::test]
    async fn test_drain_pending_notifications_is_destructive() {
        let (store, _dir) = test_store().await;
        store
            .queue_notification(&PendingNotification {
                conversation_id: "c1".into(),
                topic: "t".into(),
                is_turn_complete: true,
                created_at: 1,
            })
            .await
            .unwrap();

        let first = store.drain_pending_notifications().await.unwrap();
        assert_eq!(first.len(), 1);
        let second = store.drain_pending_notifications().await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_get_or_create_token_is_stable_across_calls() {
        let (store, _dir) = test_store().await;
        let first = store.get_or_create_token().await.unwrap();
        let second = store.get_or_create_token().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_session_config_falls_back_to_defaults_then_persists() {
        let (store, _dir) = test_store().await;
        let defaults = SessionConfig {
            inactivity_timeout_ms: 60_000,
            max_concurrent_sessions: 20,
            auto_resume_enabled: true,
            history_buffer_capacity: 500,
            outbound_queue_capacity: 256,
        };
        let loaded = store.get_session_config(&defaults).await.unwrap();
        assert_eq!(loaded.max_concurrent_sessions, 20);

        let mut updated = loaded.clone();
        updated.max_concurrent_sessions = 5;
        store.set_session_config(&updated).await.unwrap();

        let reloaded = store.get_session_config(&defaults).await.unwrap();
        assert_eq!(reloaded.max_concurrent_sessions, 5);
    }
}
