// src/agent/manager.rs
// Registry of sessions; create/lookup/suspend/resume/end; enforces the
// concurrency cap; runs the inactivity sweeper (spec §4.6).

use crate::agent::session::{self, AgentSessionHandle};
use crate::agent::types::{SessionEvent, SessionState};
use crate::config::ToolExecutables;
use crate::error::{AppError, AppResult};
use crate::history::HistoryBuffer;
use crate::model::{Conversation, ConversationStatus, Mode, NewConversation, PermissionMode, SessionConfig, SessionConfigPatch, Tool};
use crate::store::Store;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

pub struct SessionManager {
    store: Arc<Store>,
    history: Arc<HistoryBuffer>,
    tools: Arc<ToolExecutables>,
    sessions: RwLock<HashMap<String, Arc<AgentSessionHandle>>>,
    event_tx: mpsc::Sender<(String, SessionEvent)>,
    config: RwLock<SessionConfig>,
    inactivity_tx: watch::Sender<i64>,
    active_count: AtomicI64,
}

impl SessionManager {
    pub fn new(
        store: Arc<Store>,
        history: Arc<HistoryBuffer>,
        tools: Arc<ToolExecutables>,
        config: SessionConfig,
        event_tx: mpsc::Sender<(String, SessionEvent)>,
    ) -> Arc<Self> {
        let (inactivity_tx, _rx) = watch::channel(config.inactivity_timeout_ms);
        Arc::new(Self {
            store,
            history,
            tools,
            sessions: RwLock::new(HashMap::new()),
            event_tx,
            config: RwLock::new(config),
            inactivity_tx,
            active_count: AtomicI64::new(0),
        })
    }

    pub fn config(&self) -> SessionConfig {
        self.config.read().expect("config lock poisoned").clone()
    }

    /// Publishes the new inactivity timeout to the single sweeper-facing
    /// `watch` channel every running session subscribes to — "mutation
    /// publishes to all sweepers atomically" holds because there is
    /// exactly one logical sweeper per session and `watch` always
    /// delivers the latest value (SPEC_FULL §4.6).
    pub async fn update_config(&self, patch: SessionConfigPatch) -> AppResult<SessionConfig> {
        let updated = {
            let mut guard = self.config.write().expect("config lock poisoned");
            *guard = guard.apply(&patch);
            guard.clone()
        };
        self.store.set_session_config(&updated).await?;
        let _ = self.inactivity_tx.send(updated.inactivity_timeout_ms);
        Ok(updated)
    }

    fn live_count(&self) -> i64 {
        self.active_count.load(Ordering::SeqCst)
    }

    pub async fn create(&self, spec: NewConversation) -> AppResult<Conversation> {
        if self.live_count() >= self.config().max_concurrent_sessions {
            return Err(AppError::Capacity);
        }
        let tool = Tool::parse(&spec.tool).ok_or_else(|| AppError::ParseError(format!("unknown tool {}", spec.tool)))?;
        let mode = Mode::parse(&spec.mode).ok_or_else(|| AppError::ParseError(format!("unknown mode {}", spec.mode)))?;
        let permission_mode = PermissionMode::parse(&spec.permission_mode)
            .ok_or_else(|| AppError::ParseError(format!("unknown permission mode {}", spec.permission_mode)))?;
        let now = crate::model::now_ms();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            tool,
            topic: spec.topic.unwrap_or_else(|| "New conversation".to_string()),
            model: spec.model,
            mode,
            permission_mode,
            project_path: spec.project_path,
            status: ConversationStatus::Active,
            created_at: now,
            updated_at: now,
            last_activity: now,
            session_id: None,
        };
        self.store.create_conversation(&conversation).await?;
        self.spawn_and_register(conversation.clone());
        if let Some(prompt) = spec.initial_prompt {
            if let Some(handle) = self.get(&conversation.id) {
                // Best-effort: the session may still be in `Starting`;
                // the session task itself decides whether to accept or
                // queue based on its own state.
                let _ = handle.send_message(prompt).await;
            }
        }
        Ok(conversation)
    }

    fn spawn_and_register(&self, conversation: Conversation) {
        let id = conversation.id.clone();
        let handle = session::spawn(
            conversation,
            self.store.clone(),
            self.history.clone(),
            self.tools.clone(),
            self.event_tx.clone(),
            self.inactivity_tx.subscribe(),
        );
        self.active_count.fetch_add(1, Ordering::SeqCst);
        self.sessions.write().expect("sessions lock poisoned").insert(id, Arc::new(handle));
    }

    pub fn get(&self, id: &str) -> Option<Arc<AgentSessionHandle>> {
        self.sessions.read().expect("sessions lock poisoned").get(id).cloned()
    }

    /// `status = suspended`. Every tool can be resumed in some form —
    /// natively via a session token (`Tool::supports_session_resume`) or
    /// by a fresh process plus transcript-replay preface otherwise — so
    /// no further filtering on `tool` is needed (spec §4.6 `canResume`).
    pub async fn list_resumable(&self) -> AppResult<Vec<Conversation>> {
        self.store
            .list_conversations(&crate::model::ConversationFilter {
                status: Some("suspended".to_string()),
                ..Default::default()
            })
            .await
    }

    pub async fn list_recent(&self, since_ms: i64) -> AppResult<Vec<Conversation>> {
        self.store
            .list_conversations(&crate::model::ConversationFilter {
                active_since: Some(since_ms),
                ..Default::default()
            })
            .await
    }

    pub async fn suspend(&self, id: &str) -> AppResult<()> {
        let handle = self.get(id).ok_or_else(|| AppError::NotFound(id.to_string()))?;
        handle.suspend().await?;
        self.forget(id);
        Ok(())
    }

    /// Graceful shutdown (spec §10): suspend every live session so no
    /// conversation is left `active` with a child process the next boot's
    /// crash recovery would otherwise have to clean up after.
    pub async fn suspend_all(&self) {
        let ids: Vec<String> = self.sessions.read().expect("sessions lock poisoned").keys().cloned().collect();
        for id in ids {
            if let Err(err) = self.suspend(&id).await {
                tracing::warn!(conversation_id = %id, %err, "failed to suspend session during shutdown");
            }
        }
    }

    pub async fn resume(&self, id: &str) -> AppResult<Conversation> {
        let conversation = self.store.get_conversation(id).await?;
        if conversation.status != ConversationStatus::Suspended {
            return Err(AppError::Conflict(format!("conversation {id} is not suspended")));
        }
        if self.live_count() >= self.config().max_concurrent_sessions {
            return Err(AppError::Capacity);
        }
        self.spawn_and_register(conversation.clone());
        Ok(conversation)
    }

    pub async fn end(&self, id: &str) -> AppResult<()> {
        if let Some(handle) = self.get(id) {
            handle.end().await?;
        } else {
            self.store
                .update_conversation(
                    id,
                    &crate::model::ConversationPatch {
                        status: Some("ended".to_string()),
                        ..Default::default()
                    },
                )
                .await?;
        }
        self.forget(id);
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> AppResult<()> {
        if let Some(handle) = self.get(id) {
            let _ = handle.end().await;
        }
        self.forget(id);
        self.history.clear(id);
        self.store.delete_conversation(id).await
    }

    fn forget(&self, id: &str) {
        if self.sessions.write().expect("sessions lock poisoned").remove(id).is_some() {
            self.active_count.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Count of sessions with a live PTY, for the capacity invariant
    /// (spec §8: "number of sessions in {Starting,...} is ≤ cap").
    pub fn live_session_count(&self) -> i64 {
        self.live_count()
    }

    /// Reap handles whose task has already exited (e.g. the child CLI
    /// crashed and the session task wound down on its own) so the
    /// registry and the capacity counter stay accurate. `Suspended` also
    /// terminates the task (auto-suspend on inactivity or a PTY IO error
    /// never goes through `SessionManager::suspend`, which forgets the
    /// handle itself) — without reaping here, `get()` would keep
    /// returning a handle whose task is already gone, and `chatMessage`
    /// auto-resume would never fire for anything but a manual suspend.
    pub fn reap_finished(&self, id: &str, final_state: SessionState) {
        if matches!(final_state, SessionState::Ended | SessionState::Suspended) {
            self.forget(id);
        }
    }

    /// On boot, load conversations the Store already marked `suspended`
    /// on crash recovery, for `GET /conversations/sessions/resumable`
    /// without spawning anything (spec §8 scenario 6).
    pub async fn bootstrap(&self) -> AppResult<()> {
        self.store.suspend_all_active().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewConversation;
    use tokio::time::{timeout, Duration};

    async fn test_manager(max_concurrent_sessions: i64) -> (Arc<SessionManager>, mpsc::Receiver<(String, SessionEvent)>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("test.sqlite3").to_str().unwrap()).await.unwrap());
        let history = Arc::new(HistoryBuffer::new(50));
        let tools = Arc::new(ToolExecutables::from_env());
        let config = SessionConfig {
            inactivity_timeout_ms: 60_000,
            max_concurrent_sessions,
            auto_resume_enabled: true,
            history_buffer_capacity: 50,
            outbound_queue_capacity: 64,
        };
        let (event_tx, event_rx) = mpsc::channel(256);
        let manager = SessionManager::new(store, history, tools, config, event_tx);
        (manager, event_rx, dir)
    }

    /// `custom` resolves to the `true` binary by default, which exits
    /// immediately — enough to drive a session through its whole
    /// lifecycle without depending on a real agent CLI being installed.
    fn custom_conversation_spec() -> NewConversation {
        NewConversation {
            tool: "custom".to_string(),
            project_path: "/tmp".to_string(),
            topic: Some("test".to_string()),
            model: None,
            mode: "agent".to_string(),
            permission_mode: "default".to_string(),
            initial_prompt: None,
        }
    }

    #[tokio::test]
    async fn test_create_respects_concurrency_cap() {
        let (manager, _event_rx, _dir) = test_manager(1).await;
        manager.create(custom_conversation_spec()).await.unwrap();
        let err = manager.create(custom_conversation_spec()).await.unwrap_err();
        assert!(matches!(err, AppError::Capacity));
    }

    #[tokio::test]
    async fn test_ended_session_is_reaped_from_registry() {
        let (manager, mut event_rx, _dir) = test_manager(5).await;
        let conversation = manager.create(custom_conversation_spec()).await.unwrap();
        assert!(manager.get(&conversation.id).is_some());

        // Drive the event stream the way the Hub's dispatcher does, until
        // the spawned `true` process exits and the session reports Ended.
        loop {
            let (id, event) = timeout(Duration::from_secs(5), event_rx.recv())
                .await
                .expect("session never reported an event")
                .expect("event channel closed early");
            if matches!(event, SessionEvent::Ended { .. }) {
                manager.reap_finished(&id, SessionState::Ended);
                break;
            }
        }
        assert!(manager.get(&conversation.id).is_none());
        assert_eq!(manager.live_session_count(), 0);
    }

    #[tokio::test]
    async fn test_resume_rejects_non_suspended_conversation() {
        let (manager, _event_rx, _dir) = test_manager(5).await;
        let conversation = manager.create(custom_conversation_spec()).await.unwrap();
        let err = manager.resume(&conversation.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_config_persists_and_republishes() {
        let (manager, _event_rx, _dir) = test_manager(5).await;
        let updated = manager
            .update_config(SessionConfigPatch {
                max_concurrent_sessions: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.max_concurrent_sessions, 2);
        assert_eq!(manager.config().max_concurrent_sessions, 2);
    }
}
