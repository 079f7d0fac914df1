// src/agent/session.rs
// One chat: owns the PTY, the parser, the state machine, the activity
// clock, and the pending-approval table (spec §4.5). Runs as a single
// task so all of its mutable state is single-threaded; callers talk to
// it only through `SessionCommand`s and observe it only through
// `SessionEvent`s — no shared mutex, no back-pointer to the Hub.

use crate::agent::types::{SessionCommand, SessionEvent, SessionState};
use crate::cli_templates;
use crate::config::ToolExecutables;
use crate::error::AppError;
use crate::history::HistoryBuffer;
use crate::model::{Conversation, ConversationPatch, PendingNotification};
use crate::parsers::block::{Block, BlockType};
use crate::parsers::{self, Parser};
use crate::pty::{PtyDims, PtyEvent, PtyHost};
use crate::store::Store;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

pub struct AgentSessionHandle {
    pub conversation_id: String,
    pub command_tx: mpsc::Sender<SessionCommand>,
    pub state_rx: watch::Receiver<SessionState>,
}

impl AgentSessionHandle {
    async fn call(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<(), AppError>>) -> SessionCommand,
    ) -> Result<(), AppError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(build(tx))
            .await
            .map_err(|_| AppError::NotFound(self.conversation_id.clone()))?;
        rx.await.map_err(|_| AppError::IOError("session task gone".into()))?
    }

    pub async fn send_message(&self, text: String) -> Result<(), AppError> {
        self.call(|reply| SessionCommand::SendMessage { text, reply }).await
    }

    pub async fn approve(&self, block_id: String, approved: bool) -> Result<(), AppError> {
        self.call(|reply| SessionCommand::Approve { block_id, approved, reply }).await
    }

    pub async fn cancel(&self) -> Result<(), AppError> {
        self.call(|reply| SessionCommand::Cancel { reply }).await
    }

    pub async fn end(&self) -> Result<(), AppError> {
        self.call(|reply| SessionCommand::End { reply }).await
    }

    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), AppError> {
        self.call(|reply| SessionCommand::Resize { cols, rows, reply }).await
    }

    pub async fn suspend(&self) -> Result<(), AppError> {
        self.call(|reply| SessionCommand::Suspend { reply }).await
    }

    pub async fn raw_input(&self, bytes: Vec<u8>) -> Result<(), AppError> {
        self.call(|reply| SessionCommand::RawInput { bytes, reply }).await
    }
}

struct PendingApproval {
    tool_name: String,
}

struct Running {
    parser: Box<dyn Parser>,
    pty: crate::pty::PtyHandle,
}

/// Spawn the background task driving one conversation and return a
/// handle to it. `resume` is the CLI-native resume token to pass to the
/// invocation template, if any (spec §4.5 "Suspended -> sendMessage ->
/// Starting: respawn with resume token if CLI supports it").
pub fn spawn(
    conversation: Conversation,
    store: Arc<Store>,
    history: Arc<HistoryBuffer>,
    tools: Arc<ToolExecutables>,
    event_tx: mpsc::Sender<(String, SessionEvent)>,
    inactivity_timeout_ms: watch::Receiver<i64>,
) -> AgentSessionHandle {
    let (command_tx, command_rx) = mpsc::channel(64);
    let (state_tx, state_rx) = watch::channel(SessionState::Starting);
    let conversation_id = conversation.id.clone();

    tokio::spawn(run(
        conversation,
        store,
        history,
        tools,
        event_tx,
        command_rx,
        state_tx,
        inactivity_timeout_ms,
    ));

    AgentSessionHandle {
        conversation_id,
        command_tx,
        state_rx,
    }
}

async fn run(
    mut conversation: Conversation,
    store: Arc<Store>,
    history: Arc<HistoryBuffer>,
    tools: Arc<ToolExecutables>,
    event_tx: mpsc::Sender<(String, SessionEvent)>,
    mut command_rx: mpsc::Receiver<SessionCommand>,
    state_tx: watch::Sender<SessionState>,
    mut inactivity_timeout_ms: watch::Receiver<i64>,
) {
    let conversation_id = conversation.id.clone();
    let mut pending_approvals: HashMap<String, PendingApproval> = HashMap::new();
    let mut seen_tool_ids: std::collections::HashSet<String> = std::collections::HashSet::new();

    let mut running = match start_process(&conversation, &tools, None) {
        Ok(r) => r,
        Err(e) => {
            emit(&event_tx, &conversation_id, SessionEvent::Ended { reason: e.to_string() }).await;
            let _ = state_tx.send(SessionState::Ended);
            return;
        }
    };
    set_state(&state_tx, &event_tx, &conversation_id, SessionState::Starting).await;

    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(5));

    loop {
        tokio::select! {
            biased;

            Some(cmd) = command_rx.recv() => {
                if !handle_command(
                    cmd,
                    &mut conversation,
                    &store,
                    &history,
                    &tools,
                    &event_tx,
                    &state_tx,
                    &mut running,
                    &mut pending_approvals,
                ).await {
                    break;
                }
            }

            event = running.pty.output_rx.recv() => {
                match event {
                    Some(PtyEvent::Output(bytes)) => {
                        let blocks = running.parser.feed(&bytes);
                        process_blocks(
                            blocks,
                            &conversation,
                            &store,
                            &history,
                            &event_tx,
                            &state_tx,
                            &mut pending_approvals,
                            &mut seen_tool_ids,
                        ).await;
                        if running.parser.turn_complete() {
                            on_turn_complete(&mut conversation, &store, &event_tx, &state_tx).await;
                        }
                    }
                    Some(PtyEvent::Error(msg)) => {
                        suspend_session(&mut conversation, &store, &event_tx, &state_tx, "io").await;
                        tracing::warn!(conversation_id = %conversation_id, error = %msg, "pty io error");
                    }
                    Some(PtyEvent::Closed { exit_code }) | None => {
                        let ok = exit_code.map(|c| c == 0).unwrap_or(true);
                        if ok {
                            end_session(&mut conversation, &store, &event_tx, &state_tx, "exited").await;
                        } else {
                            let reason = format!("child exited with code {:?}", exit_code);
                            end_session(&mut conversation, &store, &event_tx, &state_tx, &reason).await;
                        }
                        break;
                    }
                }
            }

            _ = ticker.tick() => {
                let timeout = *inactivity_timeout_ms.borrow();
                let state = *state_tx.borrow();
                let idle_like = matches!(state, SessionState::Idle | SessionState::Awaiting);
                if idle_like && crate::model::now_ms() - conversation.last_activity >= timeout {
                    let _ = running.pty.kill(libc::SIGTERM);
                    suspend_session(&mut conversation, &store, &event_tx, &state_tx, "inactivity").await;
                    break;
                }
            }

            _ = inactivity_timeout_ms.changed() => {
                // just re-borrow on next tick
            }
        }

        if matches!(*state_tx.borrow(), SessionState::Ended | SessionState::Suspended) {
            break;
        }
    }
}

fn start_process(
    conversation: &Conversation,
    tools: &ToolExecutables,
    resume_token: Option<&str>,
) -> Result<Running, AppError> {
    let inv = cli_templates::build(conversation, tools, resume_token);
    let pty = PtyHost::spawn(&inv.argv, &inv.env, &conversation.project_path, PtyDims::default())?;
    let parser = parsers::for_tool(conversation.tool);
    Ok(Running { parser, pty })
}

/// Grace period between a graceful `SIGTERM` and the harder escalation on
/// `end` (spec §4.3 "SIGTERM for graceful end... escalating... if the
/// child does not exit within a grace period").
const END_GRACE_PERIOD: std::time::Duration = std::time::Duration::from_secs(3);

/// Waits for the child to report `Closed` after a graceful signal was
/// already sent, escalating to `SIGKILL` if it hasn't exited within
/// `grace`. Any stdout bytes that arrive during the wait are discarded —
/// the session is tearing down regardless, so there is nothing left to
/// parse them into.
async fn wait_for_exit_or_escalate(running: &mut Running, grace: std::time::Duration) {
    let exited = tokio::time::timeout(grace, async {
        loop {
            match running.pty.output_rx.recv().await {
                Some(PtyEvent::Closed { .. }) | None => return,
                _ => continue,
            }
        }
    })
    .await
    .is_ok();
    if !exited {
        let _ = running.pty.kill(libc::SIGKILL);
    }
}

async fn emit(event_tx: &mpsc::Sender<(String, SessionEvent)>, conversation_id: &str, ev: SessionEvent) {
    let _ = event_tx.send((conversation_id.to_string(), ev)).await;
}

async fn set_state(
    state_tx: &watch::Sender<SessionState>,
    event_tx: &mpsc::Sender<(String, SessionEvent)>,
    conversation_id: &str,
    state: SessionState,
) {
    let _ = state_tx.send(state);
    emit(event_tx, conversation_id, SessionEvent::StateChanged(state)).await;
}

#[allow(clippy::too_many_arguments)]
async fn handle_command(
    cmd: SessionCommand,
    conversation: &mut Conversation,
    store: &Arc<Store>,
    history: &Arc<HistoryBuffer>,
    tools: &Arc<ToolExecutables>,
    event_tx: &mpsc::Sender<(String, SessionEvent)>,
    state_tx: &watch::Sender<SessionState>,
    running: &mut Running,
    pending_approvals: &mut HashMap<String, PendingApproval>,
) -> bool {
    match cmd {
        SessionCommand::SendMessage { text, reply } => {
            let state = *state_tx.borrow();
            if matches!(state, SessionState::AwaitingApproval | SessionState::Awaiting) {
                let _ = reply.send(Err(AppError::Busy));
                return true;
            }
            if matches!(state, SessionState::Suspended) {
                match start_process(conversation, tools, conversation.session_id.as_deref()) {
                    Ok(new_running) => {
                        *running = new_running;
                        conversation.status = crate::model::ConversationStatus::Active;
                        set_state(state_tx, event_tx, &conversation.id, SessionState::Starting).await;
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        return true;
                    }
                }
            }
            let res = running.pty.write_stdin(text.into_bytes());
            if res.is_ok() {
                conversation.last_activity = crate::model::now_ms();
                set_state(state_tx, event_tx, &conversation.id, SessionState::Awaiting).await;
            }
            let _ = reply.send(res);
            true
        }
        SessionCommand::Approve { block_id, approved, reply } => {
            if !pending_approvals.contains_key(&block_id) {
                let _ = reply.send(Err(AppError::NotFound(block_id)));
                return true;
            }
            pending_approvals.remove(&block_id);
            let payload = if approved { "yes\n" } else { "no\n" };
            let res = running.pty.write_stdin(payload.as_bytes().to_vec());
            if res.is_ok() {
                set_state(state_tx, event_tx, &conversation.id, SessionState::Awaiting).await;
            }
            let _ = reply.send(res);
            true
        }
        SessionCommand::Cancel { reply } => {
            let res = running.pty.kill(libc::SIGINT);
            if res.is_ok() {
                let ts = crate::model::now_ms();
                let mut b = Block::new(format!("cancel-{ts}"), BlockType::ChatCancelled, ts);
                b.is_partial = Some(false);
                let _ = store.append_message(&conversation.id, &b).await;
                history.append(&conversation.id, b.clone());
                emit(event_tx, &conversation.id, SessionEvent::BlockEmitted(b)).await;
                set_state(state_tx, event_tx, &conversation.id, SessionState::Awaiting).await;
            }
            let _ = reply.send(res);
            true
        }
        SessionCommand::End { reply } => {
            let _ = running.pty.kill(libc::SIGTERM);
            wait_for_exit_or_escalate(running, END_GRACE_PERIOD).await;
            end_session(conversation, store, event_tx, state_tx, "end requested").await;
            let _ = reply.send(Ok(()));
            false
        }
        SessionCommand::Resize { cols, rows, reply } => {
            let _ = reply.send(running.pty.resize(PtyDims { cols, rows }));
            true
        }
        SessionCommand::Suspend { reply } => {
            let _ = running.pty.kill(libc::SIGTERM);
            suspend_session(conversation, store, event_tx, state_tx, "manual").await;
            let _ = reply.send(Ok(()));
            false
        }
        SessionCommand::RawInput { bytes, reply } => {
            let res = running.pty.write_stdin(bytes);
            if res.is_ok() {
                conversation.last_activity = crate::model::now_ms();
            }
            let _ = reply.send(res);
            true
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_blocks(
    blocks: Vec<Block>,
    conversation: &Conversation,
    store: &Arc<Store>,
    history: &Arc<HistoryBuffer>,
    event_tx: &mpsc::Sender<(String, SessionEvent)>,
    state_tx: &watch::Sender<SessionState>,
    pending_approvals: &mut HashMap<String, PendingApproval>,
    seen_tool_ids: &mut std::collections::HashSet<String>,
) {
    for block in blocks {
        if block.block_type == BlockType::SessionStart && matches!(*state_tx.borrow(), SessionState::Starting) {
            set_state(state_tx, event_tx, &conversation.id, SessionState::Idle).await;
        }
        if block.block_type == BlockType::ToolUseStart {
            if let Some(id) = &block.tool_id {
                seen_tool_ids.insert(id.clone());
            }
        }
        if block.block_type == BlockType::ToolUseResult {
            let orphaned = match &block.tool_id {
                Some(id) => !seen_tool_ids.remove(id),
                None => true,
            };
            if orphaned {
                // Parser-contract violation (spec §8: a `toolUseResult`
                // must be preceded by a `toolUseStart` with the same
                // `toolId`) — surface it rather than forwarding a result
                // clients can't attribute to any tool invocation.
                let ts = crate::model::now_ms();
                let err = Block::error(format!("orphaned-{}", block.id), ts, format!("toolUseResult for unknown toolId {:?}", block.tool_id));
                let _ = store.append_message(&conversation.id, &err).await;
                history.append(&conversation.id, err.clone());
                emit(event_tx, &conversation.id, SessionEvent::BlockEmitted(err)).await;
            }
        }
        if block.block_type == BlockType::ApprovalRequest {
            pending_approvals.insert(
                block.id.clone(),
                PendingApproval {
                    tool_name: block.tool_name.clone().unwrap_or_default(),
                },
            );
            set_state(state_tx, event_tx, &conversation.id, SessionState::AwaitingApproval).await;
        }

        let _ = store.append_message(&conversation.id, &block).await;
        history.append(&conversation.id, block.clone());
        emit(event_tx, &conversation.id, SessionEvent::BlockEmitted(block)).await;
    }
}

async fn on_turn_complete(
    conversation: &mut Conversation,
    store: &Arc<Store>,
    event_tx: &mpsc::Sender<(String, SessionEvent)>,
    state_tx: &watch::Sender<SessionState>,
) {
    conversation.last_activity = crate::model::now_ms();
    let _ = store
        .update_conversation(
            &conversation.id,
            &ConversationPatch {
                last_activity: Some(conversation.last_activity),
                ..Default::default()
            },
        )
        .await;
    set_state(state_tx, event_tx, &conversation.id, SessionState::Idle).await;
    let _ = store
        .queue_notification(&PendingNotification {
            conversation_id: conversation.id.clone(),
            topic: conversation.topic.clone(),
            is_turn_complete: true,
            created_at: conversation.last_activity,
        })
        .await;
}

async fn suspend_session(
    conversation: &mut Conversation,
    store: &Arc<Store>,
    event_tx: &mpsc::Sender<(String, SessionEvent)>,
    state_tx: &watch::Sender<SessionState>,
    reason: &str,
) {
    conversation.status = crate::model::ConversationStatus::Suspended;
    let _ = store
        .update_conversation(
            &conversation.id,
            &ConversationPatch {
                status: Some("suspended".to_string()),
                ..Default::default()
            },
        )
        .await;
    set_state(state_tx, event_tx, &conversation.id, SessionState::Suspended).await;
    emit(event_tx, &conversation.id, SessionEvent::Suspended { reason: reason.to_string() }).await;
    let ts = crate::model::now_ms();
    let mut b = Block::new(format!("sessend-{ts}"), BlockType::SessionEnd, ts);
    b.suspended = Some(true);
    b.is_partial = Some(false);
    let _ = store.append_message(&conversation.id, &b).await;
    emit(event_tx, &conversation.id, SessionEvent::BlockEmitted(b)).await;
}

async fn end_session(
    conversation: &mut Conversation,
    store: &Arc<Store>,
    event_tx: &mpsc::Sender<(String, SessionEvent)>,
    state_tx: &watch::Sender<SessionState>,
    reason: &str,
) {
    conversation.status = crate::model::ConversationStatus::Ended;
    let _ = store
        .update_conversation(
            &conversation.id,
            &ConversationPatch {
                status: Some("ended".to_string()),
                ..Default::default()
            },
        )
        .await;
    set_state(state_tx, event_tx, &conversation.id, SessionState::Ended).await;
    emit(event_tx, &conversation.id, SessionEvent::Ended { reason: reason.to_string() }).await;
    let ts = crate::model::now_ms();
    let mut b = Block::new(format!("sessend-{ts}"), BlockType::SessionEnd, ts);
    b.suspended = Some(false);
    b.message = Some(reason.to_string());
    b.is_partial = Some(false);
    let _ = store.append_message(&conversation.id, &b).await;
    emit(event_tx, &conversation.id, SessionEvent::BlockEmitted(b)).await;
}
