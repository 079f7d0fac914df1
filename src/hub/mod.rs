// src/hub/mod.rs
// WebSocket multiplexer (spec §4.7): per-client attachment set, fan-out
// of session-emitted blocks to every currently-attached subscriber, and
// history replay on attach. Generalizes the teacher's single chat
// WebSocket (`api::ws::chat`, one backend session per socket) to many
// independent conversations multiplexed over one socket, the way the
// spec's mobile client attaches/detaches from several chats without
// reconnecting.
//
// Ownership is one-way: the Hub resolves sessions by id through the
// `SessionManager` and consumes a single `SessionEvent` channel; it
// never holds a back-pointer into an `AgentSession` (spec §9).

pub mod messages;

use crate::agent::{SessionEvent, SessionManager, SessionState};
use crate::auth;
use crate::error::AppError;
use crate::history::HistoryBuffer;
use crate::model::now_ms;
use crate::parsers::block::Block;
use crate::state::AppState;
use crate::store::Store;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use messages::{WsClientMessage, WsServerMessage};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

type Subscribers = RwLock<HashMap<String, HashMap<u64, mpsc::Sender<WsServerMessage>>>>;

pub struct Hub {
    manager: Arc<SessionManager>,
    history: Arc<HistoryBuffer>,
    store: Arc<Store>,
    subscribers: Subscribers,
    outbound_queue_capacity: AtomicUsize,
    next_client_id: AtomicU64,
}

impl Hub {
    /// Spawns the single broadcast dispatcher task that drains
    /// `event_rx` and fans blocks out to attached subscribers (spec §5
    /// "the Hub owns... a single broadcast dispatcher").
    pub fn new(
        manager: Arc<SessionManager>,
        history: Arc<HistoryBuffer>,
        store: Arc<Store>,
        outbound_queue_capacity: usize,
        event_rx: mpsc::Receiver<(String, SessionEvent)>,
    ) -> Arc<Self> {
        let hub = Arc::new(Self {
            manager,
            history,
            store,
            subscribers: RwLock::new(HashMap::new()),
            outbound_queue_capacity: AtomicUsize::new(outbound_queue_capacity),
            next_client_id: AtomicU64::new(1),
        });
        tokio::spawn(dispatch(hub.clone(), event_rx));
        hub
    }

    fn alloc_client_id(&self) -> u64 {
        self.next_client_id.fetch_add(1, Ordering::SeqCst)
    }

    fn outbound_queue_capacity(&self) -> usize {
        self.outbound_queue_capacity.load(Ordering::SeqCst)
    }

    /// Live update from `PUT /conversations/sessions/config` (spec §3).
    /// Only affects sockets opened after the call — a connection already
    /// up keeps the per-client channel it was handed at attach time,
    /// since `mpsc::channel` capacity is fixed for the life of the channel.
    pub fn set_outbound_queue_capacity(&self, capacity: usize) {
        self.outbound_queue_capacity.store(capacity.max(1), Ordering::SeqCst);
    }

    /// Adds `client_id` to `conversation_id`'s subscriber set and
    /// returns the bounded `HistoryBuffer` snapshot for replay (spec
    /// §4.7 attach protocol steps 1-3; access verification happens one
    /// level up, at the bearer-token boundary — there is no finer-
    /// grained per-conversation ACL in this single-operator server).
    fn attach(&self, conversation_id: &str, client_id: u64, tx: mpsc::Sender<WsServerMessage>) -> Vec<Block> {
        self.subscribers
            .write()
            .expect("subscribers lock poisoned")
            .entry(conversation_id.to_string())
            .or_default()
            .insert(client_id, tx);
        self.history.snapshot(conversation_id)
    }

    fn detach(&self, conversation_id: &str, client_id: u64) {
        let mut guard = self.subscribers.write().expect("subscribers lock poisoned");
        if let Some(set) = guard.get_mut(conversation_id) {
            set.remove(&client_id);
            if set.is_empty() {
                guard.remove(conversation_id);
            }
        }
    }

    fn has_subscribers(&self, conversation_id: &str) -> bool {
        self.subscribers
            .read()
            .expect("subscribers lock poisoned")
            .get(conversation_id)
            .map(|s| !s.is_empty())
            .unwrap_or(false)
    }

    /// Delivers `msg` to every subscriber of `conversation_id`. A full
    /// per-subscriber queue is treated as backpressure: that subscriber
    /// is dropped (it may re-attach and receive history replay), but no
    /// other subscriber or the session is affected (spec §4.7 fan-out
    /// contract).
    fn broadcast(&self, conversation_id: &str, msg: WsServerMessage) {
        let senders: Vec<(u64, mpsc::Sender<WsServerMessage>)> = {
            let guard = self.subscribers.read().expect("subscribers lock poisoned");
            match guard.get(conversation_id) {
                Some(set) => set.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
                None => return,
            }
        };
        let mut dead = Vec::new();
        for (client_id, tx) in senders {
            if tx.try_send(msg.clone()).is_err() {
                dead.push(client_id);
            }
        }
        if !dead.is_empty() {
            let mut guard = self.subscribers.write().expect("subscribers lock poisoned");
            if let Some(set) = guard.get_mut(conversation_id) {
                for id in dead {
                    set.remove(&id);
                }
            }
        }
    }
}

/// Drains session events and turns them into outbound WebSocket
/// messages. Coalesces any additional `BlockEmitted` events already
/// queued for the same conversation into one `chatContentBlocks`
/// message (spec §4.7 "batched for efficiency") without holding up
/// delivery for a conversation that only has one block ready.
async fn dispatch(hub: Arc<Hub>, mut event_rx: mpsc::Receiver<(String, SessionEvent)>) {
    let mut stashed: Option<(String, SessionEvent)> = None;
    loop {
        let (conversation_id, event) = match stashed.take() {
            Some(ev) => ev,
            None => match event_rx.recv().await {
                Some(ev) => ev,
                None => break,
            },
        };
        match event {
            SessionEvent::BlockEmitted(first) => {
                let mut blocks = vec![first];
                loop {
                    match event_rx.try_recv() {
                        Ok((next_id, SessionEvent::BlockEmitted(block))) if next_id == conversation_id => {
                            blocks.push(block);
                        }
                        Ok(other) => {
                            stashed = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                hub.broadcast(
                    &conversation_id,
                    WsServerMessage::ChatContentBlocks { conversation_id: conversation_id.clone(), blocks },
                );
            }
            other => dispatch_one(&hub, conversation_id, other).await,
        }
    }
}

async fn dispatch_one(hub: &Arc<Hub>, conversation_id: String, event: SessionEvent) {
    match event {
        SessionEvent::BlockEmitted(block) => {
            hub.broadcast(&conversation_id, WsServerMessage::ChatContentBlocks { conversation_id: conversation_id.clone(), blocks: vec![block] });
        }
        SessionEvent::StateChanged(_) => {
            // Internal telemetry only; not part of the closed outbound
            // message set (spec §4.7).
        }
        SessionEvent::Suspended { reason } => {
            hub.manager.reap_finished(&conversation_id, SessionState::Suspended);
            if !hub.has_subscribers(&conversation_id) {
                let conv = hub.store.get_conversation(&conversation_id).await;
                if let Ok(conv) = conv {
                    let _ = hub
                        .store
                        .queue_notification(&crate::model::PendingNotification {
                            conversation_id: conversation_id.clone(),
                            topic: conv.topic,
                            is_turn_complete: false,
                            created_at: now_ms(),
                        })
                        .await;
                }
            }
            hub.broadcast(&conversation_id, WsServerMessage::ChatSessionSuspended { conversation_id: conversation_id.clone(), reason });
        }
        SessionEvent::Ended { reason } => {
            hub.manager.reap_finished(&conversation_id, SessionState::Ended);
            hub.broadcast(&conversation_id, WsServerMessage::ChatSessionEnded { conversation_id: conversation_id.clone(), reason });
        }
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let client_id = state.hub.alloc_client_id();
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<WsServerMessage>(state.hub.outbound_queue_capacity());

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let Ok(text) = serde_json::to_string(&msg) else { continue };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut authenticated = false;
    let mut attached: HashSet<String> = HashSet::new();

    while let Some(Ok(msg)) = stream.next().await {
        let Message::Text(text) = msg else {
            if matches!(msg, Message::Close(_)) {
                break;
            }
            continue;
        };
        let Ok(client_msg) = serde_json::from_str::<WsClientMessage>(&text) else {
            let _ = out_tx.try_send(WsServerMessage::ChatError { conversation_id: None, code: "ParseError", message: "malformed message".into() });
            continue;
        };

        if !authenticated {
            match client_msg {
                WsClientMessage::Auth { token } => {
                    authenticated = auth::tokens_match(&state.token, &token);
                    let _ = out_tx.send(WsServerMessage::Auth { ok: authenticated }).await;
                    if !authenticated {
                        break;
                    }
                    continue;
                }
                _ => {
                    let _ = out_tx.try_send(WsServerMessage::ChatError { conversation_id: None, code: "Unauthorized", message: "auth required".into() });
                    break;
                }
            }
        }

        handle_client_message(&state, client_id, client_msg, &out_tx, &mut attached).await;
    }

    for conversation_id in attached {
        state.hub.detach(&conversation_id, client_id);
    }
    writer.abort();
}

async fn handle_client_message(
    state: &AppState,
    client_id: u64,
    msg: WsClientMessage,
    out_tx: &mpsc::Sender<WsServerMessage>,
    attached: &mut HashSet<String>,
) {
    match msg {
        WsClientMessage::Auth { .. } => {
            let _ = out_tx.send(WsServerMessage::Auth { ok: true }).await;
        }
        WsClientMessage::ChatAttach { conversation_id } | WsClientMessage::Watch { conversation_id } => {
            let history = state.hub.attach(&conversation_id, client_id, out_tx.clone());
            attached.insert(conversation_id.clone());
            let _ = out_tx.send(WsServerMessage::ChatHistory { conversation_id: conversation_id.clone(), blocks: history }).await;
            let _ = out_tx.send(WsServerMessage::ChatAttached { conversation_id }).await;
        }
        WsClientMessage::ChatDetach { conversation_id } | WsClientMessage::Unwatch { conversation_id } => {
            state.hub.detach(&conversation_id, client_id);
            attached.remove(&conversation_id);
        }
        WsClientMessage::ChatMessage { conversation_id, text } => {
            let handle = match state.manager.get(&conversation_id) {
                Some(handle) => handle,
                None => match auto_resume(state, &conversation_id).await {
                    Some(handle) => handle,
                    None => {
                        report_not_found(out_tx, &conversation_id).await;
                        return;
                    }
                },
            };
            if report(out_tx, &conversation_id, handle.send_message(text).await).await {
                let _ = out_tx.send(WsServerMessage::ChatMessageSent { conversation_id }).await;
            }
        }
        WsClientMessage::ChatInput { conversation_id, text } => {
            let Some(handle) = state.manager.get(&conversation_id) else {
                report_not_found(out_tx, &conversation_id).await;
                return;
            };
            report(out_tx, &conversation_id, handle.raw_input(text.into_bytes()).await).await;
        }
        WsClientMessage::ChatCancel { conversation_id } => {
            let Some(handle) = state.manager.get(&conversation_id) else {
                report_not_found(out_tx, &conversation_id).await;
                return;
            };
            report(out_tx, &conversation_id, handle.cancel().await).await;
        }
        WsClientMessage::ChatApproval { conversation_id, block_id, approved } => {
            let Some(handle) = state.manager.get(&conversation_id) else {
                report_not_found(out_tx, &conversation_id).await;
                return;
            };
            report(out_tx, &conversation_id, handle.approve(block_id, approved).await).await;
        }
        WsClientMessage::Terminal => {
            // Terminal (non-agent) PTY multiplexing is out of scope
            // (spec §1); the endpoint still accepts the frame so a
            // client mixing chat and terminal traffic on one socket
            // does not get disconnected for it.
        }
    }
}

/// A `chatMessage` addressed to a suspended conversation respawns it
/// transparently when `autoResumeEnabled` (spec §4.6, scenario 4: "Call
/// `sendMessage`; expect a new PTY spawn, `sessionStart`, then normal
/// turn output") rather than requiring a separate resume call the spec
/// never exposes over the WebSocket surface.
async fn auto_resume(state: &AppState, conversation_id: &str) -> Option<Arc<crate::agent::session::AgentSessionHandle>> {
    if !state.manager.config().auto_resume_enabled {
        return None;
    }
    state.manager.resume(conversation_id).await.ok()?;
    state.manager.get(conversation_id)
}

async fn report_not_found(out_tx: &mpsc::Sender<WsServerMessage>, conversation_id: &str) {
    let _ = out_tx
        .send(WsServerMessage::ChatError { conversation_id: Some(conversation_id.to_string()), code: "NotFound", message: "no such conversation".into() })
        .await;
}

/// Turns a session-command result into a `chatError` frame instead of
/// closing the connection (spec §7 "WebSocket errors arrive as
/// `{type:\"chatError\",...}`"). Returns whether it was `Ok`, so callers
/// can send a follow-up acknowledgement only on success.
async fn report(out_tx: &mpsc::Sender<WsServerMessage>, conversation_id: &str, result: Result<(), AppError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            let _ = out_tx
                .send(WsServerMessage::ChatError { conversation_id: Some(conversation_id.to_string()), code: e.kind(), message: e.to_string() })
                .await;
            false
        }
    }
}
