// src/state.rs
// Application state shared across HTTP and WebSocket handlers, mirroring
// the teacher's `state::AppState` shape (one `Arc<...>` field per
// subsystem, constructed once in `main` and cloned into every request).

use crate::agent::SessionManager;
use crate::config::{Config, ToolExecutables};
use crate::history::HistoryBuffer;
use crate::hub::Hub;
use crate::store::Store;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub history: Arc<HistoryBuffer>,
    pub manager: Arc<SessionManager>,
    pub hub: Arc<Hub>,
    pub tools: Arc<ToolExecutables>,
    pub token: Arc<str>,
    pub config: Arc<Config>,
}
