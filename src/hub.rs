use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use log::{debug, info, warn};
use rand::Rng;
use tokio::sync::{mpsc, Mutex};

use crate::constants::SHARED_SESSION_ID;
use crate::engine::GameOptions;
use crate::error::GameError;
use crate::server_protocol::{parse_client_message, ParsedClientMessage, ServerMessage};
use crate::server_utils::{make_id, resolve_game_options, validate_tick_interval};
use crate::session::{
    spawn_session, ConnectionId, ObserverDropped, OutboundMessage, SessionCommand, SessionHandle,
    SessionId,
};

/// How connections map onto sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionScope {
    /// Every `start_game` from an unattached connection gets its own session,
    /// torn down when its last observer leaves.
    PerConnection,
    /// One process-wide session that outlives its observers.
    Shared,
}

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub scope: SessionScope,
    pub defaults: GameOptions,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            scope: SessionScope::PerConnection,
            defaults: GameOptions::default(),
        }
    }
}

struct ConnectionContext {
    tx: mpsc::Sender<OutboundMessage>,
    session_id: Option<SessionId>,
}

struct SessionEntry {
    handle: SessionHandle,
    observers: HashSet<ConnectionId>,
}

struct HubState {
    config: HubConfig,
    connections: HashMap<ConnectionId, ConnectionContext>,
    sessions: HashMap<SessionId, SessionEntry>,
    dropped: mpsc::UnboundedSender<ObserverDropped>,
}

/// Routes connection traffic to session tasks and keeps the subscriber registry.
#[derive(Clone)]
pub struct SessionHub {
    state: Arc<Mutex<HubState>>,
}

impl SessionHub {
    /// Must be called inside a tokio runtime: it spawns the task that handles
    /// observers dropped by their sessions.
    pub fn new(config: HubConfig) -> Self {
        let (dropped, notices) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(HubState {
            config,
            connections: HashMap::new(),
            sessions: HashMap::new(),
            dropped,
        }));
        tokio::spawn(watch_dropped_observers(Arc::downgrade(&state), notices));
        Self { state }
    }

    pub async fn connect(&self, tx: mpsc::Sender<OutboundMessage>) -> ConnectionId {
        let connection_id = make_id("client");
        let mut guard = self.state.lock().await;
        guard.connections.insert(
            connection_id.clone(),
            ConnectionContext {
                tx,
                session_id: None,
            },
        );
        debug!("connection {connection_id} opened");
        connection_id
    }

    pub async fn handle_message(&self, connection_id: &str, raw: &str) {
        let mut guard = self.state.lock().await;
        let result =
            parse_client_message(raw).and_then(|message| guard.dispatch(connection_id, message));
        if let Err(err) = result {
            debug!("connection {connection_id}: rejected request: {err}");
            guard.reply(connection_id, &ServerMessage::error(&err));
        }
    }

    pub async fn disconnect(&self, connection_id: &str) {
        let mut guard = self.state.lock().await;
        guard.detach(connection_id);
        if guard.connections.remove(connection_id).is_some() {
            debug!("connection {connection_id} closed");
        }
    }

    /// Asks every connection to close and stops every session.
    pub async fn close_all(&self, reason: &str) {
        let mut guard = self.state.lock().await;
        for (connection_id, context) in &guard.connections {
            let close = OutboundMessage::Close {
                code: 1001,
                reason: reason.to_string(),
            };
            if let Err(err) = context.tx.try_send(close) {
                warn!("connection {connection_id}: close frame not queued: {err}");
            }
        }
        for (session_id, entry) in guard.sessions.drain() {
            if entry.handle.send(SessionCommand::Shutdown).is_err() {
                entry.handle.abort();
            }
            info!("session {session_id} closed: {reason}");
        }
        for context in guard.connections.values_mut() {
            context.session_id = None;
        }
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    pub async fn session_of(&self, connection_id: &str) -> Option<SessionId> {
        let guard = self.state.lock().await;
        guard
            .connections
            .get(connection_id)
            .and_then(|ctx| ctx.session_id.clone())
    }
}

impl HubState {
    fn dispatch(
        &mut self,
        connection_id: &str,
        message: ParsedClientMessage,
    ) -> Result<(), GameError> {
        match message {
            ParsedClientMessage::Ping { t } => {
                self.reply(connection_id, &ServerMessage::Pong { t });
                Ok(())
            }
            ParsedClientMessage::StartGame {
                grid_width,
                grid_height,
                starting_tick,
                autopilot,
            } => {
                let options = resolve_game_options(
                    &self.config.defaults,
                    grid_width,
                    grid_height,
                    starting_tick,
                )?;
                let session_id = self.session_for_start(connection_id)?;
                self.send_command(
                    &session_id,
                    SessionCommand::StartGame {
                        options,
                        autopilot,
                        requested_by: connection_id.to_string(),
                    },
                )
            }
            ParsedClientMessage::SetDirection { direction } => {
                let session_id = self.attached_session(connection_id)?;
                self.send_command(&session_id, SessionCommand::SetDirection(direction))
            }
            ParsedClientMessage::ChangeDelay { delay } => {
                let delay = validate_tick_interval(delay)?;
                let session_id = self.attached_session(connection_id)?;
                self.send_command(&session_id, SessionCommand::SetTickInterval(delay))
            }
            ParsedClientMessage::StopGame => {
                let session_id = self.attached_session(connection_id)?;
                self.send_command(&session_id, SessionCommand::StopGame)
            }
            ParsedClientMessage::SaveModel => {
                let session_id = self.attached_session(connection_id)?;
                self.send_command(
                    &session_id,
                    SessionCommand::SaveModel {
                        requested_by: connection_id.to_string(),
                    },
                )
            }
            ParsedClientMessage::Watch { session_id } => {
                if !self.sessions.contains_key(&session_id) {
                    return Err(GameError::invalid(format!("unknown session '{session_id}'")));
                }
                let current = self
                    .connections
                    .get(connection_id)
                    .and_then(|ctx| ctx.session_id.as_deref());
                if current == Some(session_id.as_str()) {
                    return Ok(());
                }
                self.detach(connection_id);
                self.subscribe(connection_id, &session_id)
            }
        }
    }

    fn attached_session(&self, connection_id: &str) -> Result<SessionId, GameError> {
        self.connections
            .get(connection_id)
            .and_then(|ctx| ctx.session_id.clone())
            .ok_or_else(|| GameError::invalid("no active game; send start_game first"))
    }

    /// The session a `start_game` applies to, creating and joining one if needed.
    fn session_for_start(&mut self, connection_id: &str) -> Result<SessionId, GameError> {
        if let Ok(session_id) = self.attached_session(connection_id) {
            return Ok(session_id);
        }
        let session_id = match self.config.scope {
            SessionScope::Shared => SHARED_SESSION_ID.to_string(),
            SessionScope::PerConnection => make_id("session"),
        };
        if !self.sessions.contains_key(&session_id) {
            let handle = spawn_session(
                session_id.clone(),
                self.config.defaults,
                rand::rng().random(),
                self.dropped.clone(),
            );
            self.sessions.insert(
                session_id.clone(),
                SessionEntry {
                    handle,
                    observers: HashSet::new(),
                },
            );
        }
        self.subscribe(connection_id, &session_id)?;
        Ok(session_id)
    }

    fn subscribe(&mut self, connection_id: &str, session_id: &str) -> Result<(), GameError> {
        let context = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| GameError::ConnectionLost(connection_id.to_string()))?;
        let entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| GameError::invalid(format!("unknown session '{session_id}'")))?;
        entry.handle.send(SessionCommand::Subscribe {
            connection_id: connection_id.to_string(),
            tx: context.tx.clone(),
        })?;
        entry.observers.insert(connection_id.to_string());
        context.session_id = Some(session_id.to_string());
        Ok(())
    }

    /// Removes the connection from its session's fan-out.
    fn detach(&mut self, connection_id: &str) {
        let Some(session_id) = self
            .connections
            .get_mut(connection_id)
            .and_then(|ctx| ctx.session_id.take())
        else {
            return;
        };
        let Some(entry) = self.sessions.get_mut(&session_id) else {
            return;
        };
        entry.observers.remove(connection_id);
        if let Err(err) = entry.handle.send(SessionCommand::Unsubscribe {
            connection_id: connection_id.to_string(),
        }) {
            warn!("connection {connection_id}: unsubscribe failed: {err}");
        }
        self.release_if_orphaned(&session_id);
    }

    /// A session stopped serving one of its observers: forget the attachment
    /// and tell the client, which may `watch` or `start_game` again.
    fn observer_dropped(&mut self, notice: ObserverDropped) {
        let ObserverDropped {
            session_id,
            connection_id,
            reason,
        } = notice;
        let Some(context) = self.connections.get_mut(&connection_id) else {
            return;
        };
        if context.session_id.as_deref() != Some(session_id.as_str()) {
            return;
        }
        context.session_id = None;
        let tx = context.tx.clone();
        if let Some(entry) = self.sessions.get_mut(&session_id) {
            entry.observers.remove(&connection_id);
        }
        info!("connection {connection_id} detached from session {session_id}: {reason}");
        self.release_if_orphaned(&session_id);

        let err = GameError::ConnectionLost(format!(
            "detached from session {session_id} ({reason}); send watch or start_game to resume"
        ));
        let payload = OutboundMessage::Text(ServerMessage::error(&err).encode());
        // The queue that overflowed is usually still full; wait for the writer.
        tokio::spawn(async move {
            if tx.send(payload).await.is_err() {
                debug!("connection {connection_id} closed before the detach notice");
            }
        });
    }

    /// The last observer of a per-connection session takes the session down.
    fn release_if_orphaned(&mut self, session_id: &str) {
        let orphaned = self
            .sessions
            .get(session_id)
            .is_some_and(|entry| entry.observers.is_empty());
        if !orphaned || self.config.scope != SessionScope::PerConnection {
            return;
        }
        if let Some(entry) = self.sessions.remove(session_id) {
            if entry.handle.send(SessionCommand::Shutdown).is_err() {
                entry.handle.abort();
            }
            info!("session {session_id} has no observers left; shutting down");
        }
    }

    fn send_command(&mut self, session_id: &str, command: SessionCommand) -> Result<(), GameError> {
        let entry = self
            .sessions
            .get(session_id)
            .ok_or_else(|| GameError::SessionUnavailable(format!("session {session_id} is gone")))?;
        let result = entry.handle.send(command);
        if result.is_err() && entry.handle.is_finished() {
            self.forget_session(session_id);
        }
        result
    }

    fn forget_session(&mut self, session_id: &str) {
        let Some(entry) = self.sessions.remove(session_id) else {
            return;
        };
        for observer in entry.observers {
            if let Some(context) = self.connections.get_mut(&observer) {
                context.session_id = None;
            }
        }
        warn!("session {session_id} ended unexpectedly");
    }

    fn reply(&mut self, connection_id: &str, message: &ServerMessage) {
        let Some(context) = self.connections.get(connection_id) else {
            return;
        };
        if context
            .tx
            .try_send(OutboundMessage::Text(message.encode()))
            .is_err()
        {
            warn!("connection {connection_id}: reply dropped, outbound queue unavailable");
        }
    }
}

async fn watch_dropped_observers(
    state: Weak<Mutex<HubState>>,
    mut notices: mpsc::UnboundedReceiver<ObserverDropped>,
) {
    while let Some(notice) = notices.recv().await {
        let Some(state) = state.upgrade() else {
            break;
        };
        state.lock().await.observer_dropped(notice);
    }
}
