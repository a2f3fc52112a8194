use std::collections::HashMap;
use std::time::Duration;

use log::{debug, info, trace, warn};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cadence::TickSchedule;
use crate::constants::{COMMAND_QUEUE_CAPACITY, DEFAULT_TICK_SECS};
use crate::engine::GameOptions;
use crate::error::GameError;
use crate::host::GameHost;
use crate::server_protocol::ServerMessage;
use crate::types::Direction;

pub type ConnectionId = String;
pub type SessionId = String;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundMessage {
    Text(String),
    Close { code: u16, reason: String },
}

/// Sent to the hub when a session stops serving an observer on its own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObserverDropped {
    pub session_id: SessionId,
    pub connection_id: ConnectionId,
    pub reason: String,
}

#[derive(Debug)]
pub enum SessionCommand {
    Subscribe {
        connection_id: ConnectionId,
        tx: mpsc::Sender<OutboundMessage>,
    },
    Unsubscribe {
        connection_id: ConnectionId,
    },
    StartGame {
        options: GameOptions,
        autopilot: bool,
        requested_by: ConnectionId,
    },
    SetDirection(Direction),
    SetTickInterval(f64),
    StopGame,
    SaveModel {
        requested_by: ConnectionId,
    },
    Shutdown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueuePolicy {
    /// Per-tick frames: a full queue just skips this frame for that observer.
    DropOnFull,
    /// Lifecycle events: a full queue means the observer cannot keep up.
    DetachOnFull,
}

/// Handle held by the hub; the session itself lives in its own task.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    commands: mpsc::Sender<SessionCommand>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Never waits: a full or closed queue is reported to the caller.
    pub fn send(&self, command: SessionCommand) -> Result<(), GameError> {
        self.commands.try_send(command).map_err(|err| match err {
            TrySendError::Full(_) => {
                GameError::SessionUnavailable(format!("session {} is busy", self.id))
            }
            TrySendError::Closed(_) => {
                GameError::SessionUnavailable(format!("session {} has ended", self.id))
            }
        })
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

pub fn spawn_session(
    id: SessionId,
    defaults: GameOptions,
    seed: u64,
    dropped: mpsc::UnboundedSender<ObserverDropped>,
) -> SessionHandle {
    let (commands, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let session = Session::new(id.clone(), defaults, seed, dropped);
    let task = tokio::spawn(session.run(rx));
    SessionHandle { id, commands, task }
}

struct Session {
    id: SessionId,
    host: GameHost,
    observers: HashMap<ConnectionId, mpsc::Sender<OutboundMessage>>,
    schedule: TickSchedule,
    dropped: mpsc::UnboundedSender<ObserverDropped>,
}

impl Session {
    fn new(
        id: SessionId,
        defaults: GameOptions,
        seed: u64,
        dropped: mpsc::UnboundedSender<ObserverDropped>,
    ) -> Self {
        Self {
            id,
            host: GameHost::new(seed),
            observers: HashMap::new(),
            dropped,
            schedule: TickSchedule::new(
                interval_from_secs(defaults.tick_interval_secs)
                    .unwrap_or(Duration::from_secs_f64(DEFAULT_TICK_SECS)),
            ),
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        info!("session {} created", self.id);
        loop {
            let deadline = self.schedule.deadline();
            tokio::select! {
                biased;
                command = commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    if !self.apply(command) {
                        break;
                    }
                }
                _ = wait_until(deadline) => {
                    self.tick(Instant::now());
                }
            }
        }
        info!("session {} torn down", self.id);
    }

    /// Returns false once the session should end.
    fn apply(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Subscribe { connection_id, tx } => {
                debug!("session {}: observer {connection_id} joined", self.id);
                self.observers.insert(connection_id.clone(), tx);
                let welcome = ServerMessage::Welcome {
                    session_id: self.id.clone(),
                };
                self.send_to(&connection_id, &welcome);
                if let Some(snapshot) = self.host.snapshot() {
                    self.send_to(&connection_id, &ServerMessage::Update(snapshot));
                }
            }
            SessionCommand::Unsubscribe { connection_id } => {
                if self.observers.remove(&connection_id).is_some() {
                    debug!("session {}: observer {connection_id} left", self.id);
                }
            }
            SessionCommand::StartGame {
                options,
                autopilot,
                requested_by,
            } => match self.host.start(options, autopilot) {
                Ok(message) => {
                    let interval = interval_from_secs(options.tick_interval_secs)
                        .unwrap_or_else(|| self.schedule.interval());
                    info!(
                        "session {}: game started {}x{} tick={}s autopilot={autopilot}",
                        self.id, options.grid_width, options.grid_height, options.tick_interval_secs
                    );
                    self.schedule.arm(Instant::now(), interval);
                    self.broadcast(&message, QueuePolicy::DetachOnFull);
                }
                Err(err) => {
                    warn!("session {}: start rejected: {err}", self.id);
                    self.send_to(&requested_by, &ServerMessage::error(&err));
                }
            },
            SessionCommand::SetDirection(direction) => {
                if !self.host.press(direction) {
                    trace!("session {}: ignored direction {direction:?}", self.id);
                }
            }
            SessionCommand::SetTickInterval(secs) => {
                let Some(interval) = interval_from_secs(secs) else {
                    warn!("session {}: ignored tick interval {secs}", self.id);
                    return true;
                };
                if let Some(committed) = self.schedule.request(interval) {
                    self.host.set_tick_interval(committed.as_secs_f64());
                }
            }
            SessionCommand::StopGame => {
                self.schedule.cancel();
                if let Some(message) = self.host.stop() {
                    info!("session {}: game stopped", self.id);
                    self.broadcast(&message, QueuePolicy::DetachOnFull);
                }
            }
            SessionCommand::SaveModel { requested_by } => {
                let reply = match self.host.save_model() {
                    Ok(message) => message,
                    Err(err) => ServerMessage::error(&err),
                };
                self.send_to(&requested_by, &reply);
            }
            SessionCommand::Shutdown => return false,
        }
        true
    }

    fn tick(&mut self, now: Instant) {
        if let Some(interval) = self.schedule.on_tick(now) {
            debug!("session {}: tick interval now {:?}", self.id, interval);
            self.host.set_tick_interval(interval.as_secs_f64());
        }

        for message in self.host.tick() {
            match &message {
                ServerMessage::Update(_) => self.broadcast(&message, QueuePolicy::DropOnFull),
                ServerMessage::GameOver(summary) => {
                    info!(
                        "session {}: game over score={} reason={:?}",
                        self.id, summary.score, summary.reason
                    );
                    self.broadcast(&message, QueuePolicy::DetachOnFull);
                }
                _ => self.broadcast(&message, QueuePolicy::DetachOnFull),
            }
        }

        if !self.host.is_running() {
            self.schedule.cancel();
        }
    }

    fn send_to(&mut self, connection_id: &str, message: &ServerMessage) {
        let Some(tx) = self.observers.get(connection_id) else {
            return;
        };
        if let Err(err) = deliver(tx, message.encode(), QueuePolicy::DetachOnFull) {
            self.detach(connection_id, &err);
        }
    }

    fn broadcast(&mut self, message: &ServerMessage, policy: QueuePolicy) {
        let payload = message.encode();
        let mut failed = Vec::new();
        for (connection_id, tx) in &self.observers {
            if let Err(err) = deliver(tx, payload.clone(), policy) {
                failed.push((connection_id.clone(), err));
            }
        }
        for (connection_id, err) in failed {
            self.detach(&connection_id, &err);
        }
    }

    fn detach(&mut self, connection_id: &str, err: &GameError) {
        if self.observers.remove(connection_id).is_none() {
            return;
        }
        warn!("session {}: dropped observer {connection_id}: {err}", self.id);
        let notice = ObserverDropped {
            session_id: self.id.clone(),
            connection_id: connection_id.to_string(),
            reason: err.to_string(),
        };
        if self.dropped.send(notice).is_err() {
            debug!("session {}: hub no longer listening for dropped observers", self.id);
        }
    }
}

fn deliver(
    tx: &mpsc::Sender<OutboundMessage>,
    payload: String,
    policy: QueuePolicy,
) -> Result<(), GameError> {
    match tx.try_send(OutboundMessage::Text(payload)) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) if policy == QueuePolicy::DropOnFull => {
            trace!("observer queue full; frame skipped");
            Ok(())
        }
        Err(TrySendError::Full(_)) => Err(GameError::ConnectionLost(
            "outbound queue is full".to_string(),
        )),
        Err(TrySendError::Closed(_)) => Err(GameError::ConnectionLost(
            "outbound queue is closed".to_string(),
        )),
    }
}

fn interval_from_secs(secs: f64) -> Option<Duration> {
    if secs <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Cell, GameOverReason, Snapshot};

    fn options(tick: f64) -> GameOptions {
        GameOptions {
            grid_width: 12,
            grid_height: 12,
            tick_interval_secs: tick,
            ..GameOptions::default()
        }
    }

    fn spawn(id: &str, tick: f64, seed: u64) -> SessionHandle {
        let (dropped, _) = mpsc::unbounded_channel();
        spawn_session(id.to_string(), options(tick), seed, dropped)
    }

    fn observer(
        handle: &SessionHandle,
        connection_id: &str,
    ) -> mpsc::Receiver<OutboundMessage> {
        let (tx, rx) = mpsc::channel(1024);
        handle
            .send(SessionCommand::Subscribe {
                connection_id: connection_id.to_string(),
                tx,
            })
            .expect("subscribe");
        rx
    }

    async fn next_message(rx: &mut mpsc::Receiver<OutboundMessage>) -> ServerMessage {
        match rx.recv().await.expect("channel open") {
            OutboundMessage::Text(raw) => ServerMessage::decode(&raw).expect("decodable"),
            other => panic!("unexpected outbound {other:?}"),
        }
    }

    async fn next_snapshot(rx: &mut mpsc::Receiver<OutboundMessage>) -> Snapshot {
        loop {
            match next_message(rx).await {
                ServerMessage::Update(snapshot) | ServerMessage::GameStarted(snapshot) => {
                    return snapshot
                }
                _ => continue,
            }
        }
    }

    fn start(handle: &SessionHandle, tick: f64) {
        handle
            .send(SessionCommand::StartGame {
                options: options(tick),
                autopilot: false,
                requested_by: "c1".to_string(),
            })
            .expect("start");
    }

    #[tokio::test(start_paused = true)]
    async fn subscriber_gets_welcome_then_started_snapshot() {
        let handle = spawn("session_t1", 0.1, 1);
        let mut rx = observer(&handle, "c1");
        assert_eq!(
            next_message(&mut rx).await,
            ServerMessage::Welcome {
                session_id: "session_t1".to_string()
            }
        );
        start(&handle, 0.1);
        let ServerMessage::GameStarted(snapshot) = next_message(&mut rx).await else {
            panic!("expected game_started");
        };
        assert_eq!(snapshot.snake, vec![Cell::new(6, 6)]);
        assert_eq!(snapshot.frame, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_stream_updates_to_every_observer() {
        let handle = spawn("session_t2", 0.1, 2);
        let mut a = observer(&handle, "a");
        let mut b = observer(&handle, "b");
        start(&handle, 0.1);

        for expected_frame in 0..3 {
            let sa = next_snapshot(&mut a).await;
            let sb = next_snapshot(&mut b).await;
            assert_eq!(sa.frame, expected_frame);
            assert_eq!(sa, sb);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn late_observer_gets_current_state_immediately() {
        let handle = spawn("session_t3", 0.1, 3);
        let mut first = observer(&handle, "first");
        start(&handle, 0.1);
        next_snapshot(&mut first).await;
        next_snapshot(&mut first).await;

        let mut late = observer(&handle, "late");
        assert!(matches!(
            next_message(&mut late).await,
            ServerMessage::Welcome { .. }
        ));
        let snapshot = next_snapshot(&mut late).await;
        assert!(snapshot.frame >= 1);
        assert_eq!(snapshot.grid_width, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_tick_changes_apply_latest_at_next_boundary() {
        let handle = spawn("session_t4", 0.5, 4);
        let mut rx = observer(&handle, "c1");
        start(&handle, 0.5);
        next_snapshot(&mut rx).await;

        for secs in [0.4, 0.3, 0.2, 0.1, 0.05] {
            handle
                .send(SessionCommand::SetTickInterval(secs))
                .expect("queue tick change");
        }

        let first = next_snapshot(&mut rx).await;
        assert_eq!(first.game_tick, 0.05);
        let before = Instant::now();
        let second = next_snapshot(&mut rx).await;
        assert_eq!(second.frame, first.frame + 1);
        let elapsed = Instant::now() - before;
        assert!(elapsed >= Duration::from_millis(49) && elapsed <= Duration::from_millis(51));
    }

    #[tokio::test(start_paused = true)]
    async fn wall_hit_ends_game_and_stops_ticking() {
        let handle = spawn("session_t5", 0.1, 5);
        let mut rx = observer(&handle, "c1");
        start(&handle, 0.1);

        let summary = loop {
            if let ServerMessage::GameOver(summary) = next_message(&mut rx).await {
                break summary;
            }
        };
        // Heading right from (6,6) on a 12-wide grid; food may add points on the way.
        assert_eq!(summary.reason, GameOverReason::Wall);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn save_model_without_autopilot_replies_with_error() {
        let handle = spawn("session_t6", 0.1, 6);
        let mut rx = observer(&handle, "c1");
        next_message(&mut rx).await;
        handle
            .send(SessionCommand::SaveModel {
                requested_by: "c1".to_string(),
            })
            .expect("queue save");
        let ServerMessage::Error { message } = next_message(&mut rx).await else {
            panic!("expected error");
        };
        assert!(message.contains("no training agent"));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_observer_is_dropped_and_others_continue() {
        let handle = spawn("session_t7", 0.1, 7);
        let gone = observer(&handle, "gone");
        let mut stays = observer(&handle, "stays");
        drop(gone);
        start(&handle, 0.1);
        assert_eq!(next_snapshot(&mut stays).await.frame, 0);
        assert_eq!(next_snapshot(&mut stays).await.frame, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overflowing_observer_is_reported_to_the_hub() {
        let (dropped, mut notices) = mpsc::unbounded_channel();
        let handle = spawn_session("session_t9".to_string(), options(0.1), 9, dropped);
        let (tx, mut rx) = mpsc::channel(1);
        handle
            .send(SessionCommand::Subscribe {
                connection_id: "slow".to_string(),
                tx,
            })
            .expect("subscribe");
        start(&handle, 0.1);

        let notice = notices.recv().await.expect("drop notice");
        assert_eq!(notice.session_id, "session_t9");
        assert_eq!(notice.connection_id, "slow");
        assert!(notice.reason.contains("outbound queue is full"));

        // Only the welcome fitted; nothing follows once detached.
        assert!(matches!(
            next_message(&mut rx).await,
            ServerMessage::Welcome { .. }
        ));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_ends_the_task() {
        let handle = spawn("session_t8", 0.1, 8);
        handle.send(SessionCommand::Shutdown).expect("queue shutdown");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.is_finished());
        assert!(matches!(
            handle.send(SessionCommand::StopGame),
            Err(GameError::SessionUnavailable(_))
        ));
    }
}
