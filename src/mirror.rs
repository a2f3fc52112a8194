use serde_json::json;

use crate::error::GameError;
use crate::server_protocol::ServerMessage;
use crate::types::{GameOverSummary, Snapshot};

/// Client-side mirror of one session's stream.
///
/// Keeps the latest snapshot and the delay shown to the user. While the user
/// is editing the delay, `game_tick` values from the server do not overwrite
/// the edit; releasing the edit yields the `change_delay` request to send.
#[derive(Clone, Debug, Default)]
pub struct ObserverView {
    session_id: Option<String>,
    snapshot: Option<Snapshot>,
    displayed_delay: Option<f64>,
    changing_delay: bool,
    last_game_over: Option<GameOverSummary>,
    last_error: Option<String>,
}

impl ObserverView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, message: &ServerMessage) {
        match message {
            ServerMessage::Welcome { session_id } => {
                self.session_id = Some(session_id.clone());
            }
            ServerMessage::GameStarted(snapshot) => {
                self.last_game_over = None;
                self.accept_snapshot(snapshot);
            }
            ServerMessage::Update(snapshot) => self.accept_snapshot(snapshot),
            ServerMessage::GameOver(summary) => {
                if let Some(snapshot) = self.snapshot.as_mut() {
                    snapshot.running = false;
                }
                self.last_game_over = Some(summary.clone());
            }
            ServerMessage::GameStopped { .. } => {
                if let Some(snapshot) = self.snapshot.as_mut() {
                    snapshot.running = false;
                }
            }
            ServerMessage::Error { message } => {
                self.last_error = Some(message.clone());
            }
            ServerMessage::ModelSaved(_) | ServerMessage::Pong { .. } => {}
        }
    }

    pub fn apply_raw(&mut self, raw: &str) -> Result<(), GameError> {
        let message = ServerMessage::decode(raw)?;
        self.apply(&message);
        Ok(())
    }

    /// Latches the delay display to the user's value.
    pub fn begin_delay_edit(&mut self, value: f64) {
        self.changing_delay = true;
        self.displayed_delay = Some(value);
    }

    /// Releases the latch and returns the request to send, if a value was set.
    pub fn end_delay_edit(&mut self) -> Option<String> {
        self.changing_delay = false;
        let delay = self.displayed_delay?;
        Some(json!({ "type": "change_delay", "delay": delay }).to_string())
    }

    pub fn displayed_delay(&self) -> Option<f64> {
        self.displayed_delay
    }

    pub fn is_changing_delay(&self) -> bool {
        self.changing_delay
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn last_game_over(&self) -> Option<&GameOverSummary> {
        self.last_game_over.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn accept_snapshot(&mut self, snapshot: &Snapshot) {
        if !self.changing_delay {
            self.displayed_delay = Some(snapshot.game_tick);
        }
        self.snapshot = Some(snapshot.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::hub::{HubConfig, SessionHub};
    use crate::server_protocol::{parse_client_message, ParsedClientMessage};
    use crate::session::OutboundMessage;
    use crate::types::{Cell, GameOverReason};

    fn snapshot(game_tick: f64, frame: u64) -> Snapshot {
        Snapshot {
            grid_width: 8,
            grid_height: 8,
            game_tick,
            snake: vec![Cell::new(4, 4)],
            food: Some(Cell::new(1, 1)),
            score: 0,
            running: true,
            frame,
            agent_stats: None,
        }
    }

    #[test]
    fn updates_drive_displayed_delay() {
        let mut view = ObserverView::new();
        view.apply(&ServerMessage::GameStarted(snapshot(0.1, 0)));
        assert_eq!(view.displayed_delay(), Some(0.1));
        view.apply(&ServerMessage::Update(snapshot(0.2, 1)));
        assert_eq!(view.displayed_delay(), Some(0.2));
        assert_eq!(view.snapshot().map(|s| s.frame), Some(1));
    }

    #[test]
    fn edit_latch_holds_user_value() {
        let mut view = ObserverView::new();
        view.apply(&ServerMessage::Update(snapshot(0.1, 3)));
        view.begin_delay_edit(0.4);
        view.apply(&ServerMessage::Update(snapshot(0.1, 4)));
        assert_eq!(view.displayed_delay(), Some(0.4));
        assert_eq!(view.snapshot().map(|s| s.frame), Some(4));

        let request = view.end_delay_edit().expect("request");
        assert_eq!(
            parse_client_message(&request),
            Ok(ParsedClientMessage::ChangeDelay { delay: 0.4 })
        );
        assert!(!view.is_changing_delay());

        view.apply(&ServerMessage::Update(snapshot(0.4, 5)));
        assert_eq!(view.displayed_delay(), Some(0.4));
    }

    #[test]
    fn release_without_value_sends_nothing() {
        let mut view = ObserverView::new();
        assert_eq!(view.end_delay_edit(), None);
    }

    #[test]
    fn lifecycle_messages_are_tracked() {
        let mut view = ObserverView::new();
        view.apply_raw(r#"{"type":"welcome","session_id":"session_9"}"#)
            .expect("decodes");
        assert_eq!(view.session_id(), Some("session_9"));

        view.apply(&ServerMessage::Update(snapshot(0.1, 1)));
        view.apply(&ServerMessage::GameOver(GameOverSummary {
            score: 2,
            reason: GameOverReason::SelfCollision,
            games: None,
            record: None,
        }));
        assert_eq!(view.snapshot().map(|s| s.running), Some(false));
        assert_eq!(view.last_game_over().map(|g| g.score), Some(2));

        view.apply(&ServerMessage::GameStarted(snapshot(0.1, 0)));
        assert!(view.last_game_over().is_none());

        assert!(view.apply_raw("{\"type\":\"bogus\"}").is_err());
        view.apply(&ServerMessage::error(&GameError::invalid("nope")));
        assert_eq!(view.last_error(), Some("invalid request: nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn edited_delay_reaches_the_session() {
        let hub = SessionHub::new(HubConfig::default());
        let (tx, mut rx) = mpsc::channel(1024);
        let client = hub.connect(tx).await;
        let mut view = ObserverView::new();

        hub.handle_message(&client, r#"{"type":"start_game","starting_tick":0.1}"#)
            .await;
        view.begin_delay_edit(0.25);
        let request = view.end_delay_edit().expect("request");
        hub.handle_message(&client, &request).await;

        tokio::time::sleep(Duration::from_millis(500)).await;
        while let Ok(OutboundMessage::Text(raw)) = rx.try_recv() {
            view.apply_raw(&raw).expect("decodes");
        }
        assert_eq!(view.displayed_delay(), Some(0.25));
        assert_eq!(view.snapshot().map(|s| s.game_tick), Some(0.25));
    }
}
