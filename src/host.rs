use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::agent::Autopilot;
use crate::engine::{GameEngine, GameOptions, StepOutcome};
use crate::error::GameError;
use crate::server_protocol::ServerMessage;
use crate::types::{AgentStats, Direction, GameOverSummary, Snapshot};

/// Owns the authoritative game of one session and its optional autopilot.
/// Every operation returns the messages observers should receive.
#[derive(Debug)]
pub struct GameHost {
    game: Option<GameEngine>,
    autopilot: Option<Autopilot>,
    seeds: StdRng,
}

impl GameHost {
    pub fn new(seed: u64) -> Self {
        Self {
            game: None,
            autopilot: None,
            seeds: StdRng::seed_from_u64(seed),
        }
    }

    /// Replaces any current game with a fresh one. An existing autopilot keeps
    /// its training stats when the new game also asks for one.
    pub fn start(
        &mut self,
        options: GameOptions,
        autopilot: bool,
    ) -> Result<ServerMessage, GameError> {
        let mut game = GameEngine::new(options, self.seeds.random())?;
        game.start()?;
        if !autopilot {
            self.autopilot = None;
        } else if self.autopilot.is_none() {
            self.autopilot = Some(Autopilot::new(self.seeds.random()));
        }
        let snapshot = game.build_snapshot(self.agent_stats());
        self.game = Some(game);
        Ok(ServerMessage::GameStarted(snapshot))
    }

    pub fn press(&mut self, direction: Direction) -> bool {
        self.game
            .as_mut()
            .map(|game| game.queue_direction(direction))
            .unwrap_or(false)
    }

    pub fn set_tick_interval(&mut self, secs: f64) {
        if let Some(game) = self.game.as_mut() {
            game.set_tick_interval(secs);
        }
    }

    pub fn stop(&mut self) -> Option<ServerMessage> {
        let game = self.game.as_mut()?;
        if !game.is_running() {
            return None;
        }
        game.stop();
        Some(ServerMessage::GameStopped {
            score: game.score(),
        })
    }

    /// Ends a running game that has not collided, counting it for the
    /// autopilot and restarting under autopilot like a normal game over.
    pub fn abandon(&mut self) -> Vec<ServerMessage> {
        let Some(game) = self.game.as_mut() else {
            return Vec::new();
        };
        if !game.is_running() {
            return Vec::new();
        }
        game.stop();
        let score = game.score();
        let mut messages = vec![ServerMessage::GameStopped { score }];

        if let Some(agent) = self.autopilot.as_mut() {
            agent.record_game(score);
            match game.start() {
                Ok(()) => messages.push(ServerMessage::GameStarted(
                    game.build_snapshot(Some(agent.stats())),
                )),
                Err(err) => warn!("autopilot restart failed: {err}"),
            }
        }
        messages
    }

    pub fn save_model(&self) -> Result<ServerMessage, GameError> {
        let agent = self
            .autopilot
            .as_ref()
            .ok_or_else(|| GameError::invalid("no training agent attached to this session"))?;
        Ok(ServerMessage::ModelSaved(agent.save()))
    }

    /// Runs one tick: autopilot input, the engine step, then the resulting
    /// `update`, plus `game_over` (and a restart under autopilot) on terminal ticks.
    pub fn tick(&mut self) -> Vec<ServerMessage> {
        let Some(game) = self.game.as_mut() else {
            return Vec::new();
        };
        if !game.is_running() {
            return Vec::new();
        }

        if game.pending_direction().is_none() {
            if let Some(agent) = self.autopilot.as_mut() {
                let direction = agent.choose(game);
                game.queue_direction(direction);
            }
        }

        let outcome = game.step();
        let stats = self.autopilot.as_ref().map(Autopilot::stats);
        let mut messages = vec![ServerMessage::Update(game.build_snapshot(stats))];

        let StepOutcome::Ended(reason) = outcome else {
            return messages;
        };

        let score = game.score();
        let summary = match self.autopilot.as_mut() {
            Some(agent) => {
                agent.record_game(score);
                let stats = agent.stats();
                GameOverSummary {
                    score,
                    reason,
                    games: Some(stats.games),
                    record: Some(stats.record),
                }
            }
            None => GameOverSummary {
                score,
                reason,
                games: None,
                record: None,
            },
        };
        debug!("game over: score={score} reason={reason:?}");
        messages.push(ServerMessage::GameOver(summary));

        if let Some(agent) = self.autopilot.as_ref() {
            match game.start() {
                Ok(()) => messages.push(ServerMessage::GameStarted(
                    game.build_snapshot(Some(agent.stats())),
                )),
                Err(err) => warn!("autopilot restart failed: {err}"),
            }
        }
        messages
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        self.game
            .as_ref()
            .map(|game| game.build_snapshot(self.agent_stats()))
    }

    pub fn is_running(&self) -> bool {
        self.game.as_ref().is_some_and(GameEngine::is_running)
    }

    pub fn game(&self) -> Option<&GameEngine> {
        self.game.as_ref()
    }

    fn agent_stats(&self) -> Option<AgentStats> {
        self.autopilot.as_ref().map(Autopilot::stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GameOverReason;

    fn small() -> GameOptions {
        GameOptions {
            grid_width: 6,
            grid_height: 6,
            ..GameOptions::default()
        }
    }

    fn run_until_game_over(host: &mut GameHost, max_ticks: usize) -> Vec<ServerMessage> {
        for _ in 0..max_ticks {
            let messages = host.tick();
            if messages
                .iter()
                .any(|m| matches!(m, ServerMessage::GameOver(_)))
            {
                return messages;
            }
        }
        panic!("no game over within {max_ticks} ticks");
    }

    #[test]
    fn tick_without_game_is_silent() {
        let mut host = GameHost::new(1);
        assert!(host.tick().is_empty());
        assert!(host.snapshot().is_none());
    }

    #[test]
    fn start_emits_fresh_snapshot() {
        let mut host = GameHost::new(1);
        let message = host.start(small(), false).expect("start");
        let ServerMessage::GameStarted(snapshot) = message else {
            panic!("expected game_started");
        };
        assert_eq!(snapshot.score, 0);
        assert_eq!(snapshot.grid_width, 6);
        assert!(snapshot.running);
        assert!(snapshot.agent_stats.is_none());
    }

    #[test]
    fn manual_game_ends_on_wall_and_stays_over() {
        let mut host = GameHost::new(2);
        host.start(small(), false).expect("start");
        // Head starts at (3,3) heading right: three ticks reach the wall.
        let messages = run_until_game_over(&mut host, 10);
        let Some(ServerMessage::GameOver(summary)) = messages.last() else {
            panic!("expected game_over last");
        };
        assert_eq!(summary.reason, GameOverReason::Wall);
        assert_eq!(summary.games, None);
        assert!(!host.is_running());
        assert!(host.tick().is_empty());
        assert!(!host.press(Direction::Up));
    }

    #[test]
    fn autopilot_restarts_and_counts_games() {
        let mut host = GameHost::new(3);
        host.start(small(), true).expect("start");
        let messages = run_until_game_over(&mut host, 100_000);
        let summary = messages
            .iter()
            .find_map(|m| match m {
                ServerMessage::GameOver(summary) => Some(summary.clone()),
                _ => None,
            })
            .expect("game_over present");
        assert_eq!(summary.games, Some(1));
        assert!(matches!(messages.last(), Some(ServerMessage::GameStarted(_))));
        assert!(host.is_running());
        let stats = host.snapshot().and_then(|s| s.agent_stats).expect("stats");
        assert_eq!(stats.games, 1);
    }

    #[test]
    fn save_model_requires_autopilot() {
        let mut host = GameHost::new(4);
        host.start(small(), false).expect("start");
        assert!(matches!(
            host.save_model(),
            Err(GameError::InvalidRequest(_))
        ));

        host.start(small(), true).expect("start");
        assert!(matches!(
            host.save_model(),
            Ok(ServerMessage::ModelSaved(_))
        ));
    }

    #[test]
    fn stop_moves_running_game_to_idle() {
        let mut host = GameHost::new(5);
        host.start(small(), false).expect("start");
        assert_eq!(
            host.stop(),
            Some(ServerMessage::GameStopped { score: 0 })
        );
        assert!(!host.is_running());
        assert_eq!(host.stop(), None);
        assert!(host.tick().is_empty());
    }

    #[test]
    fn abandoned_game_is_recorded_and_restarted() {
        let mut host = GameHost::new(7);
        host.start(small(), true).expect("start");
        host.tick();

        let messages = host.abandon();
        assert!(matches!(
            messages.first(),
            Some(ServerMessage::GameStopped { .. })
        ));
        let Some(ServerMessage::GameStarted(snapshot)) = messages.last() else {
            panic!("expected a restart");
        };
        assert_eq!(snapshot.frame, 0);
        assert_eq!(snapshot.agent_stats.map(|stats| stats.games), Some(1));
        assert!(host.is_running());
    }

    #[test]
    fn abandon_without_autopilot_just_stops() {
        let mut host = GameHost::new(8);
        assert!(host.abandon().is_empty());
        host.start(small(), false).expect("start");
        assert_eq!(
            host.abandon(),
            vec![ServerMessage::GameStopped { score: 0 }]
        );
        assert!(!host.is_running());
        assert!(host.abandon().is_empty());
    }

    #[test]
    fn human_input_beats_autopilot_for_that_tick() {
        let mut host = GameHost::new(6);
        host.start(small(), true).expect("start");
        assert!(host.press(Direction::Down));
        host.tick();
        let game = host.game().expect("game");
        if game.is_running() {
            assert_eq!(game.direction(), Direction::Down);
        }
    }
}
