use chrono::{SecondsFormat, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::constants::{exploration_rate, EPSILON_DRAW_MAX, EPSILON_START};
use crate::engine::GameEngine;
use crate::types::{AgentStats, Direction, SaveReceipt};

/// Epsilon-greedy steering agent standing in for the external trainer.
///
/// Each tick it picks straight, right or left relative to the current heading.
/// Exploration decays with finished games; exploitation takes the safe move
/// that gets closest to the food.
#[derive(Clone, Debug)]
pub struct Autopilot {
    games: u32,
    record: u32,
    rng: StdRng,
}

impl Autopilot {
    pub fn new(seed: u64) -> Self {
        Self {
            games: 0,
            record: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn stats(&self) -> AgentStats {
        AgentStats {
            games: self.games,
            record: self.record,
            epsilon: exploration_rate(self.games),
        }
    }

    pub fn choose(&mut self, engine: &GameEngine) -> Direction {
        let current = engine.direction();
        let actions = [current, current.turn_right(), current.turn_left()];

        let epsilon = EPSILON_START.saturating_sub(self.games);
        if self.rng.random_range(0..=EPSILON_DRAW_MAX) < epsilon {
            return actions[self.rng.random_range(0..actions.len())];
        }

        let snake = engine.snake();
        let food = engine.food();
        actions
            .into_iter()
            .filter(|dir| {
                snake
                    .advance(*dir, engine.grid(), food)
                    .collision
                    .is_none()
            })
            .min_by_key(|dir| {
                let head = snake.head().step(*dir);
                food.map(|cell| head.manhattan(cell)).unwrap_or(0)
            })
            .unwrap_or(current)
    }

    pub fn record_game(&mut self, score: u32) {
        self.games += 1;
        self.record = self.record.max(score);
    }

    /// Acknowledges a save request; the policy has no weights to persist.
    pub fn save(&self) -> SaveReceipt {
        SaveReceipt {
            saved_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            games: self.games,
            record: self.record,
        }
    }
}
