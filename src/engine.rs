use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::constants::{
    max_initial_length, DEFAULT_GRID_HEIGHT, DEFAULT_GRID_WIDTH, DEFAULT_TICK_SECS,
    INITIAL_SNAKE_LENGTH,
};
use crate::error::GameError;
use crate::food;
use crate::grid::Grid;
use crate::snake::{Collision, Snake};
use crate::types::{AgentStats, Cell, Direction, GameOverReason, GamePhase, Snapshot};

const START_DIRECTION: Direction = Direction::Right;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GameOptions {
    pub grid_width: i32,
    pub grid_height: i32,
    pub tick_interval_secs: f64,
    pub initial_length: usize,
}

impl Default for GameOptions {
    fn default() -> Self {
        Self {
            grid_width: DEFAULT_GRID_WIDTH,
            grid_height: DEFAULT_GRID_HEIGHT,
            tick_interval_secs: DEFAULT_TICK_SECS,
            initial_length: INITIAL_SNAKE_LENGTH,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// The game was not running; nothing changed.
    Skipped,
    Moved,
    Ate,
    Ended(GameOverReason),
}

/// Authoritative state of one snake game. Only [`GameEngine::step`] moves the snake.
#[derive(Clone, Debug)]
pub struct GameEngine {
    grid: Grid,
    snake: Snake,
    food: Option<Cell>,
    score: u32,
    direction: Direction,
    pending_direction: Option<Direction>,
    phase: GamePhase,
    tick_interval_secs: f64,
    frame: u64,
    end_reason: Option<GameOverReason>,
    initial_length: usize,
    rng: StdRng,
}

impl GameEngine {
    /// Builds an idle game laid out at its start position.
    pub fn new(options: GameOptions, seed: u64) -> Result<Self, GameError> {
        let grid = Grid::new(options.grid_width, options.grid_height)?;
        if !options.tick_interval_secs.is_finite() || options.tick_interval_secs <= 0.0 {
            return Err(GameError::invalid(format!(
                "tick interval must be a positive number of seconds, got {}",
                options.tick_interval_secs
            )));
        }
        let initial_length = options
            .initial_length
            .clamp(1, max_initial_length(grid.width()));
        let mut rng = StdRng::seed_from_u64(seed);
        let snake = Snake::new(grid.center(), START_DIRECTION, initial_length);
        let food = food::place(&grid, &snake, &mut rng)?;

        Ok(Self {
            grid,
            snake,
            food: Some(food),
            score: 0,
            direction: START_DIRECTION,
            pending_direction: None,
            phase: GamePhase::Idle,
            tick_interval_secs: options.tick_interval_secs,
            frame: 0,
            end_reason: None,
            initial_length,
            rng,
        })
    }

    /// Resets body, score and food, then enters `Running`.
    pub fn start(&mut self) -> Result<(), GameError> {
        let snake = Snake::new(self.grid.center(), START_DIRECTION, self.initial_length);
        let food = food::place(&self.grid, &snake, &mut self.rng)?;
        self.snake = snake;
        self.food = Some(food);
        self.score = 0;
        self.direction = START_DIRECTION;
        self.pending_direction = None;
        self.frame = 0;
        self.end_reason = None;
        self.phase = GamePhase::Running;
        Ok(())
    }

    /// Returns to `Idle`; false if the game was already idle.
    pub fn stop(&mut self) -> bool {
        if self.phase == GamePhase::Idle {
            return false;
        }
        self.phase = GamePhase::Idle;
        self.pending_direction = None;
        true
    }

    /// Buffers `direction` for the next tick. Reversals of a multi-segment snake
    /// and input outside a running game are ignored.
    pub fn queue_direction(&mut self, direction: Direction) -> bool {
        if self.phase != GamePhase::Running || self.is_reversal(direction) {
            return false;
        }
        self.pending_direction = Some(direction);
        true
    }

    pub fn set_tick_interval(&mut self, secs: f64) {
        self.tick_interval_secs = secs;
    }

    pub fn step(&mut self) -> StepOutcome {
        if self.phase != GamePhase::Running {
            return StepOutcome::Skipped;
        }

        if let Some(next) = self.pending_direction.take() {
            if !self.is_reversal(next) {
                self.direction = next;
            }
        }

        let advance = self.snake.advance(self.direction, &self.grid, self.food);
        self.frame += 1;

        if let Some(collision) = advance.collision {
            let reason = match collision {
                Collision::Wall => GameOverReason::Wall,
                Collision::SelfHit => GameOverReason::SelfCollision,
            };
            return self.finish(reason);
        }

        if self.food != Some(advance.head) {
            self.snake.move_to(advance.head);
            return StepOutcome::Moved;
        }

        self.snake.grow(advance.head);
        self.score += 1;
        match food::place(&self.grid, &self.snake, &mut self.rng) {
            Ok(cell) => {
                self.food = Some(cell);
                StepOutcome::Ate
            }
            Err(_) => {
                self.food = None;
                self.finish(GameOverReason::BoardFull)
            }
        }
    }

    pub fn build_snapshot(&self, agent_stats: Option<AgentStats>) -> Snapshot {
        Snapshot {
            grid_width: self.grid.width(),
            grid_height: self.grid.height(),
            game_tick: self.tick_interval_secs,
            snake: self.snake.segments().collect(),
            food: self.food,
            score: self.score,
            running: self.phase == GamePhase::Running,
            frame: self.frame,
            agent_stats,
        }
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == GamePhase::Running
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn pending_direction(&self) -> Option<Direction> {
        self.pending_direction
    }

    pub fn snake(&self) -> &Snake {
        &self.snake
    }

    pub fn food(&self) -> Option<Cell> {
        self.food
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn end_reason(&self) -> Option<GameOverReason> {
        self.end_reason
    }

    pub fn tick_interval_secs(&self) -> f64 {
        self.tick_interval_secs
    }

    fn is_reversal(&self, direction: Direction) -> bool {
        self.snake.len() > 1 && direction.is_opposite(self.direction)
    }

    fn finish(&mut self, reason: GameOverReason) -> StepOutcome {
        self.phase = GamePhase::Terminal;
        self.pending_direction = None;
        self.end_reason = Some(reason);
        StepOutcome::Ended(reason)
    }
}
