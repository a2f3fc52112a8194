pub const DEFAULT_GRID_WIDTH: i32 = 29;
pub const DEFAULT_GRID_HEIGHT: i32 = 19;
pub const DEFAULT_TICK_SECS: f64 = 0.03;
pub const INITIAL_SNAKE_LENGTH: usize = 1;

pub const MIN_GRID_SIDE: i32 = 2;
pub const MAX_GRID_SIDE: i32 = 256;
pub const MIN_TICK_SECS: f64 = 0.005;
pub const MAX_TICK_SECS: f64 = 5.0;

pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;
pub const COMMAND_QUEUE_CAPACITY: usize = 64;

pub const SHARED_SESSION_ID: &str = "main";

pub const EPSILON_START: u32 = 80;
pub const EPSILON_DRAW_MAX: u32 = 200;

/// Largest initial body that still fits behind the centred head.
pub fn max_initial_length(grid_width: i32) -> usize {
    (grid_width / 2 + 1).max(1) as usize
}

/// Probability that the autopilot explores after `games` finished games.
pub fn exploration_rate(games: u32) -> f64 {
    let epsilon = EPSILON_START.saturating_sub(games);
    f64::from(epsilon) / f64::from(EPSILON_DRAW_MAX + 1)
}
