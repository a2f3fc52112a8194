use std::sync::atomic::{AtomicU64, Ordering};

use crate::constants::{MAX_GRID_SIDE, MAX_TICK_SECS, MIN_GRID_SIDE, MIN_TICK_SECS};
use crate::engine::GameOptions;
use crate::error::GameError;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn make_id(prefix: &str) -> String {
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{seq}")
}

pub fn validate_tick_interval(secs: f64) -> Result<f64, GameError> {
    if !secs.is_finite() || !(MIN_TICK_SECS..=MAX_TICK_SECS).contains(&secs) {
        return Err(GameError::invalid(format!(
            "tick interval must be between {MIN_TICK_SECS} and {MAX_TICK_SECS} seconds"
        )));
    }
    Ok(secs)
}

fn validate_grid_side(field: &str, value: i64) -> Result<i32, GameError> {
    if !(i64::from(MIN_GRID_SIDE)..=i64::from(MAX_GRID_SIDE)).contains(&value) {
        return Err(GameError::invalid(format!(
            "{field} must be between {MIN_GRID_SIDE} and {MAX_GRID_SIDE}"
        )));
    }
    Ok(value as i32)
}

/// Merges a `start_game` request over `defaults`; unset fields keep the default.
pub fn resolve_game_options(
    defaults: &GameOptions,
    grid_width: Option<i64>,
    grid_height: Option<i64>,
    starting_tick: Option<f64>,
) -> Result<GameOptions, GameError> {
    let mut options = *defaults;
    if let Some(width) = grid_width {
        options.grid_width = validate_grid_side("grid_width", width)?;
    }
    if let Some(height) = grid_height {
        options.grid_height = validate_grid_side("grid_height", height)?;
    }
    if let Some(tick) = starting_tick {
        options.tick_interval_secs = validate_tick_interval(tick)?;
    }
    Ok(options)
}
