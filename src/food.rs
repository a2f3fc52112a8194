use std::collections::HashSet;

use rand::Rng;

use crate::error::GameError;
use crate::grid::Grid;
use crate::snake::Snake;
use crate::types::Cell;

/// Picks a fresh food cell uniformly among the cells the snake does not cover.
pub fn place<R: Rng + ?Sized>(grid: &Grid, snake: &Snake, rng: &mut R) -> Result<Cell, GameError> {
    let occupied: HashSet<Cell> = snake.segments().collect();
    grid.random_free_cell(&occupied, rng)
}
