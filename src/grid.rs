use std::collections::HashSet;

use rand::Rng;

use crate::error::GameError;
use crate::types::Cell;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Grid {
    width: i32,
    height: i32,
}

impl Grid {
    pub fn new(width: i32, height: i32) -> Result<Self, GameError> {
        if width <= 0 || height <= 0 {
            return Err(GameError::invalid(format!(
                "grid dimensions must be positive, got {width}x{height}"
            )));
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn contains(&self, cell: Cell) -> bool {
        cell.x >= 0 && cell.y >= 0 && cell.x < self.width && cell.y < self.height
    }

    pub fn center(&self) -> Cell {
        Cell::new(self.width / 2, self.height / 2)
    }

    pub fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        (0..self.height).flat_map(move |y| (0..self.width).map(move |x| Cell::new(x, y)))
    }

    /// Uniform pick among cells not in `occupied`; a full board is an error.
    pub fn random_free_cell<R: Rng + ?Sized>(
        &self,
        occupied: &HashSet<Cell>,
        rng: &mut R,
    ) -> Result<Cell, GameError> {
        let free: Vec<Cell> = self
            .cells()
            .filter(|cell| !occupied.contains(cell))
            .collect();
        if free.is_empty() {
            return Err(GameError::NoFreeCell {
                width: self.width,
                height: self.height,
            });
        }
        Ok(free[rng.random_range(0..free.len())])
    }
}
