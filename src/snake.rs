use std::collections::VecDeque;

use crate::grid::Grid;
use crate::types::{Cell, Direction};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Collision {
    Wall,
    SelfHit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Advance {
    pub head: Cell,
    pub collision: Option<Collision>,
}

/// Body segments ordered head first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snake {
    body: VecDeque<Cell>,
}

impl Snake {
    /// Lays `length` segments in a straight line behind `head`, opposite to `heading`.
    pub fn new(head: Cell, heading: Direction, length: usize) -> Self {
        let back = heading.opposite();
        let mut body = VecDeque::with_capacity(length.max(1));
        let mut cell = head;
        body.push_back(cell);
        for _ in 1..length {
            cell = cell.step(back);
            body.push_back(cell);
        }
        Self { body }
    }

    #[cfg(test)]
    pub fn from_cells(cells: impl IntoIterator<Item = Cell>) -> Option<Self> {
        let body: VecDeque<Cell> = cells.into_iter().collect();
        if body.is_empty() {
            return None;
        }
        Some(Self { body })
    }

    pub fn head(&self) -> Cell {
        self.body[0]
    }

    pub fn tail(&self) -> Cell {
        self.body[self.body.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = Cell> + '_ {
        self.body.iter().copied()
    }

    pub fn contains(&self, cell: Cell) -> bool {
        self.body.contains(&cell)
    }

    /// Whether `cell` is blocked next tick; the tail is free unless the snake grows.
    pub fn blocks(&self, cell: Cell, growing: bool) -> bool {
        let considered = if growing {
            self.body.len()
        } else {
            self.body.len() - 1
        };
        self.body.iter().take(considered).any(|segment| *segment == cell)
    }

    /// Candidate head for `direction`; never mutates.
    pub fn advance(&self, direction: Direction, grid: &Grid, food: Option<Cell>) -> Advance {
        let head = self.head().step(direction);
        let collision = if !grid.contains(head) {
            Some(Collision::Wall)
        } else if self.blocks(head, food == Some(head)) {
            Some(Collision::SelfHit)
        } else {
            None
        };
        Advance { head, collision }
    }

    pub fn grow(&mut self, new_head: Cell) {
        self.body.push_front(new_head);
    }

    pub fn move_to(&mut self, new_head: Cell) {
        self.body.push_front(new_head);
        self.body.pop_back();
    }
}
