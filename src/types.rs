use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    /// Accepts direction names in any case plus arrow-key and WASD key names.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "ArrowUp" | "w" | "W" => return Some(Self::Up),
            "ArrowDown" | "s" | "S" => return Some(Self::Down),
            "ArrowLeft" | "a" | "A" => return Some(Self::Left),
            "ArrowRight" | "d" | "D" => return Some(Self::Right),
            _ => {}
        }
        match value.trim().to_ascii_lowercase().as_str() {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }

    pub fn delta(self) -> (i32, i32) {
        match self {
            Self::Up => (0, -1),
            Self::Down => (0, 1),
            Self::Left => (-1, 0),
            Self::Right => (1, 0),
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    pub fn is_opposite(self, other: Direction) -> bool {
        self.opposite() == other
    }

    /// Clockwise neighbour in screen coordinates (y grows downwards).
    pub fn turn_right(self) -> Self {
        match self {
            Self::Up => Self::Right,
            Self::Right => Self::Down,
            Self::Down => Self::Left,
            Self::Left => Self::Up,
        }
    }

    pub fn turn_left(self) -> Self {
        self.turn_right().opposite()
    }
}

/// Grid coordinate; travels on the wire as `[x, y]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(i32, i32)", into = "(i32, i32)")]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn step(self, direction: Direction) -> Self {
        let (dx, dy) = direction.delta();
        Self::new(self.x + dx, self.y + dy)
    }

    pub fn manhattan(self, other: Cell) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }
}

impl From<(i32, i32)> for Cell {
    fn from((x, y): (i32, i32)) -> Self {
        Self::new(x, y)
    }
}

impl From<Cell> for (i32, i32) {
    fn from(cell: Cell) -> Self {
        (cell.x, cell.y)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    Idle,
    Running,
    Terminal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameOverReason {
    Wall,
    #[serde(rename = "self")]
    SelfCollision,
    BoardFull,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub games: u32,
    pub record: u32,
    pub epsilon: f64,
}

/// Full, self-describing game state sent on every tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub grid_width: i32,
    pub grid_height: i32,
    pub game_tick: f64,
    pub snake: Vec<Cell>,
    pub food: Option<Cell>,
    pub score: u32,
    pub running: bool,
    pub frame: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_stats: Option<AgentStats>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameOverSummary {
    pub score: u32,
    pub reason: GameOverReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub games: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SaveReceipt {
    pub saved_at: String,
    pub games: u32,
    pub record: u32,
}
