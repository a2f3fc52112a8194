use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum GameError {
    /// Malformed or out-of-range request; session state is left untouched.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Every cell of the grid is occupied by the snake.
    #[error("no free cell left on a {width}x{height} grid")]
    NoFreeCell { width: i32, height: i32 },
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("session unavailable: {0}")]
    SessionUnavailable(String),
}

impl GameError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}
