use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GameError;
use crate::types::{Direction, GameOverSummary, SaveReceipt, Snapshot};

#[derive(Clone, Debug, PartialEq)]
pub enum ParsedClientMessage {
    StartGame {
        grid_width: Option<i64>,
        grid_height: Option<i64>,
        starting_tick: Option<f64>,
        autopilot: bool,
    },
    SetDirection {
        direction: Direction,
    },
    ChangeDelay {
        delay: f64,
    },
    StopGame,
    SaveModel,
    Watch {
        session_id: String,
    },
    Ping {
        t: f64,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome { session_id: String },
    GameStarted(Snapshot),
    Update(Snapshot),
    GameOver(GameOverSummary),
    GameStopped { score: u32 },
    ModelSaved(SaveReceipt),
    Pong { t: f64 },
    Error { message: String },
}

impl ServerMessage {
    pub fn error(err: &GameError) -> Self {
        Self::Error {
            message: err.to_string(),
        }
    }

    pub fn encode(&self) -> String {
        // Every variant is plain data with string keys; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|err| {
            format!(r#"{{"type":"error","message":"encode failed: {err}"}}"#)
        })
    }

    pub fn decode(raw: &str) -> Result<Self, GameError> {
        serde_json::from_str(raw)
            .map_err(|err| GameError::invalid(format!("undecodable server message: {err}")))
    }
}

pub fn parse_client_message(raw: &str) -> Result<ParsedClientMessage, GameError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| GameError::invalid(format!("message is not valid json: {err}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| GameError::invalid("message must be a json object"))?;
    let message_type = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| GameError::invalid("message type is missing"))?;

    match message_type {
        "start_game" => Ok(ParsedClientMessage::StartGame {
            grid_width: parse_optional_i64(object, "grid_width")?,
            grid_height: parse_optional_i64(object, "grid_height")?,
            starting_tick: parse_optional_f64(object, "starting_tick")?,
            autopilot: match object.get("autopilot") {
                None | Some(Value::Null) => false,
                Some(value) => value
                    .as_bool()
                    .ok_or_else(|| GameError::invalid("autopilot must be a boolean"))?,
            },
        }),
        "set_direction" => {
            let raw_direction = object
                .get("direction")
                .and_then(Value::as_str)
                .ok_or_else(|| GameError::invalid("direction must be a string"))?;
            let direction = Direction::parse(raw_direction).ok_or_else(|| {
                GameError::invalid(format!("unknown direction '{raw_direction}'"))
            })?;
            Ok(ParsedClientMessage::SetDirection { direction })
        }
        "change_delay" | "set_tick_interval" => {
            let delay = parse_optional_f64(object, "delay")?
                .ok_or_else(|| GameError::invalid("delay is required"))?;
            Ok(ParsedClientMessage::ChangeDelay { delay })
        }
        "stop_game" => Ok(ParsedClientMessage::StopGame),
        "save_model" => Ok(ParsedClientMessage::SaveModel),
        "watch" => {
            let session_id = object
                .get("session_id")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| GameError::invalid("session_id must be a non-empty string"))?;
            Ok(ParsedClientMessage::Watch {
                session_id: session_id.to_string(),
            })
        }
        "ping" => {
            let t = object
                .get("t")
                .and_then(Value::as_f64)
                .filter(|t| t.is_finite())
                .ok_or_else(|| GameError::invalid("ping requires a finite number t"))?;
            Ok(ParsedClientMessage::Ping { t })
        }
        other => Err(GameError::invalid(format!("unknown message type '{other}'"))),
    }
}

/// Integers may arrive as floats from browser arithmetic; those are floored.
fn parse_optional_i64(object: &Map<String, Value>, field: &str) -> Result<Option<i64>, GameError> {
    const MAX_SAFE_INTEGER_F64: f64 = 9_007_199_254_740_991.0;

    let value = match object.get(field) {
        None | Some(Value::Null) => return Ok(None),
        Some(value) => value,
    };
    if let Some(number) = value.as_i64() {
        return Ok(Some(number));
    }
    if let Some(number) = value.as_f64() {
        let floored = number.floor();
        if number.is_finite() && floored.abs() <= MAX_SAFE_INTEGER_F64 {
            return Ok(Some(floored as i64));
        }
    }
    Err(GameError::invalid(format!("{field} must be an integer")))
}

/// Numbers or numeric strings, as older clients send `"0.05"`.
fn parse_optional_f64(object: &Map<String, Value>, field: &str) -> Result<Option<f64>, GameError> {
    let parsed = match object.get(field) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    match parsed {
        Some(number) if number.is_finite() => Ok(Some(number)),
        _ => Err(GameError::invalid(format!("{field} must be a number"))),
    }
}
