//! Encode/decode helpers bridging `game-analyzer`/`chess-adapter` domain
//! enums and the string columns used by the schema's CHECK constraints.

use chess_adapter::Side;
use game_analyzer::MoveClassification;

pub fn encode_side(side: Side) -> &'static str {
    match side {
        Side::White => "white",
        Side::Black => "black",
    }
}

pub fn decode_side(s: &str) -> Side {
    match s {
        "black" => Side::Black,
        _ => Side::White,
    }
}

pub fn encode_classification(c: MoveClassification) -> &'static str {
    match c {
        MoveClassification::Excellent => "excellent",
        MoveClassification::Good => "good",
        MoveClassification::Inaccuracy => "inaccuracy",
        MoveClassification::Mistake => "mistake",
        MoveClassification::Blunder => "blunder",
    }
}

pub fn decode_classification(s: &str) -> MoveClassification {
    match s {
        "good" => MoveClassification::Good,
        "inaccuracy" => MoveClassification::Inaccuracy,
        "mistake" => MoveClassification::Mistake,
        "blunder" => MoveClassification::Blunder,
        _ => MoveClassification::Excellent,
    }
}

pub fn now_timestamp() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}
