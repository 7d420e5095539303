//! PGN loading and ply enumeration.
//!
//! Grounded on `huandney-chess-puzzle-extractor-rust/src/utils.rs`'s
//! `Visitor` implementation.

use std::collections::HashMap;
use std::io::Cursor;

use pgn_reader::{BufferedReader, RawHeader, SanPlus, Skip, Visitor};
use shakmaty::fen::Fen;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Position};

use crate::error::AdapterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    White,
    Black,
}

impl Side {
    fn from_color(c: Color) -> Self {
        match c {
            Color::White => Side::White,
            Color::Black => Side::Black,
        }
    }
}

/// One half-move, 1-based within the game.
#[derive(Debug, Clone)]
pub struct Ply {
    pub index: u32,
    pub san: String,
    pub uci: String,
    pub side: Side,
    pub fen_before: String,
    pub fen_after: String,
}

#[derive(Debug, Clone, Default)]
pub struct Game {
    pub tags: HashMap<String, String>,
    plies: Vec<Ply>,
}

impl Game {
    pub fn plies(&self) -> &[Ply] {
        &self.plies
    }
}

struct GameVisitor {
    board: Chess,
    tags: HashMap<String, String>,
    plies: Vec<Ply>,
    index: u32,
    error: Option<AdapterError>,
}

impl GameVisitor {
    fn new() -> Self {
        Self {
            board: Chess::default(),
            tags: HashMap::new(),
            plies: Vec::new(),
            index: 0,
            error: None,
        }
    }

    fn position_fen(&self) -> String {
        Fen::from_position(self.board.clone(), EnPassantMode::Legal).to_string()
    }
}

impl Visitor for GameVisitor {
    type Result = Result<Game, AdapterError>;

    fn begin_game(&mut self) {
        self.board = Chess::default();
        self.tags.clear();
        self.plies.clear();
        self.index = 0;
        self.error = None;
    }

    fn header(&mut self, key: &[u8], value: RawHeader<'_>) {
        let Ok(v) = std::str::from_utf8(value.as_bytes()) else {
            return;
        };
        let v = v.trim_matches('"');
        if let Ok(k) = std::str::from_utf8(key) {
            self.tags.insert(k.to_string(), v.to_string());
        }
        if key == b"FEN" {
            if let Ok(setup) = v.parse::<Fen>() {
                if let Ok(pos) = setup.into_position(CastlingMode::Standard) {
                    self.board = pos;
                }
            }
        }
    }

    fn begin_variation(&mut self) -> Skip {
        // Only the mainline is enumerated; sidelines are not part of a game's ply list.
        Skip(true)
    }

    fn san(&mut self, sp: SanPlus) {
        if self.error.is_some() {
            return;
        }
        let side = Side::from_color(self.board.turn());
        let fen_before = self.position_fen();
        let mv = match sp.san.to_move(&self.board) {
            Ok(mv) => mv,
            Err(_) => {
                self.error = Some(AdapterError::IllegalMove {
                    ply: self.index + 1,
                    san: sp.san.to_string(),
                });
                return;
            }
        };
        let uci = UciMove::from_move(&mv, CastlingMode::Standard).to_string();
        self.board.play_unchecked(&mv);
        self.index += 1;
        let fen_after = self.position_fen();
        self.plies.push(Ply {
            index: self.index,
            san: sp.san.to_string(),
            uci,
            side,
            fen_before,
            fen_after,
        });
    }

    fn end_game(&mut self) -> Self::Result {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        Ok(Game {
            tags: std::mem::take(&mut self.tags),
            plies: std::mem::take(&mut self.plies),
        })
    }
}

/// Load a single game from a PGN string (`loadPgn` in the interface contract).
pub fn load_pgn(pgn: &str) -> Result<Game, AdapterError> {
    let mut reader = BufferedReader::new(Cursor::new(pgn.as_bytes()));
    let mut visitor = GameVisitor::new();
    match reader.read_game(&mut visitor) {
        Ok(Some(result)) => result,
        Ok(None) => Err(AdapterError::InvalidPgn("no game found in input".to_string())),
        Err(e) => Err(AdapterError::Io(e)),
    }
}

/// At least the first four space-separated FEN fields must be present
/// (placement, side to move, castling rights, en passant).
pub fn validate_fen(fen: &str) -> Result<(), AdapterError> {
    let fields: Vec<&str> = fen.split_whitespace().collect();
    if fields.len() < 4 {
        return Err(AdapterError::InvalidFen(format!(
            "expected at least 4 space-separated fields, got {}",
            fields.len()
        )));
    }
    fen.parse::<Fen>()
        .map_err(|e| AdapterError::InvalidFen(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_simple_game() {
        let pgn = "[Event \"Test\"]\n\n1. e4 e5 2. Nf3 Nc6 *\n";
        let game = load_pgn(pgn).expect("parses");
        assert_eq!(game.tags.get("Event").map(String::as_str), Some("Test"));
        let plies = game.plies();
        assert_eq!(plies.len(), 4);
        assert_eq!(plies[0].san, "e4");
        assert_eq!(plies[0].uci, "e2e4");
        assert_eq!(plies[0].side, Side::White);
        assert!(plies[0].fen_before.starts_with("rnbqkbnr/pppppppp"));
        assert_eq!(plies[3].side, Side::Black);
    }

    #[test]
    fn rejects_illegal_move() {
        let pgn = "1. e4 e5 2. Bb5 *\n"; // no piece can reach b5 legally here as written
        let err = load_pgn(pgn);
        assert!(err.is_err());
    }

    #[test]
    fn validates_fen_field_count() {
        assert!(validate_fen("8/8/8/8/8/8/8/8").is_err());
        assert!(validate_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq -").is_ok());
    }
}
