//! Line parsing for the UCI text protocol: a keyword-driven token scanner
//! that leaves moves as plain UCI strings (no chess-rules dependency in
//! this crate).

use crate::types::Score;

/// A partial update extracted from one `info` line. Merge rule (applied by
/// the caller, not here): a line only updates a tracked `multipv` index when
/// it carries both `depth` and `multipv`, and either `score` or `pv`.
#[derive(Debug, Clone, Default)]
pub struct InfoUpdate {
    pub multipv: Option<u32>,
    pub depth: Option<u32>,
    pub seldepth: Option<u32>,
    pub score: Option<Score>,
    pub nodes: Option<u64>,
    pub nps: Option<u64>,
    pub pv: Option<Vec<String>>,
}

pub fn parse_info_line(line: &str) -> Option<InfoUpdate> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "info" {
        return None;
    }
    let tokens: Vec<&str> = line.split_whitespace().skip(1).collect();
    let mut update = InfoUpdate::default();
    let mut i = 0;
    while i < tokens.len() {
        match tokens[i] {
            "depth" => {
                update.depth = tokens.get(i + 1).and_then(|s| s.parse().ok());
                i += 2;
            }
            "seldepth" => {
                update.seldepth = tokens.get(i + 1).and_then(|s| s.parse().ok());
                i += 2;
            }
            "multipv" => {
                update.multipv = tokens.get(i + 1).and_then(|s| s.parse().ok());
                i += 2;
            }
            "nodes" => {
                update.nodes = tokens.get(i + 1).and_then(|s| s.parse().ok());
                i += 2;
            }
            "nps" => {
                update.nps = tokens.get(i + 1).and_then(|s| s.parse().ok());
                i += 2;
            }
            "score" => match tokens.get(i + 1).copied() {
                Some("cp") => {
                    update.score = tokens
                        .get(i + 2)
                        .and_then(|s| s.parse::<i32>().ok())
                        .map(Score::Centipawns);
                    i += 3;
                }
                Some("mate") => {
                    update.score = tokens
                        .get(i + 2)
                        .and_then(|s| s.parse::<i32>().ok())
                        .map(Score::Mate);
                    i += 3;
                }
                _ => i += 1,
            },
            "pv" => {
                update.pv = Some(tokens[i + 1..].iter().map(|s| s.to_string()).collect());
                break;
            }
            _ => i += 1,
        }
    }
    Some(update)
}

#[derive(Debug, Clone, Default)]
pub struct BestMove {
    /// `None` when the engine reported `bestmove (none)` (no legal moves).
    pub best: Option<String>,
    pub ponder: Option<String>,
}

pub fn parse_bestmove_line(line: &str) -> Option<BestMove> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "bestmove" {
        return None;
    }
    let raw_best = tokens.next()?;
    let best = if raw_best == "(none)" {
        None
    } else {
        Some(raw_best.to_string())
    };
    let mut ponder = None;
    if let Some("ponder") = tokens.next() {
        ponder = tokens.next().map(|s| s.to_string());
    }
    Some(BestMove { best, ponder })
}

pub fn is_uciok(line: &str) -> bool {
    line.trim() == "uciok"
}

pub fn is_readyok(line: &str) -> bool {
    line.trim() == "readyok"
}
