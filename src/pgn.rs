//! PGN書き出し。

use shakmaty::san::SanPlus;
use shakmaty::{Color, Position};

use crate::game::{fen_string, Game, State};
use crate::uci::{is_mated, is_mating};

/// `state` からPGNの Result / Termination タグの値を求める。
pub fn decode_state(g: &Game) -> (&'static str, &'static str) {
    let mover_is_white = g.current().pos.turn() == Color::White;
    let decisive = if mover_is_white { "0-1" } else { "1-0" };

    match g.state {
        State::None => ("*", "unterminated"),
        State::Checkmate => (decisive, "checkmate"),
        State::Stalemate => ("1/2-1/2", "stalemate"),
        State::Threefold => ("1/2-1/2", "3-fold repetition"),
        State::FiftyMoves => ("1/2-1/2", "50 moves rule"),
        State::InsufficientMaterial => ("1/2-1/2", "insufficient material"),
        State::IllegalMove => (decisive, "rules infraction"),
        State::DrawAdjudication => ("1/2-1/2", "adjudication"),
        State::Resign => (decisive, "adjudication"),
        State::TimeLoss => (decisive, "time forfeit"),
    }
}

/// 1局分のPGNレコードを作る。
///
/// verbosity: 0 はタグのみ、1 で movetext、2 で `{score/depth}`、
/// 3 で `{score/depth time}` のコメントが付く。
pub fn export(g: &Game, verbosity: u32) -> String {
    let mut out = String::new();

    out.push_str(&format!("[Round \"{}.{}\"]\n", g.round + 1, g.game + 1));
    out.push_str(&format!("[White \"{}\"]\n", g.names[crate::game::WHITE]));
    out.push_str(&format!("[Black \"{}\"]\n", g.names[crate::game::BLACK]));

    let (result, reason) = decode_state(g);
    out.push_str(&format!("[Result \"{result}\"]\n"));
    out.push_str(&format!("[Termination \"{reason}\"]\n"));
    out.push_str(&format!("[FEN \"{}\"]\n", fen_string(&g.pos[0].pos)));
    if g.chess960 {
        out.push_str("[Variant \"Chess960\"]\n");
    }
    out.push_str(&format!("[PlyCount \"{}\"]\n", g.ply()));

    if verbosity > 0 {
        out.push('\n');

        let plies_per_line = match verbosity {
            2 => 6,
            3 => 5,
            _ => 16,
        };

        for ply in 1..=g.ply() {
            let prev = &g.pos[ply - 1];
            let Some(m) = g.pos[ply].last_move.as_ref() else {
                continue;
            };

            // 手数は白番の前に付ける。黒番から始まる棋譜は最初だけ "N... "
            let white_to_move = prev.pos.turn() == Color::White;
            if white_to_move || ply == 1 {
                out.push_str(&format!(
                    "{}{} ",
                    prev.pos.fullmoves(),
                    if white_to_move { "." } else { "..." }
                ));
            }

            // SanPlus が王手 `+` と詰み `#` の印まで付ける
            out.push_str(&SanPlus::from_move(prev.pos.clone(), m).to_string());

            if verbosity == 2 || verbosity == 3 {
                let info = &g.info[ply - 1];
                let score = if is_mating(info.score) {
                    format!("M{}", i16::MAX as i32 - info.score)
                } else if is_mated(info.score) {
                    format!("-M{}", info.score - i16::MIN as i32)
                } else {
                    info.score.to_string()
                };
                if verbosity == 2 {
                    out.push_str(&format!(" {{{score}/{}}}", info.depth));
                } else {
                    out.push_str(&format!(" {{{score}/{} {}ms}}", info.depth, info.time));
                }
            }

            out.push(if ply % plies_per_line == 0 { '\n' } else { ' ' });
        }
    }

    out.push_str(result);
    out.push_str("\n\n");
    out
}
