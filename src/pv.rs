//! 読み筋 (PV) の解決。
//!
//! PVの先頭から駒得絡みの手（取る手と成る手）だけを進め、静かな手の直前で
//! 止める。得られた中で王手が掛かっていない最も深い局面をサンプル用に返す。

use shakmaty::uci::UciMove;
use shakmaty::{Chess, Position};

use crate::game::{color_idx, Game};
use crate::worker::Worker;

fn is_tactical(m: &shakmaty::Move) -> bool {
    m.is_capture() || m.is_promotion()
}

/// PV文字列を解決した局面を返す。
///
/// 王手を完全に避けられる保証はないが、必ず有効な局面を返す。不正なPVは
/// 警告を出して打ち切るだけで、対局には影響しない。
pub fn resolve(w: &mut Worker, g: &Game, pv: &str) -> Chess {
    let mut resolved = g.current().pos.clone();

    // 局面バッファ2枚をピンポンで使い回す
    let mut bufs = [resolved.clone(), resolved.clone()];
    let mut idx = 0;

    let mut tokens = pv.split_whitespace();
    while let Some(token) = tokens.next() {
        let m = token
            .parse::<UciMove>()
            .ok()
            .and_then(|u| u.to_move(&bufs[idx]).ok());
        let Some(m) = m else {
            let rest: Vec<&str> = tokens.collect();
            let mover = &g.names[color_idx(g.current().pos.turn())];
            println!(
                "[{}] WARNING: illegal move in PV '{token} {}' from {mover}",
                w.id,
                rest.join(" ")
            );
            w.log_line(&format!(
                "WARNING: illegal move in PV '{token} {}'",
                rest.join(" ")
            ));
            break;
        };

        // 静かな手が出たら打ち切り
        if !is_tactical(&m) {
            break;
        }

        bufs[1 - idx] = bufs[idx].clone();
        bufs[1 - idx].play_unchecked(&m);
        idx = 1 - idx;

        if !bufs[idx].is_check() {
            resolved = bufs[idx].clone();
        }
    }

    resolved
}
