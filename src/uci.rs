//! UCIコマンドの組み立てと `info` 行の解析。

use shakmaty::Position;

use crate::engine::EngineOptions;
use crate::game::{color_idx, fen_string, Game};

/// 詰みスコアはint16の端に寄せてエンコードする。`mate n` は
/// `i16::MAX - n`、`mate -n` は `i16::MIN + n` に対応する。
const MATE_WINDOW: i32 = 1024;

pub fn is_mating(score: i32) -> bool {
    score > i16::MAX as i32 - MATE_WINDOW
}

pub fn is_mated(score: i32) -> bool {
    score < i16::MIN as i32 + MATE_WINDOW
}

pub fn is_mate(score: i32) -> bool {
    is_mating(score) || is_mated(score)
}

/// 1手分のエンジン探索情報。スコアは手番側から見たセンチポーン。
#[derive(Clone, Copy, Debug, Default)]
pub struct MoveInfo {
    pub depth: i32,
    pub score: i32,
    /// 着手に要した実測時間 (ms)
    pub time: i64,
}

/// `bestmove` 到着までに受けた最後の `info` 行の内容を保持する。
#[derive(Default)]
pub struct InfoSnapshot {
    pub depth: i32,
    pub score: i32,
    pub pv: String,
}

impl InfoSnapshot {
    /// info 行を解析し、multipv=1 の情報だけを保持する。
    pub fn update_from_line(&mut self, line: &str) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first().copied() != Some("info") {
            return;
        }
        let mut i = 1;
        while i + 1 < tokens.len() {
            if tokens[i] == "multipv" && tokens[i + 1] != "1" {
                return;
            }
            i += 1;
        }
        let mut i = 1;
        while i < tokens.len() {
            match tokens[i] {
                "depth" => {
                    if i + 1 < tokens.len() {
                        if let Ok(d) = tokens[i + 1].parse::<i32>() {
                            self.depth = d;
                        }
                        i += 1;
                    }
                }
                "score" => {
                    if i + 2 < tokens.len() {
                        match (tokens[i + 1], tokens[i + 2].parse::<i32>()) {
                            ("cp", Ok(v)) => {
                                self.score = v;
                                i += 2;
                            }
                            ("mate", Ok(m)) => {
                                self.score = if m >= 0 {
                                    i16::MAX as i32 - m
                                } else {
                                    i16::MIN as i32 - m
                                };
                                i += 2;
                            }
                            _ => {}
                        }
                    }
                }
                "pv" => {
                    if i + 1 < tokens.len() {
                        self.pv = tokens[i + 1..].join(" ");
                    }
                    break;
                }
                _ => {}
            }
            i += 1;
        }
    }

    pub fn to_info(&self, elapsed_ms: i64) -> MoveInfo {
        MoveInfo {
            depth: self.depth,
            score: self.score,
            time: elapsed_ms,
        }
    }
}

/// `position fen ... [moves ...]` を組み立てる。
///
/// rule50カウンタを最後にリセットした局面から始めることで、情報を失わずに
/// movesリストを最小に保つ（それ以前の局面は現在の探索窓で再出現し得ない）。
pub fn position_command(g: &Game) -> String {
    let ply = g.ply();
    let rule50 = g.current().pos.halfmoves() as usize;
    let ply0 = ply.saturating_sub(rule50);

    let mut cmd = format!("position fen {}", fen_string(&g.pos[ply0].pos));
    if ply0 < ply {
        cmd.push_str(" moves");
        for i in ply0 + 1..=ply {
            if let Some(m) = &g.pos[i].last_move {
                cmd.push(' ');
                cmd.push_str(&m.to_uci(g.castling_mode()).to_string());
            }
        }
    }
    cmd
}

/// `go` コマンドを組み立てる。時計は「白番のエンジンが自分の残り時間を
/// wtime として受け取る」ように engine-index と手番の XOR で対応付ける。
pub fn go_command(g: &Game, eo: &[EngineOptions; 2], ei: usize, time_left: &[i64; 2]) -> String {
    let mut cmd = String::from("go");
    let e = &eo[ei];

    if e.nodes > 0 {
        cmd.push_str(&format!(" nodes {}", e.nodes));
    }
    if e.depth > 0 {
        cmd.push_str(&format!(" depth {}", e.depth));
    }
    if e.movetime > 0 {
        cmd.push_str(&format!(" movetime {}", e.movetime));
    }
    if e.time > 0 || e.increment > 0 {
        let color = color_idx(g.current().pos.turn());
        let w = ei ^ color;
        let b = w ^ 1;
        cmd.push_str(&format!(
            " wtime {} winc {} btime {} binc {}",
            time_left[w], eo[w].increment, time_left[b], eo[b].increment
        ));
    }
    if e.movestogo > 0 {
        // 次の時計リセットまでの残りフルムーブ数
        cmd.push_str(&format!(
            " movestogo {}",
            e.movestogo - (g.ply() / 2) as i32 % e.movestogo
        ));
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_snapshot_keeps_latest_primary_line() {
        let mut snap = InfoSnapshot::default();
        snap.update_from_line("info depth 10 score cp 34 time 67 nps 890 pv e2e4 e7e5");
        assert_eq!(snap.depth, 10);
        assert_eq!(snap.score, 34);
        assert_eq!(snap.pv, "e2e4 e7e5");

        snap.update_from_line("info depth 12 score cp -8 pv d2d4");
        assert_eq!(snap.depth, 12);
        assert_eq!(snap.score, -8);
        assert_eq!(snap.pv, "d2d4");

        // multipv != 1 は無視される
        snap.update_from_line("info multipv 2 depth 20 score cp 100 pv g1f3");
        assert_eq!(snap.depth, 12);
    }

    #[test]
    fn info_snapshot_maps_mate_scores_into_int16_window() {
        let mut snap = InfoSnapshot::default();
        snap.update_from_line("info depth 5 score mate 3 pv h5f7");
        assert_eq!(snap.score, i16::MAX as i32 - 3);
        assert!(is_mating(snap.score));
        assert!(!is_mated(snap.score));

        snap.update_from_line("info depth 5 score mate -2 pv e8f8");
        assert_eq!(snap.score, i16::MIN as i32 + 2);
        assert!(is_mated(snap.score));
        assert!(is_mate(snap.score));
    }

    #[test]
    fn go_command_orders_limits_and_maps_clocks() {
        let g = Game::new(0, 0, crate::openings::STARTPOS_FEN, false).unwrap();
        let mut eo = [EngineOptions::default(), EngineOptions::default()];
        eo[0].time = 60_000;
        eo[0].increment = 1_000;
        eo[1].time = 30_000;
        eo[1].increment = 500;

        // 白番で engine 0 が指す場合、wtime は engine 0 の残り時間
        let cmd = go_command(&g, &eo, 0, &[59_000, 29_000]);
        assert_eq!(cmd, "go wtime 59000 winc 1000 btime 29000 binc 500");

        // 白番で engine 1 が指す場合は対応が入れ替わる
        let cmd = go_command(&g, &eo, 1, &[59_000, 29_000]);
        assert_eq!(cmd, "go wtime 29000 winc 500 btime 59000 binc 1000");
    }

    #[test]
    fn go_command_emits_node_and_depth_limits() {
        let g = Game::new(0, 0, crate::openings::STARTPOS_FEN, false).unwrap();
        let mut eo = [EngineOptions::default(), EngineOptions::default()];
        eo[0].nodes = 10_000;
        eo[0].depth = 12;
        let cmd = go_command(&g, &eo, 0, &[0, 0]);
        assert_eq!(cmd, "go nodes 10000 depth 12");
    }

    #[test]
    fn go_command_counts_down_movestogo() {
        let mut g = Game::new(0, 0, crate::openings::STARTPOS_FEN, false).unwrap();
        let mut eo = [EngineOptions::default(), EngineOptions::default()];
        for e in eo.iter_mut() {
            e.time = 60_000;
            e.movestogo = 40;
        }
        let cmd = go_command(&g, &eo, 0, &[60_000, 60_000]);
        assert!(cmd.ends_with(" movestogo 40"), "{cmd}");

        // 2フルムーブ消化済みなので残りは38
        for lan in ["e2e4", "e7e5", "g1f3", "b8c6"] {
            g.apply_lan_for_test(lan);
        }
        let cmd = go_command(&g, &eo, 0, &[55_000, 56_000]);
        assert!(cmd.ends_with(" movestogo 38"), "{cmd}");
    }

    #[test]
    fn position_command_prunes_to_last_rule50_reset() {
        // rule50=3 の局面なので、3手だけが moves に載る
        let fen = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
        let mut g = Game::new(0, 0, fen, false).unwrap();
        for lan in ["g1f3", "g8f6", "f3g1"] {
            g.apply_lan_for_test(lan);
        }
        let cmd = position_command(&g);
        assert_eq!(
            cmd,
            "position fen rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1 \
             moves g1f3 g8f6 f3g1"
        );

        // ポーンを突くとリセットされ、直後は moves なしで送られる
        g.apply_lan_for_test("e7e5");
        let cmd = position_command(&g);
        assert_eq!(
            cmd,
            "position fen rnbqkb1r/pppp1ppp/5n2/4p3/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 3"
        );
    }
}
