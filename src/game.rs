//! 1局を進行させる状態機械。
//!
//! 局面履歴は追記専用のVecで持つ。ply番目の要素は「ply手指した後」の局面で、
//! この履歴がそのまま千日手判定とPGN movetextの入力を兼ねる。

use anyhow::{bail, Result};
use rand::Rng;
use shakmaty::fen::Fen;
use shakmaty::uci::UciMove;
use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Move, MoveList, Position};

use crate::engine::{Engine, EngineOptions};
use crate::pv;
use crate::sample::Sample;
use crate::uci;
use crate::worker::Worker;

pub const WHITE: usize = 0;
pub const BLACK: usize = 1;

pub fn color_idx(c: Color) -> usize {
    if c == Color::White {
        WHITE
    } else {
        BLACK
    }
}

/// 局面をFEN文字列にする。
pub fn fen_string(pos: &Chess) -> String {
    Fen(pos.clone().into_setup(EnPassantMode::Legal)).to_string()
}

/// 終局状態。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    None,
    Checkmate,
    TimeLoss,
    IllegalMove,
    Resign,
    Stalemate,
    Threefold,
    FiftyMoves,
    InsufficientMaterial,
    DrawAdjudication,
}

impl State {
    /// 手番側の負けとなる状態か。残りはすべて引き分け。
    pub fn loss_for_mover(self) -> bool {
        matches!(
            self,
            State::Checkmate | State::TimeLoss | State::IllegalMove | State::Resign
        )
    }
}

/// 対局結果。サンプルの result 欄と同じ 0/1/2 を使う。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GameResult {
    Loss,
    Draw,
    Win,
}

impl GameResult {
    pub fn flip(self) -> Self {
        match self {
            GameResult::Loss => GameResult::Win,
            GameResult::Draw => GameResult::Draw,
            GameResult::Win => GameResult::Loss,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            GameResult::Loss => 0,
            GameResult::Draw => 1,
            GameResult::Win => 2,
        }
    }
}

/// 対局全体に効く審判設定。
#[derive(Clone, Debug)]
pub struct GameOptions {
    /// 両者のスコアが draw_score 以下に収まったフルムーブ数がこの値に達したら
    /// 引き分けを宣告する。0 で無効。
    pub draw_count: u32,
    pub draw_score: i32,
    /// 宣告できる最小のフルムーブ番号
    pub draw_number: u32,
    /// 片側のスコアが -resign_score 以下だった回数がこの値に達したら投了扱い。
    /// 0 で無効。
    pub resign_count: u32,
    pub resign_score: i32,
    pub resign_number: u32,
    pub sample: crate::sample::SampleParams,
    /// bestmove 待ちで残り時間に上乗せする猶予 (ms)
    pub tolerance: u64,
}

impl Default for GameOptions {
    fn default() -> Self {
        Self {
            draw_count: 0,
            draw_score: 0,
            draw_number: 0,
            resign_count: 0,
            resign_score: 0,
            resign_number: 0,
            sample: crate::sample::SampleParams::default(),
            tolerance: 1000,
        }
    }
}

/// 履歴の1要素。key は千日手判定用に先に計算して持つ。
#[derive(Clone)]
pub struct PosEntry {
    pub pos: Chess,
    pub key: Zobrist64,
    pub last_move: Option<Move>,
}

/// 1局分の記録。
pub struct Game {
    pub round: usize,
    pub game: usize,
    /// WHITE/BLACK の表示名。どちらのエンジンが先に指したかに依存しない。
    pub names: [String; 2],
    pub pos: Vec<PosEntry>,
    pub info: Vec<uci::MoveInfo>,
    pub samples: Vec<Sample>,
    pub state: State,
    pub chess960: bool,
    castling: CastlingMode,
}

impl Game {
    pub fn new(round: usize, game: usize, fen: &str, force_chess960: bool) -> Result<Self> {
        let (pos, castling, chess960) = parse_fen(fen, force_chess960)?;
        let key = pos.zobrist_hash::<Zobrist64>(EnPassantMode::Legal);
        Ok(Self {
            round,
            game,
            names: [String::new(), String::new()],
            pos: vec![PosEntry {
                pos,
                key,
                last_move: None,
            }],
            info: Vec::new(),
            samples: Vec::new(),
            state: State::None,
            chess960,
            castling,
        })
    }

    /// 指された手数。
    pub fn ply(&self) -> usize {
        self.pos.len() - 1
    }

    pub fn current(&self) -> &PosEntry {
        &self.pos[self.pos.len() - 1]
    }

    pub fn castling_mode(&self) -> CastlingMode {
        self.castling
    }

    /// 合法手を現局面に適用して履歴を伸ばす。
    fn push_move(&mut self, m: Move) {
        let mut next = self.current().pos.clone();
        next.play_unchecked(&m);
        let key = next.zobrist_hash::<Zobrist64>(EnPassantMode::Legal);
        self.pos.push(PosEntry {
            pos: next,
            key,
            last_move: Some(m),
        });
    }

    #[cfg(test)]
    pub fn apply_lan_for_test(&mut self, lan: &str) {
        let u: UciMove = lan.parse().unwrap();
        let m = u.to_move(&self.current().pos).unwrap();
        self.push_move(m);
    }
}

/// FENを読む。標準の castling 指定で解釈できなければ Chess960 として読み直す
/// (Shredder/X-FEN)。`force_chess960` なら最初から Chess960 として扱う。
fn parse_fen(fen: &str, force_chess960: bool) -> Result<(Chess, CastlingMode, bool)> {
    let parsed: Fen = Fen::from_ascii(fen.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid FEN '{fen}': {e}"))?;
    if force_chess960 {
        let pos = parsed
            .into_position::<Chess>(CastlingMode::Chess960)
            .map_err(|e| anyhow::anyhow!("illegal position '{fen}': {e}"))?;
        return Ok((pos, CastlingMode::Chess960, true));
    }
    match parsed.clone().into_position::<Chess>(CastlingMode::Standard) {
        Ok(pos) => Ok((pos, CastlingMode::Standard, false)),
        Err(_) => {
            let pos = parsed
                .into_position::<Chess>(CastlingMode::Chess960)
                .map_err(|e| anyhow::anyhow!("illegal position '{fen}': {e}"))?;
            Ok((pos, CastlingMode::Chess960, true))
        }
    }
}

/// チェスのルールだけから終局状態を求め、合法手を返す。
pub fn apply_chess_rules(g: &Game) -> (State, MoveList) {
    let entry = g.current();
    let moves = entry.pos.legal_moves();

    if moves.is_empty() {
        let state = if entry.pos.is_check() {
            State::Checkmate
        } else {
            State::Stalemate
        };
        return (state, moves);
    }
    if entry.pos.halfmoves() >= 100 {
        return (State::FiftyMoves, moves);
    }
    if entry.pos.is_insufficient_material() {
        return (State::InsufficientMaterial, moves);
    }

    // 千日手の走査。同一手番の局面だけが一致し得るので2手刻み、
    // rule50 がリセットされた地点より前は一致し得ないのでそこで打ち切る。
    let ply = g.ply();
    let rule50 = entry.pos.halfmoves() as usize;
    let mut repetitions = 1;
    let mut i = 4;
    while i <= rule50 && i <= ply {
        if g.pos[ply - i].key == entry.key {
            repetitions += 1;
            if repetitions >= 3 {
                return (State::Threefold, moves);
            }
        }
        i += 2;
    }

    (State::None, moves)
}

/// 1局を実行する。
///
/// - `engines[reverse as usize]` が最初に指す（開始FEN次第なので白番とは限らない）
/// - `g.state` に終局状態を残す
/// - 戻り値は engines[0] から見た勝敗
pub fn game_play(
    w: &mut Worker,
    g: &mut Game,
    o: &GameOptions,
    engines: &mut [Engine; 2],
    eo: &[EngineOptions; 2],
    reverse: bool,
) -> Result<GameResult> {
    let start_turn = color_idx(g.pos[0].pos.turn());
    for color in [WHITE, BLACK] {
        g.names[color] = engines[color ^ start_turn ^ reverse as usize].name.clone();
    }

    for engine in engines.iter_mut() {
        if g.chess960 {
            if engine.supports_chess960 {
                engine.writeln(w, "setoption name UCI_Chess960 value true")?;
            } else {
                bail!("[{}] '{}' does not support Chess960", w.id, engine.name);
            }
        }
        engine.writeln(w, "ucinewgame")?;
        engine.sync(w)?;
    }

    let mut played: Option<Move> = None;
    let mut draw_ply_count = 0u32;
    let mut resign_count = [0u32; 2];
    let mut ei = reverse as usize; // engines[ei] has the move
    let mut time_left: [i64; 2] = [eo[0].time, eo[1].time];

    loop {
        if let Some(m) = played.take() {
            g.push_move(m);
        }

        let (state, legal_moves) = apply_chess_rules(g);
        g.state = state;
        if g.state != State::None {
            break;
        }

        let cmd = uci::position_command(g);
        engines[ei].writeln(w, &cmd)?;
        engines[ei].sync(w)?;

        // 次に指す側の残り時間を整える
        if eo[ei].movetime > 0 {
            // movetime は movestogo/time/increment に優先する
            time_left[ei] = eo[ei].movetime;
        } else if eo[ei].time > 0 || eo[ei].increment > 0 {
            time_left[ei] += eo[ei].increment;

            // movestogo の周期的な持ち時間リセット
            let ply = g.ply();
            if eo[ei].movestogo > 0 && ply > 1 && (ply / 2) % eo[ei].movestogo as usize == 0 {
                time_left[ei] += eo[ei].time;
            }
        } else {
            // depth/nodes 制限のみ。時間切れ判定に掛からない値にしておく
            time_left[ei] = i64::MAX / 2;
        }

        let cmd = uci::go_command(g, eo, ei, &time_left);
        engines[ei].writeln(w, &cmd)?;

        let reply = engines[ei].bestmove(w, &mut time_left[ei], o.tolerance)?;
        let info = reply.info;
        g.info.push(info);

        // PVは毎手解決しておく。不正なPVは警告止まりで対局は続く
        let resolved = pv::resolve(w, g, &reply.pv);

        let Some(best) = reply.best else {
            // 時間内に bestmove が届かなかった
            g.state = State::TimeLoss;
            break;
        };

        let m = best
            .parse::<UciMove>()
            .ok()
            .and_then(|u| u.to_move(&g.current().pos).ok());
        let m = match m {
            Some(m) if legal_moves.contains(&m) => m,
            _ => {
                g.state = State::IllegalMove;
                break;
            }
        };

        if (eo[ei].time > 0 || eo[ei].increment > 0 || eo[ei].movetime > 0) && time_left[ei] < 0 {
            g.state = State::TimeLoss;
            break;
        }

        // 引き分け裁定
        if o.draw_count > 0 && info.score.abs() <= o.draw_score {
            draw_ply_count += 1;
            if draw_ply_count >= 2 * o.draw_count && g.ply() / 2 + 1 >= o.draw_number as usize {
                g.state = State::DrawAdjudication;
                break;
            }
        } else {
            draw_ply_count = 0;
        }

        // 投了裁定。カウンタはエンジンごと
        if o.resign_count > 0 && info.score <= -o.resign_score {
            resign_count[ei] += 1;
            if resign_count[ei] >= o.resign_count && g.ply() / 2 + 1 >= o.resign_number as usize {
                g.state = State::Resign;
                break;
            }
        } else {
            resign_count[ei] = 0;
        }

        // サンプル記録。result は終局後にまとめて埋める
        if o.sample.freq > 0.0 && !(o.sample.resolve && uci::is_mate(info.score)) {
            let cur_turn = g.current().pos.turn();
            let rule50 = g.current().pos.halfmoves() as f64;
            if w.rng.random::<f64>() <= o.sample.freq * (-o.sample.decay * rule50).exp() {
                let pos = if o.sample.resolve {
                    resolved.clone()
                } else {
                    g.current().pos.clone()
                };
                // resolve 指定時、王手を避けられなかった局面は捨てる
                if !o.sample.resolve || !pos.is_check() {
                    let score = if pos.turn() == cur_turn {
                        info.score
                    } else {
                        -info.score
                    };
                    g.samples.push(Sample {
                        pos,
                        score: score.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
                        result: None,
                    });
                }
            }
        }

        played = Some(m);
        ei = 1 - ei;
    }

    debug_assert!(g.state != State::None);

    // 指されなかった手の telemetry が残り得るので ply に切り詰める
    g.info.truncate(g.ply());

    // 白から見た結果。手番側が負ける状態なら手番で決まり、それ以外は引き分け
    let wpov = if g.state.loss_for_mover() {
        if g.current().pos.turn() == Color::White {
            GameResult::Loss
        } else {
            GameResult::Win
        }
    } else {
        GameResult::Draw
    };

    for sample in &mut g.samples {
        sample.result = Some(if sample.pos.turn() == Color::White {
            wpov
        } else {
            wpov.flip()
        });
    }

    Ok(if g.state.loss_for_mover() {
        // 手番のエンジンの負け
        if ei == 0 {
            GameResult::Loss
        } else {
            GameResult::Win
        }
    } else {
        GameResult::Draw
    })
}
