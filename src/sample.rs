//! 学習用サンプルの収集と書き出し。
//!
//! 対局中に局面とスコアを貯め、終局後に勝敗を埋めてから書き出す。
//! バイナリ形式はリトルエンディアンで固定し、ホスト依存にしない。

use std::io::Write;

use anyhow::{bail, Result};
use shakmaty::{Chess, Color, EnPassantMode, Position, Role};

use crate::game::{fen_string, GameResult};

/// サンプル抽出の設定。
#[derive(Clone, Copy, Debug, Default)]
pub struct SampleParams {
    /// 1手あたりの基本採用確率 [0,1]。0 で収集しない
    pub freq: f64,
    /// rule50 カウンタによる減衰。大きいほど膠着局面を採りにくくなる
    pub decay: f64,
    /// 採用局面をPV解決後の静かな局面に置き換える
    pub resolve: bool,
}

/// 1件のサンプル。score は局面の手番側から見た値。
/// result は終局までわからないので Option で持つ。
#[derive(Clone)]
pub struct Sample {
    pub pos: Chess,
    pub score: i16,
    pub result: Option<GameResult>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    Csv,
    Bin,
}

/// 局面を32バイトに詰める。
///
/// レイアウト (すべてリトルエンディアン):
/// - 0..8   occupancy bitboard
/// - 8..24  占有マスごとに4bit、昇順。下位3bitが駒種 (1=P..6=K、7=キャスリング
///          権の残るルーク)、bit3 が黒
/// - 24     手番 (0=白)
/// - 25     アンパッサン可能マス (0..63、なければ64)
/// - 26     rule50 カウンタ
/// - 27..29 フルムーブ番号 (u16)
/// - 29..32 予約 (0)
pub fn pack_position(pos: &Chess) -> [u8; 32] {
    let setup = pos.clone().into_setup(EnPassantMode::Legal);
    let mut buf = [0u8; 32];
    let occupied = setup.board.occupied();
    buf[..8].copy_from_slice(&u64::from(occupied).to_le_bytes());

    // castling_rights はキャスリング権の残るルークのマス集合
    for (i, sq) in occupied.into_iter().enumerate() {
        let Some(piece) = setup.board.piece_at(sq) else {
            continue;
        };
        let mut code: u8 = if setup.castling_rights.contains(sq) {
            7
        } else {
            match piece.role {
                Role::Pawn => 1,
                Role::Knight => 2,
                Role::Bishop => 3,
                Role::Rook => 4,
                Role::Queen => 5,
                Role::King => 6,
            }
        };
        if piece.color == Color::Black {
            code |= 8;
        }
        buf[8 + i / 2] |= code << (4 * (i % 2));
    }

    buf[24] = if setup.turn == Color::White { 0 } else { 1 };
    buf[25] = setup.ep_square.map_or(64, |sq| u32::from(sq) as u8);
    buf[26] = setup.halfmoves.min(255) as u8;
    let fullmove = setup.fullmoves.get().min(u16::MAX as u32) as u16;
    buf[27..29].copy_from_slice(&fullmove.to_le_bytes());
    buf
}

/// 1局分のサンプルをバイト列にする。呼び出し側は共有ストリームのロックを
/// 取ってからまとめて書くこと。
pub fn serialize(samples: &[Sample], format: SampleFormat) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for sample in samples {
        let Some(result) = sample.result else {
            bail!("sample has no result; game not finished?");
        };
        match format {
            SampleFormat::Csv => {
                writeln!(
                    out,
                    "{},{},{}",
                    fen_string(&sample.pos),
                    sample.score,
                    result.code()
                )?;
            }
            SampleFormat::Bin => {
                out.extend_from_slice(&pack_position(&sample.pos));
                out.extend_from_slice(&sample.score.to_le_bytes());
                out.push(result.code());
            }
        }
    }
    Ok(out)
}
