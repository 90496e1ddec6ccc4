//! 開始局面のカーソル。
//!
//! 全ワーカーが1つのカーソルを共有し、mutex の下で1行ずつ取り出す。
//! 一巡するまで同じ開始局面は二度出ない。

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use anyhow::{bail, Context, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

pub const STARTPOS_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

struct Inner {
    /// None のときは `startpos` 1件だけの組み込みリスト
    file: Option<BufReader<File>>,
    /// 各行の先頭バイトオフセット。random 指定ならシャッフル済み
    index: Vec<u64>,
    /// 次に返す index の位置。末尾まで来たら先頭に戻る
    pos: usize,
}

/// 開始FENの共有カーソル。
pub struct Openings {
    inner: Mutex<Inner>,
}

impl Openings {
    /// ファイルを1度走査して行オフセットの索引を作る。`random` なら `seed` から
    /// 再現可能な順列に並べ替える。空ファイルは構築時のエラー。
    pub fn from_file(path: &Path, random: bool, seed: u64) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut reader = BufReader::new(file);

        let mut index = Vec::new();
        let mut offset = 0u64;
        let mut line = Vec::new();
        loop {
            line.clear();
            let n = reader
                .read_until(b'\n', &mut line)
                .with_context(|| format!("failed to scan {}", path.display()))?;
            if n == 0 {
                break;
            }
            index.push(offset);
            offset += n as u64;
        }
        if index.is_empty() {
            bail!("no openings found in {}", path.display());
        }

        if random {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            index.shuffle(&mut rng);
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                file: Some(reader),
                index,
                pos: 0,
            }),
        })
    }

    /// ファイルなしの既定カーソル。常に開始局面を返す。
    pub fn startpos() -> Self {
        Self {
            inner: Mutex::new(Inner {
                file: None,
                index: Vec::new(),
                pos: 0,
            }),
        }
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.index.len().max(1)
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// 次の開始FENを返す。リストを一巡したら先頭に戻る。
    pub fn next(&self) -> Result<String> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let Inner { file, index, pos } = &mut *guard;

        let Some(reader) = file.as_mut() else {
            return Ok(STARTPOS_FEN.to_string());
        };

        let offset = index[*pos];
        reader
            .seek(SeekFrom::Start(offset))
            .context("failed to seek openings file")?;
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .context("failed to read openings file")?;

        *pos += 1;
        if *pos == index.len() {
            *pos = 0;
        }

        let fen = line.trim_end_matches(['\n', '\r']);
        if fen == "startpos" {
            Ok(STARTPOS_FEN.to_string())
        } else {
            Ok(fen.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_openings(name: &str, lines: &[&str]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("uci-arena-{}-{}", std::process::id(), name));
        let mut f = File::create(&path).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        path
    }

    #[test]
    fn sequential_cursor_cycles_without_skips() {
        let path = write_openings("seq.epd", &["fen-a", "fen-b", "fen-c"]);
        let openings = Openings::from_file(&path, false, 0).unwrap();
        assert_eq!(openings.len(), 3);

        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(openings.next().unwrap());
        }
        assert_eq!(seen, ["fen-a", "fen-b", "fen-c", "fen-a", "fen-b", "fen-c"]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn startpos_token_is_substituted() {
        let path = write_openings("startpos.epd", &["startpos"]);
        let openings = Openings::from_file(&path, false, 0).unwrap();
        assert_eq!(openings.next().unwrap(), STARTPOS_FEN);
        std::fs::remove_file(&path).ok();

        assert_eq!(Openings::startpos().next().unwrap(), STARTPOS_FEN);
    }

    #[test]
    fn shuffle_is_reproducible_per_seed() {
        let lines: Vec<String> = (0..16).map(|i| format!("fen-{i}")).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let path = write_openings("shuffle.epd", &refs);

        let collect = |random: bool, seed: u64| -> Vec<String> {
            let o = Openings::from_file(&path, random, seed).unwrap();
            (0..16).map(|_| o.next().unwrap()).collect()
        };

        let a = collect(true, 7);
        let b = collect(true, 7);
        let c = collect(true, 8);
        assert_eq!(a, b);
        assert_ne!(a, c);

        // 一巡の中では各エントリがちょうど1回ずつ現れる
        let mut sorted = a.clone();
        sorted.sort();
        let mut expect: Vec<String> = lines.clone();
        expect.sort();
        assert_eq!(sorted, expect);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_or_empty_file_is_fatal() {
        let missing = std::path::Path::new("/nonexistent/openings.epd");
        assert!(Openings::from_file(missing, false, 0).is_err());

        let path = write_openings("empty.epd", &[]);
        assert!(Openings::from_file(&path, false, 0).is_err());
        std::fs::remove_file(&path).ok();
    }
}
