//! UCIエンジンのプロセス管理。
//!
//! stdout は専用スレッドで行単位に読み、チャネル越しに受け取る。
//! これで `bestmove` 待ちをタイムアウト付きにできる。

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};

use crate::uci::{InfoSnapshot, MoveInfo};
use crate::worker::Worker;

pub const ENGINE_READY_TIMEOUT: Duration = Duration::from_secs(30);
pub const ENGINE_QUIT_TIMEOUT: Duration = Duration::from_millis(300);
const ENGINE_QUIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// エンジン1体分の設定と探索制限。
/// 制限値は 0 で「未指定」。時間の単位はすべてミリ秒。
#[derive(Clone, Debug, Default)]
pub struct EngineOptions {
    pub cmd: String,
    pub args: Vec<String>,
    /// 表示名。未指定なら `id name` 行から取る
    pub name: Option<String>,
    /// setoption で送る (name, value) の組
    pub options: Vec<(String, String)>,
    pub nodes: u64,
    pub depth: i32,
    pub movetime: i64,
    pub time: i64,
    pub increment: i64,
    pub movestogo: i32,
}

/// 1回の `go` への応答。`best == None` は時間内に bestmove が来なかったことを
/// 表し、エラーとは区別する。
pub struct SearchReply {
    pub best: Option<String>,
    pub pv: String,
    pub info: MoveInfo,
}

/// 起動済みのエンジンプロセス。
pub struct Engine {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    rx: Receiver<String>,
    pub name: String,
    pub supports_chess960: bool,
}

impl Engine {
    pub fn spawn(w: &mut Worker, eo: &EngineOptions) -> Result<Self> {
        let mut cmd = Command::new(&eo.cmd);
        if !eo.args.is_empty() {
            cmd.args(&eo.args);
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| anyhow!("[{}] failed to spawn '{}': {e}", w.id, eo.cmd))?;
        let stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("no stdout"))?;

        let (tx, rx) = mpsc::channel::<String>();
        std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(l) => {
                        if tx.send(l).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let mut engine = Self {
            child,
            stdin: BufWriter::new(stdin),
            rx,
            name: eo.name.clone().unwrap_or_else(|| label_from_cmd(&eo.cmd)),
            supports_chess960: false,
        };
        engine.handshake(w, eo)?;
        Ok(engine)
    }

    /// `uci`/`uciok` のやり取り。`id name` と宣言済みオプションを回収する。
    fn handshake(&mut self, w: &mut Worker, eo: &EngineOptions) -> Result<()> {
        self.writeln(w, "uci")?;
        loop {
            let line = self.recv(w, ENGINE_READY_TIMEOUT)?;
            if let Some(rest) = line.strip_prefix("id name ") {
                if eo.name.is_none() {
                    self.name = rest.trim().to_string();
                }
            } else if let Some(rest) = line.strip_prefix("option ") {
                if parse_option_name(rest).as_deref() == Some("UCI_Chess960") {
                    self.supports_chess960 = true;
                }
            } else if line == "uciok" {
                break;
            }
        }
        for (name, value) in &eo.options {
            self.writeln(w, &format!("setoption name {name} value {value}"))?;
        }
        self.sync(w)
    }

    /// `isready` を送り `readyok` を待つ。
    pub fn sync(&mut self, w: &mut Worker) -> Result<()> {
        self.writeln(w, "isready")?;
        loop {
            let line = self.recv(w, ENGINE_READY_TIMEOUT)?;
            if line == "readyok" {
                break;
            }
        }
        Ok(())
    }

    /// `go` 送信後に呼ぶ。`bestmove` まで読み、経過時間を `time_left` から引く。
    ///
    /// 締め切りは残り時間に猶予 `tolerance_ms` を足したもの。締め切りまでに
    /// `bestmove` が来なければ `best: None` で返る（プロセス消滅のみエラー）。
    pub fn bestmove(
        &mut self,
        w: &mut Worker,
        time_left: &mut i64,
        tolerance_ms: u64,
    ) -> Result<SearchReply> {
        let start = Instant::now();
        let deadline = Duration::from_millis((*time_left).max(0) as u64 + tolerance_ms);
        let mut snapshot = InfoSnapshot::default();
        let mut best = None;

        loop {
            let elapsed = start.elapsed();
            if elapsed >= deadline {
                break;
            }
            match self.rx.recv_timeout(deadline - elapsed) {
                Ok(line) => {
                    w.log_line(&format!("{} -> {line}", self.name));
                    if line.starts_with("info") {
                        snapshot.update_from_line(&line);
                    } else if let Some(rest) = line.strip_prefix("bestmove ") {
                        best = rest.split_whitespace().next().map(str::to_string);
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    bail!("[{}] {}: engine terminated unexpectedly", w.id, self.name);
                }
            }
        }

        let elapsed_ms = duration_to_millis(start.elapsed()) as i64;
        *time_left -= elapsed_ms;

        Ok(SearchReply {
            best,
            pv: snapshot.pv.clone(),
            info: snapshot.to_info(elapsed_ms),
        })
    }

    pub fn writeln(&mut self, w: &mut Worker, line: &str) -> Result<()> {
        w.log_line(&format!("{} <- {line}", self.name));
        self.stdin
            .write_all(line.as_bytes())
            .and_then(|_| self.stdin.write_all(b"\n"))
            .and_then(|_| self.stdin.flush())
            .map_err(|e| anyhow!("[{}] {}: write failed: {e}", w.id, self.name))
    }

    fn recv(&self, w: &mut Worker, timeout: Duration) -> Result<String> {
        let line = self
            .rx
            .recv_timeout(timeout)
            .map_err(|_| anyhow!("[{}] {}: engine read timeout", w.id, self.name))?;
        w.log_line(&format!("{} -> {line}", self.name));
        Ok(line)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.stdin.write_all(b"quit\n");
        let _ = self.stdin.flush();
        let deadline = Instant::now() + ENGINE_QUIT_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            std::thread::sleep(ENGINE_QUIT_POLL_INTERVAL);
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// `option name X type ...` 行からオプション名を取り出す。
pub fn parse_option_name(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace().peekable();
    while let Some(tok) = tokens.next() {
        if tok == "name" {
            let mut parts = Vec::new();
            while let Some(next) = tokens.peek() {
                if *next == "type" {
                    break;
                }
                parts.push(tokens.next().unwrap().to_string());
            }
            if !parts.is_empty() {
                return Some(parts.join(" "));
            }
        }
    }
    None
}

fn label_from_cmd(cmd: &str) -> String {
    Path::new(cmd)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| cmd.to_string())
}

pub fn duration_to_millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_option_name_handles_multiword_names() {
        assert_eq!(
            parse_option_name("name UCI_Chess960 type check default false").as_deref(),
            Some("UCI_Chess960")
        );
        assert_eq!(
            parse_option_name("name Clear Hash type button").as_deref(),
            Some("Clear Hash")
        );
        assert_eq!(parse_option_name("type spin default 1"), None);
    }

    #[test]
    fn label_from_cmd_uses_file_stem() {
        assert_eq!(label_from_cmd("/usr/bin/stockfish"), "stockfish");
        assert_eq!(label_from_cmd("./target/release/mock-uci"), "mock-uci");
    }
}
