//! テスト用の台本エンジン。
//!
//! `--moves` で渡された手を `go` のたびに順番に返すだけで、局面は見ない。
//! 遅延やスコアを固定できるので、時間切れや裁定の経路を再現できる。

use std::io::BufRead;
use std::time::Duration;

fn main() {
    let mut moves: Vec<String> = Vec::new();
    let mut delay_ms = 0u64;
    let mut score = 12i64;
    let mut depth = 7i64;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--moves" => {
                let list = args.next().unwrap_or_default();
                moves = list.split_whitespace().map(str::to_string).collect();
            }
            "--delay-ms" => {
                delay_ms = args.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            }
            "--score" => {
                score = args.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            }
            "--depth" => {
                depth = args.next().and_then(|v| v.parse().ok()).unwrap_or(1);
            }
            _ => {}
        }
    }

    let stdin = std::io::stdin();
    let mut next = 0usize;
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();

        if line == "uci" {
            println!("id name mock-uci");
            println!("option name UCI_Chess960 type check default false");
            println!("uciok");
        } else if line == "isready" {
            println!("readyok");
        } else if line.starts_with("go") {
            if delay_ms > 0 {
                std::thread::sleep(Duration::from_millis(delay_ms));
            }
            let mv = moves.get(next).map(String::as_str).unwrap_or("0000");
            next += 1;
            println!("info depth {depth} score cp {score} pv {mv}");
            println!("bestmove {mv}");
        } else if line == "quit" {
            break;
        }
        // ucinewgame / position / setoption は読み捨てる
    }
}
