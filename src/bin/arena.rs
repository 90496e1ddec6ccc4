//! UCIエンジン同士の自動対局ハーネス。
//!
//! crossbeam-channel のワーカーモデルで複数対局を並列実行し、PGNと学習用
//! サンプル、JSONLの結果ログを書き出す。
//!
//! # 使用例
//!
//! 同一エンジンの新旧ビルドを 100 局 (各開始局面を先後入れ替えて2回) 対局:
//! ```shell
//! cargo run --release --bin arena -- \
//!   --engine target/release/new --engine target/release/old \
//!   --games 100 --repeat --concurrency 4 \
//!   --time 10000 --increment 100 \
//!   --openings book.epd --random-openings \
//!   --pgn runs/new-vs-old.pgn --draw-moves 8 --draw-score 10 --draw-number 40
//! ```
//!
//! 学習データ生成 (深さ固定、全plyサンプル):
//! ```shell
//! cargo run --release --bin arena -- \
//!   --engine ./gen --engine ./gen --games 1000 --depth 9 \
//!   --samples runs/data.bin.gz --sample-format bin --sample-freq 1.0
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use crossbeam_channel as chan;
use serde::Serialize;

use uci_arena::engine::{Engine, EngineOptions};
use uci_arena::game::{game_play, Game, GameOptions, GameResult};
use uci_arena::openings::Openings;
use uci_arena::output::SharedSink;
use uci_arena::pgn;
use uci_arena::sample::{self, SampleFormat, SampleParams};
use uci_arena::worker::Worker;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(about = "automated match harness for UCI chess engines")]
struct Cli {
    /// Engine command (exactly 2 required)
    #[arg(long = "engine", required = true, num_args = 1)]
    engines: Vec<String>,

    /// Engine display names (overrides the UCI `id name`; 2 when used)
    #[arg(long = "engine-name", num_args = 1)]
    engine_names: Vec<String>,

    /// Extra arguments passed to both engine processes
    #[arg(long = "engine-args", num_args = 1..)]
    engine_args: Option<Vec<String>>,

    /// UCI options (format "Name=Value" for both engines, or "INDEX:Name=Value")
    #[arg(long = "option", num_args = 1..)]
    options: Option<Vec<String>>,

    /// Number of rounds
    #[arg(long, default_value_t = 1)]
    rounds: usize,

    /// Games per round
    #[arg(long, default_value_t = 1)]
    games: usize,

    /// Play each opening twice with colors reversed
    #[arg(long, default_value_t = false)]
    repeat: bool,

    /// Number of concurrent workers
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Initial time per game in milliseconds
    #[arg(long, default_value_t = 0)]
    time: i64,

    /// Increment per move in milliseconds
    #[arg(long, default_value_t = 0)]
    increment: i64,

    /// Fixed time per move in milliseconds (overrides time/increment)
    #[arg(long, default_value_t = 0)]
    movetime: i64,

    /// Moves per time-control period (0 = whole game)
    #[arg(long, default_value_t = 0)]
    movestogo: i32,

    /// Depth limit per move (0 = none)
    #[arg(long, default_value_t = 0)]
    depth: i32,

    /// Node limit per move (0 = none)
    #[arg(long, default_value_t = 0)]
    nodes: u64,

    /// Grace period added to the clock when waiting for bestmove (ms)
    #[arg(long, default_value_t = 1000)]
    tolerance: u64,

    /// Openings file (one FEN or `startpos` per line; default: startpos only)
    #[arg(long)]
    openings: Option<PathBuf>,

    /// Shuffle the openings file with a seed-reproducible permutation
    #[arg(long, default_value_t = false)]
    random_openings: bool,

    /// Seed for the openings shuffle
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Parse all openings as Chess960 (otherwise detected from the FEN)
    #[arg(long, default_value_t = false)]
    chess960: bool,

    /// Declare a draw after N consecutive full moves with both sides' scores
    /// within --draw-score (0 = disabled)
    #[arg(long, default_value_t = 0)]
    draw_moves: u32,

    /// Score threshold for draw adjudication (centipawns)
    #[arg(long, default_value_t = 0)]
    draw_score: i32,

    /// Earliest full move for draw adjudication
    #[arg(long, default_value_t = 0)]
    draw_number: u32,

    /// Treat N scores at or below -resign-score from one engine as resignation
    /// (0 = disabled)
    #[arg(long, default_value_t = 0)]
    resign_moves: u32,

    /// Score threshold for resign adjudication (centipawns)
    #[arg(long, default_value_t = 0)]
    resign_score: i32,

    /// Earliest full move for resign adjudication
    #[arg(long, default_value_t = 0)]
    resign_number: u32,

    /// PGN output path (`.gz` for gzip, `-` for stdout)
    #[arg(long)]
    pgn: Option<PathBuf>,

    /// PGN verbosity: 0 tags only, 1 movetext, 2 +{score/depth}, 3 +time
    #[arg(long, default_value_t = 1)]
    pgn_verbosity: u32,

    /// Sample output path (`.gz` for gzip)
    #[arg(long)]
    samples: Option<PathBuf>,

    /// Sample format
    #[arg(long, value_parser = ["csv", "bin"], default_value = "csv")]
    sample_format: String,

    /// Per-ply sampling probability [0,1]
    #[arg(long, default_value_t = 1.0)]
    sample_freq: f64,

    /// Exponential decay of the sampling probability in the rule50 counter
    #[arg(long, default_value_t = 0.0)]
    sample_decay: f64,

    /// Resolve sampled positions to the end of the tactical PV prefix
    #[arg(long, default_value_t = false)]
    sample_resolve: bool,

    /// JSONL results log (meta record + one record per game)
    #[arg(long)]
    results: Option<PathBuf>,

    /// Directory for per-worker engine I/O logs
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// JSONL records
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct MetaRecord {
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: String,
    engines: Vec<EngineMeta>,
    settings: SettingsMeta,
}

#[derive(Serialize)]
struct EngineMeta {
    cmd: String,
    name: String,
    options: Vec<String>,
}

#[derive(Serialize)]
struct SettingsMeta {
    rounds: usize,
    games: usize,
    repeat: bool,
    concurrency: usize,
    time: i64,
    increment: i64,
    movetime: i64,
    movestogo: i32,
    depth: i32,
    nodes: u64,
    draw_moves: u32,
    draw_score: i32,
    draw_number: u32,
    resign_moves: u32,
    resign_score: i32,
    resign_number: u32,
    openings: Option<String>,
    random_openings: bool,
    chess960: bool,
    sample_freq: f64,
    sample_decay: f64,
    sample_resolve: bool,
}

#[derive(Serialize)]
struct GameRecord {
    #[serde(rename = "type")]
    kind: &'static str,
    round: usize,
    game: usize,
    white: String,
    black: String,
    result: String,
    termination: String,
    plies: usize,
}

// ---------------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------------

/// 1チケットは同じ開始局面で続けて指す1局または2局 (--repeat)。
#[derive(Clone, Debug)]
struct Ticket {
    round: usize,
    game0: usize,
    count: usize,
}

enum WorkerMsg {
    Game {
        record: GameRecord,
        /// engines[0] から見た結果
        result: GameResult,
    },
    Fatal(String),
}

struct Ctx {
    eo: [EngineOptions; 2],
    opts: GameOptions,
    openings: Openings,
    pgn_out: Option<SharedSink>,
    sample_out: Option<SharedSink>,
    sample_format: SampleFormat,
    pgn_verbosity: u32,
    chess960: bool,
    repeat: bool,
    log_dir: Option<PathBuf>,
    shutdown: Arc<AtomicBool>,
}

fn worker_main(
    ctx: Arc<Ctx>,
    id: usize,
    rx: chan::Receiver<Option<Ticket>>,
    tx: chan::Sender<WorkerMsg>,
) {
    if let Err(e) = worker_loop(&ctx, id, &rx, &tx) {
        ctx.shutdown.store(true, Ordering::Relaxed);
        let _ = tx.send(WorkerMsg::Fatal(format!("[{id}] {e:#}")));
    }
}

fn worker_loop(
    ctx: &Ctx,
    id: usize,
    rx: &chan::Receiver<Option<Ticket>>,
    tx: &chan::Sender<WorkerMsg>,
) -> Result<()> {
    let mut w = Worker::new(id, ctx.log_dir.as_deref())?;
    let mut engines = [
        Engine::spawn(&mut w, &ctx.eo[0])?,
        Engine::spawn(&mut w, &ctx.eo[1])?,
    ];

    while let Ok(Some(ticket)) = rx.recv() {
        let fen = ctx.openings.next()?;

        for k in 0..ticket.count {
            if ctx.shutdown.load(Ordering::Relaxed) {
                return Ok(());
            }
            let game_idx = ticket.game0 + k;
            let reverse = ctx.repeat && k == 1;

            let mut game = Game::new(ticket.round, game_idx, &fen, ctx.chess960)?;
            let result = game_play(&mut w, &mut game, &ctx.opts, &mut engines, &ctx.eo, reverse)?;
            let (result_tag, termination) = pgn::decode_state(&game);

            if let Some(out) = &ctx.pgn_out {
                let text = pgn::export(&game, ctx.pgn_verbosity);
                out.write_batch(text.as_bytes())
                    .context("failed to write PGN output")?;
            }
            if let Some(out) = &ctx.sample_out {
                let bytes = sample::serialize(&game.samples, ctx.sample_format)?;
                out.write_batch(&bytes)
                    .context("failed to write sample output")?;
            }
            w.flush_log();

            let record = GameRecord {
                kind: "game",
                round: ticket.round,
                game: game_idx,
                white: game.names[uci_arena::game::WHITE].clone(),
                black: game.names[uci_arena::game::BLACK].clone(),
                result: result_tag.to_string(),
                termination: termination.to_string(),
                plies: game.ply(),
            };
            if tx.send(WorkerMsg::Game { record, result }).is_err() {
                return Ok(());
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn build_engine_options(cli: &Cli) -> Result<[EngineOptions; 2]> {
    if cli.engines.len() != 2 {
        bail!(
            "exactly two --engine arguments are required, got {}",
            cli.engines.len()
        );
    }
    let mut eo = [EngineOptions::default(), EngineOptions::default()];
    for (i, e) in eo.iter_mut().enumerate() {
        e.cmd = cli.engines[i].clone();
        e.args = cli.engine_args.clone().unwrap_or_default();
        e.nodes = cli.nodes;
        e.depth = cli.depth;
        e.movetime = cli.movetime;
        e.time = cli.time;
        e.increment = cli.increment;
        e.movestogo = cli.movestogo;
    }

    if !cli.engine_names.is_empty() {
        if cli.engine_names.len() != 2 {
            bail!(
                "--engine-name must be given for both engines, got {}",
                cli.engine_names.len()
            );
        }
        for (i, e) in eo.iter_mut().enumerate() {
            e.name = Some(cli.engine_names[i].clone());
        }
    }

    if let Some(opts) = &cli.options {
        for opt in opts {
            let (targets, kv) = match opt.split_once(':') {
                Some((idx, rest)) if idx.chars().all(|c| c.is_ascii_digit()) && !idx.is_empty() => {
                    let idx: usize = idx.parse()?;
                    if idx >= 2 {
                        bail!("--option index {idx} out of range (0..2)");
                    }
                    (vec![idx], rest)
                }
                _ => (vec![0, 1], opt.as_str()),
            };
            let (name, value) = kv
                .split_once('=')
                .with_context(|| format!("invalid --option format: {opt}"))?;
            for &i in &targets {
                eo[i]
                    .options
                    .push((name.trim().to_string(), value.trim().to_string()));
            }
        }
    }
    Ok(eo)
}

fn engine_label(eo: &EngineOptions) -> String {
    eo.name.clone().unwrap_or_else(|| {
        Path::new(&eo.cmd)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| eo.cmd.clone())
    })
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();

    let eo = build_engine_options(&cli)?;
    let labels = [engine_label(&eo[0]), engine_label(&eo[1])];

    let sample_format = match cli.sample_format.as_str() {
        "bin" => SampleFormat::Bin,
        _ => SampleFormat::Csv,
    };
    let opts = GameOptions {
        draw_count: cli.draw_moves,
        draw_score: cli.draw_score,
        draw_number: cli.draw_number,
        resign_count: cli.resign_moves,
        resign_score: cli.resign_score,
        resign_number: cli.resign_number,
        sample: SampleParams {
            // サンプル出力先がないときは収集自体を止める
            freq: if cli.samples.is_some() {
                cli.sample_freq
            } else {
                0.0
            },
            decay: cli.sample_decay,
            resolve: cli.sample_resolve,
        },
        tolerance: cli.tolerance,
    };

    let openings = match &cli.openings {
        Some(path) => Openings::from_file(path, cli.random_openings, cli.seed)?,
        None => Openings::startpos(),
    };

    let open_sink = |path: &PathBuf| -> Result<SharedSink> {
        SharedSink::create(path).with_context(|| format!("failed to open {}", path.display()))
    };
    let pgn_out = cli.pgn.as_ref().map(&open_sink).transpose()?;
    let sample_out = cli.samples.as_ref().map(&open_sink).transpose()?;
    let results_out = cli.results.as_ref().map(&open_sink).transpose()?;

    if let Some(out) = &results_out {
        let meta = MetaRecord {
            kind: "meta",
            timestamp: Local::now().to_rfc3339(),
            engines: eo
                .iter()
                .zip(&labels)
                .map(|(e, label)| EngineMeta {
                    cmd: e.cmd.clone(),
                    name: label.clone(),
                    options: e
                        .options
                        .iter()
                        .map(|(k, v)| format!("{k}={v}"))
                        .collect(),
                })
                .collect(),
            settings: SettingsMeta {
                rounds: cli.rounds,
                games: cli.games,
                repeat: cli.repeat,
                concurrency: cli.concurrency,
                time: cli.time,
                increment: cli.increment,
                movetime: cli.movetime,
                movestogo: cli.movestogo,
                depth: cli.depth,
                nodes: cli.nodes,
                draw_moves: cli.draw_moves,
                draw_score: cli.draw_score,
                draw_number: cli.draw_number,
                resign_moves: cli.resign_moves,
                resign_score: cli.resign_score,
                resign_number: cli.resign_number,
                openings: cli.openings.as_ref().map(|p| p.display().to_string()),
                random_openings: cli.random_openings,
                chess960: cli.chess960,
                sample_freq: cli.sample_freq,
                sample_decay: cli.sample_decay,
                sample_resolve: cli.sample_resolve,
            },
        };
        out.write_line(&serde_json::to_vec(&meta)?)?;
    }

    // チケット生成。--repeat では隣り合う2局が同じ開始局面を共有する
    let mut tickets: Vec<Ticket> = Vec::new();
    for round in 0..cli.rounds {
        let mut g = 0;
        while g < cli.games {
            let count = if cli.repeat && g + 1 < cli.games { 2 } else { 1 };
            tickets.push(Ticket {
                round,
                game0: g,
                count,
            });
            g += count;
        }
    }
    let total_games: usize = tickets.iter().map(|t| t.count).sum();

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nshutting down gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        })
        .ok();
    }

    let concurrency = cli.concurrency.max(1);
    println!(
        "arena: {} vs {}, {} round(s) x {} game(s), concurrency={}",
        labels[0], labels[1], cli.rounds, cli.games, concurrency
    );

    let ctx = Arc::new(Ctx {
        eo,
        opts,
        openings,
        pgn_out,
        sample_out,
        sample_format,
        pgn_verbosity: cli.pgn_verbosity,
        chess960: cli.chess960,
        repeat: cli.repeat,
        log_dir: cli.log_dir.clone(),
        shutdown: shutdown.clone(),
    });

    let (ticket_tx, ticket_rx) = chan::bounded::<Option<Ticket>>(0);
    let (msg_tx, msg_rx) = chan::unbounded::<WorkerMsg>();

    let mut handles = Vec::new();
    for id in 0..concurrency {
        let ctx = ctx.clone();
        let rx = ticket_rx.clone();
        let tx = msg_tx.clone();
        handles.push(thread::spawn(move || worker_main(ctx, id, rx, tx)));
    }
    drop(msg_tx);

    let start_time = Instant::now();
    let mut wins = 0usize;
    let mut losses = 0usize;
    let mut draws = 0usize;
    let mut completed = 0usize;
    let mut fatal: Option<String> = None;

    let handle_msg = |msg: WorkerMsg,
                      completed: &mut usize,
                      wins: &mut usize,
                      losses: &mut usize,
                      draws: &mut usize,
                      fatal: &mut Option<String>,
                      results_out: &Option<SharedSink>|
     -> Result<()> {
        match msg {
            WorkerMsg::Game { record, result } => {
                *completed += 1;
                match result {
                    GameResult::Win => *wins += 1,
                    GameResult::Loss => *losses += 1,
                    GameResult::Draw => *draws += 1,
                }
                println!(
                    "[{}.{}] {} vs {}: {} ({})",
                    record.round + 1,
                    record.game + 1,
                    record.white,
                    record.black,
                    record.result,
                    record.termination
                );
                let n = *wins + *losses + *draws;
                println!(
                    "Score of {} vs {}: {} - {} - {}  [{:.3}] {}",
                    labels[0],
                    labels[1],
                    wins,
                    losses,
                    draws,
                    (*wins as f64 + *draws as f64 / 2.0) / n as f64,
                    n
                );
                if let Some(out) = results_out {
                    out.write_line(&serde_json::to_vec(&record)?)
                        .context("failed to write results log")?;
                }
            }
            WorkerMsg::Fatal(msg) => {
                eprintln!("{msg}");
                if fatal.is_none() {
                    *fatal = Some(msg);
                }
            }
        }
        Ok(())
    };

    let mut ticket_iter = tickets.into_iter();
    let mut next_ticket = ticket_iter.next();

    while completed < total_games && !shutdown.load(Ordering::Relaxed) && fatal.is_none() {
        match &next_ticket {
            None => match msg_rx.recv() {
                Ok(msg) => handle_msg(
                    msg,
                    &mut completed,
                    &mut wins,
                    &mut losses,
                    &mut draws,
                    &mut fatal,
                    &results_out,
                )?,
                Err(_) => break,
            },
            Some(t) => {
                chan::select! {
                    send(ticket_tx, Some(t.clone())) -> res => {
                        if res.is_ok() {
                            next_ticket = ticket_iter.next();
                        }
                    }
                    recv(msg_rx) -> msg => {
                        if let Ok(msg) = msg {
                            handle_msg(
                                msg,
                                &mut completed,
                                &mut wins,
                                &mut losses,
                                &mut draws,
                                &mut fatal,
                                &results_out,
                            )?;
                        }
                    }
                }
            }
        }
    }

    // ワーカーを止めて残りの結果を回収する
    shutdown.store(true, Ordering::Relaxed);
    for _ in 0..concurrency {
        let _ = ticket_tx.try_send(None);
    }
    drop(ticket_tx);
    for msg in msg_rx.try_iter() {
        handle_msg(
            msg,
            &mut completed,
            &mut wins,
            &mut losses,
            &mut draws,
            &mut fatal,
            &results_out,
        )?;
    }
    for handle in handles {
        let _ = handle.join();
    }

    if let Ok(ctx) = Arc::try_unwrap(ctx) {
        if let Some(out) = ctx.pgn_out {
            out.close().context("failed to finalize PGN output")?;
        }
        if let Some(out) = ctx.sample_out {
            out.close().context("failed to finalize sample output")?;
        }
    }
    if let Some(out) = results_out {
        out.close().context("failed to finalize results log")?;
    }

    if let Some(msg) = fatal {
        bail!("worker failed: {msg}");
    }

    println!(
        "finished: {} game(s) in {:.1}s",
        completed,
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}
