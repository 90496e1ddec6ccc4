//! 台本エンジン (mock-uci) を相手に1局まるごと回す結合テスト。

use uci_arena::engine::{Engine, EngineOptions};
use uci_arena::game::{game_play, Game, GameOptions, GameResult, State, BLACK, WHITE};
use uci_arena::openings::STARTPOS_FEN;
use uci_arena::pgn;
use uci_arena::sample::{serialize, SampleFormat, SampleParams};
use uci_arena::worker::Worker;

fn mock_options(name: &str, extra_args: &[&str]) -> EngineOptions {
    EngineOptions {
        cmd: env!("CARGO_BIN_EXE_mock-uci").to_string(),
        args: extra_args.iter().map(|s| s.to_string()).collect(),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

fn play(
    w: &mut Worker,
    eo: &[EngineOptions; 2],
    opts: &GameOptions,
    reverse: bool,
) -> (Game, GameResult) {
    let mut engines = [
        Engine::spawn(w, &eo[0]).unwrap(),
        Engine::spawn(w, &eo[1]).unwrap(),
    ];
    let mut game = Game::new(0, 0, STARTPOS_FEN, false).unwrap();
    let result = game_play(w, &mut game, opts, &mut engines, eo, reverse).unwrap();
    (game, result)
}

#[test]
fn fools_mate_with_reverse_is_a_win_for_the_black_engine() {
    let mut w = Worker::new(0, None).unwrap();
    let eo = [
        mock_options("defender", &["--moves", "e7e5 d8h4"]),
        mock_options("attacker", &["--moves", "f2f3 g2g4"]),
    ];
    // reverse=true なので engines[1] が最初に指す (白番)
    let (game, result) = play(&mut w, &eo, &GameOptions::default(), true);

    assert_eq!(game.state, State::Checkmate);
    assert_eq!(result, GameResult::Win);
    assert_eq!(game.ply(), 4);
    assert_eq!(game.info.len(), 4);
    assert_eq!(game.names[WHITE], "attacker");
    assert_eq!(game.names[BLACK], "defender");

    let text = pgn::export(&game, 1);
    assert!(text.contains("[Result \"0-1\"]"));
    assert!(text.contains("[Termination \"checkmate\"]"));
    assert!(text.contains("Qh4#"));
}

#[test]
fn illegal_bestmove_forfeits_the_game() {
    let mut w = Worker::new(0, None).unwrap();
    let eo = [
        mock_options("honest", &["--moves", "e7e5"]),
        mock_options("cheater", &["--moves", "a1a8"]),
    ];
    let (game, result) = play(&mut w, &eo, &GameOptions::default(), true);

    assert_eq!(game.state, State::IllegalMove);
    assert_eq!(result, GameResult::Win);
    assert_eq!(game.ply(), 0);
    assert_eq!(game.info.len(), 0);
    assert_eq!(pgn::decode_state(&game), ("0-1", "rules infraction"));
}

#[test]
fn slow_engine_loses_on_time() {
    let mut w = Worker::new(0, None).unwrap();
    let mut eo = [
        mock_options("sleeper", &["--moves", "e2e4", "--delay-ms", "400"]),
        mock_options("opponent", &["--moves", "e7e5"]),
    ];
    eo[0].time = 100;
    eo[1].time = 100;
    let opts = GameOptions {
        tolerance: 50,
        ..GameOptions::default()
    };
    let (game, result) = play(&mut w, &eo, &opts, false);

    assert_eq!(game.state, State::TimeLoss);
    assert_eq!(result, GameResult::Loss);
    assert_eq!(pgn::decode_state(&game).1, "time forfeit");
}

#[test]
fn low_scores_from_both_sides_trigger_draw_adjudication() {
    let mut w = Worker::new(0, None).unwrap();
    let eo = [
        mock_options("a", &["--moves", "g1f3 f3g1", "--score", "0"]),
        mock_options("b", &["--moves", "g8f6 f6g8", "--score", "0"]),
    ];
    let opts = GameOptions {
        draw_count: 1,
        draw_score: 10,
        draw_number: 1,
        ..GameOptions::default()
    };
    let (game, result) = play(&mut w, &eo, &opts, false);

    assert_eq!(game.state, State::DrawAdjudication);
    assert_eq!(result, GameResult::Draw);
    assert_eq!(game.ply(), 1);
    assert_eq!(pgn::decode_state(&game), ("1/2-1/2", "adjudication"));
}

#[test]
fn repeated_hopeless_scores_trigger_resignation() {
    let mut w = Worker::new(0, None).unwrap();
    let eo = [
        mock_options("winner", &["--moves", "e2e4 d2d4", "--score", "50"]),
        mock_options("loser", &["--moves", "a7a6 b7b6", "--score", "-700"]),
    ];
    let opts = GameOptions {
        resign_count: 2,
        resign_score: 600,
        resign_number: 1,
        ..GameOptions::default()
    };
    let (game, result) = play(&mut w, &eo, &opts, false);

    assert_eq!(game.state, State::Resign);
    // 黒番 (engines[1]) の投了なので白勝ち
    assert_eq!(result, GameResult::Win);
    assert_eq!(pgn::decode_state(&game), ("1-0", "adjudication"));
}

#[test]
fn raising_resign_count_only_delays_termination() {
    let play_with = |count: u32| {
        let mut w = Worker::new(0, None).unwrap();
        let eo = [
            mock_options("winner", &["--moves", "e2e4 d2d4 g1f3", "--score", "50"]),
            mock_options("loser", &["--moves", "a7a6 b7b6 c7c6", "--score", "-700"]),
        ];
        let opts = GameOptions {
            resign_count: count,
            resign_score: 600,
            resign_number: 1,
            ..GameOptions::default()
        };
        let (game, _) = play(&mut w, &eo, &opts, false);
        assert_eq!(game.state, State::Resign);
        game.ply()
    };
    assert!(play_with(1) < play_with(2));
}

#[test]
fn full_frequency_sampling_records_every_ply() {
    let mut w = Worker::new(0, None).unwrap();
    let eo = [
        mock_options("white", &["--moves", "f2f3 g2g4"]),
        mock_options("black", &["--moves", "e7e5 d8h4"]),
    ];
    let opts = GameOptions {
        sample: SampleParams {
            freq: 1.0,
            decay: 0.0,
            resolve: false,
        },
        ..GameOptions::default()
    };
    let (game, result) = play(&mut w, &eo, &opts, false);

    assert_eq!(game.state, State::Checkmate);
    assert_eq!(result, GameResult::Loss);
    assert_eq!(game.samples.len(), 4);

    for (i, sample) in game.samples.iter().enumerate() {
        assert_eq!(sample.pos, game.pos[i].pos);
        // 白勝ちではないので、白番局面は Loss、黒番局面は Win
        let expect = if i % 2 == 0 {
            GameResult::Loss
        } else {
            GameResult::Win
        };
        assert_eq!(sample.result, Some(expect));
        assert_eq!(sample.score, 12); // mock の既定スコア、手番側POV
    }

    let csv = String::from_utf8(serialize(&game.samples, SampleFormat::Csv).unwrap()).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], format!("{STARTPOS_FEN},12,0"));
}

#[test]
fn resolved_sampling_advances_through_captures() {
    let mut w = Worker::new(0, None).unwrap();
    let eo = [
        mock_options("white", &["--moves", "e2e4 e4d5"]),
        mock_options("black", &["--moves", "d7d5 d8d5"]),
    ];
    let opts = GameOptions {
        sample: SampleParams {
            freq: 1.0,
            decay: 0.0,
            resolve: true,
        },
        ..GameOptions::default()
    };
    let (game, _) = play(&mut w, &eo, &opts, false);

    // 台本の手が尽きた時点で反則負けになる
    assert_eq!(game.state, State::IllegalMove);
    assert_eq!(game.ply(), 4);
    assert_eq!(game.samples.len(), 4);

    // 静かな手のPVはその場の局面のまま、手番側POVのスコアを保つ
    assert_eq!(game.samples[0].pos, game.pos[0].pos);
    assert_eq!(game.samples[0].score, 12);

    // exd5 / Qxd5 のPVは取る手なので1手進んだ局面がサンプルになり、
    // 手番が変わるのでスコアの符号が反転する
    assert_eq!(game.samples[2].pos, game.pos[3].pos);
    assert_eq!(game.samples[2].score, -12);
    assert_eq!(game.samples[3].pos, game.pos[4].pos);
    assert_eq!(game.samples[3].score, -12);
}
