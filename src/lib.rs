pub mod engine;
pub mod game;
pub mod openings;
pub mod output;
pub mod pgn;
pub mod pv;
pub mod sample;
pub mod uci;
pub mod worker;

pub use engine::{Engine, EngineOptions, SearchReply};
pub use game::{game_play, Game, GameOptions, GameResult, State};
pub use openings::Openings;
pub use sample::{Sample, SampleFormat, SampleParams};
pub use uci::MoveInfo;
pub use worker::Worker;
