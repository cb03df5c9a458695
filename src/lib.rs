//! go-nneval: Go rules engine and batched neural net evaluation server.
//!
//! The crate has two halves that search threads use together: a board and
//! history state machine implementing several ko and scoring rule sets, and
//! an evaluator that batches positions from many threads for a neural net
//! backend and caches the results.
//!
//! ## Modules
//!
//! - [`constants`] - Board dimensions and engine limits
//! - [`hash`] - 128-bit Zobrist hashing
//! - [`board`] - Stones, captures, simple ko and area calculation
//! - [`rules`] - Ko rule, scoring rule, suicide and komi
//! - [`history`] - Superko, passes, encore phases and scoring
//! - [`nninputs`] - Feature rows and position fingerprints
//! - [`nnoutput`] - Output records and post-processing
//! - [`nncache`] - Direct-mapped result cache
//! - [`neuralnet`] - Backend interface
//! - [`nneval`] - Batching evaluation server
//! - [`config`] - TOML configuration
//!
//! ## Example
//!
//! ```
//! use go_nneval::board::{Board, Player};
//! use go_nneval::history::BoardHistory;
//! use go_nneval::rules::Rules;
//!
//! let mut board = Board::new(9, 9).unwrap();
//! let mut hist = BoardHistory::new(&board, Player::Black, Rules::default(), 0);
//!
//! let loc = board.parse_loc("E5").unwrap();
//! hist.make_board_move(&mut board, loc, Player::Black).unwrap();
//! assert!(!hist.is_legal(&board, loc, Player::White));
//! ```

pub mod board;
pub mod config;
pub mod constants;
pub mod error;
pub mod hash;
pub mod history;
pub mod neuralnet;
pub mod nncache;
pub mod nneval;
pub mod nninputs;
pub mod nnoutput;
pub mod rules;
