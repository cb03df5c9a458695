//! Error type shared by the rules engine and the evaluation server.

use thiserror::Error;

/// Errors surfaced by the board, rules and evaluator APIs.
///
/// Variants carry owned strings so that a single backend failure can be
/// cloned out to every client waiting on the same batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Bad board size, invalid rules, invalid cache size and similar.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A move that the current rules do not allow.
    #[error("illegal move {mv} for {player}")]
    IllegalMove { mv: String, player: String },

    /// The numeric backend failed while computing a batch.
    #[error("neural net backend failure: {0}")]
    BackendFailure(String),

    /// The model reports a version this crate cannot post-process.
    #[error("unsupported model version {0}")]
    UnsupportedModelVersion(i32),

    /// The evaluator was shut down before the request was serviced.
    #[error("evaluation server was killed")]
    ServerKilled,
}

pub type Result<T> = std::result::Result<T, Error>;
