//! Constants for board geometry, special locations and evaluator limits.
//!
//! The board uses a 1D array representation with padding for boundary
//! detection. Each row is `x_size + 1` cells wide: the extra cell on the left
//! is a wall shared with the right edge of the row above. A full row of
//! padding sits above and below the playable area.

// =============================================================================
// Board Geometry
// =============================================================================

/// Largest supported board side.
pub const MAX_LEN: usize = 19;

/// Board array size for the largest board, including all padding.
pub const MAX_ARR_SIZE: usize = (MAX_LEN + 1) * (MAX_LEN + 2) + 1;

/// Number of playable points on the largest board.
pub const MAX_PLAY_SIZE: usize = MAX_LEN * MAX_LEN;

// =============================================================================
// Special Locations
// =============================================================================

/// Location of a pass (index 0 is padding, so safe to use).
pub const PASS_LOC: usize = 0;

// =============================================================================
// Rules
// =============================================================================

/// Komi must lie within this magnitude.
pub const MAX_KOMI: f32 = 100.0;

/// Number of encore phases after the main phase (territory scoring).
pub const NUM_ENCORE_PHASES: u8 = 2;

/// Occurrences of the same ko hash after a move that finish the game as a
/// no-result under cycle-prone ko rules.
pub const NO_RESULT_REPETITIONS: usize = 3;

// =============================================================================
// Neural Net Evaluation
// =============================================================================

/// Newest model format whose outputs can be post-processed.
pub const LATEST_MODEL_VERSION: i32 = 3;

/// Number of recent moves mixed into the evaluation fingerprint.
pub const NUM_HASHED_MOVES: usize = 5;

/// Largest accepted cache size exponent.
pub const MAX_CACHE_SIZE_POWER_OF_TWO: u32 = 32;

/// Number of board symmetries addressable by the three symmetry flags.
pub const NUM_SYMMETRIES: u32 = 8;

/// Sentinel logit assigned to illegal moves before normalization.
pub const ILLEGAL_LOGIT: f32 = -1e30;

/// Probability reported for illegal moves after normalization.
pub const ILLEGAL_POLICY_PROB: f32 = -1.0;
