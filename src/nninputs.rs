//! Neural net input encoding and position fingerprints.
//!
//! Rows are laid out as `num_spatial * pos_len * pos_len` spatial features
//! (NCHW or NHWC order) followed by the global features. Everything is from
//! the perspective of the player to move ("own" vs "opponent").
//!
//! Format 1 spatial features:
//! 0 on board, 1 own stones, 2 opponent stones, 3-5 stones whose chain has
//! 1, 2 or 3 liberties, 6 simple ko point, 7-9 the last three moves.
//!
//! Format 2 adds: 10 own encore ko prohibitions, 11 opponent encore ko
//! prohibitions, 12 own stones at second encore start, 13 opponent stones at
//! second encore start.
//!
//! Globals: komi / 15 for the player to move, last move was a pass, and in
//! format 2 also encore >= 1, encore >= 2, superko rule, territory scoring.

use crate::board::{Board, Color, Loc, Player};
use crate::constants::{MAX_ARR_SIZE, NUM_HASHED_MOVES, PASS_LOC};
use crate::error::{Error, Result};
use crate::hash::{Hash128, hash_u64, zobrist};
use crate::history::BoardHistory;
use crate::rules::{KoRule, ScoringRule};

pub const NUM_SPATIAL_FEATURES_V1: usize = 10;
pub const NUM_GLOBAL_FEATURES_V1: usize = 2;
pub const NUM_SPATIAL_FEATURES_V2: usize = 14;
pub const NUM_GLOBAL_FEATURES_V2: usize = 6;

const KOMI_SCALE: f32 = 15.0;

/// Input format used by a model version.
pub fn inputs_version_for_model(model_version: i32) -> Result<i32> {
    match model_version {
        1 => Ok(1),
        2 | 3 => Ok(2),
        v => Err(Error::UnsupportedModelVersion(v)),
    }
}

pub fn num_spatial_features(inputs_version: i32) -> usize {
    if inputs_version >= 2 {
        NUM_SPATIAL_FEATURES_V2
    } else {
        NUM_SPATIAL_FEATURES_V1
    }
}

pub fn num_global_features(inputs_version: i32) -> usize {
    if inputs_version >= 2 {
        NUM_GLOBAL_FEATURES_V2
    } else {
        NUM_GLOBAL_FEATURES_V1
    }
}

/// Index of the first global feature in a row.
pub fn global_feature_offset(inputs_version: i32, pos_len: usize) -> usize {
    num_spatial_features(inputs_version) * pos_len * pos_len
}

pub fn row_len(inputs_version: i32, pos_len: usize) -> usize {
    global_feature_offset(inputs_version, pos_len) + num_global_features(inputs_version)
}

/// Number of policy entries: every position plus pass.
pub fn policy_size(pos_len: usize) -> usize {
    pos_len * pos_len + 1
}

pub fn loc_to_pos(loc: Loc, board: &Board, pos_len: usize) -> usize {
    if loc == PASS_LOC {
        return pos_len * pos_len;
    }
    board.loc_x(loc) + board.loc_y(loc) * pos_len
}

/// Board location of a policy index, or `None` for positions off this board.
pub fn pos_to_loc(pos: usize, board: &Board, pos_len: usize) -> Option<Loc> {
    if pos == pos_len * pos_len {
        return Some(PASS_LOC);
    }
    let x = pos % pos_len;
    let y = pos / pos_len;
    if x >= board.x_size || y >= board.y_size {
        return None;
    }
    Some(board.loc(x, y))
}

/// Fingerprint of everything the net sees for this position.
pub fn get_hash(board: &Board, hist: &BoardHistory, next_pla: Player, inputs_version: i32) -> Hash128 {
    let z = zobrist();
    let mut h = board.pos_hash ^ z.player[next_pla.index()];
    h ^= z.size_x[board.x_size] ^ z.size_y[board.y_size];
    if let Some(ko) = board.ko_loc {
        h ^= z.ko_loc[ko];
    }
    for (i, mv) in hist.move_history.iter().rev().take(NUM_HASHED_MOVES).enumerate() {
        h ^= z.move_loc[i][mv.loc] ^ z.move_player[i][mv.pla.index()];
    }
    if inputs_version >= 2 {
        h ^= z.encore_phase[usize::from(hist.encore_phase)];
        h ^= hist.ko_prohibit_hash;
        let rules = &hist.rules;
        let komi_bits = (rules.komi * 2.0) as i64 as u64;
        let rule_bits = rules.ko_rule.index() as u64
            | (rules.scoring_rule.index() as u64) << 2
            | u64::from(rules.multi_stone_suicide_legal) << 3
            | komi_bits << 8;
        h ^= hash_u64(rule_bits);
    }
    h
}

struct RowWriter<'a> {
    row: &'a mut [f32],
    pos_len: usize,
    num_spatial: usize,
    use_nhwc: bool,
}

impl RowWriter<'_> {
    fn set(&mut self, pos: usize, feature: usize, value: f32) {
        let idx = if self.use_nhwc {
            pos * self.num_spatial + feature
        } else {
            feature * self.pos_len * self.pos_len + pos
        };
        self.row[idx] = value;
    }
}

/// Write the features of this position into `row`, which must be
/// `row_len(inputs_version, pos_len)` long.
pub fn fill_row(
    board: &Board,
    hist: &BoardHistory,
    next_pla: Player,
    inputs_version: i32,
    pos_len: usize,
    use_nhwc: bool,
    row: &mut [f32],
) {
    debug_assert!(board.x_size <= pos_len && board.y_size <= pos_len);
    debug_assert_eq!(row.len(), row_len(inputs_version, pos_len));
    row.fill(0.0);

    let own = Color::from(next_pla);
    let opp = Color::from(next_pla.opp());
    let num_spatial = num_spatial_features(inputs_version);
    let global_offset = global_feature_offset(inputs_version, pos_len);

    let mut liberties = [0usize; MAX_ARR_SIZE];
    for loc in board.on_board_locs() {
        if board.get(loc).player().is_some() && liberties[loc] == 0 {
            let libs = board.chain_liberties(loc);
            for stone in board.chain(loc) {
                liberties[stone] = libs;
            }
        }
    }

    let mut w = RowWriter { row: &mut *row, pos_len, num_spatial, use_nhwc };
    for loc in board.on_board_locs() {
        let pos = loc_to_pos(loc, board, pos_len);
        w.set(pos, 0, 1.0);
        let c = board.get(loc);
        if c == own {
            w.set(pos, 1, 1.0);
        } else if c == opp {
            w.set(pos, 2, 1.0);
        }
        if c != Color::Empty {
            match liberties[loc] {
                1 => w.set(pos, 3, 1.0),
                2 => w.set(pos, 4, 1.0),
                3 => w.set(pos, 5, 1.0),
                _ => {}
            }
        }
        if inputs_version >= 2 {
            if hist.is_ko_prohibited(loc, next_pla) {
                w.set(pos, 10, 1.0);
            }
            if hist.is_ko_prohibited(loc, next_pla.opp()) {
                w.set(pos, 11, 1.0);
            }
            if hist.encore_phase >= 2 {
                let start = hist.second_encore_start_colors[loc];
                if start == own {
                    w.set(pos, 12, 1.0);
                } else if start == opp {
                    w.set(pos, 13, 1.0);
                }
            }
        }
    }
    if let Some(ko) = board.ko_loc {
        w.set(loc_to_pos(ko, board, pos_len), 6, 1.0);
    }
    for (i, mv) in hist.move_history.iter().rev().take(3).enumerate() {
        if mv.loc != PASS_LOC {
            w.set(loc_to_pos(mv.loc, board, pos_len), 7 + i, 1.0);
        }
    }

    let rules = &hist.rules;
    let komi = if next_pla == Player::White { rules.komi } else { -rules.komi };
    row[global_offset] = komi / KOMI_SCALE;
    if hist.move_history.last().is_some_and(|mv| mv.loc == PASS_LOC) {
        row[global_offset + 1] = 1.0;
    }
    if inputs_version >= 2 {
        if hist.encore_phase >= 1 {
            row[global_offset + 2] = 1.0;
        }
        if hist.encore_phase >= 2 {
            row[global_offset + 3] = 1.0;
        }
        if rules.ko_rule != KoRule::Simple {
            row[global_offset + 4] = 1.0;
        }
        if rules.scoring_rule == ScoringRule::Territory {
            row[global_offset + 5] = 1.0;
        }
    }
}
