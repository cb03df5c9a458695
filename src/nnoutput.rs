//! Neural net output records and their post-processing.

use log::warn;

use crate::board::{Board, Player};
use crate::constants::{ILLEGAL_LOGIT, ILLEGAL_POLICY_PROB};
use crate::error::{Error, Result};
use crate::hash::Hash128;
use crate::history::BoardHistory;
use crate::nninputs::{policy_size, pos_to_loc};

/// Result of evaluating one position.
///
/// A backend fills these fields with raw outputs from the perspective of the
/// player to move: policy logits, and either a single value logit in
/// `white_win_prob` (model versions 1-2) or win/loss/no-result logits plus a
/// score (version 3). [`postprocess`] turns them into probabilities from
/// white's perspective.
#[derive(Clone, Debug, PartialEq)]
pub struct NNOutput {
    pub nn_hash: Hash128,
    pub white_win_prob: f32,
    pub white_loss_prob: f32,
    pub white_no_result_prob: f32,
    pub white_score_value: f32,
    /// One entry per position of a `pos_len` x `pos_len` grid, then pass.
    /// Illegal moves hold -1 after post-processing.
    pub policy_probs: Vec<f32>,
    pub pos_len: usize,
    /// Ownership per position in [-1, 1], positive for white.
    pub owner_map: Option<Vec<f32>>,
}

impl NNOutput {
    pub fn new(pos_len: usize, include_owner_map: bool) -> Self {
        NNOutput {
            nn_hash: Hash128::ZERO,
            white_win_prob: 0.0,
            white_loss_prob: 0.0,
            white_no_result_prob: 0.0,
            white_score_value: 0.0,
            policy_probs: vec![0.0; policy_size(pos_len)],
            pos_len,
            owner_map: include_owner_map.then(|| vec![0.0; pos_len * pos_len]),
        }
    }
}

fn softmax3(a: f32, b: f32, c: f32) -> (f32, f32, f32) {
    let max = a.max(b).max(c);
    let (ea, eb, ec) = ((a - max).exp(), (b - max).exp(), (c - max).exp());
    let sum = ea + eb + ec;
    (ea / sum, eb / sum, ec / sum)
}

/// Normalize the policy over legal moves and convert values to white's
/// perspective.
///
/// If the legal logits underflow to a zero (or non-finite) sum the policy
/// falls back to uniform over legal moves; the first such event per result
/// buffer is logged, guarded by `error_log_lockout`.
pub fn postprocess(
    output: &mut NNOutput,
    board: &Board,
    hist: &BoardHistory,
    next_pla: Player,
    model_version: i32,
    error_log_lockout: &mut bool,
) -> Result<()> {
    let pos_len = output.pos_len;
    let n = policy_size(pos_len);
    let policy = &mut output.policy_probs[..n];

    let mut is_legal = vec![false; n];
    let mut max_policy = -1e25f32;
    for (pos, logit) in policy.iter_mut().enumerate() {
        let legal = pos_to_loc(pos, board, pos_len).is_some_and(|loc| hist.is_legal(board, loc, next_pla));
        is_legal[pos] = legal;
        if !legal {
            *logit = ILLEGAL_LOGIT;
        } else if *logit > max_policy {
            max_policy = *logit;
        }
    }

    let mut policy_sum = 0.0f32;
    for (pos, p) in policy.iter_mut().enumerate() {
        if is_legal[pos] {
            *p = (*p - max_policy).exp();
            policy_sum += *p;
        }
    }

    if !(policy_sum > 0.0 && policy_sum.is_finite()) {
        if !*error_log_lockout {
            *error_log_lockout = true;
            warn!(
                "policy sum {policy_sum} is not positive, using uniform policy\n{board}"
            );
        }
        let num_legal = is_legal.iter().filter(|&&l| l).count() as f32;
        for (pos, p) in policy.iter_mut().enumerate() {
            *p = if is_legal[pos] { 1.0 / num_legal } else { ILLEGAL_POLICY_PROB };
        }
    } else {
        for (pos, p) in policy.iter_mut().enumerate() {
            *p = if is_legal[pos] { *p / policy_sum } else { ILLEGAL_POLICY_PROB };
        }
    }

    let white_to_move = next_pla == Player::White;
    match model_version {
        1 | 2 => {
            let win = 0.5 * output.white_win_prob.tanh() + 0.5;
            let (white_win, white_loss) = if white_to_move { (win, 1.0 - win) } else { (1.0 - win, win) };
            output.white_win_prob = white_win;
            output.white_loss_prob = white_loss;
            output.white_no_result_prob = 0.0;
            output.white_score_value = 0.0;
        }
        3 => {
            let (win, loss, no_result) = softmax3(
                output.white_win_prob,
                output.white_loss_prob,
                output.white_no_result_prob,
            );
            let score = output.white_score_value;
            if white_to_move {
                output.white_win_prob = win;
                output.white_loss_prob = loss;
                output.white_score_value = score;
            } else {
                output.white_win_prob = loss;
                output.white_loss_prob = win;
                output.white_score_value = -score;
            }
            output.white_no_result_prob = no_result;
        }
        v => return Err(Error::UnsupportedModelVersion(v)),
    }

    if let Some(owner) = output.owner_map.as_mut() {
        for o in owner.iter_mut() {
            let v = o.tanh();
            *o = if white_to_move { v } else { -v };
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PASS_LOC;
    use crate::nninputs::loc_to_pos;
    use crate::rules::Rules;

    fn setup() -> (Board, BoardHistory) {
        let board = Board::parse(3, 3, "x..\n...\n..o").unwrap();
        let hist = BoardHistory::new(&board, Player::Black, Rules::default(), 0);
        (board, hist)
    }

    #[test]
    fn test_policy_masks_illegal_and_normalizes() {
        let (board, hist) = setup();
        let pos_len = 4;
        let mut out = NNOutput::new(pos_len, false);
        for p in out.policy_probs.iter_mut() {
            *p = 1.0;
        }
        let mut lockout = false;
        postprocess(&mut out, &board, &hist, Player::Black, 3, &mut lockout).unwrap();

        let sum: f32 = out.policy_probs.iter().filter(|&&p| p >= 0.0).sum();
        assert!((sum - 1.0).abs() < 1e-5);
        // 7 empty points plus pass are legal.
        let legal = out.policy_probs.iter().filter(|&&p| p >= 0.0).count();
        assert_eq!(legal, 8);
        assert_eq!(out.policy_probs[loc_to_pos(board.loc(0, 0), &board, pos_len)], -1.0);
        assert_eq!(out.policy_probs[3], -1.0, "off-board column");
        assert!(!lockout);
    }

    #[test]
    fn test_degenerate_policy_falls_back_to_uniform() {
        let (board, hist) = setup();
        let mut out = NNOutput::new(3, false);
        for p in out.policy_probs.iter_mut() {
            *p = f32::NEG_INFINITY;
        }
        let mut lockout = false;
        postprocess(&mut out, &board, &hist, Player::White, 3, &mut lockout).unwrap();
        assert!(lockout);
        let pass_pos = loc_to_pos(PASS_LOC, &board, 3);
        assert!((out.policy_probs[pass_pos] - 1.0 / 8.0).abs() < 1e-6);
        assert_eq!(out.policy_probs[0], -1.0);
    }

    #[test]
    fn test_nan_policy_falls_back_to_uniform() {
        let (board, hist) = setup();
        let mut out = NNOutput::new(3, false);
        out.policy_probs[1] = f32::NAN;
        let mut lockout = false;
        postprocess(&mut out, &board, &hist, Player::White, 3, &mut lockout).unwrap();
        assert!(lockout);
        assert!(out.policy_probs.iter().all(|p| !p.is_nan()));
    }

    #[test]
    fn test_tanh_value_perspective() {
        let (board, hist) = setup();
        let mut black = NNOutput::new(3, false);
        black.white_win_prob = 10.0;
        let mut lockout = false;
        postprocess(&mut black, &board, &hist, Player::Black, 2, &mut lockout).unwrap();
        assert!(black.white_win_prob < 0.01);
        assert!(black.white_loss_prob > 0.99);
        assert_eq!(black.white_no_result_prob, 0.0);

        let mut white = NNOutput::new(3, false);
        white.white_win_prob = 10.0;
        postprocess(&mut white, &board, &hist, Player::White, 1, &mut lockout).unwrap();
        assert!(white.white_win_prob > 0.99);
    }

    #[test]
    fn test_softmax_value_perspective_and_owner_map() {
        let (board, hist) = setup();
        let mut out = NNOutput::new(3, true);
        out.white_win_prob = 2.0;
        out.white_loss_prob = 0.0;
        out.white_no_result_prob = -2.0;
        out.white_score_value = 4.0;
        if let Some(owner) = out.owner_map.as_mut() {
            owner[0] = 5.0;
        }
        let mut lockout = false;
        postprocess(&mut out, &board, &hist, Player::Black, 3, &mut lockout).unwrap();
        assert!(out.white_loss_prob > out.white_win_prob);
        let total = out.white_win_prob + out.white_loss_prob + out.white_no_result_prob;
        assert!((total - 1.0).abs() < 1e-5);
        assert_eq!(out.white_score_value, -4.0);
        assert!(out.owner_map.unwrap()[0] < -0.99);
    }

    #[test]
    fn test_unknown_model_version() {
        let (board, hist) = setup();
        let mut out = NNOutput::new(3, false);
        let mut lockout = false;
        let err = postprocess(&mut out, &board, &hist, Player::Black, 9, &mut lockout).unwrap_err();
        assert_eq!(err, Error::UnsupportedModelVersion(9));
    }
}
