//! Game history and the rules state machine.
//!
//! [`BoardHistory`] sits on top of a [`Board`] and tracks everything the
//! board alone cannot know: superko history, pass counting, the encore
//! phases used by territory scoring, encore ko prohibitions, and the final
//! result.
//!
//! Phases run MAIN (0), ENCORE1 (1), ENCORE2 (2). Two consecutive passes, or
//! a pass that repeats a position seen before the same color's earlier pass
//! under cycle-prone rules, end the current phase. Under area scoring ending
//! the main phase ends the game.

use std::collections::HashSet;

use crate::board::{Board, Color, Loc, Player};
use crate::constants::{MAX_ARR_SIZE, NO_RESULT_REPETITIONS, NUM_ENCORE_PHASES, PASS_LOC};
use crate::error::{Error, Result};
use crate::hash::{Hash128, zobrist};
use crate::rules::{KoRule, Rules, ScoringRule};

/// A move as recorded in the history.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Move {
    pub loc: Loc,
    pub pla: Player,
}

/// A single-stone ko capture made during the encore. The opponent of
/// `capturer` may not recapture at `ko_loc` while the shape stays intact.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EncoreKoCapture {
    pub capture_loc: Loc,
    pub ko_loc: Loc,
    pub capturer: Player,
}

/// Rules state for one game line. Clone it for what-if analysis.
#[derive(Clone)]
pub struct BoardHistory {
    pub rules: Rules,

    pub initial_board: Board,
    pub initial_pla: Player,
    pub initial_encore_phase: u8,
    pub move_history: Vec<Move>,
    pub presumed_next_move_pla: Player,

    /// Ko hashes for superko and repetition checks. Reset whenever a pass
    /// lifts repetition bans.
    pub ko_hash_history: Vec<Hash128>,

    pub encore_phase: u8,
    pub consecutive_ending_passes: u32,
    hashes_before_black_pass: HashSet<Hash128>,
    hashes_before_white_pass: HashSet<Hash128>,

    pub black_ko_prohibited: [bool; MAX_ARR_SIZE],
    pub white_ko_prohibited: [bool; MAX_ARR_SIZE],
    /// XOR of the ko marks currently set.
    pub ko_prohibit_hash: Hash128,
    encore_ko_captures: Vec<EncoreKoCapture>,
    /// Every ko capture made in the current encore phase, keyed by the ko
    /// hash it was made from. Each may be made only once from that hash.
    ko_captures_in_phase: Vec<(Hash128, Move)>,

    /// Stone placement when the second encore started.
    pub second_encore_start_colors: [Color; MAX_ARR_SIZE],
    /// Stones from `second_encore_start_colors` not captured since.
    second_encore_survivors: [Color; MAX_ARR_SIZE],
    initial_captures: (u32, u32),
    second_encore_start_captures: (u32, u32),

    pub white_bonus_score: f32,

    pub is_game_finished: bool,
    pub winner: Option<Player>,
    pub final_white_minus_black_score: f32,
    pub is_no_result: bool,
    pub is_resignation: bool,
}

impl BoardHistory {
    pub fn new(board: &Board, pla: Player, rules: Rules, encore_phase: u8) -> Self {
        let mut hist = BoardHistory {
            rules,
            initial_board: board.clone(),
            initial_pla: pla,
            initial_encore_phase: encore_phase,
            move_history: Vec::new(),
            presumed_next_move_pla: pla,
            ko_hash_history: Vec::new(),
            encore_phase,
            consecutive_ending_passes: 0,
            hashes_before_black_pass: HashSet::new(),
            hashes_before_white_pass: HashSet::new(),
            black_ko_prohibited: [false; MAX_ARR_SIZE],
            white_ko_prohibited: [false; MAX_ARR_SIZE],
            ko_prohibit_hash: Hash128::ZERO,
            encore_ko_captures: Vec::new(),
            ko_captures_in_phase: Vec::new(),
            second_encore_start_colors: board.colors,
            second_encore_survivors: board.colors,
            initial_captures: (0, 0),
            second_encore_start_captures: (0, 0),
            white_bonus_score: 0.0,
            is_game_finished: false,
            winner: None,
            final_white_minus_black_score: 0.0,
            is_no_result: false,
            is_resignation: false,
        };
        hist.clear(board, pla, rules, encore_phase);
        hist
    }

    /// Restart the history from `board` with `pla` to move.
    pub fn clear(&mut self, board: &Board, pla: Player, rules: Rules, encore_phase: u8) {
        debug_assert!(encore_phase <= NUM_ENCORE_PHASES);
        self.rules = rules;
        self.initial_board = board.clone();
        self.initial_pla = pla;
        self.initial_encore_phase = encore_phase;
        self.move_history.clear();
        self.presumed_next_move_pla = pla;
        self.encore_phase = encore_phase;
        self.consecutive_ending_passes = 0;
        self.hashes_before_black_pass.clear();
        self.hashes_before_white_pass.clear();
        self.black_ko_prohibited = [false; MAX_ARR_SIZE];
        self.white_ko_prohibited = [false; MAX_ARR_SIZE];
        self.ko_prohibit_hash = Hash128::ZERO;
        self.encore_ko_captures.clear();
        self.ko_captures_in_phase.clear();
        self.second_encore_start_colors = board.colors;
        self.second_encore_survivors = board.colors;
        self.initial_captures = (board.num_black_captures, board.num_white_captures);
        self.second_encore_start_captures = self.initial_captures;
        self.white_bonus_score =
            Self::num_handicap_stones(board) as f32 * rules.white_bonus_per_handicap_stone;
        self.clear_result();

        self.ko_hash_history.clear();
        let h = self.ko_hash(board, pla);
        self.ko_hash_history.push(h);
    }

    /// Black stones on a board with no white stones count as handicap.
    pub fn num_handicap_stones(board: &Board) -> usize {
        if board.num_stones(Player::White) > 0 {
            return 0;
        }
        board.num_stones(Player::Black)
    }

    fn clear_result(&mut self) {
        self.is_game_finished = false;
        self.winner = None;
        self.final_white_minus_black_score = 0.0;
        self.is_no_result = false;
        self.is_resignation = false;
    }

    // =========================================================================
    // Ko hashing
    // =========================================================================

    fn ko_hash_from(&self, pos_hash: Hash128, next_pla: Player) -> Hash128 {
        let z = zobrist();
        if self.encore_phase > 0 {
            pos_hash ^ z.player[next_pla.index()] ^ self.ko_prohibit_hash
        } else if self.rules.ko_rule == KoRule::Situational {
            pos_hash ^ z.player[next_pla.index()]
        } else {
            pos_hash
        }
    }

    /// Hash used for repetition checks: the stone hash, plus the side to
    /// move and active ko marks where the rules make them matter.
    pub fn ko_hash(&self, board: &Board, next_pla: Player) -> Hash128 {
        self.ko_hash_from(board.pos_hash, next_pla)
    }

    /// The most recent ko hash.
    pub fn current_ko_hash(&self) -> Hash128 {
        self.ko_hash_history.last().copied().unwrap_or_default()
    }

    fn phase_has_spightlike_ending(&self) -> bool {
        self.encore_phase > 0 || matches!(self.rules.ko_rule, KoRule::Simple | KoRule::Spight)
    }

    fn pass_hashes(&self, pla: Player) -> &HashSet<Hash128> {
        match pla {
            Player::Black => &self.hashes_before_black_pass,
            Player::White => &self.hashes_before_white_pass,
        }
    }

    fn pass_hashes_mut(&mut self, pla: Player) -> &mut HashSet<Hash128> {
        match pla {
            Player::Black => &mut self.hashes_before_black_pass,
            Player::White => &mut self.hashes_before_white_pass,
        }
    }

    // =========================================================================
    // Encore ko prohibitions
    // =========================================================================

    /// Whether `pla` is barred from recapturing at `loc` in the encore.
    pub fn is_ko_prohibited(&self, loc: Loc, pla: Player) -> bool {
        if self.encore_phase == 0 || loc >= MAX_ARR_SIZE {
            return false;
        }
        match pla {
            Player::Black => self.black_ko_prohibited[loc],
            Player::White => self.white_ko_prohibited[loc],
        }
    }

    /// Locations where `pla` is currently ko-prohibited.
    pub fn ko_prohibited_locs(&self, pla: Player) -> Vec<Loc> {
        (0..MAX_ARR_SIZE).filter(|&loc| self.is_ko_prohibited(loc, pla)).collect()
    }

    fn rebuild_ko_prohibitions(&mut self) {
        let z = zobrist();
        self.black_ko_prohibited = [false; MAX_ARR_SIZE];
        self.white_ko_prohibited = [false; MAX_ARR_SIZE];
        self.ko_prohibit_hash = Hash128::ZERO;
        for cap in &self.encore_ko_captures {
            let prohibited = cap.capturer.opp();
            let marks = match prohibited {
                Player::Black => &mut self.black_ko_prohibited,
                Player::White => &mut self.white_ko_prohibited,
            };
            if !marks[cap.ko_loc] {
                marks[cap.ko_loc] = true;
                self.ko_prohibit_hash ^= z.ko_mark[cap.ko_loc][prohibited.index()];
            }
        }
    }

    /// The ko shape is intact while the capturing stone is still a lone stone
    /// in atari on the recapture point and no other adjacent chain of the
    /// capturer is in atari.
    fn encore_ko_shape_intact(board: &Board, cap: &EncoreKoCapture) -> bool {
        let capturer = Color::from(cap.capturer);
        if board.get(cap.ko_loc) != Color::Empty || board.get(cap.capture_loc) != capturer {
            return false;
        }
        let single = board
            .neighbors(cap.capture_loc)
            .iter()
            .all(|&n| board.get(n) != capturer);
        if !single || board.chain_liberties(cap.capture_loc) != 1 {
            return false;
        }
        board.neighbors(cap.ko_loc).iter().all(|&n| {
            n == cap.capture_loc || board.get(n) != capturer || board.chain_liberties(n) > 1
        })
    }

    /// Drop prohibitions won by `pla` whose ko shape `pla` has since broken.
    fn update_encore_ko_captures(&mut self, board: &Board, pla: Player) {
        let before = self.encore_ko_captures.len();
        self.encore_ko_captures
            .retain(|cap| cap.capturer != pla || Self::encore_ko_shape_intact(board, cap));
        if self.encore_ko_captures.len() != before {
            self.rebuild_ko_prohibitions();
        }
    }

    fn clear_encore_ko_state(&mut self) {
        self.encore_ko_captures.clear();
        self.ko_captures_in_phase.clear();
        self.rebuild_ko_prohibitions();
    }

    /// Whether `pla` already made the ko capture at `loc` from this exact
    /// position during the current encore phase.
    fn repeats_encore_ko_capture(&self, board: &Board, loc: Loc, pla: Player) -> bool {
        if self.ko_captures_in_phase.is_empty() {
            return false;
        }
        let h = self.ko_hash(board, pla);
        let mv = Move { loc, pla };
        self.ko_captures_in_phase.iter().any(|&(hash, m)| hash == h && m == mv)
    }

    // =========================================================================
    // Legality
    // =========================================================================

    /// Whether `pla` may play at `loc` now. During the encore a move onto a
    /// point where `pla` is ko-prohibited is legal and acts as a pass-for-ko,
    /// and a ko capture may not be repeated from the same position.
    pub fn is_legal(&self, board: &Board, loc: Loc, pla: Player) -> bool {
        if loc == PASS_LOC {
            return true;
        }
        if self.encore_phase > 0 {
            if self.is_ko_prohibited(loc, pla) {
                return true;
            }
            return board.is_legal_ignoring_ko(loc, pla, self.rules.multi_stone_suicide_legal)
                && !self.repeats_encore_ko_capture(board, loc, pla);
        }
        if !board.is_legal_ignoring_ko(loc, pla, self.rules.multi_stone_suicide_legal) {
            return false;
        }
        match self.rules.ko_rule {
            KoRule::Simple => board.ko_loc != Some(loc),
            KoRule::Positional | KoRule::Situational | KoRule::Spight => {
                let after = self.ko_hash_from(board.pos_hash_after_move(loc, pla), pla.opp());
                !self.ko_hash_history.contains(&after)
            }
        }
    }

    /// Whether `pla` has a move that only the ko rule forbids. Such a
    /// player's pass does not count toward ending the main phase under
    /// SIMPLE and SPIGHT.
    fn has_ko_banned_move(&self, board: &Board, pla: Player) -> bool {
        let msl = self.rules.multi_stone_suicide_legal;
        match self.rules.ko_rule {
            KoRule::Simple => board
                .ko_loc
                .is_some_and(|ko| board.is_legal_ignoring_ko(ko, pla, msl)),
            KoRule::Spight => board.on_board_locs().any(|loc| {
                board.is_legal_ignoring_ko(loc, pla, msl) && !self.is_legal(board, loc, pla)
            }),
            KoRule::Positional | KoRule::Situational => false,
        }
    }

    fn pass_counts_toward_ending(&self, board: &Board, pla: Player) -> bool {
        !(self.encore_phase == 0
            && matches!(self.rules.ko_rule, KoRule::Simple | KoRule::Spight)
            && self.has_ko_banned_move(board, pla))
    }

    /// Would a pass by `pla` right now end the current phase (or the game)?
    pub fn pass_would_end_phase(&self, board: &Board, pla: Player) -> bool {
        let mut passes = self.consecutive_ending_passes;
        if self.pass_counts_toward_ending(board, pla) {
            passes += 1;
        }
        if passes >= 2 {
            return true;
        }
        self.phase_has_spightlike_ending()
            && self.pass_hashes(pla).contains(&self.ko_hash(board, pla))
    }

    // =========================================================================
    // Moves
    // =========================================================================

    /// Play a move after checking legality.
    pub fn make_board_move(&mut self, board: &mut Board, loc: Loc, pla: Player) -> Result<Vec<Loc>> {
        if !self.is_legal(board, loc, pla) {
            return Err(Error::IllegalMove {
                mv: board.loc_to_string(loc),
                player: pla.to_string(),
            });
        }
        Ok(self.make_board_move_assume_legal(board, loc, pla))
    }

    /// Play a move the caller has already checked with [`Self::is_legal`],
    /// returning the stones removed from the board.
    ///
    /// A move made after the game finished resumes the game. A move onto an
    /// empty point that only the ko rules forbid is still applied as given.
    pub fn make_board_move_assume_legal(&mut self, board: &mut Board, loc: Loc, pla: Player) -> Vec<Loc> {
        self.clear_result();

        let ko_hash_before = self.ko_hash(board, pla);
        let mut removed = Vec::new();
        let mut repeated_pass = false;

        if loc == PASS_LOC {
            if self.pass_counts_toward_ending(board, pla) {
                self.consecutive_ending_passes += 1;
            }
            if self.phase_has_spightlike_ending() && !self.pass_hashes_mut(pla).insert(ko_hash_before) {
                repeated_pass = true;
            }
            board.play_move_assume_legal(PASS_LOC, pla);
        } else if self.is_ko_prohibited(loc, pla) {
            // Pass-for-ko: the stone is not placed, the prohibition goes away.
            self.consecutive_ending_passes = 0;
            self.encore_ko_captures
                .retain(|cap| !(cap.ko_loc == loc && cap.capturer == pla.opp()));
            self.rebuild_ko_prohibitions();
            self.update_encore_ko_captures(board, pla);
        } else {
            self.consecutive_ending_passes = 0;
            removed = board.play_move_assume_legal(loc, pla);
            if self.encore_phase >= NUM_ENCORE_PHASES {
                for &r in &removed {
                    self.second_encore_survivors[r] = Color::Empty;
                }
            }
            if self.encore_phase > 0 {
                self.update_encore_ko_captures(board, pla);
                if let Some(ko_loc) = board.ko_loc.take() {
                    self.encore_ko_captures.push(EncoreKoCapture {
                        capture_loc: loc,
                        ko_loc,
                        capturer: pla,
                    });
                    self.ko_captures_in_phase.push((ko_hash_before, Move { loc, pla }));
                    self.rebuild_ko_prohibitions();
                }
            } else if self.rules.ko_rule != KoRule::Simple {
                board.ko_loc = None;
            }
        }

        self.move_history.push(Move { loc, pla });
        self.presumed_next_move_pla = pla.opp();

        if loc == PASS_LOC && self.phase_has_spightlike_ending() {
            self.ko_hash_history.clear();
        }
        let new_hash = self.ko_hash(board, pla.opp());
        self.ko_hash_history.push(new_hash);

        if loc == PASS_LOC {
            if self.consecutive_ending_passes >= 2 || repeated_pass {
                self.end_phase(board);
            }
        } else if self.rules.ko_rule == KoRule::Simple || self.encore_phase > 0 {
            let repetitions = self.ko_hash_history.iter().filter(|&&h| h == new_hash).count();
            if repetitions >= NO_RESULT_REPETITIONS {
                self.set_no_result();
            }
        }
        removed
    }

    fn end_phase(&mut self, board: &mut Board) {
        if self.rules.scoring_rule == ScoringRule::Area || self.encore_phase >= NUM_ENCORE_PHASES {
            self.end_and_score_game_now(board, None);
            return;
        }
        self.encore_phase += 1;
        if self.encore_phase == NUM_ENCORE_PHASES {
            self.second_encore_start_colors = board.colors;
            self.second_encore_survivors = board.colors;
            self.second_encore_start_captures = (board.num_black_captures, board.num_white_captures);
        }
        self.consecutive_ending_passes = 0;
        self.hashes_before_black_pass.clear();
        self.hashes_before_white_pass.clear();
        self.clear_encore_ko_state();
        board.ko_loc = None;

        self.ko_hash_history.clear();
        let h = self.ko_hash(board, self.presumed_next_move_pla);
        self.ko_hash_history.push(h);
    }

    // =========================================================================
    // Scoring
    // =========================================================================

    fn white_minus_black_score(&self, board: &Board, area: &[Color; MAX_ARR_SIZE]) -> f32 {
        let mut score: i64 = 0;
        match self.rules.scoring_rule {
            ScoringRule::Area => {
                for loc in board.on_board_locs() {
                    match area[loc] {
                        Color::White => score += 1,
                        Color::Black => score -= 1,
                        _ => {}
                    }
                }
            }
            ScoringRule::Territory => {
                let second_encore = self.encore_phase >= NUM_ENCORE_PHASES;
                let (start_colors, standing) = if second_encore {
                    (&self.second_encore_start_colors, &self.second_encore_survivors)
                } else {
                    (&board.colors, &board.colors)
                };
                for loc in board.on_board_locs() {
                    let Some(owner) = area[loc].player() else {
                        continue;
                    };
                    let sign = if owner == Player::White { 1 } else { -1 };
                    let own = Color::from(owner);
                    let opp = Color::from(owner.opp());
                    // Stones standing on the point since the second encore
                    // began are not territory.
                    if !(board.colors[loc] == own && start_colors[loc] == own) {
                        score += sign;
                    }
                    // Dead stones count as prisoners, except those added
                    // during the second encore.
                    if board.colors[loc] == opp && standing[loc] == opp {
                        score += sign;
                    }
                }
                let (black_caps, white_caps) = if second_encore {
                    self.second_encore_captures(board)
                } else {
                    (board.num_black_captures, board.num_white_captures)
                };
                let black_prisoners = i64::from(black_caps) - i64::from(self.initial_captures.0);
                let white_prisoners = i64::from(white_caps) - i64::from(self.initial_captures.1);
                score += black_prisoners - white_prisoners;
            }
        }
        score as f32 + self.rules.komi + self.white_bonus_score
    }

    /// Capture counts for territory scoring in the second encore. Only stones
    /// that were already on the board when it began are prisoners.
    fn second_encore_captures(&self, board: &Board) -> (u32, u32) {
        let (mut black, mut white) = self.second_encore_start_captures;
        for loc in board.on_board_locs() {
            if self.second_encore_survivors[loc] != Color::Empty {
                continue;
            }
            match self.second_encore_start_colors[loc] {
                Color::Black => black += 1,
                Color::White => white += 1,
                _ => {}
            }
        }
        (black, white)
    }

    fn area_for_scoring(&self, board: &Board) -> [Color; MAX_ARR_SIZE] {
        match self.rules.scoring_rule {
            ScoringRule::Area => board.calculate_area(true, true),
            ScoringRule::Territory => board.calculate_area(false, false),
        }
    }

    fn set_final_score(&mut self, score: f32) {
        self.final_white_minus_black_score = score;
        self.winner = if score > 0.0 {
            Some(Player::White)
        } else if score < 0.0 {
            Some(Player::Black)
        } else {
            None
        };
    }

    /// Score the game as it stands and mark it finished. Optionally reports
    /// the owner of every point.
    pub fn end_and_score_game_now(&mut self, board: &Board, area_out: Option<&mut [Color; MAX_ARR_SIZE]>) {
        let area = self.area_for_scoring(board);
        let score = self.white_minus_black_score(board, &area);
        self.is_game_finished = true;
        self.is_no_result = false;
        self.is_resignation = false;
        self.set_final_score(score);
        if let Some(out) = area_out {
            *out = area;
        }
    }

    /// The score the game would get if it ended now, leaving `self` as is.
    pub fn final_score_if_game_ended_now(&self, board: &Board) -> f32 {
        let mut copy = self.clone();
        copy.end_and_score_game_now(board, None);
        copy.final_white_minus_black_score
    }

    fn set_no_result(&mut self) {
        self.is_game_finished = true;
        self.winner = None;
        self.final_white_minus_black_score = 0.0;
        self.is_no_result = true;
        self.is_resignation = false;
    }

    /// Record that the game ended by resignation, won by `winner`.
    pub fn set_winner_by_resignation(&mut self, winner: Player) {
        self.is_game_finished = true;
        self.winner = Some(winner);
        self.final_white_minus_black_score = 0.0;
        self.is_no_result = false;
        self.is_resignation = true;
    }

    /// Change komi. Returns whether the value changed, in which case callers
    /// holding komi-dependent state must refresh it. A scored result is
    /// shifted to the new komi.
    pub fn set_komi(&mut self, komi: f32) -> Result<bool> {
        let mut rules = self.rules;
        rules.komi = komi;
        rules.validate()?;
        let old = self.rules.komi;
        if old == komi {
            return Ok(false);
        }
        self.rules = rules;
        if self.is_game_finished && !self.is_no_result && !self.is_resignation {
            self.set_final_score(self.final_white_minus_black_score - old + komi);
        }
        Ok(true)
    }
}
