//! Go board representation, captures and area calculation.
//!
//! The board uses a 1D array with padding (see [`crate::constants`]), an
//! incrementally maintained 128-bit Zobrist hash of the stone placement and a
//! simple ko point. Everything that depends on history (superko, encore ko
//! prohibitions, passes) lives in [`crate::history::BoardHistory`].

use std::fmt;

use crate::constants::{MAX_ARR_SIZE, MAX_LEN, PASS_LOC};
use crate::error::{Error, Result};
use crate::hash::{Hash128, zobrist};

/// A point on the board, represented as an index into the 1D board array.
pub type Loc = usize;

/// Column letters used when printing moves (no `I`).
const COLUMN_CHARS: &[u8] = b"ABCDEFGHJKLMNOPQRSTUVWXYZ";

/// One of the two players.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Player {
    Black,
    White,
}

impl Player {
    pub const BOTH: [Player; 2] = [Player::Black, Player::White];

    pub fn opp(self) -> Player {
        match self {
            Player::Black => Player::White,
            Player::White => Player::Black,
        }
    }

    /// Index into per-player tables.
    pub fn index(self) -> usize {
        match self {
            Player::Black => 0,
            Player::White => 1,
        }
    }

    pub fn to_char(self) -> char {
        match self {
            Player::Black => 'X',
            Player::White => 'O',
        }
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Player::Black => write!(f, "Black"),
            Player::White => write!(f, "White"),
        }
    }
}

/// Contents of a board cell.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Color {
    #[default]
    Empty,
    Black,
    White,
    /// Padding outside the playable area.
    Wall,
}

impl Color {
    pub fn player(self) -> Option<Player> {
        match self {
            Color::Black => Some(Player::Black),
            Color::White => Some(Player::White),
            _ => None,
        }
    }

    pub fn to_char(self) -> char {
        match self {
            Color::Empty => '.',
            Color::Black => 'X',
            Color::White => 'O',
            Color::Wall => ' ',
        }
    }
}

impl From<Player> for Color {
    fn from(pla: Player) -> Color {
        match pla {
            Player::Black => Color::Black,
            Player::White => Color::White,
        }
    }
}

/// A Go board of up to `MAX_LEN` x `MAX_LEN` points.
///
/// Cloning is a plain array copy, which is how search branches get a private
/// board.
#[derive(Clone)]
pub struct Board {
    pub x_size: usize,
    pub y_size: usize,
    /// Cell contents, walls included.
    pub colors: [Color; MAX_ARR_SIZE],
    /// Point that may not be immediately recaptured under simple ko.
    pub ko_loc: Option<Loc>,
    /// Zobrist hash of the stone placement.
    pub pos_hash: Hash128,
    /// Black stones removed from the board so far.
    pub num_black_captures: u32,
    /// White stones removed from the board so far.
    pub num_white_captures: u32,
    stride: usize,
}

impl Board {
    /// Create an empty board, failing for sizes outside `1..=MAX_LEN`.
    pub fn new(x_size: usize, y_size: usize) -> Result<Self> {
        if !(1..=MAX_LEN).contains(&x_size) || !(1..=MAX_LEN).contains(&y_size) {
            return Err(Error::Configuration(format!(
                "board size {x_size}x{y_size} is outside 1..={MAX_LEN}"
            )));
        }
        let mut board = Board {
            x_size,
            y_size,
            colors: [Color::Wall; MAX_ARR_SIZE],
            ko_loc: None,
            pos_hash: Hash128::ZERO,
            num_black_captures: 0,
            num_white_captures: 0,
            stride: x_size + 1,
        };
        for y in 0..y_size {
            for x in 0..x_size {
                let loc = board.loc(x, y);
                board.colors[loc] = Color::Empty;
            }
        }
        Ok(board)
    }

    /// Parse a board from rows of `.`, `x`/`X` (black) and `o`/`O` (white).
    ///
    /// Blank lines and whitespace inside rows are ignored.
    pub fn parse(x_size: usize, y_size: usize, text: &str) -> Result<Self> {
        let mut board = Board::new(x_size, y_size)?;
        let rows: Vec<Vec<char>> = text
            .lines()
            .map(|line| line.chars().filter(|c| !c.is_whitespace()).collect::<Vec<_>>())
            .filter(|row| !row.is_empty())
            .collect();
        if rows.len() != y_size {
            return Err(Error::Configuration(format!(
                "expected {y_size} board rows, found {}",
                rows.len()
            )));
        }
        for (y, row) in rows.iter().enumerate() {
            if row.len() != x_size {
                return Err(Error::Configuration(format!(
                    "row {y} has {} points, expected {x_size}",
                    row.len()
                )));
            }
            for (x, &c) in row.iter().enumerate() {
                let loc = board.loc(x, y);
                match c {
                    '.' => {}
                    'x' | 'X' => board.set_stone(loc, Player::Black),
                    'o' | 'O' => board.set_stone(loc, Player::White),
                    other => {
                        return Err(Error::Configuration(format!(
                            "unexpected board character '{other}'"
                        )));
                    }
                }
            }
        }
        Ok(board)
    }

    // =========================================================================
    // Coordinates
    // =========================================================================

    /// Location of column `x`, row `y` (row 0 is the top row).
    pub fn loc(&self, x: usize, y: usize) -> Loc {
        (x + 1) + (y + 1) * self.stride
    }

    pub fn loc_x(&self, loc: Loc) -> usize {
        loc % self.stride - 1
    }

    pub fn loc_y(&self, loc: Loc) -> usize {
        loc / self.stride - 1
    }

    pub fn is_on_board(&self, loc: Loc) -> bool {
        loc < MAX_ARR_SIZE && self.colors[loc] != Color::Wall
    }

    /// The four orthogonal neighbors of an on-board location.
    pub fn neighbors(&self, loc: Loc) -> [Loc; 4] {
        [loc - self.stride, loc - 1, loc + 1, loc + self.stride]
    }

    /// All playable locations, row by row.
    pub fn on_board_locs(&self) -> impl Iterator<Item = Loc> + '_ {
        (0..self.y_size).flat_map(move |y| (0..self.x_size).map(move |x| self.loc(x, y)))
    }

    pub fn get(&self, loc: Loc) -> Color {
        self.colors[loc]
    }

    /// Format a location as e.g. `D4`, or `pass`.
    pub fn loc_to_string(&self, loc: Loc) -> String {
        if loc == PASS_LOC {
            return "pass".to_string();
        }
        if !self.is_on_board(loc) {
            return format!("invalid({loc})");
        }
        let x = self.loc_x(loc);
        let y = self.loc_y(loc);
        format!("{}{}", COLUMN_CHARS[x] as char, self.y_size - y)
    }

    /// Parse a location such as `D4` or `pass`. Returns `None` when the text
    /// does not name a point on this board.
    pub fn parse_loc(&self, s: &str) -> Option<Loc> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("pass") {
            return Some(PASS_LOC);
        }
        let mut chars = s.chars();
        let col = chars.next()?.to_ascii_uppercase();
        let x = COLUMN_CHARS.iter().position(|&c| c as char == col)?;
        let row: usize = chars.as_str().parse().ok()?;
        if x >= self.x_size || row == 0 || row > self.y_size {
            return None;
        }
        Some(self.loc(x, self.y_size - row))
    }

    // =========================================================================
    // Chains and liberties
    // =========================================================================

    /// All stones in the chain containing `loc`.
    pub fn chain(&self, loc: Loc) -> Vec<Loc> {
        let color = self.colors[loc];
        let mut stones = Vec::new();
        let mut visited = [false; MAX_ARR_SIZE];
        let mut stack = vec![loc];
        visited[loc] = true;
        while let Some(cur) = stack.pop() {
            stones.push(cur);
            for n in self.neighbors(cur) {
                if !visited[n] && self.colors[n] == color {
                    visited[n] = true;
                    stack.push(n);
                }
            }
        }
        stones
    }

    /// Number of distinct liberties of the chain containing `loc`.
    pub fn chain_liberties(&self, loc: Loc) -> usize {
        let mut seen = [false; MAX_ARR_SIZE];
        let mut count = 0;
        for stone in self.chain(loc) {
            for n in self.neighbors(stone) {
                if self.colors[n] == Color::Empty && !seen[n] {
                    seen[n] = true;
                    count += 1;
                }
            }
        }
        count
    }

    /// Whether placing `pla` at empty `loc` leaves the new chain without
    /// liberties after resolving captures.
    pub fn is_suicide(&self, loc: Loc, pla: Player) -> bool {
        let own = Color::from(pla);
        let opp = Color::from(pla.opp());
        for n in self.neighbors(loc) {
            let c = self.colors[n];
            if c == Color::Empty
                || (c == own && self.chain_liberties(n) > 1)
                || (c == opp && self.chain_liberties(n) == 1)
            {
                return false;
            }
        }
        true
    }

    /// Whether a suicide at `loc` would be illegal. Single-stone suicide is
    /// always illegal, multi-stone suicide only when the rules forbid it.
    pub fn is_illegal_suicide(&self, loc: Loc, pla: Player, multi_stone_suicide_legal: bool) -> bool {
        if !self.is_suicide(loc, pla) {
            return false;
        }
        let own = Color::from(pla);
        let has_own_neighbor = self.neighbors(loc).iter().any(|&n| self.colors[n] == own);
        !multi_stone_suicide_legal || !has_own_neighbor
    }

    /// Legality without any ko rule applied.
    pub fn is_legal_ignoring_ko(&self, loc: Loc, pla: Player, multi_stone_suicide_legal: bool) -> bool {
        if loc == PASS_LOC {
            return true;
        }
        self.is_on_board(loc)
            && self.colors[loc] == Color::Empty
            && !self.is_illegal_suicide(loc, pla, multi_stone_suicide_legal)
    }

    // =========================================================================
    // Moves
    // =========================================================================

    fn set_stone(&mut self, loc: Loc, pla: Player) {
        self.colors[loc] = Color::from(pla);
        self.pos_hash ^= zobrist().board[loc][pla.index()];
    }

    fn remove_chain(&mut self, loc: Loc, removed: &mut Vec<Loc>) -> usize {
        let Some(pla) = self.colors[loc].player() else {
            return 0;
        };
        let stones = self.chain(loc);
        for &s in &stones {
            self.colors[s] = Color::Empty;
            self.pos_hash ^= zobrist().board[s][pla.index()];
        }
        match pla {
            Player::Black => self.num_black_captures += stones.len() as u32,
            Player::White => self.num_white_captures += stones.len() as u32,
        }
        let n = stones.len();
        removed.extend(stones);
        n
    }

    /// Play a move that the caller has verified to be legal, returning the
    /// stones removed from the board (captures, or the mover's own chain on
    /// a suicide). A pass clears the simple ko point.
    pub fn play_move_assume_legal(&mut self, loc: Loc, pla: Player) -> Vec<Loc> {
        let mut removed = Vec::new();
        self.ko_loc = None;
        if loc == PASS_LOC {
            return removed;
        }
        debug_assert!(self.colors[loc] == Color::Empty, "move on occupied point");

        self.set_stone(loc, pla);
        let opp = Color::from(pla.opp());
        for n in self.neighbors(loc) {
            if self.colors[n] == opp && self.chain_liberties(n) == 0 {
                self.remove_chain(n, &mut removed);
            }
        }
        let num_captured = removed.len();

        if num_captured == 0 {
            if self.chain_liberties(loc) == 0 {
                self.remove_chain(loc, &mut removed);
            }
        } else if num_captured == 1 {
            let own = Color::from(pla);
            let single = self.neighbors(loc).iter().all(|&n| self.colors[n] != own);
            if single && self.chain_liberties(loc) == 1 {
                self.ko_loc = Some(removed[0]);
            }
        }
        removed
    }

    /// Hash of the stone placement after `pla` plays at `loc`.
    pub fn pos_hash_after_move(&self, loc: Loc, pla: Player) -> Hash128 {
        if loc == PASS_LOC {
            return self.pos_hash;
        }
        let mut copy = self.clone();
        copy.play_move_assume_legal(loc, pla);
        copy.pos_hash
    }

    /// Recompute the stone hash from scratch.
    pub fn recompute_hash(&self) -> Hash128 {
        let mut h = Hash128::ZERO;
        for loc in self.on_board_locs() {
            if let Some(pla) = self.colors[loc].player() {
                h ^= zobrist().board[loc][pla.index()];
            }
        }
        h
    }

    pub fn num_stones(&self, pla: Player) -> usize {
        let c = Color::from(pla);
        self.on_board_locs().filter(|&loc| self.colors[loc] == c).count()
    }

    // =========================================================================
    // Area
    // =========================================================================

    /// Mark every point owned by `pla` unconditionally (Benson's algorithm):
    /// stones that can never be captured and the regions they enclose.
    fn mark_pass_alive(&self, pla: Player, out: &mut [bool; MAX_ARR_SIZE]) {
        const NONE: usize = usize::MAX;
        let own = Color::from(pla);

        let mut chain_id = vec![NONE; MAX_ARR_SIZE];
        let mut chains: Vec<Vec<Loc>> = Vec::new();
        for loc in self.on_board_locs() {
            if self.colors[loc] == own && chain_id[loc] == NONE {
                let stones = self.chain(loc);
                for &s in &stones {
                    chain_id[s] = chains.len();
                }
                chains.push(stones);
            }
        }

        struct Region {
            points: Vec<Loc>,
            bordering: Vec<usize>,
            vital_to: Vec<usize>,
        }

        let mut region_id = vec![NONE; MAX_ARR_SIZE];
        let mut regions: Vec<Region> = Vec::new();
        for start in self.on_board_locs() {
            if self.colors[start] == own || region_id[start] != NONE {
                continue;
            }
            let id = regions.len();
            let mut points = Vec::new();
            let mut bordering = Vec::new();
            let mut stack = vec![start];
            region_id[start] = id;
            while let Some(cur) = stack.pop() {
                points.push(cur);
                for n in self.neighbors(cur) {
                    let c = self.colors[n];
                    if c == Color::Wall {
                        continue;
                    }
                    if c == own {
                        if !bordering.contains(&chain_id[n]) {
                            bordering.push(chain_id[n]);
                        }
                    } else if region_id[n] == NONE {
                        region_id[n] = id;
                        stack.push(n);
                    }
                }
            }
            let empties: Vec<Loc> = points
                .iter()
                .copied()
                .filter(|&p| self.colors[p] == Color::Empty)
                .collect();
            let vital_to = if empties.is_empty() {
                Vec::new()
            } else {
                bordering
                    .iter()
                    .copied()
                    .filter(|&c| {
                        empties
                            .iter()
                            .all(|&e| self.neighbors(e).iter().any(|&n| chain_id[n] == c))
                    })
                    .collect()
            };
            regions.push(Region { points, bordering, vital_to });
        }

        let mut chain_alive = vec![true; chains.len()];
        let mut region_alive = vec![true; regions.len()];
        loop {
            let mut changed = false;
            let mut vital_count = vec![0usize; chains.len()];
            for (r, region) in regions.iter().enumerate() {
                if region_alive[r] {
                    for &c in &region.vital_to {
                        vital_count[c] += 1;
                    }
                }
            }
            for c in 0..chains.len() {
                if chain_alive[c] && vital_count[c] < 2 {
                    chain_alive[c] = false;
                    changed = true;
                }
            }
            for (r, region) in regions.iter().enumerate() {
                if region_alive[r] && region.bordering.iter().any(|&c| !chain_alive[c]) {
                    region_alive[r] = false;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        for (c, stones) in chains.iter().enumerate() {
            if chain_alive[c] {
                for &s in stones {
                    out[s] = true;
                }
            }
        }
        for (r, region) in regions.iter().enumerate() {
            if region_alive[r] && !region.bordering.is_empty() && !region.vital_to.is_empty() {
                for &p in &region.points {
                    out[p] = true;
                }
            }
        }
    }

    /// Compute the owner of every point.
    ///
    /// Pass-alive stones and the regions they enclose always count for their
    /// owner (dead stones inside included). With `non_pass_alive_stones` the
    /// remaining stones count for their own color, and with
    /// `unsafe_big_territories` any remaining empty region bordered by only
    /// one color counts for that color.
    pub fn calculate_area(
        &self,
        non_pass_alive_stones: bool,
        unsafe_big_territories: bool,
    ) -> [Color; MAX_ARR_SIZE] {
        let mut area = [Color::Empty; MAX_ARR_SIZE];
        for (i, c) in self.colors.iter().enumerate() {
            if *c == Color::Wall {
                area[i] = Color::Wall;
            }
        }
        for pla in Player::BOTH {
            let mut alive = [false; MAX_ARR_SIZE];
            self.mark_pass_alive(pla, &mut alive);
            for loc in self.on_board_locs() {
                if alive[loc] && area[loc] == Color::Empty {
                    area[loc] = Color::from(pla);
                }
            }
        }

        if non_pass_alive_stones {
            for loc in self.on_board_locs() {
                if area[loc] == Color::Empty && self.colors[loc] != Color::Empty {
                    area[loc] = self.colors[loc];
                }
            }
        }

        if unsafe_big_territories {
            let mut visited = [false; MAX_ARR_SIZE];
            for start in self.on_board_locs() {
                if visited[start] || area[start] != Color::Empty || self.colors[start] != Color::Empty {
                    continue;
                }
                let mut region = Vec::new();
                let mut borders_black = false;
                let mut borders_white = false;
                let mut stack = vec![start];
                visited[start] = true;
                while let Some(cur) = stack.pop() {
                    region.push(cur);
                    for n in self.neighbors(cur) {
                        match self.colors[n] {
                            Color::Black => borders_black = true,
                            Color::White => borders_white = true,
                            Color::Empty if !visited[n] && area[n] == Color::Empty => {
                                visited[n] = true;
                                stack.push(n);
                            }
                            _ => {}
                        }
                    }
                }
                let owner = match (borders_black, borders_white) {
                    (true, false) => Color::Black,
                    (false, true) => Color::White,
                    _ => continue,
                };
                for p in region {
                    area[p] = owner;
                }
            }
        }
        area
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  ")?;
        for x in 0..self.x_size {
            write!(f, " {}", COLUMN_CHARS[x] as char)?;
        }
        writeln!(f)?;
        for y in 0..self.y_size {
            write!(f, "{:>2}", self.y_size - y)?;
            for x in 0..self.x_size {
                write!(f, " {}", self.colors[self.loc(x, y)].to_char())?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "HASH: {}", self.pos_hash)?;
        write!(f, "{self}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_board_is_empty() {
        let board = Board::new(9, 9).unwrap();
        assert_eq!(board.on_board_locs().count(), 81);
        assert!(board.on_board_locs().all(|loc| board.get(loc) == Color::Empty));
        assert_eq!(board.pos_hash, Hash128::ZERO);
        assert!(!board.is_on_board(PASS_LOC));
    }

    #[test]
    fn test_bad_sizes_rejected() {
        assert!(matches!(Board::new(0, 9), Err(Error::Configuration(_))));
        assert!(matches!(Board::new(9, MAX_LEN + 1), Err(Error::Configuration(_))));
        assert!(Board::new(MAX_LEN, MAX_LEN).is_ok());
    }

    #[test]
    fn test_loc_roundtrip() {
        let board = Board::new(7, 5).unwrap();
        for y in 0..5 {
            for x in 0..7 {
                let loc = board.loc(x, y);
                assert_eq!(board.loc_x(loc), x);
                assert_eq!(board.loc_y(loc), y);
                assert!(board.is_on_board(loc));
                assert_eq!(board.parse_loc(&board.loc_to_string(loc)), Some(loc));
            }
        }
        assert_eq!(board.loc_to_string(board.loc(0, 0)), "A5");
        assert_eq!(board.parse_loc("pass"), Some(PASS_LOC));
        assert_eq!(board.parse_loc("H1"), None);
    }

    #[test]
    fn test_edges_are_walls() {
        let board = Board::new(4, 3).unwrap();
        let corner = board.loc(3, 2);
        let walls = board
            .neighbors(corner)
            .iter()
            .filter(|&&n| board.get(n) == Color::Wall)
            .count();
        assert_eq!(walls, 2);
    }

    #[test]
    fn test_capture_and_ko() {
        let mut board = Board::parse(
            4,
            4,
            "
            .xo.
            xo.o
            .xo.
            ....
            ",
        )
        .unwrap();
        let removed = board.play_move_assume_legal(board.loc(2, 1), Player::Black);
        assert_eq!(removed, vec![board.loc(1, 1)]);
        assert_eq!(board.ko_loc, Some(board.loc(1, 1)));
        assert_eq!(board.num_white_captures, 1);
        assert_eq!(board.pos_hash, board.recompute_hash());
        board.play_move_assume_legal(PASS_LOC, Player::White);
        assert_eq!(board.ko_loc, None);
    }

    #[test]
    fn test_suicide_detection() {
        let board = Board::parse(
            3,
            3,
            "
            .x.
            x.x
            ox.
            ",
        )
        .unwrap();
        let center = board.loc(1, 1);
        assert!(board.is_illegal_suicide(center, Player::White, true));
        assert!(!board.is_suicide(center, Player::Black));
        assert!(board.is_illegal_suicide(board.loc(0, 0), Player::White, true));
        assert!(board.is_suicide(board.loc(2, 2), Player::White));
        assert!(!board.is_suicide(board.loc(2, 2), Player::Black));
    }

    #[test]
    fn test_multi_stone_suicide_removes_own_chain() {
        let mut board = Board::parse(
            3,
            3,
            "
            o.x
            xxx
            ...
            ",
        )
        .unwrap();
        let loc = board.loc(1, 0);
        assert!(board.is_suicide(loc, Player::White));
        assert!(!board.is_illegal_suicide(loc, Player::White, true));
        assert!(board.is_illegal_suicide(loc, Player::White, false));
        let removed = board.play_move_assume_legal(loc, Player::White);
        assert_eq!(removed.len(), 2);
        assert_eq!(board.num_white_captures, 2);
        assert_eq!(board.pos_hash, board.recompute_hash());
    }

    #[test]
    fn test_pass_alive_area() {
        let board = Board::parse(
            5,
            5,
            "
            .o.o.
            ooooo
            xxxxx
            .....
            ..x..
            ",
        )
        .unwrap();
        let area = board.calculate_area(false, false);
        assert_eq!(area[board.loc(0, 0)], Color::White);
        assert_eq!(area[board.loc(2, 0)], Color::White);
        assert_eq!(area[board.loc(0, 2)], Color::Empty);
        assert_eq!(area[board.loc(0, 3)], Color::Empty);

        let full = board.calculate_area(true, true);
        assert_eq!(full[board.loc(0, 2)], Color::Black);
        assert_eq!(full[board.loc(4, 4)], Color::Black);
    }

    #[test]
    fn test_display_uses_column_letters() {
        let board = Board::parse(3, 2, "x.o\n...").unwrap();
        let text = board.to_string();
        assert!(text.starts_with("   A B C"));
        assert!(text.contains(" 2 X . O"));
    }
}
