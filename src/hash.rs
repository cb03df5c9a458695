//! 128-bit Zobrist hashing.
//!
//! All tables are generated once from a fixed seed, so hashes are
//! reproducible across runs and processes.

use std::fmt;
use std::ops::{BitXor, BitXorAssign};
use std::sync::OnceLock;

use crate::constants::{MAX_ARR_SIZE, MAX_LEN, NUM_ENCORE_PHASES, NUM_HASHED_MOVES};

/// A 128-bit hash value, stored as two 64-bit halves.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Hash128 {
    pub hash0: u64,
    pub hash1: u64,
}

impl Hash128 {
    pub const ZERO: Hash128 = Hash128 { hash0: 0, hash1: 0 };

    pub const fn new(hash0: u64, hash1: u64) -> Self {
        Hash128 { hash0, hash1 }
    }

    fn random(rng: &mut fastrand::Rng) -> Self {
        Hash128::new(rng.u64(..), rng.u64(..))
    }
}

impl BitXor for Hash128 {
    type Output = Hash128;

    fn bitxor(self, rhs: Hash128) -> Hash128 {
        Hash128::new(self.hash0 ^ rhs.hash0, self.hash1 ^ rhs.hash1)
    }
}

impl BitXorAssign for Hash128 {
    fn bitxor_assign(&mut self, rhs: Hash128) {
        self.hash0 ^= rhs.hash0;
        self.hash1 ^= rhs.hash1;
    }
}

impl fmt::Display for Hash128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}{:016X}", self.hash1, self.hash0)
    }
}

/// Mix an arbitrary 64-bit value into a hash (splitmix64 finalizer per half).
pub fn hash_u64(value: u64) -> Hash128 {
    fn mix(mut z: u64) -> u64 {
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }
    Hash128::new(
        mix(value.wrapping_add(0x9e37_79b9_7f4a_7c15)),
        mix(value ^ 0x2545_f491_4f6c_dd1d),
    )
}

const ZOBRIST_SEED: u64 = 0x5a6f_6272_6973_7431;

/// Precomputed hash constants.
pub struct Zobrist {
    /// Stone hash per location, indexed by `Player::index`.
    pub board: [[Hash128; 2]; MAX_ARR_SIZE],
    /// Side-to-move hash.
    pub player: [Hash128; 2],
    /// Encore ko-prohibition mark per location and prohibited player.
    pub ko_mark: [[Hash128; 2]; MAX_ARR_SIZE],
    /// Simple ko point.
    pub ko_loc: [Hash128; MAX_ARR_SIZE],
    /// Recent move locations, by how many moves ago (0 = last move).
    pub move_loc: [[Hash128; MAX_ARR_SIZE]; NUM_HASHED_MOVES],
    /// Recent move player, by how many moves ago.
    pub move_player: [[Hash128; 2]; NUM_HASHED_MOVES],
    pub size_x: [Hash128; MAX_LEN + 1],
    pub size_y: [Hash128; MAX_LEN + 1],
    pub encore_phase: [Hash128; NUM_ENCORE_PHASES as usize + 1],
}

impl Zobrist {
    fn generate() -> Self {
        let mut rng = fastrand::Rng::with_seed(ZOBRIST_SEED);
        let mut z = Zobrist {
            board: [[Hash128::ZERO; 2]; MAX_ARR_SIZE],
            player: [Hash128::ZERO; 2],
            ko_mark: [[Hash128::ZERO; 2]; MAX_ARR_SIZE],
            ko_loc: [Hash128::ZERO; MAX_ARR_SIZE],
            move_loc: [[Hash128::ZERO; MAX_ARR_SIZE]; NUM_HASHED_MOVES],
            move_player: [[Hash128::ZERO; 2]; NUM_HASHED_MOVES],
            size_x: [Hash128::ZERO; MAX_LEN + 1],
            size_y: [Hash128::ZERO; MAX_LEN + 1],
            encore_phase: [Hash128::ZERO; NUM_ENCORE_PHASES as usize + 1],
        };
        for h in z.board.iter_mut().flatten() {
            *h = Hash128::random(&mut rng);
        }
        for h in z.player.iter_mut() {
            *h = Hash128::random(&mut rng);
        }
        for h in z.ko_mark.iter_mut().flatten() {
            *h = Hash128::random(&mut rng);
        }
        for h in z.ko_loc.iter_mut() {
            *h = Hash128::random(&mut rng);
        }
        for h in z.move_loc.iter_mut().flatten() {
            *h = Hash128::random(&mut rng);
        }
        for h in z.move_player.iter_mut().flatten() {
            *h = Hash128::random(&mut rng);
        }
        for h in z.size_x.iter_mut().chain(z.size_y.iter_mut()) {
            *h = Hash128::random(&mut rng);
        }
        for h in z.encore_phase.iter_mut() {
            *h = Hash128::random(&mut rng);
        }
        z
    }
}

static ZOBRIST: OnceLock<Box<Zobrist>> = OnceLock::new();

/// Access the process-wide Zobrist tables, generating them on first use.
pub fn zobrist() -> &'static Zobrist {
    ZOBRIST.get_or_init(|| Box::new(Zobrist::generate()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor_is_self_inverse() {
        let z = zobrist();
        let a = z.board[40][0];
        let b = z.player[1];
        let mut h = a ^ b;
        h ^= b;
        assert_eq!(h, a);
        assert_eq!(a ^ a, Hash128::ZERO);
    }

    #[test]
    fn test_tables_are_distinct() {
        let z = zobrist();
        assert_ne!(z.board[40][0], z.board[40][1]);
        assert_ne!(z.board[40][0], z.board[41][0]);
        assert_ne!(z.player[0], z.player[1]);
    }

    #[test]
    fn test_tables_are_reproducible() {
        let fresh = Zobrist::generate();
        let z = zobrist();
        assert_eq!(fresh.board[100][1], z.board[100][1]);
        assert_eq!(fresh.move_loc[3][7], z.move_loc[3][7]);
    }

    #[test]
    fn test_display_is_32_hex_digits() {
        let h = Hash128::new(1, 2);
        assert_eq!(h.to_string(), "00000000000000020000000000000001");
    }

    #[test]
    fn test_hash_u64_spreads() {
        assert_ne!(hash_u64(0), hash_u64(1));
        assert_eq!(hash_u64(15), hash_u64(15));
    }
}
