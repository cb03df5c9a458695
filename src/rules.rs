//! Rule sets: ko rule, scoring rule, suicide and komi.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::constants::MAX_KOMI;
use crate::error::{Error, Result};

/// How repetition is restricted.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KoRule {
    /// Only immediate recapture of a single-stone ko is banned.
    Simple,
    /// No whole-board position may repeat.
    Positional,
    /// No whole-board position may repeat with the same player to move.
    Situational,
    /// Positional superko, but passes lift the ban and repeated positions
    /// after a pass end the phase.
    Spight,
}

/// How the final score is counted.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringRule {
    Area,
    Territory,
}

impl KoRule {
    pub fn index(self) -> usize {
        self as usize
    }
}

impl ScoringRule {
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for KoRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KoRule::Simple => "SIMPLE",
            KoRule::Positional => "POSITIONAL",
            KoRule::Situational => "SITUATIONAL",
            KoRule::Spight => "SPIGHT",
        };
        f.write_str(s)
    }
}

impl FromStr for KoRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SIMPLE" => Ok(KoRule::Simple),
            "POSITIONAL" => Ok(KoRule::Positional),
            "SITUATIONAL" => Ok(KoRule::Situational),
            "SPIGHT" => Ok(KoRule::Spight),
            _ => Err(Error::Configuration(format!("unknown ko rule '{s}'"))),
        }
    }
}

impl fmt::Display for ScoringRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoringRule::Area => f.write_str("AREA"),
            ScoringRule::Territory => f.write_str("TERRITORY"),
        }
    }
}

impl FromStr for ScoringRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AREA" => Ok(ScoringRule::Area),
            "TERRITORY" => Ok(ScoringRule::Territory),
            _ => Err(Error::Configuration(format!("unknown scoring rule '{s}'"))),
        }
    }
}

/// Whether `komi` is finite, in range, and an integer or half-integer.
pub fn komi_is_valid(komi: f32) -> bool {
    komi.is_finite() && komi.abs() <= MAX_KOMI && (komi * 2.0).fract() == 0.0
}

/// A complete rule set. Immutable per game except for komi.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Rules {
    pub ko_rule: KoRule,
    pub scoring_rule: ScoringRule,
    pub multi_stone_suicide_legal: bool,
    pub komi: f32,
    /// Points white receives per black handicap stone on the initial board.
    pub white_bonus_per_handicap_stone: f32,
}

impl Default for Rules {
    fn default() -> Self {
        Rules {
            ko_rule: KoRule::Positional,
            scoring_rule: ScoringRule::Area,
            multi_stone_suicide_legal: true,
            komi: 7.5,
            white_bonus_per_handicap_stone: 0.0,
        }
    }
}

impl Rules {
    pub fn new(
        ko_rule: KoRule,
        scoring_rule: ScoringRule,
        multi_stone_suicide_legal: bool,
        komi: f32,
    ) -> Result<Self> {
        let rules = Rules {
            ko_rule,
            scoring_rule,
            multi_stone_suicide_legal,
            komi,
            white_bonus_per_handicap_stone: 0.0,
        };
        rules.validate()?;
        Ok(rules)
    }

    /// Check komi and the handicap bonus.
    pub fn validate(&self) -> Result<()> {
        if !komi_is_valid(self.komi) {
            return Err(Error::Configuration(format!(
                "komi {} must be an integer or half-integer within [-{MAX_KOMI}, {MAX_KOMI}]",
                self.komi
            )));
        }
        let bonus = self.white_bonus_per_handicap_stone;
        if !bonus.is_finite() || !(0.0..=1.0).contains(&bonus) {
            return Err(Error::Configuration(format!(
                "white bonus per handicap stone {bonus} must be within [0, 1]"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Rules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ko {} score {} sui {} komi {}",
            self.ko_rule, self.scoring_rule, self.multi_stone_suicide_legal, self.komi
        )
    }
}
