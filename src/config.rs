//! Engine configuration loaded from TOML.
//!
//! ```toml
//! [rules]
//! ko_rule = "simple"
//! scoring_rule = "territory"
//! komi = 6.5
//!
//! [evaluator]
//! max_batch_size = 32
//! num_server_threads = 2
//! debug_skip_neural_net = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::constants::{MAX_CACHE_SIZE_POWER_OF_TWO, MAX_LEN, NUM_SYMMETRIES};
use crate::error::{Error, Result};
use crate::rules::{KoRule, Rules, ScoringRule};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub rules: RulesConfig,
    pub evaluator: EvaluatorConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub ko_rule: KoRule,
    pub scoring_rule: ScoringRule,
    pub multi_stone_suicide_legal: bool,
    pub komi: f32,
    pub white_bonus_per_handicap_stone: f32,
}

impl Default for RulesConfig {
    fn default() -> Self {
        let rules = Rules::default();
        RulesConfig {
            ko_rule: rules.ko_rule,
            scoring_rule: rules.scoring_rule,
            multi_stone_suicide_legal: rules.multi_stone_suicide_legal,
            komi: rules.komi,
            white_bonus_per_handicap_stone: rules.white_bonus_per_handicap_stone,
        }
    }
}

impl RulesConfig {
    pub fn to_rules(&self) -> Result<Rules> {
        let rules = Rules {
            ko_rule: self.ko_rule,
            scoring_rule: self.scoring_rule,
            multi_stone_suicide_legal: self.multi_stone_suicide_legal,
            komi: self.komi,
            white_bonus_per_handicap_stone: self.white_bonus_per_handicap_stone,
        };
        rules.validate()?;
        Ok(rules)
    }
}

/// Settings for [`crate::nneval::NNEvaluator`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Model file handed to the backend. Unused in debug mode.
    pub model_file: Option<PathBuf>,
    pub max_batch_size: usize,
    /// Side of the square the net is evaluated on; boards up to this size fit.
    pub pos_len: usize,
    pub inputs_use_nhwc: bool,
    /// `None` disables the result cache.
    pub nn_cache_size_power_of_two: Option<u32>,
    pub num_server_threads: usize,
    /// Device index per server thread; missing entries use the backend default.
    pub gpu_idx_by_server_thread: Vec<i32>,
    /// Pick a random symmetry per batch instead of `default_symmetry`.
    pub nn_randomize: bool,
    /// Seed string for per-thread randomness; empty picks a random seed.
    pub nn_rand_seed: String,
    pub default_symmetry: u32,
    /// Fabricate outputs instead of calling a backend.
    pub debug_skip_neural_net: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        EvaluatorConfig {
            model_file: None,
            max_batch_size: 16,
            pos_len: MAX_LEN,
            inputs_use_nhwc: false,
            nn_cache_size_power_of_two: Some(16),
            num_server_threads: 1,
            gpu_idx_by_server_thread: Vec::new(),
            nn_randomize: true,
            nn_rand_seed: String::new(),
            default_symmetry: 0,
            debug_skip_neural_net: false,
        }
    }
}

impl EvaluatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(Error::Configuration("max_batch_size must be at least 1".into()));
        }
        if self.pos_len == 0 || self.pos_len > MAX_LEN {
            return Err(Error::Configuration(format!(
                "pos_len {} must be within 1..={MAX_LEN}",
                self.pos_len
            )));
        }
        if let Some(p) = self.nn_cache_size_power_of_two
            && p > MAX_CACHE_SIZE_POWER_OF_TWO
        {
            return Err(Error::Configuration(format!(
                "nn_cache_size_power_of_two {p} exceeds {MAX_CACHE_SIZE_POWER_OF_TWO}"
            )));
        }
        if self.num_server_threads == 0 {
            return Err(Error::Configuration("num_server_threads must be at least 1".into()));
        }
        if self.default_symmetry >= NUM_SYMMETRIES {
            return Err(Error::Configuration(format!(
                "default_symmetry {} must be below {NUM_SYMMETRIES}",
                self.default_symmetry
            )));
        }
        if !self.debug_skip_neural_net && self.model_file.is_none() {
            return Err(Error::Configuration(
                "model_file is required unless debug_skip_neural_net is set".into(),
            ));
        }
        Ok(())
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(text).map_err(|e| Error::Configuration(e.to_string()))?;
        config.rules.to_rules()?;
        config.evaluator.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }
}
