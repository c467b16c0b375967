//! Configuration for context budgeting.

use crate::types::{ContextMode, Provider};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Configuration for flushing and compaction.
///
/// Every table the budgeting logic consults lives here, so tests can
/// substitute tiny values instead of patching globals.
///
/// # Example
///
/// ```
/// use agent_budget::context::BudgetConfig;
///
/// let config = BudgetConfig::default()
///     .with_max_context_tokens(100_000)
///     .with_tail_bounds(6, 12);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Context window of the model, in tokens. Must be positive.
    /// Default: 200,000
    pub max_context_tokens: usize,

    /// Prompt-cache lifetime per provider. Default: 300s everywhere.
    pub cache_ttl: ProviderTtls,

    /// Fraction of the window at which each mode compacts.
    /// Default: eco 0.40, normal 0.60, full 0.85
    pub thresholds: ModeThresholds,

    /// Context ratio above which a TTL flush uses hard instead of soft.
    /// Default: 0.4
    pub hard_flush_ratio: f64,

    /// Fewest messages preserved verbatim by a compaction. Default: 10
    pub tail_min: usize,

    /// Most messages the tail may grow to before the parity fix-up.
    /// Default: 20
    pub tail_max: usize,

    /// Token budget of the tail as a fraction of the window. Default: 0.05
    pub tail_token_ratio: f64,

    /// Sampling temperature of the summarization call. Default: 0.3
    pub summary_temperature: f32,

    /// Messages needed since the last marker before a manual compaction
    /// is allowed. Default: 60
    pub manual_compaction_min_messages: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 200_000,
            cache_ttl: ProviderTtls::default(),
            thresholds: ModeThresholds::default(),
            hard_flush_ratio: 0.4,
            tail_min: 10,
            tail_max: 20,
            tail_token_ratio: 0.05,
            summary_temperature: 0.3,
            manual_compaction_min_messages: 60,
        }
    }
}

impl BudgetConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_max_context_tokens(mut self, tokens: usize) -> Self {
        self.max_context_tokens = tokens;
        self
    }

    #[must_use]
    pub const fn with_cache_ttl(mut self, ttl: ProviderTtls) -> Self {
        self.cache_ttl = ttl;
        self
    }

    #[must_use]
    pub const fn with_thresholds(mut self, thresholds: ModeThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    #[must_use]
    pub const fn with_tail_bounds(mut self, min: usize, max: usize) -> Self {
        self.tail_min = min;
        self.tail_max = max;
        self
    }

    #[must_use]
    pub const fn with_tail_token_ratio(mut self, ratio: f64) -> Self {
        self.tail_token_ratio = ratio;
        self
    }

    #[must_use]
    pub const fn with_manual_compaction_min_messages(mut self, count: usize) -> Self {
        self.manual_compaction_min_messages = count;
        self
    }

    /// Token count at which `mode` compacts.
    #[must_use]
    pub fn compaction_threshold(&self, mode: ContextMode) -> f64 {
        self.thresholds.get(mode) * self.max_context_tokens as f64
    }

    /// Token budget available to the tail.
    #[must_use]
    pub fn tail_token_budget(&self) -> usize {
        (self.max_context_tokens as f64 * self.tail_token_ratio) as usize
    }

    /// Check the configuration.
    ///
    /// # Errors
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), BudgetConfigError> {
        if self.max_context_tokens == 0 {
            return Err(BudgetConfigError::NonPositiveContextWindow);
        }
        for mode in ContextMode::ALL {
            let value = self.thresholds.get(mode);
            if !is_unit_fraction(value) {
                return Err(BudgetConfigError::InvalidThreshold { mode, value });
            }
        }
        if self.tail_min == 0 || self.tail_min > self.tail_max {
            return Err(BudgetConfigError::InvalidTailBounds {
                min: self.tail_min,
                max: self.tail_max,
            });
        }
        if !is_unit_fraction(self.tail_token_ratio) {
            return Err(BudgetConfigError::InvalidRatio {
                name: "tail_token_ratio",
                value: self.tail_token_ratio,
            });
        }
        if !is_unit_fraction(self.hard_flush_ratio) {
            return Err(BudgetConfigError::InvalidRatio {
                name: "hard_flush_ratio",
                value: self.hard_flush_ratio,
            });
        }
        Ok(())
    }
}

fn is_unit_fraction(value: f64) -> bool {
    value > 0.0 && value <= 1.0
}

/// Prompt-cache TTL per provider, in seconds.
///
/// Uniform today; kept per provider so the values can diverge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderTtls {
    pub anthropic: u64,
    pub openai: u64,
    pub gemini: u64,
}

impl Default for ProviderTtls {
    fn default() -> Self {
        Self {
            anthropic: 300,
            openai: 300,
            gemini: 300,
        }
    }
}

impl ProviderTtls {
    #[must_use]
    pub const fn get(&self, provider: Provider) -> Duration {
        let secs = match provider {
            Provider::Anthropic => self.anthropic,
            Provider::OpenAi => self.openai,
            Provider::Gemini => self.gemini,
        };
        Duration::from_secs(secs)
    }
}

/// Compaction threshold per context mode, as a fraction of the window.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeThresholds {
    pub eco: f64,
    pub normal: f64,
    pub full: f64,
}

impl Default for ModeThresholds {
    fn default() -> Self {
        Self {
            eco: 0.40,
            normal: 0.60,
            full: 0.85,
        }
    }
}

impl ModeThresholds {
    #[must_use]
    pub const fn get(&self, mode: ContextMode) -> f64 {
        match mode {
            ContextMode::Eco => self.eco,
            ContextMode::Normal => self.normal,
            ContextMode::Full => self.full,
        }
    }
}

/// Invalid budgeting configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetConfigError {
    NonPositiveContextWindow,
    InvalidThreshold { mode: ContextMode, value: f64 },
    InvalidTailBounds { min: usize, max: usize },
    InvalidRatio { name: &'static str, value: f64 },
}

impl fmt::Display for BudgetConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPositiveContextWindow => write!(f, "max_context_tokens must be positive"),
            Self::InvalidThreshold { mode, value } => {
                write!(f, "compaction threshold for {mode} must be in (0, 1], got {value}")
            }
            Self::InvalidTailBounds { min, max } => {
                write!(f, "tail bounds must satisfy 0 < tail_min <= tail_max, got {min}..{max}")
            }
            Self::InvalidRatio { name, value } => {
                write!(f, "{name} must be in (0, 1], got {value}")
            }
        }
    }
}

impl std::error::Error for BudgetConfigError {}
