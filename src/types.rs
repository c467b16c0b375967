//! Core enums shared by the budgeting components.
//!
//! - [`Provider`]: LLM vendor family, derived from a model string
//! - [`ContextMode`]: budget-aggressiveness profile (eco / normal / full)
//! - [`FlushSeverity`]: how hard a flush trims tool results

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// LLM vendor family.
///
/// Only used to pick per-provider constants (image token cost, cache TTL),
/// never to change message shape.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[default]
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    Gemini,
}

impl Provider {
    /// Detect the provider from a model identifier.
    ///
    /// Matching is by prefix only, checked in this order:
    /// `anthropic/`, `claude`, `openai/`, `gpt`, `gemini`. Comparison is
    /// case-insensitive. Anything else falls back to [`Provider::Anthropic`],
    /// so `"my-claude-killer"` and `"my-gemini-clone"` are not recognised
    /// by name.
    #[must_use]
    pub fn from_model(model: &str) -> Self {
        let lower = model.to_ascii_lowercase();
        if lower.starts_with("anthropic/") || lower.starts_with("claude") {
            return Self::Anthropic;
        }
        if lower.starts_with("openai/") || lower.starts_with("gpt") {
            return Self::OpenAi;
        }
        // also covers the "gemini/" routing prefix
        if lower.starts_with("gemini") {
            return Self::Gemini;
        }
        Self::default()
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Budget-aggressiveness profile.
///
/// Controls both the compaction threshold and the flush severity used for
/// the summarization input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    Eco,
    #[default]
    Normal,
    Full,
}

impl ContextMode {
    pub const ALL: [Self; 3] = [Self::Eco, Self::Normal, Self::Full];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eco => "eco",
            Self::Normal => "normal",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for ContextMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eco" => Ok(Self::Eco),
            "normal" => Ok(Self::Normal),
            "full" => Ok(Self::Full),
            other => Err(ParseEnumError::new("context mode", other)),
        }
    }
}

/// How aggressively a flush trims large tool results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushSeverity {
    /// Results over 5000 chars keep 2500 head + 2500 tail.
    Soft,
    /// Results over 2000 chars keep 1000 head + 1000 tail.
    Hard,
    /// Results over 2000 chars keep only the last 200 chars.
    ExtraHard,
}

impl FlushSeverity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Soft => "soft",
            Self::Hard => "hard",
            Self::ExtraHard => "extra_hard",
        }
    }
}

impl fmt::Display for FlushSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlushSeverity {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "soft" => Ok(Self::Soft),
            "hard" => Ok(Self::Hard),
            "extra_hard" => Ok(Self::ExtraHard),
            other => Err(ParseEnumError::new("flush severity", other)),
        }
    }
}

/// Error returned when a mode or severity name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}
