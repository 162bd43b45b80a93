//! Configuration for timeline grouping and summaries.
//!
//! Loaded from a TOML file; every field has a default, and a missing file
//! means "all defaults", so a fresh checkout needs no configuration at all.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaitConfig {
    #[serde(default)]
    pub timeline: TimelineConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
}

impl Default for PlaitConfig {
    fn default() -> Self {
        Self {
            timeline: TimelineConfig::default(),
            summary: SummaryConfig::default(),
        }
    }
}

/// Change-grouping knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineConfig {
    /// Maximum gap between consecutive changes of one author before a new
    /// group starts, in microseconds.
    #[serde(default = "default_group_gap_us")]
    pub group_gap_us: i64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            group_gap_us: default_group_gap_us(),
        }
    }
}

/// Summarizer knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryConfig {
    /// When `false`, the summarizer is never consulted and fallback
    /// summaries are always shown.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

fn default_group_gap_us() -> i64 {
    60_000_000 // 60 seconds
}

fn default_true() -> bool {
    true
}

/// Load configuration from a TOML file.
///
/// A missing file yields the defaults; a present-but-invalid file is an
/// error (silently ignoring a typo'd config is worse than failing).
///
/// # Errors
///
/// Returns an error when the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<PlaitConfig> {
    if !path.exists() {
        return Ok(PlaitConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    toml::from_str(&raw)
        .with_context(|| format!("failed to parse config at {}", path.display()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
