//! Slot and orchestrator configuration.
//!
//! [`SlotConfig`] is what the caller hands to a slot; it deserializes from the
//! registry records the admin side stores (`{ "position", "adCode",
//! "isActive" }`). [`OrchestratorConfig`] carries the timing knobs shared by
//! every slot and can be loaded from the environment.

use crate::render::PlaceholderReason;
use anyhow::{Context as _, Result};
use core::time::Duration;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// One advertisement slot as configured by the caller.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SlotConfig {
    /// Where on the page the slot sits (`header`, `sidebar`, ...).
    pub position: String,
    /// Third-party markup, scripts included.
    #[serde(default, rename = "adCode")]
    pub raw_markup: Option<String>,
    #[serde(default = "default_active", rename = "isActive")]
    pub active: bool,
}

const fn default_active() -> bool {
    true
}

impl SlotConfig {
    /// An active slot with no markup.
    #[must_use]
    pub fn new(position: impl Into<String>) -> Self {
        Self {
            position: position.into(),
            raw_markup: None,
            active: true,
        }
    }

    #[must_use]
    pub fn with_markup(mut self, markup: impl Into<String>) -> Self {
        self.raw_markup = Some(markup.into());
        self
    }

    #[must_use]
    pub const fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// The markup to inject, if there is anything to inject.
    ///
    /// Blank markup counts as no markup.
    pub fn markup(&self) -> Option<&str> {
        self.raw_markup
            .as_deref()
            .filter(|markup| !markup.trim().is_empty())
    }

    /// Why this slot shows a placeholder instead of an ad, if it does.
    ///
    /// Missing markup wins over an inactive flag.
    pub fn placeholder_reason(&self) -> Option<PlaceholderReason> {
        if self.markup().is_none() {
            Some(PlaceholderReason::NoMarkupConfigured)
        } else if !self.active {
            Some(PlaceholderReason::SlotInactive)
        } else {
            None
        }
    }
}

/// Parse a JSON array of slot records.
///
/// # Errors
/// Returns an error if the text is not a JSON array of slot records.
pub fn parse_registry(json: &str) -> Result<Vec<SlotConfig>> {
    serde_json::from_str(json).context("Failed to parse slot registry")
}

/// Read a slot registry file.
///
/// # Errors
/// Returns an error if the file cannot be read or does not parse.
pub fn load_registry(path: &Path) -> Result<Vec<SlotConfig>> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read slot registry {}", path.display()))?;
    parse_registry(&json)
}

/// Timing shared by every slot.
#[derive(Clone, Debug, PartialEq)]
pub struct OrchestratorConfig {
    /// Intersection ratio at which a slot counts as visible, in `(0, 1]`.
    pub visibility_threshold: f64,
    /// How long to wait for visibility before loading anyway.
    pub fallback_delay_ms: u64,
    /// Upper bound on waiting for external scripts, measured from pass start.
    pub completion_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::new(0.1, 1000, 5000)
    }
}

impl OrchestratorConfig {
    /// Construct a config, replacing out-of-range values.
    ///
    /// A threshold outside `(0, 1]` falls back to `0.1`; a zero timeout becomes
    /// one millisecond.
    #[inline]
    #[must_use]
    pub const fn new(visibility_threshold: f64, fallback_delay_ms: u64, completion_timeout_ms: u64) -> Self {
        let threshold = if visibility_threshold.is_nan()
            || visibility_threshold <= 0.0
            || visibility_threshold > 1.0
        {
            0.1
        } else {
            visibility_threshold
        };
        let timeout = if completion_timeout_ms < 1 {
            1
        } else {
            completion_timeout_ms
        };
        Self {
            visibility_threshold: threshold,
            fallback_delay_ms,
            completion_timeout_ms: timeout,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `AD_SLOT_THRESHOLD`: visibility threshold (default: 0.1)
    /// - `AD_SLOT_FALLBACK_MS`: fallback delay in milliseconds (default: 1000)
    /// - `AD_SLOT_TIMEOUT_MS`: completion timeout in milliseconds (default: 5000)
    ///
    /// Unparseable values are ignored.
    #[inline]
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let threshold = env::var("AD_SLOT_THRESHOLD")
            .ok()
            .and_then(|val| val.trim().parse::<f64>().ok())
            .unwrap_or(defaults.visibility_threshold);
        let fallback_ms = env::var("AD_SLOT_FALLBACK_MS")
            .ok()
            .and_then(|val| val.trim().parse::<u64>().ok())
            .unwrap_or(defaults.fallback_delay_ms);
        let timeout_ms = env::var("AD_SLOT_TIMEOUT_MS")
            .ok()
            .and_then(|val| val.trim().parse::<u64>().ok())
            .unwrap_or(defaults.completion_timeout_ms);
        Self::new(threshold, fallback_ms, timeout_ms)
    }

    #[inline]
    #[must_use]
    pub const fn fallback_delay(&self) -> Duration {
        Duration::from_millis(self.fallback_delay_ms)
    }

    #[inline]
    #[must_use]
    pub const fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }
}
