//! client configuration and presentation timings

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{PatienceError, Result};
use crate::state::RulesVariant;

/// default game service endpoint
pub const DEFAULT_SERVER_URL: &str = "http://localhost:5000/api/game";

/// how shuffle phases advance and whether a started game plays itself
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    /// phases advance on user action, moves are made by the user
    #[default]
    Manual,
    /// phases advance on timers, a started game is handed to auto-play
    Auto,
}

/// presentation and pacing delays, in milliseconds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub fan_spread_ms: u64,
    pub closing_ms: u64,
    pub cutting_ms: u64,
    pub shuffling_ms: u64,
    pub final_fan_ms: u64,
    /// pause between batch shuffle steps
    pub batch_settle_ms: u64,

    /// wait before the first layout measurement
    pub deal_measure_delay_ms: u64,
    /// wait before the single measurement retry
    pub deal_retry_delay_ms: u64,
    pub deal_card_interval_ms: u64,
    /// longer pause after the 4th card of a pile
    pub deal_pile_pause_ms: u64,
    pub deal_settle_ms: u64,

    pub flip_animation_ms: u64,
    /// wait after a mutating call before re-reading state
    pub refresh_delay_ms: u64,

    pub autoplay_start_delay_ms: u64,
    pub autoplay_place_pace_ms: u64,
    pub autoplay_after_place_ms: u64,
    pub autoplay_flip_pace_ms: u64,
    pub autoplay_after_flip_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            fan_spread_ms: 2000,
            closing_ms: 1500,
            cutting_ms: 2000,
            shuffling_ms: 2500,
            final_fan_ms: 2000,
            batch_settle_ms: 500,
            deal_measure_delay_ms: 500,
            deal_retry_delay_ms: 500,
            deal_card_interval_ms: 700,
            deal_pile_pause_ms: 1200,
            deal_settle_ms: 2500,
            flip_animation_ms: 600,
            refresh_delay_ms: 100,
            autoplay_start_delay_ms: 3000,
            autoplay_place_pace_ms: 1500,
            autoplay_after_place_ms: 1200,
            autoplay_flip_pace_ms: 1000,
            autoplay_after_flip_ms: 1500,
        }
    }
}

impl Timings {
    /// no delays at all, for headless runs and tests
    pub fn instant() -> Self {
        Self {
            fan_spread_ms: 0,
            closing_ms: 0,
            cutting_ms: 0,
            shuffling_ms: 0,
            final_fan_ms: 0,
            batch_settle_ms: 0,
            deal_measure_delay_ms: 0,
            deal_retry_delay_ms: 0,
            deal_card_interval_ms: 0,
            deal_pile_pause_ms: 0,
            deal_settle_ms: 0,
            flip_animation_ms: 0,
            refresh_delay_ms: 0,
            autoplay_start_delay_ms: 0,
            autoplay_place_pace_ms: 0,
            autoplay_after_place_ms: 0,
            autoplay_flip_pace_ms: 0,
            autoplay_after_flip_ms: 0,
        }
    }

    pub fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }
}

/// client configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// game service base url (routes are appended)
    pub server_url: String,
    /// rules variant requested for new sessions
    pub rules: RulesVariant,
    pub mode: GameMode,
    /// request timeout, transport default when unset
    pub timeout_secs: Option<u64>,
    pub timings: Timings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.into(),
            rules: RulesVariant::Original,
            mode: GameMode::Manual,
            timeout_secs: None,
            timings: Timings::default(),
        }
    }
}

impl ClientConfig {
    /// auto mode with every delay removed
    pub fn headless() -> Self {
        Self {
            mode: GameMode::Auto,
            timings: Timings::instant(),
            ..Default::default()
        }
    }

    /// load from a json file; missing fields fall back to defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            PatienceError::InvalidArgument(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// cut point for step `i` (0-based) of a batch shuffle
pub fn batch_cut_point(step: usize) -> u8 {
    (20 + (step * 7) % 32) as u8
}
