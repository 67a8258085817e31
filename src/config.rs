use chrono::{FixedOffset, Offset, Utc};

use crate::date_util::parse_utc_offset;
use crate::error::{Error, Result};
use crate::metrics::formula::ClampPolicy;
use crate::query::partition::BucketSource;

pub const KEY_HYBRID_THRESHOLD_HOURS: &str = "hybrid_threshold_hours";
pub const KEY_UTC_OFFSET: &str = "utc_offset";
pub const KEY_NO_OPERATOR_ID: &str = "no_operator_id";
pub const KEY_EFFICIENCY_CLAMP: &str = "efficiency_clamp";
pub const KEY_PROMOTE_TODAY: &str = "promote_today";
pub const KEY_SHORT_WINDOW_SOURCE: &str = "short_window_source";

/// Every key understood by [`EngineConfig`]. Other `app_config` rows are ignored.
pub const ENGINE_KEYS: &[&str] = &[
    KEY_HYBRID_THRESHOLD_HOURS,
    KEY_UTC_OFFSET,
    KEY_NO_OPERATOR_ID,
    KEY_EFFICIENCY_CLAMP,
    KEY_PROMOTE_TODAY,
    KEY_SHORT_WINDOW_SOURCE,
];

/// Settings for one metrics query, passed explicitly to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Windows no longer than this (and not crossing midnight) skip partitioning.
    pub hybrid_threshold_hours: u32,
    /// Zone used to cut the timeline into calendar days.
    pub utc_offset: FixedOffset,
    /// Operator id meaning "nobody at this station".
    pub no_operator_id: String,
    pub efficiency_clamp: ClampPolicy,
    /// Serve today's fragments from the continuously updated rollup row.
    pub promote_today: bool,
    /// Path used for windows that skip partitioning.
    pub short_window_source: BucketSource,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hybrid_threshold_hours: 24,
            utc_offset: Utc.fix(),
            no_operator_id: "-1".to_string(),
            efficiency_clamp: ClampPolicy::None,
            promote_today: true,
            short_window_source: BucketSource::Live,
        }
    }
}

impl EngineConfig {
    /// Build a config from stored key/value pairs, falling back to defaults
    /// for keys that are absent.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Self::default();
        for (key, value) in pairs {
            if ENGINE_KEYS.contains(&key) {
                config.set(key, value)?;
            }
        }
        Ok(config)
    }

    /// Apply a single setting. Unknown keys are rejected.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            KEY_HYBRID_THRESHOLD_HOURS => {
                self.hybrid_threshold_hours = value
                    .parse()
                    .map_err(|_| Error::Config(format!("{key} must be a whole number of hours, got '{value}'")))?;
            }
            KEY_UTC_OFFSET => self.utc_offset = parse_utc_offset(value)?,
            KEY_NO_OPERATOR_ID => {
                if value.is_empty() {
                    return Err(Error::Config(format!("{key} cannot be empty")));
                }
                self.no_operator_id = value.to_string();
            }
            KEY_EFFICIENCY_CLAMP => self.efficiency_clamp = value.parse()?,
            KEY_PROMOTE_TODAY => {
                self.promote_today = match value.to_lowercase().as_str() {
                    "true" | "1" | "yes" | "on" => true,
                    "false" | "0" | "no" | "off" => false,
                    _ => return Err(Error::Config(format!("{key} must be true or false, got '{value}'"))),
                };
            }
            KEY_SHORT_WINDOW_SOURCE => self.short_window_source = value.parse()?,
            other => return Err(Error::Config(format!("unknown setting: {other}"))),
        }
        Ok(())
    }

    /// Current settings as key/value pairs, in [`ENGINE_KEYS`] order.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        vec![
            (KEY_HYBRID_THRESHOLD_HOURS.into(), self.hybrid_threshold_hours.to_string()),
            (KEY_UTC_OFFSET.into(), self.utc_offset.to_string()),
            (KEY_NO_OPERATOR_ID.into(), self.no_operator_id.clone()),
            (KEY_EFFICIENCY_CLAMP.into(), self.efficiency_clamp.to_string()),
            (KEY_PROMOTE_TODAY.into(), self.promote_today.to_string()),
            (KEY_SHORT_WINDOW_SOURCE.into(), self.short_window_source.to_string()),
        ]
    }

    pub fn zone(&self) -> &FixedOffset {
        &self.utc_offset
    }
}
