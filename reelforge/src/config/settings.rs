//! Runtime settings from the environment contract.

use crate::state::Stage;
use crate::validate::{safe_bool, safe_int};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration failures. The CLI maps these to exit code 2.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Trend source credentials; absent credentials disable the stage.
#[derive(Debug, Clone)]
pub struct TrendSettings {
    pub client_id: String,
    pub client_secret: String,
    pub category: String,
    pub min_score: i64,
    pub per_tick_limit: usize,
}

/// Publication parameters, surfaced as configuration rather than constants.
#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub category_id: String,
    pub privacy: String,
    pub made_for_kids: bool,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            category_id: "22".to_string(),
            privacy: "public".to_string(),
            made_for_kids: false,
        }
    }
}

/// Complete runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Data root holding `state/`, `artifacts/`, `logs/`, `credentials/`.
    pub root: PathBuf,
    pub dashboard_url: String,
    pub dashboard_token: String,
    pub textgen_url: String,
    pub textgen_api_key: String,
    pub tts_url: String,
    pub tts_api_key: String,
    pub tts_voice: String,
    pub stock_url: String,
    pub stock_api_key: String,
    pub align_url: String,
    pub upload_url: String,
    pub upload_token: String,
    pub trend_url: String,
    pub trend: Option<TrendSettings>,
    pub publish: PublishSettings,
    /// Per-stage worker pool overrides.
    pub worker_overrides: BTreeMap<Stage, usize>,
    pub retention: Duration,
    /// Local time of the daily full production pass.
    pub daily_at: (u32, u32),
    pub ideas_per_run: usize,
    pub clips_per_item: usize,
    pub queue_capacity: usize,
    pub discovery_interval: Duration,
    pub drain_deadline: Duration,
}

impl Settings {
    /// Loads settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads settings from any key lookup; tests pass a map.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |var: &'static str| -> Result<String, ConfigError> {
            match lookup(var) {
                Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
                _ => Err(ConfigError::Missing(var)),
            }
        };
        let optional = |var: &str, default: &str| -> String {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let trend = match (
            lookup("REELFORGE_TREND_CLIENT_ID"),
            lookup("REELFORGE_TREND_CLIENT_SECRET"),
        ) {
            (Some(client_id), Some(client_secret))
                if !client_id.trim().is_empty() && !client_secret.trim().is_empty() =>
            {
                Some(TrendSettings {
                    client_id: client_id.trim().to_string(),
                    client_secret: client_secret.trim().to_string(),
                    category: optional("REELFORGE_TREND_CATEGORY", "interesting"),
                    min_score: safe_int(
                        &optional("REELFORGE_TREND_MIN_SCORE", "500"),
                        0,
                        1_000_000,
                        500,
                    ),
                    per_tick_limit: safe_int(&optional("REELFORGE_TREND_LIMIT", "5"), 1, 50, 5)
                        as usize,
                })
            }
            _ => None,
        };

        let daily_at = parse_daily_at(&optional("REELFORGE_DAILY_AT", "09:00"))?;

        let mut worker_overrides = BTreeMap::new();
        for stage in [
            Stage::Scripting,
            Stage::Narrating,
            Stage::SourcingClips,
            Stage::Assembling,
            Stage::Captioning,
            Stage::Metadata,
            Stage::Publishing,
        ] {
            let var = format!("REELFORGE_WORKERS_{}", stage.as_str().to_ascii_uppercase());
            if let Some(value) = lookup(&var) {
                let workers = safe_int(&value, 1, 32, 0);
                if workers > 0 {
                    worker_overrides.insert(stage, workers as usize);
                }
            }
        }

        let retention_days = safe_int(&optional("REELFORGE_RETENTION_DAYS", "7"), 0, 365, 7);

        Ok(Self {
            root: PathBuf::from(optional("REELFORGE_ROOT", "./data")),
            dashboard_url: required("REELFORGE_DASHBOARD_URL")?,
            dashboard_token: required("REELFORGE_DASHBOARD_TOKEN")?,
            textgen_url: optional("REELFORGE_TEXTGEN_URL", "https://api.textgen.example"),
            textgen_api_key: required("REELFORGE_TEXTGEN_API_KEY")?,
            tts_url: optional("REELFORGE_TTS_URL", "https://api.tts.example"),
            tts_api_key: required("REELFORGE_TTS_API_KEY")?,
            tts_voice: optional("REELFORGE_TTS_VOICE", "narrator"),
            stock_url: optional("REELFORGE_STOCK_URL", "https://api.stock.example"),
            stock_api_key: required("REELFORGE_STOCK_API_KEY")?,
            align_url: optional("REELFORGE_ALIGN_URL", "https://api.align.example"),
            upload_url: optional("REELFORGE_UPLOAD_URL", "https://api.upload.example"),
            upload_token: required("REELFORGE_UPLOAD_TOKEN")?,
            trend_url: optional("REELFORGE_TREND_URL", "https://api.trends.example"),
            trend,
            publish: PublishSettings {
                category_id: optional("REELFORGE_PUBLISH_CATEGORY", "22"),
                privacy: optional("REELFORGE_PUBLISH_PRIVACY", "public"),
                made_for_kids: safe_bool(&optional("REELFORGE_PUBLISH_MADE_FOR_KIDS", "false"), false),
            },
            worker_overrides,
            retention: Duration::from_secs(retention_days as u64 * 24 * 3600),
            daily_at,
            ideas_per_run: safe_int(&optional("REELFORGE_IDEAS_PER_RUN", "3"), 1, 50, 3) as usize,
            clips_per_item: safe_int(&optional("REELFORGE_CLIPS_PER_ITEM", "3"), 1, 10, 3) as usize,
            queue_capacity: safe_int(&optional("REELFORGE_QUEUE_CAPACITY", "64"), 1, 4096, 64)
                as usize,
            discovery_interval: Duration::from_secs(safe_int(
                &optional("REELFORGE_DISCOVERY_SECS", "5"),
                1,
                3600,
                5,
            ) as u64),
            drain_deadline: Duration::from_secs(safe_int(
                &optional("REELFORGE_DRAIN_SECS", "120"),
                1,
                3600,
                120,
            ) as u64),
        })
    }

    /// Worker pool size for a stage, after overrides.
    pub fn workers_for(&self, stage: Stage) -> usize {
        self.worker_overrides
            .get(&stage)
            .copied()
            .unwrap_or_else(|| crate::registry::spec(stage).workers)
    }
}

/// Parses `HH:MM` local time.
fn parse_daily_at(value: &str) -> Result<(u32, u32), ConfigError> {
    let invalid = || ConfigError::Invalid {
        var: "REELFORGE_DAILY_AT",
        reason: format!("expected HH:MM, got {:?}", value),
    };
    let (hours, minutes) = value.split_once(':').ok_or_else(invalid)?;
    let hours: u32 = hours.trim().parse().map_err(|_| invalid())?;
    let minutes: u32 = minutes.trim().parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }
    Ok((hours, minutes))
}
