//! Pipeline configuration types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Deployment name; keeps dedup state and journals of test and
    /// production runs apart.
    #[serde(default = "default_deployment")]
    pub deployment: String,

    /// Directory holding the dedup store file.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Seconds between run starts.
    #[serde(default = "default_period")]
    pub period_secs: u64,

    #[serde(default)]
    pub alerce: AlerceConfig,

    #[serde(default)]
    pub antares: AntaresConfig,

    #[serde(default)]
    pub yse: YseConfig,

    #[serde(default)]
    pub fitter: FitterConfig,

    #[serde(default)]
    pub slack: SlackConfig,
}

/// ALeRCE query parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlerceConfig {
    #[serde(default = "default_alerce_url")]
    pub base_url: String,
    #[serde(default = "default_classifier")]
    pub classifier: String,
    #[serde(default = "default_class_name")]
    pub class_name: String,
    /// Only objects first detected within this many days.
    #[serde(default = "default_lookback")]
    pub lookback_days: i64,
    #[serde(default = "default_alerce_page_size")]
    pub page_size: u32,
}

/// ANTARES loci search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntaresConfig {
    #[serde(default = "default_antares_url")]
    pub base_url: String,
    #[serde(default = "default_lookback")]
    pub lookback_days: i64,
    #[serde(default = "default_antares_min_points")]
    pub min_points: u32,
    #[serde(default = "default_antares_max_points")]
    pub max_points: u32,
    /// Per-run cap on loci pulled.
    #[serde(default = "default_antares_cap")]
    pub max_candidates: usize,
}

/// YSE-PZ access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YseConfig {
    #[serde(default = "default_yse_url")]
    pub base_url: String,
    /// Saved explorer query listing young, fast transients.
    #[serde(default = "default_yse_query_id")]
    pub query_id: u32,
    #[serde(default = "default_yse_min_detections")]
    pub min_detections: u32,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Remote SALT3 fit service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitterConfig {
    #[serde(default = "default_fitter_url")]
    pub url: String,
    #[serde(default = "default_fitter_timeout")]
    pub timeout_secs: u64,
    /// Fewer usable points than this fails with `InsufficientData`.
    #[serde(default = "default_min_fit_points")]
    pub min_points: usize,
}

/// Slack delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    #[serde(default = "default_slack_url")]
    pub api_url: String,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub channel: String,
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_deployment() -> String {
    "production".into()
}
fn default_store_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_period() -> u64 {
    86_400
}
fn default_lookback() -> i64 {
    7
}

fn default_alerce_url() -> String {
    "https://api.alerce.online/ztf/v1".into()
}
fn default_classifier() -> String {
    "lc_classifier".into()
}
fn default_class_name() -> String {
    "SNIa".into()
}
fn default_alerce_page_size() -> u32 {
    50
}

fn default_antares_url() -> String {
    "https://api.antares.noirlab.edu/v1".into()
}
fn default_antares_min_points() -> u32 {
    4
}
fn default_antares_max_points() -> u32 {
    100
}
fn default_antares_cap() -> usize {
    50
}

fn default_yse_url() -> String {
    "https://ziggy.ucolick.org/yse".into()
}
fn default_yse_query_id() -> u32 {
    254
}
fn default_yse_min_detections() -> u32 {
    5
}

fn default_fitter_url() -> String {
    "http://127.0.0.1:8790/fit".into()
}
fn default_fitter_timeout() -> u64 {
    60
}
fn default_min_fit_points() -> usize {
    5
}

fn default_slack_url() -> String {
    "https://slack.com/api".into()
}

impl Default for AlerceConfig {
    fn default() -> Self {
        Self {
            base_url: default_alerce_url(),
            classifier: default_classifier(),
            class_name: default_class_name(),
            lookback_days: default_lookback(),
            page_size: default_alerce_page_size(),
        }
    }
}

impl Default for AntaresConfig {
    fn default() -> Self {
        Self {
            base_url: default_antares_url(),
            lookback_days: default_lookback(),
            min_points: default_antares_min_points(),
            max_points: default_antares_max_points(),
            max_candidates: default_antares_cap(),
        }
    }
}

impl Default for YseConfig {
    fn default() -> Self {
        Self {
            base_url: default_yse_url(),
            query_id: default_yse_query_id(),
            min_detections: default_yse_min_detections(),
            username: String::new(),
            password: String::new(),
        }
    }
}

impl Default for FitterConfig {
    fn default() -> Self {
        Self {
            url: default_fitter_url(),
            timeout_secs: default_fitter_timeout(),
            min_points: default_min_fit_points(),
        }
    }
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            api_url: default_slack_url(),
            bot_token: String::new(),
            channel: String::new(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            deployment: default_deployment(),
            store_dir: default_store_dir(),
            period_secs: default_period(),
            alerce: AlerceConfig::default(),
            antares: AntaresConfig::default(),
            yse: YseConfig::default(),
            fitter: FitterConfig::default(),
            slack: SlackConfig::default(),
        }
    }
}

impl AlertConfig {
    /// Per-deployment dedup store file.
    pub fn store_path(&self) -> PathBuf {
        self.store_dir
            .join(format!("posted-{}.db", self.deployment.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let cfg: AlertConfig = serde_json::from_str(r#"{"deployment": "staging"}"#).unwrap();
        assert_eq!(cfg.deployment, "staging");
        assert_eq!(cfg.period_secs, 86_400);
        assert_eq!(cfg.antares.max_candidates, 50);
        assert_eq!(cfg.yse.query_id, 254);
    }

    #[test]
    fn test_store_path_is_per_deployment() {
        let mut cfg = AlertConfig::default();
        cfg.store_dir = PathBuf::from("/var/lib/alerts");
        assert_eq!(cfg.store_path(), PathBuf::from("/var/lib/alerts/posted-production.db"));
        cfg.deployment = "test".into();
        assert_eq!(cfg.store_path(), PathBuf::from("/var/lib/alerts/posted-test.db"));
    }
}
