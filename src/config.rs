//! Configuration loader: merges config.toml, .env, and environment variables.

use std::path::Path;

use common::{AlertConfig, Error, SourceId};

fn parse_positive_u64(raw: &str, env_name: &str) -> Result<u64, Error> {
    let parsed = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer > 0")))?;
    if parsed == 0 {
        return Err(Error::Config(format!("{env_name} must be an integer > 0")));
    }
    Ok(parsed)
}

/// Apply environment overrides through `lookup`.
pub fn apply_env_overrides(
    config: &mut AlertConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), Error> {
    if let Some(token) = lookup("SLACK_BOT_TOKEN") {
        config.slack.bot_token = token;
    }
    if let Some(channel) = lookup("SLACK_CHANNEL") {
        config.slack.channel = channel;
    }
    if let Some(user) = lookup("YSE_USERNAME") {
        config.yse.username = user;
    }
    if let Some(password) = lookup("YSE_PASSWORD") {
        config.yse.password = password;
    }
    if let Some(url) = lookup("FIT_SERVICE_URL") {
        config.fitter.url = url;
    }
    if let Some(deployment) = lookup("ALERT_DEPLOYMENT") {
        config.deployment = deployment.trim().to_string();
    }
    if let Some(raw) = lookup("ALERT_PERIOD_SECS") {
        config.period_secs = parse_positive_u64(&raw, "ALERT_PERIOD_SECS")?;
    }
    if let Some(dir) = lookup("ALERT_STORE_DIR") {
        config.store_dir = dir.trim().into();
    }
    Ok(())
}

/// Check the config against what this invocation will actually use.
pub fn validate_config(
    config: &AlertConfig,
    sources: &[SourceId],
    post: bool,
) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    if config.deployment.trim().is_empty() {
        issues.push("deployment must not be empty".into());
    }
    if config
        .deployment
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
    {
        issues.push("deployment may only contain letters, digits, '-' and '_'".into());
    }
    if config.period_secs == 0 {
        issues.push("period_secs must be > 0".into());
    }
    if sources.is_empty() {
        issues.push("at least one source must be selected".into());
    }

    if config.alerce.lookback_days <= 0 {
        issues.push("alerce.lookback_days must be > 0".into());
    }
    if config.alerce.page_size == 0 {
        issues.push("alerce.page_size must be > 0".into());
    }
    if config.antares.lookback_days <= 0 {
        issues.push("antares.lookback_days must be > 0".into());
    }
    if config.antares.min_points > config.antares.max_points {
        issues.push("antares.min_points must be <= antares.max_points".into());
    }
    if config.antares.max_candidates == 0 {
        issues.push("antares.max_candidates must be > 0".into());
    }

    if config.fitter.url.trim().is_empty() {
        issues.push("fitter.url (FIT_SERVICE_URL) must be set".into());
    }
    if config.fitter.timeout_secs == 0 {
        issues.push("fitter.timeout_secs must be > 0".into());
    }
    if config.fitter.min_points == 0 {
        issues.push("fitter.min_points must be > 0".into());
    }

    if sources.contains(&SourceId::Yse)
        && (config.yse.username.trim().is_empty() || config.yse.password.is_empty())
    {
        issues.push("YSE_USERNAME and YSE_PASSWORD are required when yse is selected".into());
    }
    if post {
        if config.slack.bot_token.trim().is_empty() {
            issues.push("SLACK_BOT_TOKEN is required unless --no-post is given".into());
        }
        if config.slack.channel.trim().is_empty() {
            issues.push("SLACK_CHANNEL is required unless --no-post is given".into());
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Load configuration from defaults, an optional TOML file, `.env` and the
/// process environment. Validation is left to [`validate_config`].
pub fn load_config(path: Option<&Path>) -> Result<AlertConfig, Error> {
    // 1. Load .env file from project root or parent directories.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Start with defaults.
    let mut config = AlertConfig::default();

    // 3. An explicit --config must exist; the default config.toml is optional.
    let config_path = path.unwrap_or_else(|| Path::new("config.toml"));
    if config_path.exists() {
        let contents = std::fs::read_to_string(config_path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", config_path.display(), e))
        })?;
        config = toml::from_str(&contents).map_err(|e| {
            Error::Config(format!("Failed to parse {}: {}", config_path.display(), e))
        })?;
    } else if path.is_some() {
        return Err(Error::Config(format!(
            "Config file {} not found",
            config_path.display()
        )));
    }

    // 4. Environment variables win.
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;

    Ok(config)
}
