use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::plans::PlanCatalog;
use crate::usage::DEFAULT_COUNTER_TTL_SECS;

#[derive(Debug, Clone)]
pub struct GovernorConfig {
    pub server_host: String,
    pub server_port: u16,
    pub data_dir: PathBuf,
    pub plans_file: Option<PathBuf>,
    pub usage_counter_ttl_secs: u64,
    pub credit_reset_check_secs: u64,
    pub enable_credit_auto_reset: bool,
    pub request_timeout_secs: u64,
    pub log_level: String,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 8190,
            data_dir: PathBuf::from("data/governor"),
            plans_file: None,
            usage_counter_ttl_secs: DEFAULT_COUNTER_TTL_SECS,
            credit_reset_check_secs: 3600,
            enable_credit_auto_reset: true,
            request_timeout_secs: 30,
            log_level: "info".to_string(),
        }
    }
}

impl GovernorConfig {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Ok(host) = env::var("GOVERNOR_HOST") {
            cfg.server_host = host;
        }
        if let Ok(port) = env::var("GOVERNOR_PORT") {
            cfg.server_port = port.parse().context("GOVERNOR_PORT must be a valid u16")?;
        }
        if let Ok(dir) = env::var("GOVERNOR_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Ok(file) = env::var("GOVERNOR_PLANS_FILE") {
            cfg.plans_file = Some(PathBuf::from(file));
        }
        if let Ok(ttl) = env::var("USAGE_COUNTER_TTL_SECS") {
            cfg.usage_counter_ttl_secs = ttl
                .parse()
                .context("USAGE_COUNTER_TTL_SECS must be a positive integer")?;
        }
        if let Ok(interval) = env::var("CREDIT_RESET_CHECK_SECS") {
            cfg.credit_reset_check_secs = interval
                .parse()
                .context("CREDIT_RESET_CHECK_SECS must be a positive integer")?;
        }
        if let Ok(flag) = env::var("ENABLE_CREDIT_AUTO_RESET") {
            cfg.enable_credit_auto_reset = parse_bool(&flag)
                .with_context(|| format!("ENABLE_CREDIT_AUTO_RESET is invalid: {flag}"))?;
        }
        if let Ok(timeout) = env::var("GOVERNOR_REQUEST_TIMEOUT_SECS") {
            cfg.request_timeout_secs = timeout
                .parse()
                .context("GOVERNOR_REQUEST_TIMEOUT_SECS must be a positive integer")?;
        }
        if let Ok(level) = env::var("LOG_LEVEL") {
            cfg.log_level = level;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure_directory(&self.data_dir)?;

        if self.usage_counter_ttl_secs == 0 {
            anyhow::bail!("USAGE_COUNTER_TTL_SECS must be greater than zero");
        }
        if self.credit_reset_check_secs == 0 {
            anyhow::bail!("CREDIT_RESET_CHECK_SECS must be greater than zero");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("GOVERNOR_REQUEST_TIMEOUT_SECS must be greater than zero");
        }
        if let Some(file) = &self.plans_file {
            if !file.is_file() {
                anyhow::bail!("plan file {} does not exist", file.display());
            }
        }

        Ok(())
    }

    /// Plan table from `GOVERNOR_PLANS_FILE`, or the built-in tiers.
    pub fn load_plans(&self) -> Result<PlanCatalog> {
        match &self.plans_file {
            Some(path) => PlanCatalog::from_file(path),
            None => Ok(PlanCatalog::default()),
        }
    }
}

fn ensure_directory(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            anyhow::bail!("{} exists but is not a directory", path.display());
        }
    } else {
        fs::create_dir_all(path)
            .with_context(|| format!("unable to create data directory {}", path.display()))?;
    }
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => anyhow::bail!("invalid boolean value {value}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("YES").unwrap());
        assert!(parse_bool("1").unwrap());
        assert!(!parse_bool("n").unwrap());
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn validate_creates_data_dir() {
        let root = tempfile::tempdir().unwrap();
        let cfg = GovernorConfig {
            data_dir: root.path().join("nested/governor"),
            ..GovernorConfig::default()
        };
        cfg.validate().unwrap();
        assert!(cfg.data_dir.is_dir());
    }

    #[test]
    fn validate_rejects_zero_intervals_and_missing_plan_file() {
        let root = tempfile::tempdir().unwrap();
        let base = GovernorConfig {
            data_dir: root.path().to_path_buf(),
            ..GovernorConfig::default()
        };

        let zero_ttl = GovernorConfig {
            usage_counter_ttl_secs: 0,
            ..base.clone()
        };
        assert!(zero_ttl.validate().is_err());

        let zero_interval = GovernorConfig {
            credit_reset_check_secs: 0,
            ..base.clone()
        };
        assert!(zero_interval.validate().is_err());

        let missing_plans = GovernorConfig {
            plans_file: Some(root.path().join("plans.json")),
            ..base
        };
        assert!(missing_plans.validate().is_err());
    }

    #[test]
    fn default_plans_include_free_tier() {
        let catalog = GovernorConfig::default().load_plans().unwrap();
        assert!(catalog.plan_names().contains(&"free"));
    }
}
