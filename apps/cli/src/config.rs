use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use cburn_core::PricingOverride;
use serde::{Deserialize, Serialize};

/// User configuration loaded from `<config dir>/cburn/config.toml`.
/// Missing files yield defaults; CLI flags override everything here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub budget: BudgetConfig,
    pub pricing: PricingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub default_days: i64,
    pub include_subagents: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claude_dir: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_days: 30,
            include_subagents: true,
            claude_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monthly_usd: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub overrides: HashMap<String, PricingOverride>,
}

pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME")
        && !xdg.is_empty()
    {
        return PathBuf::from(xdg).join("cburn");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config").join("cburn");
    }
    PathBuf::from(".config").join("cburn")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

pub fn load() -> anyhow::Result<Config> {
    let path = config_path();
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(err) => return Err(anyhow::anyhow!("reading {}: {err}", path.display())),
    };
    toml::from_str(&contents).map_err(|err| anyhow::anyhow!("parsing {}: {err}", path.display()))
}
