use anyhow::Result;
use clap::Parser;
use serde::Deserialize;
use serde_yaml;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::bus;
use crate::model::DEFAULT_PROJECT;
use crate::summarize::{DEFAULT_ENDPOINT, DEFAULT_MODEL};
use crate::validation::MAX_TEXT_CHARS;

#[derive(Parser, Debug)]
#[command(name = "marginalia")]
#[command(about = "Runs the marginalia capture service", long_about = None)]
pub struct Cli {
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<String>,
}

pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".marginalia")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct App {
    database: String,
    port: i32,
    /// Signed in at startup when set and non-empty.
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    /// Browser origins allowed to call the service, e.g. the extension's
    /// `chrome-extension://<id>`. Requests carrying any other `Origin` are refused.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub turso_url: Option<String>,
    #[serde(default)]
    pub turso_auth_token: Option<String>,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_seconds: u64,
}

fn default_sync_interval() -> u64 {
    60
}

impl App {
    pub fn get_db(&self) -> &str {
        &self.database
    }

    pub fn get_port(&self) -> i32 {
        self.port
    }

    pub fn get_user(&self) -> Option<&str> {
        self.user.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }

    pub fn get_project(&self) -> &str {
        self.project
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PROJECT)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Capture {
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
}

fn default_max_text_chars() -> usize {
    MAX_TEXT_CHARS
}

impl Default for Capture {
    fn default() -> Self {
        Self {
            max_text_chars: default_max_text_chars(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimit {
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
}

fn default_max_requests() -> usize {
    50
}

fn default_window_seconds() -> u64 {
    60
}

impl RateLimit {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_seconds: default_window_seconds(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusConfig {
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

fn default_bus_capacity() -> usize {
    bus::DEFAULT_CAPACITY
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SummaryMode {
    #[default]
    Demo,
    Remote,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummarizeConfig {
    #[serde(default)]
    pub mode: SummaryMode,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_summary_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_summary_model")]
    pub model: String,
    #[serde(default = "default_summary_max_requests")]
    pub max_requests: usize,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
}

fn default_summary_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_summary_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_summary_max_requests() -> usize {
    10
}

impl SummarizeConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self {
            mode: SummaryMode::default(),
            api_key: None,
            endpoint: default_summary_endpoint(),
            model: default_summary_model(),
            max_requests: default_summary_max_requests(),
            window_seconds: default_window_seconds(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub capture: Capture,
    #[serde(default)]
    pub rate_limit: RateLimit,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub summarize: SummarizeConfig,
}

impl Config {
    pub fn new(path: &str) -> Result<Self> {
        let cfg = Config::load_config(path)?;
        Ok(cfg)
    }

    fn load_config(path: &str) -> Result<Config> {
        let yaml_str = fs::read_to_string(path)?;
        Config::parse(&yaml_str)
    }

    pub fn parse(yaml_str: &str) -> Result<Config> {
        let yaml_with_env = Config::substitute_env_vars(yaml_str)?;
        let config: Config = serde_yaml::from_str(&yaml_with_env)?;
        Ok(config)
    }

    fn substitute_env_vars(yaml_str: &str) -> Result<String> {
        let mut result = yaml_str.to_string();
        let mut offset = 0;

        while let Some(start) = result[offset..].find("${") {
            let actual_start = offset + start;
            if let Some(end) = result[actual_start..].find("}") {
                let var_name = &result[actual_start + 2..actual_start + end];

                // ${VAR:-default}
                let env_value = if let Some(default_start) = var_name.find(":-") {
                    let actual_var = &var_name[..default_start];
                    let default_val = &var_name[default_start + 2..];
                    env::var(actual_var).unwrap_or_else(|_| default_val.to_string())
                } else {
                    env::var(var_name).unwrap_or_else(|_| {
                        tracing::warn!("environment variable '{}' not found", var_name);
                        String::new()
                    })
                };

                result.replace_range(actual_start..actual_start + end + 1, &env_value);
                offset = actual_start + env_value.len();
            } else {
                break;
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_sections_default() {
        let cfg = Config::parse(
            r#"
app:
  database: marginalia.db
  port: 7878
"#,
        )
        .unwrap();

        assert_eq!(cfg.app.get_db(), "marginalia.db");
        assert_eq!(cfg.app.get_port(), 7878);
        assert_eq!(cfg.app.get_user(), None);
        assert_eq!(cfg.capture.max_text_chars, MAX_TEXT_CHARS);
        assert_eq!(cfg.rate_limit.max_requests, 50);
        assert_eq!(cfg.rate_limit.window(), Duration::from_secs(60));
        assert_eq!(cfg.bus.capacity, bus::DEFAULT_CAPACITY);
        assert_eq!(cfg.app.get_project(), DEFAULT_PROJECT);
        assert!(cfg.app.allowed_origins.is_empty());
        assert_eq!(cfg.summarize.mode, SummaryMode::Demo);
        assert_eq!(cfg.summarize.max_requests, 10);
        assert_eq!(cfg.summarize.window(), Duration::from_secs(60));
    }

    #[test]
    fn remote_summaries_and_origins() {
        let cfg = Config::parse(
            r#"
app:
  database: marginalia.db
  port: 7878
  project: thesis
  allowed_origins:
    - chrome-extension://abcdef
summarize:
  mode: remote
  api_key: ${MARGINALIA_TEST_UNSET_KEY:-sk-local}
  model: small-model
"#,
        )
        .unwrap();

        assert_eq!(cfg.app.get_project(), "thesis");
        assert_eq!(cfg.app.allowed_origins, vec!["chrome-extension://abcdef".to_string()]);
        assert_eq!(cfg.summarize.mode, SummaryMode::Remote);
        assert_eq!(cfg.summarize.api_key.as_deref(), Some("sk-local"));
        assert_eq!(cfg.summarize.model, "small-model");
        assert_eq!(cfg.summarize.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn env_defaults_are_substituted() {
        let cfg = Config::parse(
            r#"
app:
  database: ${MARGINALIA_TEST_UNSET_DB:-fallback.db}
  port: 1
  user: "${MARGINALIA_TEST_UNSET_USER:-}"
rate_limit:
  max_requests: 5
"#,
        )
        .unwrap();

        assert_eq!(cfg.app.get_db(), "fallback.db");
        assert_eq!(cfg.app.get_user(), None);
        assert_eq!(cfg.rate_limit.max_requests, 5);
        assert_eq!(cfg.rate_limit.window_seconds, 60);
    }
}
