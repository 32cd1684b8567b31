use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::core::auth::Credentials;
use crate::core::retry::RetryPolicy;
use crate::core::token_store::default_store_dir;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyMethod {
    #[default]
    Email,
    Webhook,
    Both,
    None,
}

impl NotifyMethod {
    pub fn sends_email(&self) -> bool {
        matches!(self, Self::Email | Self::Both)
    }

    pub fn sends_webhook(&self) -> bool {
        matches!(self, Self::Webhook | Self::Both)
    }
}

impl FromStr for NotifyMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "webhook" => Ok(Self::Webhook),
            "both" => Ok(Self::Both),
            "none" => Ok(Self::None),
            other => Err(format!(
                "'{}' (must be email|webhook|both|none)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureConfig {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_authority_url")]
    pub authority_url: String,
    #[serde(default = "default_management_url")]
    pub management_url: String,
}

fn default_authority_url() -> String {
    "https://login.microsoftonline.com".to_string()
}
fn default_management_url() -> String {
    "https://management.azure.com".to_string()
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            authority_url: default_authority_url(),
            management_url: default_management_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    pub id: String,
    /// Day of month the billing cycle starts. Looked up from the billing
    /// period API when unset.
    pub billing_start_day: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_secs() -> u64 {
    2
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_concurrency() -> usize {
    4
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifySettings {
    #[serde(default)]
    pub method: NotifyMethod,
    pub webhook_url: Option<String>,
    #[serde(default = "default_subject")]
    pub subject: String,
}

fn default_subject() -> String {
    "Azure Cost Report".to_string()
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            method: NotifyMethod::default(),
            webhook_url: None,
            subject: default_subject(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpSettings {
    pub server: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
}

fn default_smtp_port() -> u16 {
    587
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            server: None,
            port: default_smtp_port(),
            username: None,
            password: None,
            from: None,
            to: Vec::new(),
            cc: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSettings {
    #[serde(default = "default_currency_symbol")]
    pub currency_symbol: String,
    /// Where the encrypted token and its key are kept.
    pub token_dir: Option<PathBuf>,
}

fn default_currency_symbol() -> String {
    "$".to_string()
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            currency_symbol: default_currency_symbol(),
            token_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub azure: AzureConfig,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub notify: NotifySettings,
    #[serde(default)]
    pub smtp: SmtpSettings,
    #[serde(default)]
    pub report: ReportSettings,
}

/// Split a comma separated list, dropping blanks.
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `"sub-a:15, sub-b"` into subscriptions; the optional `:day` suffix is
/// the billing start day.
pub fn parse_subscription_list(value: &str) -> Result<Vec<SubscriptionConfig>, ConfigError> {
    split_list(value)
        .into_iter()
        .map(|entry| match entry.split_once(':') {
            Some((id, day)) => {
                let day = day.trim().parse::<u32>().map_err(|_| ConfigError::InvalidValue {
                    key: "SUBSCRIPTION_IDS".into(),
                    message: format!("bad billing start day in '{}'", entry),
                })?;
                Ok(SubscriptionConfig {
                    id: id.trim().to_string(),
                    billing_start_day: Some(day),
                })
            }
            None => Ok(SubscriptionConfig {
                id: entry,
                billing_start_day: None,
            }),
        })
        .collect()
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl AppConfig {
    /// Get the config file path, respecting XDG_CONFIG_HOME
    pub fn config_path() -> PathBuf {
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("~"))
                    .join(".config")
            });
        config_dir.join("azcost").join("config.toml")
    }

    /// Load config from `path`, falling back to defaults if it doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load the file config, then layer the process environment on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override file values with environment variables. Unset or empty
    /// variables leave the file value untouched.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("TENANT_ID") {
            self.azure.tenant_id = v;
        }
        if let Some(v) = get("CLIENT_ID") {
            self.azure.client_id = v;
        }
        if let Some(v) = get("CLIENT_SECRET") {
            self.azure.client_secret = v;
        }
        if let Some(v) = get("SUBSCRIPTION_IDS") {
            self.subscriptions = parse_subscription_list(&v)?;
        }
        if let Some(v) = get("NOTIFY_METHOD") {
            self.notify.method = v.parse().map_err(|message| ConfigError::InvalidValue {
                key: "NOTIFY_METHOD".into(),
                message,
            })?;
        }
        if let Some(v) = get("WEBHOOK_URL") {
            self.notify.webhook_url = Some(v);
        }
        if let Some(v) = get("SMTP_SERVER") {
            self.smtp.server = Some(v);
        }
        if let Some(v) = get("SMTP_PORT") {
            self.smtp.port = v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "SMTP_PORT".into(),
                message: format!("'{}' is not a port number", v),
            })?;
        }
        if let Some(v) = get("SMTP_USER") {
            self.smtp.username = Some(v);
        }
        if let Some(v) = get("SMTP_PASS") {
            self.smtp.password = Some(v);
        }
        if let Some(v) = get("EMAIL_FROM") {
            self.smtp.from = Some(v);
        }
        if let Some(v) = get("EMAIL_TO") {
            self.smtp.to = split_list(&v);
        }
        if let Some(v) = get("CC_TO") {
            self.smtp.cc = split_list(&v);
        }
        Ok(())
    }

    /// Serialize and write this config to `path`.
    pub fn save(&self, path: &Path) -> Result<PathBuf, ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(path.to_path_buf())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            tenant_id: self.azure.tenant_id.clone(),
            client_id: self.azure.client_id.clone(),
            client_secret: self.azure.client_secret.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.fetch.max_attempts,
            Duration::from_secs(self.fetch.base_delay_secs),
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_secs)
    }

    pub fn token_dir(&self) -> PathBuf {
        self.report.token_dir.clone().unwrap_or_else(default_store_dir)
    }

    /// Validate the config
    pub fn validate(&self) -> Vec<String> {
        let mut issues = self.validate_fetch();
        issues.extend(self.validate_notify());
        issues
    }

    /// Issues that prevent fetching any cost data.
    pub fn validate_fetch(&self) -> Vec<String> {
        let mut issues = self.validate_connection();
        issues.extend(validate_subscriptions(&self.subscriptions));
        issues
    }

    /// Credential, endpoint and fetch tuning issues, independent of which
    /// subscriptions are queried.
    pub fn validate_connection(&self) -> Vec<String> {
        let mut issues = Vec::new();

        for (key, value) in [
            ("tenant_id", &self.azure.tenant_id),
            ("client_id", &self.azure.client_id),
            ("client_secret", &self.azure.client_secret),
        ] {
            if value.trim().is_empty() {
                issues.push(format!("Missing azure.{}", key));
            }
        }
        for (key, url) in [
            ("authority_url", &self.azure.authority_url),
            ("management_url", &self.azure.management_url),
        ] {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                issues.push(format!("Invalid azure.{}: '{}' (must be an http(s) URL)", key, url));
            }
        }

        if self.fetch.max_attempts == 0 {
            issues.push("fetch.max_attempts must be at least 1".to_string());
        }
        if self.fetch.concurrency == 0 {
            issues.push("fetch.concurrency must be at least 1".to_string());
        }
        issues
    }

    /// Issues that prevent delivering the report.
    pub fn validate_notify(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.notify.method.sends_email() {
            if !non_empty(&self.smtp.server) {
                issues.push("Email notification requires smtp.server".to_string());
            }
            if !non_empty(&self.smtp.from) {
                issues.push("Email notification requires smtp.from".to_string());
            }
            if self.smtp.to.is_empty() {
                issues.push("Email notification requires at least one smtp.to address".to_string());
            }
        }
        if self.notify.method.sends_webhook() && !non_empty(&self.notify.webhook_url) {
            issues.push("Webhook notification requires notify.webhook_url".to_string());
        }
        issues
    }
}

/// Issues with a list of subscriptions to report on.
pub fn validate_subscriptions(subscriptions: &[SubscriptionConfig]) -> Vec<String> {
    let mut issues = Vec::new();
    if subscriptions.is_empty() {
        issues.push("No subscriptions configured".to_string());
    }
    for sub in subscriptions {
        if sub.id.trim().is_empty() {
            issues.push("Subscription with empty id".to_string());
        }
        if let Some(day) = sub.billing_start_day {
            if !(1..=31).contains(&day) {
                issues.push(format!(
                    "Subscription '{}': billing_start_day {} out of range 1-31",
                    sub.id, day
                ));
            }
        }
    }
    issues
}
