use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use regex_lite::Regex;

use crate::queue::ProxyConsumerConfig;

/// Central configuration loaded from environment variables.
///
/// The .env file is loaded automatically at startup via dotenvy. Every
/// variable has a default so the service starts with an empty environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resource name used in URLs and in the default whitelist (e.g. "content", "lists").
    pub resource: String,
    /// Prefix for notification `apiUrl`s and polling page links.
    pub api_base_url: String,
    /// Kafka REST proxy base URLs.
    pub queue_addrs: Vec<String>,
    /// `Host` header for proxy requests (routing through a shared ingress).
    pub queue_host: String,
    pub group_id: String,
    pub topic: String,
    pub authorization_key: String,
    pub consumer_autocommit: bool,
    pub consumer_backoff: Duration,
    /// Wait before pushing, so the content is readable when clients fetch it.
    pub delay: Duration,
    pub heartbeat_period: Duration,
    /// Capacity of both the history and the polling cache.
    pub capacity: usize,
    /// Whitelist regex override; `None` derives it from the resource.
    pub content_uri_whitelist: Option<String>,
    pub supported_content_types: Vec<String>,
    pub default_content_type: String,
    pub suppress_carousel: bool,
    pub synthetic_tid_prefix: String,
    pub polling_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            resource: "content".to_string(),
            api_base_url: "http://api.ft.com".to_string(),
            queue_addrs: Vec::new(),
            queue_host: String::new(),
            group_id: "notifications-push".to_string(),
            topic: String::new(),
            authorization_key: String::new(),
            consumer_autocommit: true,
            consumer_backoff: Duration::from_secs(4),
            delay: Duration::from_secs(30),
            heartbeat_period: Duration::from_secs(30),
            capacity: 200,
            content_uri_whitelist: None,
            supported_content_types: vec![
                "Article".to_string(),
                "ContentPackage".to_string(),
                "All".to_string(),
            ],
            default_content_type: "Article".to_string(),
            suppress_carousel: true,
            synthetic_tid_prefix: "SYNTH".to_string(),
            polling_enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unparseable numbers and booleans are an error rather than silently
    /// falling back to the default.
    pub fn load() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            resource: env_string("NOTIFICATIONS_RESOURCE", &defaults.resource),
            api_base_url: env_string("API_BASE_URL", &defaults.api_base_url),
            queue_addrs: env_list("QUEUE_PROXY_ADDRS").unwrap_or(defaults.queue_addrs),
            queue_host: env_string("QUEUE_HOST", &defaults.queue_host),
            group_id: env_string("GROUP_ID", &defaults.group_id),
            topic: env_string("TOPIC", &defaults.topic),
            authorization_key: env_string("AUTHORIZATION_KEY", &defaults.authorization_key),
            consumer_autocommit: env_parse("CONSUMER_AUTOCOMMIT_ENABLE")?
                .unwrap_or(defaults.consumer_autocommit),
            consumer_backoff: env_parse("CONSUMER_BACKOFF")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.consumer_backoff),
            delay: env_parse("NOTIFICATIONS_DELAY")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.delay),
            heartbeat_period: env_parse("HEARTBEAT_PERIOD")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_period),
            capacity: env_parse("NOTIFICATIONS_CAPACITY")?.unwrap_or(defaults.capacity),
            content_uri_whitelist: env::var("CONTENT_URI_WHITELIST")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            supported_content_types: env_list("SUPPORTED_CONTENT_TYPES")
                .unwrap_or(defaults.supported_content_types),
            default_content_type: env_string("DEFAULT_CONTENT_TYPE", &defaults.default_content_type),
            suppress_carousel: env_parse("SUPPRESS_CAROUSEL")?.unwrap_or(defaults.suppress_carousel),
            synthetic_tid_prefix: env::var("SYNTHETIC_TID_PREFIX")
                .unwrap_or(defaults.synthetic_tid_prefix),
            polling_enabled: env_parse("NOTIFICATIONS_POLLING")?.unwrap_or(defaults.polling_enabled),
        })
    }

    /// Whitelist for content URIs: only transformer hosts in the pr/iw
    /// environments, and only this resource's path.
    pub fn default_whitelist(resource: &str) -> String {
        format!(
            r"^http://.*-transformer-(pr|iw)-uk-.*\.svc\.ft\.com(:\d{{2,5}})?/({resource})/[\w-]+.*$"
        )
    }

    /// Compile the configured (or derived) whitelist.
    pub fn whitelist(&self) -> Result<Regex> {
        let pattern = self
            .content_uri_whitelist
            .clone()
            .unwrap_or_else(|| Self::default_whitelist(&self.resource));
        Regex::new(&pattern).with_context(|| format!("Invalid content URI whitelist: {pattern}"))
    }

    /// Check settings that would otherwise fail only once traffic arrives.
    pub fn validate(&self) -> Result<()> {
        if self.resource.is_empty() {
            anyhow::bail!("NOTIFICATIONS_RESOURCE must not be empty.");
        }
        if self.heartbeat_period.is_zero() {
            anyhow::bail!("HEARTBEAT_PERIOD must be at least one second.");
        }
        if self.capacity == 0 {
            anyhow::bail!("NOTIFICATIONS_CAPACITY must be at least 1.");
        }
        if self.supported_content_types.is_empty() {
            anyhow::bail!("SUPPORTED_CONTENT_TYPES must list at least one content type.");
        }
        if self.content_type(&self.default_content_type).is_none() {
            anyhow::bail!(
                "DEFAULT_CONTENT_TYPE {:?} is not one of SUPPORTED_CONTENT_TYPES ({}).",
                self.default_content_type,
                self.supported_content_types.join(", ")
            );
        }
        self.whitelist()?;
        Ok(())
    }

    /// The canonical spelling of `requested` if it is a supported content
    /// type, ignoring case.
    pub fn content_type(&self, requested: &str) -> Option<&str> {
        self.supported_content_types
            .iter()
            .find(|t| t.eq_ignore_ascii_case(requested))
            .map(String::as_str)
    }

    pub fn consumer_config(&self) -> ProxyConsumerConfig {
        ProxyConsumerConfig {
            addrs: self.queue_addrs.clone(),
            group: self.group_id.clone(),
            topic: self.topic.clone(),
            queue_host: self.queue_host.clone(),
            authorization_key: self.authorization_key.clone(),
            autocommit: self.consumer_autocommit,
            backoff: self.consumer_backoff,
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Comma separated list; `None` when unset or empty.
fn env_list(key: &str) -> Option<Vec<String>> {
    let raw = env::var(key).ok()?;
    let items: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    (!items.is_empty()).then_some(items)
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid value for {key} ({raw:?}): {e}")),
        _ => Ok(None),
    }
}
