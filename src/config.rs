//! Environment driven configuration

use crate::models::MAX_POSTS;
use crate::private_api_source::{DEFAULT_PRIVATE_API_BASE, DEFAULT_PRIVATE_API_USER_AGENT};
use crate::proxy_rotation::RotationStrategy;
use crate::rate_limit_manager::PacingPolicy;
use crate::web_profile_source::{DEFAULT_WEB_BASE, DEFAULT_WEB_USER_AGENT};
use anyhow::{bail, Context, Result};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Web,
    PrivateApi,
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "web" | "anonymous" => Ok(Self::Web),
            "private_api" | "private-api" | "private" => Ok(Self::PrivateApi),
            other => bail!("unknown scraper source '{other}' (expected 'web' or 'private_api')"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingMode {
    /// Jitter for the private API, linear ramp for the web source
    Auto,
    None,
    Jitter,
    Linear,
}

impl FromStr for PacingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "none" | "off" => Ok(Self::None),
            "jitter" => Ok(Self::Jitter),
            "linear" => Ok(Self::Linear),
            other => bail!("unknown pacing policy '{other}'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PacingConfig {
    pub mode: PacingMode,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub ramp_base: Duration,
    pub ramp_step: Duration,
}

impl PacingConfig {
    /// Resolve the policy a given source runs with
    pub fn policy_for(&self, source: SourceKind) -> PacingPolicy {
        let jitter = PacingPolicy::Jittered {
            min: self.min_delay,
            max: self.max_delay,
        };
        let linear = PacingPolicy::LinearRamp {
            base: self.ramp_base,
            step: self.ramp_step,
        };
        match (self.mode, source) {
            (PacingMode::None, _) => PacingPolicy::None,
            (PacingMode::Jitter, _) => jitter,
            (PacingMode::Linear, _) => linear,
            (PacingMode::Auto, SourceKind::PrivateApi) => jitter,
            (PacingMode::Auto, SourceKind::Web) => linear,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub urls: Vec<String>,
    pub rotation: RotationStrategy,
    pub max_failures: u32,
    pub cooldown: Duration,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub source: SourceKind,
    pub session_id: Option<String>,
    pub private_api_base: String,
    pub web_base: String,
    pub user_agent: Option<String>,
    pub request_timeout: Duration,
    pub max_posts: usize,
    pub web_page_size: usize,
    pub pacing: PacingConfig,
    pub requests_per_minute: u32,
    pub max_throttle_wait: Duration,
    pub proxy: ProxyConfig,
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl ServiceConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let source = match get("SCRAPER_SOURCE") {
            Some(v) => v.parse()?,
            None => SourceKind::Web,
        };
        let session_id = get("IG_SESSION_ID");
        if source == SourceKind::PrivateApi && session_id.is_none() {
            bail!("SCRAPER_SOURCE=private_api requires IG_SESSION_ID");
        }

        let pacing_mode = match get("PACING_POLICY") {
            Some(v) => v.parse()?,
            None => PacingMode::Auto,
        };
        let pacing = PacingConfig {
            mode: pacing_mode,
            min_delay: Duration::from_millis(parse_or(get("PACING_MIN_MS"), 1000)),
            max_delay: Duration::from_millis(parse_or(get("PACING_MAX_MS"), 3000)),
            ramp_base: Duration::from_millis(parse_or(get("PACING_BASE_MS"), 1500)),
            ramp_step: Duration::from_millis(parse_or(get("PACING_STEP_MS"), 100)),
        };

        let mut proxy_urls: Vec<String> = get("PROXY_URLS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if let Some(path) = get("PROXY_LIST_FILE") {
            proxy_urls.extend(load_proxy_list(Path::new(&path))?);
        }
        let rotation = match get("PROXY_ROTATION") {
            Some(v) => v.parse()?,
            None => RotationStrategy::RoundRobin,
        };

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8000".to_string()),
            source,
            session_id,
            private_api_base: get("IG_PRIVATE_API_BASE")
                .unwrap_or_else(|| DEFAULT_PRIVATE_API_BASE.to_string()),
            web_base: get("IG_WEB_BASE").unwrap_or_else(|| DEFAULT_WEB_BASE.to_string()),
            user_agent: get("IG_USER_AGENT"),
            request_timeout: Duration::from_secs(parse_or(get("REQUEST_TIMEOUT_SECS"), 20)),
            max_posts: parse_or(get("MAX_POSTS"), MAX_POSTS).clamp(1, MAX_POSTS),
            web_page_size: parse_or(get("WEB_PAGE_SIZE"), 12usize).clamp(1, 50),
            pacing,
            requests_per_minute: parse_or(get("REQUESTS_PER_MINUTE"), 30u32).max(1),
            max_throttle_wait: Duration::from_secs(parse_or(get("MAX_THROTTLE_WAIT_SECS"), 30)),
            proxy: ProxyConfig {
                urls: proxy_urls,
                rotation,
                max_failures: parse_or(get("PROXY_MAX_FAILURES"), 3u32).max(1),
                cooldown: Duration::from_secs(parse_or(get("PROXY_COOLDOWN_SECS"), 300)),
            },
        })
    }

    /// User agent for the configured source
    pub fn effective_user_agent(&self) -> String {
        self.user_agent.clone().unwrap_or_else(|| match self.source {
            SourceKind::Web => DEFAULT_WEB_USER_AGENT.to_string(),
            SourceKind::PrivateApi => DEFAULT_PRIVATE_API_USER_AGENT.to_string(),
        })
    }
}

/// Read one proxy URL per line, skipping blanks and `#` comments
pub fn load_proxy_list(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read proxy list {}", path.display()))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
