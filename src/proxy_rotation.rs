//! Proxy selection for outbound requests
//!
//! A [`ProxyPool`] hands out one [`Egress`] per sync. The selection travels with
//! the request in its fetch context, so concurrent syncs never share a mutable
//! "current proxy". Health is tracked per endpoint: repeated throttling or
//! connection failures bench an endpoint for a cooldown period.

use parking_lot::Mutex;
use rand::distr::Alphanumeric;
use rand::Rng;
use reqwest::{Client, Proxy, Url};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Placeholder replaced by a fresh token for `per_session` rotation
pub const SESSION_PLACEHOLDER: &str = "{session}";
const SESSION_TOKEN_LEN: usize = 10;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid proxy URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("unknown proxy rotation strategy '{0}'")]
    UnknownStrategy(String),

    #[error("per_session rotation needs a '{{session}}' placeholder in '{0}'")]
    MissingSessionPlaceholder(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    #[default]
    RoundRobin,
    Random,
    /// Every selection gets a new provider session token
    PerSession,
}

impl FromStr for RotationStrategy {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round_robin" | "round-robin" | "roundrobin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            "per_session" | "per-session" | "session" => Ok(Self::PerSession),
            other => Err(ProxyError::UnknownStrategy(other.to_string())),
        }
    }
}

/// A concrete proxy chosen for one sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySelection {
    index: usize,
    url: String,
    label: String,
    key: String,
    reusable: bool,
}

impl ProxySelection {
    /// Rate-limit key; unique per pool entry even when labels collide
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Credential-free rendering for logs
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the same URL will be handed out again
    pub fn is_reusable(&self) -> bool {
        self.reusable
    }
}

/// Network path of one sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Egress {
    Direct,
    Proxy(ProxySelection),
}

impl Egress {
    /// Key for per-egress rate limiting
    pub fn key(&self) -> &str {
        match self {
            Egress::Direct => "direct",
            Egress::Proxy(selection) => selection.key(),
        }
    }

    /// Credential-free name for logs
    pub fn label(&self) -> &str {
        match self {
            Egress::Direct => "direct",
            Egress::Proxy(selection) => selection.label(),
        }
    }

    pub fn proxy(&self) -> Option<&ProxySelection> {
        match self {
            Egress::Direct => None,
            Egress::Proxy(selection) => Some(selection),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct EndpointHealth {
    consecutive_failures: u32,
    total_failures: u64,
    total_successes: u64,
    benched_until: Option<Instant>,
}

/// Point-in-time view of one endpoint, for logging
#[derive(Debug, Clone)]
pub struct EndpointReport {
    pub label: String,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub benched: bool,
}

pub struct ProxyPool {
    templates: Vec<String>,
    labels: Vec<String>,
    strategy: RotationStrategy,
    cursor: AtomicUsize,
    health: Mutex<Vec<EndpointHealth>>,
    max_failures: u32,
    cooldown: Duration,
}

impl ProxyPool {
    pub fn new(
        urls: Vec<String>,
        strategy: RotationStrategy,
        max_failures: u32,
        cooldown: Duration,
    ) -> Result<Self, ProxyError> {
        let mut labels = Vec::with_capacity(urls.len());
        for url in &urls {
            if strategy == RotationStrategy::PerSession && !url.contains(SESSION_PLACEHOLDER) {
                return Err(ProxyError::MissingSessionPlaceholder(redact(url)));
            }
            let sample = url.replace(SESSION_PLACEHOLDER, "sample");
            let parsed = Url::parse(&sample).map_err(|e| ProxyError::InvalidUrl {
                url: redact(url),
                message: e.to_string(),
            })?;
            if !matches!(parsed.scheme(), "http" | "https" | "socks5" | "socks5h") {
                return Err(ProxyError::InvalidUrl {
                    url: redact(url),
                    message: format!("unsupported scheme '{}'", parsed.scheme()),
                });
            }
            labels.push(redact(url));
        }

        let health = vec![EndpointHealth::default(); urls.len()];
        Ok(Self {
            templates: urls,
            labels,
            strategy,
            cursor: AtomicUsize::new(0),
            health: Mutex::new(health),
            max_failures: max_failures.max(1),
            cooldown,
        })
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn strategy(&self) -> RotationStrategy {
        self.strategy
    }

    /// Pick the egress for one sync
    pub fn select(&self) -> Egress {
        if self.templates.is_empty() {
            return Egress::Direct;
        }

        let index = self.pick_index();
        let template = &self.templates[index];
        let (url, reusable) = match self.strategy {
            RotationStrategy::PerSession => {
                (template.replace(SESSION_PLACEHOLDER, &session_token()), false)
            }
            _ => (template.clone(), true),
        };

        debug!("Selected proxy {} ({:?})", self.labels[index], self.strategy);
        Egress::Proxy(ProxySelection {
            index,
            url,
            label: self.labels[index].clone(),
            key: format!("{}#{}", self.labels[index], index),
            reusable,
        })
    }

    fn pick_index(&self) -> usize {
        let now = Instant::now();
        let mut health = self.health.lock();

        // Lift benches that have expired
        for entry in health.iter_mut() {
            if entry.benched_until.is_some_and(|until| until <= now) {
                entry.benched_until = None;
                entry.consecutive_failures = 0;
            }
        }

        let available: Vec<usize> = (0..self.templates.len())
            .filter(|i| health[*i].benched_until.is_none())
            .collect();

        if available.is_empty() {
            // Everything is benched; use whichever comes back first
            return health
                .iter()
                .enumerate()
                .min_by_key(|(_, entry)| entry.benched_until)
                .map(|(i, _)| i)
                .unwrap_or(0);
        }

        match self.strategy {
            RotationStrategy::Random => available[rand::rng().random_range(0..available.len())],
            RotationStrategy::RoundRobin | RotationStrategy::PerSession => {
                let n = self.cursor.fetch_add(1, Ordering::Relaxed);
                available[n % available.len()]
            }
        }
    }

    pub fn report_success(&self, selection: &ProxySelection) {
        let mut health = self.health.lock();
        if let Some(entry) = health.get_mut(selection.index) {
            entry.consecutive_failures = 0;
            entry.total_successes += 1;
        }
    }

    pub fn report_failure(&self, selection: &ProxySelection) {
        let mut health = self.health.lock();
        let Some(entry) = health.get_mut(selection.index) else {
            return;
        };
        entry.consecutive_failures += 1;
        entry.total_failures += 1;
        if entry.consecutive_failures >= self.max_failures && entry.benched_until.is_none() {
            entry.benched_until = Some(Instant::now() + self.cooldown);
            warn!(
                "Benching proxy {} for {:?} after {} consecutive failures",
                selection.label, self.cooldown, entry.consecutive_failures
            );
        }
    }

    pub fn report(&self) -> Vec<EndpointReport> {
        let now = Instant::now();
        let health = self.health.lock();
        self.labels
            .iter()
            .zip(health.iter())
            .map(|(label, entry)| EndpointReport {
                label: label.clone(),
                consecutive_failures: entry.consecutive_failures,
                total_failures: entry.total_failures,
                total_successes: entry.total_successes,
                benched: entry.benched_until.is_some_and(|until| until > now),
            })
            .collect()
    }
}

fn session_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Render a proxy URL without its credentials
pub fn redact(url: &str) -> String {
    let sample = url.replace(SESSION_PLACEHOLDER, "session");
    match Url::parse(&sample) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or("unknown");
            match parsed.port() {
                Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
                None => format!("{}://{}", parsed.scheme(), host),
            }
        }
        Err(_) => "<invalid proxy url>".to_string(),
    }
}

/// Builds `reqwest` clients per egress, caching the reusable ones
pub struct HttpClientFactory {
    timeout: Duration,
    user_agent: String,
    direct: Client,
    cache: Mutex<HashMap<String, Client>>,
}

impl HttpClientFactory {
    pub fn new(timeout: Duration, user_agent: impl Into<String>) -> Result<Self, reqwest::Error> {
        let user_agent = user_agent.into();
        let direct = Self::builder(timeout, &user_agent).build()?;
        Ok(Self {
            timeout,
            user_agent,
            direct,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn builder(timeout: Duration, user_agent: &str) -> reqwest::ClientBuilder {
        // Redirects are how Instagram bounces anonymous traffic to the login page
        Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .gzip(true)
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn client_for(&self, egress: &Egress) -> Result<Client, reqwest::Error> {
        let selection = match egress {
            Egress::Direct => return Ok(self.direct.clone()),
            Egress::Proxy(selection) => selection,
        };

        if selection.is_reusable() {
            if let Some(client) = self.cache.lock().get(selection.url()) {
                return Ok(client.clone());
            }
        }

        let client = Self::builder(self.timeout, &self.user_agent)
            .proxy(Proxy::all(selection.url())?)
            .build()?;

        if selection.is_reusable() {
            info!("Built HTTP client for proxy {}", selection.label());
            self.cache
                .lock()
                .insert(selection.url().to_string(), client.clone());
        }
        Ok(client)
    }
}
