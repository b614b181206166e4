//! Sync Service - resolves one username to a normalized profile and recent posts
//!
//! Each sync picks its egress up front and passes it down explicitly, so the
//! service itself holds no per-request mutable state.

use crate::config::{ServiceConfig, SourceKind};
use crate::error::ScrapeError;
use crate::models::{SyncRequest, SyncResponse, MAX_POSTS};
use crate::post_mapper::{map_post, map_profile, normalize_username};
use crate::private_api_source::{PrivateApiConfig, PrivateApiSource};
use crate::proxy_rotation::{Egress, ProxyPool};
use crate::rate_limit_manager::{RateLimitManager, RequestThrottle};
use crate::source::{FetchContext, ProfileSource};
use crate::web_profile_source::{WebProfileSource, WebSourceConfig};
use anyhow::Context;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

pub struct SyncService {
    source: Arc<dyn ProfileSource>,
    proxies: Option<Arc<ProxyPool>>,
    max_posts: usize,
}

impl SyncService {
    pub fn new(source: Arc<dyn ProfileSource>, max_posts: usize) -> Self {
        Self {
            source,
            proxies: None,
            max_posts: max_posts.clamp(1, MAX_POSTS),
        }
    }

    pub fn with_proxies(mut self, proxies: Arc<ProxyPool>) -> Self {
        if !proxies.is_empty() {
            self.proxies = Some(proxies);
        }
        self
    }

    /// Build the source, throttle and proxy pool described by `config`
    pub fn from_config(config: &ServiceConfig) -> anyhow::Result<Self> {
        let manager = Arc::new(RateLimitManager::new(config.requests_per_minute));
        let throttle = RequestThrottle::new(
            manager,
            config.pacing.policy_for(config.source),
            config.max_throttle_wait,
        );

        let source: Arc<dyn ProfileSource> = match config.source {
            SourceKind::Web => Arc::new(
                WebProfileSource::new(
                    WebSourceConfig {
                        base_url: config.web_base.clone(),
                        user_agent: config.effective_user_agent(),
                        timeout: config.request_timeout,
                        page_size: config.web_page_size,
                    },
                    throttle,
                )
                .context("Failed to create web profile source")?,
            ),
            SourceKind::PrivateApi => {
                let session_id = config
                    .session_id
                    .clone()
                    .context("private_api source requires a session id")?;
                Arc::new(
                    PrivateApiSource::new(
                        PrivateApiConfig {
                            base_url: config.private_api_base.clone(),
                            session_id,
                            user_agent: config.effective_user_agent(),
                            timeout: config.request_timeout,
                        },
                        throttle,
                    )
                    .context("Failed to create private API source")?,
                )
            }
        };

        let mut service = Self::new(source, config.max_posts);
        if !config.proxy.urls.is_empty() {
            let pool = ProxyPool::new(
                config.proxy.urls.clone(),
                config.proxy.rotation,
                config.proxy.max_failures,
                config.proxy.cooldown,
            )
            .context("Invalid proxy configuration")?;
            service = service.with_proxies(Arc::new(pool));
        }
        Ok(service)
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    pub fn proxy_pool(&self) -> Option<&Arc<ProxyPool>> {
        self.proxies.as_ref()
    }

    pub fn max_posts(&self) -> usize {
        self.max_posts
    }

    fn select_egress(&self) -> Egress {
        self.proxies
            .as_ref()
            .map(|pool| pool.select())
            .unwrap_or(Egress::Direct)
    }

    pub async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse, ScrapeError> {
        let username = normalize_username(&request.username);
        if username.is_empty() {
            return Err(ScrapeError::EmptyUsername);
        }

        let ctx = FetchContext {
            egress: self.select_egress(),
            caller_id: request.user_id.clone(),
        };
        let started = Instant::now();
        info!(
            username = %username,
            caller_id = %ctx.caller_id,
            source = self.source.name(),
            egress = ctx.egress.label(),
            "Starting sync for @{}",
            username
        );

        let result = self.fetch(&username, &ctx).await;
        self.record_egress_outcome(&ctx.egress, &result);

        match &result {
            Ok(response) => info!(
                username = %username,
                caller_id = %ctx.caller_id,
                "Sync complete: {} posts fetched for @{} via {} in {:?}",
                response.posts.len(),
                username,
                self.source.name(),
                started.elapsed()
            ),
            Err(e @ ScrapeError::Throttled { .. }) => {
                error!(username = %username, "429 Throttled - Instagram rate limit: {}", e)
            }
            Err(e) => error!(
                username = %username,
                caller_id = %ctx.caller_id,
                "{} error: {}",
                self.source.name(),
                e
            ),
        }
        result
    }

    async fn fetch(&self, username: &str, ctx: &FetchContext) -> Result<SyncResponse, ScrapeError> {
        let user = self.source.fetch_user(username, ctx).await?;
        let batch = self
            .source
            .fetch_recent_media(&user, self.max_posts, ctx)
            .await?;

        for skipped in &batch.skipped {
            warn!(
                username = %username,
                "Skipped post {:?}: {}",
                skipped.id,
                skipped.reason
            );
        }

        let posts = batch
            .items
            .iter()
            .take(self.max_posts)
            .map(map_post)
            .collect();

        Ok(SyncResponse {
            profile: map_profile(&user),
            posts,
        })
    }

    fn record_egress_outcome(&self, egress: &Egress, result: &Result<SyncResponse, ScrapeError>) {
        let (Some(pool), Some(selection)) = (&self.proxies, egress.proxy()) else {
            return;
        };
        match result {
            Ok(_) => pool.report_success(selection),
            Err(e) if e.is_egress_failure() => {
                warn!("Proxy {} failed: {}", selection.label(), e);
                pool.report_failure(selection);
            }
            Err(_) => {}
        }
    }
}
