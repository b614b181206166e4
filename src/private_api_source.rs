//! Authenticated source backed by the mobile private API
//!
//! Requests carry a `sessionid` cookie obtained out of band. Only throttling is
//! classified; a missing user or a dropped connection surfaces as an ordinary
//! upstream or transport error.

use crate::error::ScrapeError;
use crate::proxy_rotation::HttpClientFactory;
use crate::rate_limit_manager::{RequestSlot, RequestThrottle};
use crate::source::{
    id_string, send_json, upstream_message, FetchContext, MediaBatch, MediaKind, ProfileSource,
    SkippedMedia, SourceMedia, SourceUser, UpstreamFailure,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_PRIVATE_API_BASE: &str = "https://i.instagram.com/api/v1";
pub const PRIVATE_API_APP_ID: &str = "567067343352427";
pub const DEFAULT_PRIVATE_API_USER_AGENT: &str = "Instagram 269.0.0.18.75 Android (26/8.0.0; 480dpi; 1080x1920; OnePlus; 6T Dev; devitron; qcom; en_US; 314665256)";

/// Upper bound on feed pages walked for one sync
const MAX_FEED_PAGES: usize = 5;

#[derive(Debug, Clone)]
pub struct PrivateApiConfig {
    pub base_url: String,
    pub session_id: String,
    pub user_agent: String,
    pub timeout: Duration,
}

impl PrivateApiConfig {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_PRIVATE_API_BASE.to_string(),
            session_id: session_id.into(),
            user_agent: DEFAULT_PRIVATE_API_USER_AGENT.to_string(),
            timeout: Duration::from_secs(20),
        }
    }
}

pub struct PrivateApiSource {
    base_url: Url,
    session_id: String,
    clients: HttpClientFactory,
    throttle: RequestThrottle,
}

impl PrivateApiSource {
    pub fn new(config: PrivateApiConfig, throttle: RequestThrottle) -> Result<Self, ScrapeError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ScrapeError::InvalidConfig(format!("invalid private API base URL: {e}")))?;
        let clients = HttpClientFactory::new(config.timeout, config.user_agent)?;

        Ok(Self {
            base_url,
            session_id: config.session_id,
            clients,
            throttle,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ScrapeError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ScrapeError::InvalidConfig("private API base URL cannot carry a path".into())
            })?
            .pop_if_empty()
            .extend(segments)
            .push("");
        Ok(url)
    }

    async fn get(
        &self,
        url: Url,
        query: &[(&str, String)],
        ctx: &FetchContext,
        slot: RequestSlot,
    ) -> Result<Value, ScrapeError> {
        self.throttle.acquire(ctx.egress.key(), slot).await?;
        let client = self.clients.client_for(&ctx.egress)?;

        debug!("GET {} via {}", url.path(), ctx.egress.label());
        let request = client
            .get(url)
            .query(query)
            .header("X-IG-App-ID", PRIVATE_API_APP_ID)
            .header("Accept-Language", "en-US")
            .header(reqwest::header::COOKIE, format!("sessionid={}", self.session_id));

        match send_json(request).await {
            Ok(value) => Ok(value),
            Err(failure) => Err(self.classify(failure, ctx).await),
        }
    }

    async fn classify(&self, failure: UpstreamFailure, ctx: &FetchContext) -> ScrapeError {
        match failure {
            UpstreamFailure::Transport(e) => ScrapeError::Transport(e.to_string()),
            UpstreamFailure::Decode(message) => ScrapeError::Decode(message),
            UpstreamFailure::Status {
                status: StatusCode::TOO_MANY_REQUESTS,
                retry_after,
                ..
            } => {
                self.throttle
                    .record_throttled(ctx.egress.key(), retry_after)
                    .await;
                ScrapeError::Throttled {
                    retry_after: retry_after.map(Duration::from_secs),
                }
            }
            UpstreamFailure::Status { status, body, .. }
                if matches!(status.as_u16(), 401 | 403) && body.contains("login_required") =>
            {
                ScrapeError::LoginRequired(upstream_message(&body))
            }
            UpstreamFailure::Status { status, body, .. } => ScrapeError::Upstream {
                status: status.as_u16(),
                message: upstream_message(&body),
            },
        }
    }
}

#[async_trait]
impl ProfileSource for PrivateApiSource {
    fn name(&self) -> &'static str {
        "private_api"
    }

    async fn fetch_user(
        &self,
        username: &str,
        ctx: &FetchContext,
    ) -> Result<SourceUser, ScrapeError> {
        let lookup = self
            .get(
                self.endpoint(&["users", username, "usernameinfo"])?,
                &[],
                ctx,
                RequestSlot::Lookup,
            )
            .await?;
        let pk = lookup
            .pointer("/user/pk")
            .and_then(id_string)
            .ok_or_else(|| ScrapeError::decode("usernameinfo response carries no user pk"))?;

        let info = self
            .get(
                self.endpoint(&["users", &pk, "info"])?,
                &[],
                ctx,
                RequestSlot::Lookup,
            )
            .await?;
        let raw = info
            .get("user")
            .cloned()
            .ok_or_else(|| ScrapeError::decode("user info response carries no user"))?;

        decode_user(raw)
    }

    async fn fetch_recent_media(
        &self,
        user: &SourceUser,
        amount: usize,
        ctx: &FetchContext,
    ) -> Result<MediaBatch, ScrapeError> {
        let mut batch = MediaBatch::default();
        let mut max_id: Option<String> = None;

        for page in 0..MAX_FEED_PAGES {
            if batch.items.len() >= amount {
                break;
            }

            let mut query = vec![("count", (amount - batch.items.len()).to_string())];
            if let Some(cursor) = &max_id {
                query.push(("max_id", cursor.clone()));
            }

            let value = self
                .get(
                    self.endpoint(&["feed", "user", &user.pk])?,
                    &query,
                    ctx,
                    RequestSlot::Item(page),
                )
                .await?;
            let feed: FeedPage = serde_json::from_value(value).map_err(ScrapeError::decode)?;

            for item in feed.items {
                match decode_media(item.clone()) {
                    Ok(media) => batch.items.push(media),
                    Err(reason) => {
                        let id = item.get("pk").and_then(id_string);
                        warn!("Skipping undecodable media {:?}: {}", id, reason);
                        batch.skipped.push(SkippedMedia { id, reason });
                    }
                }
            }

            max_id = feed.next_max_id.as_ref().and_then(id_string);
            if !feed.more_available || max_id.is_none() {
                break;
            }
        }

        batch.truncate(amount);
        Ok(batch)
    }
}

#[derive(Debug, Deserialize)]
struct FeedPage {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default)]
    more_available: bool,
    next_max_id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct PrivateUser {
    pk: Value,
    username: String,
    full_name: Option<String>,
    biography: Option<String>,
    profile_pic_url: Option<String>,
    hd_profile_pic_url_info: Option<ImageCandidate>,
    follower_count: Option<u64>,
    following_count: Option<u64>,
    #[serde(default)]
    is_verified: bool,
    #[serde(default)]
    is_private: bool,
}

#[derive(Debug, Deserialize)]
struct ImageCandidate {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ImageVersions {
    #[serde(default)]
    candidates: Vec<ImageCandidate>,
}

#[derive(Debug, Deserialize)]
struct Caption {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usertags {
    #[serde(rename = "in", default)]
    tags: Vec<Usertag>,
}

#[derive(Debug, Deserialize)]
struct Usertag {
    user: TaggedUser,
}

#[derive(Debug, Deserialize)]
struct TaggedUser {
    username: String,
}

#[derive(Debug, Deserialize)]
struct CarouselItem {
    image_versions2: Option<ImageVersions>,
    video_versions: Option<Vec<ImageCandidate>>,
}

#[derive(Debug, Deserialize)]
struct PrivateMedia {
    pk: Value,
    code: Option<String>,
    taken_at: Option<i64>,
    #[serde(default)]
    media_type: u8,
    product_type: Option<String>,
    caption: Option<Caption>,
    like_count: Option<i64>,
    comment_count: Option<i64>,
    view_count: Option<i64>,
    play_count: Option<i64>,
    usertags: Option<Usertags>,
    image_versions2: Option<ImageVersions>,
    thumbnail_url: Option<String>,
    video_versions: Option<Vec<ImageCandidate>>,
    carousel_media: Option<Vec<CarouselItem>>,
}

fn first_candidate(versions: Option<ImageVersions>) -> Option<String> {
    versions.and_then(|v| v.candidates.into_iter().next().map(|c| c.url))
}

fn decode_user(raw: Value) -> Result<SourceUser, ScrapeError> {
    let user: PrivateUser = serde_json::from_value(raw.clone()).map_err(ScrapeError::decode)?;
    let pk = id_string(&user.pk).ok_or_else(|| ScrapeError::decode("user has no pk"))?;

    Ok(SourceUser {
        pk,
        username: user.username,
        full_name: user.full_name,
        biography: user.biography,
        profile_pic_url: user
            .hd_profile_pic_url_info
            .map(|c| c.url)
            .or(user.profile_pic_url),
        follower_count: user.follower_count,
        following_count: user.following_count,
        is_verified: user.is_verified,
        is_private: user.is_private,
        raw,
        embedded_media: None,
    })
}

fn decode_media(raw: Value) -> Result<SourceMedia, String> {
    let media: PrivateMedia = serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?;
    let pk = id_string(&media.pk).ok_or("media has no pk")?;

    let kind = match media.media_type {
        1 => MediaKind::Image,
        2 => MediaKind::Video,
        8 => MediaKind::Album,
        _ => MediaKind::Unknown,
    };

    let first_child_url = media
        .carousel_media
        .and_then(|children| children.into_iter().next())
        .and_then(|child| {
            first_candidate(child.image_versions2).or_else(|| {
                child
                    .video_versions
                    .and_then(|v| v.into_iter().next().map(|c| c.url))
            })
        });

    Ok(SourceMedia {
        pk,
        code: media.code,
        taken_at: media
            .taken_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        caption: media.caption.and_then(|c| c.text),
        kind,
        product_type: media.product_type,
        like_count: media.like_count,
        comment_count: media.comment_count,
        view_count: media.view_count.or(media.play_count),
        tagged_usernames: media
            .usertags
            .map(|u| u.tags.into_iter().map(|t| t.user.username).collect())
            .unwrap_or_default(),
        display_url: first_candidate(media.image_versions2).or(media.thumbnail_url),
        video_url: media
            .video_versions
            .and_then(|v| v.into_iter().next().map(|c| c.url)),
        first_child_url,
        raw,
    })
}
