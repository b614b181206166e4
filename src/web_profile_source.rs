//! Anonymous source backed by the public web endpoints
//!
//! The profile lookup returns the first timeline page together with the user,
//! so a sync usually costs a single request. Further pages come from the
//! GraphQL timeline query.

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
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_WEB_BASE: &str = "https://www.instagram.com";
pub const WEB_APP_ID: &str = "936619743392459";
pub const DEFAULT_WEB_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";
const TIMELINE_QUERY_HASH: &str = "003056d32c2554def87228bc3fd9668a";

/// Upper bound on timeline pages walked for one sync
const MAX_TIMELINE_PAGES: usize = 5;

#[derive(Debug, Clone)]
pub struct WebSourceConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
    /// Posts requested per timeline page
    pub page_size: usize,
}

impl Default for WebSourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_WEB_BASE.to_string(),
            user_agent: DEFAULT_WEB_USER_AGENT.to_string(),
            timeout: Duration::from_secs(20),
            page_size: 12,
        }
    }
}

pub struct WebProfileSource {
    base_url: Url,
    page_size: usize,
    clients: HttpClientFactory,
    throttle: RequestThrottle,
}

impl WebProfileSource {
    pub fn new(config: WebSourceConfig, throttle: RequestThrottle) -> Result<Self, ScrapeError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ScrapeError::InvalidConfig(format!("invalid web base URL: {e}")))?;
        let clients = HttpClientFactory::new(config.timeout, config.user_agent)?;

        Ok(Self {
            base_url,
            page_size: config.page_size.clamp(1, 50),
            clients,
            throttle,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ScrapeError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ScrapeError::InvalidConfig("web base URL cannot carry a path".into()))?
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
        username: &str,
    ) -> Result<Value, ScrapeError> {
        self.throttle.acquire(ctx.egress.key(), slot).await?;
        let client = self.clients.client_for(&ctx.egress)?;

        debug!("GET {} via {}", url.path(), ctx.egress.label());
        let request = client
            .get(url)
            .query(query)
            .header("X-IG-App-ID", WEB_APP_ID)
            .header("X-Requested-With", "XMLHttpRequest")
            .header(reqwest::header::ACCEPT, "*/*")
            .header(reqwest::header::REFERER, self.base_url.as_str());

        match send_json(request).await {
            Ok(value) => Ok(value),
            Err(failure) => Err(self.classify(failure, ctx, username).await),
        }
    }

    async fn classify(
        &self,
        failure: UpstreamFailure,
        ctx: &FetchContext,
        username: &str,
    ) -> ScrapeError {
        match failure {
            UpstreamFailure::Transport(e) => ScrapeError::Connection(e.to_string()),
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
            UpstreamFailure::Status {
                status: StatusCode::NOT_FOUND,
                ..
            } => ScrapeError::not_found(username),
            UpstreamFailure::Status { status, .. }
                if status.is_redirection()
                    || matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) =>
            {
                ScrapeError::Connection(format!("login wall ({status})"))
            }
            UpstreamFailure::Status { status, body, .. } => ScrapeError::Upstream {
                status: status.as_u16(),
                message: upstream_message(&body),
            },
        }
    }

    async fn fetch_timeline_page(
        &self,
        user: &SourceUser,
        after: Option<&str>,
        page: usize,
        ctx: &FetchContext,
    ) -> Result<TimelinePage, ScrapeError> {
        let variables = json!({
            "id": user.pk,
            "first": self.page_size,
            "after": after,
        });
        let query = [
            ("query_hash", TIMELINE_QUERY_HASH.to_string()),
            ("variables", variables.to_string()),
        ];

        let value = self
            .get(
                self.endpoint(&["graphql", "query"])?,
                &query,
                ctx,
                RequestSlot::Item(page),
                &user.username,
            )
            .await?;
        let timeline = value
            .pointer("/data/user/edge_owner_to_timeline_media")
            .cloned()
            .ok_or_else(|| ScrapeError::decode("timeline response carries no media edge"))?;
        serde_json::from_value(timeline).map_err(ScrapeError::decode)
    }
}

#[async_trait]
impl ProfileSource for WebProfileSource {
    fn name(&self) -> &'static str {
        "web"
    }

    async fn fetch_user(
        &self,
        username: &str,
        ctx: &FetchContext,
    ) -> Result<SourceUser, ScrapeError> {
        let value = self
            .get(
                self.endpoint(&["api", "v1", "users", "web_profile_info"])?,
                &[("username", username.to_string())],
                ctx,
                RequestSlot::Lookup,
                username,
            )
            .await?;

        let raw = match value.pointer("/data/user") {
            Some(user) if !user.is_null() => user.clone(),
            _ => return Err(ScrapeError::not_found(username)),
        };

        let user = decode_user(raw)?;
        if user.is_private {
            return Err(ScrapeError::private(username));
        }
        Ok(user)
    }

    async fn fetch_recent_media(
        &self,
        user: &SourceUser,
        amount: usize,
        ctx: &FetchContext,
    ) -> Result<MediaBatch, ScrapeError> {
        let mut batch = MediaBatch::default();

        let mut timeline: TimelinePage = match &user.embedded_media {
            Some(page) => serde_json::from_value(page.clone()).map_err(ScrapeError::decode)?,
            None => TimelinePage::default(),
        };
        let mut need_fetch = user.embedded_media.is_none();
        let mut after: Option<String> = None;

        for page in 0..MAX_TIMELINE_PAGES {
            if need_fetch {
                timeline = self
                    .fetch_timeline_page(user, after.as_deref(), page, ctx)
                    .await?;
            }

            for edge in std::mem::take(&mut timeline.edges) {
                let Some(node) = edge.node else {
                    warn!("Skipping timeline edge without a node");
                    batch.skipped.push(SkippedMedia {
                        id: None,
                        reason: "edge has no node".to_string(),
                    });
                    continue;
                };
                match decode_media(node.clone()) {
                    Ok(media) => batch.items.push(media),
                    Err(reason) => {
                        let id = node.get("id").and_then(id_string);
                        warn!("Skipping undecodable media {:?}: {}", id, reason);
                        batch.skipped.push(SkippedMedia { id, reason });
                    }
                }
            }

            if batch.items.len() >= amount || !timeline.page_info.has_next_page {
                break;
            }
            match timeline.page_info.end_cursor.take() {
                Some(next) if !next.is_empty() => {
                    after = Some(next);
                    need_fetch = true;
                }
                _ => break,
            }
        }

        batch.truncate(amount);
        Ok(batch)
    }
}

#[derive(Debug, Default, Deserialize)]
struct TimelinePage {
    #[serde(default)]
    edges: Vec<Edge>,
    #[serde(default)]
    page_info: PageInfo,
}

#[derive(Debug, Default, Deserialize)]
struct PageInfo {
    #[serde(default)]
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Edge {
    node: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Count {
    count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WebUser {
    id: Value,
    username: String,
    full_name: Option<String>,
    biography: Option<String>,
    profile_pic_url: Option<String>,
    profile_pic_url_hd: Option<String>,
    edge_followed_by: Option<Count>,
    edge_follow: Option<Count>,
    #[serde(default)]
    is_verified: bool,
    #[serde(default)]
    is_private: bool,
}

#[derive(Debug, Deserialize)]
struct EdgeList<T> {
    #[serde(default = "Vec::new")]
    edges: Vec<NodeOf<T>>,
}

#[derive(Debug, Deserialize)]
struct NodeOf<T> {
    node: T,
}

#[derive(Debug, Deserialize)]
struct CaptionNode {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaggedNode {
    user: TaggedUser,
}

#[derive(Debug, Deserialize)]
struct TaggedUser {
    username: String,
}

#[derive(Debug, Deserialize)]
struct ChildNode {
    display_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebMedia {
    id: Value,
    shortcode: Option<String>,
    #[serde(rename = "__typename")]
    typename: Option<String>,
    #[serde(default)]
    is_video: bool,
    taken_at_timestamp: Option<i64>,
    product_type: Option<String>,
    edge_media_to_caption: Option<EdgeList<CaptionNode>>,
    edge_liked_by: Option<Count>,
    edge_media_preview_like: Option<Count>,
    edge_media_to_comment: Option<Count>,
    video_view_count: Option<i64>,
    display_url: Option<String>,
    thumbnail_src: Option<String>,
    video_url: Option<String>,
    edge_media_to_tagged_user: Option<EdgeList<TaggedNode>>,
    edge_sidecar_to_children: Option<EdgeList<ChildNode>>,
}

fn decode_user(mut raw: Value) -> Result<SourceUser, ScrapeError> {
    // The timeline page is handed on separately and kept out of raw_json
    let embedded_media = raw
        .as_object_mut()
        .and_then(|map| map.remove("edge_owner_to_timeline_media"));

    let user: WebUser = serde_json::from_value(raw.clone()).map_err(ScrapeError::decode)?;
    let pk = id_string(&user.id).ok_or_else(|| ScrapeError::decode("user has no id"))?;

    Ok(SourceUser {
        pk,
        username: user.username,
        full_name: user.full_name,
        biography: user.biography,
        profile_pic_url: user.profile_pic_url_hd.or(user.profile_pic_url),
        follower_count: user
            .edge_followed_by
            .and_then(|c| c.count)
            .map(|c| c.max(0) as u64),
        following_count: user
            .edge_follow
            .and_then(|c| c.count)
            .map(|c| c.max(0) as u64),
        is_verified: user.is_verified,
        is_private: user.is_private,
        raw,
        embedded_media,
    })
}

fn decode_media(raw: Value) -> Result<SourceMedia, String> {
    let media: WebMedia = serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?;
    let pk = id_string(&media.id).ok_or("media has no id")?;

    let kind = match media.typename.as_deref() {
        Some("GraphImage") => MediaKind::Image,
        Some("GraphVideo") => MediaKind::Video,
        Some("GraphSidecar") => MediaKind::Album,
        _ if media.is_video => MediaKind::Video,
        _ => MediaKind::Unknown,
    };

    let caption = media
        .edge_media_to_caption
        .and_then(|list| list.edges.into_iter().next())
        .and_then(|edge| edge.node.text);

    let like_count = media
        .edge_liked_by
        .and_then(|c| c.count)
        .or_else(|| media.edge_media_preview_like.and_then(|c| c.count));

    Ok(SourceMedia {
        pk,
        code: media.shortcode,
        taken_at: media
            .taken_at_timestamp
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        caption,
        kind,
        product_type: media.product_type,
        like_count,
        comment_count: media.edge_media_to_comment.and_then(|c| c.count),
        view_count: media.video_view_count,
        tagged_usernames: media
            .edge_media_to_tagged_user
            .map(|list| list.edges.into_iter().map(|e| e.node.user.username).collect())
            .unwrap_or_default(),
        display_url: media.display_url.or(media.thumbnail_src),
        video_url: media.video_url,
        first_child_url: media
            .edge_sidecar_to_children
            .and_then(|list| list.edges.into_iter().next())
            .and_then(|edge| edge.node.display_url),
        raw,
    })
}
