//! The seam between the sync service and the Instagram backends

use crate::error::ScrapeError;
use crate::proxy_rotation::Egress;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;

/// Per-request values every outbound call needs
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub egress: Egress,
    /// Opaque caller identifier, carried for log correlation only
    pub caller_id: String,
}

impl FetchContext {
    pub fn direct(caller_id: impl Into<String>) -> Self {
        Self {
            egress: Egress::Direct,
            caller_id: caller_id.into(),
        }
    }
}

/// User as reported by a source, before normalization
#[derive(Debug, Clone, Default)]
pub struct SourceUser {
    pub pk: String,
    pub username: String,
    pub full_name: Option<String>,
    pub biography: Option<String>,
    pub profile_pic_url: Option<String>,
    pub follower_count: Option<u64>,
    pub following_count: Option<u64>,
    pub is_verified: bool,
    pub is_private: bool,
    pub raw: Value,
    /// Media page the source delivered together with the profile, if any
    pub embedded_media: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Album,
    Unknown,
}

/// Media item as reported by a source, before normalization
#[derive(Debug, Clone)]
pub struct SourceMedia {
    pub pk: String,
    pub code: Option<String>,
    pub taken_at: Option<DateTime<Utc>>,
    pub caption: Option<String>,
    pub kind: MediaKind,
    pub product_type: Option<String>,
    pub like_count: Option<i64>,
    pub comment_count: Option<i64>,
    pub view_count: Option<i64>,
    pub tagged_usernames: Vec<String>,
    pub display_url: Option<String>,
    pub video_url: Option<String>,
    pub first_child_url: Option<String>,
    pub raw: Value,
}

/// A media item that could not be decoded
#[derive(Debug, Clone)]
pub struct SkippedMedia {
    pub id: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct MediaBatch {
    pub items: Vec<SourceMedia>,
    pub skipped: Vec<SkippedMedia>,
}

impl MediaBatch {
    pub fn truncate(&mut self, amount: usize) {
        self.items.truncate(amount);
    }
}

/// A backend able to resolve a username to profile data and recent media
#[async_trait]
pub trait ProfileSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_user(
        &self,
        username: &str,
        ctx: &FetchContext,
    ) -> Result<SourceUser, ScrapeError>;

    async fn fetch_recent_media(
        &self,
        user: &SourceUser,
        amount: usize,
        ctx: &FetchContext,
    ) -> Result<MediaBatch, ScrapeError>;
}

/// How one upstream call went wrong, before a source classifies it
#[derive(Debug)]
pub enum UpstreamFailure {
    Transport(reqwest::Error),
    Status {
        status: StatusCode,
        retry_after: Option<u64>,
        body: String,
    },
    Decode(String),
}

/// Send a request and decode a JSON body from a 2xx response
pub async fn send_json(request: RequestBuilder) -> Result<Value, UpstreamFailure> {
    let response = request.send().await.map_err(UpstreamFailure::Transport)?;
    let status = response.status();

    if !status.is_success() {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        return Err(UpstreamFailure::Status {
            status,
            retry_after,
            body,
        });
    }

    let bytes = response.bytes().await.map_err(UpstreamFailure::Transport)?;
    serde_json::from_slice(&bytes).map_err(|e| UpstreamFailure::Decode(e.to_string()))
}

/// Best-effort human message out of an upstream error body
pub fn upstream_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

/// Read a JSON id that may be encoded as a number or a string
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
