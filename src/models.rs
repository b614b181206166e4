//! Request and response shapes of the sync endpoint

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hard cap on posts returned by a single sync
pub const MAX_POSTS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub username: String,
    /// Opaque caller identifier, only used for logging
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub profile: Profile,
    pub posts: Vec<Post>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    pub full_name: String,
    pub bio: String,
    pub avatar_url: Option<String>,
    pub follower_count: u64,
    pub following_count: u64,
    pub is_verified: bool,
    pub external_id: String,
    pub raw_json: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    Image,
    Video,
    Album,
}

impl PostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostType::Image => "image",
            PostType::Video => "video",
            PostType::Album => "album",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaUrl {
    #[serde(rename = "type")]
    pub kind: PostType,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub external_post_id: String,
    pub created_time: Option<DateTime<Utc>>,
    pub text: String,
    pub post_type: PostType,
    pub likes_count: u64,
    pub comments_count: u64,
    pub views_count: Option<u64>,
    pub hashtags: Vec<String>,
    pub mentions: Vec<String>,
    pub media_urls: Vec<MediaUrl>,
    pub raw_json: serde_json::Value,
}

/// Liveness payload served on `GET /`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub status: String,
    pub service: String,
    pub source: String,
    pub proxies: usize,
}
