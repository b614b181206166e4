mod config_tests;
mod post_mapper_tests;
mod sync_service_tests;

use crate::error::ScrapeError;
use crate::source::{
    FetchContext, MediaBatch, MediaKind, ProfileSource, SkippedMedia, SourceMedia, SourceUser,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

/// In-memory source returning canned data and recording what it was asked
pub(crate) struct FakeSource {
    pub user: SourceUser,
    pub media: Vec<SourceMedia>,
    pub skipped: Vec<SkippedMedia>,
    pub user_error: Mutex<Option<ScrapeError>>,
    pub requested: Mutex<Vec<(String, String)>>,
    pub requested_amounts: Mutex<Vec<usize>>,
}

impl FakeSource {
    pub fn new(media_count: usize) -> Self {
        Self {
            user: sample_user("instagram"),
            media: (0..media_count).map(|i| sample_media(&i.to_string())).collect(),
            skipped: Vec::new(),
            user_error: Mutex::new(None),
            requested: Mutex::new(Vec::new()),
            requested_amounts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: ScrapeError) -> Self {
        let source = Self::new(0);
        *source.user_error.lock() = Some(error);
        source
    }
}

#[async_trait]
impl ProfileSource for FakeSource {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn fetch_user(
        &self,
        username: &str,
        ctx: &FetchContext,
    ) -> Result<SourceUser, ScrapeError> {
        self.requested
            .lock()
            .push((username.to_string(), ctx.egress.key().to_string()));
        if let Some(error) = self.user_error.lock().take() {
            return Err(error);
        }
        Ok(self.user.clone())
    }

    async fn fetch_recent_media(
        &self,
        _user: &SourceUser,
        amount: usize,
        _ctx: &FetchContext,
    ) -> Result<MediaBatch, ScrapeError> {
        self.requested_amounts.lock().push(amount);
        Ok(MediaBatch {
            items: self.media.clone(),
            skipped: self.skipped.clone(),
        })
    }
}

pub(crate) fn sample_user(username: &str) -> SourceUser {
    SourceUser {
        pk: "25025320".to_string(),
        username: username.to_string(),
        full_name: Some("Instagram".to_string()),
        biography: Some("Bringing you closer".to_string()),
        profile_pic_url: Some("https://cdn.example/avatar.jpg".to_string()),
        follower_count: Some(1_000),
        following_count: Some(42),
        is_verified: true,
        is_private: false,
        raw: json!({"id": "25025320", "username": username}),
        embedded_media: None,
    }
}

pub(crate) fn sample_media(pk: &str) -> SourceMedia {
    SourceMedia {
        pk: pk.to_string(),
        code: Some(format!("C{pk}")),
        taken_at: None,
        caption: Some("Sunset #Travel with @Friend".to_string()),
        kind: MediaKind::Image,
        product_type: None,
        like_count: Some(10),
        comment_count: Some(2),
        view_count: None,
        tagged_usernames: Vec::new(),
        display_url: Some(format!("https://cdn.example/{pk}.jpg")),
        video_url: None,
        first_child_url: None,
        raw: json!({"pk": pk}),
    }
}
