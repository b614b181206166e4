//! Canonical mapping from source records to the response schema

use crate::models::{MediaUrl, Post, PostType, Profile};
use crate::source::{MediaKind, SourceMedia, SourceUser};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

// A tag must not follow a word character, so URL fragments and entities like &#39; are ignored
static HASHTAG_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\w&#])#(\w+)").ok());

// Instagram usernames: letters, digits, underscore and inner dots, up to 30 chars
static MENTION_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\w@.])@([A-Za-z0-9_](?:[A-Za-z0-9_.]{0,28}[A-Za-z0-9_])?)").ok()
});

/// Trim whitespace, then drop a single leading "@"
pub fn normalize_username(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed.strip_prefix('@').unwrap_or(trimmed).to_string()
}

pub fn map_profile(user: &SourceUser) -> Profile {
    Profile {
        username: user.username.clone(),
        full_name: user.full_name.clone().unwrap_or_default(),
        bio: user.biography.clone().unwrap_or_default(),
        avatar_url: user.profile_pic_url.clone(),
        follower_count: user.follower_count.unwrap_or(0),
        following_count: user.following_count.unwrap_or(0),
        is_verified: user.is_verified,
        external_id: user.pk.clone(),
        raw_json: user.raw.clone(),
    }
}

pub fn post_type(media: &SourceMedia) -> PostType {
    match media.kind {
        MediaKind::Image => PostType::Image,
        MediaKind::Video => PostType::Video,
        MediaKind::Album => PostType::Album,
        MediaKind::Unknown if media.video_url.is_some() => PostType::Video,
        MediaKind::Unknown => PostType::Image,
    }
}

/// The single representative URL of a post
fn representative_url(media: &SourceMedia, kind: PostType) -> Option<String> {
    let own = media.display_url.clone();
    match kind {
        PostType::Album => own.or_else(|| media.first_child_url.clone()),
        PostType::Video => own.or_else(|| media.video_url.clone()),
        PostType::Image => own,
    }
}

fn count(value: Option<i64>) -> u64 {
    value.map(|v| v.max(0) as u64).unwrap_or(0)
}

pub fn map_post(media: &SourceMedia) -> Post {
    let kind = post_type(media);
    let text = media.caption.clone().unwrap_or_default();

    let mut mentions = media.tagged_usernames.clone();
    mentions.extend(extract_mentions(&text));

    Post {
        external_post_id: media.pk.clone(),
        created_time: media.taken_at,
        post_type: kind,
        likes_count: count(media.like_count),
        comments_count: count(media.comment_count),
        views_count: media.view_count.map(|v| v.max(0) as u64),
        hashtags: extract_hashtags(&text),
        mentions: dedup_lowercase(mentions),
        media_urls: representative_url(media, kind)
            .map(|url| vec![MediaUrl { kind, url }])
            .unwrap_or_default(),
        raw_json: media.raw.clone(),
        text,
    }
}

/// Hashtags in order of first appearance, lowercased, without the "#"
pub fn extract_hashtags(text: &str) -> Vec<String> {
    let Some(re) = HASHTAG_RE.as_ref() else {
        return Vec::new();
    };
    dedup_lowercase(re.captures_iter(text).map(|c| c[1].to_string()))
}

/// Mentioned usernames in order of first appearance, lowercased, without the "@"
pub fn extract_mentions(text: &str) -> Vec<String> {
    let Some(re) = MENTION_RE.as_ref() else {
        return Vec::new();
    };
    dedup_lowercase(re.captures_iter(text).map(|c| c[1].to_string()))
}

fn dedup_lowercase(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|s| s.to_lowercase())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}
