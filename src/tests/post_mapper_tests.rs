use super::{sample_media, sample_user};
use crate::models::PostType;
use crate::post_mapper::{
    extract_hashtags, extract_mentions, map_post, map_profile, normalize_username, post_type,
};
use crate::source::{MediaKind, SourceUser};
use chrono::{TimeZone, Utc};
use serde_json::json;

#[test]
fn test_normalize_username_strips_whitespace_and_one_at() {
    assert_eq!(normalize_username("  @instagram "), "instagram");
    assert_eq!(normalize_username("instagram"), "instagram");
    assert_eq!(normalize_username("@@double"), "@double");
    assert_eq!(normalize_username("   "), "");
    assert_eq!(normalize_username("@"), "");
}

#[test]
fn test_map_profile_fills_defaults() {
    let user = SourceUser {
        pk: "1".to_string(),
        username: "bare".to_string(),
        raw: json!({"pk": 1}),
        ..Default::default()
    };

    let profile = map_profile(&user);
    assert_eq!(profile.username, "bare");
    assert_eq!(profile.full_name, "");
    assert_eq!(profile.bio, "");
    assert_eq!(profile.avatar_url, None);
    assert_eq!(profile.follower_count, 0);
    assert_eq!(profile.following_count, 0);
    assert!(!profile.is_verified);
    assert_eq!(profile.external_id, "1");
    assert_eq!(profile.raw_json, json!({"pk": 1}));
}

#[test]
fn test_map_profile_copies_fields() {
    let profile = map_profile(&sample_user("instagram"));
    assert_eq!(profile.full_name, "Instagram");
    assert_eq!(profile.bio, "Bringing you closer");
    assert_eq!(
        profile.avatar_url.as_deref(),
        Some("https://cdn.example/avatar.jpg")
    );
    assert_eq!(profile.follower_count, 1_000);
    assert_eq!(profile.following_count, 42);
    assert!(profile.is_verified);
    assert_eq!(profile.external_id, "25025320");
}

#[test]
fn test_map_post_image() {
    let mut media = sample_media("3100000000000000001");
    media.taken_at = Utc.timestamp_opt(1_700_000_000, 0).single();

    let post = map_post(&media);
    assert_eq!(post.external_post_id, "3100000000000000001");
    assert_eq!(post.created_time, media.taken_at);
    assert_eq!(post.text, "Sunset #Travel with @Friend");
    assert_eq!(post.post_type, PostType::Image);
    assert_eq!(post.likes_count, 10);
    assert_eq!(post.comments_count, 2);
    assert_eq!(post.views_count, None);
    assert_eq!(post.hashtags, vec!["travel"]);
    assert_eq!(post.mentions, vec!["friend"]);
    assert_eq!(post.media_urls.len(), 1);
    assert_eq!(post.media_urls[0].kind, PostType::Image);
    assert_eq!(
        post.media_urls[0].url,
        "https://cdn.example/3100000000000000001.jpg"
    );
    assert_eq!(post.raw_json, json!({"pk": "3100000000000000001"}));
}

#[test]
fn test_map_post_clamps_negative_and_missing_counts() {
    let mut media = sample_media("1");
    media.like_count = Some(-1);
    media.comment_count = None;
    media.view_count = Some(-5);

    let post = map_post(&media);
    assert_eq!(post.likes_count, 0);
    assert_eq!(post.comments_count, 0);
    assert_eq!(post.views_count, Some(0));
}

#[test]
fn test_map_post_without_caption_or_url() {
    let mut media = sample_media("1");
    media.caption = None;
    media.display_url = None;

    let post = map_post(&media);
    assert_eq!(post.text, "");
    assert!(post.hashtags.is_empty());
    assert!(post.mentions.is_empty());
    assert!(post.media_urls.is_empty());
}

#[test]
fn test_video_falls_back_to_video_url() {
    let mut media = sample_media("1");
    media.kind = MediaKind::Video;
    media.display_url = None;
    media.video_url = Some("https://cdn.example/1.mp4".to_string());
    media.view_count = Some(900);

    let post = map_post(&media);
    assert_eq!(post.post_type, PostType::Video);
    assert_eq!(post.views_count, Some(900));
    assert_eq!(post.media_urls[0].kind, PostType::Video);
    assert_eq!(post.media_urls[0].url, "https://cdn.example/1.mp4");
}

#[test]
fn test_album_falls_back_to_first_child() {
    let mut media = sample_media("1");
    media.kind = MediaKind::Album;
    media.display_url = None;
    media.first_child_url = Some("https://cdn.example/child.jpg".to_string());

    let post = map_post(&media);
    assert_eq!(post.post_type, PostType::Album);
    assert_eq!(post.media_urls[0].kind, PostType::Album);
    assert_eq!(post.media_urls[0].url, "https://cdn.example/child.jpg");
}

#[test]
fn test_unknown_kind_resolves_by_video_url() {
    let mut media = sample_media("1");
    media.kind = MediaKind::Unknown;
    assert_eq!(post_type(&media), PostType::Image);

    media.video_url = Some("https://cdn.example/1.mp4".to_string());
    assert_eq!(post_type(&media), PostType::Video);
}

#[test]
fn test_tagged_users_come_before_caption_mentions() {
    let mut media = sample_media("1");
    media.caption = Some("with @bob and @Alice".to_string());
    media.tagged_usernames = vec!["alice".to_string(), "Carol".to_string()];

    let post = map_post(&media);
    assert_eq!(post.mentions, vec!["alice", "carol", "bob"]);
}

#[test]
fn test_extract_hashtags_dedups_case_insensitively() {
    let tags = extract_hashtags("#Rust is #fun, #rust again and #fun_times");
    assert_eq!(tags, vec!["rust", "fun", "fun_times"]);
}

#[test]
fn test_extract_hashtags_ignores_url_fragments() {
    let tags = extract_hashtags("see https://x.com/page#section and #Real");
    assert_eq!(tags, vec!["real"]);
}

#[test]
fn test_extract_hashtags_ignores_entities_and_mid_word() {
    assert_eq!(extract_hashtags("it&#39;s c#sharp (#tag)"), vec!["tag"]);
    assert_eq!(extract_hashtags("#first"), vec!["first"]);
}

#[test]
fn test_extract_mentions_ignores_emails() {
    let mentions = extract_mentions("mail me@example.com or ping @real.user. and @second_one");
    assert_eq!(mentions, vec!["real.user", "second_one"]);
}

#[test]
fn test_extract_mentions_at_start_of_text() {
    assert_eq!(extract_mentions("@first hello"), vec!["first"]);
    assert!(extract_mentions("no mentions here").is_empty());
}

#[test]
fn test_post_serializes_media_type_field() {
    let post = map_post(&sample_media("7"));
    let value = serde_json::to_value(&post).unwrap();
    assert_eq!(value["post_type"], "image");
    assert_eq!(value["media_urls"][0]["type"], "image");
    assert_eq!(value["created_time"], serde_json::Value::Null);
}
