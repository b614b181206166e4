use super::{sample_media, FakeSource};
use crate::error::ScrapeError;
use crate::models::SyncRequest;
use crate::proxy_rotation::{ProxyPool, RotationStrategy};
use crate::source::SkippedMedia;
use crate::sync_service::SyncService;
use std::sync::Arc;
use std::time::Duration;

fn request(username: &str) -> SyncRequest {
    SyncRequest {
        username: username.to_string(),
        user_id: "caller-1".to_string(),
    }
}

fn proxy_pool(max_failures: u32) -> Arc<ProxyPool> {
    Arc::new(
        ProxyPool::new(
            vec!["http://proxy.example:8080".to_string()],
            RotationStrategy::RoundRobin,
            max_failures,
            Duration::from_secs(300),
        )
        .unwrap(),
    )
}

#[tokio::test]
async fn test_sync_normalizes_username_before_lookup() {
    let source = Arc::new(FakeSource::new(1));
    let service = SyncService::new(source.clone(), 10);

    let response = service.sync(&request("  @instagram ")).await.unwrap();
    assert_eq!(response.profile.username, "instagram");
    assert_eq!(
        source.requested.lock().clone(),
        vec![("instagram".to_string(), "direct".to_string())]
    );
}

#[tokio::test]
async fn test_sync_rejects_empty_username() {
    let source = Arc::new(FakeSource::new(1));
    let service = SyncService::new(source.clone(), 10);

    let err = service.sync(&request(" @ ")).await.unwrap_err();
    assert!(matches!(err, ScrapeError::EmptyUsername));
    assert!(source.requested.lock().is_empty());
}

#[tokio::test]
async fn test_sync_caps_posts_at_ten() {
    let source = Arc::new(FakeSource::new(25));
    let service = SyncService::new(source.clone(), 50);
    assert_eq!(service.max_posts(), 10);

    let response = service.sync(&request("instagram")).await.unwrap();
    assert_eq!(response.posts.len(), 10);
    assert_eq!(source.requested_amounts.lock().clone(), vec![10]);

    // Source order is preserved
    let ids: Vec<&str> = response
        .posts
        .iter()
        .map(|p| p.external_post_id.as_str())
        .collect();
    assert_eq!(ids, vec!["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"]);
}

#[tokio::test]
async fn test_sync_honors_lower_post_limit() {
    let source = Arc::new(FakeSource::new(8));
    let service = SyncService::new(source, 3);

    let response = service.sync(&request("instagram")).await.unwrap();
    assert_eq!(response.posts.len(), 3);
}

#[tokio::test]
async fn test_sync_with_fewer_posts_than_limit() {
    let source = Arc::new(FakeSource::new(0));
    let service = SyncService::new(source, 10);

    let response = service.sync(&request("instagram")).await.unwrap();
    assert!(response.posts.is_empty());
    assert_eq!(response.profile.external_id, "25025320");
}

#[tokio::test]
async fn test_skipped_posts_do_not_fail_the_sync() {
    let mut fake = FakeSource::new(2);
    fake.skipped.push(SkippedMedia {
        id: Some("broken".to_string()),
        reason: "missing field `pk`".to_string(),
    });
    fake.media.push(sample_media("2"));
    let service = SyncService::new(Arc::new(fake), 10);

    let response = service.sync(&request("instagram")).await.unwrap();
    assert_eq!(response.posts.len(), 3);
}

#[tokio::test]
async fn test_source_errors_propagate_unchanged() {
    let service = SyncService::new(
        Arc::new(FakeSource::failing(ScrapeError::not_found("ghost"))),
        10,
    );

    let err = service.sync(&request("ghost")).await.unwrap_err();
    assert_eq!(err.detail(), "Profile @ghost does not exist");
}

#[tokio::test]
async fn test_proxy_is_passed_to_source() {
    let source = Arc::new(FakeSource::new(1));
    let service = SyncService::new(source.clone(), 10).with_proxies(proxy_pool(3));

    service.sync(&request("instagram")).await.unwrap();
    let requested = source.requested.lock().clone();
    assert_eq!(requested[0].1, "http://proxy.example:8080#0");

    let report = service.proxy_pool().unwrap().report();
    assert_eq!(report[0].total_successes, 1);
}

#[tokio::test]
async fn test_empty_proxy_pool_is_ignored() {
    let pool = Arc::new(
        ProxyPool::new(vec![], RotationStrategy::RoundRobin, 3, Duration::from_secs(1)).unwrap(),
    );
    let service = SyncService::new(Arc::new(FakeSource::new(1)), 10).with_proxies(pool);
    assert!(service.proxy_pool().is_none());
}

#[tokio::test]
async fn test_throttling_counts_against_proxy() {
    let source = Arc::new(FakeSource::failing(ScrapeError::Throttled { retry_after: None }));
    let service = SyncService::new(source, 10).with_proxies(proxy_pool(1));

    let err = service.sync(&request("instagram")).await.unwrap_err();
    assert!(matches!(err, ScrapeError::Throttled { .. }));

    let report = service.proxy_pool().unwrap().report();
    assert_eq!(report[0].total_failures, 1);
    assert!(report[0].benched);
}

#[tokio::test]
async fn test_target_errors_do_not_count_against_proxy() {
    let source = Arc::new(FakeSource::failing(ScrapeError::private("hidden")));
    let service = SyncService::new(source, 10).with_proxies(proxy_pool(1));

    service.sync(&request("hidden")).await.unwrap_err();

    let report = service.proxy_pool().unwrap().report();
    assert_eq!(report[0].total_failures, 0);
    assert_eq!(report[0].total_successes, 0);
    assert!(!report[0].benched);
}
