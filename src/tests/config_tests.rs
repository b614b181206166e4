use crate::config::{load_proxy_list, PacingMode, ServiceConfig, SourceKind};
use crate::private_api_source::DEFAULT_PRIVATE_API_USER_AGENT;
use crate::proxy_rotation::RotationStrategy;
use crate::rate_limit_manager::PacingPolicy;
use crate::web_profile_source::{DEFAULT_WEB_BASE, DEFAULT_WEB_USER_AGENT};
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<ServiceConfig> {
    let env: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    ServiceConfig::from_lookup(|key| env.get(key).cloned())
}

#[test]
fn test_defaults() {
    let config = config_from(&[]).unwrap();

    assert_eq!(config.bind_addr, "127.0.0.1:8000");
    assert_eq!(config.source, SourceKind::Web);
    assert_eq!(config.session_id, None);
    assert_eq!(config.web_base, DEFAULT_WEB_BASE);
    assert_eq!(config.request_timeout, Duration::from_secs(20));
    assert_eq!(config.max_posts, 10);
    assert_eq!(config.web_page_size, 12);
    assert_eq!(config.requests_per_minute, 30);
    assert_eq!(config.max_throttle_wait, Duration::from_secs(30));
    assert_eq!(config.pacing.mode, PacingMode::Auto);
    assert!(config.proxy.urls.is_empty());
    assert_eq!(config.proxy.rotation, RotationStrategy::RoundRobin);
    assert_eq!(config.proxy.max_failures, 3);
    assert_eq!(config.proxy.cooldown, Duration::from_secs(300));
    assert_eq!(config.effective_user_agent(), DEFAULT_WEB_USER_AGENT);
}

#[test]
fn test_private_api_requires_session() {
    let err = config_from(&[("SCRAPER_SOURCE", "private_api")]).unwrap_err();
    assert!(err.to_string().contains("IG_SESSION_ID"));

    let config = config_from(&[
        ("SCRAPER_SOURCE", "private_api"),
        ("IG_SESSION_ID", "abc%3A123"),
    ])
    .unwrap();
    assert_eq!(config.source, SourceKind::PrivateApi);
    assert_eq!(config.session_id.as_deref(), Some("abc%3A123"));
    assert_eq!(config.effective_user_agent(), DEFAULT_PRIVATE_API_USER_AGENT);
}

#[test]
fn test_blank_values_count_as_unset() {
    let config = config_from(&[("SCRAPER_SOURCE", "  "), ("BIND_ADDR", "")]).unwrap();
    assert_eq!(config.source, SourceKind::Web);
    assert_eq!(config.bind_addr, "127.0.0.1:8000");
}

#[test]
fn test_overrides_and_clamping() {
    let config = config_from(&[
        ("BIND_ADDR", "0.0.0.0:9000"),
        ("MAX_POSTS", "50"),
        ("WEB_PAGE_SIZE", "0"),
        ("REQUESTS_PER_MINUTE", "0"),
        ("REQUEST_TIMEOUT_SECS", "5"),
        ("IG_USER_AGENT", "custom-agent"),
    ])
    .unwrap();

    assert_eq!(config.bind_addr, "0.0.0.0:9000");
    assert_eq!(config.max_posts, 10);
    assert_eq!(config.web_page_size, 1);
    assert_eq!(config.requests_per_minute, 1);
    assert_eq!(config.request_timeout, Duration::from_secs(5));
    assert_eq!(config.effective_user_agent(), "custom-agent");
}

#[test]
fn test_unparseable_numbers_fall_back_to_defaults() {
    let config = config_from(&[("MAX_POSTS", "many"), ("PROXY_COOLDOWN_SECS", "-1")]).unwrap();
    assert_eq!(config.max_posts, 10);
    assert_eq!(config.proxy.cooldown, Duration::from_secs(300));
}

#[test]
fn test_unknown_enums_are_errors() {
    assert!(config_from(&[("SCRAPER_SOURCE", "graph")]).is_err());
    assert!(config_from(&[("PACING_POLICY", "exponential")]).is_err());
    assert!(config_from(&[("PROXY_ROTATION", "sticky")]).is_err());
}

#[test]
fn test_auto_pacing_depends_on_source() {
    let config = config_from(&[]).unwrap();

    assert_eq!(
        config.pacing.policy_for(SourceKind::Web),
        PacingPolicy::LinearRamp {
            base: Duration::from_millis(1500),
            step: Duration::from_millis(100),
        }
    );
    assert_eq!(
        config.pacing.policy_for(SourceKind::PrivateApi),
        PacingPolicy::Jittered {
            min: Duration::from_millis(1000),
            max: Duration::from_millis(3000),
        }
    );
}

#[test]
fn test_explicit_pacing_overrides_source_default() {
    let config = config_from(&[("PACING_POLICY", "none")]).unwrap();
    assert_eq!(config.pacing.policy_for(SourceKind::Web), PacingPolicy::None);

    let config = config_from(&[
        ("PACING_POLICY", "jitter"),
        ("PACING_MIN_MS", "10"),
        ("PACING_MAX_MS", "20"),
    ])
    .unwrap();
    assert_eq!(
        config.pacing.policy_for(SourceKind::Web),
        PacingPolicy::Jittered {
            min: Duration::from_millis(10),
            max: Duration::from_millis(20),
        }
    );
}

#[test]
fn test_proxy_urls_from_env_and_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# residential pool").unwrap();
    writeln!(file, "http://c.example:8080").unwrap();
    writeln!(file).unwrap();
    writeln!(file, "  socks5://d.example:1080  ").unwrap();

    let path = file.path().to_string_lossy().to_string();
    let config = config_from(&[
        ("PROXY_URLS", "http://a.example:8080, ,http://b.example:8080"),
        ("PROXY_LIST_FILE", path.as_str()),
        ("PROXY_ROTATION", "random"),
        ("PROXY_MAX_FAILURES", "5"),
    ])
    .unwrap();

    assert_eq!(
        config.proxy.urls,
        vec![
            "http://a.example:8080",
            "http://b.example:8080",
            "http://c.example:8080",
            "socks5://d.example:1080",
        ]
    );
    assert_eq!(config.proxy.rotation, RotationStrategy::Random);
    assert_eq!(config.proxy.max_failures, 5);
}

#[test]
fn test_missing_proxy_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("proxies.txt");
    assert!(load_proxy_list(&missing).is_err());

    let path = missing.to_string_lossy().to_string();
    assert!(config_from(&[("PROXY_LIST_FILE", path.as_str())]).is_err());
}
