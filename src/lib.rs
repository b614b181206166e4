pub mod config;
pub mod error;
pub mod models;
pub mod post_mapper;
pub mod private_api_source;
pub mod proxy_rotation;
pub mod rate_limit_manager;
pub mod routes;
pub mod source;
pub mod sync_service;
pub mod web_profile_source;

#[cfg(test)]
mod tests;

pub use config::{ServiceConfig, SourceKind};
pub use error::{ErrorBody, ScrapeError};
pub use models::{MediaUrl, Post, PostType, Profile, SyncRequest, SyncResponse, MAX_POSTS};
pub use private_api_source::{PrivateApiConfig, PrivateApiSource};
pub use proxy_rotation::{Egress, ProxyPool, RotationStrategy};
pub use rate_limit_manager::{PacingPolicy, RateLimitManager, RequestSlot, RequestThrottle};
pub use routes::{router, AppState};
pub use source::{FetchContext, MediaBatch, ProfileSource, SourceMedia, SourceUser};
pub use sync_service::SyncService;
pub use web_profile_source::{WebProfileSource, WebSourceConfig};
