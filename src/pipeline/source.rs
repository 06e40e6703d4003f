use crate::backend::BackendError;
use crate::models::{Platform, SocialPost};
use async_trait::async_trait;

/// Latest unconverted posts for one platform. Read-only, no retries; an empty
/// batch is not an error.
#[async_trait]
pub trait PostSource: Send + Sync {
    async fn fetch_latest(&self, platform: Platform) -> Result<Vec<SocialPost>, BackendError>;
}
