use super::{CatalogManager, ListingService, PipelineError, PipelineErrorKind};
use crate::jobs::{JobGuard, JobRegistry};
use crate::models::{CreateListingRequest, ListingEntry, NormalizedPost, Platform};
use std::sync::Arc;
use tracing::{info, warn};

/// Admits conversions (one active job per post link) and turns normalized
/// posts into listing-creation calls.
#[derive(Clone)]
pub struct ConversionDispatcher {
    listings: Arc<dyn ListingService>,
    registry: JobRegistry,
    catalog: CatalogManager,
}

impl ConversionDispatcher {
    pub fn new(
        listings: Arc<dyn ListingService>,
        registry: JobRegistry,
        catalog: CatalogManager,
    ) -> Self {
        Self {
            listings,
            registry,
            catalog,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn admit(&self, post_link: &str, platform: Platform) -> Result<JobGuard, PipelineError> {
        self.registry.admit(post_link, platform)
    }

    /// Admission, dispatch and resolution in one call, for posts whose images
    /// are already known.
    pub async fn convert(
        &self,
        post_link: &str,
        platform: Platform,
        images: Vec<String>,
        description: String,
    ) -> Result<ListingEntry, PipelineError> {
        let guard = self.admit(post_link, platform)?;
        self.dispatch(guard, NormalizedPost { images, description })
            .await
    }

    /// Issues the creation call for an admitted job and resolves the job with
    /// the outcome. On success the catalog is signalled, not mutated.
    pub async fn dispatch(
        &self,
        mut guard: JobGuard,
        normalized: NormalizedPost,
    ) -> Result<ListingEntry, PipelineError> {
        if normalized.images.is_empty() {
            let err = PipelineError::conversion("a listing needs at least one image");
            guard.fail(&err);
            return Err(err);
        }

        guard.dispatching();
        let request = CreateListingRequest {
            post_link: guard.post_link().to_string(),
            images: normalized.images,
            description: normalized.description,
        };

        match self.listings.create_listing(&request).await {
            Ok(entry) => {
                info!(
                    target = "social2listing.pipeline",
                    platform = %guard.platform(),
                    post_link = %guard.post_link(),
                    product_id = %entry.product_id,
                    "listing_created"
                );
                self.catalog.signal_created(entry.clone());
                guard.succeed(&entry.product_id);
                Ok(entry)
            }
            Err(err) => {
                warn!(
                    target = "social2listing.pipeline",
                    platform = %guard.platform(),
                    post_link = %guard.post_link(),
                    error = %err,
                    "listing_creation_failed"
                );
                let err = PipelineError::new(
                    PipelineErrorKind::Conversion,
                    "convert",
                    format!("listing creation failed: {err}"),
                );
                guard.fail(&err);
                Err(err)
            }
        }
    }
}
