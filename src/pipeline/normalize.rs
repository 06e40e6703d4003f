use super::PipelineError;
use crate::backend::BackendError;
use crate::models::{NormalizedPost, PostMedia, SocialPost};
use async_trait::async_trait;
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, warn};

/// Video → still-image extraction service.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn extract_images(&self, video_url: &str) -> Result<Vec<String>, BackendError>;
}

#[derive(Clone)]
pub struct MediaNormalizer {
    extractor: Arc<dyn MediaExtractor>,
}

impl MediaNormalizer {
    pub fn new(extractor: Arc<dyn MediaExtractor>) -> Self {
        Self { extractor }
    }

    /// Image sets pass through untouched. Videos go through extraction, which
    /// must yield at least one image. Nothing is cached.
    pub async fn normalize(&self, post: &SocialPost) -> Result<NormalizedPost, PipelineError> {
        match &post.media {
            PostMedia::ImageSet { image_urls } => Ok(NormalizedPost {
                images: image_urls.clone(),
                description: post.description.clone(),
            }),
            PostMedia::Video { video_url } => {
                let extracted = self
                    .extractor
                    .extract_images(video_url)
                    .await
                    .map_err(|err| {
                        warn!(target = "social2listing.pipeline", post_link = %post.post_link, error = %err, "extraction_failed");
                        PipelineError::normalization(format!("extraction failed: {err}"))
                    })?;
                let images = deduplicate(extracted);
                if images.is_empty() {
                    return Err(PipelineError::normalization(format!(
                        "extraction yielded no images for {}",
                        post.post_link
                    )));
                }
                debug!(target = "social2listing.pipeline", post_link = %post.post_link, count = images.len(), "video_normalized");
                Ok(NormalizedPost {
                    images,
                    description: post.description.clone(),
                })
            }
        }
    }
}

/// Extracted frames only: blank URLs are dropped and repeats keep their first
/// position. Extraction that leaves nothing usable counts as empty.
fn deduplicate(images: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    images
        .into_iter()
        .map(|image| image.trim().to_string())
        .filter(|image| !image.is_empty())
        .filter(|image| seen.insert(image.clone()))
        .collect()
}
