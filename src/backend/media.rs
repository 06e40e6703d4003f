use super::client::{BackendError, HttpBackend, message_reports_success};
use crate::pipeline::MediaExtractor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const EXTRACT_PATH: &str = "convert_video_to_images";

#[derive(Debug, Serialize)]
struct ExtractRequest<'a> {
    video_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, alias = "images")]
    quality_images: Option<Vec<String>>,
}

#[async_trait]
impl MediaExtractor for HttpBackend {
    async fn extract_images(&self, video_url: &str) -> Result<Vec<String>, BackendError> {
        let payload: ExtractResponse = self
            .post_json(EXTRACT_PATH, &ExtractRequest { video_url })
            .await?;
        match payload.quality_images {
            Some(images) => Ok(images
                .iter()
                .filter(|path| !path.trim().is_empty())
                .map(|path| self.absolute_media_url(path))
                .collect()),
            None => match payload.message {
                Some(message) if !message_reports_success(&message) => {
                    Err(BackendError::Rejected(message))
                }
                _ => Ok(Vec::new()),
            },
        }
    }
}
