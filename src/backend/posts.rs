use super::client::{BackendError, HttpBackend, message_reports_success};
use crate::models::{Platform, RawPost, SocialPost};
use crate::pipeline::PostSource;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LatestPostsPayload {
    Bare(Vec<RawPost>),
    Envelope {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        post_links: Option<Vec<RawPost>>,
    },
}

pub(crate) fn latest_posts_path(platform: Platform) -> String {
    format!("fetch_latest_{}_post", platform.as_str())
}

#[async_trait]
impl PostSource for HttpBackend {
    async fn fetch_latest(&self, platform: Platform) -> Result<Vec<SocialPost>, BackendError> {
        let payload: LatestPostsPayload = self.get_json(&latest_posts_path(platform)).await?;
        let raw = match payload {
            LatestPostsPayload::Bare(posts) => posts,
            LatestPostsPayload::Envelope {
                post_links: Some(posts),
                ..
            } => posts,
            LatestPostsPayload::Envelope {
                message: Some(message),
                post_links: None,
            } if !message_reports_success(&message) => {
                return Err(BackendError::Rejected(message));
            }
            LatestPostsPayload::Envelope { .. } => Vec::new(),
        };

        let total = raw.len();
        let posts = raw
            .into_iter()
            .filter_map(|post| {
                let link = post.post_link.clone();
                let parsed = SocialPost::from_raw(platform, post);
                if parsed.is_none() {
                    warn!(target = "social2listing.backend", %platform, post_link = %link, "post_without_media_skipped");
                }
                parsed
            })
            .collect::<Vec<_>>();
        debug!(target = "social2listing.backend", %platform, total, kept = posts.len(), "latest_posts_parsed");
        Ok(posts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaKind;
    use crate::testing::backend_for;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn parses_envelope_with_mixed_media() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fetch_latest_instagram_post"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": "Posts fetched successfully",
                "post_links": [
                    {
                        "post_link": "https://www.instagram.com/shop/p/A1/",
                        "image_url": ["https://cdn.example.com/1.jpg", "https://cdn.example.com/2.jpg"],
                        "description": "carousel"
                    },
                    {
                        "post_link": "https://www.instagram.com/shop/p/B2/",
                        "video_url": "https://cdn.example.com/clip.mp4",
                        "description": "reel"
                    },
                    { "post_link": "https://www.instagram.com/shop/p/C3/", "description": "text only" }
                ]
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server, None);
        let posts = backend
            .fetch_latest(Platform::Instagram)
            .await
            .expect("posts");
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].media_kind(), MediaKind::ImageSet);
        assert_eq!(posts[1].media_kind(), MediaKind::Video);
        assert!(posts.iter().all(|p| p.platform == Platform::Instagram));
    }

    #[tokio::test]
    async fn null_post_list_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fetch_latest_facebook_post"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": "Posts fetched successfully",
                "post_links": null
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server, None);
        let posts = backend
            .fetch_latest(Platform::Facebook)
            .await
            .expect("posts");
        assert!(posts.is_empty());
    }

    #[tokio::test]
    async fn unsuccessful_message_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fetch_latest_facebook_post"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": "Please connect your social media accounts"
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server, None);
        let err = backend
            .fetch_latest(Platform::Facebook)
            .await
            .expect_err("should reject");
        assert!(matches!(err, BackendError::Rejected(_)));
    }

    #[tokio::test]
    async fn bare_array_is_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fetch_latest_facebook_post"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "post_link": "https://facebook.com/p/9", "image_url": ["a.jpg"], "description": "d" }
            ])))
            .mount(&server)
            .await;

        let backend = backend_for(&server, None);
        let posts = backend
            .fetch_latest(Platform::Facebook)
            .await
            .expect("posts");
        assert_eq!(posts.len(), 1);
    }
}
