use super::client::{BackendError, HttpBackend, message_reports_success};
use crate::models::{CreateListingRequest, ListingEntry};
use crate::pipeline::ListingService;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

const CREATE_PATH: &str = "social2amazon";
const LIST_PATH: &str = "previous_listing_data";
const UPDATE_PATH: &str = "update_listing_data";
const LATEST_PATH: &str = "recent_fetched_post";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CreateListingPayload {
    Entry(Box<ListingEntry>),
    Ack { message: String },
}

#[async_trait]
impl ListingService for HttpBackend {
    async fn create_listing(
        &self,
        request: &CreateListingRequest,
    ) -> Result<ListingEntry, BackendError> {
        // The ack shape is only known after the POST, so every create is serialized.
        let _create = self.create_lock.lock().await;
        let payload: CreateListingPayload = self.post_json(CREATE_PATH, request).await?;
        match payload {
            CreateListingPayload::Entry(entry) => Ok(*entry),
            CreateListingPayload::Ack { message } if message_reports_success(&message) => {
                // Acknowledged without a body: the new entry is the most recent one.
                debug!(target = "social2listing.backend", post_link = %request.post_link, "create_ack_read_back");
                self.latest_listing().await?.ok_or_else(|| {
                    BackendError::Deserialize("listing acknowledged but not readable".into())
                })
            }
            CreateListingPayload::Ack { message } => Err(BackendError::Rejected(message)),
        }
    }

    async fn list_listings(&self) -> Result<Vec<ListingEntry>, BackendError> {
        self.get_json(LIST_PATH).await
    }

    async fn update_listing(&self, entry: &ListingEntry) -> Result<ListingEntry, BackendError> {
        self.post_json(UPDATE_PATH, entry).await
    }

    async fn latest_listing(&self) -> Result<Option<ListingEntry>, BackendError> {
        let value: Value = self.get_json(LATEST_PATH).await?;
        let has_id = match value.get("product_id") {
            Some(Value::String(id)) => !id.trim().is_empty(),
            Some(Value::Number(_)) => true,
            _ => false,
        };
        if !has_id {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|err| BackendError::Deserialize(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::backend_for;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    /// Post link of the last create the mock backend accepted.
    #[derive(Clone, Default)]
    struct LastCreated(Arc<Mutex<Option<String>>>);

    struct AckCreate(LastCreated);

    impl Respond for AckCreate {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
            let link = body["post_link"].as_str().map(str::to_string);
            *self.0.0.lock().unwrap() = link;
            ResponseTemplate::new(200)
                .set_body_json(json!({"message": "Data added successfully"}))
                .set_delay(Duration::from_millis(200))
        }
    }

    struct LatestOf(LastCreated);

    impl Respond for LatestOf {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            let link = self.0.0.lock().unwrap().clone().unwrap_or_default();
            ResponseTemplate::new(200)
                .set_body_json(listing_json(&format!("listing-of-{link}"), false))
        }
    }

    fn listing_json(id: &str, approved: bool) -> Value {
        json!({
            "product_id": id,
            "product_title": "Linen Shirt",
            "price": "$35",
            "product_description": "Breathable linen.",
            "about_this_item": "100% linen",
            "images_list": ["https://cdn.example.com/shirt.jpg"],
            "product_details": {"Brand": "Acme"},
            "created_at": "2025-02-01T09:30:00Z",
            "updated_at": "2025-02-01T09:30:00Z",
            "approved": approved
        })
    }

    fn request() -> CreateListingRequest {
        CreateListingRequest {
            post_link: "https://www.instagram.com/shop/p/A1/".into(),
            images: vec!["https://cdn.example.com/shirt.jpg".into()],
            description: "linen shirt".into(),
        }
    }

    #[tokio::test]
    async fn create_returns_entry_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/social2amazon"))
            .and(body_partial_json(json!({
                "post_link": "https://www.instagram.com/shop/p/A1/",
                "image_url": ["https://cdn.example.com/shirt.jpg"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing_json("42", false)))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend_for(&server, None);
        let entry = backend.create_listing(&request()).await.expect("entry");
        assert_eq!(entry.product_id, "42");
        assert!(!entry.approved);
    }

    #[tokio::test]
    async fn create_ack_reads_back_latest() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/social2amazon"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"message": "Data added successfully"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/recent_fetched_post"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing_json("77", false)))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend_for(&server, None);
        let entry = backend.create_listing(&request()).await.expect("entry");
        assert_eq!(entry.product_id, "77");
    }

    #[tokio::test]
    async fn concurrent_acked_creates_read_back_their_own_entries() {
        let server = MockServer::start().await;
        let last = LastCreated::default();
        Mock::given(method("POST"))
            .and(path("/social2amazon"))
            .respond_with(AckCreate(last.clone()))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/recent_fetched_post"))
            .respond_with(LatestOf(last))
            .expect(2)
            .mount(&server)
            .await;

        let backend = backend_for(&server, None);
        let first = CreateListingRequest {
            post_link: "A".into(),
            ..request()
        };
        let second = CreateListingRequest {
            post_link: "B".into(),
            ..request()
        };
        let (a, b) = tokio::join!(
            backend.create_listing(&first),
            backend.create_listing(&second)
        );
        assert_eq!(a.expect("entry for A").product_id, "listing-of-A");
        assert_eq!(b.expect("entry for B").product_id, "listing-of-B");
    }

    #[tokio::test]
    async fn create_rejection_message_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/social2amazon"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"message": "Please connect your social media accounts"}),
            ))
            .mount(&server)
            .await;

        let backend = backend_for(&server, None);
        let err = backend.create_listing(&request()).await.expect_err("rejected");
        assert!(matches!(err, BackendError::Rejected(_)));
    }

    #[tokio::test]
    async fn latest_listing_empty_serializer_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/recent_fetched_post"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "product_id": "",
                "product_title": "",
                "images_list": null,
                "created_at": null
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server, None);
        assert!(backend.latest_listing().await.expect("latest").is_none());
    }

    #[tokio::test]
    async fn update_posts_full_entry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/update_listing_data"))
            .and(body_partial_json(json!({"product_id": "42", "approved": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing_json("42", true)))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend_for(&server, None);
        let mut entry: ListingEntry =
            serde_json::from_value(listing_json("42", false)).expect("entry");
        entry.approved = true;
        let saved = backend.update_listing(&entry).await.expect("saved");
        assert!(saved.approved);
    }
}
