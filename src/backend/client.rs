use crate::config::HttpSettings;
use crate::http::build_client;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("unauthorized: HTTP {0}")]
    Unauthorized(u16),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
}

impl BackendError {
    /// The backend refused the payload itself, as opposed to failing to serve it.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BackendError::Status { status, .. } if *status == 400 || *status == 422
        ) || matches!(self, BackendError::Rejected(_))
    }
}

/// Supplies the opaque bearer credential attached to every backend call.
pub trait CredentialSource: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct StaticCredential(Option<String>);

impl StaticCredential {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.trim().is_empty()))
    }
}

impl CredentialSource for StaticCredential {
    fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// reqwest client for the listing backend. Implements the post source, media
/// extractor and listing service traits (see the sibling modules).
#[derive(Clone)]
pub struct HttpBackend {
    base_url: Url,
    credential: Arc<dyn CredentialSource>,
    http: Client,
    /// Held across a create and its read-back so an acknowledged create never
    /// reads another create's entry.
    pub(super) create_lock: Arc<Mutex<()>>,
}

impl HttpBackend {
    pub fn new(
        base_url: &str,
        credential: Arc<dyn CredentialSource>,
        settings: &HttpSettings,
    ) -> Result<Self, BackendError> {
        let normalised = format!("{}/", base_url.trim().trim_end_matches('/'));
        let base_url = Url::parse(&normalised)
            .map_err(|err| BackendError::Request(format!("invalid base url `{base_url}`: {err}")))?;
        Ok(Self {
            base_url,
            credential,
            http: build_client(settings),
            create_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| BackendError::Request(format!("invalid endpoint `{path}`: {err}")))
    }

    /// Resolves a media path the backend returned relative to its own root.
    pub(crate) fn absolute_media_url(&self, path: &str) -> String {
        let trimmed = path.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return trimmed.to_string();
        }
        self.base_url
            .join(trimmed.trim_start_matches('/'))
            .map(|url| url.to_string())
            .unwrap_or_else(|_| trimmed.to_string())
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        let url = self.endpoint(path)?;
        let response = self.send(self.http.get(url)).await?;
        decode(response).await
    }

    pub(crate) async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, BackendError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        let response = self.send(self.http.post(url).json(body)).await?;
        decode(response).await
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let request = match self.credential.bearer_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request
            .send()
            .await
            .map_err(|err| BackendError::Request(err.to_string()))?;

        let status = response.status();
        debug!(target = "social2listing.backend", url = %response.url(), status = status.as_u16(), "backend_response");
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BackendError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: truncate(&body, 256),
            });
        }
        Ok(response)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|err| BackendError::Request(err.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|err| BackendError::Deserialize(err.to_string()))
}

/// The backend acknowledges some calls with a bare `{"message": ...}`; only
/// messages reporting success count as accepted.
pub(crate) fn message_reports_success(message: &str) -> bool {
    message.to_ascii_lowercase().contains("success")
}

fn truncate(input: &str, max: usize) -> String {
    match input.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &input[..idx]),
        None => input.to_string(),
    }
}
