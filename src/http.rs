use crate::config::HttpSettings;
use reqwest::Client;
use std::time::Duration;

/// Shared reqwest client. The request timeout bounds every remote call, so a
/// conversion job always resolves.
pub fn build_client(settings: &HttpSettings) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs))
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .user_agent(concat!("social2listing/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
}
