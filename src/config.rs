use std::env;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub backend_url: String,
    pub backend_token: Option<String>,
    pub http: HttpSettings,
    pub request_max_bytes: usize,
    pub dashboard_keys: Option<String>,
    pub metrics_key: Option<String>,
    pub openapi_key: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            connect_timeout_secs: 5,
        }
    }
}

impl HttpSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            timeout_secs: parse_env("HTTP_TIMEOUT_SECS")
                .filter(|v: &u64| *v > 0)
                .unwrap_or(defaults.timeout_secs),
            connect_timeout_secs: parse_env("HTTP_CONNECT_TIMEOUT_SECS")
                .filter(|v: &u64| *v > 0)
                .unwrap_or(defaults.connect_timeout_secs),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: parse_env("PORT").unwrap_or(DEFAULT_PORT),
            backend_url: env::var("BACKEND_API_URL")
                .ok()
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            backend_token: non_empty_env("BACKEND_BEARER_TOKEN"),
            http: HttpSettings::from_env(),
            request_max_bytes: parse_env("REQUEST_MAX_BYTES")
                .filter(|v: &usize| *v > 0)
                .unwrap_or(256 * 1024),
            dashboard_keys: non_empty_env("DASHBOARD_API_KEYS"),
            metrics_key: non_empty_env("METRICS_KEY"),
            openapi_key: non_empty_env("OPENAPI_KEY"),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Url;

    #[test]
    fn default_port_does_not_shadow_default_backend() {
        let backend = Url::parse(DEFAULT_BACKEND_URL).expect("backend url");
        let backend_port = backend.port_or_known_default().expect("backend port");
        assert_ne!(backend_port, DEFAULT_PORT);
    }
}
