use eyre::WrapErr;
use metrics_exporter_prometheus::PrometheusBuilder;
use social2listing::{
    backend::{HttpBackend, StaticCredential},
    config::AppConfig,
    models::Platform,
    pipeline::PipelineController,
    routes::{AppState, router},
    security::AuthState,
};
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "social2listing.api", "server crashed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::from_env();
    let backend = Arc::new(
        HttpBackend::new(
            &config.backend_url,
            Arc::new(StaticCredential::new(config.backend_token.clone())),
            &config.http,
        )
        .wrap_err("invalid BACKEND_API_URL")?,
    );
    info!(target = "social2listing.api", backend = %backend.base_url(), "backend configured");

    let controller = PipelineController::new(backend.clone(), backend.clone(), backend);
    if let Err(err) = controller.catalog().refresh().await {
        warn!(target = "social2listing.api", error = %err, "initial catalog refresh failed");
    }
    for platform in Platform::ALL {
        if let Err(err) = controller.fetch_latest(platform).await {
            warn!(target = "social2listing.api", %platform, error = %err, "initial fetch failed");
        }
    }

    let openapi: serde_json::Value = serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or_else(|_| serde_json::json!({"openapi": "3.0.3"}));
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("failed to install prometheus recorder")?;

    let state = AppState {
        controller,
        openapi: Arc::new(openapi),
        prometheus,
        metrics_key: config.metrics_key.clone(),
        openapi_key: config.openapi_key.clone(),
    };
    let auth = AuthState::from_keys(config.dashboard_keys.as_deref());
    let app = router(state, auth, config.request_max_bytes);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(target = "social2listing.api", "listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
