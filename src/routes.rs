use crate::jobs::ConversionJob;
use crate::models::{ApiError, DashboardStats, ListingEntry, ListingFields, Platform};
use crate::pipeline::{
    ApprovalOutcome, CatalogSnapshot, PipelineController, PipelineError, PipelineErrorKind,
    PlatformStatus,
};
use crate::security::{AuthContext, AuthState, require_dashboard_key};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Extension, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub controller: PipelineController,
    pub openapi: Arc<Value>,
    pub prometheus: PrometheusHandle,
    pub metrics_key: Option<String>,
    pub openapi_key: Option<String>,
}

pub fn router(state: AppState, auth: AuthState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/platforms/{platform}", get(platform_status))
        .route("/platforms/{platform}/fetch", post(fetch_platform))
        .route("/platforms/{platform}/convert", post(convert_post))
        .route("/jobs", get(job_status))
        .route("/listings", get(list_listings))
        .route("/listings/refresh", post(refresh_listings))
        .route("/listings/latest", get(latest_listing))
        .route("/listings/{product_id}", patch(edit_listing))
        .route("/listings/{product_id}/approval", post(set_approval))
        .route("/stats", get(stats))
        .route_layer(middleware::from_fn_with_state(auth, require_dashboard_key));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
}

/// Liveness probe. No auth.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "social2listing",
    }))
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.metrics_key
        && presented(&headers, "X-Metrics-Key") != Some(secret.as_str())
    {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus.render(),
    )
        .into_response()
}

async fn openapi_json(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.openapi_key
        && presented(&headers, "X-Docs-Key") != Some(secret.as_str())
    {
        let payload = ApiError {
            error: "unauthorized".into(),
            detail: Some("Provide X-Docs-Key".into()),
        };
        return (StatusCode::UNAUTHORIZED, Json(payload)).into_response();
    }
    Json((*state.openapi).clone()).into_response()
}

/// Fetch the latest posts for a platform and return its status.
///
/// - Method: `POST`
/// - Path: `/platforms/{platform}/fetch`
/// - Response: `PlatformStatus`
async fn fetch_platform(
    State(state): State<AppState>,
    Path(platform): Path<String>,
) -> Result<Json<PlatformStatus>, AppError> {
    crate::metrics::inc_requests("/platforms/fetch");
    let platform = parse_platform(&platform)?;
    state.controller.fetch_latest(platform).await?;
    Ok(Json(state.controller.status(platform)))
}

async fn platform_status(
    State(state): State<AppState>,
    Path(platform): Path<String>,
) -> Result<Json<PlatformStatus>, AppError> {
    crate::metrics::inc_requests("/platforms");
    let platform = parse_platform(&platform)?;
    Ok(Json(state.controller.status(platform)))
}

#[derive(Debug, Deserialize)]
struct ConvertRequest {
    post_link: String,
}

/// Convert one post from the platform's latest batch into a listing.
///
/// - Method: `POST`
/// - Path: `/platforms/{platform}/convert`
/// - Body: `{ "post_link": "..." }`
/// - Response: the created `ListingEntry`; `409` while a conversion for the
///   same post is running.
async fn convert_post(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(platform): Path<String>,
    Json(payload): Json<ConvertRequest>,
) -> Result<Json<ListingEntry>, AppError> {
    crate::metrics::inc_requests("/platforms/convert");
    let platform = parse_platform(&platform)?;
    info!(
        target = "social2listing.api",
        user = %context.user,
        %platform,
        post_link = %payload.post_link,
        "conversion_requested"
    );
    let entry = state
        .controller
        .convert(platform, payload.post_link.trim())
        .await?;
    Ok(Json(entry))
}

#[derive(Debug, Deserialize)]
struct JobQuery {
    post_link: String,
}

async fn job_status(
    State(state): State<AppState>,
    Query(query): Query<JobQuery>,
) -> Result<Json<ConversionJob>, AppError> {
    crate::metrics::inc_requests("/jobs");
    state
        .controller
        .job(&query.post_link)
        .map(Json)
        .ok_or_else(|| {
            PipelineError::not_found("jobs", format!("no job for {}", query.post_link)).into()
        })
}

async fn list_listings(State(state): State<AppState>) -> Json<CatalogSnapshot> {
    crate::metrics::inc_requests("/listings");
    Json(state.controller.catalog().snapshot())
}

async fn refresh_listings(
    State(state): State<AppState>,
) -> Result<Json<CatalogSnapshot>, AppError> {
    crate::metrics::inc_requests("/listings/refresh");
    let catalog = state.controller.catalog();
    catalog.refresh().await?;
    Ok(Json(catalog.snapshot()))
}

async fn latest_listing(State(state): State<AppState>) -> Result<Json<ListingEntry>, AppError> {
    crate::metrics::inc_requests("/listings/latest");
    state
        .controller
        .catalog()
        .latest()
        .await?
        .map(Json)
        .ok_or_else(|| PipelineError::not_found("latest_listing", "no listing yet").into())
}

#[derive(Debug, Deserialize)]
struct ApprovalRequest {
    approved: bool,
}

/// Toggle a listing's approval.
///
/// - Method: `POST`
/// - Path: `/listings/{product_id}/approval`
/// - Body: `{ "approved": true }`
/// - Response: the persisted `ListingEntry`; `409 rollback_required` when the
///   write failed and the local value was reverted.
async fn set_approval(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(product_id): Path<String>,
    Json(payload): Json<ApprovalRequest>,
) -> Result<Json<ListingEntry>, AppError> {
    crate::metrics::inc_requests("/listings/approval");
    info!(
        target = "social2listing.api",
        user = %context.user,
        %product_id,
        approved = payload.approved,
        "approval_requested"
    );
    match state
        .controller
        .catalog()
        .set_approval(&product_id, payload.approved)
        .await?
    {
        ApprovalOutcome::Applied(entry) => Ok(Json(entry)),
        ApprovalOutcome::RolledBack { error, .. } => Err(error.into()),
    }
}

async fn edit_listing(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(product_id): Path<String>,
    Json(fields): Json<ListingFields>,
) -> Result<Json<ListingEntry>, AppError> {
    crate::metrics::inc_requests("/listings/edit");
    info!(target = "social2listing.api", user = %context.user, %product_id, "edit_requested");
    let entry = state
        .controller
        .catalog()
        .edit_fields(&product_id, &fields)
        .await?;
    Ok(Json(entry))
}

async fn stats(State(state): State<AppState>) -> Json<DashboardStats> {
    crate::metrics::inc_requests("/stats");
    Json(state.controller.catalog().stats())
}

fn parse_platform(raw: &str) -> Result<Platform, AppError> {
    raw.parse::<Platform>()
        .map_err(|message| PipelineError::not_found("platform", message).into())
}

fn presented<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[derive(Debug)]
pub enum AppError {
    Pipeline(PipelineError),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::Fetch
                    | PipelineErrorKind::Normalization
                    | PipelineErrorKind::Conversion
                    | PipelineErrorKind::Persistence => StatusCode::BAD_GATEWAY,
                    PipelineErrorKind::AlreadyInProgress | PipelineErrorKind::RollbackRequired => {
                        StatusCode::CONFLICT
                    }
                    PipelineErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
                    PipelineErrorKind::NotFound => StatusCode::NOT_FOUND,
                };
                let payload = ApiError {
                    error: err.kind().as_str().to_string(),
                    detail: Some(err.to_string()),
                };
                (status, Json(payload)).into_response()
            }
        }
    }
}
