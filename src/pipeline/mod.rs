mod catalog;
mod controller;
mod dispatcher;
mod normalize;
mod source;

pub use catalog::{ApprovalOutcome, CatalogManager, CatalogSnapshot, ListingService, PendingToggle};
pub use controller::{PipelineController, PlatformPhase, PlatformStatus};
pub use dispatcher::ConversionDispatcher;
pub use normalize::{MediaExtractor, MediaNormalizer};
pub use source::PostSource;

use crate::backend::BackendError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    Fetch,
    Normalization,
    Conversion,
    AlreadyInProgress,
    RollbackRequired,
    Validation,
    NotFound,
    Persistence,
}

impl PipelineErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineErrorKind::Fetch => "fetch_error",
            PipelineErrorKind::Normalization => "normalization_error",
            PipelineErrorKind::Conversion => "conversion_error",
            PipelineErrorKind::AlreadyInProgress => "already_in_progress",
            PipelineErrorKind::RollbackRequired => "rollback_required",
            PipelineErrorKind::Validation => "validation_error",
            PipelineErrorKind::NotFound => "not_found",
            PipelineErrorKind::Persistence => "persistence_error",
        }
    }
}

impl PipelineError {
    pub fn new(kind: PipelineErrorKind, stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind,
        }
    }

    pub fn fetch(stage: &'static str, err: impl ToString) -> Self {
        Self::new(PipelineErrorKind::Fetch, stage, err.to_string())
    }

    pub fn normalization(message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::Normalization, "normalize", message)
    }

    pub fn conversion(message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::Conversion, "convert", message)
    }

    pub fn already_in_progress(post_link: &str) -> Self {
        Self::new(
            PipelineErrorKind::AlreadyInProgress,
            "convert",
            format!("conversion already running for {post_link}"),
        )
    }

    pub fn rollback_required(product_id: &str, err: &BackendError) -> Self {
        Self::new(
            PipelineErrorKind::RollbackRequired,
            "set_approval",
            format!("approval for {product_id} not persisted: {err}"),
        )
    }

    pub fn validation(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::Validation, stage, message)
    }

    pub fn not_found(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::NotFound, stage, message)
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}
