use super::{PipelineError, PipelineErrorKind};
use crate::backend::BackendError;
use crate::models::{CreateListingRequest, DashboardStats, ListingEntry, ListingFields};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};
use tokio::sync::{Mutex as AsyncMutex, watch};
use tracing::{debug, info, warn};

/// Remote listing catalog: creation, full listing, and whole-entry updates.
#[async_trait]
pub trait ListingService: Send + Sync {
    async fn create_listing(
        &self,
        request: &CreateListingRequest,
    ) -> Result<ListingEntry, BackendError>;
    async fn list_listings(&self) -> Result<Vec<ListingEntry>, BackendError>;
    async fn update_listing(&self, entry: &ListingEntry) -> Result<ListingEntry, BackendError>;
    async fn latest_listing(&self) -> Result<Option<ListingEntry>, BackendError>;
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PendingToggle {
    pub product_id: String,
    pub previous: bool,
    pub requested: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogSnapshot {
    pub listings: Vec<ListingEntry>,
    pub pending: Option<PendingToggle>,
    pub generation: u64,
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Result of an approval toggle. `RolledBack` means the remote write failed;
/// `restored` tells whether the local value was reverted (false when a newer
/// refresh had already replaced the snapshot).
#[derive(Debug, Clone)]
pub enum ApprovalOutcome {
    Applied(ListingEntry),
    RolledBack {
        product_id: String,
        restored: bool,
        error: PipelineError,
    },
}

impl ApprovalOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApprovalOutcome::Applied(_))
    }
}

#[derive(Default)]
struct CatalogState {
    listings: Vec<ListingEntry>,
    generation: u64,
    pending: Option<(PendingToggle, u64)>,
    created: Vec<ListingEntry>,
    refreshed_at: Option<DateTime<Utc>>,
    /// Refreshes are numbered when issued; a response older than the last
    /// applied one is dropped.
    refresh_issued: u64,
    refresh_applied: u64,
}

/// Client-side listing catalog. The snapshot is always the last successful
/// refresh plus at most one optimistic approval toggle.
#[derive(Clone)]
pub struct CatalogManager {
    service: Arc<dyn ListingService>,
    state: Arc<Mutex<CatalogState>>,
    write_gate: Arc<AsyncMutex<()>>,
    created_tx: Arc<watch::Sender<u64>>,
}

impl CatalogManager {
    pub fn new(service: Arc<dyn ListingService>) -> Self {
        let (created_tx, _) = watch::channel(0);
        Self {
            service,
            state: Arc::new(Mutex::new(CatalogState::default())),
            write_gate: Arc::new(AsyncMutex::new(())),
            created_tx: Arc::new(created_tx),
        }
    }

    pub fn snapshot(&self) -> CatalogSnapshot {
        let state = self.lock();
        CatalogSnapshot {
            listings: state.listings.clone(),
            pending: state.pending.as_ref().map(|(toggle, _)| toggle.clone()),
            generation: state.generation,
            refreshed_at: state.refreshed_at,
        }
    }

    pub fn get(&self, product_id: &str) -> Option<ListingEntry> {
        self.lock()
            .listings
            .iter()
            .find(|entry| entry.product_id == product_id)
            .cloned()
    }

    pub fn stats(&self) -> DashboardStats {
        DashboardStats::from_listings(&self.lock().listings)
    }

    /// Count of listings created since the last refresh; bumps on every
    /// successful conversion.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.created_tx.subscribe()
    }

    pub fn pending_created(&self) -> Vec<ListingEntry> {
        self.lock().created.clone()
    }

    pub(crate) fn signal_created(&self, entry: ListingEntry) {
        self.lock().created.push(entry);
        self.created_tx.send_modify(|count| *count += 1);
    }

    /// Full reload. Replaces the snapshot wholesale and discards any pending
    /// toggle. When refreshes overlap, the most recently issued one that
    /// completes wins; an older response arriving later returns the current
    /// listings untouched.
    pub async fn refresh(&self) -> Result<Vec<ListingEntry>, PipelineError> {
        let started = Instant::now();
        let seq = {
            let mut state = self.lock();
            state.refresh_issued += 1;
            state.refresh_issued
        };
        let listings = self.service.list_listings().await.map_err(|err| {
            warn!(target = "social2listing.catalog", error = %err, "refresh_failed");
            PipelineError::fetch("refresh", err)
        })?;

        {
            let mut state = self.lock();
            if seq < state.refresh_applied {
                debug!(target = "social2listing.catalog", seq, applied = state.refresh_applied, "stale_refresh_dropped");
                return Ok(state.listings.clone());
            }
            state.refresh_applied = seq;
            state.generation += 1;
            if let Some((toggle, _)) = state.pending.take() {
                debug!(target = "social2listing.catalog", product_id = %toggle.product_id, "pending_toggle_superseded");
            }
            state.listings = listings.clone();
            state.created.clear();
            state.refreshed_at = Some(Utc::now());
        }
        self.created_tx.send_modify(|count| *count = 0);
        crate::metrics::stage_elapsed("refresh", started.elapsed().as_millis());
        debug!(target = "social2listing.catalog", count = listings.len(), "catalog_refreshed");
        Ok(listings)
    }

    /// Most recently created listing, read straight from the backend.
    pub async fn latest(&self) -> Result<Option<ListingEntry>, PipelineError> {
        self.service
            .latest_listing()
            .await
            .map_err(|err| PipelineError::fetch("latest_listing", err))
    }

    /// Optimistic approval toggle. The local value flips before the remote
    /// write and is reverted if the write fails, unless a refresh landed in
    /// between.
    pub async fn set_approval(
        &self,
        product_id: &str,
        approved: bool,
    ) -> Result<ApprovalOutcome, PipelineError> {
        let _gate = self.write_gate.lock().await;

        let (payload, previous, generation) = {
            let mut state = self.lock();
            let generation = state.generation;
            let entry = state
                .listings
                .iter_mut()
                .find(|entry| entry.product_id == product_id)
                .ok_or_else(|| {
                    PipelineError::not_found("set_approval", format!("unknown listing {product_id}"))
                })?;
            let previous = entry.approved;
            entry.approved = approved;
            let payload = entry.clone();
            state.pending = Some((
                PendingToggle {
                    product_id: product_id.to_string(),
                    previous,
                    requested: approved,
                },
                generation,
            ));
            (payload, previous, generation)
        };

        match self.service.update_listing(&payload).await {
            Ok(saved) => {
                let mut state = self.lock();
                if state.generation == generation {
                    state.pending = None;
                }
                info!(target = "social2listing.catalog", %product_id, approved, "approval_persisted");
                Ok(ApprovalOutcome::Applied(saved))
            }
            Err(err) => {
                let error = PipelineError::rollback_required(product_id, &err);
                let restored = {
                    let mut state = self.lock();
                    if state.generation == generation {
                        state.pending = None;
                        if let Some(entry) = state
                            .listings
                            .iter_mut()
                            .find(|entry| entry.product_id == product_id)
                        {
                            entry.approved = previous;
                        }
                        true
                    } else {
                        false
                    }
                };
                warn!(target = "social2listing.catalog", %product_id, restored, error = %err, "approval_rolled_back");
                Ok(ApprovalOutcome::RolledBack {
                    product_id: product_id.to_string(),
                    restored,
                    error,
                })
            }
        }
    }

    /// Partial field edit. The server's canonical form is picked up by a
    /// refresh afterwards; the response is never merged locally.
    pub async fn edit_fields(
        &self,
        product_id: &str,
        fields: &ListingFields,
    ) -> Result<ListingEntry, PipelineError> {
        if fields.is_empty() {
            return Err(PipelineError::validation("edit_fields", "no fields to update"));
        }
        let _gate = self.write_gate.lock().await;

        let current = match self.get(product_id) {
            Some(entry) => entry,
            None => self
                .latest()
                .await?
                .filter(|entry| entry.product_id == product_id)
                .ok_or_else(|| {
                    PipelineError::not_found("edit_fields", format!("unknown listing {product_id}"))
                })?,
        };

        let candidate = fields.apply_to(&current);
        candidate
            .validate()
            .map_err(|message| PipelineError::validation("edit_fields", message))?;

        let saved = self
            .service
            .update_listing(&candidate)
            .await
            .map_err(|err| {
                let kind = if err.is_validation() {
                    PipelineErrorKind::Validation
                } else {
                    PipelineErrorKind::Persistence
                };
                PipelineError::new(kind, "edit_fields", err.to_string())
            })?;
        info!(target = "social2listing.catalog", %product_id, "listing_fields_updated");

        match self.refresh().await {
            Ok(listings) => Ok(listings
                .into_iter()
                .find(|entry| entry.product_id == saved.product_id)
                .unwrap_or(saved)),
            Err(err) => {
                warn!(target = "social2listing.catalog", %product_id, error = %err, "post_edit_refresh_failed");
                Ok(saved)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
