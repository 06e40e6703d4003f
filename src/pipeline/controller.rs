use super::{
    CatalogManager, ConversionDispatcher, ListingService, MediaExtractor, MediaNormalizer,
    PipelineError, PostSource,
};
use crate::jobs::{ConversionJob, JobGuard, JobRegistry};
use crate::models::{ListingEntry, Platform, SocialPost};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};
use tracing::{debug, info, warn};

type SharedFetch = Shared<BoxFuture<'static, Result<Vec<SocialPost>, PipelineError>>>;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PlatformPhase {
    Idle,
    Fetching,
    Converting { active: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct PlatformStatus {
    pub platform: Platform,
    #[serde(flatten)]
    pub phase: PlatformPhase,
    pub posts: Vec<SocialPost>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
    pub jobs: Vec<ConversionJob>,
}

#[derive(Default)]
struct PlatformSlot {
    posts: Vec<SocialPost>,
    last_error: Option<String>,
    fetched_at: Option<DateTime<Utc>>,
    in_flight: Option<(u64, SharedFetch)>,
    fetch_seq: u64,
}

/// Per-platform orchestration: fetch, normalize, dispatch, then refresh the
/// catalog and re-fetch. Remote work runs on spawned tasks so a caller going
/// away never cancels an outstanding call.
#[derive(Clone)]
pub struct PipelineController {
    source: Arc<dyn PostSource>,
    normalizer: MediaNormalizer,
    dispatcher: ConversionDispatcher,
    catalog: CatalogManager,
    platforms: Arc<Mutex<HashMap<Platform, PlatformSlot>>>,
}

impl PipelineController {
    pub fn new(
        source: Arc<dyn PostSource>,
        extractor: Arc<dyn MediaExtractor>,
        listings: Arc<dyn ListingService>,
    ) -> Self {
        let catalog = CatalogManager::new(listings.clone());
        let dispatcher = ConversionDispatcher::new(listings, JobRegistry::new(), catalog.clone());
        Self {
            source,
            normalizer: MediaNormalizer::new(extractor),
            dispatcher,
            catalog,
            platforms: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn catalog(&self) -> &CatalogManager {
        &self.catalog
    }

    pub fn job(&self, post_link: &str) -> Option<ConversionJob> {
        self.dispatcher.registry().get(post_link)
    }

    pub fn status(&self, platform: Platform) -> PlatformStatus {
        let (posts, last_error, fetched_at, fetching) = {
            let slots = self.lock();
            match slots.get(&platform) {
                Some(slot) => (
                    slot.posts.clone(),
                    slot.last_error.clone(),
                    slot.fetched_at,
                    slot.in_flight.is_some(),
                ),
                None => (Vec::new(), None, None, false),
            }
        };
        let jobs = self.dispatcher.registry().jobs_for(platform);
        let active = jobs.iter().filter(|job| job.state.is_active()).count();
        let phase = if fetching {
            PlatformPhase::Fetching
        } else if active > 0 {
            PlatformPhase::Converting { active }
        } else {
            PlatformPhase::Idle
        };
        PlatformStatus {
            platform,
            phase,
            posts,
            last_error,
            fetched_at,
            jobs,
        }
    }

    /// Latest posts for `platform`. Callers arriving while a fetch is
    /// outstanding share its result instead of issuing another call.
    pub async fn fetch_latest(&self, platform: Platform) -> Result<Vec<SocialPost>, PipelineError> {
        let fetch = {
            let mut slots = self.lock();
            let slot = slots.entry(platform).or_default();
            match slot.in_flight.clone() {
                Some((seq, shared)) => {
                    debug!(target = "social2listing.pipeline", %platform, seq, "fetch_coalesced");
                    shared
                }
                None => {
                    slot.fetch_seq += 1;
                    let seq = slot.fetch_seq;
                    let shared = self.spawn_fetch(platform, seq);
                    slot.in_flight = Some((seq, shared.clone()));
                    shared
                }
            }
        };
        fetch.await
    }

    fn spawn_fetch(&self, platform: Platform, seq: u64) -> SharedFetch {
        let controller = self.clone();
        let handle = tokio::spawn(async move { controller.run_fetch(platform, seq).await });
        async move {
            handle.await.unwrap_or_else(|err| {
                Err(PipelineError::fetch(
                    "fetch_latest",
                    format!("fetch task failed: {err}"),
                ))
            })
        }
        .boxed()
        .shared()
    }

    async fn run_fetch(&self, platform: Platform, seq: u64) -> Result<Vec<SocialPost>, PipelineError> {
        let started = Instant::now();
        let result = self
            .source
            .fetch_latest(platform)
            .await
            .map_err(|err| PipelineError::fetch("fetch_latest", err));

        {
            let mut slots = self.lock();
            let slot = slots.entry(platform).or_default();
            if slot.in_flight.as_ref().is_some_and(|(current, _)| *current == seq) {
                slot.in_flight = None;
            }
            match &result {
                Ok(posts) => {
                    slot.posts = posts.clone();
                    slot.last_error = None;
                    slot.fetched_at = Some(Utc::now());
                }
                Err(err) => slot.last_error = Some(err.to_string()),
            }
        }
        crate::metrics::stage_elapsed("fetch_latest", started.elapsed().as_millis());

        match &result {
            Ok(posts) => {
                let listed = posts
                    .iter()
                    .map(|post| post.post_link.as_str())
                    .collect::<HashSet<_>>();
                let evicted = self.dispatcher.registry().evict_resolved(platform, &listed);
                info!(target = "social2listing.pipeline", %platform, count = posts.len(), evicted, "posts_fetched");
            }
            Err(err) => {
                warn!(target = "social2listing.pipeline", %platform, error = %err, "fetch_failed");
            }
        }
        result
    }

    /// Converts a post from the platform's latest batch.
    pub async fn convert(
        &self,
        platform: Platform,
        post_link: &str,
    ) -> Result<ListingEntry, PipelineError> {
        let post = self
            .lock()
            .get(&platform)
            .and_then(|slot| slot.posts.iter().find(|post| post.post_link == post_link).cloned())
            .ok_or_else(|| {
                PipelineError::not_found(
                    "convert",
                    format!("{post_link} is not in the latest {platform} batch"),
                )
            })?;
        self.convert_post(post).await
    }

    /// Admission happens before anything is spawned, so a rejected call never
    /// touches the backend.
    pub async fn convert_post(&self, post: SocialPost) -> Result<ListingEntry, PipelineError> {
        let guard = self.dispatcher.admit(&post.post_link, post.platform)?;
        let controller = self.clone();
        let handle = tokio::spawn(async move { controller.run_conversion(guard, post).await });
        handle.await.unwrap_or_else(|err| {
            Err(PipelineError::conversion(format!(
                "conversion task failed: {err}"
            )))
        })
    }

    async fn run_conversion(
        &self,
        guard: JobGuard,
        post: SocialPost,
    ) -> Result<ListingEntry, PipelineError> {
        let started = Instant::now();
        let normalized = match self.normalizer.normalize(&post).await {
            Ok(normalized) => normalized,
            Err(err) => {
                guard.fail(&err);
                return Err(err);
            }
        };
        let entry = self.dispatcher.dispatch(guard, normalized).await?;
        crate::metrics::stage_elapsed("convert", started.elapsed().as_millis());

        if let Err(err) = self.catalog.refresh().await {
            warn!(target = "social2listing.pipeline", product_id = %entry.product_id, error = %err, "post_conversion_refresh_failed");
        }
        if let Err(err) = self.fetch_latest(post.platform).await {
            warn!(target = "social2listing.pipeline", platform = %post.platform, error = %err, "post_conversion_fetch_failed");
        }
        Ok(entry)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Platform, PlatformSlot>> {
        self.platforms.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
