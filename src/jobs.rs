use crate::models::Platform;
use crate::pipeline::PipelineError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Normalizing,
    Dispatching,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Normalizing | JobState::Dispatching)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversionJob {
    pub post_link: String,
    pub platform: Platform,
    pub attempt: Uuid,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// `post_link` → conversion job. At most one job per link is active; admission
/// of a second one is refused rather than queued.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<String, ConversionJob>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&self, post_link: &str, platform: Platform) -> Result<JobGuard, PipelineError> {
        let mut guard = self.lock();
        if guard
            .get(post_link)
            .is_some_and(|job| job.state.is_active())
        {
            debug!(target = "social2listing.jobs", %post_link, "admission_rejected");
            return Err(PipelineError::already_in_progress(post_link));
        }

        let attempt = Uuid::new_v4();
        guard.insert(
            post_link.to_string(),
            ConversionJob {
                post_link: post_link.to_string(),
                platform,
                attempt,
                state: JobState::Normalizing,
                last_error: None,
                product_id: None,
                updated_at: Utc::now(),
            },
        );
        debug!(target = "social2listing.jobs", %post_link, %attempt, "job_admitted");
        Ok(JobGuard {
            registry: self.clone(),
            post_link: post_link.to_string(),
            platform,
            attempt,
            resolved: false,
        })
    }

    pub fn get(&self, post_link: &str) -> Option<ConversionJob> {
        self.lock().get(post_link).cloned()
    }

    pub fn jobs_for(&self, platform: Platform) -> Vec<ConversionJob> {
        let mut jobs = self
            .lock()
            .values()
            .filter(|job| job.platform == platform)
            .cloned()
            .collect::<Vec<_>>();
        jobs.sort_by(|a, b| a.post_link.cmp(&b.post_link));
        jobs
    }

    pub fn active_count(&self, platform: Platform) -> usize {
        self.lock()
            .values()
            .filter(|job| job.platform == platform && job.state.is_active())
            .count()
    }

    /// Removes a resolved job. Active jobs stay until their guard resolves them.
    pub fn remove(&self, post_link: &str) -> bool {
        let mut guard = self.lock();
        match guard.get(post_link) {
            Some(job) if !job.state.is_active() => guard.remove(post_link).is_some(),
            _ => false,
        }
    }

    /// Drops resolved jobs of `platform` whose post is no longer listed.
    pub fn evict_resolved(&self, platform: Platform, listed: &HashSet<&str>) -> usize {
        let mut guard = self.lock();
        let before = guard.len();
        guard.retain(|link, job| {
            job.platform != platform || job.state.is_active() || listed.contains(link.as_str())
        });
        before - guard.len()
    }

    fn update(&self, post_link: &str, attempt: Uuid, apply: impl FnOnce(&mut ConversionJob)) -> bool {
        let mut guard = self.lock();
        match guard.get_mut(post_link) {
            Some(job) if job.attempt == attempt => {
                apply(job);
                job.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ConversionJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scoped hold on an admitted job. Dropping it unresolved marks the job failed,
/// so no exit path leaves a job active.
pub struct JobGuard {
    registry: JobRegistry,
    post_link: String,
    platform: Platform,
    attempt: Uuid,
    resolved: bool,
}

impl JobGuard {
    pub fn post_link(&self) -> &str {
        &self.post_link
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn attempt(&self) -> Uuid {
        self.attempt
    }

    pub fn dispatching(&mut self) {
        self.registry.update(&self.post_link, self.attempt, |job| {
            job.state = JobState::Dispatching;
        });
    }

    pub fn succeed(mut self, product_id: &str) {
        self.resolved = true;
        let applied = self.registry.update(&self.post_link, self.attempt, |job| {
            job.state = JobState::Succeeded;
            job.last_error = None;
            job.product_id = Some(product_id.to_string());
        });
        if !applied {
            debug!(target = "social2listing.jobs", post_link = %self.post_link, "stale_result_dropped");
        }
        crate::metrics::job_resolved("succeeded");
    }

    pub fn fail(mut self, error: &PipelineError) {
        self.resolved = true;
        let message = error.to_string();
        self.registry.update(&self.post_link, self.attempt, |job| {
            job.state = JobState::Failed;
            job.last_error = Some(message);
        });
        crate::metrics::job_resolved("failed");
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        warn!(target = "social2listing.jobs", post_link = %self.post_link, "job_abandoned");
        self.registry.update(&self.post_link, self.attempt, |job| {
            job.state = JobState::Failed;
            job.last_error = Some("conversion abandoned".into());
        });
        crate::metrics::job_resolved("abandoned");
    }
}
