use tracing::trace;

// Request and stage counters are emitted as trace events; the Prometheus
// recorder installed in main renders whatever the exporter has collected.

pub fn inc_requests(route: &'static str) {
    trace!(target = "social2listing.metrics", route, "requests_total_inc");
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "social2listing.metrics",
        stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn job_resolved(outcome: &'static str) {
    trace!(target = "social2listing.metrics", outcome, "jobs_resolved_inc");
}
