use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::model::Ms;

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that reclaims idempotency claims stuck in progress longer
/// than `claim_ttl_ms` — e.g. a flow that died between claiming the key and
/// committing. Reclaiming makes the key retryable again; completed (done)
/// records are permanent and never touched.
pub async fn run_reaper(engine: Arc<Engine>, claim_ttl_ms: Ms) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as Ms;
        for key in engine.collect_stale_claims(now, claim_ttl_ms) {
            // Re-checked under the ledger lock — a claim that completed
            // between collect and reclaim is left alone.
            if engine.reclaim_stale_claim(&key, now, claim_ttl_ms) {
                info!(
                    "reclaimed stale idempotency claim from {}",
                    key.organizer_email
                );
                metrics::counter!(crate::observability::STALE_CLAIMS_RECLAIMED_TOTAL)
                    .increment(1);
            }
        }
    }
}
