//! In-process cleanup scheduling, so blob expiry does not depend on an
//! external cron hitting the cleanup route.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::server::api::AppState;
use crate::server::storage::expired_urls;

/// How often the cleanup job runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// Run the blob cleanup loop until `cancel` is triggered.
///
/// Skips quietly when the blob store is not configured; a failing cycle
/// is logged and the cadence continues.
pub async fn run(state: AppState, cancel: CancellationToken) {
    tracing::info!(
        interval_secs = CLEANUP_INTERVAL.as_secs(),
        max_age_hours = state.config.cleanup_max_age.num_hours(),
        "cleanup job started"
    );

    let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("cleanup job stopping");
                break;
            }
            _ = interval.tick() => {
                if let Err(e) = run_once(&state).await {
                    tracing::error!(error = %e, "cleanup cycle failed");
                }
            }
        }
    }
}

async fn run_once(state: &AppState) -> Result<(), crate::server::types::ApiError> {
    let Ok((base_url, token)) = state.config.require_blob_store() else {
        tracing::debug!("blob store not configured, skipping cleanup");
        return Ok(());
    };

    let blobs = state.storage.list(base_url, token).await?;
    let cutoff = chrono::Utc::now() - state.config.cleanup_max_age;
    let expired = expired_urls(&blobs, cutoff);

    if expired.is_empty() {
        tracing::debug!("no expired blobs");
        return Ok(());
    }

    state.storage.delete(base_url, token, &expired).await?;
    tracing::info!(count = expired.len(), "expired blobs deleted");
    Ok(())
}
