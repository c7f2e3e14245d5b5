//! Store connectivity check
//!
//! Every core operation depends on the session store, so startup waits for it
//! with a bounded number of attempts and a fixed delay between them.

use crate::config::StoreConfig;
use crate::db::store::SessionStore;
use crate::{Error, Result};

/// Ping the store until it answers or the attempts run out.
///
/// Each attempt is capped at `connect_timeout`; failed attempts are followed
/// by `connect_retry_delay`. Returns the last failure when every attempt fails.
pub async fn wait_for_store(store: &dyn SessionStore, config: &StoreConfig) -> Result<()> {
    let attempts = config.connect_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        let outcome = tokio::time::timeout(config.connect_timeout(), store.ping()).await;

        let err = match outcome {
            Ok(Ok(())) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Session store reachable after retry");
                }
                return Ok(());
            }
            Ok(Err(e)) => e,
            Err(_) => Error::Timeout(format!(
                "store ping exceeded {}s",
                config.connect_timeout_secs
            )),
        };

        tracing::warn!(
            attempt,
            max_attempts = attempts,
            error = %err,
            "Session store connectivity check failed"
        );
        last_error = Some(err);

        if attempt < attempts {
            tokio::time::sleep(config.connect_retry_delay()).await;
        }
    }

    tracing::error!(attempts, "Session store unreachable, giving up");
    Err(last_error.unwrap_or_else(|| Error::Internal("store check never ran".to_string())))
}
