//! Background key-fetch worker.

use std::sync::Arc;

use postbox_federation::client::{ApTransport, FetchError, FetchOutcome};
use postbox_federation::jobs::FetchTicket;
use postbox_federation::keys::KeyResolver;
use postbox_federation::validation::InboxValidator;
use tracing::{debug, error, warn};

use crate::queue::WorkQueue;
use crate::retry::RetryConfig;

/// Context for the key-fetch workers.
#[derive(Clone)]
pub struct FetchContext {
    pub transport: Arc<dyn ApTransport>,
    pub resolver: Arc<KeyResolver>,
    pub validator: Arc<InboxValidator>,
    pub retry: RetryConfig,
}

/// Drain the fetch queue. Each ticket is resolved at most once: a ticket
/// already completed through `/asyncResult` is skipped here.
pub async fn fetch_worker(queue: WorkQueue<FetchTicket>, ctx: FetchContext) {
    while let Some(ticket) = queue.dequeue().await {
        let Some(actor_id) = ctx.resolver.take_ticket(&ticket.uuid).await else {
            debug!(uuid = %ticket.uuid, "Fetch ticket already resolved");
            continue;
        };

        let outcome = fetch_with_retry(&*ctx.transport, &actor_id, &ctx.retry).await;
        if let Err(e) = ctx.validator.handle_fetch_result(&actor_id, outcome).await {
            error!(actor = %actor_id, error = %e, "Handling fetch result failed");
        }
    }
}

/// Fetch an actor document with bounded retries on transient failures.
pub async fn fetch_with_retry(
    transport: &dyn ApTransport,
    actor_id: &str,
    retry: &RetryConfig,
) -> FetchOutcome {
    let mut attempt = 0;
    loop {
        match transport.fetch(actor_id).await {
            Ok(doc) => return FetchOutcome::Document(doc),
            Err(FetchError::Gone(reason)) => {
                warn!(actor = %actor_id, reason = %reason, "Actor fetch: gone");
                return FetchOutcome::Gone;
            }
            Err(FetchError::Transient(reason)) => {
                if !retry.should_retry(attempt) {
                    return FetchOutcome::Failed(reason);
                }
                let delay = retry.delay_for_attempt(attempt);
                warn!(
                    actor = %actor_id,
                    attempt,
                    delay = ?delay,
                    reason = %reason,
                    "Actor fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use postbox_federation::test_utils::StubTransport;
    use std::time::Duration;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let transport = StubTransport::new();
        let url = "https://remote.example/users/fred";
        transport.respond_with(url, serde_json::json!({"id": url}));

        let outcome = fetch_with_retry(&transport, url, &fast_retry()).await;
        assert!(matches!(outcome, FetchOutcome::Document(_)));
        assert_eq!(transport.fetch_count(url), 1);
    }

    #[tokio::test]
    async fn test_gone_is_not_retried() {
        let transport = StubTransport::new();
        let url = "https://remote.example/users/vanished";

        let outcome = fetch_with_retry(&transport, url, &fast_retry()).await;
        assert!(matches!(outcome, FetchOutcome::Gone));
        assert_eq!(transport.fetch_count(url), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_retries() {
        let transport = StubTransport::new();
        let url = "https://remote.example/users/flaky";
        transport.fail_transiently(url);

        let outcome = fetch_with_retry(&transport, url, &fast_retry()).await;
        assert!(matches!(outcome, FetchOutcome::Failed(_)));
        // Initial attempt plus two retries.
        assert_eq!(transport.fetch_count(url), 3);
    }
}
