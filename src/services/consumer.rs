// ============================================
// Event Consumer
// ============================================
//
// Drains the `events` queue and fans each interaction out to three
// independent sinks:
//   1. the session trail (recency signal for the ranker),
//   2. the merchant/category bandit posteriors,
//   3. the append-only interaction log.
//
// Each step is best-effort: a failing sink is logged and skipped, never
// aborting the event. Multiple replicas may drain the same queue; the pop
// is atomic and per-session ordering is best-effort only.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::FeedCache;
use crate::models::{IngestEvent, InteractionType, NewInteraction};
use crate::services::bandit::{Bandit, BanditScope};
use crate::store::{InteractionStore, ProductStore};

/// Blocking-pop timeout on the event queue.
const POP_TIMEOUT: Duration = Duration::from_secs(1);
/// Idle yield between empty polls.
const IDLE_BACKOFF: Duration = Duration::from_millis(50);
/// Backoff after a queue error.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);
/// Single retry delay for transient trail failures.
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

pub struct EventConsumer {
    cache: Arc<dyn FeedCache>,
    products: Arc<dyn ProductStore>,
    interactions: Arc<dyn InteractionStore>,
    bandit: Bandit,
}

impl EventConsumer {
    pub fn new(
        cache: Arc<dyn FeedCache>,
        products: Arc<dyn ProductStore>,
        interactions: Arc<dyn InteractionStore>,
    ) -> Self {
        let bandit = Bandit::new(cache.clone());
        Self {
            cache,
            products,
            interactions,
            bandit,
        }
    }

    /// Producer-side helper: enqueue an event for later consumption
    /// (at-least-once delivery).
    pub async fn publish(&self, event: &IngestEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_string(event)?;
        self.cache.enqueue_event(&payload).await?;
        Ok(())
    }

    /// Run the consume loop until `shutdown` flips to true. The in-flight
    /// event always completes before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Event consumer started");

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            match self.cache.dequeue_event(POP_TIMEOUT).await {
                Ok(Some(payload)) => {
                    self.handle_payload(&payload).await;
                }
                Ok(None) => {
                    tokio::time::sleep(IDLE_BACKOFF).await;
                }
                Err(e) => {
                    warn!(error = %e, "Event queue pop failed, backing off");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }

        info!("Event consumer stopped");
    }

    /// Decode and process one queue payload. Malformed JSON is discarded
    /// with a warning.
    pub async fn handle_payload(&self, payload: &str) {
        let event: IngestEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Discarding malformed event payload");
                return;
            }
        };

        self.handle_event(&event).await;
    }

    /// Apply the three independent steps for one event.
    pub async fn handle_event(&self, event: &IngestEvent) {
        // Step 1: session trail, retried once on transient cache failure.
        if let Some(session_id) = event.session_id.as_deref() {
            if let Err(first) = self.cache.push_trail(session_id, &event.product_id).await {
                warn!(session_id = session_id, error = %first, "Trail push failed, retrying once");
                tokio::time::sleep(RETRY_BACKOFF).await;
                if let Err(second) = self.cache.push_trail(session_id, &event.product_id).await {
                    warn!(session_id = session_id, error = %second, "Trail push retry failed");
                }
            }
        }

        // Step 2: bandit outcomes, driven by the product's merchant and
        // category. CART is deliberately neutral.
        if let Some(success) = bandit_outcome(event.kind) {
            match self
                .products
                .metas_by_ids(std::slice::from_ref(&event.product_id))
                .await
            {
                Ok(metas) => {
                    if let Some((_, meta)) = metas.into_iter().next() {
                        self.bandit
                            .record(BanditScope::Merchant, &meta.merchant_id, success)
                            .await;
                        self.bandit
                            .record(BanditScope::Category, &meta.category_id, success)
                            .await;
                    } else {
                        debug!(product_id = %event.product_id, "No meta for event product, skipping bandit update");
                    }
                }
                Err(e) => {
                    warn!(product_id = %event.product_id, error = %e, "Meta lookup failed, skipping bandit update");
                }
            }
        }

        // Step 3: interaction log.
        let row = NewInteraction {
            user_id: event.user_id.clone(),
            product_id: event.product_id.clone(),
            kind: event.kind,
            value: 1.0,
        };
        if let Err(e) = self.interactions.append(row).await {
            warn!(product_id = %event.product_id, error = %e, "Failed to append interaction");
        }
    }
}

/// Bandit outcome per event type: success for CLICK/PURCHASE, failure for
/// VIEW, no update for CART.
fn bandit_outcome(kind: InteractionType) -> Option<bool> {
    match kind {
        InteractionType::Click | InteractionType::Purchase => Some(true),
        InteractionType::View => Some(false),
        InteractionType::Cart => None,
    }
}
