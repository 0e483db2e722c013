//! Usage sink backed by the store. A lost usage row must never fail the
//! call that produced it, so persistence errors are logged and dropped.

use std::sync::Arc;

use sw_domain::llm::ModelUsage;
use sw_providers::UsageSink;
use sw_store::Store;

pub struct StoreUsageSink {
    store: Arc<Store>,
}

impl StoreUsageSink {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl UsageSink for StoreUsageSink {
    async fn record(&self, usage: ModelUsage) {
        if let Err(e) = self.store.record_model_usage(&usage).await {
            tracing::warn!(model = %usage.model, error = %e, "failed to record model usage");
        }
    }
}
