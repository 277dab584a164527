use std::sync::Arc;
use std::time::Duration;

use ulid::Ulid;

use crate::cache::{appointment_key, appointment_list_prefix, CacheStore, InvalidationEpoch, ViewCache};
use crate::observability::CACHE_ERRORS_TOTAL;

/// Invalidates cached appointment views after a mutation.
///
/// Never fails: a stale entry only lives until its TTL, so store errors are
/// logged and counted instead of reaching the caller.
pub struct InvalidationNotifier {
    store: Arc<dyn CacheStore>,
    epoch: Arc<InvalidationEpoch>,
}

impl InvalidationNotifier {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            epoch: Arc::default(),
        }
    }

    /// A read-side cache over the same store that yields to these invalidations.
    pub fn views(&self, ttl: Duration) -> ViewCache {
        ViewCache::new(self.store.clone(), self.epoch.clone(), ttl)
    }

    pub async fn appointment_changed(&self, company_id: Ulid, clinic_id: Ulid, appointment_id: Ulid) {
        self.epoch.bump();
        let key = appointment_key(company_id, appointment_id);
        if let Err(e) = self.store.delete(&key).await {
            metrics::counter!(CACHE_ERRORS_TOTAL, "op" => "invalidate").increment(1);
            tracing::warn!(%company_id, %appointment_id, "appointment cache invalidation failed: {e}");
        }
        self.clinic_changed(company_id, clinic_id).await;
    }

    /// Drop every cached list view of a clinic.
    pub async fn clinic_changed(&self, company_id: Ulid, clinic_id: Ulid) {
        self.epoch.bump();
        let prefix = appointment_list_prefix(company_id, clinic_id);
        match self.store.delete_prefix(&prefix).await {
            Ok(n) => tracing::debug!(%company_id, %clinic_id, "invalidated {n} cached list views"),
            Err(e) => {
                metrics::counter!(CACHE_ERRORS_TOTAL, "op" => "invalidate").increment(1);
                tracing::warn!(%company_id, %clinic_id, "list cache invalidation failed: {e}");
            }
        }
    }
}
