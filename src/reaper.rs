use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{now_ms, Engine};
use crate::model::Ms;

const REMINDER_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that queues reminders for upcoming appointments.
pub async fn run_reminder_sweep(engine: Arc<Engine>, lead: Ms) {
    let mut interval = tokio::time::interval(REMINDER_SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        let queued = sweep_reminders(&engine, now_ms(), lead).await;
        if queued > 0 {
            info!(company_id = %engine.company_id(), "queued {queued} reminders");
        }
    }
}

/// One sweep. Returns the number of reminders queued.
pub async fn sweep_reminders(engine: &Engine, now: Ms, lead: Ms) -> usize {
    let mut queued = 0;
    for id in engine.collect_due_reminders(now, lead) {
        match engine.queue_reminder(id).await {
            Ok(Some(_)) => queued += 1,
            Ok(None) => {}
            Err(e) => {
                // may have been deleted or moved since collection
                tracing::debug!("reminder skip {id}: {e}");
            }
        }
    }
    queued
}

/// Background task that rewrites the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!(company_id = %engine.company_id(), "compacted WAL after {appends} appends"),
            Err(e) => tracing::error!(company_id = %engine.company_id(), "WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Caller, CallerContext};
    use crate::cache::MemoryCache;
    use crate::engine::BookingRequest;
    use crate::model::*;
    use crate::notify::InvalidationNotifier;
    use std::path::PathBuf;
    use ulid::Ulid;

    const H: Ms = 3_600_000;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("clinicbook_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn sweep_queues_due_reminders_once() {
        let notify = Arc::new(InvalidationNotifier::new(Arc::new(MemoryCache::new())));
        let engine = Engine::new(Ulid::new(), test_wal_path("sweep.wal"), notify).unwrap();
        engine
            .init_company("Acme".into(), "owner@acme.test", "Olga".into())
            .await
            .unwrap();
        let (owner, role) = engine.staff_member("owner@acme.test").unwrap();
        let ctx = CallerContext {
            caller: Caller {
                uid: "static:owner@acme.test".into(),
                email: "owner@acme.test".into(),
            },
            company_id: engine.company_id(),
            employee_id: owner,
            role,
        };
        let clinic = engine.create_clinic("Downtown".into(), None).await.unwrap().id;
        let patient = engine
            .create_patient(clinic, "Bea".into(), None, 3)
            .await
            .unwrap()
            .id;

        let now = now_ms();
        for offset in [2 * H, 5 * H, 40 * H] {
            engine
                .book(
                    &ctx,
                    clinic,
                    BookingRequest {
                        subject: Subject::Individual { patient_id: patient },
                        employee_id: owner,
                        service_id: None,
                        start: now + offset,
                        end: now + offset + H,
                    },
                )
                .await
                .unwrap();
        }

        assert_eq!(sweep_reminders(&engine, now, 24 * H).await, 2);
        assert_eq!(sweep_reminders(&engine, now, 24 * H).await, 0);
        assert_eq!(engine.list_notifications(clinic).unwrap().len(), 2);
    }
}
