use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::*;
use crate::model::{Company, Ms};
use crate::notify::InvalidationNotifier;
use crate::reaper;

/// Manages per-company engines. Each company gets its own Engine, WAL,
/// reminder sweep and compactor. Engines are loaded lazily from disk.
pub struct TenantManager {
    engines: DashMap<Ulid, Arc<Engine>>,
    /// Ids whose WAL never recorded a company.
    orphans: DashSet<Ulid>,
    data_dir: PathBuf,
    notify: Arc<InvalidationNotifier>,
    compact_threshold: u64,
    reminder_lead: Ms,
}

impl TenantManager {
    pub fn new(
        data_dir: PathBuf,
        notify: Arc<InvalidationNotifier>,
        compact_threshold: u64,
        reminder_lead: Ms,
    ) -> Self {
        Self {
            engines: DashMap::new(),
            orphans: DashSet::new(),
            data_dir,
            notify,
            compact_threshold,
            reminder_lead,
        }
    }

    fn wal_path(&self, company_id: Ulid) -> PathBuf {
        self.data_dir.join(format!("{company_id}.wal"))
    }

    /// Create a new company with `owner_email` as its owner.
    pub async fn create_company(
        &self,
        name: String,
        owner_email: &str,
        owner_name: String,
    ) -> Result<(Arc<Engine>, Company), EngineError> {
        if self.engines.len() >= MAX_TENANTS {
            return Err(EngineError::LimitExceeded("too many companies"));
        }
        let company_id = Ulid::new();
        let wal_path = self.wal_path(company_id);
        let engine = Arc::new(
            Engine::new(company_id, wal_path.clone(), self.notify.clone())
                .map_err(|e| EngineError::WalError(e.to_string()))?,
        );
        let company = match engine.init_company(name, owner_email, owner_name).await {
            Ok(company) => company,
            Err(e) => {
                let _ = std::fs::remove_file(&wal_path);
                return Err(e);
            }
        };

        self.spawn_background(&engine);
        self.engines.insert(company_id, engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        tracing::info!(%company_id, "company registered");
        Ok((engine, company))
    }

    /// The engine of an existing company, replaying its WAL on first access.
    /// `Ok(None)` when no such company was ever created.
    pub fn get(&self, company_id: Ulid) -> io::Result<Option<Arc<Engine>>> {
        if let Some(engine) = self.engines.get(&company_id) {
            return Ok(Some(engine.value().clone()));
        }
        if self.orphans.contains(&company_id) {
            return Ok(None);
        }
        let wal_path = self.wal_path(company_id);
        if !wal_path.exists() {
            return Ok(None);
        }

        // Replay outside the map; a concurrent loader may still win the slot.
        let engine = Engine::new(company_id, wal_path.clone(), self.notify.clone())?;
        if engine.company().is_none() {
            drop(engine);
            self.quarantine(company_id, &wal_path);
            return Ok(None);
        }

        match self.engines.entry(company_id) {
            Entry::Occupied(e) => Ok(Some(e.get().clone())),
            Entry::Vacant(slot) => {
                let engine = Arc::new(engine);
                self.spawn_background(&engine);
                slot.insert(engine.clone());
                tracing::info!(%company_id, "company loaded from WAL");
                metrics::gauge!(crate::observability::TENANTS_ACTIVE).increment(1.0);
                Ok(Some(engine))
            }
        }
    }

    /// Move a WAL with no company record aside so it is not replayed again.
    fn quarantine(&self, company_id: Ulid, wal_path: &Path) {
        self.orphans.insert(company_id);
        let orphan = wal_path.with_extension("wal.orphan");
        match std::fs::rename(wal_path, &orphan) {
            Ok(()) => tracing::warn!(%company_id, path = %orphan.display(), "WAL has no company record, moved aside"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(%company_id, "WAL has no company record and could not be moved: {e}"),
        }
    }

    fn spawn_background(&self, engine: &Arc<Engine>) {
        let sweep_engine = engine.clone();
        let lead = self.reminder_lead;
        tokio::spawn(async move {
            reaper::run_reminder_sweep(sweep_engine, lead).await;
        });
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            reaper::run_compactor(compactor_engine, threshold).await;
        });
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}
