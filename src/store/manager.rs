//! Keeps a family's index consistent with its entity files.
//!
//! Routine writes update the index incrementally. Drift is only reported by
//! `verify` and only fixed by `repair`, which rebuilds from the entity files.

use std::collections::BTreeSet;
use std::future::Future;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::store::entity::EntityStore;
use crate::store::family::Family;
use crate::store::index::IndexStore;
use crate::store::locks::{CancelFlag, KeyedLocks};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Discrepancy {
    /// Metadata row without an entity file.
    MissingEntity { id: String },
    /// Entity file without a metadata row.
    MissingMetadata { id: String },
    /// Lookup dimension naming an id that has no entity file.
    DanglingReference {
        dimension: String,
        key: String,
        id: String,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairReport {
    pub family: &'static str,
    pub indexed: usize,
    /// Entity files that could not be read, with the reason.
    pub skipped: Vec<(String, String)>,
}

pub struct IndexManager<F: Family> {
    entities: EntityStore<F>,
    store: IndexStore<F>,
    // every writer of an entity id goes through these, services and migration alike
    locks: KeyedLocks,
    // serializes load-modify-save of the index file
    write_lock: Mutex<()>,
}

impl<F: Family> IndexManager<F> {
    pub fn new(entities: EntityStore<F>, store: IndexStore<F>) -> Self {
        Self {
            entities,
            store,
            locks: KeyedLocks::new(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn entities(&self) -> &EntityStore<F> {
        &self.entities
    }

    /// Run `f` while holding the lock for entity `id`, then drop mutexes
    /// nobody holds or waits on.
    pub async fn with_lock<T, Fut>(&self, id: &str, f: impl FnOnce() -> Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        let out = {
            let _guard = self.locks.lock(id).await;
            f().await
        };
        self.locks.prune();
        out
    }

    /// Ids with a live mutex.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    pub async fn load(&self) -> Result<F::Index> {
        self.store.load().await
    }

    pub async fn record_create_or_update(&self, entity: &F::Entity) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut index = self.store.load().await?;
        F::index_entity(&mut index, entity);
        self.store.save(&mut index).await?;
        debug!(family = F::DIR, id = F::entity_id(entity), "index updated");
        Ok(())
    }

    pub async fn record_delete(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut index = self.store.load().await?;
        F::unindex(&mut index, id);
        self.store.save(&mut index).await?;
        debug!(family = F::DIR, id, "index entry removed");
        Ok(())
    }

    /// Compare the index against the entity files. Never modifies anything.
    pub async fn verify(&self) -> Result<Vec<Discrepancy>> {
        let index = self.store.load().await?;
        let files: BTreeSet<String> = self.entities.list().await?.into_iter().collect();
        let mirrored: BTreeSet<String> = F::mirrored_ids(&index).into_iter().collect();

        let mut found = Vec::new();
        for id in mirrored.difference(&files) {
            found.push(Discrepancy::MissingEntity { id: id.clone() });
        }
        for id in files.difference(&mirrored) {
            found.push(Discrepancy::MissingMetadata { id: id.clone() });
        }
        for r in F::references(&index) {
            if !files.contains(&r.id) {
                found.push(Discrepancy::DanglingReference {
                    dimension: r.dimension.to_string(),
                    key: r.key,
                    id: r.id,
                });
            }
        }
        if !found.is_empty() {
            warn!(family = F::DIR, count = found.len(), "index drift detected");
        }
        Ok(found)
    }

    /// `verify` as a result: drift becomes `IndexDrift`.
    pub async fn check(&self) -> Result<()> {
        let found = self.verify().await?;
        if found.is_empty() {
            Ok(())
        } else {
            Err(StoreError::IndexDrift {
                family: F::DIR,
                count: found.len(),
            })
        }
    }

    /// Rebuild the whole index from the entity files, in id order.
    ///
    /// Unreadable entities are skipped and reported. On cancellation nothing
    /// is saved and the previous index stays in place.
    pub async fn repair(&self, cancel: &CancelFlag) -> Result<RepairReport> {
        let _guard = self.write_lock.lock().await;
        let mut index = F::Index::default();
        let mut report = RepairReport {
            family: F::DIR,
            ..Default::default()
        };

        for id in self.entities.list().await? {
            if cancel.is_cancelled() {
                info!(family = F::DIR, indexed = report.indexed, "repair cancelled");
                return Err(StoreError::Cancelled);
            }
            match self.entities.get(&id).await {
                Ok(entity) => {
                    F::index_entity(&mut index, &entity);
                    report.indexed += 1;
                }
                Err(e @ StoreError::CorruptEntity { .. }) | Err(e @ StoreError::InvalidId(_)) => {
                    warn!(family = F::DIR, id = %id, error = %e, "skipping unreadable entity");
                    report.skipped.push((id, e.to_string()));
                }
                // vanished between list and read
                Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        if cancel.is_cancelled() {
            info!(family = F::DIR, indexed = report.indexed, "repair cancelled");
            return Err(StoreError::Cancelled);
        }
        self.store.save(&mut index).await?;
        info!(
            family = F::DIR,
            indexed = report.indexed,
            skipped = report.skipped.len(),
            "index rebuilt"
        );
        Ok(report)
    }
}
