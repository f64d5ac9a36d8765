//! One-way conversion from the legacy collection store to per-entity files.
//!
//! Progress is persisted in `<data_dir>/migration.json`. Once a completion
//! time is recorded every later run is a no-op, so the migration can be
//! invoked on each startup.

pub mod legacy;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::store::family::{Conversations, Family, Workspaces};
use crate::store::locks::CancelFlag;
use crate::store::manager::{IndexManager, RepairReport};
use crate::store::vault::Vault;

use legacy::{LegacyItem, LegacySource, WorkspaceRows};

pub const STATE_FILE: &str = "migration.json";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum MigrationStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

/// One legacy entity that could not be converted or written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationFailure {
    pub family: String,
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub converted: usize,
    pub already_present: usize,
    #[serde(default)]
    pub failures: Vec<MigrationFailure>,
    /// Every legacy collection was read and every entity attempted.
    #[serde(default)]
    pub enumeration_complete: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationState {
    pub status: MigrationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub report: MigrationReport,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum MigrationOutcome {
    /// A previous run finished; nothing was read or written.
    AlreadyCompleted { completed_at: DateTime<Utc> },
    Completed {
        report: MigrationReport,
        repairs: Vec<RepairReport>,
    },
}

/// The legacy store, grouped the way conversion needs it.
#[derive(Default)]
struct LegacySnapshot {
    workspaces: Vec<LegacyItem>,
    sessions: Vec<LegacyItem>,
    traces: Vec<LegacyItem>,
    snapshots: Vec<LegacyItem>,
    conversations: Vec<LegacyItem>,
}

pub struct MigrationService {
    vault: Arc<dyn Vault>,
    state_path: String,
    source: Arc<dyn LegacySource>,
    conversations: Arc<IndexManager<Conversations>>,
    workspaces: Arc<IndexManager<Workspaces>>,
    run_lock: Mutex<()>,
}

impl MigrationService {
    pub fn new(
        vault: Arc<dyn Vault>,
        data_dir: &str,
        source: Arc<dyn LegacySource>,
        conversations: Arc<IndexManager<Conversations>>,
        workspaces: Arc<IndexManager<Workspaces>>,
    ) -> Self {
        Self {
            vault,
            state_path: format!("{}/{}", data_dir, STATE_FILE),
            source,
            conversations,
            workspaces,
            run_lock: Mutex::new(()),
        }
    }

    pub async fn status(&self) -> Result<MigrationState> {
        match self.vault.read(&self.state_path).await? {
            None => Ok(MigrationState::default()),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::corrupt("migration state", STATE_FILE, e)),
        }
    }

    async fn save_state(&self, state: &MigrationState) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        self.vault.write(&self.state_path, &bytes).await
    }

    /// Run or resume the migration.
    ///
    /// After a failed run whose enumeration finished, only the entities in the
    /// failure report are attempted again, followed by a full repair. Any
    /// other unfinished state restarts from the beginning; entity files that
    /// already exist are never overwritten, so restarting is safe.
    pub async fn run(&self, cancel: &CancelFlag) -> Result<MigrationOutcome> {
        let _guard = self.run_lock.lock().await;
        let mut state = self.status().await?;
        if let Some(completed_at) = state.completed_at {
            debug!(%completed_at, "migration already completed");
            return Ok(MigrationOutcome::AlreadyCompleted { completed_at });
        }

        let retry: Option<BTreeSet<(String, String)>> =
            (state.status == MigrationStatus::Failed && state.report.enumeration_complete).then(|| {
                state
                    .report
                    .failures
                    .iter()
                    .map(|f| (f.family.clone(), f.id.clone()))
                    .collect()
            });

        let mut report = match &retry {
            Some(_) => MigrationReport {
                failures: Vec::new(),
                ..state.report.clone()
            },
            None => MigrationReport::default(),
        };
        state.status = MigrationStatus::InProgress;
        state.started_at = Some(Utc::now());
        state.report = report.clone();
        self.save_state(&state).await?;
        info!(retrying = retry.as_ref().map(|r| r.len()), "migration started");

        let result = self.migrate_entities(&mut report, retry.as_ref(), cancel).await;
        let result = match result {
            Ok(()) => self.rebuild_indices(cancel).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(repairs) => {
                state.status = MigrationStatus::Completed;
                state.completed_at = Some(Utc::now());
                state.report = report.clone();
                self.save_state(&state).await?;
                info!(
                    converted = report.converted,
                    already_present = report.already_present,
                    failed = report.failures.len(),
                    "migration completed"
                );
                Ok(MigrationOutcome::Completed { report, repairs })
            }
            Err(e) => {
                warn!(error = %e, "migration failed");
                state.status = MigrationStatus::Failed;
                state.report = report;
                self.save_state(&state).await?;
                Err(e)
            }
        }
    }

    async fn load_legacy(&self) -> Result<LegacySnapshot> {
        let read = |name: &'static str| async move {
            Ok::<_, StoreError>(self.source.collection(name).await?.unwrap_or_default())
        };
        Ok(LegacySnapshot {
            workspaces: read(legacy::WORKSPACES).await?,
            sessions: read(legacy::SESSIONS).await?,
            traces: read(legacy::MEMORY_TRACES).await?,
            snapshots: read(legacy::SNAPSHOTS).await?,
            conversations: read(legacy::CONVERSATIONS).await?,
        })
    }

    async fn migrate_entities(
        &self,
        report: &mut MigrationReport,
        retry: Option<&BTreeSet<(String, String)>>,
        cancel: &CancelFlag,
    ) -> Result<()> {
        let loaded = self.load_legacy().await?;
        let wanted = |family: &str, id: &str| {
            retry.map_or(true, |r| r.contains(&(family.to_string(), id.to_string())))
        };

        let known: BTreeSet<&str> = loaded.workspaces.iter().map(|w| w.id.as_str()).collect();
        let mut rows: BTreeMap<String, WorkspaceRows<'_>> = BTreeMap::new();
        for (family, items) in [
            (legacy::SESSIONS, &loaded.sessions),
            (legacy::MEMORY_TRACES, &loaded.traces),
            (legacy::SNAPSHOTS, &loaded.snapshots),
        ] {
            for item in items {
                let owner = legacy::owner(item).workspace_id.unwrap_or_default();
                if !known.contains(owner.as_str()) {
                    if wanted(family, &item.id) {
                        report.failures.push(MigrationFailure {
                            family: family.to_string(),
                            id: item.id.clone(),
                            error: format!("owning workspace {:?} is not in the legacy store", owner),
                        });
                    }
                    continue;
                }
                let entry = rows.entry(owner).or_default();
                match family {
                    legacy::SESSIONS => entry.sessions.push(item),
                    legacy::MEMORY_TRACES => entry.traces.push(item),
                    _ => entry.snapshots.push(item),
                }
            }
        }

        let mut workspaces: Vec<&LegacyItem> = loaded.workspaces.iter().collect();
        workspaces.sort_by(|a, b| a.id.cmp(&b.id));
        let empty = WorkspaceRows::default();
        for item in workspaces {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            if !wanted(Workspaces::DIR, &item.id) {
                continue;
            }
            let converted = legacy::convert_workspace(item, rows.get(&item.id).unwrap_or(&empty));
            self.write_new(report, &*self.workspaces, item, converted).await;
        }

        let mut conversations: Vec<&LegacyItem> = loaded.conversations.iter().collect();
        conversations.sort_by(|a, b| a.id.cmp(&b.id));
        for item in conversations {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            if !wanted(Conversations::DIR, &item.id) {
                continue;
            }
            let converted = legacy::convert_conversation(item);
            self.write_new(report, &*self.conversations, item, converted).await;
        }

        report.enumeration_complete = true;
        Ok(())
    }

    /// Write a converted entity unless its file already exists. Every problem
    /// lands in the report; none stops the run.
    async fn write_new<F: Family>(
        &self,
        report: &mut MigrationReport,
        manager: &IndexManager<F>,
        item: &LegacyItem,
        converted: legacy::Converted<F::Entity>,
    ) {
        let fail = |report: &mut MigrationReport, error: String| {
            warn!(family = F::DIR, id = %item.id, %error, "legacy entity not migrated");
            report.failures.push(MigrationFailure {
                family: F::DIR.to_string(),
                id: item.id.clone(),
                error,
            });
        };

        let entity = match converted {
            Ok(entity) => entity,
            Err(e) => return fail(report, e.to_string()),
        };
        // same lock the services take, so a concurrent create cannot interleave
        let written = manager
            .with_lock(&item.id, || async {
                if manager.entities().exists(&item.id).await? {
                    return Ok(false);
                }
                manager.entities().put(&entity).await?;
                Ok::<_, StoreError>(true)
            })
            .await;
        match written {
            Ok(true) => {
                debug!(family = F::DIR, id = %item.id, "migrated");
                report.converted += 1;
            }
            Ok(false) => {
                debug!(family = F::DIR, id = %item.id, "already migrated");
                report.already_present += 1;
            }
            Err(e) => fail(report, e.to_string()),
        }
    }

    async fn rebuild_indices(&self, cancel: &CancelFlag) -> Result<Vec<RepairReport>> {
        Ok(vec![
            self.workspaces.repair(cancel).await?,
            self.conversations.repair(cancel).await?,
        ])
    }
}
