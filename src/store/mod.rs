pub mod embeddings;
pub mod entity;
pub mod family;
pub mod index;
pub mod locks;
pub mod manager;
pub mod vault;

use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::migration::legacy::FileLegacySource;
use crate::migration::MigrationService;
use crate::search::cascade::SearchCascade;
use crate::search::fuzzy::SubsequenceMatcher;
use crate::search::semantic::{SemanticStrategy, VectorSimilarity};
use crate::search::traditional::TraditionalStrategy;
use crate::search::SearchStrategy;
use crate::services::{ConversationService, WorkspaceService};

use family::{Conversations, Workspaces};
use manager::IndexManager;
use vault::{FsVault, Vault};

/// Everything the server and the maintenance commands operate on, wired once.
pub struct Store {
    pub vault: Arc<dyn Vault>,
    pub conversation_index: Arc<IndexManager<Conversations>>,
    pub workspace_index: Arc<IndexManager<Workspaces>>,
    pub conversations: ConversationService,
    pub workspaces: WorkspaceService,
    pub migration: MigrationService,
    pub search: SearchCascade,
    pub vectors: Option<Arc<embeddings::QdrantSimilarity>>,
}

impl Store {
    pub async fn init(config: &Config) -> Result<Self> {
        for dir in [
            config.data_dir.clone(),
            format!("{}/conversations", config.data_dir),
            format!("{}/workspaces", config.data_dir),
        ] {
            std::fs::create_dir_all(config.vault_path.join(dir))?;
        }

        let vault: Arc<dyn Vault> =
            Arc::new(FsVault::new(&config.vault_path).hiding(config.data_dir.clone()));

        // Qdrant is optional; without it every search takes the traditional path
        let vectors = if config.semantic_enabled {
            match embeddings::QdrantSimilarity::connect().await {
                Ok(v) => {
                    tracing::info!("qdrant connected, semantic search enabled");
                    Some(Arc::new(v))
                }
                Err(e) => {
                    tracing::warn!("qdrant unavailable, semantic search disabled: {}", e);
                    None
                }
            }
        } else {
            tracing::info!("semantic search disabled by configuration");
            None
        };

        let backend = vectors.clone().map(|v| v as Arc<dyn VectorSimilarity>);
        let mut store = Self::open(vault, config, backend);
        store.vectors = vectors;
        Ok(store)
    }

    /// Assemble over an existing vault and an optional similarity backend.
    pub fn open(
        vault: Arc<dyn Vault>,
        config: &Config,
        backend: Option<Arc<dyn VectorSimilarity>>,
    ) -> Self {
        let conversation_index = Arc::new(IndexManager::new(
            entity::EntityStore::new(vault.clone(), &config.data_dir),
            index::IndexStore::new(vault.clone(), &config.data_dir),
        ));
        let workspace_index = Arc::new(IndexManager::new(
            entity::EntityStore::new(vault.clone(), &config.data_dir),
            index::IndexStore::new(vault.clone(), &config.data_dir),
        ));

        let migration = MigrationService::new(
            vault.clone(),
            &config.data_dir,
            Arc::new(FileLegacySource::new(vault.clone(), config.legacy_dir.clone())),
            conversation_index.clone(),
            workspace_index.clone(),
        );

        let strategies: Vec<Arc<dyn SearchStrategy>> = vec![
            Arc::new(SemanticStrategy::new(backend, vault.clone(), config.threshold)),
            Arc::new(TraditionalStrategy::new(
                vault.clone(),
                Arc::new(SubsequenceMatcher),
                conversation_index.clone(),
                workspace_index.clone(),
            )),
        ];

        Self {
            conversations: ConversationService::new(conversation_index.clone()),
            workspaces: WorkspaceService::new(workspace_index.clone()),
            search: SearchCascade::new(strategies, config.empty_semantic),
            vault,
            conversation_index,
            workspace_index,
            migration,
            vectors: None,
        }
    }
}
