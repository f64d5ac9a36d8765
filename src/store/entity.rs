use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::store::family::Family;
use crate::store::index::INDEX_FILE;
use crate::store::vault::Vault;

/// One JSON document per entity id under `<data_dir>/<family>/<id>.json`.
///
/// `put` overwrites the whole document. Callers mutating nested state must
/// read, modify and write back while holding the id's lock.
pub struct EntityStore<F: Family> {
    vault: Arc<dyn Vault>,
    dir: String,
    _family: PhantomData<F>,
}

impl<F: Family> Clone for EntityStore<F> {
    fn clone(&self) -> Self {
        Self {
            vault: self.vault.clone(),
            dir: self.dir.clone(),
            _family: PhantomData,
        }
    }
}

impl<F: Family> EntityStore<F> {
    pub fn new(vault: Arc<dyn Vault>, data_dir: &str) -> Self {
        Self {
            vault,
            dir: format!("{}/{}", data_dir, F::DIR),
            _family: PhantomData,
        }
    }

    pub async fn get(&self, id: &str) -> Result<F::Entity> {
        let path = self.path_for(id)?;
        let bytes = self
            .vault
            .read(&path)
            .await?
            .ok_or_else(|| StoreError::not_found(F::KIND, id))?;
        let entity: F::Entity =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::corrupt(F::KIND, id, e))?;
        F::validate(id, &entity).map_err(|reason| StoreError::corrupt(F::KIND, id, reason))?;
        Ok(entity)
    }

    pub async fn put(&self, entity: &F::Entity) -> Result<()> {
        let id = F::entity_id(entity);
        let path = self.path_for(id)?;
        F::validate(id, entity).map_err(|reason| StoreError::corrupt(F::KIND, id, reason))?;
        let bytes = serde_json::to_vec_pretty(entity)?;
        self.vault.write(&path, &bytes).await
    }

    /// Returns whether a document was removed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id)?;
        self.vault.delete(&path).await
    }

    pub async fn exists(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id)?;
        self.vault.exists(&path).await
    }

    /// Entity ids in ascending order.
    pub async fn list(&self) -> Result<Vec<String>> {
        let names = self.vault.list(&self.dir).await?;
        Ok(names
            .into_iter()
            .filter(|n| n != INDEX_FILE)
            .filter_map(|n| n.strip_suffix(".json").map(str::to_string))
            .collect())
    }

    fn path_for(&self, id: &str) -> Result<String> {
        validate_id(id)?;
        Ok(format!("{}/{}.json", self.dir, id))
    }
}

pub fn validate_id(id: &str) -> Result<()> {
    let bad = id.is_empty()
        || id == "index"
        || id.starts_with('.')
        || id.contains(|c: char| c == '/' || c == '\\' || c.is_control());
    if bad {
        return Err(StoreError::InvalidId(id.to_string()));
    }
    Ok(())
}
