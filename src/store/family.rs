use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::store::index::{ConversationIndex, IndexRef, WorkspaceIndex};
use crate::types::{Conversation, Workspace};

/// A kind of top-level entity that shares one folder and one index file.
pub trait Family: Send + Sync + 'static {
    type Entity: Serialize + DeserializeOwned + Send + Sync;
    type Index: Serialize + DeserializeOwned + Default + Send + Sync;

    /// Folder under the data dir holding `<id>.json` files and `index.json`.
    const DIR: &'static str;
    /// Singular name used in errors and logs.
    const KIND: &'static str;

    fn entity_id(entity: &Self::Entity) -> &str;
    fn validate(id: &str, entity: &Self::Entity) -> Result<(), String>;

    /// Replace every index entry for this entity with freshly derived ones.
    fn index_entity(index: &mut Self::Index, entity: &Self::Entity);
    fn unindex(index: &mut Self::Index, id: &str);

    /// Ids present in the metadata mirror.
    fn mirrored_ids(index: &Self::Index) -> Vec<String>;
    fn references(index: &Self::Index) -> Vec<IndexRef>;

    fn stamp(index: &mut Self::Index, at: DateTime<Utc>);
}

pub struct Conversations;

impl Family for Conversations {
    type Entity = Conversation;
    type Index = ConversationIndex;

    const DIR: &'static str = "conversations";
    const KIND: &'static str = "conversation";

    fn entity_id(entity: &Conversation) -> &str {
        &entity.id
    }

    fn validate(id: &str, entity: &Conversation) -> Result<(), String> {
        entity.validate(id)
    }

    fn index_entity(index: &mut ConversationIndex, entity: &Conversation) {
        index.insert(entity);
    }

    fn unindex(index: &mut ConversationIndex, id: &str) {
        index.remove(id);
    }

    fn mirrored_ids(index: &ConversationIndex) -> Vec<String> {
        index.conversations.keys().cloned().collect()
    }

    fn references(index: &ConversationIndex) -> Vec<IndexRef> {
        index.references()
    }

    fn stamp(index: &mut ConversationIndex, at: DateTime<Utc>) {
        index.last_updated = Some(at);
    }
}

pub struct Workspaces;

impl Family for Workspaces {
    type Entity = Workspace;
    type Index = WorkspaceIndex;

    const DIR: &'static str = "workspaces";
    const KIND: &'static str = "workspace";

    fn entity_id(entity: &Workspace) -> &str {
        &entity.id
    }

    fn validate(id: &str, entity: &Workspace) -> Result<(), String> {
        entity.validate(id)
    }

    fn index_entity(index: &mut WorkspaceIndex, entity: &Workspace) {
        index.insert(entity);
    }

    fn unindex(index: &mut WorkspaceIndex, id: &str) {
        index.remove(id);
    }

    fn mirrored_ids(index: &WorkspaceIndex) -> Vec<String> {
        index.workspaces.keys().cloned().collect()
    }

    fn references(index: &WorkspaceIndex) -> Vec<IndexRef> {
        index.references()
    }

    fn stamp(index: &mut WorkspaceIndex, at: DateTime<Utc>) {
        index.last_updated = Some(at);
    }
}
