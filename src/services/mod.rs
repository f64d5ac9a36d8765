//! Owning services. Each entity family has exactly one writer.

pub mod conversations;
pub mod workspaces;

pub use conversations::ConversationService;
pub use workspaces::{WorkspaceService, WorkspaceUpdate};
