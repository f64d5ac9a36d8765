mod common;

use std::collections::BTreeMap;

use vault_memory::error::StoreError;
use vault_memory::search::{SearchKind, SearchRequest};
use vault_memory::store::locks::CancelFlag;
use vault_memory::store::manager::Discrepancy;
use vault_memory::types::{Conversation, MemoryTrace, Message, Role, Session, TraceMetadata, Workspace};

use common::{at, read_index, store, DATA_DIR};

fn conversation(id: &str, title: &str, vault: &str, texts: &[&str]) -> Conversation {
    let messages: Vec<Message> = texts
        .iter()
        .enumerate()
        .map(|(i, t)| Message::new(format!("m{}", i + 1), Role::User, *t))
        .collect();
    Conversation {
        id: id.into(),
        title: title.into(),
        created: at(2024, 3, 1),
        updated: at(2024, 3, 2),
        vault_name: vault.into(),
        message_count: messages.len(),
        messages,
    }
}

fn workspace(id: &str, name: &str, folder: &str) -> Workspace {
    Workspace {
        id: id.into(),
        name: name.into(),
        description: Some(format!("{} workspace", name)),
        root_folder: folder.into(),
        created: at(2024, 1, 1),
        last_accessed: at(2024, 1, 1),
        is_active: true,
        context: None,
        sessions: BTreeMap::new(),
    }
}

fn conv_index_path() -> String {
    format!("{}/conversations/index.json", DATA_DIR)
}

fn ws_index_path() -> String {
    format!("{}/workspaces/index.json", DATA_DIR)
}

#[tokio::test]
async fn entity_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    let conv = conversation("c1", "Garden plans", "home", &["plant tomatoes", "water daily"]);

    store.conversations.create(conv.clone()).await.unwrap();
    assert_eq!(store.conversations.get("c1").await.unwrap(), conv);
    assert!(store.conversations.get("c2").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn conversation_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    store
        .conversations
        .create(conversation("c1", "Reading list", "vault-a", &["first", "second"]))
        .await
        .unwrap();

    let index = read_index(&store.vault, &conv_index_path()).await;
    assert_eq!(index["byVault"]["vault-a"], serde_json::json!(["c1"]));
    assert_eq!(index["conversations"]["c1"]["message_count"], 2);

    store
        .conversations
        .add_message("c1", Message::new("m3", Role::Assistant, "third"))
        .await
        .unwrap();

    assert_eq!(store.conversations.get("c1").await.unwrap().messages.len(), 3);
    let index = read_index(&store.vault, &conv_index_path()).await;
    assert_eq!(index["conversations"]["c1"]["message_count"], 3);
}

#[tokio::test]
async fn workspace_nested_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    store.workspaces.create(workspace("w1", "Thesis", "research")).await.unwrap();
    store
        .workspaces
        .add_session("w1", Session::new("s1", Some("outline".into())))
        .await
        .unwrap();

    let trace = MemoryTrace {
        id: "t1".into(),
        timestamp: at(2024, 1, 2),
        trace_type: "search".into(),
        content: "looked up sources on soil carbon".into(),
        metadata: Some(TraceMetadata {
            tool: Some("searchContent".into()),
            params: None,
            result: None,
            related_files: vec!["research/soil.md".into()],
        }),
    };
    store.workspaces.add_memory_trace("w1", "s1", trace.clone()).await.unwrap();

    let again = store.workspaces.add_memory_trace("w1", "s1", trace.clone()).await;
    assert!(matches!(again, Err(StoreError::AlreadyExists { .. })));

    let ws = store.workspaces.get("w1").await.unwrap();
    assert_eq!(ws.sessions["s1"].memory_traces["t1"], trace);
    let index = read_index(&store.vault, &ws_index_path()).await;
    let sessions = index["sessionsByWorkspace"]["w1"].as_array().unwrap();
    assert!(sessions.contains(&serde_json::json!("s1")));
}

#[tokio::test]
async fn repair_matches_sequential_build() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    for (id, title, vault) in [("a1", "Alpha notes", "main"), ("b2", "Beta trip", "travel"), ("c3", "Gamma log", "main")] {
        store
            .conversations
            .create(conversation(id, title, vault, &["shared words here", title]))
            .await
            .unwrap();
    }
    for (id, name) in [("w1", "Novel"), ("w2", "Garden")] {
        store.workspaces.create(workspace(id, name, name)).await.unwrap();
    }
    store.workspaces.add_session("w2", Session::new("s1", None)).await.unwrap();

    let sequential_conv = read_index(&store.vault, &conv_index_path()).await;
    let sequential_ws = read_index(&store.vault, &ws_index_path()).await;

    store.conversation_index.repair(&CancelFlag::new()).await.unwrap();
    store.workspace_index.repair(&CancelFlag::new()).await.unwrap();

    assert_eq!(read_index(&store.vault, &conv_index_path()).await, sequential_conv);
    assert_eq!(read_index(&store.vault, &ws_index_path()).await, sequential_ws);
}

#[tokio::test]
async fn index_does_not_depend_on_history() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    store
        .conversations
        .create(conversation("c1", "Draft", "main", &["opening line"]))
        .await
        .unwrap();
    store.conversations.rename("c1", "Final title").await.unwrap();
    store
        .conversations
        .create(conversation("c2", "Scratch", "main", &["temporary"]))
        .await
        .unwrap();
    store.conversations.delete("c2").await.unwrap();

    let incremental = read_index(&store.vault, &conv_index_path()).await;
    store.conversation_index.repair(&CancelFlag::new()).await.unwrap();
    assert_eq!(read_index(&store.vault, &conv_index_path()).await, incremental);
}

#[tokio::test]
async fn deleted_index_is_recovered_by_repair() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    store
        .conversations
        .create(conversation("c1", "Sourdough starter", "kitchen", &["feed it flour"]))
        .await
        .unwrap();

    store.vault.delete(&conv_index_path()).await.unwrap();
    let drift = store.conversation_index.verify().await.unwrap();
    assert_eq!(drift, vec![Discrepancy::MissingMetadata { id: "c1".into() }]);

    let mut request = SearchRequest::new("sourdough", SearchKind::Conversations);
    request.traditional_only = true;
    assert_eq!(store.search.search(&request).await.total, 0);

    store.conversation_index.repair(&CancelFlag::new()).await.unwrap();
    assert!(store.conversation_index.verify().await.unwrap().is_empty());
    let response = store.search.search(&request).await;
    assert_eq!(response.total, 1);
    assert_eq!(response.results[0].id, "c1");
}

#[tokio::test]
async fn corrupt_entities_are_reported_not_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    store
        .conversations
        .create(conversation("good", "Fine", "main", &["ok"]))
        .await
        .unwrap();
    let bad = format!("{}/conversations/bad.json", DATA_DIR);
    store.vault.write(&bad, b"{\"id\": \"bad\", \"title\":").await.unwrap();

    assert!(matches!(
        store.conversations.get("bad").await,
        Err(StoreError::CorruptEntity { .. })
    ));
    let report = store.conversation_index.repair(&CancelFlag::new()).await.unwrap();
    assert_eq!(report.indexed, 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].0, "bad");
}

#[tokio::test]
async fn cancelled_repair_leaves_index_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    store.workspaces.create(workspace("w1", "Keep", "keep")).await.unwrap();
    let before = read_index(&store.vault, &ws_index_path()).await;

    store.vault.delete(&format!("{}/workspaces/w1.json", DATA_DIR)).await.unwrap();
    let cancel = CancelFlag::new();
    cancel.cancel();
    assert!(matches!(
        store.workspace_index.repair(&cancel).await,
        Err(StoreError::Cancelled)
    ));
    assert_eq!(read_index(&store.vault, &ws_index_path()).await, before);
}
