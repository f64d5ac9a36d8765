use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A field that is present deserializes to `Some`, even when it holds
/// `null`. Absent fields fall back to `None` through `#[serde(default)]`.
fn present<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// Serialized JSON arguments, kept as the model produced them.
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub name: String,
    pub function: FunctionCall,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub tool_params: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<serde_json::Value>,
}

impl Message {
    pub fn new(id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_calls: None,
            tool_name: None,
            tool_params: None,
            tool_result: None,
        }
    }

    /// Tool names this message invoked, either as calls or as a tool message itself.
    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.tool_calls
            .iter()
            .flatten()
            .map(|c| c.name.as_str())
            .chain(self.tool_name.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub vault_name: String,
    pub message_count: usize,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn validate(&self, id: &str) -> Result<(), String> {
        if self.id != id {
            return Err(format!("document id '{}' does not match file id", self.id));
        }
        if self.message_count != self.messages.len() {
            return Err(format!(
                "message_count {} does not match {} messages",
                self.message_count,
                self.messages.len()
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TraceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryTrace {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub trace_type: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TraceMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub id: String,
    pub name: String,
    pub created: DateTime<Utc>,
    pub snapshot: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub is_active: bool,
    #[serde(default)]
    pub memory_traces: BTreeMap<String, MemoryTrace>,
    #[serde(default)]
    pub states: BTreeMap<String, StateSnapshot>,
}

impl Session {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
            description: None,
            start_time: Utc::now(),
            end_time: None,
            is_active: true,
            memory_traces: BTreeMap::new(),
            states: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub root_folder: String,
    pub created: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub is_active: bool,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    #[serde(default)]
    pub sessions: BTreeMap<String, Session>,
}

impl Workspace {
    pub fn validate(&self, id: &str) -> Result<(), String> {
        if self.id != id {
            return Err(format!("document id '{}' does not match file id", self.id));
        }
        for (key, session) in &self.sessions {
            if key != &session.id {
                return Err(format!("session key '{}' holds session '{}'", key, session.id));
            }
            if let Some((k, t)) = session.memory_traces.iter().find(|(k, t)| *k != &t.id) {
                return Err(format!("trace key '{}' holds trace '{}'", k, t.id));
            }
            if let Some((k, s)) = session.states.iter().find(|(k, s)| *k != &s.id) {
                return Err(format!("state key '{}' holds state '{}'", k, s.id));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!(Role::from_str("Assistant"), Some(Role::Assistant));
        assert_eq!(Role::from_str("system"), None);
    }

    #[test]
    fn workspace_serializes_camel_case() {
        let now = Utc::now();
        let ws = Workspace {
            id: "w1".into(),
            name: "Research".into(),
            description: None,
            root_folder: "research".into(),
            created: now,
            last_accessed: now,
            is_active: true,
            context: None,
            sessions: BTreeMap::new(),
        };
        let json = serde_json::to_value(&ws).unwrap();
        assert!(json.get("rootFolder").is_some());
        assert!(json.get("lastAccessed").is_some());
        assert!(json.get("description").is_none());
    }

    #[test]
    fn validate_rejects_mismatched_session_key() {
        let now = Utc::now();
        let mut ws = Workspace {
            id: "w1".into(),
            name: "Research".into(),
            description: None,
            root_folder: "/".into(),
            created: now,
            last_accessed: now,
            is_active: true,
            context: None,
            sessions: BTreeMap::new(),
        };
        ws.sessions.insert("s1".into(), Session::new("s2", None));
        assert!(ws.validate("w1").is_err());
        assert!(ws.validate("w2").is_err());
    }
}
