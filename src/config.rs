use std::path::PathBuf;

use crate::search::cascade::EmptySemanticPolicy;
use crate::search::semantic::DEFAULT_THRESHOLD;

/// Runtime settings, read from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the note vault.
    pub vault_path: PathBuf,
    /// Entity files, indices and migration state, relative to the vault root.
    pub data_dir: String,
    /// The legacy collection store, relative to the vault root.
    pub legacy_dir: String,
    pub semantic_enabled: bool,
    pub empty_semantic: EmptySemanticPolicy,
    pub threshold: f32,
}

impl Default for Config {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        Self {
            vault_path: PathBuf::from(format!("{}/vault", home)),
            data_dir: ".vault-memory".into(),
            legacy_dir: ".vault-memory/chroma-db".into(),
            semantic_enabled: true,
            empty_semantic: EmptySemanticPolicy::FallBack,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(path) = get("VAULT_PATH") {
            cfg.vault_path = PathBuf::from(path);
        }
        if let Some(dir) = get("VAULT_MEMORY_DATA_DIR") {
            cfg.data_dir = dir.trim_matches('/').to_string();
        }
        if let Some(dir) = get("VAULT_MEMORY_LEGACY_DIR") {
            cfg.legacy_dir = dir.trim_matches('/').to_string();
        }
        if let Some(flag) = get("VAULT_MEMORY_SEMANTIC").and_then(|v| parse_flag(&v)) {
            cfg.semantic_enabled = flag;
        }
        if let Some(flag) = get("VAULT_MEMORY_FALLBACK_ON_EMPTY").and_then(|v| parse_flag(&v)) {
            cfg.empty_semantic = if flag {
                EmptySemanticPolicy::FallBack
            } else {
                EmptySemanticPolicy::Accept
            };
        }
        match get("VAULT_MEMORY_THRESHOLD").map(|v| v.parse::<f32>()) {
            Some(Ok(t)) if (0.0..=1.0).contains(&t) => cfg.threshold = t,
            Some(_) => tracing::warn!("VAULT_MEMORY_THRESHOLD must be a number in [0, 1], using default"),
            None => {}
        }
        cfg
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = from(&[]);
        assert_eq!(cfg.data_dir, ".vault-memory");
        assert!(cfg.semantic_enabled);
        assert_eq!(cfg.empty_semantic, EmptySemanticPolicy::FallBack);
        assert_eq!(cfg.threshold, DEFAULT_THRESHOLD);
    }

    #[test]
    fn overrides_and_bad_values() {
        let cfg = from(&[
            ("VAULT_PATH", "/tmp/notes"),
            ("VAULT_MEMORY_SEMANTIC", "off"),
            ("VAULT_MEMORY_FALLBACK_ON_EMPTY", "false"),
            ("VAULT_MEMORY_THRESHOLD", "3.5"),
        ]);
        assert_eq!(cfg.vault_path, PathBuf::from("/tmp/notes"));
        assert!(!cfg.semantic_enabled);
        assert_eq!(cfg.empty_semantic, EmptySemanticPolicy::Accept);
        assert_eq!(cfg.threshold, DEFAULT_THRESHOLD);
    }
}
