//! Markdown note parsing: YAML frontmatter properties and tags.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub path: String,
    /// Frontmatter values flattened to display strings; lists are joined with ", ".
    pub properties: BTreeMap<String, String>,
    /// Lowercase, without the leading `#`.
    pub tags: BTreeSet<String>,
    pub body: String,
}

impl Note {
    pub fn parse(path: &str, raw: &str) -> Self {
        let (frontmatter, body) = split_frontmatter(raw);
        let mut properties = BTreeMap::new();
        let mut tags = BTreeSet::new();

        if let Some(fm) = frontmatter {
            match serde_yaml::from_str::<serde_yaml::Mapping>(fm) {
                Ok(map) => {
                    for (k, v) in map {
                        let Some(key) = k.as_str().map(str::to_string) else {
                            continue;
                        };
                        if key == "tags" || key == "tag" {
                            tags.extend(yaml_strings(&v).into_iter().map(normalize_tag));
                        }
                        properties.insert(key, yaml_display(&v));
                    }
                }
                Err(e) => tracing::debug!(path, error = %e, "unparseable frontmatter"),
            }
        }

        for cap in inline_tag_re().captures_iter(body) {
            tags.insert(normalize_tag(cap[1].to_string()));
        }

        Self {
            path: path.to_string(),
            properties,
            tags: tags.into_iter().filter(|t| !t.is_empty()).collect(),
            body: body.to_string(),
        }
    }
}

fn split_frontmatter(raw: &str) -> (Option<&str>, &str) {
    let rest = match raw.strip_prefix("---\n").or_else(|| raw.strip_prefix("---\r\n")) {
        Some(rest) => rest,
        None => return (None, raw),
    };
    for marker in ["\n---\n", "\n---\r\n"] {
        if let Some(end) = rest.find(marker) {
            return (Some(&rest[..end]), &rest[end + marker.len()..]);
        }
    }
    if let Some(fm) = rest.strip_suffix("\n---") {
        return (Some(fm), "");
    }
    (None, raw)
}

fn inline_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|\s)#([\p{L}\p{N}_/\-]*[\p{L}_/\-][\p{L}\p{N}_/\-]*)")
            .expect("static regex")
    })
}

fn normalize_tag(tag: String) -> String {
    tag.trim().trim_start_matches('#').to_lowercase()
}

fn yaml_strings(v: &serde_yaml::Value) -> Vec<String> {
    match v {
        serde_yaml::Value::Sequence(items) => items.iter().flat_map(yaml_strings).collect(),
        serde_yaml::Value::String(s) => s
            .split([',', ' '])
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        serde_yaml::Value::Null => Vec::new(),
        other => vec![yaml_display(other)],
    }
}

fn yaml_display(v: &serde_yaml::Value) -> String {
    match v {
        serde_yaml::Value::Null => String::new(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Sequence(items) => items
            .iter()
            .map(yaml_display)
            .collect::<Vec<_>>()
            .join(", "),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}
