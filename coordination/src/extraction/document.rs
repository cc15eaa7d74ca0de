//! Candidate parameter documents and their recovery from completion text

use crate::feedback::outcome::Failure;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n(.*?)```")
        .expect("fenced JSON regex should compile")
});

/// The generator's own verdict on its document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    #[default]
    Complete,
    Incomplete,
}

/// An unvalidated parameter document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterDocument {
    pub sections: BTreeMap<String, Map<String, Value>>,
    pub comment: Option<String>,
    pub status: DocumentStatus,
    pub missing_parameters: Vec<String>,
    /// Top-level keys that were neither reserved nor objects
    pub stray_keys: Vec<String>,
}

impl ParameterDocument {
    pub fn section(&self, name: &str) -> Option<&Map<String, Value>> {
        self.sections.get(name)
    }

    /// Build from an already-parsed JSON object. `comment`, `status` and
    /// `missing_parameters` are document-level; every other object is a section.
    pub fn from_value(value: Value) -> Result<Self, Failure> {
        let Value::Object(object) = value else {
            return Err(Failure::generation(
                "the reply must be a JSON object with one object per parameter section",
            ));
        };

        let mut document = Self::default();
        for (key, value) in object {
            match key.as_str() {
                "comment" => {
                    document.comment = Some(match value {
                        Value::String(text) => text,
                        other => other.to_string(),
                    });
                }
                "status" => {
                    if let Value::String(status) = value {
                        document.status = if status.trim().eq_ignore_ascii_case("incomplete") {
                            DocumentStatus::Incomplete
                        } else {
                            DocumentStatus::Complete
                        };
                    }
                }
                "missing_parameters" => {
                    if let Value::Array(items) = value {
                        document.missing_parameters = items
                            .into_iter()
                            .map(|item| match item {
                                Value::String(s) => s,
                                other => other.to_string(),
                            })
                            .collect();
                    }
                }
                _ => match value {
                    Value::Object(section) => {
                        document.sections.insert(key, section);
                    }
                    _ => document.stray_keys.push(key),
                },
            }
        }
        Ok(document)
    }
}

/// Recover a JSON value from completion text.
///
/// Tries, in order: the whole reply, the outermost `{...}` span, a fenced
/// ```json block. Anything else is a `generation-error`.
pub fn recover_json(raw: &str) -> Result<Value, Failure> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Failure::generation("the reply was empty"));
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    for captures in FENCED_JSON.captures_iter(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(captures[1].trim()) {
            return Ok(value);
        }
    }

    Err(Failure::generation(
        "no JSON object could be parsed from the reply; answer with only the JSON document",
    ))
}

/// Recover and structure a parameter document from completion text.
pub fn parse_document(raw: &str) -> Result<ParameterDocument, Failure> {
    ParameterDocument::from_value(recover_json(raw)?)
}
