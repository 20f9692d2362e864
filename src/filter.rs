//! Metadata `where` filters built from keyword sets.
//!
//! Passages carry `tag_<keyword> = true` metadata entries. A [`WhereFilter`]
//! selects passages tagged with at least one query keyword. The JSON form
//! matches Chroma's `where` syntax so the same value can be sent to a remote
//! store or evaluated in-process with [`WhereFilter::matches`].
//!
//! ```text
//! {"tag_policy": {"$eq": true}}                                  one keyword
//! {"$or": [{"tag_policy": {"$eq": true}}, {"tag_tardy": {"$eq": true}}]}
//! ```

use serde_json::{json, Map, Value};

use crate::error::{AssistantError, Result};
use crate::keywords::KeywordSet;

/// Metadata key prefix written at ingestion time.
pub const TAG_PREFIX: &str = "tag_";

/// A boolean predicate over passage metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereFilter {
    /// `metadata[key] == value`
    Eq { key: String, value: bool },
    /// At least one branch matches.
    Or(Vec<WhereFilter>),
}

impl WhereFilter {
    /// Build the tag filter for `keywords`.
    ///
    /// Returns `Ok(None)` for an empty set, a bare [`WhereFilter::Eq`] for a
    /// single keyword, and an [`WhereFilter::Or`] otherwise. Fails with
    /// [`AssistantError::MalformedFilterInput`] when a keyword cannot be
    /// used as a metadata key.
    pub fn from_keywords(keywords: &KeywordSet) -> Result<Option<Self>> {
        let mut conditions = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            conditions.push(WhereFilter::Eq {
                key: tag_key(keyword)?,
                value: true,
            });
        }

        Ok(match conditions.len() {
            0 => None,
            1 => conditions.pop(),
            _ => Some(WhereFilter::Or(conditions)),
        })
    }

    /// Evaluate against a metadata object. Missing keys never match.
    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        match self {
            WhereFilter::Eq { key, value } => {
                metadata.get(key).and_then(Value::as_bool) == Some(*value)
            }
            WhereFilter::Or(branches) => branches.iter().any(|b| b.matches(metadata)),
        }
    }

    /// Chroma-compatible JSON representation.
    pub fn to_json(&self) -> Value {
        match self {
            WhereFilter::Eq { key, value } => {
                let mut condition = Map::new();
                condition.insert(key.clone(), json!({ "$eq": value }));
                Value::Object(condition)
            }
            WhereFilter::Or(branches) => {
                json!({ "$or": branches.iter().map(WhereFilter::to_json).collect::<Vec<_>>() })
            }
        }
    }
}

/// The metadata key for a keyword: `tag_<keyword>`.
pub fn tag_key(keyword: &str) -> Result<String> {
    let invalid = keyword.is_empty()
        || keyword.starts_with('$')
        || keyword.contains('.')
        || keyword.chars().any(char::is_whitespace);
    if invalid {
        return Err(AssistantError::MalformedFilterInput(format!(
            "keyword {:?} cannot form a metadata key",
            keyword
        )));
    }
    Ok(format!("{}{}", TAG_PREFIX, keyword))
}
