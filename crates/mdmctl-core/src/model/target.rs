// ── Batch targets ──
//
// A `Target` names one remote object plus the category bucket it belongs
// to. Categories let differently-authorized collections share one batch;
// the label doubles as the remote collection name.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ── Category ────────────────────────────────────────────────────────

/// Category label, e.g. `managedDevices` or `comanagedDevices`.
///
/// Non-empty, no whitespace, no `/` or `:`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Category(String);

impl Category {
    pub fn new(raw: impl Into<String>) -> Result<Self, CoreError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CoreError::ValidationFailed {
                message: "target category must not be empty".into(),
            });
        }
        if trimmed
            .chars()
            .any(|c| c.is_whitespace() || c == '/' || c == ':')
        {
            return Err(CoreError::ValidationFailed {
                message: format!("invalid target category '{trimmed}'"),
            });
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Category {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Category {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Category> for String {
    fn from(c: Category) -> Self {
        c.0
    }
}

// ── Target ──────────────────────────────────────────────────────────

/// One remote object addressed by a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub category: Category,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Target {
    pub fn new(category: Category, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category,
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// `(category, id)` identity used for de-duplication.
    pub fn key(&self) -> (&Category, &str) {
        (&self.category, &self.id)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.id)
    }
}

/// Parses `category:id`. The id may itself contain `:`.
impl FromStr for Target {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (category, id) = s.split_once(':').ok_or_else(|| CoreError::ValidationFailed {
            message: format!("expected 'category:id', got '{s}'"),
        })?;
        let id = id.trim();
        if id.is_empty() {
            return Err(CoreError::ValidationFailed {
                message: format!("target '{s}' has an empty id"),
            });
        }
        Ok(Self::new(Category::new(category)?, id))
    }
}
