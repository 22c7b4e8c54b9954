// ── Remote object model and client seam ──
//
// The core never builds wire payloads. It talks to the remote API through
// `RemoteObjectClient`, which hands back loosely-typed `RemoteObject`s.

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Error;

/// One object as returned by the remote management API.
///
/// Only the identifier is typed; every other field stays in `properties`
/// so the same shape works for devices, identities, and policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub id: String,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl RemoteObject {
    /// An object known only by its id (e.g. a `204 No Content` reply).
    pub fn bare(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            properties: Map::new(),
        }
    }

    /// Build from a decoded JSON body.
    ///
    /// Falls back to `fallback_id` when the body carries no `id` field.
    pub fn from_value(fallback_id: &str, value: Value) -> Result<Self, Error> {
        let Value::Object(mut properties) = value else {
            return Err(Error::Deserialization {
                message: "expected a JSON object".into(),
                body: value.to_string(),
            });
        };
        let id = match properties.remove("id") {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => fallback_id.to_owned(),
        };
        Ok(Self { id, properties })
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Render a scalar property as text. Strings are returned unquoted;
    /// numbers and booleans use their JSON form. Arrays, objects and nulls
    /// yield `None`.
    pub fn property_text(&self, name: &str) -> Option<String> {
        match self.properties.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// Narrow client interface consumed by the core.
///
/// `collection` names the remote object collection (the target category);
/// `verb` names a remote action such as `restart` or `retire`.
pub trait RemoteObjectClient: Send + Sync {
    /// Fetch a single object.
    fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<RemoteObject, Error>> + Send;

    /// Invoke `verb` on a single object, optionally with a JSON body.
    fn invoke(
        &self,
        collection: &str,
        id: &str,
        verb: &str,
        body: Option<&Value>,
    ) -> impl Future<Output = Result<RemoteObject, Error>> + Send;
}
