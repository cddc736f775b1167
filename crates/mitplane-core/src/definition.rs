//! Layer 3: Mitigation definitions
//!
//! A definition is an opaque JSON document supplied by the caller. We store
//! it in canonical form (recursively sorted object keys, no insignificant
//! whitespace) so byte equality is definition equality, and keep a 32-bit
//! hash alongside as the O(1) duplicate pre-filter. Hash equality may
//! collide; string equality is the truth.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("definition is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("definition must be a JSON object, got {got}")]
    NotAnObject { got: &'static str },
}

/// 32-bit pre-filter hash of a canonical definition.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefinitionHash(i32);

impl DefinitionHash {
    pub fn get(&self) -> i32 {
        self.0
    }
}

impl fmt::Debug for DefinitionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DefinitionHash({:#010x})", self.0)
    }
}

/// A mitigation definition in canonical JSON form.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MitigationDefinition {
    canonical: String,
}

impl MitigationDefinition {
    /// Parse and canonicalize a raw JSON document.
    pub fn parse(raw: &str) -> Result<Self, DefinitionError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, DefinitionError> {
        if !value.is_object() {
            return Err(DefinitionError::NotAnObject {
                got: json_type_name(&value),
            });
        }
        let canonical = serde_json::to_string(&canon_value(value))?;
        Ok(Self { canonical })
    }

    /// Canonical JSON text. Byte equality of two definitions' canonical text
    /// is definition equality.
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    pub fn hash(&self) -> DefinitionHash {
        let digest = Sha256::digest(self.canonical.as_bytes());
        let word: [u8; 4] = digest[..4].try_into().expect("sha256 yields 32 bytes");
        DefinitionHash(i32::from_be_bytes(word))
    }
}

impl fmt::Debug for MitigationDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MitigationDefinition({})", self.canonical)
    }
}

impl TryFrom<String> for MitigationDefinition {
    type Error = DefinitionError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        MitigationDefinition::parse(&s)
    }
}

impl From<MitigationDefinition> for String {
    fn from(def: MitigationDefinition) -> String {
        def.canonical
    }
}

fn canon_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(String, Value)> =
                map.into_iter().map(|(k, v)| (k, canon_value(v))).collect();
            sorted.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canon_value).collect()),
        other => other,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
