//! Schema descriptors for structured model output.

use jsonschema::JSONSchema;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

use crate::error::{GatewayError, Result};

/// Maximum number of validation errors folded into one report.
const MAX_REPORTED_ERRORS: usize = 3;

/// A named, compiled JSON Schema describing the shape a call site expects.
///
/// Cloning is cheap: the compiled validator is shared.
#[derive(Clone)]
pub struct Schema {
    name: String,
    document: Value,
    compiled: Arc<JSONSchema>,
    digest: String,
}

impl Schema {
    pub fn new(name: impl Into<String>, document: Value) -> Result<Self> {
        let name = name.into();
        let compiled = JSONSchema::compile(&document)
            .map_err(|e| GatewayError::InvalidSchema(format!("{name}: {e}")))?;
        let digest = digest_of(&document);

        Ok(Self {
            name,
            document,
            compiled: Arc::new(compiled),
            digest,
        })
    }

    /// Parse a schema document from JSON text.
    pub fn from_json_str(name: impl Into<String>, text: &str) -> Result<Self> {
        let name = name.into();
        let document: Value = serde_json::from_str(text)
            .map_err(|e| GatewayError::InvalidSchema(format!("{name}: {e}")))?;
        Self::new(name, document)
    }

    /// Object schema requiring the given fields, with no type constraints on them.
    pub fn object(name: impl Into<String>, required: &[&str]) -> Result<Self> {
        Self::new(
            name,
            json!({
                "type": "object",
                "required": required,
            }),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Stable hash of the schema document, used in request fingerprints.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Validate a decoded value, returning a short human-readable reason on failure.
    pub fn validate(&self, value: &Value) -> std::result::Result<(), String> {
        if let Err(errors) = self.compiled.validate(value) {
            let reasons: Vec<String> = errors
                .take(MAX_REPORTED_ERRORS)
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{path}: {e}")
                    }
                })
                .collect();
            return Err(reasons.join("; "));
        }
        Ok(())
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("digest", &self.digest)
            .finish()
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.digest == other.digest
    }
}

fn digest_of(document: &Value) -> String {
    let canonical = document.to_string();
    let hash = Sha256::digest(canonical.as_bytes());
    let mut hex = String::with_capacity(64);
    for b in hash.iter() {
        use std::fmt::Write;
        let _ = write!(hex, "{:02x}", b);
    }
    hex
}
