//! Deterministic request hashing for cache keys.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::request::Request;

/// Cache key of a request, rendered as `"{namespace}:{sha256-hex}"`.
///
/// The namespace prefix lets callers drop every cached answer for one
/// business area with a single prefix invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash the prompt, system instructions, model parameters and output shape.
    ///
    /// With `normalize` set, prompt and system text are lowercased and their
    /// whitespace collapsed first, so trivially different phrasings share an entry.
    pub fn of(request: &Request, normalize: bool) -> Self {
        let text = |s: &str| {
            if normalize {
                normalize_text(s)
            } else {
                s.to_string()
            }
        };

        let params = request.model_params();
        let mut hasher = Sha256::new();
        write_field(&mut hasher, text(request.prompt()).as_bytes());
        match request.system_instructions() {
            Some(system) => {
                hasher.update([1u8]);
                write_field(&mut hasher, text(system).as_bytes());
            }
            None => hasher.update([0u8]),
        }
        write_field(&mut hasher, params.model_name.as_bytes());
        hasher.update(params.temperature.to_le_bytes());
        hasher.update(params.max_tokens.to_le_bytes());
        match request.schema() {
            Some(schema) => {
                hasher.update([1u8]);
                write_field(&mut hasher, schema.digest().as_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update([u8::from(request.is_list())]);
        let result = hasher.finalize();

        let namespace = request.namespace();
        let mut key = String::with_capacity(namespace.len() + 1 + 64);
        key.push_str(namespace);
        key.push(':');
        for b in result.iter() {
            use std::fmt::Write;
            let _ = write!(key, "{:02x}", b);
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// Length-prefixed so adjacent fields can never run into each other.
fn write_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
