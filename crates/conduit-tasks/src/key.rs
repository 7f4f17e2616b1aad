//! Cache keys - SHA-256 over a task's identity and canonicalized arguments

use std::fmt;

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::error::HashError;
use crate::registry::{push_framed, push_len, HashRegistry};
use crate::task::TaskId;
use crate::value::Value;

const DOMAIN: &[u8] = b"conduit.memo.v1";

/// Cache key: a fixed-size digest of task identity and arguments
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Derive the key for one invocation.
    ///
    /// Positional arguments contribute in order. Keyword arguments are sorted by
    /// name first, so their presentation order never changes the key.
    pub fn derive(
        registry: &HashRegistry,
        task: &TaskId,
        positional: &[Value],
        keyword: &[(String, Value)],
    ) -> Result<Self, HashError> {
        let mut hasher = Sha256::new();
        hasher.update(DOMAIN);

        // Hash task identity
        let mut buf = Vec::new();
        push_framed(&mut buf, task.name.as_bytes());
        push_framed(&mut buf, task.fingerprint.as_bytes());
        hasher.update(&buf);

        // Hash positional arguments
        buf.clear();
        push_len(&mut buf, positional.len());
        for arg in positional {
            push_framed(&mut buf, &registry.canonicalize(arg)?);
        }
        hasher.update(&buf);

        // Hash keyword arguments (sorted for determinism)
        let mut pairs = keyword
            .iter()
            .map(|(name, value)| Ok((name.as_str(), registry.canonicalize(value)?)))
            .collect::<Result<Vec<_>, HashError>>()?;
        pairs.sort_by(|a, b| a.0.cmp(b.0));

        buf.clear();
        push_len(&mut buf, pairs.len());
        for (name, value) in &pairs {
            push_framed(&mut buf, name.as_bytes());
            push_framed(&mut buf, value);
        }
        hasher.update(&buf);

        let key = CacheKey(hasher.finalize().into());
        trace!(task = %task, key = %key, "derived cache key");
        Ok(key)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex digest
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// First 12 hex characters, for logs
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.short())
    }
}

impl Serialize for CacheKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}
