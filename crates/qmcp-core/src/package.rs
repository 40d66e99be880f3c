// SPDX-License-Identifier: MIT OR Apache-2.0
//! Package references, manifests, and top-hash computation.
//!
//! A package revision is identified by `(registry, name, top_hash)` and is
//! immutable once written.  The top-hash is a SHA-256 digest over the
//! canonical manifest bytes, so identical entries + metadata always produce
//! the identical revision id regardless of input ordering.

use qmcp_error::QmcpError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

/// `(registry, name)` — resolves via tag to a top-hash or to latest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageRef {
    /// Registry bucket URL (e.g. `s3://my-registry`).
    pub registry: String,
    /// Package name, conventionally `namespace/name`.
    pub name: String,
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.registry, self.name)
    }
}

/// One revision of a package in a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionInfo {
    /// Content hash identifying the revision.
    pub top_hash: String,
    /// Commit timestamp.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Commit message, when one was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Tags pointing at this revision, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Copy mode
// ---------------------------------------------------------------------------

/// Whether referenced physical objects are copied into the registry bucket
/// during a revision write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CopyMode {
    /// Nothing is copied; the manifest references the original locations.
    /// The writer must not alter source buckets.
    #[default]
    None,
    /// Copy only entries whose physical key is not already under the
    /// registry bucket.
    New,
    /// Copy every entry into the registry bucket.
    All,
}

impl fmt::Display for CopyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::New => "new",
            Self::All => "all",
        })
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// Where the bytes of a requested package entry come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntrySource {
    /// An existing S3 object, referenced in place.
    S3 {
        /// Full `s3://bucket/key` URI.
        uri: String,
    },
    /// Inline text staged to the registry bucket at write time.
    Text {
        /// The content.
        text: String,
    },
}

/// A requested entry in a revision write: logical path plus source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRequest {
    /// Logical path inside the package (e.g. `data/x.csv`).
    pub logical_path: String,
    /// Where the bytes come from.
    pub source: EntrySource,
}

/// A resolved manifest entry: logical path mapped to a physical object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Logical path inside the package.
    pub logical_path: String,
    /// Physical `s3://bucket/key` URI (possibly versioned).
    pub physical_uri: String,
    /// Object size in bytes.
    pub size: u64,
    /// Content hash of the object (hex SHA-256).
    pub hash: String,
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// A canonical, hashed mapping from logical paths to physical objects plus
/// user metadata.  Immutable once committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Entries sorted by logical path.  Construction enforces ordering.
    entries: Vec<ManifestEntry>,
    /// User metadata blob.
    metadata: Value,
}

impl Manifest {
    /// Build a manifest from entries in any order.  Entries are sorted by
    /// logical path; a duplicate logical path is rejected.
    pub fn new(mut entries: Vec<ManifestEntry>, metadata: Value) -> Result<Self, QmcpError> {
        entries.sort_by(|a, b| a.logical_path.cmp(&b.logical_path));
        for pair in entries.windows(2) {
            if pair[0].logical_path == pair[1].logical_path {
                return Err(QmcpError::validation(format!(
                    "duplicate logical path '{}'",
                    pair[0].logical_path
                )));
            }
        }
        Ok(Self { entries, metadata })
    }

    /// The sorted entries.
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// The user metadata blob.
    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    /// Look up an entry by logical path.
    pub fn get(&self, logical_path: &str) -> Option<&ManifestEntry> {
        self.entries
            .binary_search_by(|e| e.logical_path.as_str().cmp(logical_path))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Serialize to the canonical byte form the top-hash is computed over:
    /// one JSON line per entry in logical-path order, then the metadata with
    /// recursively sorted object keys.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in &self.entries {
            // Entries are plain structs; field order is fixed by the type.
            out.extend_from_slice(
                serde_json::to_string(entry)
                    .expect("manifest entry serializes")
                    .as_bytes(),
            );
            out.push(b'\n');
        }
        out.extend_from_slice(
            serde_json::to_string(&canonicalize(&self.metadata))
                .expect("metadata serializes")
                .as_bytes(),
        );
        out.push(b'\n');
        out
    }

    /// SHA-256 over [`canonical_bytes`](Self::canonical_bytes), hex-encoded.
    pub fn top_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Rebuild a JSON value with every object's keys in sorted order, so the
/// serialized form is independent of insertion order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            let mut out = serde_json::Map::with_capacity(sorted.len());
            for (k, v) in sorted {
                out.insert(k.clone(), canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Parse `s3://bucket/key` into `(bucket, key)`.
pub fn parse_s3_uri(uri: &str) -> Result<(String, String), QmcpError> {
    let rest = uri
        .strip_prefix("s3://")
        .ok_or_else(|| QmcpError::validation(format!("not an s3:// URI: {uri}")))?;
    let (bucket, key) = rest
        .split_once('/')
        .ok_or_else(|| QmcpError::validation(format!("s3 URI has no key: {uri}")))?;
    if bucket.is_empty() || key.is_empty() {
        return Err(QmcpError::validation(format!("malformed s3 URI: {uri}")));
    }
    Ok((bucket.to_string(), key.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
