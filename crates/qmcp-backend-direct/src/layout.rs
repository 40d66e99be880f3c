// SPDX-License-Identifier: MIT OR Apache-2.0
//! Registry key layout and pure write-planning helpers.
//!
//! A registry bucket stores three families of objects:
//!
//! * `.quilt/named_packages/<namespace>/<name>/<tag>` — pointer objects
//!   whose body is a top-hash.  `latest` is the mutable head; numeric tags
//!   are commit timestamps.
//! * `.quilt/packages/<top_hash>` — immutable revision records.
//! * `.quilt/data/<sha256>` — content-addressed physical objects staged or
//!   copied at write time.

use qmcp_core::package::{CopyMode, Manifest, parse_s3_uri};
use qmcp_error::QmcpError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Prefix for pointer objects of one package.
pub fn pointer_prefix(name: &str) -> String {
    format!(".quilt/named_packages/{name}/")
}

/// Key of one pointer object.
pub fn pointer_key(name: &str, tag: &str) -> String {
    format!(".quilt/named_packages/{name}/{tag}")
}

/// Key of a revision record.
pub fn revision_key(top_hash: &str) -> String {
    format!(".quilt/packages/{top_hash}")
}

/// Content-addressed key for staged or copied data.
pub fn data_key(content_hash: &str) -> String {
    format!(".quilt/data/{content_hash}")
}

/// Extract `namespace/name` and tag from a pointer key, if it is one.
pub fn parse_pointer_key(key: &str) -> Option<(String, String)> {
    let rest = key.strip_prefix(".quilt/named_packages/")?;
    let (name, tag) = rest.rsplit_once('/')?;
    // Package names are `namespace/name`; anything shallower is not a
    // pointer we wrote.
    if !name.contains('/') || tag.is_empty() {
        return None;
    }
    Some((name.to_string(), tag.to_string()))
}

/// Hex SHA-256 of inline content staged into the registry.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Whether a resolved entry's physical object must be copied into the
/// registry bucket under the given copy mode.
pub fn needs_copy(mode: CopyMode, physical_uri: &str, registry_bucket: &str) -> bool {
    match mode {
        CopyMode::None => false,
        CopyMode::All => true,
        CopyMode::New => match parse_s3_uri(physical_uri) {
            Ok((bucket, _)) => bucket != registry_bucket,
            // Staged inline content is already in-registry.
            Err(_) => false,
        },
    }
}

/// The immutable revision record stored at [`revision_key`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRevision {
    /// The canonical manifest.
    pub manifest: Manifest,
    /// Commit message, when one was given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Commit timestamp.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl StoredRevision {
    /// Serialize for the registry object body.
    pub fn to_bytes(&self) -> Result<Vec<u8>, QmcpError> {
        serde_json::to_vec(self)
            .map_err(|e| QmcpError::internal("revision record serialization failed").with_source(e))
    }

    /// Parse a registry object body.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, QmcpError> {
        serde_json::from_slice(bytes).map_err(|e| {
            QmcpError::new(
                qmcp_error::ErrorKind::UpstreamUnavailable,
                "revision record in the registry is corrupt",
            )
            .with_source(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qmcp_core::package::ManifestEntry;
    use serde_json::json;

    #[test]
    fn key_shapes() {
        assert_eq!(
            pointer_key("ns/pkg", "latest"),
            ".quilt/named_packages/ns/pkg/latest"
        );
        assert_eq!(revision_key("abc"), ".quilt/packages/abc");
        assert_eq!(data_key("ff"), ".quilt/data/ff");
    }

    #[test]
    fn pointer_key_roundtrip() {
        let key = pointer_key("ns/pkg", "v1");
        assert_eq!(
            parse_pointer_key(&key),
            Some(("ns/pkg".to_string(), "v1".to_string()))
        );
    }

    #[test]
    fn non_pointer_keys_rejected() {
        assert!(parse_pointer_key(".quilt/packages/abc").is_none());
        assert!(parse_pointer_key(".quilt/named_packages/flat").is_none());
        assert!(parse_pointer_key(".quilt/named_packages/noslash/tag").is_none());
    }

    #[test]
    fn copy_decision_per_mode() {
        assert!(!needs_copy(CopyMode::None, "s3://other/k", "reg"));
        assert!(needs_copy(CopyMode::All, "s3://reg/.quilt/data/x", "reg"));
        assert!(needs_copy(CopyMode::New, "s3://other/k", "reg"));
        assert!(!needs_copy(CopyMode::New, "s3://reg/k", "reg"));
    }

    #[test]
    fn stored_revision_roundtrip() {
        let manifest = Manifest::new(
            vec![ManifestEntry {
                logical_path: "a".into(),
                physical_uri: "s3://b/a".into(),
                size: 1,
                hash: "h".into(),
            }],
            json!({"k": "v"}),
        )
        .unwrap();
        let hash = manifest.top_hash();
        let stored = StoredRevision {
            manifest,
            message: Some("first".into()),
            timestamp: chrono::Utc::now(),
        };
        let bytes = stored.to_bytes().unwrap();
        let back = StoredRevision::from_bytes(&bytes).unwrap();
        assert_eq!(back.manifest.top_hash(), hash);
        assert_eq!(back.message.as_deref(), Some("first"));
    }

    #[test]
    fn corrupt_revision_record_reports_upstream() {
        let err = StoredRevision::from_bytes(b"not json").unwrap_err();
        assert_eq!(err.kind, qmcp_error::ErrorKind::UpstreamUnavailable);
    }

    #[test]
    fn content_hash_is_hex_sha256() {
        let h = content_hash(b"hello");
        assert_eq!(h.len(), 64);
        assert_eq!(h, content_hash(b"hello"));
        assert_ne!(h, content_hash(b"world"));
    }
}
