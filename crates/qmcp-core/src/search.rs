// SPDX-License-Identifier: MIT OR Apache-2.0
//! Search queries, hits, and bucket-filter normalization.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// Where a search looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    /// Objects and packages within specific buckets.
    Bucket,
    /// Package manifests and their entries.
    Package,
    /// Everything the caller may see.
    #[default]
    Global,
}

/// What kind of hits the caller wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    /// Package hits only.
    Packages,
    /// Object hits only.
    Objects,
    /// Both kinds, merged and ranked.
    #[default]
    Both,
}

/// A normalized search request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Free-text query.  May be empty or `"*"` for a listing.
    pub text: String,
    /// Scope of the search.
    #[serde(default)]
    pub scope: SearchScope,
    /// Normalized bucket restriction; empty means unrestricted.
    #[serde(default)]
    pub buckets: Vec<String>,
    /// Kinds of hits wanted.
    #[serde(default)]
    pub result_type: ResultType,
    /// Maximum hits to return.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// Normalize the caller-facing `bucket` (singular) and `buckets` (list)
/// arguments into one list: trimmed, `s3://`-stripped, deduplicated,
/// original order preserved.
///
/// `bucket = "X"` and `buckets = ["X"]` produce the identical filter — the
/// backends must never see the two forms differently.
pub fn normalize_bucket_filter(
    bucket: Option<&str>,
    buckets: Option<&[String]>,
) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |raw: &str| {
        let name = raw.trim().trim_start_matches("s3://").trim_end_matches('/');
        if !name.is_empty() && !out.iter().any(|b| b == name) {
            out.push(name.to_string());
        }
    };
    if let Some(b) = bucket {
        push(b);
    }
    if let Some(list) = buckets {
        for b in list {
            push(b);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Hits
// ---------------------------------------------------------------------------

/// Which backend produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchBackend {
    /// The catalog-fronted Elasticsearch index.
    Elasticsearch,
    /// The catalog GraphQL search.
    Graphql,
    /// Plain S3 listing.
    S3,
    /// Athena (analytical queries only).
    Athena,
}

impl SearchBackend {
    /// Fixed cross-backend ranking weight applied to normalized scores.
    pub fn weight(&self) -> f64 {
        match self {
            Self::Elasticsearch => 1.0,
            Self::Graphql => 0.9,
            Self::S3 => 0.6,
            Self::Athena => 1.0,
        }
    }
}

impl fmt::Display for SearchBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Elasticsearch => "elasticsearch",
            Self::Graphql => "graphql",
            Self::S3 => "s3",
            Self::Athena => "athena",
        })
    }
}

/// A matched S3 object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectHit {
    /// Bucket the object lives in.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Version id, when the hit is version-specific.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    /// Object size, when the backend reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Last-modified timestamp, when the backend reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<chrono::DateTime<chrono::Utc>>,
}

impl ObjectHit {
    /// Physical URI of the object.
    pub fn physical_uri(&self) -> String {
        match &self.version_id {
            Some(v) => format!("s3://{}/{}?versionId={v}", self.bucket, self.key),
            None => format!("s3://{}/{}", self.bucket, self.key),
        }
    }
}

/// A matched package revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageHit {
    /// Bucket (registry) the package lives in.
    pub bucket: String,
    /// Package name.
    pub name: String,
    /// Revision hash, when the backend reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_hash: Option<String>,
    /// Up to 100 entries that matched, for package-scope collapses.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_entries: Vec<ObjectHit>,
}

/// Cap on `matched_entries` per package hit.
pub const MAX_MATCHED_ENTRIES: usize = 100;

/// A single ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchHit {
    /// A package revision matched.
    Package {
        /// The hit payload.
        #[serde(flatten)]
        hit: PackageHit,
        /// Normalized, weighted score in `[0, 1]`.
        score: f64,
        /// Which backend produced the hit.
        backend: SearchBackend,
    },
    /// An object matched.
    Object {
        /// The hit payload.
        #[serde(flatten)]
        hit: ObjectHit,
        /// Normalized, weighted score in `[0, 1]`.
        score: f64,
        /// Which backend produced the hit.
        backend: SearchBackend,
    },
}

impl SearchHit {
    /// The hit's ranking score.
    pub fn score(&self) -> f64 {
        match self {
            Self::Package { score, .. } | Self::Object { score, .. } => *score,
        }
    }

    /// Overwrite the ranking score.
    pub fn set_score(&mut self, value: f64) {
        match self {
            Self::Package { score, .. } | Self::Object { score, .. } => *score = value,
        }
    }

    /// Identity used for cross-backend de-duplication: duplicates collapse
    /// to the highest-scoring instance.
    pub fn identity(&self) -> String {
        match self {
            Self::Package { hit, .. } => format!(
                "package:{}:{}:{}",
                hit.bucket,
                hit.name,
                hit.top_hash.as_deref().unwrap_or("latest")
            ),
            Self::Object { hit, .. } => format!("object:{}", hit.physical_uri()),
        }
    }
}
