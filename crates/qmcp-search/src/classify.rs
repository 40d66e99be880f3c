// SPDX-License-Identifier: MIT OR Apache-2.0
//! Rule-based query classification.
//!
//! Deterministic by construction: the rules are ordered, keyword-driven,
//! and free of any scoring.  The same text always lands in the same class.

use serde::{Deserialize, Serialize};

/// What kind of search a free-text query is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryClass {
    /// Plain relevance search.
    TextSearch,
    /// Restrict by file extension / name pattern.
    FileTypeFilter,
    /// Predicate over object or package metadata (size, date, key=value).
    MetadataPredicate,
    /// Aggregation-shaped; belongs in SQL, not a search index.
    Analytical,
}

const ANALYTICAL_KEYWORDS: &[&str] = &[
    "select ",
    "group by",
    "order by",
    "count(",
    "sum(",
    "avg(",
    "average",
    "aggregate",
    "how many",
];

const SIZE_OPERATORS: &[&str] = &["size>", "size<", "size>=", "size<=", "size:"];

const DATE_OPERATORS: &[&str] = &[
    "modified>",
    "modified<",
    "modified:",
    "before:",
    "after:",
    "since:",
];

/// Known data-file extensions that mark a file-type filter.
const FILE_EXTENSIONS: &[&str] = &[
    ".csv", ".tsv", ".parquet", ".json", ".jsonl", ".txt", ".md", ".fastq", ".bam", ".vcf",
    ".h5ad", ".zarr", ".png", ".tif",
];

/// Classify a query.  Rule order: analytical, then metadata predicates,
/// then file-type filters, then plain text.
pub fn classify(text: &str) -> QueryClass {
    let lowered = text.to_ascii_lowercase();

    if ANALYTICAL_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        return QueryClass::Analytical;
    }
    if SIZE_OPERATORS.iter().any(|op| lowered.contains(op))
        || DATE_OPERATORS.iter().any(|op| lowered.contains(op))
        || lowered.contains("metadata.")
    {
        return QueryClass::MetadataPredicate;
    }
    if lowered.starts_with("ext:")
        || lowered.contains("*.")
        || FILE_EXTENSIONS.iter().any(|ext| {
            lowered.ends_with(ext) || lowered.contains(&format!("{ext} "))
        })
    {
        return QueryClass::FileTypeFilter;
    }
    QueryClass::TextSearch
}

/// Extract the extension a file-type query filters on, when present.
pub fn file_type_of(text: &str) -> Option<String> {
    let lowered = text.to_ascii_lowercase();
    if let Some(rest) = lowered.strip_prefix("ext:") {
        let ext = rest.split_whitespace().next()?.trim_start_matches('.');
        return (!ext.is_empty()).then(|| format!(".{ext}"));
    }
    if let Some(pos) = lowered.find("*.") {
        let ext: String = lowered[pos + 1..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '.')
            .collect();
        return (ext.len() > 1).then_some(ext);
    }
    FILE_EXTENSIONS
        .iter()
        .find(|ext| lowered.contains(*ext))
        .map(|ext| ext.to_string())
}
