// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ranked merge: score normalization, fixed backend weights,
//! de-duplication, and the package-scope collapse.

use qmcp_core::search::{MAX_MATCHED_ENTRIES, ObjectHit, PackageHit, SearchBackend, SearchHit};
use std::collections::BTreeMap;

/// Boost applied to manifest (package) matches during a package-scope
/// collapse.
pub const MANIFEST_BOOST: f64 = 2.0;

/// Normalize one backend's native scores to `[0, 1]` and apply its fixed
/// cross-backend weight.
pub fn normalize_and_weight(hits: &mut [SearchHit], backend: SearchBackend) {
    let max = hits
        .iter()
        .map(SearchHit::score)
        .fold(0.0_f64, f64::max);
    for hit in hits.iter_mut() {
        let normalized = if max > 0.0 { hit.score() / max } else { 0.0 };
        hit.set_score(normalized * backend.weight());
    }
}

/// Collapse duplicates (same identity) to the highest-scoring instance and
/// sort descending by score.
pub fn dedup_and_rank(hits: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    let mut best: BTreeMap<String, SearchHit> = BTreeMap::new();
    for hit in hits {
        let key = hit.identity();
        match best.get(&key) {
            Some(existing) if existing.score() >= hit.score() => {}
            _ => {
                best.insert(key, hit);
            }
        }
    }
    let mut ranked: Vec<SearchHit> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        b.score()
            .partial_cmp(&a.score())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.identity().cmp(&b.identity()))
    });
    ranked.truncate(limit);
    ranked
}

/// Package-scope collapse: entry hits fold into their parent package —
/// at most one `PackageHit` per package, carrying up to 100 matched
/// entries.  Manifest matches are boosted by [`MANIFEST_BOOST`].
///
/// `entry_parent` names the owning package for an object hit, when the
/// backend reports one; entries without a parent are dropped from a
/// package-scoped result.
pub fn collapse_into_packages(
    manifest_hits: Vec<SearchHit>,
    entry_hits: Vec<(Option<(String, String)>, ObjectHit, f64)>,
) -> Vec<SearchHit> {
    struct Collapsed {
        hit: PackageHit,
        score: f64,
        backend: SearchBackend,
    }
    let mut packages: BTreeMap<(String, String), Collapsed> = BTreeMap::new();

    for hit in manifest_hits {
        if let SearchHit::Package {
            hit,
            score,
            backend,
        } = hit
        {
            let key = (hit.bucket.clone(), hit.name.clone());
            let boosted = score * MANIFEST_BOOST;
            match packages.get_mut(&key) {
                Some(existing) => existing.score = existing.score.max(boosted),
                None => {
                    packages.insert(
                        key,
                        Collapsed {
                            hit,
                            score: boosted,
                            backend,
                        },
                    );
                }
            }
        }
    }

    for (parent, object, score) in entry_hits {
        let Some((bucket, name)) = parent else {
            continue;
        };
        let entry = packages
            .entry((bucket.clone(), name.clone()))
            .or_insert_with(|| Collapsed {
                hit: PackageHit {
                    bucket,
                    name,
                    top_hash: None,
                    matched_entries: vec![],
                },
                score: 0.0,
                backend: SearchBackend::Elasticsearch,
            });
        if entry.hit.matched_entries.len() < MAX_MATCHED_ENTRIES {
            entry.hit.matched_entries.push(object);
        }
        entry.score = entry.score.max(score);
    }

    packages
        .into_values()
        .map(|c| SearchHit::Package {
            hit: c.hit,
            score: c.score,
            backend: c.backend,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(bucket: &str, key: &str) -> ObjectHit {
        ObjectHit {
            bucket: bucket.into(),
            key: key.into(),
            version_id: None,
            size: None,
            modified: None,
        }
    }

    fn object_hit(bucket: &str, key: &str, score: f64, backend: SearchBackend) -> SearchHit {
        SearchHit::Object {
            hit: object(bucket, key),
            score,
            backend,
        }
    }

    fn package_hit(bucket: &str, name: &str, score: f64, backend: SearchBackend) -> SearchHit {
        SearchHit::Package {
            hit: PackageHit {
                bucket: bucket.into(),
                name: name.into(),
                top_hash: None,
                matched_entries: vec![],
            },
            score,
            backend,
        }
    }

    // -- Normalization ----------------------------------------------------

    #[test]
    fn scores_normalize_to_unit_range_with_backend_weight() {
        let mut hits = vec![
            object_hit("b", "a", 8.0, SearchBackend::Graphql),
            object_hit("b", "c", 4.0, SearchBackend::Graphql),
        ];
        normalize_and_weight(&mut hits, SearchBackend::Graphql);
        assert!((hits[0].score() - 0.9).abs() < 1e-9);
        assert!((hits[1].score() - 0.45).abs() < 1e-9);
    }

    #[test]
    fn zero_scores_stay_zero() {
        let mut hits = vec![object_hit("b", "a", 0.0, SearchBackend::S3)];
        normalize_and_weight(&mut hits, SearchBackend::S3);
        assert_eq!(hits[0].score(), 0.0);
    }

    // -- Dedup -------------------------------------------------------------

    #[test]
    fn duplicates_collapse_to_highest_score() {
        let hits = vec![
            object_hit("b", "k", 0.6, SearchBackend::S3),
            object_hit("b", "k", 1.0, SearchBackend::Elasticsearch),
        ];
        let ranked = dedup_and_rank(hits, 10);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].score(), 1.0);
        assert!(matches!(
            ranked[0],
            SearchHit::Object {
                backend: SearchBackend::Elasticsearch,
                ..
            }
        ));
    }

    #[test]
    fn ranking_is_descending_and_bounded() {
        let hits = vec![
            object_hit("b", "low", 0.2, SearchBackend::S3),
            object_hit("b", "high", 0.9, SearchBackend::Elasticsearch),
            object_hit("b", "mid", 0.5, SearchBackend::Graphql),
        ];
        let ranked = dedup_and_rank(hits, 2);
        assert_eq!(ranked.len(), 2);
        assert!(ranked[0].score() >= ranked[1].score());
    }

    // -- Package collapse ----------------------------------------------------

    #[test]
    fn manifest_matches_get_boosted() {
        let collapsed = collapse_into_packages(
            vec![package_hit("b", "ns/p", 0.5, SearchBackend::Elasticsearch)],
            vec![],
        );
        assert_eq!(collapsed.len(), 1);
        assert!((collapsed[0].score() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn entries_fold_into_one_package_hit() {
        let collapsed = collapse_into_packages(
            vec![],
            vec![
                (
                    Some(("b".into(), "ns/p".into())),
                    object("b", "a.csv"),
                    0.7,
                ),
                (
                    Some(("b".into(), "ns/p".into())),
                    object("b", "b.csv"),
                    0.4,
                ),
            ],
        );
        assert_eq!(collapsed.len(), 1);
        match &collapsed[0] {
            SearchHit::Package { hit, score, .. } => {
                assert_eq!(hit.matched_entries.len(), 2);
                assert!((score - 0.7).abs() < 1e-9);
            }
            other => panic!("expected package, got {other:?}"),
        }
    }

    #[test]
    fn matched_entries_cap_at_one_hundred() {
        let entries: Vec<_> = (0..150)
            .map(|i| {
                (
                    Some(("b".to_string(), "ns/p".to_string())),
                    object("b", &format!("k{i}")),
                    0.5,
                )
            })
            .collect();
        let collapsed = collapse_into_packages(vec![], entries);
        match &collapsed[0] {
            SearchHit::Package { hit, .. } => {
                assert_eq!(hit.matched_entries.len(), MAX_MATCHED_ENTRIES);
            }
            other => panic!("expected package, got {other:?}"),
        }
    }

    #[test]
    fn orphan_entries_are_dropped() {
        let collapsed = collapse_into_packages(vec![], vec![(None, object("b", "k"), 0.9)]);
        assert!(collapsed.is_empty());
    }
}
