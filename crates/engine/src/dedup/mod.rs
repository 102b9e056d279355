//! Deduplicator
//!
//! Collapses near-identical study records into unique entries with
//! confidence-scored match decisions. Pure and deterministic over its
//! input set: re-running on the same records yields identical matches
//! and the same canonical survivors.
//!
//! Strategy ladder, highest confidence first, short-circuiting once a
//! record is matched:
//! 1. exact DOI (confidence 1.0)
//! 2. exact content hash (confidence 1.0)
//! 3. fuzzy title above the configured threshold, same year, at least
//!    one shared author surname (confidence = similarity, capped 0.95)

use crate::normalize::{author_surname, title_similarity};
use revforge_common::config::DedupConfig;
use revforge_common::db::models::{MatchStrategy, StudyRecord};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// One detected duplicate pair, pointed at the set's canonical survivor
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub record_id: Uuid,
    pub canonical_id: Uuid,
    pub strategy: MatchStrategy,
    pub confidence: f64,
    /// Below the auto-merge confidence the pair is routed to human
    /// review instead of merged
    pub auto_merge: bool,
}

/// Deduplication output over one task's record set
#[derive(Debug, Clone)]
pub struct DeduplicationResult {
    /// Canonical survivors, in deterministic input order
    pub unique: Vec<StudyRecord>,
    pub matches: Vec<MatchCandidate>,
    pub duplicates_removed: usize,
}

/// How a record matched an earlier one, before survivor selection
#[derive(Debug, Clone, Copy)]
struct RawMatch {
    earlier_idx: usize,
    strategy: MatchStrategy,
    confidence: f64,
}

/// Deduplicate a task's records. Input order does not matter; records
/// are sorted by (ingested_at, id) internally for determinism.
pub fn deduplicate(records: &[StudyRecord], config: &DedupConfig) -> DeduplicationResult {
    let mut ordered: Vec<&StudyRecord> = records.iter().collect();
    ordered.sort_by(|a, b| {
        a.ingested_at
            .cmp(&b.ingested_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    let surnames: Vec<HashSet<String>> = ordered
        .iter()
        .map(|r| {
            r.author_list()
                .iter()
                .map(|a| author_surname(a))
                .filter(|s| !s.is_empty())
                .collect()
        })
        .collect();

    let mut doi_index: HashMap<String, usize> = HashMap::new();
    let mut hash_index: HashMap<String, usize> = HashMap::new();

    // merged_into[i] = index of the earlier record i was merged with
    let mut merged_into: Vec<Option<RawMatch>> = vec![None; ordered.len()];
    // review matches do not merge; the record stays canonical
    let mut review_matches: Vec<(usize, RawMatch)> = Vec::new();

    for i in 0..ordered.len() {
        let record = ordered[i];

        let found = match_doi(record, &doi_index)
            .or_else(|| match_content_hash(record, &hash_index))
            .or_else(|| match_fuzzy_title(i, &ordered, &surnames, &merged_into, config));

        if let Some(raw) = found {
            if raw.confidence >= config.auto_merge_confidence {
                merged_into[i] = Some(raw);
            } else {
                review_matches.push((i, raw));
            }
        }

        // Unmerged records index their DOI and hash for later strategies
        if merged_into[i].is_none() {
            if let Some(ref doi) = record.doi {
                doi_index.entry(doi.clone()).or_insert(i);
            }
            hash_index.entry(record.content_hash.clone()).or_insert(i);
        }
    }

    // Collapse merge chains into duplicate sets keyed by root index
    let mut sets: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..ordered.len() {
        let root = find_root(i, &merged_into);
        sets.entry(root).or_default().push(i);
    }

    let mut matches = Vec::new();
    let mut duplicates_removed = 0;
    let mut survivor_of: HashMap<usize, usize> = HashMap::new();

    let mut roots: Vec<usize> = sets.keys().copied().collect();
    roots.sort_unstable();

    for root in roots {
        let members = &sets[&root];
        let survivor = select_survivor(members, &ordered);
        for &member in members {
            survivor_of.insert(member, survivor);
            if member == survivor {
                continue;
            }
            duplicates_removed += 1;
            // Report each duplicate against the surviving record. The
            // set root carries no detection of its own; when it loses
            // survivor selection, the pair is attributed to the match
            // that linked the survivor into the set.
            let raw = merged_into[member]
                .or(merged_into[survivor])
                .expect("a duplicate set with two members carries at least one match");
            matches.push(MatchCandidate {
                record_id: ordered[member].id,
                canonical_id: ordered[survivor].id,
                strategy: raw.strategy,
                confidence: raw.confidence,
                auto_merge: true,
            });
        }
    }

    for (i, raw) in review_matches {
        let canonical = survivor_of.get(&raw.earlier_idx).copied().unwrap_or(raw.earlier_idx);
        matches.push(MatchCandidate {
            record_id: ordered[i].id,
            canonical_id: ordered[canonical].id,
            strategy: raw.strategy,
            confidence: raw.confidence,
            auto_merge: false,
        });
    }

    let unique: Vec<StudyRecord> = (0..ordered.len())
        .filter(|&i| survivor_of.get(&i) == Some(&i))
        .map(|i| ordered[i].clone())
        .collect();

    DeduplicationResult {
        unique,
        matches,
        duplicates_removed,
    }
}

fn match_doi(record: &StudyRecord, doi_index: &HashMap<String, usize>) -> Option<RawMatch> {
    let doi = record.doi.as_ref()?;
    doi_index.get(doi).map(|&earlier_idx| RawMatch {
        earlier_idx,
        strategy: MatchStrategy::Doi,
        confidence: 1.0,
    })
}

fn match_content_hash(
    record: &StudyRecord,
    hash_index: &HashMap<String, usize>,
) -> Option<RawMatch> {
    hash_index
        .get(&record.content_hash)
        .map(|&earlier_idx| RawMatch {
            earlier_idx,
            strategy: MatchStrategy::ContentHash,
            confidence: 1.0,
        })
}

/// Fuzzy title match: similarity above the threshold, same publication
/// year, and at least one shared author surname. The best similarity
/// wins; ties break toward the earliest record.
fn match_fuzzy_title(
    i: usize,
    ordered: &[&StudyRecord],
    surnames: &[HashSet<String>],
    merged_into: &[Option<RawMatch>],
    config: &DedupConfig,
) -> Option<RawMatch> {
    let record = ordered[i];
    record.year?;

    let mut best: Option<(usize, f64)> = None;

    for j in 0..i {
        if merged_into[j].is_some() {
            continue;
        }
        let other = ordered[j];
        if other.year != record.year {
            continue;
        }
        if surnames[i].is_disjoint(&surnames[j]) {
            continue;
        }

        let similarity = title_similarity(&record.title, &other.title);
        if similarity < config.fuzzy_threshold {
            continue;
        }

        let better = match best {
            Some((_, best_sim)) => similarity > best_sim,
            None => true,
        };
        if better {
            best = Some((j, similarity));
        }
    }

    best.map(|(earlier_idx, similarity)| RawMatch {
        earlier_idx,
        strategy: MatchStrategy::FuzzyTitle,
        confidence: similarity.min(0.95),
    })
}

fn find_root(mut i: usize, merged_into: &[Option<RawMatch>]) -> usize {
    while let Some(raw) = merged_into[i] {
        i = raw.earlier_idx;
    }
    i
}

/// Survivor selection: most complete metadata first (abstract, DOI,
/// full-text reference, in that priority), then earliest ingestion,
/// then smallest id.
fn select_survivor(members: &[usize], ordered: &[&StudyRecord]) -> usize {
    members
        .iter()
        .copied()
        .min_by_key(|&i| {
            let r = ordered[i];
            (
                std::cmp::Reverse(r.abstract_text.is_some()),
                std::cmp::Reverse(r.doi.is_some()),
                std::cmp::Reverse(r.full_text_ref.is_some()),
                r.ingested_at,
                r.id,
            )
        })
        .expect("duplicate sets are never empty")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, FixedOffset};
    use serde_json::json;

    fn ts(minute: u32) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(&format!("2026-03-01T10:{:02}:00Z", minute)).unwrap()
    }

    fn record(
        n: u128,
        title: &str,
        authors: &[&str],
        year: Option<i32>,
        doi: Option<&str>,
        minute: u32,
    ) -> StudyRecord {
        StudyRecord {
            id: Uuid::from_u128(n),
            task_id: Uuid::from_u128(999),
            title: title.to_string(),
            authors: json!(authors),
            year,
            doi: doi.map(|d| d.to_string()),
            source: "test".to_string(),
            abstract_text: None,
            full_text_ref: None,
            content_hash: crate::normalize::content_hash(
                title,
                &authors.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
                year,
            ),
            metadata: json!({}),
            duplicate_of: None,
            ingested_at: ts(minute),
            created_at: ts(minute),
        }
    }

    #[test]
    fn test_identical_doi_from_two_sources() {
        let a = record(1, "Effects of X on Y", &["Smith, J."], Some(2020), Some("10.1/abc"), 0);
        let mut b = record(2, "The effects of X on Y.", &["Smith, Jane"], Some(2020), Some("10.1/abc"), 1);
        b.source = "scopus".to_string();

        let result = deduplicate(&[a, b], &DedupConfig::default());

        assert_eq!(result.duplicates_removed, 1);
        assert_eq!(result.unique.len(), 1);
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].strategy, MatchStrategy::Doi);
        assert_eq!(result.matches[0].confidence, 1.0);
    }

    #[test]
    fn test_content_hash_match_without_doi() {
        let a = record(1, "Effects of X: a trial", &["Smith, J."], Some(2020), None, 0);
        let b = record(2, "EFFECTS OF X — A TRIAL", &["Jane Smith"], Some(2020), None, 1);

        let result = deduplicate(&[a, b], &DedupConfig::default());

        assert_eq!(result.duplicates_removed, 1);
        assert_eq!(result.matches[0].strategy, MatchStrategy::ContentHash);
        assert_eq!(result.matches[0].confidence, 1.0);
    }

    #[test]
    fn test_fuzzy_match_needs_shared_author_and_year() {
        let a = record(
            1,
            "Mindfulness interventions for chronic pain management",
            &["Garcia, M."],
            Some(2019),
            None,
            0,
        );
        // Same near-identical title, different author set: no match
        let b = record(
            2,
            "Mindfulness interventions for chronic pain managment",
            &["Nguyen, T."],
            Some(2019),
            None,
            1,
        );
        // Shared author, near-identical title: fuzzy match
        let c = record(
            3,
            "Mindfulness interventions for chronic pain managment",
            &["Garcia, Maria", "Lee, K."],
            Some(2019),
            None,
            2,
        );

        let result = deduplicate(&[a, b, c], &DedupConfig::default());

        let fuzzy: Vec<_> = result
            .matches
            .iter()
            .filter(|m| m.strategy == MatchStrategy::FuzzyTitle)
            .collect();
        assert_eq!(fuzzy.len(), 1);
        assert_eq!(fuzzy[0].record_id, Uuid::from_u128(3));
        assert_eq!(fuzzy[0].canonical_id, Uuid::from_u128(1));
        assert!(fuzzy[0].confidence <= 0.95);
        assert!(result.unique.iter().any(|r| r.id == Uuid::from_u128(2)));
    }

    #[test]
    fn test_below_auto_merge_confidence_is_routed_to_review() {
        let config = DedupConfig {
            fuzzy_threshold: 0.80,
            auto_merge_confidence: 0.95,
        };
        let a = record(
            1,
            "Exercise therapy in adults with low back pain",
            &["Brown, A."],
            Some(2021),
            None,
            0,
        );
        let b = record(
            2,
            "Exercise therapy in older adults with low back pain",
            &["Brown, Alice"],
            Some(2021),
            None,
            1,
        );

        let result = deduplicate(&[a, b], &config);

        // Both stay canonical; the pair is flagged for human review
        assert_eq!(result.duplicates_removed, 0);
        assert_eq!(result.unique.len(), 2);
        assert_eq!(result.matches.len(), 1);
        assert!(!result.matches[0].auto_merge);
        assert!(result.matches[0].confidence < 0.95);
    }

    #[test]
    fn test_survivor_has_most_complete_metadata() {
        // Later record carries an abstract, so it survives despite
        // arriving second
        let a = record(1, "Trial of Z", &["Khan, R."], Some(2018), Some("10.2/z"), 0);
        let mut b = record(2, "Trial of Z", &["Khan, R."], Some(2018), Some("10.2/z"), 1);
        b.abstract_text = Some("Background: ...".to_string());

        let result = deduplicate(&[a, b], &DedupConfig::default());

        assert_eq!(result.unique.len(), 1);
        assert_eq!(result.unique[0].id, Uuid::from_u128(2));
        assert_eq!(result.matches[0].canonical_id, Uuid::from_u128(2));
        assert_eq!(result.matches[0].record_id, Uuid::from_u128(1));
    }

    #[test]
    fn test_completeness_tie_breaks_to_earliest_ingested() {
        let a = record(7, "Trial of W", &["Diaz, P."], Some(2017), Some("10.3/w"), 5);
        let b = record(3, "Trial of W", &["Diaz, P."], Some(2017), Some("10.3/w"), 2);

        let result = deduplicate(&[a, b], &DedupConfig::default());

        assert_eq!(result.unique[0].id, Uuid::from_u128(3));
    }

    #[test]
    fn test_deterministic_and_idempotent() {
        let records: Vec<StudyRecord> = vec![
            record(1, "Alpha study of drug A", &["Smith, J."], Some(2020), Some("10.1/a"), 0),
            record(2, "Alpha study of drug A", &["Smith, J."], Some(2020), Some("10.1/a"), 1),
            record(3, "Beta study of drug B", &["Jones, K."], Some(2021), None, 2),
            record(4, "Beta study of drug B!", &["Jones, K."], Some(2021), None, 3),
            record(5, "Gamma review of drug C", &["Wu, L."], Some(2022), None, 4),
        ];

        let first = deduplicate(&records, &DedupConfig::default());
        let second = deduplicate(&records, &DedupConfig::default());

        let ids = |r: &DeduplicationResult| {
            (
                r.unique.iter().map(|u| u.id).collect::<Vec<_>>(),
                r.matches.clone(),
                r.duplicates_removed,
            )
        };
        assert_eq!(ids(&first), ids(&second));

        // Shuffled input produces the same canonical set
        let mut reversed = records.clone();
        reversed.reverse();
        let third = deduplicate(&reversed, &DedupConfig::default());
        assert_eq!(ids(&first).0, ids(&third).0);
    }

    #[test]
    fn test_transitive_chain_collapses_to_one_survivor() {
        // b matches a by DOI; c matches b by content hash
        let a = record(1, "Delta trial", &["Olsen, B."], Some(2019), Some("10.4/d"), 0);
        let mut b = record(2, "The Delta trial", &["Olsen, B."], Some(2019), Some("10.4/d"), 1);
        b.content_hash = "shared-hash".to_string();
        let mut c = record(3, "The Delta trial", &["Olsen, B."], Some(2019), None, 2);
        c.content_hash = "shared-hash".to_string();

        let result = deduplicate(&[a, b, c], &DedupConfig::default());

        assert_eq!(result.unique.len(), 1);
        assert_eq!(result.duplicates_removed, 2);
        for m in &result.matches {
            assert_eq!(m.canonical_id, result.unique[0].id);
        }
    }
}
