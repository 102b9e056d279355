//! Clusterer
//!
//! Groups related (but non-duplicate) studies for reviewer convenience
//! and later synthesis grouping. Strategies are independent and their
//! results are unioned into overlapping clusters, not partitions.
//! Output is informational only and never alters screening state.

use crate::normalize::{author_surname, title_similarity};
use revforge_common::db::models::{ClusterStrategy, StudyRecord};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// One candidate cluster of related study records
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterCandidate {
    pub strategy: ClusterStrategy,
    pub cohesion: f64,
    pub members: Vec<Uuid>,
}

/// Clustering thresholds. Topic similarity sits strictly below the
/// dedup threshold: pairs above it are merge candidates, not clusters.
#[derive(Debug, Clone, Copy)]
pub struct ClusterThresholds {
    pub topic_low: f64,
    pub topic_high: f64,
}

/// Run all clustering strategies over the unique records
pub fn cluster_records(
    records: &[StudyRecord],
    thresholds: ClusterThresholds,
) -> Vec<ClusterCandidate> {
    let mut clusters = author_overlap_clusters(records);
    clusters.extend(topic_clusters(records, thresholds));
    clusters.extend(citation_clusters(records));
    clusters
}

/// Union-find over record indices
struct Components {
    parent: Vec<usize>,
}

impl Components {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        if self.parent[i] != i {
            let root = self.find(self.parent[i]);
            self.parent[i] = root;
        }
        self.parent[i]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            // Lower root wins so component membership is deterministic
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }

    /// Components with at least two members, ordered by root index
    fn groups(&mut self, n: usize) -> Vec<Vec<usize>> {
        let mut by_root: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..n {
            let root = self.find(i);
            by_root.entry(root).or_default().push(i);
        }
        let mut roots: Vec<usize> = by_root.keys().copied().collect();
        roots.sort_unstable();
        roots
            .into_iter()
            .map(|r| by_root.remove(&r).unwrap_or_default())
            .filter(|g| g.len() >= 2)
            .collect()
    }
}

fn surname_sets(records: &[StudyRecord]) -> Vec<HashSet<String>> {
    records
        .iter()
        .map(|r| {
            r.author_list()
                .iter()
                .map(|a| author_surname(a))
                .filter(|s| !s.is_empty())
                .collect()
        })
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Records sharing at least one author surname form a candidate
/// cluster; cohesion is the mean pairwise Jaccard similarity of the
/// author sets.
pub fn author_overlap_clusters(records: &[StudyRecord]) -> Vec<ClusterCandidate> {
    let surnames = surname_sets(records);
    let mut components = Components::new(records.len());

    let mut by_surname: HashMap<&String, Vec<usize>> = HashMap::new();
    for (i, set) in surnames.iter().enumerate() {
        for surname in set {
            by_surname.entry(surname).or_default().push(i);
        }
    }
    for indices in by_surname.values() {
        for window in indices.windows(2) {
            components.union(window[0], window[1]);
        }
    }

    components
        .groups(records.len())
        .into_iter()
        .map(|group| {
            let cohesion = mean_pairwise(&group, |a, b| jaccard(&surnames[a], &surnames[b]));
            ClusterCandidate {
                strategy: ClusterStrategy::AuthorOverlap,
                cohesion,
                members: group.iter().map(|&i| records[i].id).collect(),
            }
        })
        .collect()
}

/// Records whose normalized title similarity falls inside the topic
/// band are clustered, not merged; cohesion is the mean pairwise
/// similarity inside the component.
pub fn topic_clusters(
    records: &[StudyRecord],
    thresholds: ClusterThresholds,
) -> Vec<ClusterCandidate> {
    let mut components = Components::new(records.len());
    let mut similarities: HashMap<(usize, usize), f64> = HashMap::new();

    for i in 0..records.len() {
        for j in (i + 1)..records.len() {
            let similarity = title_similarity(&records[i].title, &records[j].title);
            similarities.insert((i, j), similarity);
            if similarity >= thresholds.topic_low && similarity < thresholds.topic_high {
                components.union(i, j);
            }
        }
    }

    components
        .groups(records.len())
        .into_iter()
        .map(|group| {
            let cohesion = mean_pairwise(&group, |a, b| {
                let key = if a < b { (a, b) } else { (b, a) };
                similarities.get(&key).copied().unwrap_or(0.0)
            });
            ClusterCandidate {
                strategy: ClusterStrategy::TopicSimilarity,
                cohesion,
                members: group.iter().map(|&i| records[i].id).collect(),
            }
        })
        .collect()
}

/// In-memory citation graph over a task's records
///
/// Edges come from DOI reference lists carried in record metadata
/// (`metadata.references`); connected components become clusters.
struct CitationGraph {
    /// Adjacency list: record index -> cited record indices
    outgoing: HashMap<usize, Vec<usize>>,
    node_count: usize,
}

impl CitationGraph {
    fn build(records: &[StudyRecord]) -> Self {
        let doi_to_idx: HashMap<&str, usize> = records
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.doi.as_deref().map(|d| (d, i)))
            .collect();

        let mut outgoing: HashMap<usize, Vec<usize>> = HashMap::new();
        for (i, record) in records.iter().enumerate() {
            let references = record
                .metadata
                .get("references")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();

            for reference in references {
                if let Some(cited) = reference.as_str().and_then(|d| doi_to_idx.get(d)) {
                    if *cited != i {
                        outgoing.entry(i).or_default().push(*cited);
                    }
                }
            }
        }

        Self {
            outgoing,
            node_count: records.len(),
        }
    }

    fn components(&self) -> Vec<Vec<usize>> {
        let mut components = Components::new(self.node_count);
        for (&from, targets) in &self.outgoing {
            for &to in targets {
                components.union(from, to);
            }
        }
        components.groups(self.node_count)
    }
}

/// Connected components of the citation graph form clusters when
/// citation link data is available
pub fn citation_clusters(records: &[StudyRecord]) -> Vec<ClusterCandidate> {
    CitationGraph::build(records)
        .components()
        .into_iter()
        .map(|group| ClusterCandidate {
            strategy: ClusterStrategy::CitationNetwork,
            cohesion: 1.0,
            members: group.iter().map(|&i| records[i].id).collect(),
        })
        .collect()
}

fn mean_pairwise<F: Fn(usize, usize) -> f64>(group: &[usize], score: F) -> f64 {
    let mut total = 0.0;
    let mut pairs = 0;
    for (k, &a) in group.iter().enumerate() {
        for &b in &group[k + 1..] {
            total += score(a, b);
            pairs += 1;
        }
    }
    if pairs == 0 {
        0.0
    } else {
        total / pairs as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use serde_json::json;

    fn record(n: u128, title: &str, authors: &[&str], doi: Option<&str>) -> StudyRecord {
        let ts = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z").unwrap();
        StudyRecord {
            id: Uuid::from_u128(n),
            task_id: Uuid::from_u128(999),
            title: title.to_string(),
            authors: json!(authors),
            year: Some(2020),
            doi: doi.map(|d| d.to_string()),
            source: "test".to_string(),
            abstract_text: None,
            full_text_ref: None,
            content_hash: format!("hash-{}", n),
            metadata: json!({}),
            duplicate_of: None,
            ingested_at: ts,
            created_at: ts,
        }
    }

    const THRESHOLDS: ClusterThresholds = ClusterThresholds {
        topic_low: 0.5,
        topic_high: 0.9,
    };

    #[test]
    fn test_author_overlap_forms_cluster() {
        let records = vec![
            record(1, "Study one", &["Smith, J.", "Lee, K."], None),
            record(2, "Completely different topic", &["Lee, K."], None),
            record(3, "Unrelated authors", &["Patel, R."], None),
        ];

        let clusters = author_overlap_clusters(&records);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members.len(), 2);
        // Jaccard of {smith, lee} and {lee} = 1/2
        assert!((clusters[0].cohesion - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_no_singleton_clusters() {
        let records = vec![
            record(1, "Alpha", &["Smith, J."], None),
            record(2, "Beta", &["Lee, K."], None),
        ];

        assert!(cluster_records(&records, THRESHOLDS).is_empty());
    }

    #[test]
    fn test_topic_band_excludes_near_duplicates() {
        let records = vec![
            record(1, "Cognitive therapy for depression in adults", &["A, A."], None),
            // Similarity with record 1 is above the dedup band, so the
            // pair is a merge candidate, not a topic cluster
            record(2, "Cognitive therapy for depression in adult", &["B, B."], None),
        ];

        let clusters = topic_clusters(&records, THRESHOLDS);
        assert!(clusters.is_empty());
    }

    #[test]
    fn test_topic_cluster_within_band() {
        let records = vec![
            record(1, "Cognitive therapy for depression outcomes", &["A, A."], None),
            record(2, "Cognitive therapy for anxiety conditions", &["B, B."], None),
            record(3, "Chromosome segregation in yeast mitosis", &["C, C."], None),
        ];

        let clusters = topic_clusters(&records, THRESHOLDS);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members, vec![Uuid::from_u128(1), Uuid::from_u128(2)]);
        assert!(clusters[0].cohesion >= THRESHOLDS.topic_low);
        assert!(clusters[0].cohesion < THRESHOLDS.topic_high);
    }

    #[test]
    fn test_citation_components() {
        let mut a = record(1, "Alpha", &["A, A."], Some("10.1/a"));
        let b = record(2, "Beta", &["B, B."], Some("10.1/b"));
        let c = record(3, "Gamma", &["C, C."], Some("10.1/c"));
        a.metadata = json!({ "references": ["10.1/b"] });

        let clusters = citation_clusters(&[a, b, c]);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members, vec![Uuid::from_u128(1), Uuid::from_u128(2)]);
        assert_eq!(clusters[0].strategy, ClusterStrategy::CitationNetwork);
    }

    #[test]
    fn test_strategies_union_into_overlapping_clusters() {
        let mut a = record(1, "Statin therapy and cholesterol reduction", &["Smith, J."], Some("10.1/a"));
        let b = record(2, "Statin therapy and lipid profile changes", &["Smith, J."], Some("10.1/b"));
        a.metadata = json!({ "references": ["10.1/b"] });

        let clusters = cluster_records(&[a, b], THRESHOLDS);
        let strategies: Vec<_> = clusters.iter().map(|c| c.strategy).collect();
        assert!(strategies.contains(&ClusterStrategy::AuthorOverlap));
        assert!(strategies.contains(&ClusterStrategy::CitationNetwork));
    }
}
