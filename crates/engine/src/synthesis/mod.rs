//! Evidence synthesizer
//!
//! Aggregates extracted outcome data across included studies. When at
//! least two studies report a comparable outcome (same outcome name and
//! effect measure, with effect and variance present), an
//! inverse-variance fixed-effect pooled estimate is computed together
//! with Cochran's Q and the I² heterogeneity statistic. A single study
//! never yields a pooled statistic; it gets a narrative-only marker.

use revforge_common::db::models::EvidenceRow;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pooled fixed-effect estimate for one outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PooledEffect {
    pub measure: String,
    pub effect: f64,
    pub variance: f64,
    pub ci_low: f64,
    pub ci_high: f64,
    /// Cochran's Q
    pub q: f64,
    /// I² in percent, clamped to [0, 100]
    pub i_squared: f64,
}

/// Synthesis result for one outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeSummary {
    /// Meta-analysis across ≥2 comparable studies
    Pooled(PooledEffect),
    /// Too few comparable studies; the outcome is summarized
    /// narratively downstream
    NarrativeOnly,
}

/// One synthesized outcome across studies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSynthesis {
    pub outcome_name: String,
    pub study_count: usize,
    pub total_sample_size: i64,
    pub summary: OutcomeSummary,
}

/// Group evidence rows by outcome (case-insensitive) and synthesize
/// each group. Stale rows must be filtered out by the caller.
pub fn synthesize(rows: &[EvidenceRow]) -> Vec<OutcomeSynthesis> {
    let mut by_outcome: BTreeMap<String, Vec<&EvidenceRow>> = BTreeMap::new();
    for row in rows {
        by_outcome
            .entry(row.outcome_name.to_lowercase())
            .or_default()
            .push(row);
    }

    by_outcome
        .into_iter()
        .map(|(outcome_name, group)| synthesize_outcome(outcome_name, &group))
        .collect()
}

fn synthesize_outcome(outcome_name: String, rows: &[&EvidenceRow]) -> OutcomeSynthesis {
    let total_sample_size = rows.iter().map(|r| r.sample_size as i64).sum();

    // Comparable rows share the dominant measure and carry both an
    // effect and a positive variance
    let mut by_measure: BTreeMap<&str, Vec<&EvidenceRow>> = BTreeMap::new();
    for row in rows {
        if let (Some(_), Some(v)) = (row.effect, row.variance) {
            if v > 0.0 {
                by_measure.entry(row.measure.as_str()).or_default().push(row);
            }
        }
    }

    let comparable = by_measure
        .into_values()
        .max_by_key(|group| group.len())
        .unwrap_or_default();

    let summary = if comparable.len() >= 2 {
        OutcomeSummary::Pooled(pool_fixed_effect(&comparable))
    } else {
        OutcomeSummary::NarrativeOnly
    };

    OutcomeSynthesis {
        outcome_name,
        study_count: rows.len(),
        total_sample_size,
        summary,
    }
}

/// Inverse-variance fixed-effect pooling with Cochran's Q and I²
fn pool_fixed_effect(rows: &[&EvidenceRow]) -> PooledEffect {
    let weights: Vec<f64> = rows.iter().map(|r| 1.0 / r.variance.unwrap_or(1.0)).collect();
    let effects: Vec<f64> = rows.iter().map(|r| r.effect.unwrap_or(0.0)).collect();

    let weight_sum: f64 = weights.iter().sum();
    let pooled: f64 = weights
        .iter()
        .zip(&effects)
        .map(|(w, e)| w * e)
        .sum::<f64>()
        / weight_sum;

    let variance = 1.0 / weight_sum;
    let se = variance.sqrt();

    let q: f64 = weights
        .iter()
        .zip(&effects)
        .map(|(w, e)| w * (e - pooled).powi(2))
        .sum();
    let df = (rows.len() - 1) as f64;
    let i_squared = if q > 0.0 {
        (((q - df) / q) * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    PooledEffect {
        measure: rows[0].measure.clone(),
        effect: pooled,
        variance,
        ci_low: pooled - 1.96 * se,
        ci_high: pooled + 1.96 * se,
        q,
        i_squared,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use serde_json::json;
    use uuid::Uuid;

    fn row(
        n: u128,
        outcome: &str,
        measure: &str,
        effect: Option<f64>,
        variance: Option<f64>,
        sample_size: i32,
    ) -> EvidenceRow {
        let ts = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z").unwrap();
        EvidenceRow {
            id: Uuid::from_u128(n),
            task_id: Uuid::from_u128(999),
            record_id: Uuid::from_u128(n),
            outcome_name: outcome.to_string(),
            measure: measure.to_string(),
            effect,
            variance,
            sample_size,
            groups: json!([{"label": "treatment", "n": sample_size / 2},
                           {"label": "control", "n": sample_size / 2}]),
            stale: false,
            created_at: ts,
        }
    }

    #[test]
    fn test_single_study_never_pooled() {
        let rows = vec![row(1, "pain score", "mean_difference", Some(0.4), Some(0.02), 120)];
        let synthesized = synthesize(&rows);

        assert_eq!(synthesized.len(), 1);
        assert_eq!(synthesized[0].study_count, 1);
        assert_eq!(synthesized[0].summary, OutcomeSummary::NarrativeOnly);
    }

    #[test]
    fn test_pooled_effect_hand_computed() {
        // Two studies, equal variance 0.04 (weight 25 each):
        // pooled = (0.5 + 0.7) / 2 = 0.6, variance = 1/50 = 0.02
        // Q = 25 * 0.01 + 25 * 0.01 = 0.5, df = 1 -> I² = 0
        let rows = vec![
            row(1, "Pain Score", "mean_difference", Some(0.5), Some(0.04), 100),
            row(2, "pain score", "mean_difference", Some(0.7), Some(0.04), 90),
        ];

        let synthesized = synthesize(&rows);
        assert_eq!(synthesized.len(), 1);
        assert_eq!(synthesized[0].study_count, 2);
        assert_eq!(synthesized[0].total_sample_size, 190);

        match &synthesized[0].summary {
            OutcomeSummary::Pooled(pooled) => {
                assert!((pooled.effect - 0.6).abs() < 1e-9);
                assert!((pooled.variance - 0.02).abs() < 1e-9);
                assert!((pooled.q - 0.5).abs() < 1e-9);
                assert_eq!(pooled.i_squared, 0.0);
                assert!((pooled.ci_low - (0.6 - 1.96 * 0.02_f64.sqrt())).abs() < 1e-9);
            }
            other => panic!("expected pooled effect, got {:?}", other),
        }
    }

    #[test]
    fn test_heterogeneity_detected() {
        // Divergent effects with small variances: Q = 32, df = 1,
        // I² = 96.875
        let rows = vec![
            row(1, "relapse", "odds_ratio", Some(0.2), Some(0.01), 80),
            row(2, "relapse", "odds_ratio", Some(1.0), Some(0.01), 85),
        ];

        let synthesized = synthesize(&rows);
        match &synthesized[0].summary {
            OutcomeSummary::Pooled(pooled) => {
                assert!((pooled.effect - 0.6).abs() < 1e-9);
                assert!((pooled.q - 32.0).abs() < 1e-9);
                assert!((pooled.i_squared - 96.875).abs() < 1e-6);
            }
            other => panic!("expected pooled effect, got {:?}", other),
        }
    }

    #[test]
    fn test_incompatible_measures_fall_back_to_narrative() {
        let rows = vec![
            row(1, "mortality", "odds_ratio", Some(0.8), Some(0.05), 200),
            row(2, "mortality", "hazard_ratio", Some(0.7), Some(0.03), 150),
        ];

        let synthesized = synthesize(&rows);
        assert_eq!(synthesized[0].summary, OutcomeSummary::NarrativeOnly);
        assert_eq!(synthesized[0].study_count, 2);
    }

    #[test]
    fn test_rows_without_variance_are_not_pooled() {
        let rows = vec![
            row(1, "adherence", "mean_difference", Some(0.3), None, 60),
            row(2, "adherence", "mean_difference", Some(0.5), None, 70),
        ];

        let synthesized = synthesize(&rows);
        assert_eq!(synthesized[0].summary, OutcomeSummary::NarrativeOnly);
    }

    #[test]
    fn test_outcomes_grouped_case_insensitively() {
        let rows = vec![
            row(1, "Quality of Life", "smd", Some(0.2), Some(0.02), 50),
            row(2, "quality of life", "smd", Some(0.3), Some(0.02), 55),
            row(3, "mortality", "odds_ratio", Some(0.9), Some(0.04), 120),
        ];

        let synthesized = synthesize(&rows);
        assert_eq!(synthesized.len(), 2);
        let qol = synthesized
            .iter()
            .find(|s| s.outcome_name == "quality of life")
            .unwrap();
        assert!(matches!(qol.summary, OutcomeSummary::Pooled(_)));
    }
}
