//! Research plan validation
//!
//! The entry guard for `protocol_validation`: a plan must describe a
//! population/intervention/outcome (or its SPIDER equivalent) and carry
//! at least one inclusion and one exclusion criterion, or the task
//! never starts.

use revforge_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};

/// A research plan in PICO or SPIDER form
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchPlan {
    // PICO
    pub population: Option<String>,
    pub intervention: Option<String>,
    pub comparison: Option<String>,
    pub outcome: Option<String>,

    // SPIDER equivalents
    pub sample: Option<String>,
    pub phenomenon_of_interest: Option<String>,
    pub design: Option<String>,
    pub evaluation: Option<String>,
    pub research_type: Option<String>,

    #[serde(default)]
    pub inclusion_criteria: Vec<String>,

    #[serde(default)]
    pub exclusion_criteria: Vec<String>,

    /// Explicit search query; derived from the plan fields when absent
    pub search_query: Option<String>,
}

fn present(field: &Option<String>) -> bool {
    field.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false)
}

impl ResearchPlan {
    /// Validate the plan against the protocol entry guard
    pub fn validate(&self) -> Result<()> {
        if !present(&self.population) && !present(&self.sample) {
            return Err(AppError::InvalidResearchPlan {
                message: "missing population (or SPIDER sample) description".to_string(),
            });
        }
        if !present(&self.intervention) && !present(&self.phenomenon_of_interest) {
            return Err(AppError::InvalidResearchPlan {
                message: "missing intervention (or phenomenon of interest) description"
                    .to_string(),
            });
        }
        if !present(&self.outcome) && !present(&self.evaluation) {
            return Err(AppError::InvalidResearchPlan {
                message: "missing outcome (or SPIDER evaluation) description".to_string(),
            });
        }
        if self.inclusion_criteria.iter().all(|c| c.trim().is_empty()) {
            return Err(AppError::InvalidResearchPlan {
                message: "at least one inclusion criterion is required".to_string(),
            });
        }
        if self.exclusion_criteria.iter().all(|c| c.trim().is_empty()) {
            return Err(AppError::InvalidResearchPlan {
                message: "at least one exclusion criterion is required".to_string(),
            });
        }
        Ok(())
    }

    /// The search query sent to every source: the explicit query when
    /// given, otherwise the plan's descriptive fields joined
    pub fn query(&self) -> String {
        if let Some(ref q) = self.search_query {
            if !q.trim().is_empty() {
                return q.clone();
            }
        }

        [
            &self.population,
            &self.sample,
            &self.intervention,
            &self.phenomenon_of_interest,
            &self.outcome,
            &self.evaluation,
        ]
        .iter()
        .filter_map(|f| f.as_deref())
        .filter(|s| !s.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ")
    }

    /// Criteria handed to the automated classifier, inclusion first
    pub fn criteria(&self) -> Vec<String> {
        self.inclusion_criteria
            .iter()
            .map(|c| format!("INCLUDE: {}", c))
            .chain(
                self.exclusion_criteria
                    .iter()
                    .map(|c| format!("EXCLUDE: {}", c)),
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pico_plan() -> ResearchPlan {
        ResearchPlan {
            population: Some("adults with chronic low back pain".to_string()),
            intervention: Some("exercise therapy".to_string()),
            comparison: Some("usual care".to_string()),
            outcome: Some("pain intensity".to_string()),
            inclusion_criteria: vec!["randomized controlled trials".to_string()],
            exclusion_criteria: vec!["animal studies".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_pico_plan() {
        assert!(pico_plan().validate().is_ok());
    }

    #[test]
    fn test_valid_spider_plan() {
        let plan = ResearchPlan {
            sample: Some("nurses in acute care".to_string()),
            phenomenon_of_interest: Some("handover communication".to_string()),
            design: Some("qualitative interviews".to_string()),
            evaluation: Some("perceived safety".to_string()),
            research_type: Some("qualitative".to_string()),
            inclusion_criteria: vec!["peer-reviewed".to_string()],
            exclusion_criteria: vec!["opinion pieces".to_string()],
            ..Default::default()
        };
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_missing_population_rejected() {
        let mut plan = pico_plan();
        plan.population = None;
        let err = plan.validate().unwrap_err();
        assert!(matches!(err, AppError::InvalidResearchPlan { .. }));
        assert!(err.to_string().contains("population"));
    }

    #[test]
    fn test_blank_population_rejected() {
        let mut plan = pico_plan();
        plan.population = Some("   ".to_string());
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_missing_exclusion_criteria_rejected() {
        let mut plan = pico_plan();
        plan.exclusion_criteria.clear();
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("exclusion"));
    }

    #[test]
    fn test_query_prefers_explicit_search_query() {
        let mut plan = pico_plan();
        plan.search_query = Some("(back pain) AND (exercise)".to_string());
        assert_eq!(plan.query(), "(back pain) AND (exercise)");
    }

    #[test]
    fn test_query_derived_from_plan_fields() {
        let query = pico_plan().query();
        assert!(query.contains("chronic low back pain"));
        assert!(query.contains("exercise therapy"));
    }
}
