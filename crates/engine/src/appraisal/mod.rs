//! Quality appraisal engine
//!
//! Pluggable bias-assessment tools behind a single-method trait and a
//! name-based registry. New tools are added by registering an
//! implementation, never by subclassing. Unknown configured tool names
//! fail at task start, not mid-workflow.
//!
//! Only studies with a final `include` decision at both screening
//! stages are eligible for appraisal.

use async_trait::async_trait;
use revforge_common::capabilities::DecisionCapability;
use revforge_common::db::models::{Decision, DomainRating, RiskRating, StudyRecord};
use revforge_common::errors::{AppError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

/// Tool names shipped with the engine; configuration validation checks
/// against this list plus any custom registrations
pub const BUILTIN_TOOLS: &[&str] = &["rob2", "robins_i"];

/// A structured appraisal produced by one tool for one study
#[derive(Debug, Clone)]
pub struct Appraisal {
    pub tool: String,
    pub domains: Vec<DomainRating>,
    pub overall: RiskRating,
}

/// One pluggable bias-assessment tool
#[async_trait]
pub trait AppraisalTool: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    /// Appraise one included study
    async fn appraise(&self, record: &StudyRecord) -> Result<Appraisal>;
}

/// Name-keyed registry of appraisal tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn AppraisalTool>>,
}

impl ToolRegistry {
    /// Registry with the built-in tools, each delegating domain
    /// judgments to the decision capability
    pub fn with_builtins(decision: Arc<dyn DecisionCapability>) -> Self {
        let mut registry = Self {
            tools: HashMap::new(),
        };
        registry.register(Arc::new(Rob2Tool::new(decision.clone())));
        registry.register(Arc::new(RobinsITool::new(decision)));
        registry
    }

    /// Register a tool under its own name; replaces any previous
    /// registration of that name
    pub fn register(&mut self, tool: Arc<dyn AppraisalTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Resolve a configured tool name
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn AppraisalTool>> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::UnknownAppraisalTool {
                tool: name.to_string(),
            })
    }

    /// Validate a list of configured tool names at task start
    pub fn validate_names(&self, names: &[String]) -> Result<()> {
        for name in names {
            self.resolve(name)?;
        }
        Ok(())
    }

    /// All registered names, for configuration validation
    pub fn known_names(&self) -> Vec<&str> {
        self.tools.keys().map(|k| k.as_str()).collect()
    }
}

/// Map a screening-style judgment onto a risk rating. The decision
/// capability answers "is this domain free of bias concerns": include
/// means low risk, exclude high, uncertain some concerns.
fn rating_from_decision(decision: Decision) -> RiskRating {
    match decision {
        Decision::Include => RiskRating::Low,
        Decision::Exclude => RiskRating::High,
        Decision::Uncertain => RiskRating::SomeConcerns,
    }
}

/// Overall judgment is the worst domain rating
pub fn overall_rating(domains: &[DomainRating]) -> RiskRating {
    domains
        .iter()
        .map(|d| d.rating)
        .max()
        .unwrap_or(RiskRating::SomeConcerns)
}

/// Shared domain-by-domain appraisal loop used by the built-in tools
async fn appraise_domains(
    decision: &dyn DecisionCapability,
    record: &StudyRecord,
    tool: &str,
    domains: &[&str],
) -> Result<Appraisal> {
    let mut ratings = Vec::with_capacity(domains.len());

    for domain in domains {
        let question = format!(
            "Assess whether this study is at low risk of bias in the domain: {}",
            domain
        );
        let judged = decision.classify(record, &[question]).await?;
        ratings.push(DomainRating {
            domain: domain.to_string(),
            rating: rating_from_decision(judged.decision),
            rationale: judged.rationale,
        });
    }

    Ok(Appraisal {
        tool: tool.to_string(),
        overall: overall_rating(&ratings),
        domains: ratings,
    })
}

/// RoB 2: the revised Cochrane tool for randomized trials
pub struct Rob2Tool {
    decision: Arc<dyn DecisionCapability>,
}

impl Rob2Tool {
    pub const DOMAINS: &'static [&'static str] = &[
        "bias arising from the randomization process",
        "bias due to deviations from intended interventions",
        "bias due to missing outcome data",
        "bias in measurement of the outcome",
        "bias in selection of the reported result",
    ];

    pub fn new(decision: Arc<dyn DecisionCapability>) -> Self {
        Self { decision }
    }
}

#[async_trait]
impl AppraisalTool for Rob2Tool {
    fn name(&self) -> &str {
        "rob2"
    }

    #[instrument(skip(self, record), fields(record_id = %record.id))]
    async fn appraise(&self, record: &StudyRecord) -> Result<Appraisal> {
        appraise_domains(self.decision.as_ref(), record, self.name(), Self::DOMAINS).await
    }
}

/// ROBINS-I: risk of bias in non-randomized studies of interventions
pub struct RobinsITool {
    decision: Arc<dyn DecisionCapability>,
}

impl RobinsITool {
    pub const DOMAINS: &'static [&'static str] = &[
        "bias due to confounding",
        "bias in selection of participants",
        "bias in classification of interventions",
        "bias due to deviations from intended interventions",
        "bias due to missing data",
        "bias in measurement of outcomes",
        "bias in selection of the reported result",
    ];

    pub fn new(decision: Arc<dyn DecisionCapability>) -> Self {
        Self { decision }
    }
}

#[async_trait]
impl AppraisalTool for RobinsITool {
    fn name(&self) -> &str {
        "robins_i"
    }

    #[instrument(skip(self, record), fields(record_id = %record.id))]
    async fn appraise(&self, record: &StudyRecord) -> Result<Appraisal> {
        appraise_domains(self.decision.as_ref(), record, self.name(), Self::DOMAINS).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use revforge_common::capabilities::ClassifiedDecision;
    use serde_json::json;
    use uuid::Uuid;

    struct FixedJudge(Decision);

    #[async_trait]
    impl DecisionCapability for FixedJudge {
        async fn classify(
            &self,
            _record: &StudyRecord,
            _criteria: &[String],
        ) -> Result<ClassifiedDecision> {
            Ok(ClassifiedDecision {
                decision: self.0,
                confidence: 0.9,
                rationale: "judged".to_string(),
            })
        }
    }

    fn record() -> StudyRecord {
        let ts = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z").unwrap();
        StudyRecord {
            id: Uuid::from_u128(1),
            task_id: Uuid::from_u128(999),
            title: "A randomized trial".to_string(),
            authors: json!(["Smith, J."]),
            year: Some(2020),
            doi: None,
            source: "test".to_string(),
            abstract_text: Some("...".to_string()),
            full_text_ref: Some("s3://papers/1.pdf".to_string()),
            content_hash: "hash".to_string(),
            metadata: json!({}),
            duplicate_of: None,
            ingested_at: ts,
            created_at: ts,
        }
    }

    #[test]
    fn test_unknown_tool_is_rejected() {
        let registry = ToolRegistry::with_builtins(Arc::new(FixedJudge(Decision::Include)));
        let err = registry.resolve("newcastle_ottawa").err().unwrap();
        assert!(matches!(err, AppError::UnknownAppraisalTool { .. }));
        assert!(registry.validate_names(&["rob2".to_string()]).is_ok());
    }

    #[test]
    fn test_overall_is_worst_domain() {
        let domains = vec![
            DomainRating {
                domain: "a".into(),
                rating: RiskRating::Low,
                rationale: String::new(),
            },
            DomainRating {
                domain: "b".into(),
                rating: RiskRating::High,
                rationale: String::new(),
            },
            DomainRating {
                domain: "c".into(),
                rating: RiskRating::SomeConcerns,
                rationale: String::new(),
            },
        ];
        assert_eq!(overall_rating(&domains), RiskRating::High);
    }

    #[tokio::test]
    async fn test_rob2_covers_all_five_domains() {
        let tool = Rob2Tool::new(Arc::new(FixedJudge(Decision::Include)));
        let appraisal = tool.appraise(&record()).await.unwrap();

        assert_eq!(appraisal.tool, "rob2");
        assert_eq!(appraisal.domains.len(), 5);
        assert_eq!(appraisal.overall, RiskRating::Low);
    }

    #[tokio::test]
    async fn test_uncertain_judgment_maps_to_some_concerns() {
        let tool = RobinsITool::new(Arc::new(FixedJudge(Decision::Uncertain)));
        let appraisal = tool.appraise(&record()).await.unwrap();
        assert_eq!(appraisal.overall, RiskRating::SomeConcerns);
        assert_eq!(appraisal.domains.len(), 7);
    }
}
