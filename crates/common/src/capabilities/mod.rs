//! Capability contract abstractions
//!
//! The workflow engine consumes three external capabilities, each behind
//! an object-safe trait with an HTTP-backed implementation:
//! - `SearchCapability`: given a query, return candidate bibliographic
//!   records from one external database
//! - `DecisionCapability`: given a record and criteria, return a decision
//!   with confidence and rationale
//! - `ExtractionCapability`: given a study's full text reference, return
//!   extracted evidence rows
//!
//! Loose payloads from the decision service are mapped into the closed
//! `{include, exclude, uncertain}` variant here at the boundary; anything
//! else is rejected as a contract violation rather than propagated.

use crate::config::{CapabilityConfig, SourceConfig};
use crate::db::models::{Decision, StudyRecord};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One raw bibliographic record as returned by an external source,
/// before normalization into a StudyRecord
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub doi: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub full_text_ref: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A classified screening decision with confidence and rationale
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedDecision {
    pub decision: Decision,
    pub confidence: f64,
    pub rationale: String,
}

/// Group labels and sizes within an extracted outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceGroup {
    pub label: String,
    pub n: i32,
}

/// One extracted outcome for a study
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEvidence {
    pub outcome_name: String,
    pub measure: String,
    pub effect: Option<f64>,
    pub variance: Option<f64>,
    pub sample_size: i32,
    #[serde(default)]
    pub groups: Vec<EvidenceGroup>,
}

/// Trait for bibliographic search against one external database
#[async_trait]
pub trait SearchCapability: Send + Sync {
    /// Execute a search against the given source. Rate limiting and
    /// retry are the caller's responsibility (the source gateway).
    async fn fetch(&self, source: &SourceConfig, query: &str) -> Result<Vec<RawRecord>>;
}

/// Trait for automated screening classification
#[async_trait]
pub trait DecisionCapability: Send + Sync {
    /// Classify a record against the given criteria
    async fn classify(
        &self,
        record: &StudyRecord,
        criteria: &[String],
    ) -> Result<ClassifiedDecision>;
}

/// Trait for structured evidence extraction
#[async_trait]
pub trait ExtractionCapability: Send + Sync {
    /// Extract outcome rows from a study's full text
    async fn extract(&self, record: &StudyRecord) -> Result<Vec<ExtractedEvidence>>;
}

// ============================================================================
// HTTP-backed implementations
// ============================================================================

fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| AppError::Internal {
            message: format!("Failed to create HTTP client: {}", e),
        })
}

/// HTTP search client for external bibliographic databases
pub struct HttpSearchClient {
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SearchRequestBody<'a> {
    query: &'a str,
    max_results: u32,
}

#[derive(Deserialize)]
struct SearchResponseBody {
    records: Vec<RawRecord>,
}

impl HttpSearchClient {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout_secs)?,
        })
    }
}

#[async_trait]
impl SearchCapability for HttpSearchClient {
    async fn fetch(&self, source: &SourceConfig, query: &str) -> Result<Vec<RawRecord>> {
        let url = format!("{}/search", source.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&SearchRequestBody {
                query,
                max_results: source.max_results,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Source {
                source_name: source.name.clone(),
                message: format!("search returned HTTP {}", status.as_u16()),
            });
        }

        let body: SearchResponseBody =
            response.json().await.map_err(|e| AppError::Source {
                source_name: source.name.clone(),
                message: format!("malformed search response: {}", e),
            })?;

        Ok(body.records)
    }
}

/// HTTP client for the automated-classification capability
pub struct HttpDecisionClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    max_retries: u32,
}

#[derive(Serialize)]
struct ClassifyRequestBody<'a> {
    title: &'a str,
    #[serde(rename = "abstract")]
    abstract_text: Option<&'a str>,
    criteria: &'a [String],
}

/// The wire shape is loosely typed; decision strings are validated into
/// the closed enum before anything downstream sees them
#[derive(Deserialize)]
struct ClassifyResponseBody {
    decision: String,
    confidence: f64,
    #[serde(default)]
    rationale: String,
}

impl HttpDecisionClient {
    pub fn new(config: &CapabilityConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: config.decision_url.clone(),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries,
        })
    }

    /// Make request with retry
    async fn request_with_retry(&self, body: &ClassifyRequestBody<'_>) -> Result<ClassifyResponseBody> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                // Exponential backoff
                let delay = Duration::from_millis(100 * 2_u64.pow(attempt));
                tokio::time::sleep(delay).await;
            }

            match self.make_request(body).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %e,
                        "Classification request failed, retrying"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::Internal {
            message: "Unknown error after retries".to_string(),
        }))
    }

    async fn make_request(&self, body: &ClassifyRequestBody<'_>) -> Result<ClassifyResponseBody> {
        let mut request = self.client.post(&self.url).json(body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::ServiceUnavailable {
                message: format!("decision service returned HTTP {}", status.as_u16()),
            });
        }

        response
            .json()
            .await
            .map_err(|e| AppError::CapabilityContract {
                message: format!("malformed classification response: {}", e),
            })
    }
}

#[async_trait]
impl DecisionCapability for HttpDecisionClient {
    async fn classify(
        &self,
        record: &StudyRecord,
        criteria: &[String],
    ) -> Result<ClassifiedDecision> {
        let body = ClassifyRequestBody {
            title: &record.title,
            abstract_text: record.abstract_text.as_deref(),
            criteria,
        };

        let raw = self.request_with_retry(&body).await?;
        validate_decision_payload(&raw.decision, raw.confidence, raw.rationale)
    }
}

/// Map a loose decision payload into the closed variant, rejecting
/// anything outside the contract
pub fn validate_decision_payload(
    decision: &str,
    confidence: f64,
    rationale: String,
) -> Result<ClassifiedDecision> {
    let decision = Decision::parse_strict(decision).ok_or_else(|| AppError::CapabilityContract {
        message: format!(
            "decision '{}' is outside the include|exclude|uncertain contract",
            decision
        ),
    })?;

    if !(0.0..=1.0).contains(&confidence) {
        return Err(AppError::CapabilityContract {
            message: format!("confidence {} is outside [0, 1]", confidence),
        });
    }

    Ok(ClassifiedDecision {
        decision,
        confidence,
        rationale,
    })
}

/// HTTP client for the evidence-extraction capability
pub struct HttpExtractionClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct ExtractRequestBody<'a> {
    title: &'a str,
    full_text_ref: &'a str,
}

#[derive(Deserialize)]
struct ExtractResponseBody {
    rows: Vec<ExtractedEvidence>,
}

impl HttpExtractionClient {
    pub fn new(config: &CapabilityConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: config.extraction_url.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl ExtractionCapability for HttpExtractionClient {
    async fn extract(&self, record: &StudyRecord) -> Result<Vec<ExtractedEvidence>> {
        let full_text_ref = match record.full_text_ref.as_deref() {
            Some(r) => r,
            // Nothing to extract from; the synthesizer falls back to
            // narrative-only for this study
            None => return Ok(vec![]),
        };

        let mut request = self.client.post(&self.url).json(&ExtractRequestBody {
            title: &record.title,
            full_text_ref,
        });
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::ServiceUnavailable {
                message: format!("extraction service returned HTTP {}", status.as_u16()),
            });
        }

        let body: ExtractResponseBody =
            response
                .json()
                .await
                .map_err(|e| AppError::CapabilityContract {
                    message: format!("malformed extraction response: {}", e),
                })?;

        Ok(body.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_decision_payload() {
        let parsed = validate_decision_payload("include", 0.92, "meets criteria".into()).unwrap();
        assert_eq!(parsed.decision, Decision::Include);
        assert_eq!(parsed.confidence, 0.92);
    }

    #[test]
    fn test_unknown_decision_string_rejected() {
        let err = validate_decision_payload("probably", 0.9, String::new()).unwrap_err();
        assert!(matches!(err, AppError::CapabilityContract { .. }));
    }

    #[test]
    fn test_out_of_range_confidence_rejected() {
        let err = validate_decision_payload("include", 1.3, String::new()).unwrap_err();
        assert!(matches!(err, AppError::CapabilityContract { .. }));
    }
}
