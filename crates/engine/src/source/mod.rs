//! Source gateway
//!
//! Adapts external bibliographic databases into a uniform record shape.
//! Each configured source gets its own token-bucket rate limiter and
//! exponential-backoff retry; search execution fans out one concurrent
//! fetch per source and merges results only after every source returned
//! or timed out, so deduplication always sees a complete snapshot.
//! Exhausted sources are tolerated as partial failures; the gateway
//! performs no deduplication or filtering of its own.

use crate::normalize::content_hash;
use backoff::{future::retry, Error as BackoffError, ExponentialBackoff};
use chrono::Utc;
use futures::future::join_all;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use revforge_common::capabilities::{RawRecord, SearchCapability};
use revforge_common::config::SourceConfig;
use revforge_common::db::models::StudyRecordActiveModel;
use revforge_common::errors::AppError;
use revforge_common::metrics;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Failure kind after the gateway's own retries are exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFailureKind {
    /// Per-request or stage-budget timeout
    Timeout,
    /// Upstream returned errors until retries ran out
    Exhausted,
}

/// A typed source failure surfaced to the orchestrator
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("source '{source_name}' failed: {message}")]
pub struct SourceFailure {
    pub source_name: String,
    pub kind: SourceFailureKind,
    pub last_status: Option<u16>,
    pub message: String,
}

/// Everything the search stage produced: fetched records per source and
/// the failures the orchestrator logs but tolerates
#[derive(Debug, Default)]
pub struct SourceFetchOutcome {
    pub records: Vec<(String, RawRecord)>,
    pub failures: Vec<SourceFailure>,
}

impl SourceFetchOutcome {
    /// True when every configured source failed
    pub fn all_failed(&self) -> bool {
        self.records.is_empty() && !self.failures.is_empty()
    }
}

/// Gateway over all configured sources
pub struct SourceGateway {
    search: Arc<dyn SearchCapability>,
    limiters: HashMap<String, Arc<DefaultDirectRateLimiter>>,
}

impl SourceGateway {
    /// Build a gateway with one rate limiter per configured source
    pub fn new(search: Arc<dyn SearchCapability>, sources: &[SourceConfig]) -> Self {
        let limiters = sources
            .iter()
            .map(|source| {
                let quota = Quota::per_second(
                    NonZeroU32::new(source.rate_limit_per_sec.max(1)).unwrap(),
                );
                (source.name.clone(), Arc::new(RateLimiter::direct(quota)))
            })
            .collect();

        Self { search, limiters }
    }

    /// Fetch from one source with rate limiting, per-request timeout,
    /// and exponential-backoff retry (base delay doubling, capped
    /// attempt count).
    #[instrument(skip(self, source), fields(source = %source.name))]
    pub async fn fetch_source(
        &self,
        source: &SourceConfig,
        query: &str,
    ) -> Result<Vec<RawRecord>, SourceFailure> {
        let limiter = self
            .limiters
            .get(&source.name)
            .cloned()
            .unwrap_or_else(|| {
                Arc::new(RateLimiter::direct(Quota::per_second(
                    NonZeroU32::new(1).unwrap(),
                )))
            });

        let strategy = ExponentialBackoff {
            initial_interval: Duration::from_secs(source.backoff_base_secs),
            multiplier: 2.0,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };

        let attempts = AtomicU32::new(0);
        let max_attempts = source.max_retries.max(1);

        let result = retry(strategy, || {
            let attempts = &attempts;
            let limiter = limiter.clone();
            async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                limiter.until_ready().await;

                let fetched = tokio::time::timeout(
                    Duration::from_secs(source.timeout_secs),
                    self.search.fetch(source, query),
                )
                .await;

                let error = match fetched {
                    Ok(Ok(records)) => return Ok(records),
                    Ok(Err(e)) => e,
                    Err(_) => AppError::Source {
                        source_name: source.name.clone(),
                        message: format!("request timed out after {}s", source.timeout_secs),
                    },
                };

                warn!(
                    source = %source.name,
                    attempt,
                    max_attempts,
                    error = %error,
                    "Source fetch failed"
                );

                if attempt >= max_attempts {
                    Err(BackoffError::permanent(error))
                } else {
                    Err(BackoffError::transient(error))
                }
            }
        })
        .await;

        match result {
            Ok(records) => {
                info!(source = %source.name, count = records.len(), "Source fetch succeeded");
                metrics::record_source_fetch(&source.name, true, records.len());
                Ok(records)
            }
            Err(error) => {
                metrics::record_source_fetch(&source.name, false, 0);
                Err(failure_from_error(&source.name, error))
            }
        }
    }

    /// Fan out one concurrent fetch per enabled source. An optional
    /// stage budget abandons stragglers, logging them as timed out;
    /// results are merged only after all sources return or time out.
    #[instrument(skip(self, sources), fields(sources = sources.len()))]
    pub async fn fetch_all(
        &self,
        sources: &[SourceConfig],
        query: &str,
        stage_budget: Option<Duration>,
    ) -> SourceFetchOutcome {
        let fetches = sources.iter().map(|source| async move {
            let fetched = match stage_budget {
                Some(budget) => {
                    match tokio::time::timeout(budget, self.fetch_source(source, query)).await {
                        Ok(result) => result,
                        Err(_) => Err(SourceFailure {
                            source_name: source.name.clone(),
                            kind: SourceFailureKind::Timeout,
                            last_status: None,
                            message: format!(
                                "stage budget of {}s exceeded",
                                budget.as_secs()
                            ),
                        }),
                    }
                }
                None => self.fetch_source(source, query).await,
            };
            (source.name.clone(), fetched)
        });

        let mut outcome = SourceFetchOutcome::default();
        for (name, fetched) in join_all(fetches).await {
            match fetched {
                Ok(records) => outcome
                    .records
                    .extend(records.into_iter().map(|r| (name.clone(), r))),
                Err(failure) => outcome.failures.push(failure),
            }
        }

        outcome
    }
}

fn failure_from_error(source: &str, error: AppError) -> SourceFailure {
    let message = error.to_string();
    let kind = if message.contains("timed out") {
        SourceFailureKind::Timeout
    } else {
        SourceFailureKind::Exhausted
    };
    let last_status = match &error {
        AppError::HttpClient(e) => e.status().map(|s| s.as_u16()),
        _ => None,
    };

    SourceFailure {
        source_name: source.to_string(),
        kind,
        last_status,
        message,
    }
}

/// Normalize one raw record into a persistable study record draft,
/// computing the content hash over normalized title + first-author
/// surname + year
pub fn draft_record(task_id: Uuid, source_name: &str, raw: RawRecord) -> StudyRecordActiveModel {
    let now = Utc::now();
    let hash = content_hash(&raw.title, &raw.authors, raw.year);

    StudyRecordActiveModel {
        id: Set(Uuid::new_v4()),
        task_id: Set(task_id),
        title: Set(raw.title),
        authors: Set(json!(raw.authors)),
        year: Set(raw.year),
        doi: Set(raw.doi),
        source: Set(source_name.to_string()),
        abstract_text: Set(raw.abstract_text),
        full_text_ref: Set(raw.full_text_ref),
        content_hash: Set(hash),
        metadata: Set(raw.metadata),
        duplicate_of: Set(None),
        ingested_at: Set(now.into()),
        created_at: Set(now.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use revforge_common::errors::Result;
    use std::sync::Mutex;

    fn source_config(name: &str, max_retries: u32) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            enabled: true,
            base_url: "http://localhost:9/noop".to_string(),
            max_results: 50,
            rate_limit_per_sec: 100,
            timeout_secs: 5,
            max_retries,
            backoff_base_secs: 0,
        }
    }

    fn raw(title: &str) -> RawRecord {
        RawRecord {
            title: title.to_string(),
            authors: vec!["Smith, J.".to_string()],
            year: Some(2020),
            doi: None,
            abstract_text: None,
            full_text_ref: None,
            metadata: json!({}),
        }
    }

    /// Fails a fixed number of times, then succeeds
    struct FlakySearch {
        failures_remaining: Mutex<u32>,
    }

    #[async_trait]
    impl SearchCapability for FlakySearch {
        async fn fetch(&self, source: &SourceConfig, _query: &str) -> Result<Vec<RawRecord>> {
            let mut remaining = self.failures_remaining.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(AppError::Source {
                    source_name: source.name.clone(),
                    message: "HTTP 503".to_string(),
                });
            }
            Ok(vec![raw("A trial")])
        }
    }

    struct AlwaysFailing;

    #[async_trait]
    impl SearchCapability for AlwaysFailing {
        async fn fetch(&self, source: &SourceConfig, _query: &str) -> Result<Vec<RawRecord>> {
            Err(AppError::Source {
                source_name: source.name.clone(),
                message: "HTTP 500".to_string(),
            })
        }
    }

    struct OneGoodOneBad;

    #[async_trait]
    impl SearchCapability for OneGoodOneBad {
        async fn fetch(&self, source: &SourceConfig, _query: &str) -> Result<Vec<RawRecord>> {
            if source.name == "good" {
                Ok(vec![raw("Alpha"), raw("Beta")])
            } else {
                Err(AppError::Source {
                    source_name: source.name.clone(),
                    message: "HTTP 429".to_string(),
                })
            }
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let search = Arc::new(FlakySearch {
            failures_remaining: Mutex::new(2),
        });
        let config = source_config("pubmed", 5);
        let gateway = SourceGateway::new(search, std::slice::from_ref(&config));

        let records = gateway.fetch_source(&config, "pain").await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_yield_typed_failure() {
        let config = source_config("scopus", 2);
        let gateway = SourceGateway::new(Arc::new(AlwaysFailing), std::slice::from_ref(&config));

        let failure = gateway.fetch_source(&config, "pain").await.unwrap_err();
        assert_eq!(failure.source_name, "scopus");
        assert_eq!(failure.kind, SourceFailureKind::Exhausted);
    }

    #[tokio::test]
    async fn test_fan_out_is_partial_result_tolerant() {
        let sources = vec![source_config("good", 1), source_config("bad", 1)];
        let gateway = SourceGateway::new(Arc::new(OneGoodOneBad), &sources);

        let outcome = gateway.fetch_all(&sources, "pain", None).await;

        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].source_name, "bad");
        assert!(!outcome.all_failed());
    }

    #[tokio::test]
    async fn test_all_sources_failing_is_detectable() {
        let sources = vec![source_config("one", 1), source_config("two", 1)];
        let gateway = SourceGateway::new(Arc::new(AlwaysFailing), &sources);

        let outcome = gateway.fetch_all(&sources, "pain", None).await;
        assert!(outcome.all_failed());
        assert_eq!(outcome.failures.len(), 2);
    }

    #[test]
    fn test_draft_record_computes_content_hash() {
        use sea_orm::ActiveValue;

        let task_id = Uuid::from_u128(1);
        let draft = draft_record(task_id, "pubmed", raw("Effects of X"));

        match (&draft.content_hash, &draft.source) {
            (ActiveValue::Set(hash), ActiveValue::Set(source)) => {
                assert_eq!(hash.len(), 64);
                assert_eq!(source, "pubmed");
            }
            _ => panic!("draft fields must be set"),
        }
    }
}
