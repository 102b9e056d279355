//! RevForge Common Library
//!
//! Shared code for the RevForge workflow services including:
//! - Database models and repository patterns
//! - Capability client abstractions (search, decision, extraction)
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod capabilities;
pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;

// Re-export commonly used types
pub use capabilities::{DecisionCapability, ExtractionCapability, SearchCapability};
pub use config::AppConfig;
pub use db::Repository;
pub use errors::{AppError, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default confidence threshold below which an automated screening
/// decision is routed to human review
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.8;

/// Default normalized-title similarity threshold for fuzzy deduplication
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.90;
