//! Resilience layer for generative AI backends.
//!
//! Requests walk an ordered waterfall of candidate models. Each candidate
//! retries transient failures with exponential backoff before the next one
//! is tried. Editing falls back to describing the edit with a vision model
//! and generating the result from scratch.

pub mod backend;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod error;
pub mod logger;
pub mod models;
pub mod orchestrator;
pub mod retry;
pub mod synthetic;
pub mod waterfall;

pub use backend::{Backend, BedrockBackend, CredentialProvider, EnvCredentials, StaticCredential};
pub use cache::{CacheKey, ResultCache};
pub use classifier::{classify, classify_text, ErrorClassification};
pub use config::{BedrockConfig, ModelCatalog, OrchestratorConfig};
pub use error::{GenError, Result};
pub use models::*;
pub use orchestrator::GenerationOrchestrator;
pub use retry::{retry, Deadline, RetryPolicy};
pub use synthetic::{SyntheticEdit, SyntheticEditPipeline};
pub use waterfall::{CandidateOrder, ModelWaterfall, Served};
