//! Enrichment sampling via an external classification service
//!
//! A probabilistic subset of fetched records is scored by a remote
//! classifier. Enrichment is strictly best-effort: a failed or exhausted
//! call degrades to a sentinel result and must never block the primary
//! fetch/persist path.

mod sampler;

pub use sampler::{normalize_text, EnrichmentResult, Sampler, NA_CLASS, SENTINEL_CONFIDENCE};
