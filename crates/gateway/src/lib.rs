//! # msc-fhir-gateway - Clinical-Data Gateway
//!
//! This crate is the fault-tolerance and data-normalization layer between the
//! MSC ordering portal and an external FHIR-compliant clinical-data service.
//! It covers the subset of FHIR exercised by the portal (Patient,
//! Practitioner, Organization, EpisodeOfCare, Coverage, Bundle, Task,
//! DocumentReference) and deliberately does not attempt full FHIR
//! conformance.
//!
//! ## Components
//!
//! - **Circuit breaker** ([`breaker`]): guards every outbound call to the
//!   remote service, tracks failures/successes in a shared TTL-based
//!   key-value store, and probes for recovery after an outage.
//! - **Search query builder** ([`search`]): a fluent builder that accumulates
//!   search intent and serializes it deterministically into the FHIR search
//!   query grammar.
//! - **Resource validator** ([`validator`]): structural and resource-specific
//!   checks producing a field-level error map, run before a resource is
//!   submitted.
//! - **Response transformer** ([`transform`]): flattens the remote service's
//!   nested resource JSON into stable, consumer-friendly DTOs.
//! - **Error handler** ([`handler`] / [`outcome`]): translates every failure
//!   path into a single FHIR `OperationOutcome` shape, with PHI-safe boundary
//!   logging.
//!
//! ## Typical flow
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use msc_fhir_gateway::{
//!     breaker::CircuitBreaker,
//!     search::SearchQueryBuilder,
//!     store::InMemoryStore,
//!     transform,
//! };
//!
//! let store = Arc::new(InMemoryStore::new());
//! let breaker = CircuitBreaker::new("fhir", store);
//!
//! let query = SearchQueryBuilder::patient()
//!     .by_name("Smith")
//!     .limit(10)
//!     .latest();
//!
//! let bundle = breaker
//!     .call(|| async { fetch(&query.to_query_string()).await })
//!     .await?;
//! let dto = transform::transform_bundle(&bundle);
//! ```
//!
//! The gateway is transport-agnostic: the breaker wraps an arbitrary future,
//! and the transformer/validator operate on `serde_json::Value` payloads.

pub mod breaker;
pub mod error;
pub mod handler;
pub mod outcome;
pub mod search;
pub mod store;
pub mod transform;
pub mod validator;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStatus, CircuitState};
pub use error::{GatewayError, GatewayResult};
pub use handler::{ErrorHandler, RequestContext};
pub use outcome::{IssueSeverity, OperationOutcome, OutcomeIssue};
pub use search::{SearchModifier, SearchQueryBuilder, SortDirection, SummaryMode};
pub use store::{InMemoryStore, StateStore};
pub use transform::{BundleDto, ResourceDto};
pub use validator::{ResourceValidator, ValidationErrors};
