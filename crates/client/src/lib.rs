//! # msc-fhir-client - Clinical-Data Service Client
//!
//! HTTP client over the [`msc_fhir_gateway`] fault-tolerance layer. Handles
//! authentication (static token or OAuth2 client credentials), routes every
//! request through the circuit breaker, validates writes before they leave
//! the process, and rewrites remote URLs in returned bundles to the portal's
//! public base.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use msc_fhir_client::{ClientConfig, FhirClient};
//! use msc_fhir_gateway::search::SearchQueryBuilder;
//! use msc_fhir_gateway::store::InMemoryStore;
//!
//! let config = ClientConfig::from_env();
//! let client = FhirClient::new(&config, Arc::new(InMemoryStore::new()))?;
//!
//! let bundle = client
//!     .search(&SearchQueryBuilder::patient().by_name("Doe").limit(20))
//!     .await?;
//! ```

pub mod auth;
pub mod client;
pub mod config;

pub use auth::{ClientCredentialsProvider, NoAuth, StaticTokenProvider, TokenProvider};
pub use client::FhirClient;
pub use config::ClientConfig;

/// Initializes tracing for binaries using this crate.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("msc_fhir_client={0},msc_fhir_gateway={0}", level))
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
