//! Client configuration.
//!
//! Supports programmatic construction, command line arguments, and
//! environment variable overrides.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `FHIR_ENDPOINT` | (required) | Base URL of the remote FHIR service |
//! | `FHIR_ACCESS_TOKEN` | — | Static bearer token (skips OAuth) |
//! | `FHIR_TOKEN_URL` | — | OAuth2 token endpoint |
//! | `FHIR_CLIENT_ID` | — | OAuth2 client ID |
//! | `FHIR_CLIENT_SECRET` | — | OAuth2 client secret |
//! | `FHIR_SCOPE` | — | OAuth2 scope (defaults to `<endpoint>/.default`) |
//! | `FHIR_REQUEST_TIMEOUT` | 30 | Request timeout (seconds) |
//! | `FHIR_PUBLIC_BASE_URL` | — | Public base URL substituted into bundle links |
//! | `FHIR_FAILURE_THRESHOLD` | 5 | Breaker failure threshold |
//! | `FHIR_SUCCESS_THRESHOLD` | 2 | Breaker success threshold |
//! | `FHIR_RECOVERY_TIMEOUT` | 60 | Breaker recovery timeout (seconds) |
//! | `FHIR_SERVICE_NAME` | fhir | Breaker service name |
//! | `FHIR_STRICT_VALIDATION` | false | Strict resource validation |
//! | `FHIR_DIAGNOSTICS` | false | Attach diagnostics to error outcomes |
//! | `FHIR_LOG_LEVEL` | info | Log level |

use std::time::Duration;

use clap::Parser;
use msc_fhir_gateway::breaker::CircuitBreakerConfig;

/// Configuration for [`crate::FhirClient`].
#[derive(Debug, Clone, Parser)]
#[command(name = "msc-fhir-client")]
#[command(about = "Clinical-data gateway client")]
pub struct ClientConfig {
    /// Base URL of the remote FHIR service.
    #[arg(long, env = "FHIR_ENDPOINT", default_value = "")]
    pub endpoint: String,

    /// Static bearer token. When set, OAuth settings are ignored.
    #[arg(long, env = "FHIR_ACCESS_TOKEN")]
    pub access_token: Option<String>,

    /// OAuth2 client-credentials token endpoint.
    #[arg(long, env = "FHIR_TOKEN_URL")]
    pub token_url: Option<String>,

    /// OAuth2 client ID.
    #[arg(long, env = "FHIR_CLIENT_ID")]
    pub client_id: Option<String>,

    /// OAuth2 client secret.
    #[arg(long, env = "FHIR_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// OAuth2 scope. Defaults to `<endpoint>/.default` when unset.
    #[arg(long, env = "FHIR_SCOPE")]
    pub scope: Option<String>,

    /// Request timeout in seconds.
    #[arg(long, env = "FHIR_REQUEST_TIMEOUT", default_value = "30")]
    pub request_timeout: u64,

    /// Public base URL substituted for the remote endpoint in bundle links.
    #[arg(long, env = "FHIR_PUBLIC_BASE_URL")]
    pub public_base_url: Option<String>,

    /// Circuit-breaker failure threshold.
    #[arg(long, env = "FHIR_FAILURE_THRESHOLD", default_value = "5")]
    pub failure_threshold: u32,

    /// Circuit-breaker success threshold.
    #[arg(long, env = "FHIR_SUCCESS_THRESHOLD", default_value = "2")]
    pub success_threshold: u32,

    /// Circuit-breaker recovery timeout in seconds.
    #[arg(long, env = "FHIR_RECOVERY_TIMEOUT", default_value = "60")]
    pub recovery_timeout: u64,

    /// Circuit-breaker service name (namespaces shared state keys).
    #[arg(long, env = "FHIR_SERVICE_NAME", default_value = "fhir")]
    pub service_name: String,

    /// Enable strict resource validation.
    #[arg(long, env = "FHIR_STRICT_VALIDATION", default_value = "false")]
    pub strict_validation: bool,

    /// Attach diagnostics to error outcomes. Non-production only.
    #[arg(long, env = "FHIR_DIAGNOSTICS", default_value = "false")]
    pub diagnostics: bool,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "FHIR_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::parse_from(["msc-fhir-client"])
    }
}

impl ClientConfig {
    /// Builds configuration from environment variables, ignoring command
    /// line arguments.
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Validates the configuration, returning all problems found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.endpoint.is_empty() {
            errors.push("endpoint must be set (FHIR_ENDPOINT)".to_string());
        } else if url::Url::parse(&self.endpoint).is_err() {
            errors.push(format!("endpoint is not a valid URL: {}", self.endpoint));
        }

        let oauth_parts = [
            self.token_url.is_some(),
            self.client_id.is_some(),
            self.client_secret.is_some(),
        ];
        if oauth_parts.iter().any(|&set| set) && !oauth_parts.iter().all(|&set| set) {
            errors.push(
                "token_url, client_id, and client_secret must be set together".to_string(),
            );
        }

        if self.failure_threshold == 0 {
            errors.push("failure_threshold must be at least 1".to_string());
        }
        if self.success_threshold == 0 {
            errors.push("success_threshold must be at least 1".to_string());
        }
        if self.request_timeout == 0 {
            errors.push("request_timeout must be at least 1 second".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// True when OAuth client-credentials settings are complete.
    pub fn has_oauth(&self) -> bool {
        self.token_url.is_some() && self.client_id.is_some() && self.client_secret.is_some()
    }

    /// The OAuth scope, defaulting to the endpoint's `.default` scope.
    pub fn oauth_scope(&self) -> String {
        self.scope
            .clone()
            .unwrap_or_else(|| format!("{}/.default", self.endpoint.trim_end_matches('/')))
    }

    /// Breaker configuration derived from the thresholds.
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            recovery_timeout: Duration::from_secs(self.recovery_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ClientConfig {
        let mut config = ClientConfig::default();
        config.endpoint = "https://fhir.example.org".to_string();
        config
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.request_timeout, 30);
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.success_threshold, 2);
        assert_eq!(config.recovery_timeout, 60);
        assert_eq!(config.service_name, "fhir");
        assert!(!config.strict_validation);
        assert!(!config.diagnostics);
    }

    #[test]
    fn test_validate_requires_endpoint() {
        let config = ClientConfig::default();
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("endpoint")));
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_validate_oauth_all_or_nothing() {
        let mut config = base_config();
        config.token_url = Some("https://login.example.org/token".to_string());
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("set together")));

        config.client_id = Some("id".to_string());
        config.client_secret = Some("secret".to_string());
        assert!(config.validate().is_ok());
        assert!(config.has_oauth());
    }

    #[test]
    fn test_default_scope_from_endpoint() {
        let mut config = base_config();
        config.endpoint = "https://fhir.example.org/".to_string();
        assert_eq!(config.oauth_scope(), "https://fhir.example.org/.default");
        config.scope = Some("custom/.default".to_string());
        assert_eq!(config.oauth_scope(), "custom/.default");
    }

    #[test]
    fn test_breaker_config_mapping() {
        let mut config = base_config();
        config.failure_threshold = 7;
        config.recovery_timeout = 90;
        let breaker = config.breaker_config();
        assert_eq!(breaker.failure_threshold, 7);
        assert_eq!(breaker.recovery_timeout, Duration::from_secs(90));
    }
}
