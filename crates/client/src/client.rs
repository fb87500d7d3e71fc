//! Breaker-protected HTTP client for the remote FHIR service.
//!
//! Every outbound request flows through the circuit breaker; writes are
//! validated locally first; search results come back as normalized
//! [`BundleDto`]s with remote URLs rewritten to the portal's public base.
//! Failures are logged once here, at the gateway boundary, and surface as
//! [`GatewayError`] values that callers can turn into OperationOutcomes.

use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;
use tracing::{debug, info};

use msc_fhir_gateway::breaker::{CircuitBreaker, CircuitBreakerStatus};
use msc_fhir_gateway::error::{GatewayError, GatewayResult};
use msc_fhir_gateway::handler::{ErrorHandler, RequestContext};
use msc_fhir_gateway::search::SearchQueryBuilder;
use msc_fhir_gateway::store::StateStore;
use msc_fhir_gateway::transform::{transform, transform_bundle, BundleDto, ResourceDto};
use msc_fhir_gateway::validator::ResourceValidator;

use crate::auth::{ClientCredentialsProvider, NoAuth, StaticTokenProvider, TokenProvider};
use crate::config::ClientConfig;

/// Client for the remote clinical-data service.
pub struct FhirClient {
    http: reqwest::Client,
    base_url: String,
    public_base_url: Option<String>,
    tokens: Arc<dyn TokenProvider>,
    breaker: CircuitBreaker,
    validator: ResourceValidator,
    handler: ErrorHandler,
}

impl FhirClient {
    /// Builds a client from configuration and a shared breaker state store.
    pub fn new(config: &ClientConfig, store: Arc<dyn StateStore>) -> GatewayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout))
            .build()
            .map_err(|e| GatewayError::transport(format!("http client init failed: {}", e)))?;

        let tokens: Arc<dyn TokenProvider> = if let Some(token) = &config.access_token {
            Arc::new(StaticTokenProvider::new(token))
        } else if config.has_oauth() {
            Arc::new(ClientCredentialsProvider::new(
                http.clone(),
                config.token_url.clone().unwrap_or_default(),
                config.client_id.clone().unwrap_or_default(),
                config.client_secret.clone().unwrap_or_default(),
                config.oauth_scope(),
            ))
        } else {
            Arc::new(NoAuth)
        };

        let validator = if config.strict_validation {
            ResourceValidator::strict()
        } else {
            ResourceValidator::new()
        };
        let handler = if config.diagnostics {
            ErrorHandler::with_diagnostics()
        } else {
            ErrorHandler::new()
        };

        Ok(Self {
            http,
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            public_base_url: config
                .public_base_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            tokens,
            breaker: CircuitBreaker::with_config(
                config.service_name.clone(),
                store,
                config.breaker_config(),
            ),
            validator,
            handler,
        })
    }

    /// The error handler configured for this client, for callers that need
    /// to render outcomes themselves.
    pub fn error_handler(&self) -> ErrorHandler {
        self.handler
    }

    /// Snapshot of the breaker guarding this client.
    pub async fn breaker_status(&self) -> CircuitBreakerStatus {
        self.breaker.status().await
    }

    /// Reads a resource by type and id. A remote 404 yields `None`.
    pub async fn read(&self, resource_type: &str, id: &str) -> GatewayResult<Option<Value>> {
        let path = format!("{}/{}", resource_type, id);
        let context = RequestContext::new("GET", &path);
        let (status, body) = self
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| self.fail(e, resource_type, &context))?;
        if status == 404 {
            debug!(resource_type, id, "resource not found");
            return Ok(None);
        }
        self.accept(status, body, resource_type, &context).map(Some)
    }

    /// Reads a Patient and flattens it into a DTO.
    pub async fn patient(&self, id: &str) -> GatewayResult<Option<ResourceDto>> {
        Ok(self.read("Patient", id).await?.map(|value| transform(&value)))
    }

    /// Executes a search and normalizes the resulting bundle.
    pub async fn search(&self, query: &SearchQueryBuilder) -> GatewayResult<BundleDto> {
        Ok(transform_bundle(&self.search_raw(query).await?))
    }

    /// Executes a search and returns the raw bundle with rewritten URLs.
    pub async fn search_raw(&self, query: &SearchQueryBuilder) -> GatewayResult<Value> {
        let path = query.to_path();
        let context = RequestContext::new("GET", &path);
        let (status, body) = self
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| self.fail(e, query.resource_type(), &context))?;
        let bundle = self.accept(status, body, query.resource_type(), &context)?;
        Ok(self.rewrite_bundle_urls(bundle))
    }

    /// Coverage entries for one patient, ordered by policy precedence.
    pub async fn coverage_for_patient(&self, patient_id: &str) -> GatewayResult<BundleDto> {
        let query = SearchQueryBuilder::coverage()
            .by_patient(patient_id)
            .by_status("active");
        self.search(&query).await
    }

    /// Validates and creates a resource. Returns the created resource as
    /// stored by the remote service.
    pub async fn create(&self, resource: &Value) -> GatewayResult<Value> {
        let resource_type = required_type(resource)?;
        self.validator
            .validate_or_reject(resource, Some(resource_type.as_str()))?;

        let context = RequestContext::new("POST", &resource_type);
        let (status, body) = self
            .request(Method::POST, &resource_type, Some(resource))
            .await
            .map_err(|e| self.fail(e, &resource_type, &context))?;
        let created = self.accept(status, body, &resource_type, &context)?;
        let id = created.get("id").and_then(Value::as_str);
        info!(resource_type = %resource_type, id, "resource created");
        Ok(created)
    }

    /// Validates and updates a resource in place.
    pub async fn update(&self, id: &str, resource: &Value) -> GatewayResult<Value> {
        let resource_type = required_type(resource)?;
        self.validator
            .validate_or_reject(resource, Some(resource_type.as_str()))?;

        let path = format!("{}/{}", resource_type, id);
        let context = RequestContext::new("PUT", &path);
        let (status, body) = self
            .request(Method::PUT, &path, Some(resource))
            .await
            .map_err(|e| self.fail(e, &resource_type, &context))?;
        self.accept(status, body, &resource_type, &context)
    }

    /// Deletes a resource. Returns `false` when it did not exist.
    pub async fn delete(&self, resource_type: &str, id: &str) -> GatewayResult<bool> {
        let path = format!("{}/{}", resource_type, id);
        let context = RequestContext::new("DELETE", &path);
        let (status, body) = self
            .request(Method::DELETE, &path, None)
            .await
            .map_err(|e| self.fail(e, resource_type, &context))?;
        if status == 404 {
            return Ok(false);
        }
        self.accept(status, body, resource_type, &context)?;
        info!(resource_type, id, "resource deleted");
        Ok(true)
    }

    /// Validates and submits a transaction bundle to the service root.
    pub async fn submit_transaction(&self, bundle: &Value) -> GatewayResult<Value> {
        self.validator.validate_or_reject(bundle, Some("Bundle"))?;

        let context = RequestContext::new("POST", "/");
        let (status, body) = self
            .request(Method::POST, "", Some(bundle))
            .await
            .map_err(|e| self.fail(e, "Bundle", &context))?;
        let response = self.accept(status, body, "Bundle", &context)?;
        Ok(self.rewrite_bundle_urls(response))
    }

    /// Fetches the server's capability statement.
    pub async fn capability_statement(&self) -> GatewayResult<Value> {
        let context = RequestContext::new("GET", "/metadata");
        let (status, body) = self
            .request(Method::GET, "metadata", None)
            .await
            .map_err(|e| self.fail(e, "CapabilityStatement", &context))?;
        self.accept(status, body, "CapabilityStatement", &context)
    }

    /// Sends one request through the breaker.
    ///
    /// Transport failures and 5xx responses raise inside the breaker and
    /// count against it; every other status is returned for the caller to
    /// interpret, so missing resources and client mistakes never trip the
    /// circuit.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> GatewayResult<(u16, Value)> {
        self.breaker
            .call(move || self.perform(method, path, body))
            .await
    }

    async fn perform(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> GatewayResult<(u16, Value)> {
        let url = if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path)
        };

        let mut request = self.http.request(method, &url);
        if let Some(token) = self.tokens.access_token().await? {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::transport(format!("request to {} failed: {}", url, e)))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::transport(format!("failed reading response body: {}", e)))?;
        let payload = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)
                .map_err(|e| GatewayError::transport(format!("malformed response body: {}", e)))?
        };

        if status >= 500 {
            let outcome = self.handler.handle_api_error(&payload, status);
            return Err(GatewayError::Remote {
                status,
                message: outcome.error_message(),
                outcome: Some(outcome),
            });
        }

        Ok((status, payload))
    }

    /// Converts a non-5xx response into a result, logging any failure once.
    fn accept(
        &self,
        status: u16,
        body: Value,
        resource_type: &str,
        context: &RequestContext,
    ) -> GatewayResult<Value> {
        if (200..300).contains(&status) {
            return Ok(body);
        }

        let err = match status {
            401 | 403 => GatewayError::Authentication {
                message: format!("remote service returned HTTP {}", status),
            },
            404 => GatewayError::NotFound {
                resource_type: resource_type.to_string(),
                id: last_path_segment(&context.path),
            },
            405 => GatewayError::MethodNotAllowed {
                method: context.method.clone(),
                resource_type: resource_type.to_string(),
            },
            _ => {
                let outcome = self.handler.handle_api_error(&body, status);
                GatewayError::Remote {
                    status,
                    message: outcome.error_message(),
                    outcome: Some(outcome),
                }
            }
        };
        Err(self.fail(err, resource_type, context))
    }

    fn fail(
        &self,
        err: GatewayError,
        resource_type: &str,
        context: &RequestContext,
    ) -> GatewayError {
        self.handler
            .log_failure(&err, Some(resource_type), Some(context));
        err
    }

    /// Rewrites remote-service URLs in a bundle to the portal's public base.
    ///
    /// Entry `fullUrl`s become `<public>/<resourceType>/<id>`; pagination
    /// link URLs have the remote endpoint prefix substituted. No-op when no
    /// public base is configured.
    fn rewrite_bundle_urls(&self, mut bundle: Value) -> Value {
        let Some(public) = &self.public_base_url else {
            return bundle;
        };

        if let Some(entries) = bundle.get_mut("entry").and_then(Value::as_array_mut) {
            for entry in entries {
                let resource_type = entry
                    .get("resource")
                    .and_then(|r| r.get("resourceType"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                if let (Some(resource_type), Some(full_url)) =
                    (resource_type, entry.get("fullUrl").and_then(Value::as_str))
                {
                    let id = last_path_segment(full_url);
                    entry["fullUrl"] =
                        Value::String(format!("{}/{}/{}", public, resource_type, id));
                }
            }
        }

        if let Some(links) = bundle.get_mut("link").and_then(Value::as_array_mut) {
            for link in links {
                if let Some(url) = link.get("url").and_then(Value::as_str) {
                    link["url"] = Value::String(url.replace(&self.base_url, public));
                }
            }
        }

        bundle
    }
}

fn required_type(resource: &Value) -> GatewayResult<String> {
    resource
        .get("resourceType")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| GatewayError::Validation {
            errors: [(
                "resourceType".to_string(),
                "Resource type is required".to_string(),
            )]
            .into_iter()
            .collect(),
        })
}

fn last_path_segment(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_required_type() {
        assert_eq!(
            required_type(&json!({"resourceType": "Patient"})).unwrap(),
            "Patient"
        );
        let err = required_type(&json!({})).unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));
    }

    #[test]
    fn test_last_path_segment() {
        assert_eq!(last_path_segment("Patient/abc-123"), "abc-123");
        assert_eq!(
            last_path_segment("https://fhir.example.org/Patient/abc/"),
            "abc"
        );
        assert_eq!(last_path_segment("abc"), "abc");
    }
}
