//! Round-trip tests against a local mock of the remote FHIR service.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use msc_fhir_client::{ClientConfig, FhirClient};
use msc_fhir_gateway::search::SearchQueryBuilder;
use msc_fhir_gateway::store::InMemoryStore;
use msc_fhir_gateway::transform::ResourceDto;
use msc_fhir_gateway::{CircuitState, GatewayError};

#[derive(Clone)]
struct MockState {
    hits: Arc<AtomicU32>,
    base_url: Arc<std::sync::RwLock<String>>,
}

async fn read_patient(
    State(state): State<MockState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    if headers.get("authorization").map(|v| v.to_str().unwrap_or("")) != Some("Bearer test-token") {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "no token"})));
    }
    if id == "pat-1" {
        (
            StatusCode::OK,
            Json(json!({
                "resourceType": "Patient",
                "id": "pat-1",
                "name": [{"family": "Doe", "given": ["Jane"]}],
                "gender": "female",
                "birthDate": "1990-01-01"
            })),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({
                "resourceType": "OperationOutcome",
                "issue": [{
                    "severity": "error",
                    "code": "not-found",
                    "details": {"text": "unknown patient"}
                }]
            })),
        )
    }
}

async fn search_patients(State(state): State<MockState>) -> Json<Value> {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let base = state.base_url.read().unwrap().clone();
    Json(json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": 1,
        "entry": [{
            "fullUrl": format!("{}/Patient/pat-1", base),
            "resource": {
                "resourceType": "Patient",
                "id": "pat-1",
                "name": [{"family": "Doe", "given": ["Jane"]}]
            }
        }],
        "link": [
            {"relation": "self", "url": format!("{}/Patient?name=Doe", base)},
            {"relation": "next", "url": format!("{}/Patient?ct=token123", base)}
        ]
    }))
}

async fn create_patient(State(state): State<MockState>, Json(mut body): Json<Value>) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    body["id"] = json!("created-1");
    (StatusCode::CREATED, Json(body))
}

async fn always_failing(State(state): State<MockState>) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"message": "maintenance window"})),
    )
}

/// Starts the mock service and returns its base URL plus the hit counter.
async fn start_mock() -> (String, Arc<AtomicU32>) {
    let hits = Arc::new(AtomicU32::new(0));
    let base_url = Arc::new(std::sync::RwLock::new(String::new()));
    let state = MockState {
        hits: hits.clone(),
        base_url: base_url.clone(),
    };

    let app = Router::new()
        .route("/Patient/{id}", get(read_patient))
        .route("/Patient", get(search_patients).post(create_patient))
        .route("/Task", get(always_failing))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("http://{}", addr);
    *base_url.write().unwrap() = url.clone();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (url, hits)
}

fn config_for(endpoint: &str) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.endpoint = endpoint.to_string();
    config.access_token = Some("test-token".to_string());
    config
}

#[tokio::test]
async fn read_returns_resource_or_none() {
    let (url, _hits) = start_mock().await;
    let client = FhirClient::new(&config_for(&url), Arc::new(InMemoryStore::new())).unwrap();

    let patient = client.read("Patient", "pat-1").await.unwrap().unwrap();
    assert_eq!(patient["id"], json!("pat-1"));

    assert!(client.read("Patient", "missing").await.unwrap().is_none());
}

#[tokio::test]
async fn patient_read_produces_dto() {
    let (url, _hits) = start_mock().await;
    let client = FhirClient::new(&config_for(&url), Arc::new(InMemoryStore::new())).unwrap();

    let Some(ResourceDto::Patient(dto)) = client.patient("pat-1").await.unwrap() else {
        panic!("expected Patient dto");
    };
    assert_eq!(dto.display_name, "Jane Doe");
    assert_eq!(dto.gender, "female");
}

#[tokio::test]
async fn missing_token_surfaces_as_authentication_error() {
    let (url, _hits) = start_mock().await;
    let mut config = config_for(&url);
    config.access_token = Some("wrong".to_string());
    let client = FhirClient::new(&config, Arc::new(InMemoryStore::new())).unwrap();

    let err = client.read("Patient", "pat-1").await.unwrap_err();
    assert!(matches!(err, GatewayError::Authentication { .. }));
}

#[tokio::test]
async fn search_rewrites_remote_urls_to_public_base() {
    let (url, _hits) = start_mock().await;
    let mut config = config_for(&url);
    config.public_base_url = Some("https://portal.example.org/fhir".to_string());
    let client = FhirClient::new(&config, Arc::new(InMemoryStore::new())).unwrap();

    let raw = client
        .search_raw(&SearchQueryBuilder::patient().by_name("Doe"))
        .await
        .unwrap();
    assert_eq!(
        raw["entry"][0]["fullUrl"],
        json!("https://portal.example.org/fhir/Patient/pat-1")
    );
    assert_eq!(
        raw["link"][1]["url"],
        json!("https://portal.example.org/fhir/Patient?ct=token123")
    );

    let bundle = client
        .search(&SearchQueryBuilder::patient().by_name("Doe"))
        .await
        .unwrap();
    assert_eq!(bundle.total, 1);
    assert!(bundle.links["next"].starts_with("https://portal.example.org/fhir"));
}

#[tokio::test]
async fn invalid_create_never_reaches_the_wire() {
    let (url, hits) = start_mock().await;
    let client = FhirClient::new(&config_for(&url), Arc::new(InMemoryStore::new())).unwrap();

    let invalid = json!({
        "resourceType": "Patient",
        "name": [{"use": "official"}],
        "gender": "neither",
        "birthDate": "1990-01-01"
    });
    let err = client.create(&invalid).await.unwrap_err();
    let GatewayError::Validation { errors } = err else {
        panic!("expected Validation, got {:?}", err);
    };
    assert!(errors.contains_key("gender"));
    assert!(errors.contains_key("name.0"));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn valid_create_round_trips() {
    let (url, _hits) = start_mock().await;
    let client = FhirClient::new(&config_for(&url), Arc::new(InMemoryStore::new())).unwrap();

    let patient = json!({
        "resourceType": "Patient",
        "name": [{"family": "Doe", "given": ["Jane"]}],
        "gender": "female",
        "birthDate": "1990-01-01"
    });
    let created = client.create(&patient).await.unwrap();
    assert_eq!(created["id"], json!("created-1"));
}

#[tokio::test]
async fn server_errors_trip_the_breaker() {
    let (url, hits) = start_mock().await;
    let mut config = config_for(&url);
    config.failure_threshold = 2;
    config.recovery_timeout = 300;
    let client = FhirClient::new(&config, Arc::new(InMemoryStore::new())).unwrap();
    let query = SearchQueryBuilder::for_type("Task");

    for _ in 0..2 {
        let err = client.search_raw(&query).await.unwrap_err();
        let GatewayError::Remote { status, outcome, .. } = err else {
            panic!("expected Remote error");
        };
        assert_eq!(status, 503);
        assert_eq!(outcome.unwrap().issue[0].code, "transient");
    }
    assert_eq!(client.breaker_status().await.state, CircuitState::Open);

    // The third call is rejected before reaching the server.
    let err = client.search_raw(&query).await.unwrap_err();
    assert!(matches!(err, GatewayError::CircuitOpen { .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}
