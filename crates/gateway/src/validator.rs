//! Pre-submission resource validation.
//!
//! Validates the FHIR resource subset the portal writes (Patient,
//! Practitioner, Organization, EpisodeOfCare, Coverage, Bundle) before it is
//! sent to the remote service. Checks are structural and field-level only;
//! terminology bindings and profile conformance are left to the remote
//! server. Results accumulate in a field-path → message map so a caller can
//! surface every problem in one pass.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};
use crate::search::NPI_SYSTEM;

/// Field-path keyed validation errors (e.g. `name.0` → message).
///
/// Ordered map so error output is deterministic.
pub type ValidationErrors = BTreeMap<String, String>;

static FHIR_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}(-(0[1-9]|1[0-2])(-(0[1-9]|[12]\d|3[01]))?)?$").unwrap()
});

static FHIR_DATETIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\d{4}-(0[1-9]|1[0-2])-(0[1-9]|[12]\d|3[01])T\d{2}:\d{2}:\d{2}(\.\d{3})?(Z|[+-]\d{2}:\d{2})$",
    )
    .unwrap()
});

static REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(https?://[^\s/]+/)?[A-Z][a-zA-Z]+/[A-Za-z0-9\-\.]{1,64}(/_history/[A-Za-z0-9\-\.]{1,64})?$",
    )
    .unwrap()
});

static PATIENT_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Patient/[A-Za-z0-9\-\.]{1,64}$").unwrap());

static NPI: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{10}$").unwrap());

/// Fields that must be present per resource type, in dot-path form.
static REQUIRED_FIELDS: Lazy<Vec<(&'static str, &'static [&'static str])>> = Lazy::new(|| {
    vec![
        ("Patient", &["name", "gender", "birthDate"] as &[_]),
        ("Practitioner", &["name"]),
        ("EpisodeOfCare", &["status", "patient"]),
        ("Coverage", &["status", "beneficiary", "payor"]),
        ("Bundle", &["type"]),
    ]
});

const VALID_GENDERS: [&str; 4] = ["male", "female", "other", "unknown"];
const VALID_EPISODE_STATUSES: [&str; 7] = [
    "planned",
    "waitlist",
    "active",
    "onhold",
    "finished",
    "cancelled",
    "entered-in-error",
];
const VALID_COVERAGE_STATUSES: [&str; 4] = ["active", "cancelled", "draft", "entered-in-error"];
const VALID_BUNDLE_TYPES: [&str; 9] = [
    "document",
    "message",
    "transaction",
    "transaction-response",
    "batch",
    "batch-response",
    "history",
    "searchset",
    "collection",
];

/// Validator for outbound FHIR resources.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceValidator {
    strict: bool,
}

impl ResourceValidator {
    /// Creates a validator in lenient mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a validator in strict mode.
    ///
    /// Strict mode additionally requires an NPI identifier on Practitioner
    /// resources.
    pub fn strict() -> Self {
        Self { strict: true }
    }

    /// Validates `resource`, optionally against an expected type.
    ///
    /// When `resource_type` is `None` the type is taken from the payload's
    /// `resourceType`. Returns an empty map when the resource is valid.
    pub fn validate(&self, resource: &Value, resource_type: Option<&str>) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        let declared = resource.get("resourceType").and_then(Value::as_str);
        let Some(expected) = resource_type.or(declared) else {
            errors.insert(
                "resourceType".to_string(),
                "Resource type is required".to_string(),
            );
            return errors;
        };

        self.check_structure(resource, expected, &mut errors);
        self.check_required_fields(resource, expected, &mut errors);

        match expected {
            "Patient" => self.check_patient(resource, &mut errors),
            "Practitioner" => self.check_practitioner(resource, &mut errors),
            "Organization" => self.check_organization(resource, &mut errors),
            "EpisodeOfCare" => self.check_episode_of_care(resource, &mut errors),
            "Coverage" => self.check_coverage(resource, &mut errors),
            "Bundle" => self.check_bundle(resource, &mut errors),
            _ => {}
        }

        errors
    }

    /// Validates and converts any errors into [`GatewayError::Validation`].
    pub fn validate_or_reject(
        &self,
        resource: &Value,
        resource_type: Option<&str>,
    ) -> GatewayResult<()> {
        let errors = self.validate(resource, resource_type);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::Validation { errors })
        }
    }

    fn check_structure(&self, resource: &Value, expected: &str, errors: &mut ValidationErrors) {
        match resource.get("resourceType").and_then(Value::as_str) {
            Some(declared) if declared == expected => {}
            _ => {
                errors.insert(
                    "resourceType".to_string(),
                    format!("Resource type must be '{}'", expected),
                );
            }
        }
        if let Some(meta) = resource.get("meta") {
            if !meta.is_object() {
                errors.insert("meta".to_string(), "Meta must be an object".to_string());
            }
        }
    }

    fn check_required_fields(
        &self,
        resource: &Value,
        resource_type: &str,
        errors: &mut ValidationErrors,
    ) {
        let Some((_, fields)) = REQUIRED_FIELDS.iter().find(|(t, _)| *t == resource_type)
        else {
            return;
        };
        for field in *fields {
            if !has_field(resource, field) {
                errors.insert(field.to_string(), format!("The {} field is required", field));
            }
        }
    }

    fn check_patient(&self, resource: &Value, errors: &mut ValidationErrors) {
        if let Some(name) = resource.get("name") {
            match name.as_array() {
                Some(names) if !names.is_empty() => {
                    for (index, name) in names.iter().enumerate() {
                        if !name.is_object() {
                            errors.insert(
                                format!("name.{}", index),
                                "Each name must be an object".to_string(),
                            );
                        } else if name.get("family").is_none() && name.get("given").is_none() {
                            errors.insert(
                                format!("name.{}", index),
                                "Name must have family or given name".to_string(),
                            );
                        }
                    }
                }
                _ => {
                    errors.insert(
                        "name".to_string(),
                        "Name must be a non-empty array".to_string(),
                    );
                }
            }
        }

        if let Some(gender) = resource.get("gender").and_then(Value::as_str) {
            if !VALID_GENDERS.contains(&gender) {
                errors.insert(
                    "gender".to_string(),
                    format!("Gender must be one of: {}", VALID_GENDERS.join(", ")),
                );
            }
        }

        if let Some(birth_date) = resource.get("birthDate").and_then(Value::as_str) {
            if !FHIR_DATE.is_match(birth_date) {
                errors.insert(
                    "birthDate".to_string(),
                    "Birth date must be in FHIR date format".to_string(),
                );
            }
        }

        if let Some(identifiers) = resource.get("identifier").and_then(Value::as_array) {
            for (index, identifier) in identifiers.iter().enumerate() {
                if identifier.get("system").is_none() || identifier.get("value").is_none() {
                    errors.insert(
                        format!("identifier.{}", index),
                        "Identifier must have system and value".to_string(),
                    );
                }
            }
        }
    }

    fn check_practitioner(&self, resource: &Value, errors: &mut ValidationErrors) {
        if let Some(identifiers) = resource.get("identifier").and_then(Value::as_array) {
            let mut has_npi = false;
            for identifier in identifiers {
                let system = identifier.get("system").and_then(Value::as_str);
                if system == Some(NPI_SYSTEM) {
                    has_npi = true;
                    let value = identifier
                        .get("value")
                        .and_then(Value::as_str)
                        .unwrap_or("");
                    if !NPI.is_match(value) {
                        errors.insert(
                            "identifier.npi".to_string(),
                            "NPI must be 10 digits".to_string(),
                        );
                    }
                }
            }
            if !has_npi && self.strict {
                errors.insert(
                    "identifier".to_string(),
                    "NPI identifier is required".to_string(),
                );
            }
        }
    }

    fn check_organization(&self, resource: &Value, errors: &mut ValidationErrors) {
        if let Some(types) = resource.get("type").and_then(Value::as_array) {
            for (index, concept) in types.iter().enumerate() {
                if !concept.get("coding").is_some_and(Value::is_array) {
                    errors.insert(
                        format!("type.{}", index),
                        "Type must contain coding array".to_string(),
                    );
                }
            }
        }

        if let Some(addresses) = resource.get("address").and_then(Value::as_array) {
            for (index, address) in addresses.iter().enumerate() {
                let has_component = address.get("line").is_some()
                    || address.get("city").is_some()
                    || address.get("state").is_some();
                if !has_component {
                    errors.insert(
                        format!("address.{}", index),
                        "Address must have at least one component".to_string(),
                    );
                }
            }
        }
    }

    fn check_episode_of_care(&self, resource: &Value, errors: &mut ValidationErrors) {
        if let Some(status) = resource.get("status").and_then(Value::as_str) {
            if !VALID_EPISODE_STATUSES.contains(&status) {
                errors.insert("status".to_string(), "Invalid episode status".to_string());
            }
        }

        if let Some(patient) = resource.get("patient") {
            match patient.get("reference").and_then(Value::as_str) {
                None => {
                    errors.insert(
                        "patient".to_string(),
                        "Patient must have a reference".to_string(),
                    );
                }
                Some(reference) if !PATIENT_REFERENCE.is_match(reference) => {
                    errors.insert(
                        "patient.reference".to_string(),
                        "Invalid patient reference format".to_string(),
                    );
                }
                Some(_) => {}
            }
        }

        if let Some(period) = resource.get("period") {
            if period.get("start").is_none() {
                errors.insert(
                    "period.start".to_string(),
                    "Period must have a start date".to_string(),
                );
            }
        }
    }

    fn check_coverage(&self, resource: &Value, errors: &mut ValidationErrors) {
        if let Some(status) = resource.get("status").and_then(Value::as_str) {
            if !VALID_COVERAGE_STATUSES.contains(&status) {
                errors.insert("status".to_string(), "Invalid coverage status".to_string());
            }
        }

        if let Some(beneficiary) = resource.get("beneficiary") {
            if beneficiary.get("reference").is_none() {
                errors.insert(
                    "beneficiary".to_string(),
                    "Beneficiary must have a reference".to_string(),
                );
            }
        }

        if let Some(payor) = resource.get("payor") {
            match payor.as_array() {
                Some(payors) if !payors.is_empty() => {}
                _ => {
                    errors.insert(
                        "payor".to_string(),
                        "Payor must be a non-empty array".to_string(),
                    );
                }
            }
        }
    }

    fn check_bundle(&self, resource: &Value, errors: &mut ValidationErrors) {
        let bundle_type = resource.get("type").and_then(Value::as_str);
        if let Some(bundle_type) = bundle_type {
            if !VALID_BUNDLE_TYPES.contains(&bundle_type) {
                errors.insert("type".to_string(), "Invalid bundle type".to_string());
            }
        }

        if let Some(entry) = resource.get("entry") {
            match entry.as_array() {
                Some(entries) => {
                    let transactional = matches!(bundle_type, Some("transaction") | Some("batch"));
                    if transactional {
                        for (index, entry) in entries.iter().enumerate() {
                            if entry.get("request").is_none() {
                                errors.insert(
                                    format!("entry.{}.request", index),
                                    "Transaction entries must have a request".to_string(),
                                );
                            }
                        }
                    }
                }
                None => {
                    errors.insert("entry".to_string(), "Entry must be an array".to_string());
                }
            }
        }
    }
}

/// Checks whether a literal reference is well-formed
/// (`[base/]Type/id[/_history/vid]`).
pub fn is_valid_reference(reference: &str) -> bool {
    REFERENCE.is_match(reference)
}

/// Checks a FHIR `date` (year, year-month, or full date).
pub fn is_valid_date(date: &str) -> bool {
    FHIR_DATE.is_match(date)
}

/// Checks a FHIR `dateTime` with seconds precision and a timezone.
pub fn is_valid_datetime(datetime: &str) -> bool {
    FHIR_DATETIME.is_match(datetime)
}

/// Dot-path presence check; numeric segments index into arrays. An explicit
/// JSON `null` leaf counts as absent.
fn has_field(resource: &Value, path: &str) -> bool {
    let mut current = resource;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => match map.get(segment) {
                Some(value) => value,
                None => return false,
            },
            Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                Some(value) => value,
                None => return false,
            },
            _ => return false,
        };
    }
    !current.is_null()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_patient() -> Value {
        json!({
            "resourceType": "Patient",
            "name": [{"family": "Doe", "given": ["Jane"]}],
            "gender": "female",
            "birthDate": "1990-01-15"
        })
    }

    #[test]
    fn test_valid_patient_passes() {
        let errors = ResourceValidator::new().validate(&valid_patient(), None);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    }

    #[test]
    fn test_missing_resource_type() {
        let errors = ResourceValidator::new().validate(&json!({"name": []}), None);
        assert_eq!(errors["resourceType"], "Resource type is required");
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_resource_type_mismatch() {
        let errors =
            ResourceValidator::new().validate(&valid_patient(), Some("Practitioner"));
        assert_eq!(errors["resourceType"], "Resource type must be 'Practitioner'");
    }

    #[test]
    fn test_patient_missing_required_fields() {
        let errors = ResourceValidator::new().validate(
            &json!({"resourceType": "Patient", "name": [{"family": "Doe"}]}),
            None,
        );
        assert_eq!(errors["gender"], "The gender field is required");
        assert_eq!(errors["birthDate"], "The birthDate field is required");
        assert!(!errors.contains_key("name"));
    }

    #[test]
    fn test_patient_invalid_gender_and_birth_date() {
        let mut patient = valid_patient();
        patient["gender"] = json!("F");
        patient["birthDate"] = json!("01/15/1990");
        let errors = ResourceValidator::new().validate(&patient, None);
        assert_eq!(
            errors["gender"],
            "Gender must be one of: male, female, other, unknown"
        );
        assert_eq!(errors["birthDate"], "Birth date must be in FHIR date format");
    }

    #[test]
    fn test_patient_out_of_range_birth_date_rejected() {
        let mut patient = valid_patient();
        patient["birthDate"] = json!("1990-13-40");
        let errors = ResourceValidator::new().validate(&patient, None);
        assert_eq!(errors["birthDate"], "Birth date must be in FHIR date format");

        for date in ["1990-00", "1990-12-32", "1990-02-00"] {
            let mut patient = valid_patient();
            patient["birthDate"] = json!(date);
            let errors = ResourceValidator::new().validate(&patient, None);
            assert!(errors.contains_key("birthDate"), "{} accepted", date);
        }
    }

    #[test]
    fn test_null_required_field_counts_as_missing() {
        let mut patient = valid_patient();
        patient["gender"] = Value::Null;
        let errors = ResourceValidator::new().validate(&patient, None);
        assert_eq!(errors["gender"], "The gender field is required");
    }

    #[test]
    fn test_patient_partial_birth_dates_are_valid() {
        for date in ["1990", "1990-01"] {
            let mut patient = valid_patient();
            patient["birthDate"] = json!(date);
            let errors = ResourceValidator::new().validate(&patient, None);
            assert!(errors.is_empty(), "{} rejected: {:?}", date, errors);
        }
    }

    #[test]
    fn test_patient_name_entries_checked_by_index() {
        let mut patient = valid_patient();
        patient["name"] = json!([{"family": "Doe"}, {"use": "nickname"}]);
        let errors = ResourceValidator::new().validate(&patient, None);
        assert_eq!(errors["name.1"], "Name must have family or given name");
        assert!(!errors.contains_key("name.0"));
    }

    #[test]
    fn test_patient_identifier_needs_system_and_value() {
        let mut patient = valid_patient();
        patient["identifier"] = json!([
            {"system": "http://example.org/mrn", "value": "42"},
            {"value": "orphan"}
        ]);
        let errors = ResourceValidator::new().validate(&patient, None);
        assert_eq!(errors["identifier.1"], "Identifier must have system and value");
        assert!(!errors.contains_key("identifier.0"));
    }

    #[test]
    fn test_practitioner_npi_format() {
        let practitioner = json!({
            "resourceType": "Practitioner",
            "name": [{"family": "Reyes"}],
            "identifier": [{"system": NPI_SYSTEM, "value": "12345"}]
        });
        let errors = ResourceValidator::new().validate(&practitioner, None);
        assert_eq!(errors["identifier.npi"], "NPI must be 10 digits");
    }

    #[test]
    fn test_strict_mode_requires_npi() {
        let practitioner = json!({
            "resourceType": "Practitioner",
            "name": [{"family": "Reyes"}],
            "identifier": [{"system": "http://example.org/emp", "value": "E-1"}]
        });
        let lenient = ResourceValidator::new().validate(&practitioner, None);
        assert!(lenient.is_empty());
        let strict = ResourceValidator::strict().validate(&practitioner, None);
        assert_eq!(strict["identifier"], "NPI identifier is required");
    }

    #[test]
    fn test_episode_of_care_rules() {
        let episode = json!({
            "resourceType": "EpisodeOfCare",
            "status": "paused",
            "patient": {"reference": "patient/abc"},
            "period": {"end": "2024-06-01"}
        });
        let errors = ResourceValidator::new().validate(&episode, None);
        assert_eq!(errors["status"], "Invalid episode status");
        assert_eq!(errors["patient.reference"], "Invalid patient reference format");
        assert_eq!(errors["period.start"], "Period must have a start date");
    }

    #[test]
    fn test_coverage_rules() {
        let coverage = json!({
            "resourceType": "Coverage",
            "status": "suspended",
            "beneficiary": {"display": "Jane Doe"},
            "payor": []
        });
        let errors = ResourceValidator::new().validate(&coverage, None);
        assert_eq!(errors["status"], "Invalid coverage status");
        assert_eq!(errors["beneficiary"], "Beneficiary must have a reference");
        assert_eq!(errors["payor"], "Payor must be a non-empty array");
    }

    #[test]
    fn test_transaction_bundle_entries_need_requests() {
        let bundle = json!({
            "resourceType": "Bundle",
            "type": "transaction",
            "entry": [
                {"request": {"method": "POST", "url": "Patient"}},
                {"resource": {"resourceType": "Patient"}}
            ]
        });
        let errors = ResourceValidator::new().validate(&bundle, None);
        assert_eq!(
            errors["entry.1.request"],
            "Transaction entries must have a request"
        );
        assert!(!errors.contains_key("entry.0.request"));
    }

    #[test]
    fn test_searchset_bundle_entries_are_unconstrained() {
        let bundle = json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "entry": [{"resource": {"resourceType": "Patient"}}]
        });
        assert!(ResourceValidator::new().validate(&bundle, None).is_empty());
    }

    #[test]
    fn test_validate_or_reject_wraps_errors() {
        let err = ResourceValidator::new()
            .validate_or_reject(&json!({"resourceType": "Patient"}), None)
            .unwrap_err();
        match err {
            GatewayError::Validation { errors } => {
                assert!(errors.contains_key("name"));
                assert!(errors.contains_key("gender"));
                assert!(errors.contains_key("birthDate"));
            }
            other => panic!("expected Validation, got {:?}", other),
        }
    }

    #[test]
    fn test_reference_patterns() {
        assert!(is_valid_reference("Patient/abc-123"));
        assert!(is_valid_reference("https://fhir.example.org/Patient/abc"));
        assert!(is_valid_reference("Patient/abc/_history/2"));
        assert!(!is_valid_reference("patient/abc"));
        assert!(!is_valid_reference("Patient/"));
    }

    #[test]
    fn test_date_pattern_bounds() {
        assert!(is_valid_date("1990"));
        assert!(is_valid_date("1990-01"));
        assert!(is_valid_date("1990-12-31"));
        assert!(!is_valid_date("1990-13-40"));
        assert!(!is_valid_date("1990-00-01"));
        assert!(!is_valid_date("1990-01-32"));
    }

    #[test]
    fn test_datetime_pattern() {
        assert!(is_valid_datetime("2024-06-01T12:30:00Z"));
        assert!(is_valid_datetime("2024-06-01T12:30:00.123+05:30"));
        assert!(!is_valid_datetime("2024-06-01T12:30"));
        assert!(!is_valid_datetime("2024-06-01"));
        assert!(!is_valid_datetime("2024-13-40T12:30:00Z"));
    }

    #[test]
    fn test_nested_field_paths() {
        let resource = json!({"period": {"start": "2024-01-01"}, "name": [{"family": "X"}]});
        assert!(has_field(&resource, "period.start"));
        assert!(has_field(&resource, "name.0.family"));
        assert!(!has_field(&resource, "period.end"));
        assert!(!has_field(&resource, "name.1"));
        assert!(!has_field(&json!({"gender": null}), "gender"));
    }
}
