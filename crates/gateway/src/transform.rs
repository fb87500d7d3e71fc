//! Response normalization into flat, portal-friendly DTOs.
//!
//! The remote service returns deeply nested FHIR JSON; the portal consumes
//! flat shapes with computed conveniences (display name, age, policy label).
//! [`transform`] dispatches on `resourceType` to a resource-specific DTO and
//! falls back to [`GenericDto`] for anything else; [`transform_bundle`]
//! normalizes a whole searchset. All DTOs serialize in camelCase and are
//! read-only snapshots of the source payload.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::search::NPI_SYSTEM;

/// Extension URLs under this namespace are flattened into the DTO's
/// `extensions` map; everything else is dropped.
pub const CUSTOM_EXTENSION_NAMESPACE: &str = "http://mscwoundcare.com/";

/// Resource version/provenance block.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetaDto {
    pub version_id: Option<String>,
    pub last_updated: Option<String>,
    pub source: Option<String>,
    pub profile: Vec<Value>,
    pub security: Vec<Value>,
    pub tag: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IdentifierDto {
    pub system: Option<String>,
    pub value: Option<String>,
    pub r#type: Option<CodeableConceptDto>,
    pub r#use: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeableConceptDto {
    pub coding: Vec<Value>,
    pub text: Option<String>,
}

/// Relationship pointer; never resolved eagerly.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceDto {
    pub reference: Option<String>,
    pub r#type: Option<String>,
    pub display: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeriodDto {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HumanNameDto {
    pub r#use: String,
    pub text: Option<String>,
    pub family: Option<String>,
    pub given: Vec<String>,
    pub prefix: Vec<String>,
    pub suffix: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddressDto {
    pub r#use: String,
    pub r#type: String,
    pub text: Option<String>,
    pub line: Vec<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContactPointDto {
    pub system: Option<String>,
    pub value: Option<String>,
    pub r#use: Option<String>,
}

/// Phone/email split out of `telecom` with use-context preserved.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatientContactDto {
    pub phone: Vec<ContactPointEntry>,
    pub email: Vec<ContactPointEntry>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContactPointEntry {
    pub value: String,
    pub r#use: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientDto {
    pub id: Option<String>,
    pub resource_type: &'static str,
    pub identifier: Vec<IdentifierDto>,
    pub name: Vec<HumanNameDto>,
    pub display_name: String,
    pub gender: String,
    pub birth_date: Option<String>,
    pub age: Option<i64>,
    pub contact: PatientContactDto,
    pub address: Vec<AddressDto>,
    pub active: bool,
    pub meta: MetaDto,
    pub extensions: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualificationDto {
    pub identifier: Vec<IdentifierDto>,
    pub code: Option<CodeableConceptDto>,
    pub period: PeriodDto,
    pub issuer: Option<ReferenceDto>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PractitionerDto {
    pub id: Option<String>,
    pub resource_type: &'static str,
    pub identifier: Vec<IdentifierDto>,
    pub npi: Option<String>,
    pub name: Vec<HumanNameDto>,
    pub display_name: String,
    pub contact: Vec<ContactPointDto>,
    pub qualification: Vec<QualificationDto>,
    pub active: bool,
    pub meta: MetaDto,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationDto {
    pub id: Option<String>,
    pub resource_type: &'static str,
    pub identifier: Vec<IdentifierDto>,
    pub npi: Option<String>,
    pub name: String,
    pub r#type: Vec<CodeableConceptDto>,
    pub contact: Vec<ContactPointDto>,
    pub address: Vec<AddressDto>,
    pub active: bool,
    pub meta: MetaDto,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisDto {
    pub condition: Option<ReferenceDto>,
    pub role: Option<CodeableConceptDto>,
    pub rank: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeOfCareDto {
    pub id: Option<String>,
    pub resource_type: &'static str,
    pub status: String,
    pub r#type: Vec<CodeableConceptDto>,
    pub patient: Option<ReferenceDto>,
    pub managing_organization: Option<ReferenceDto>,
    pub period: PeriodDto,
    pub diagnosis: Vec<DiagnosisDto>,
    pub team: Vec<ReferenceDto>,
    pub meta: MetaDto,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageClassDto {
    pub r#type: Option<CodeableConceptDto>,
    pub value: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageDto {
    pub id: Option<String>,
    pub resource_type: &'static str,
    pub status: String,
    pub r#type: Option<CodeableConceptDto>,
    pub policy_type: &'static str,
    pub subscriber: Option<ReferenceDto>,
    pub subscriber_id: Option<String>,
    pub beneficiary: Option<ReferenceDto>,
    pub payor: Vec<ReferenceDto>,
    pub period: PeriodDto,
    pub order: i64,
    pub class: Vec<CoverageClassDto>,
    pub meta: MetaDto,
}

/// Fallback shape for resource types without a dedicated DTO. Keeps the raw
/// payload under `data`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericDto {
    pub id: Option<String>,
    pub resource_type: String,
    pub meta: MetaDto,
    pub data: Value,
}

/// One transformed resource.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResourceDto {
    Patient(PatientDto),
    Practitioner(PractitionerDto),
    Organization(OrganizationDto),
    EpisodeOfCare(EpisodeOfCareDto),
    Coverage(CoverageDto),
    Other(GenericDto),
}

/// Normalized searchset bundle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleDto {
    #[serde(rename = "type")]
    pub bundle_type: String,
    pub total: i64,
    pub timestamp: String,
    pub entries: Vec<ResourceDto>,
    pub links: BTreeMap<String, String>,
}

/// Transforms one resource, dispatching on `resourceType`.
pub fn transform(resource: &Value) -> ResourceDto {
    match resource.get("resourceType").and_then(Value::as_str) {
        Some("Patient") => ResourceDto::Patient(transform_patient(resource)),
        Some("Practitioner") => ResourceDto::Practitioner(transform_practitioner(resource)),
        Some("Organization") => ResourceDto::Organization(transform_organization(resource)),
        Some("EpisodeOfCare") => ResourceDto::EpisodeOfCare(transform_episode_of_care(resource)),
        Some("Coverage") => ResourceDto::Coverage(transform_coverage(resource)),
        _ => ResourceDto::Other(transform_generic(resource)),
    }
}

/// Transforms a list of resources.
pub fn transform_collection(resources: &[Value]) -> Vec<ResourceDto> {
    resources.iter().map(transform).collect()
}

/// Normalizes a bundle: entries are transformed individually and the
/// pagination links (`self`, `next`, `previous`, `first`, `last`) are lifted
/// into a flat map.
pub fn transform_bundle(bundle: &Value) -> BundleDto {
    let entries = bundle
        .get("entry")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .map(|entry| transform(entry.get("resource").unwrap_or(&Value::Null)))
                .collect()
        })
        .unwrap_or_default();

    let mut links = BTreeMap::new();
    if let Some(bundle_links) = bundle.get("link").and_then(Value::as_array) {
        for link in bundle_links {
            let relation = link.get("relation").and_then(Value::as_str).unwrap_or("");
            if matches!(relation, "self" | "next" | "previous" | "first" | "last") {
                let url = link.get("url").and_then(Value::as_str).unwrap_or("");
                links.insert(relation.to_string(), url.to_string());
            }
        }
    }

    BundleDto {
        bundle_type: str_field(bundle, "type").unwrap_or_else(|| "unknown".to_string()),
        total: bundle.get("total").and_then(Value::as_i64).unwrap_or(0),
        timestamp: str_field(bundle, "timestamp")
            .unwrap_or_else(|| Utc::now().to_rfc3339()),
        entries,
        links,
    }
}

fn transform_patient(patient: &Value) -> PatientDto {
    let names = patient.get("name").and_then(Value::as_array);
    let birth_date = str_field(patient, "birthDate");
    let age = birth_date
        .as_deref()
        .and_then(|d| age_on(d, Utc::now().date_naive()));
    PatientDto {
        id: str_field(patient, "id"),
        resource_type: "Patient",
        identifier: extract_identifiers(patient.get("identifier")),
        name: extract_names(names),
        display_name: display_name(names),
        gender: str_field(patient, "gender").unwrap_or_else(|| "unknown".to_string()),
        birth_date,
        age,
        contact: extract_patient_contact(patient.get("telecom")),
        address: extract_addresses(patient.get("address")),
        active: patient.get("active").and_then(Value::as_bool).unwrap_or(true),
        meta: extract_meta(patient.get("meta")),
        extensions: extract_extensions(patient.get("extension")),
    }
}

fn transform_practitioner(practitioner: &Value) -> PractitionerDto {
    let names = practitioner.get("name").and_then(Value::as_array);
    PractitionerDto {
        id: str_field(practitioner, "id"),
        resource_type: "Practitioner",
        identifier: extract_identifiers(practitioner.get("identifier")),
        npi: extract_npi(practitioner.get("identifier")),
        name: extract_names(names),
        display_name: display_name(names),
        contact: extract_telecom(practitioner.get("telecom")),
        qualification: extract_qualifications(practitioner.get("qualification")),
        active: practitioner
            .get("active")
            .and_then(Value::as_bool)
            .unwrap_or(true),
        meta: extract_meta(practitioner.get("meta")),
    }
}

fn transform_organization(organization: &Value) -> OrganizationDto {
    OrganizationDto {
        id: str_field(organization, "id"),
        resource_type: "Organization",
        identifier: extract_identifiers(organization.get("identifier")),
        npi: extract_npi(organization.get("identifier")),
        name: str_field(organization, "name")
            .unwrap_or_else(|| "Unknown Organization".to_string()),
        r#type: extract_concepts(organization.get("type")),
        contact: extract_telecom(organization.get("telecom")),
        address: extract_addresses(organization.get("address")),
        active: organization
            .get("active")
            .and_then(Value::as_bool)
            .unwrap_or(true),
        meta: extract_meta(organization.get("meta")),
    }
}

fn transform_episode_of_care(episode: &Value) -> EpisodeOfCareDto {
    EpisodeOfCareDto {
        id: str_field(episode, "id"),
        resource_type: "EpisodeOfCare",
        status: str_field(episode, "status").unwrap_or_else(|| "unknown".to_string()),
        r#type: extract_concepts(episode.get("type")),
        patient: extract_reference(episode.get("patient")),
        managing_organization: extract_reference(episode.get("managingOrganization")),
        period: extract_period(episode.get("period")),
        diagnosis: extract_diagnoses(episode.get("diagnosis")),
        team: extract_references(episode.get("team")),
        meta: extract_meta(episode.get("meta")),
    }
}

fn transform_coverage(coverage: &Value) -> CoverageDto {
    let order = coverage.get("order").and_then(Value::as_i64).unwrap_or(1);
    CoverageDto {
        id: str_field(coverage, "id"),
        resource_type: "Coverage",
        status: str_field(coverage, "status").unwrap_or_else(|| "unknown".to_string()),
        r#type: extract_concept(coverage.get("type")),
        policy_type: policy_type(order),
        subscriber: extract_reference(coverage.get("subscriber")),
        subscriber_id: str_field(coverage, "subscriberId"),
        beneficiary: extract_reference(coverage.get("beneficiary")),
        payor: extract_references(coverage.get("payor")),
        period: extract_period(coverage.get("period")),
        order,
        class: extract_coverage_classes(coverage.get("class")),
        meta: extract_meta(coverage.get("meta")),
    }
}

fn transform_generic(resource: &Value) -> GenericDto {
    GenericDto {
        id: str_field(resource, "id"),
        resource_type: str_field(resource, "resourceType")
            .unwrap_or_else(|| "Unknown".to_string()),
        meta: extract_meta(resource.get("meta")),
        data: resource.clone(),
    }
}

/// Policy label derived from the coverage's numeric order.
fn policy_type(order: i64) -> &'static str {
    match order {
        1 => "primary",
        2 => "secondary",
        3 => "tertiary",
        _ => "other",
    }
}

/// Age in whole years at `on`, or `None` when the birth date cannot yield a
/// definite answer.
///
/// Full dates compute exactly. A year-month date resolves only when the
/// reference month differs from the birth month (the day within the birth
/// month is unknown, so the same month is ambiguous). Year-only dates never
/// resolve.
pub fn age_on(birth_date: &str, on: NaiveDate) -> Option<i64> {
    if let Ok(date) = NaiveDate::parse_from_str(birth_date, "%Y-%m-%d") {
        let mut age = i64::from(on.year()) - i64::from(date.year());
        if (on.month(), on.day()) < (date.month(), date.day()) {
            age -= 1;
        }
        return (age >= 0).then_some(age);
    }

    let mut parts = birth_date.splitn(2, '-');
    let year: i32 = parts.next()?.parse().ok()?;
    let Some(month_part) = parts.next() else {
        // Year-only: off by up to a year either way.
        return None;
    };
    let month: u32 = month_part.parse().ok()?;
    if !(1..=12).contains(&month) || month == on.month() {
        return None;
    }
    let mut age = i64::from(on.year()) - i64::from(year);
    if on.month() < month {
        age -= 1;
    }
    (age >= 0).then_some(age)
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn extract_identifiers(identifiers: Option<&Value>) -> Vec<IdentifierDto> {
    identifiers
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|identifier| IdentifierDto {
                    system: str_field(identifier, "system"),
                    value: str_field(identifier, "value"),
                    r#type: extract_concept(identifier.get("type")),
                    r#use: str_field(identifier, "use"),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn extract_npi(identifiers: Option<&Value>) -> Option<String> {
    identifiers
        .and_then(Value::as_array)?
        .iter()
        .find(|identifier| {
            identifier.get("system").and_then(Value::as_str) == Some(NPI_SYSTEM)
        })
        .and_then(|identifier| str_field(identifier, "value"))
}

fn extract_names(names: Option<&Vec<Value>>) -> Vec<HumanNameDto> {
    names
        .map(|names| {
            names
                .iter()
                .map(|name| HumanNameDto {
                    r#use: str_field(name, "use").unwrap_or_else(|| "official".to_string()),
                    text: str_field(name, "text"),
                    family: str_field(name, "family"),
                    given: string_list(name.get("given")),
                    prefix: string_list(name.get("prefix")),
                    suffix: string_list(name.get("suffix")),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Display name from the first name entry: explicit `text` wins, otherwise
/// prefix + given + family + suffix joined with spaces, otherwise "Unknown".
fn display_name(names: Option<&Vec<Value>>) -> String {
    let Some(primary) = names.and_then(|names| names.first()) else {
        return "Unknown".to_string();
    };

    if let Some(text) = primary.get("text").and_then(Value::as_str) {
        return text.to_string();
    }

    let mut parts = Vec::new();
    parts.extend(string_list(primary.get("prefix")));
    parts.extend(string_list(primary.get("given")));
    if let Some(family) = primary.get("family").and_then(Value::as_str) {
        parts.push(family.to_string());
    }
    parts.extend(string_list(primary.get("suffix")));

    if parts.is_empty() {
        "Unknown".to_string()
    } else {
        parts.join(" ")
    }
}

fn extract_patient_contact(telecom: Option<&Value>) -> PatientContactDto {
    let mut contact = PatientContactDto::default();
    let Some(points) = telecom.and_then(Value::as_array) else {
        return contact;
    };
    for point in points {
        let system = point.get("system").and_then(Value::as_str).unwrap_or("");
        let Some(value) = point.get("value").and_then(Value::as_str) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        let entry = ContactPointEntry {
            value: value.to_string(),
            r#use: str_field(point, "use").unwrap_or_else(|| "home".to_string()),
        };
        match system {
            "phone" => contact.phone.push(entry),
            "email" => contact.email.push(entry),
            _ => {}
        }
    }
    contact
}

fn extract_telecom(telecom: Option<&Value>) -> Vec<ContactPointDto> {
    telecom
        .and_then(Value::as_array)
        .map(|points| {
            points
                .iter()
                .map(|point| ContactPointDto {
                    system: str_field(point, "system"),
                    value: str_field(point, "value"),
                    r#use: str_field(point, "use"),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn extract_addresses(addresses: Option<&Value>) -> Vec<AddressDto> {
    addresses
        .and_then(Value::as_array)
        .map(|addresses| {
            addresses
                .iter()
                .map(|address| AddressDto {
                    r#use: str_field(address, "use").unwrap_or_else(|| "home".to_string()),
                    r#type: str_field(address, "type")
                        .unwrap_or_else(|| "physical".to_string()),
                    text: str_field(address, "text"),
                    line: string_list(address.get("line")),
                    city: str_field(address, "city"),
                    state: str_field(address, "state"),
                    postal_code: str_field(address, "postalCode"),
                    country: str_field(address, "country").unwrap_or_else(|| "USA".to_string()),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn extract_concept(concept: Option<&Value>) -> Option<CodeableConceptDto> {
    let concept = concept?;
    if !concept.is_object() {
        return None;
    }
    Some(CodeableConceptDto {
        coding: concept
            .get("coding")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        text: str_field(concept, "text"),
    })
}

fn extract_concepts(concepts: Option<&Value>) -> Vec<CodeableConceptDto> {
    concepts
        .and_then(Value::as_array)
        .map(|concepts| {
            concepts
                .iter()
                .filter_map(|concept| extract_concept(Some(concept)))
                .collect()
        })
        .unwrap_or_default()
}

fn extract_reference(reference: Option<&Value>) -> Option<ReferenceDto> {
    let reference = reference?;
    if !reference.is_object() {
        return None;
    }
    Some(ReferenceDto {
        reference: str_field(reference, "reference"),
        r#type: str_field(reference, "type"),
        display: str_field(reference, "display"),
    })
}

fn extract_references(references: Option<&Value>) -> Vec<ReferenceDto> {
    references
        .and_then(Value::as_array)
        .map(|references| {
            references
                .iter()
                .filter_map(|reference| extract_reference(Some(reference)))
                .collect()
        })
        .unwrap_or_default()
}

fn extract_period(period: Option<&Value>) -> PeriodDto {
    period
        .map(|period| PeriodDto {
            start: str_field(period, "start"),
            end: str_field(period, "end"),
        })
        .unwrap_or_default()
}

fn extract_meta(meta: Option<&Value>) -> MetaDto {
    meta.map(|meta| MetaDto {
        version_id: str_field(meta, "versionId"),
        last_updated: str_field(meta, "lastUpdated"),
        source: str_field(meta, "source"),
        profile: meta
            .get("profile")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        security: meta
            .get("security")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        tag: meta
            .get("tag")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
    })
    .unwrap_or_default()
}

fn extract_diagnoses(diagnoses: Option<&Value>) -> Vec<DiagnosisDto> {
    diagnoses
        .and_then(Value::as_array)
        .map(|diagnoses| {
            diagnoses
                .iter()
                .map(|diagnosis| DiagnosisDto {
                    condition: extract_reference(diagnosis.get("condition")),
                    role: extract_concept(diagnosis.get("role")),
                    rank: diagnosis.get("rank").and_then(Value::as_i64),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn extract_qualifications(qualifications: Option<&Value>) -> Vec<QualificationDto> {
    qualifications
        .and_then(Value::as_array)
        .map(|qualifications| {
            qualifications
                .iter()
                .map(|qualification| QualificationDto {
                    identifier: extract_identifiers(qualification.get("identifier")),
                    code: extract_concept(qualification.get("code")),
                    period: extract_period(qualification.get("period")),
                    issuer: extract_reference(qualification.get("issuer")),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn extract_coverage_classes(classes: Option<&Value>) -> Vec<CoverageClassDto> {
    classes
        .and_then(Value::as_array)
        .map(|classes| {
            classes
                .iter()
                .map(|class| CoverageClassDto {
                    r#type: extract_concept(class.get("type")),
                    value: str_field(class, "value"),
                    name: str_field(class, "name"),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Flattens extensions under the custom namespace into a key → value map.
///
/// The key is the last path segment of the extension URL. Nested extensions
/// recurse into a sub-object; leaf extensions take their first `value*`
/// field. Extensions outside the namespace are dropped.
fn extract_extensions(extensions: Option<&Value>) -> BTreeMap<String, Value> {
    let mut extracted = BTreeMap::new();
    let Some(extensions) = extensions.and_then(Value::as_array) else {
        return extracted;
    };
    for extension in extensions {
        let url = extension.get("url").and_then(Value::as_str).unwrap_or("");
        if url.starts_with(CUSTOM_EXTENSION_NAMESPACE) {
            extracted.insert(last_segment(url).to_string(), extension_value(extension));
        }
    }
    extracted
}

fn extension_value(extension: &Value) -> Value {
    if let Some(nested) = extension.get("extension").and_then(Value::as_array) {
        let mut map = Map::new();
        for ext in nested {
            let url = ext.get("url").and_then(Value::as_str).unwrap_or("unknown");
            map.insert(last_segment(url).to_string(), extension_value(ext));
        }
        return Value::Object(map);
    }
    if let Some(object) = extension.as_object() {
        for (key, value) in object {
            if key.starts_with("value") {
                return value.clone();
            }
        }
    }
    Value::Null
}

fn last_segment(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}
