//! Fluent FHIR search query builder.
//!
//! Collects search intent through chained calls and serializes it
//! deterministically into the FHIR search grammar: comma-joined OR values,
//! `:modifier` suffixes, `_has` reverse chaining, `_include`/`_revinclude`,
//! paging (`_count`, continuation token), `_sort` with `-` for descending,
//! and `_summary`.
//!
//! ```rust
//! use msc_fhir_gateway::search::{SearchQueryBuilder, SortDirection};
//!
//! let query = SearchQueryBuilder::patient()
//!     .by_name("Smith")
//!     .param("status", "active")
//!     .limit(10)
//!     .order_by("_lastUpdated", SortDirection::Descending);
//!
//! assert_eq!(query.resource_type(), "Patient");
//! assert!(query.to_query_string().contains("_sort=-_lastUpdated"));
//! ```

use chrono::NaiveDate;
use serde_json::{Map, Value};

/// NPI identifier system used for practitioner lookups.
pub const NPI_SYSTEM: &str = "http://hl7.org/fhir/sid/us-npi";

/// Search parameter modifiers appended as `:modifier` to a parameter name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchModifier {
    /// Exact string match, case- and accent-sensitive.
    Exact,
    /// Case-insensitive substring match.
    Contains,
    /// Match against the text/display portion of the element.
    Text,
    /// Negated match.
    Not,
    /// Presence test (`true`/`false` value).
    Missing,
    /// Match the identifier a reference points at.
    Identifier,
    /// Restrict a reference parameter to one target type.
    Type(String),
}

impl SearchModifier {
    /// The modifier name as it appears after the colon.
    pub fn as_str(&self) -> &str {
        match self {
            SearchModifier::Exact => "exact",
            SearchModifier::Contains => "contains",
            SearchModifier::Text => "text",
            SearchModifier::Not => "not",
            SearchModifier::Missing => "missing",
            SearchModifier::Identifier => "identifier",
            SearchModifier::Type(t) => t,
        }
    }
}

/// Direction for a `_sort` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Values for the `_summary` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryMode {
    /// Summary elements only.
    True,
    /// Full resources (the default when absent).
    False,
    /// Narrative plus mandatory elements.
    Text,
    /// Everything except narrative.
    Data,
    /// Count only, no resources.
    Count,
}

impl SummaryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryMode::True => "true",
            SummaryMode::False => "false",
            SummaryMode::Text => "text",
            SummaryMode::Data => "data",
            SummaryMode::Count => "count",
        }
    }
}

/// A single search value, convertible from the types the portal works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchValue(String);

impl SearchValue {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn into_string(self) -> String {
        self.0
    }
}

impl From<&str> for SearchValue {
    fn from(v: &str) -> Self {
        SearchValue(v.to_string())
    }
}

impl From<String> for SearchValue {
    fn from(v: String) -> Self {
        SearchValue(v)
    }
}

impl From<&String> for SearchValue {
    fn from(v: &String) -> Self {
        SearchValue(v.clone())
    }
}

impl From<bool> for SearchValue {
    fn from(v: bool) -> Self {
        SearchValue(if v { "true" } else { "false" }.to_string())
    }
}

impl From<NaiveDate> for SearchValue {
    fn from(v: NaiveDate) -> Self {
        SearchValue(v.format("%Y-%m-%d").to_string())
    }
}

macro_rules! search_value_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for SearchValue {
            fn from(v: $t) -> Self {
                SearchValue(v.to_string())
            }
        })*
    };
}

search_value_from_int!(i32, i64, u32, u64, usize);

/// Builder for one FHIR search request.
///
/// All methods consume and return `self`, so queries are built in a single
/// expression. Repeated calls with the same parameter name append additional
/// OR values; [`SearchQueryBuilder::param_list`] replaces instead.
#[derive(Debug, Clone, Default)]
pub struct SearchQueryBuilder {
    resource_type: String,
    // Insertion-ordered so serialization is deterministic.
    params: Vec<(String, Vec<String>)>,
    includes: Vec<String>,
    revincludes: Vec<String>,
    count: Option<u32>,
    offset: Option<u32>,
    sort: Vec<String>,
    continuation: Option<String>,
    summary: Option<SummaryMode>,
}

impl SearchQueryBuilder {
    /// Starts a query against an arbitrary resource type.
    pub fn for_type(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            ..Self::default()
        }
    }

    /// Starts a Patient search.
    pub fn patient() -> Self {
        Self::for_type("Patient")
    }

    /// Starts a Practitioner search.
    pub fn practitioner() -> Self {
        Self::for_type("Practitioner")
    }

    /// Starts an Organization search.
    pub fn organization() -> Self {
        Self::for_type("Organization")
    }

    /// Starts an EpisodeOfCare search.
    pub fn episode_of_care() -> Self {
        Self::for_type("EpisodeOfCare")
    }

    /// Starts a Coverage search.
    pub fn coverage() -> Self {
        Self::for_type("Coverage")
    }

    /// The resource type this query targets.
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    fn push_value(&mut self, key: String, value: String) {
        if let Some((_, values)) = self.params.iter_mut().find(|(k, _)| *k == key) {
            values.push(value);
        } else {
            self.params.push((key, vec![value]));
        }
    }

    /// Adds a search parameter. Repeated calls with the same name accumulate
    /// OR values (comma-joined on serialization).
    pub fn param(mut self, key: impl Into<String>, value: impl Into<SearchValue>) -> Self {
        self.push_value(key.into(), value.into().into_string());
        self
    }

    /// Adds a search parameter with a modifier (`key:modifier=value`).
    pub fn param_with(
        mut self,
        key: impl Into<String>,
        value: impl Into<SearchValue>,
        modifier: SearchModifier,
    ) -> Self {
        let key = format!("{}:{}", key.into(), modifier.as_str());
        self.push_value(key, value.into().into_string());
        self
    }

    /// Replaces all values for `key` with the given list.
    pub fn param_list<I, V>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SearchValue>,
    {
        let key = key.into();
        let values: Vec<String> = values
            .into_iter()
            .map(|v| v.into().into_string())
            .collect();
        self.params.retain(|(k, _)| *k != key);
        self.params.push((key, values));
        self
    }

    /// `key:exact=value` shorthand.
    pub fn exact(self, key: impl Into<String>, value: impl Into<SearchValue>) -> Self {
        self.param_with(key, value, SearchModifier::Exact)
    }

    /// `key:contains=value` shorthand.
    pub fn contains(self, key: impl Into<String>, value: impl Into<SearchValue>) -> Self {
        self.param_with(key, value, SearchModifier::Contains)
    }

    /// Reference parameter in `Type/id` form.
    pub fn reference(
        self,
        key: impl Into<String>,
        resource_type: &str,
        id: &str,
    ) -> Self {
        self.param(key, format!("{}/{}", resource_type, id))
    }

    /// Identifier token search (`identifier=system|value`).
    pub fn identifier(self, system: &str, value: &str) -> Self {
        self.param("identifier", format!("{}|{}", system, value))
    }

    /// Token parameter with an optional system (`key=system|code` or
    /// `key=code`).
    pub fn token(self, key: impl Into<String>, system: Option<&str>, code: &str) -> Self {
        match system {
            Some(system) => self.param(key, format!("{}|{}", system, code)),
            None => self.param(key, code),
        }
    }

    /// Inclusive date range using `ge`/`le` prefixes. Either bound may be
    /// omitted for an open-ended range.
    pub fn date_range(
        mut self,
        key: impl Into<String>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Self {
        let key = key.into();
        if let Some(from) = from {
            self.push_value(key.clone(), format!("ge{}", from.format("%Y-%m-%d")));
        }
        if let Some(to) = to {
            self.push_value(key, format!("le{}", to.format("%Y-%m-%d")));
        }
        self
    }

    /// Composite parameter: parts joined with `$`.
    pub fn composite<I, V>(mut self, key: impl Into<String>, parts: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SearchValue>,
    {
        let joined = parts
            .into_iter()
            .map(|v| v.into().into_string())
            .collect::<Vec<_>>()
            .join("$");
        self.push_value(key.into(), joined);
        self
    }

    /// Reverse chaining: matches resources referenced by others
    /// (`_has:Resource:ref_param:param=value`).
    pub fn has(
        mut self,
        resource: &str,
        ref_param: &str,
        param: &str,
        value: impl Into<SearchValue>,
    ) -> Self {
        let key = format!("_has:{}:{}:{}", resource, ref_param, param);
        self.push_value(key, value.into().into_string());
        self
    }

    /// Includes referenced resources in the response bundle
    /// (`_include=Resource:reference`).
    pub fn include(mut self, resource: &str, reference: &str) -> Self {
        self.includes.push(format!("{}:{}", resource, reference));
        self
    }

    /// Includes resources that reference the matches
    /// (`_revinclude=Resource:reference`).
    pub fn rev_include(mut self, resource: &str, reference: &str) -> Self {
        self.revincludes.push(format!("{}:{}", resource, reference));
        self
    }

    /// Sets the page size (`_count`).
    pub fn limit(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    /// Sets the result offset.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Adds a sort directive. Descending parameters serialize with a `-`
    /// prefix.
    pub fn order_by(mut self, param: impl Into<String>, direction: SortDirection) -> Self {
        let param = param.into();
        self.sort.push(match direction {
            SortDirection::Ascending => param,
            SortDirection::Descending => format!("-{}", param),
        });
        self
    }

    /// Most recently updated first.
    pub fn latest(self) -> Self {
        self.order_by("_lastUpdated", SortDirection::Descending)
    }

    /// Least recently updated first.
    pub fn oldest(self) -> Self {
        self.order_by("_lastUpdated", SortDirection::Ascending)
    }

    /// Sets the opaque continuation token for the next page.
    pub fn continue_search(mut self, token: impl Into<String>) -> Self {
        self.continuation = Some(token.into());
        self
    }

    /// Asks for a match count only (`_summary=count`).
    pub fn count_only(mut self) -> Self {
        self.summary = Some(SummaryMode::Count);
        self
    }

    /// Asks for summary elements only (`_summary=true`).
    pub fn summary(mut self) -> Self {
        self.summary = Some(SummaryMode::True);
        self
    }

    /// Restricts results to the given logical IDs.
    pub fn ids<I, V>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SearchValue>,
    {
        self.param_list("_id", ids)
    }

    /// Filters by a tag in `meta.tag`.
    pub fn tag(self, system: Option<&str>, code: &str) -> Self {
        self.token("_tag", system, code)
    }

    /// Filters by a security label in `meta.security`.
    pub fn security(self, system: Option<&str>, code: &str) -> Self {
        self.token("_security", system, code)
    }

    /// Filters by declared profile.
    pub fn profile(self, url: &str) -> Self {
        self.param("_profile", url)
    }

    /// Full-text search over the narrative.
    pub fn text(self, value: impl Into<SearchValue>) -> Self {
        self.param("_text", value)
    }

    /// Full-text search over the entire resource content.
    pub fn content(self, value: impl Into<SearchValue>) -> Self {
        self.param("_content", value)
    }

    // Portal-specific sugar.

    /// Name search (server-side substring per FHIR default string matching).
    pub fn by_name(self, name: &str) -> Self {
        self.param("name", name)
    }

    /// Exact birth-date match.
    pub fn by_birth_date(self, date: NaiveDate) -> Self {
        self.param("birthdate", date)
    }

    /// Administrative gender filter.
    pub fn by_gender(self, gender: &str) -> Self {
        self.param("gender", gender)
    }

    /// Practitioner lookup by NPI number.
    pub fn by_npi(self, npi: &str) -> Self {
        self.identifier(NPI_SYSTEM, npi)
    }

    /// Status filter.
    pub fn by_status(self, status: &str) -> Self {
        self.param("status", status)
    }

    /// Filters by a `patient` reference.
    pub fn by_patient(self, patient_id: &str) -> Self {
        self.reference("patient", "Patient", patient_id)
    }

    /// Serializes the query to a JSON object of parameter name → value.
    ///
    /// Multi-valued parameters are comma-joined into a single string (FHIR
    /// OR semantics); `_include`/`_revinclude` stay as arrays because they
    /// repeat as separate pairs on the wire.
    pub fn build(&self) -> Map<String, Value> {
        let mut map = Map::new();
        for (key, values) in &self.params {
            if values.is_empty() {
                continue;
            }
            map.insert(key.clone(), Value::String(values.join(",")));
        }
        if !self.includes.is_empty() {
            map.insert(
                "_include".to_string(),
                Value::Array(
                    self.includes
                        .iter()
                        .map(|v| Value::String(v.clone()))
                        .collect(),
                ),
            );
        }
        if !self.revincludes.is_empty() {
            map.insert(
                "_revinclude".to_string(),
                Value::Array(
                    self.revincludes
                        .iter()
                        .map(|v| Value::String(v.clone()))
                        .collect(),
                ),
            );
        }
        if let Some(count) = self.count {
            map.insert("_count".to_string(), Value::String(count.to_string()));
        }
        if let Some(offset) = self.offset {
            map.insert("_offset".to_string(), Value::String(offset.to_string()));
        }
        if !self.sort.is_empty() {
            map.insert("_sort".to_string(), Value::String(self.sort.join(",")));
        }
        if let Some(token) = &self.continuation {
            map.insert("ct".to_string(), Value::String(token.clone()));
        }
        if let Some(summary) = self.summary {
            map.insert(
                "_summary".to_string(),
                Value::String(summary.as_str().to_string()),
            );
        }
        map
    }

    /// Serializes the query to a URL-encoded query string.
    ///
    /// Array-valued entries (`_include`/`_revinclude`) become repeated
    /// `key=value` pairs.
    pub fn to_query_string(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in self.build() {
            match value {
                Value::Array(values) => {
                    for value in values {
                        if let Value::String(s) = value {
                            serializer.append_pair(&key, &s);
                        }
                    }
                }
                Value::String(s) => {
                    serializer.append_pair(&key, &s);
                }
                other => {
                    serializer.append_pair(&key, &other.to_string());
                }
            }
        }
        serializer.finish()
    }

    /// Relative request path: `ResourceType?query`.
    pub fn to_path(&self) -> String {
        let query = self.to_query_string();
        if query.is_empty() {
            self.resource_type.clone()
        } else {
            format!("{}?{}", self.resource_type, query)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse_pairs(query: &str) -> Vec<(String, String)> {
        url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    fn parse_map(query: &str) -> HashMap<String, String> {
        parse_pairs(query).into_iter().collect()
    }

    #[test]
    fn test_basic_query_round_trip() {
        let query = SearchQueryBuilder::patient()
            .param("status", "active")
            .limit(10)
            .order_by("_lastUpdated", SortDirection::Descending);

        let parsed = parse_map(&query.to_query_string());
        assert_eq!(parsed["status"], "active");
        assert_eq!(parsed["_count"], "10");
        assert_eq!(parsed["_sort"], "-_lastUpdated");
    }

    #[test]
    fn test_repeated_param_joins_with_comma() {
        let query = SearchQueryBuilder::episode_of_care()
            .param("status", "active")
            .param("status", "finished");
        assert_eq!(
            query.build()["status"],
            Value::String("active,finished".to_string())
        );
    }

    #[test]
    fn test_param_list_replaces() {
        let query = SearchQueryBuilder::patient()
            .param("_id", "old")
            .ids(["a", "b", "c"]);
        assert_eq!(query.build()["_id"], Value::String("a,b,c".to_string()));
    }

    #[test]
    fn test_modifiers() {
        let query = SearchQueryBuilder::patient()
            .exact("family", "Smith")
            .contains("given", "jo");
        let built = query.build();
        assert_eq!(built["family:exact"], Value::String("Smith".to_string()));
        assert_eq!(built["given:contains"], Value::String("jo".to_string()));
    }

    #[test]
    fn test_reference_and_identifier() {
        let query = SearchQueryBuilder::coverage()
            .by_patient("abc-123")
            .identifier("http://example.org/member-id", "M-42");
        let built = query.build();
        assert_eq!(built["patient"], Value::String("Patient/abc-123".to_string()));
        assert_eq!(
            built["identifier"],
            Value::String("http://example.org/member-id|M-42".to_string())
        );
    }

    #[test]
    fn test_npi_lookup() {
        let query = SearchQueryBuilder::practitioner().by_npi("1234567890");
        assert_eq!(
            query.build()["identifier"],
            Value::String(format!("{}|1234567890", NPI_SYSTEM))
        );
    }

    #[test]
    fn test_date_range_prefixes() {
        let from = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        let query = SearchQueryBuilder::episode_of_care().date_range("date", Some(from), Some(to));
        assert_eq!(
            query.build()["date"],
            Value::String("ge2024-01-01,le2024-06-30".to_string())
        );

        let open = SearchQueryBuilder::episode_of_care().date_range("date", Some(from), None);
        assert_eq!(open.build()["date"], Value::String("ge2024-01-01".to_string()));
    }

    #[test]
    fn test_has_reverse_chain() {
        let query = SearchQueryBuilder::patient().has(
            "EpisodeOfCare",
            "patient",
            "status",
            "active",
        );
        assert_eq!(
            query.build()["_has:EpisodeOfCare:patient:status"],
            Value::String("active".to_string())
        );
    }

    #[test]
    fn test_includes_repeat_as_separate_pairs() {
        let query = SearchQueryBuilder::episode_of_care()
            .include("EpisodeOfCare", "patient")
            .include("EpisodeOfCare", "care-manager")
            .rev_include("Task", "focus");

        let pairs = parse_pairs(&query.to_query_string());
        let includes: Vec<&str> = pairs
            .iter()
            .filter(|(k, _)| k == "_include")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(includes, ["EpisodeOfCare:patient", "EpisodeOfCare:care-manager"]);
        assert!(pairs.contains(&("_revinclude".to_string(), "Task:focus".to_string())));
    }

    #[test]
    fn test_continuation_token() {
        let query = SearchQueryBuilder::patient().continue_search("opaque==token");
        assert_eq!(parse_map(&query.to_query_string())["ct"], "opaque==token");
    }

    #[test]
    fn test_summary_modes() {
        assert_eq!(
            SearchQueryBuilder::patient().count_only().build()["_summary"],
            Value::String("count".to_string())
        );
        assert_eq!(
            SearchQueryBuilder::patient().summary().build()["_summary"],
            Value::String("true".to_string())
        );
    }

    #[test]
    fn test_value_conversions() {
        let query = SearchQueryBuilder::patient()
            .param("active", true)
            .param("birthdate", NaiveDate::from_ymd_opt(1990, 1, 15).unwrap())
            .param("_count", 25);
        let built = query.build();
        assert_eq!(built["active"], Value::String("true".to_string()));
        assert_eq!(built["birthdate"], Value::String("1990-01-15".to_string()));
        assert_eq!(built["_count"], Value::String("25".to_string()));
    }

    #[test]
    fn test_to_path() {
        assert_eq!(SearchQueryBuilder::patient().to_path(), "Patient");
        let path = SearchQueryBuilder::patient().by_gender("female").to_path();
        assert_eq!(path, "Patient?gender=female");
    }

    #[test]
    fn test_composite() {
        let query =
            SearchQueryBuilder::for_type("Observation").composite("code-value-quantity", [
                "http://loinc.org|8480-6",
                "lt60",
            ]);
        assert_eq!(
            query.build()["code-value-quantity"],
            Value::String("http://loinc.org|8480-6$lt60".to_string())
        );
    }

    #[test]
    fn test_query_string_encodes_reserved_characters() {
        let query = SearchQueryBuilder::patient().identifier("http://example.org/mrn", "A 1");
        let qs = query.to_query_string();
        assert!(qs.contains("identifier="));
        assert!(!qs.contains(' '));
        assert!(!qs.contains("://"));
    }
}
