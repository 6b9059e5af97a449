// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The backend contract: typed endpoint requests and responses, and the
//! [`BackendClient`] trait the retrieval adapters are written against.
//!
//! The engine core never talks HTTP directly; it drives a `BackendClient`.
//! [`HttpBackendClient`] is the production implementation, and tests provide
//! in-memory implementations that serve pages from fixtures.

mod http;

pub use http::HttpBackendClient;

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::Result;

/// A low-level response as seen by the retry layer: status, the parsed
/// `Retry-After` header if present, and the raw body.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub status: u16,
    pub retry_after: Option<u64>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }
}

/// A transport-level failure that never carries an HTTP status.
///
/// These stay inside the retry layer: timeouts and connection failures are
/// retried until the budget runs out and are only ever surfaced wrapped in
/// the terminal retry error.
#[derive(Debug)]
pub enum TransportError {
    /// The per-call I/O timeout elapsed.
    Timeout(String),
    /// The connection could not be established or was reset.
    Connection(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TransportError::Timeout(detail) => write!(f, "request timed out: {detail}"),
            TransportError::Connection(detail) => write!(f, "connection failed: {detail}"),
        }
    }
}

impl std::error::Error for TransportError {}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

impl PageRequest {
    pub fn first(limit: usize) -> Self {
        Self {
            limit,
            next_page_token: None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextPage {
    #[serde(default)]
    pub next_page_token: Option<String>,
}

// --- POST /search-leaderboard-entries ---------------------------------------

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchEntriesRequest {
    pub project_identifier: String,
    /// `run` or `experiment`; experiment searches return lineage heads only.
    pub types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<SortRequest>,
    pub pagination: PageRequest,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SortRequest {
    pub name: String,
    pub r#type: String,
    /// `ascending` or `descending`.
    pub direction: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchEntriesResponse {
    pub entries: Vec<SearchEntry>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchEntry {
    pub sys_id: String,
    #[serde(default)]
    pub sys_name: Option<String>,
    #[serde(default)]
    pub custom_run_id: Option<String>,
}

// --- POST /query-attribute-definitions-within-project -----------------------

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryAttributeDefinitionsRequest {
    pub project_identifiers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_ids_filter: Option<Vec<String>>,
    pub attribute_name_filter: AttributeNameFilter,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute_filter: Option<Vec<AttributeTypeFilter>>,
    pub next_page: PageRequest,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeNameFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub must_match_regexes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub must_not_match_regexes: Option<Vec<String>>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeTypeFilter {
    pub attribute_type: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryAttributeDefinitionsResponse {
    pub entries: Vec<AttributeDefinitionEntry>,
    #[serde(default)]
    pub next_page: NextPage,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDefinitionEntry {
    pub name: String,
    pub r#type: String,
}

// --- POST /query-attributes-within-project ----------------------------------

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryAttributeValuesRequest {
    pub project_identifier: String,
    /// Fully qualified run identifiers (`project/sys_id`).
    pub experiment_ids_filter: Vec<String>,
    pub attribute_names_filter: Vec<String>,
    pub next_page: PageRequest,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryAttributeValuesResponse {
    pub entries: Vec<AttributeValuesEntry>,
    #[serde(default)]
    pub next_page: NextPage,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeValuesEntry {
    pub experiment_short_id: String,
    pub attributes: Vec<AttributeValueDto>,
}

/// The backend's typed attribute union. Exactly one of the `*_properties`
/// members is populated, selected by `type`; unknown tags leave all of them
/// empty and are skipped by the decoder.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeValueDto {
    pub name: String,
    pub r#type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub float_properties: Option<ScalarFloat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub int_properties: Option<ScalarInt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_properties: Option<ScalarString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bool_properties: Option<ScalarBool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime_properties: Option<ScalarDatetime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_set_properties: Option<StringSetProperties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_ref_properties: Option<FileRefDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub float_series_properties: Option<FloatSeriesProperties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_series_properties: Option<StringSeriesProperties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_ref_series_properties: Option<FileRefSeriesProperties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub histogram_series_properties: Option<HistogramSeriesProperties>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ScalarFloat {
    pub value: f64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ScalarInt {
    pub value: i64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ScalarString {
    pub value: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ScalarBool {
    pub value: bool,
}

/// Epoch milliseconds; converted to UTC at the decoding boundary.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ScalarDatetime {
    pub value: i64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StringSetProperties {
    pub value: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRefDto {
    pub path: String,
    pub size_bytes: u64,
    pub mime_type: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FloatSeriesProperties {
    pub last: f64,
    pub min: f64,
    pub max: f64,
    pub average: f64,
    pub variance: f64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StringSeriesProperties {
    #[serde(default)]
    pub last: Option<String>,
    #[serde(default)]
    pub last_step: Option<f64>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRefSeriesProperties {
    #[serde(default)]
    pub last: Option<FileRefDto>,
    #[serde(default)]
    pub last_step: Option<f64>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramSeriesProperties {
    #[serde(default)]
    pub last: Option<HistogramDto>,
    #[serde(default)]
    pub last_step: Option<f64>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HistogramDto {
    pub r#type: String,
    pub edges: Vec<f64>,
    pub values: Vec<f64>,
}

// --- POST /float-series-values ----------------------------------------------

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FloatSeriesValuesRequest {
    pub requests: Vec<FloatSeriesRequestEntry>,
    pub step_range: StepRange,
    /// `ascending` or `descending`.
    pub order: String,
    pub per_series_points_limit: usize,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FloatSeriesRequestEntry {
    pub request_id: String,
    pub series: SeriesIdentifier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_step: Option<f64>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesIdentifier {
    pub holder: SeriesHolder,
    pub attribute: String,
    /// `FULL` walks the lineage to the root; `NONE` stays on the head run.
    pub lineage: String,
    pub include_preview: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesHolder {
    pub identifier: String,
    pub r#type: String,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct StepRange {
    pub from: Option<f64>,
    pub to: Option<f64>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FloatSeriesValuesResponse {
    pub series: Vec<FloatSeriesEntry>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FloatSeriesEntry {
    pub request_id: String,
    pub values: Vec<FloatPointDto>,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FloatPointDto {
    pub timestamp_millis: i64,
    pub step: f64,
    pub value: f64,
    #[serde(default)]
    pub is_preview: bool,
    #[serde(default = "completion_ratio_complete")]
    pub completion_ratio: f64,
}

fn completion_ratio_complete() -> f64 {
    1.0
}

// --- POST /series-values (non-numeric series) -------------------------------

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesValuesRequest {
    pub requests: Vec<FloatSeriesRequestEntry>,
    pub step_range: StepRange,
    pub order: String,
    pub per_series_points_limit: usize,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesValuesResponse {
    pub series: Vec<SeriesEntry>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesEntry {
    pub request_id: String,
    pub values: Vec<SeriesPointDto>,
}

/// A non-numeric series point; exactly one of the value members is set.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPointDto {
    pub step: f64,
    pub timestamp_millis: i64,
    #[serde(default)]
    pub string_value: Option<String>,
    #[serde(default)]
    pub file_ref: Option<FileRefDto>,
    #[serde(default)]
    pub histogram: Option<HistogramDto>,
}

/// The backend endpoints the engine consumes.
///
/// Implementations are responsible for authentication, transport-level
/// encoding, and retrying transient failures; callers see either a decoded
/// response or a terminal error from the taxonomy.
pub trait BackendClient: Send + Sync {
    fn search_entries(
        &self,
        request: SearchEntriesRequest,
    ) -> impl Future<Output = Result<SearchEntriesResponse>> + Send;

    fn query_attribute_definitions(
        &self,
        request: QueryAttributeDefinitionsRequest,
    ) -> impl Future<Output = Result<QueryAttributeDefinitionsResponse>> + Send;

    fn query_attribute_values(
        &self,
        request: QueryAttributeValuesRequest,
    ) -> impl Future<Output = Result<QueryAttributeValuesResponse>> + Send;

    fn float_series_values(
        &self,
        request: FloatSeriesValuesRequest,
    ) -> impl Future<Output = Result<FloatSeriesValuesResponse>> + Send;

    fn series_values(
        &self,
        request: SeriesValuesRequest,
    ) -> impl Future<Output = Result<SeriesValuesResponse>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_omits_absent_token() {
        let body = serde_json::to_value(PageRequest::first(500)).unwrap();
        assert_eq!(body, serde_json::json!({"limit": 500}));
    }

    #[test]
    fn search_request_serializes_camel_case() {
        let request = SearchEntriesRequest {
            project_identifier: "team/project".into(),
            types: vec!["experiment".into()],
            query: Some("`sys/name`:string == \"exp\"".into()),
            sort_by: Some(SortRequest {
                name: "sys/creation_time".into(),
                r#type: "datetime".into(),
                direction: "descending".into(),
            }),
            pagination: PageRequest::first(100),
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["projectIdentifier"], "team/project");
        assert_eq!(body["sortBy"]["direction"], "descending");
        assert_eq!(body["pagination"]["limit"], 100);
    }

    #[test]
    fn float_point_defaults_mark_committed_points() {
        let point: FloatPointDto =
            serde_json::from_str(r#"{"timestampMillis": 1, "step": 2.0, "value": 3.0}"#).unwrap();
        assert!(!point.is_preview);
        assert_eq!(point.completion_ratio, 1.0);
    }

    #[test]
    fn attribute_value_union_decodes_one_member() {
        let raw = r#"{
            "name": "metrics/loss",
            "type": "floatSeries",
            "floatSeriesProperties": {"last": 0.5, "min": 0.1, "max": 1.0, "average": 0.4, "variance": 0.02}
        }"#;
        let dto: AttributeValueDto = serde_json::from_str(raw).unwrap();
        assert_eq!(dto.r#type, "floatSeries");
        assert!(dto.float_series_properties.is_some());
        assert!(dto.int_properties.is_none());
    }
}
