// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An in-memory backend for end-to-end pipeline tests.
//!
//! The mock serves search, definition, value, and series pages from fixture
//! runs, honoring pagination, name regexes, type filters, step ranges, and
//! per-series point limits the way the real backend does. Filter queries are
//! matched structurally: a query naming `sys/name` or `sys/custom_run_id`
//! selects runs whose label appears as a quoted literal; any other query
//! matches every run.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Mutex;

use neptune_query_engine::transport::{
    AttributeValueDto, BackendClient, FloatPointDto, FloatSeriesEntry, FloatSeriesValuesRequest,
    FloatSeriesValuesResponse, QueryAttributeDefinitionsRequest, QueryAttributeDefinitionsResponse,
    QueryAttributeValuesRequest, QueryAttributeValuesResponse, ScalarBool, ScalarFloat, ScalarInt,
    ScalarString, SearchEntriesRequest, SearchEntriesResponse, SearchEntry, SeriesEntry,
    SeriesPointDto, SeriesValuesRequest, SeriesValuesResponse, StepRange, StringSeriesProperties,
    FloatSeriesProperties, AttributeDefinitionEntry, AttributeValuesEntry, NextPage,
};
use neptune_query_engine::Error;

type Result<T> = std::result::Result<T, Error>;

/// One fixture run/experiment.
#[derive(Clone, Debug, Default)]
pub struct MockRun {
    pub sys_id: String,
    pub experiment_name: String,
    pub custom_run_id: String,
    pub attributes: Vec<AttributeValueDto>,
    pub float_series: Vec<(String, Vec<FloatPointDto>)>,
    pub string_series: Vec<(String, Vec<SeriesPointDto>)>,
}

impl MockRun {
    pub fn new(sys_id: &str, experiment_name: &str) -> Self {
        Self {
            sys_id: sys_id.to_string(),
            experiment_name: experiment_name.to_string(),
            custom_run_id: format!("{experiment_name}-run"),
            ..Self::default()
        }
    }

    pub fn with_attribute(mut self, attribute: AttributeValueDto) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_float_series(mut self, path: &str, points: Vec<FloatPointDto>) -> Self {
        self.float_series.push((path.to_string(), points));
        self
    }

    pub fn with_string_series(mut self, path: &str, points: Vec<SeriesPointDto>) -> Self {
        self.string_series.push((path.to_string(), points));
        self
    }

    /// Every `(name, wire type)` definition present on this run.
    fn definitions(&self) -> Vec<(String, String)> {
        let mut definitions = Vec::new();
        for attribute in &self.attributes {
            definitions.push((attribute.name.clone(), attribute.r#type.clone()));
        }
        for (path, _) in &self.float_series {
            definitions.push((path.clone(), "floatSeries".to_string()));
        }
        for (path, _) in &self.string_series {
            definitions.push((path.clone(), "stringSeries".to_string()));
        }
        definitions
    }
}

/// Call counters for assertions on pipeline behavior.
#[derive(Debug, Default)]
pub struct CallLog {
    pub search_calls: usize,
    pub definition_calls: usize,
    pub value_calls: usize,
    pub float_series_calls: usize,
    pub series_calls: usize,
}

pub struct MockBackend {
    runs: Vec<MockRun>,
    pub log: Mutex<CallLog>,
}

impl MockBackend {
    pub fn new(runs: Vec<MockRun>) -> Self {
        Self {
            runs,
            log: Mutex::new(CallLog::default()),
        }
    }

    fn run_by_identifier(&self, identifier: &str) -> Option<&MockRun> {
        let sys_id = identifier.rsplit('/').next()?;
        self.runs.iter().find(|run| run.sys_id == sys_id)
    }

    fn matching_runs(&self, query: Option<&str>) -> Vec<&MockRun> {
        let Some(query) = query else {
            return self.runs.iter().collect();
        };
        if !query.contains("`sys/name`") && !query.contains("`sys/custom_run_id`") {
            return self.runs.iter().collect();
        }
        self.runs
            .iter()
            .filter(|run| {
                query.contains(&format!("\"{}\"", run.experiment_name))
                    || query.contains(&format!("\"{}\"", run.custom_run_id))
            })
            .collect()
    }
}

fn paginate<T: Clone>(items: &[T], limit: usize, token: Option<&str>) -> (Vec<T>, Option<String>) {
    let start: usize = token.and_then(|t| t.parse().ok()).unwrap_or(0);
    let end = (start + limit).min(items.len());
    let page = items[start..end].to_vec();
    let next = (end < items.len()).then(|| end.to_string());
    (page, next)
}

fn within(step: f64, range: &StepRange) -> bool {
    range.from.is_none_or(|from| step >= from) && range.to.is_none_or(|to| step <= to)
}

impl BackendClient for MockBackend {
    async fn search_entries(&self, request: SearchEntriesRequest) -> Result<SearchEntriesResponse> {
        self.log.lock().unwrap().search_calls += 1;
        let entries: Vec<SearchEntry> = self
            .matching_runs(request.query.as_deref())
            .into_iter()
            .map(|run| SearchEntry {
                sys_id: run.sys_id.clone(),
                sys_name: Some(run.experiment_name.clone()),
                custom_run_id: Some(run.custom_run_id.clone()),
            })
            .collect();
        let (entries, next_page_token) = paginate(
            &entries,
            request.pagination.limit,
            request.pagination.next_page_token.as_deref(),
        );
        Ok(SearchEntriesResponse {
            entries,
            next_page_token,
        })
    }

    async fn query_attribute_definitions(
        &self,
        request: QueryAttributeDefinitionsRequest,
    ) -> Result<QueryAttributeDefinitionsResponse> {
        self.log.lock().unwrap().definition_calls += 1;

        let scope: Vec<&MockRun> = match &request.experiment_ids_filter {
            Some(identifiers) => identifiers
                .iter()
                .filter_map(|identifier| self.run_by_identifier(identifier))
                .collect(),
            None => self.runs.iter().collect(),
        };

        let must_match: Vec<regex::Regex> = request
            .attribute_name_filter
            .must_match_regexes
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|pattern| regex::Regex::new(pattern).expect("mock received invalid regex"))
            .collect();
        let must_not_match: Vec<regex::Regex> = request
            .attribute_name_filter
            .must_not_match_regexes
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|pattern| regex::Regex::new(pattern).expect("mock received invalid regex"))
            .collect();
        let allowed_types: Option<BTreeSet<&str>> = request
            .attribute_filter
            .as_ref()
            .map(|types| types.iter().map(|t| t.attribute_type.as_str()).collect());

        let mut seen = BTreeSet::new();
        let mut entries = Vec::new();
        for run in scope {
            for (name, r#type) in run.definitions() {
                if !must_match.iter().all(|regex| regex.is_match(&name)) {
                    continue;
                }
                if must_not_match.iter().any(|regex| regex.is_match(&name)) {
                    continue;
                }
                if let Some(allowed) = &allowed_types {
                    if !allowed.contains(r#type.as_str()) {
                        continue;
                    }
                }
                if seen.insert((name.clone(), r#type.clone())) {
                    entries.push(AttributeDefinitionEntry { name, r#type });
                }
            }
        }

        let (entries, next_page_token) = paginate(
            &entries,
            request.next_page.limit,
            request.next_page.next_page_token.as_deref(),
        );
        Ok(QueryAttributeDefinitionsResponse {
            entries,
            next_page: NextPage { next_page_token },
        })
    }

    async fn query_attribute_values(
        &self,
        request: QueryAttributeValuesRequest,
    ) -> Result<QueryAttributeValuesResponse> {
        self.log.lock().unwrap().value_calls += 1;

        let names: BTreeSet<&str> = request
            .attribute_names_filter
            .iter()
            .map(String::as_str)
            .collect();
        let entries: Vec<AttributeValuesEntry> = request
            .experiment_ids_filter
            .iter()
            .filter_map(|identifier| self.run_by_identifier(identifier))
            .map(|run| AttributeValuesEntry {
                experiment_short_id: run.sys_id.clone(),
                attributes: run
                    .attributes
                    .iter()
                    .filter(|attribute| names.contains(attribute.name.as_str()))
                    .cloned()
                    .collect(),
            })
            .collect();

        Ok(QueryAttributeValuesResponse {
            entries,
            next_page: NextPage {
                next_page_token: None,
            },
        })
    }

    async fn float_series_values(
        &self,
        request: FloatSeriesValuesRequest,
    ) -> Result<FloatSeriesValuesResponse> {
        self.log.lock().unwrap().float_series_calls += 1;

        let descending = request.order == "descending";
        let series = request
            .requests
            .iter()
            .map(|entry| {
                let mut points: Vec<FloatPointDto> = self
                    .run_by_identifier(&entry.series.holder.identifier)
                    .and_then(|run| {
                        run.float_series
                            .iter()
                            .find(|(path, _)| *path == entry.series.attribute)
                            .map(|(_, points)| points.clone())
                    })
                    .unwrap_or_default();
                points.retain(|point| within(point.step, &request.step_range));
                points.sort_by(|a, b| a.step.total_cmp(&b.step));
                if descending {
                    points.reverse();
                }
                if let Some(after) = entry.after_step {
                    points.retain(|point| {
                        if descending {
                            point.step < after
                        } else {
                            point.step > after
                        }
                    });
                }
                points.truncate(request.per_series_points_limit);
                FloatSeriesEntry {
                    request_id: entry.request_id.clone(),
                    values: points,
                }
            })
            .collect();

        Ok(FloatSeriesValuesResponse { series })
    }

    async fn series_values(&self, request: SeriesValuesRequest) -> Result<SeriesValuesResponse> {
        self.log.lock().unwrap().series_calls += 1;

        let descending = request.order == "descending";
        let series = request
            .requests
            .iter()
            .map(|entry| {
                let mut points: Vec<SeriesPointDto> = self
                    .run_by_identifier(&entry.series.holder.identifier)
                    .and_then(|run| {
                        run.string_series
                            .iter()
                            .find(|(path, _)| *path == entry.series.attribute)
                            .map(|(_, points)| points.clone())
                    })
                    .unwrap_or_default();
                points.retain(|point| within(point.step, &request.step_range));
                points.sort_by(|a, b| a.step.total_cmp(&b.step));
                if descending {
                    points.reverse();
                }
                if let Some(after) = entry.after_step {
                    points.retain(|point| {
                        if descending {
                            point.step < after
                        } else {
                            point.step > after
                        }
                    });
                }
                points.truncate(request.per_series_points_limit);
                SeriesEntry {
                    request_id: entry.request_id.clone(),
                    values: points,
                }
            })
            .collect();

        Ok(SeriesValuesResponse { series })
    }
}

// --- fixture helpers --------------------------------------------------------

pub fn string_attribute(name: &str, value: &str) -> AttributeValueDto {
    AttributeValueDto {
        name: name.to_string(),
        r#type: "string".to_string(),
        string_properties: Some(ScalarString {
            value: value.to_string(),
        }),
        ..AttributeValueDto::default()
    }
}

pub fn int_attribute(name: &str, value: i64) -> AttributeValueDto {
    AttributeValueDto {
        name: name.to_string(),
        r#type: "int".to_string(),
        int_properties: Some(ScalarInt { value }),
        ..AttributeValueDto::default()
    }
}

pub fn float_attribute(name: &str, value: f64) -> AttributeValueDto {
    AttributeValueDto {
        name: name.to_string(),
        r#type: "float".to_string(),
        float_properties: Some(ScalarFloat { value }),
        ..AttributeValueDto::default()
    }
}

pub fn bool_attribute(name: &str, value: bool) -> AttributeValueDto {
    AttributeValueDto {
        name: name.to_string(),
        r#type: "bool".to_string(),
        bool_properties: Some(ScalarBool { value }),
        ..AttributeValueDto::default()
    }
}

pub fn float_series_attribute(name: &str, last: f64, average: f64) -> AttributeValueDto {
    AttributeValueDto {
        name: name.to_string(),
        r#type: "floatSeries".to_string(),
        float_series_properties: Some(FloatSeriesProperties {
            last,
            min: last.min(average),
            max: last.max(average),
            average,
            variance: 0.0,
        }),
        ..AttributeValueDto::default()
    }
}

pub fn string_series_attribute(name: &str, last: &str, last_step: f64) -> AttributeValueDto {
    AttributeValueDto {
        name: name.to_string(),
        r#type: "stringSeries".to_string(),
        string_series_properties: Some(StringSeriesProperties {
            last: Some(last.to_string()),
            last_step: Some(last_step),
        }),
        ..AttributeValueDto::default()
    }
}

pub fn point(step: f64, value: f64) -> FloatPointDto {
    FloatPointDto {
        timestamp_millis: 1_700_000_000_000 + (step * 1_000.0) as i64,
        step,
        value,
        is_preview: false,
        completion_ratio: 1.0,
    }
}

pub fn string_point(step: f64, value: &str) -> SeriesPointDto {
    SeriesPointDto {
        step,
        timestamp_millis: 1_700_000_000_000 + (step * 1_000.0) as i64,
        string_value: Some(value.to_string()),
        file_ref: None,
        histogram: None,
    }
}
