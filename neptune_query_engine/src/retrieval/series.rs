// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Non-numeric series retrieval: strings, histograms, and file references,
//! with the same per-series continuation discipline as the metric fetch.

use std::collections::HashMap;

use futures::stream;
use futures::Stream;

use crate::identifiers::RunAttributeDefinition;
use crate::retrieval::attribute_values::{file_ref, histogram};
use crate::retrieval::metrics::{series_identifier, TOTAL_POINT_LIMIT};
use crate::retrieval::util::Page;
use crate::transport::{
    BackendClient, FloatSeriesRequestEntry, SeriesPointDto, SeriesValuesRequest, StepRange,
};
use crate::types::{FileRef, Histogram};
use crate::Result;

/// One non-numeric series point.
#[derive(Clone, Debug, PartialEq)]
pub struct SeriesValue {
    pub step: f64,
    pub value: SeriesPointValue,
    pub timestamp_millis: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SeriesPointValue {
    String(String),
    Histogram(Histogram),
    File(FileRef),
}

struct ActiveSeries {
    index: usize,
    request_id: String,
    after_step: Option<f64>,
    fetched: usize,
}

struct SeriesState {
    definitions: Vec<RunAttributeDefinition>,
    active: Vec<ActiveSeries>,
}

/// Streams pages of `(series, points)` chunks, one page per wire round.
///
/// With `tail_limit` set the fetch runs descending so the last points come
/// first; row order of the final frame is restored at assembly, and the
/// quota guarantees no series ever carries more than `tail_limit` points.
pub(crate) fn fetch_series_values<'a, C: BackendClient>(
    client: &'a C,
    run_attribute_definitions: Vec<RunAttributeDefinition>,
    include_inherited: bool,
    step_range: (Option<f64>, Option<f64>),
    tail_limit: Option<usize>,
) -> impl Stream<Item = Result<Page<(RunAttributeDefinition, Vec<SeriesValue>)>>> + Send + 'a {
    let width = run_attribute_definitions
        .len()
        .saturating_sub(1)
        .to_string()
        .len();
    let active = run_attribute_definitions
        .iter()
        .enumerate()
        .map(|(index, _)| ActiveSeries {
            index,
            request_id: format!("{index:0width$}"),
            after_step: None,
            fetched: 0,
        })
        .collect();
    let state = SeriesState {
        definitions: run_attribute_definitions,
        active,
    };

    stream::try_unfold(state, move |mut state| async move {
        if state.active.is_empty() {
            return Ok(None);
        }

        let already_fetched = state.active[0].fetched;
        let mut per_series_limit = (TOTAL_POINT_LIMIT / state.active.len()).max(1);
        if let Some(tail_limit) = tail_limit {
            per_series_limit = per_series_limit.min(tail_limit - already_fetched).max(1);
        }

        let request = SeriesValuesRequest {
            requests: state
                .active
                .iter()
                .map(|series| FloatSeriesRequestEntry {
                    request_id: series.request_id.clone(),
                    series: series_identifier(
                        &state.definitions[series.index],
                        include_inherited,
                        false,
                    ),
                    after_step: series.after_step,
                })
                .collect(),
            step_range: StepRange {
                from: step_range.0,
                to: step_range.1,
            },
            order: if tail_limit.is_some() {
                "descending".to_string()
            } else {
                "ascending".to_string()
            },
            per_series_points_limit: per_series_limit,
        };

        let response = client.series_values(request).await?;

        let mut items = Vec::new();
        let mut returned: HashMap<String, (usize, Option<f64>)> = HashMap::new();
        for entry in response.series {
            let Some(series) = state
                .active
                .iter()
                .find(|series| series.request_id == entry.request_id)
            else {
                continue;
            };
            let definition = state.definitions[series.index].clone();
            let count = entry.values.len();
            let last_step = entry.values.last().map(|point| point.step);
            let points: Vec<SeriesValue> = entry.values.iter().filter_map(decode_point).collect();
            returned.insert(entry.request_id, (count, last_step));
            items.push((definition, points));
        }

        state.active.retain_mut(|series| {
            let Some((count, last_step)) = returned.get(&series.request_id) else {
                return false;
            };
            series.fetched += count;
            let is_page_full = *count == per_series_limit;
            let needs_more = match tail_limit {
                Some(tail_limit) => series.fetched < tail_limit,
                None => true,
            };
            if is_page_full && needs_more {
                series.after_step = *last_step;
                true
            } else {
                false
            }
        });

        Ok(Some((Page::new(items), state)))
    })
}

fn decode_point(point: &SeriesPointDto) -> Option<SeriesValue> {
    let value = if let Some(string_value) = &point.string_value {
        SeriesPointValue::String(string_value.clone())
    } else if let Some(histogram_dto) = &point.histogram {
        SeriesPointValue::Histogram(histogram(histogram_dto))
    } else if let Some(file_dto) = &point.file_ref {
        SeriesPointValue::File(file_ref(file_dto))
    } else {
        tracing::warn!(step = point.step, "series point carries no known value; skipping");
        return None;
    };
    Some(SeriesValue {
        step: point.step,
        value,
        timestamp_millis: point.timestamp_millis,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::{AttributeDefinition, ProjectIdentifier, RunIdentifier, SysId};
    use crate::transport::{
        FloatSeriesValuesRequest, FloatSeriesValuesResponse, HistogramDto,
        QueryAttributeDefinitionsRequest, QueryAttributeDefinitionsResponse,
        QueryAttributeValuesRequest, QueryAttributeValuesResponse, SearchEntriesRequest,
        SearchEntriesResponse, SeriesEntry, SeriesValuesRequest, SeriesValuesResponse,
    };
    use crate::types::AttributeType;
    use futures::TryStreamExt;
    use pretty_assertions::assert_eq;

    struct MiniBackend {
        points: Vec<SeriesPointDto>,
    }

    impl crate::transport::BackendClient for MiniBackend {
        async fn search_entries(
            &self,
            _: SearchEntriesRequest,
        ) -> crate::Result<SearchEntriesResponse> {
            unreachable!("not exercised by the series adapter")
        }

        async fn query_attribute_definitions(
            &self,
            _: QueryAttributeDefinitionsRequest,
        ) -> crate::Result<QueryAttributeDefinitionsResponse> {
            unreachable!("not exercised by the series adapter")
        }

        async fn query_attribute_values(
            &self,
            _: QueryAttributeValuesRequest,
        ) -> crate::Result<QueryAttributeValuesResponse> {
            unreachable!("not exercised by the series adapter")
        }

        async fn float_series_values(
            &self,
            _: FloatSeriesValuesRequest,
        ) -> crate::Result<FloatSeriesValuesResponse> {
            unreachable!("not exercised by the series adapter")
        }

        async fn series_values(
            &self,
            request: SeriesValuesRequest,
        ) -> crate::Result<SeriesValuesResponse> {
            let descending = request.order == "descending";
            let series = request
                .requests
                .iter()
                .map(|entry| {
                    let mut points = self.points.clone();
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

    fn messages_series() -> RunAttributeDefinition {
        RunAttributeDefinition::new(
            RunIdentifier::new(ProjectIdentifier::new("team/project"), SysId::new("R-1")),
            AttributeDefinition::new("messages", AttributeType::StringSeries),
        )
    }

    fn string_point(step: f64, value: &str) -> SeriesPointDto {
        SeriesPointDto {
            step,
            timestamp_millis: (step * 1_000.0) as i64,
            string_value: Some(value.to_string()),
            file_ref: None,
            histogram: None,
        }
    }

    #[tokio::test]
    async fn values_stream_in_step_order() {
        let backend = MiniBackend {
            points: vec![
                string_point(2.0, "b"),
                string_point(1.0, "a"),
                string_point(3.0, "c"),
            ],
        };
        let pages: Vec<_> =
            fetch_series_values(&backend, vec![messages_series()], true, (None, None), None)
                .try_collect()
                .await
                .unwrap();

        let (definition, values) = &pages[0].items[0];
        assert_eq!(*definition, messages_series());
        let rendered: Vec<(f64, &SeriesPointValue)> =
            values.iter().map(|v| (v.step, &v.value)).collect();
        assert_eq!(rendered.len(), 3);
        assert_eq!(rendered[0].0, 1.0);
        assert_eq!(rendered[2].0, 3.0);
    }

    #[tokio::test]
    async fn tail_limit_caps_each_series() {
        let backend = MiniBackend {
            points: (0..9).map(|i| string_point(i as f64, "x")).collect(),
        };
        let pages: Vec<_> =
            fetch_series_values(&backend, vec![messages_series()], true, (None, None), Some(2))
                .try_collect()
                .await
                .unwrap();

        let all_values: Vec<f64> = pages
            .iter()
            .flat_map(|page| page.items.iter())
            .flat_map(|(_, values)| values.iter().map(|v| v.step))
            .collect();
        // The two largest steps, fetched descending.
        assert_eq!(all_values, vec![8.0, 7.0]);
    }

    #[tokio::test]
    async fn valueless_points_are_dropped() {
        let empty = SeriesPointDto {
            step: 5.0,
            timestamp_millis: 0,
            string_value: None,
            file_ref: None,
            histogram: None,
        };
        let backend = MiniBackend {
            points: vec![string_point(1.0, "keep"), empty],
        };
        let pages: Vec<_> =
            fetch_series_values(&backend, vec![messages_series()], true, (None, None), None)
                .try_collect()
                .await
                .unwrap();
        let (_, values) = &pages[0].items[0];
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].value, SeriesPointValue::String("keep".into()));
    }

    #[test]
    fn histogram_points_decode() {
        let dto = SeriesPointDto {
            step: 1.0,
            timestamp_millis: 7,
            string_value: None,
            file_ref: None,
            histogram: Some(HistogramDto {
                r#type: "COUNTING".to_string(),
                edges: vec![0.0, 1.0],
                values: vec![10.0],
            }),
        };
        match decode_point(&dto).map(|v| v.value) {
            Some(SeriesPointValue::Histogram(histogram)) => {
                assert_eq!(histogram.edges, vec![0.0, 1.0]);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }
}
