// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Float metric point retrieval with per-series continuation.
//!
//! All requested series share one per-request point budget. A series is
//! re-requested with `afterStep` set to its last returned step for as long as
//! its page came back full and its tail quota is unmet; completed series drop
//! out of subsequent requests, which lets the remaining ones split the budget
//! between fewer participants.

use std::collections::HashMap;

use crate::identifiers::RunAttributeDefinition;
use crate::transport::{
    BackendClient, FloatSeriesRequestEntry, FloatSeriesValuesRequest, SeriesHolder,
    SeriesIdentifier, StepRange,
};
use crate::{ErrorKind, Result};

/// Upper bound on the number of points a single request may return, across
/// all series in the request.
pub(crate) const TOTAL_POINT_LIMIT: usize = 1_000_000;

/// One metric point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FloatPointValue {
    pub timestamp_millis: i64,
    pub step: f64,
    pub value: f64,
    pub is_preview: bool,
    pub preview_completion: f64,
}

struct ActiveSeries {
    index: usize,
    request_id: String,
    after_step: Option<f64>,
}

/// Fetches the points of every given series.
///
/// Ascending by step when `tail_limit` is unset; descending otherwise, so the
/// last points are fetched first, and each series' accumulated points are
/// reversed on completion so the returned order is always ascending.
pub(crate) async fn fetch_multiple_series_values<C: BackendClient>(
    client: &C,
    run_attribute_definitions: Vec<RunAttributeDefinition>,
    include_inherited: bool,
    include_preview: bool,
    step_range: (Option<f64>, Option<f64>),
    tail_limit: Option<usize>,
) -> Result<HashMap<RunAttributeDefinition, Vec<FloatPointValue>>> {
    if run_attribute_definitions.is_empty() {
        return Ok(HashMap::new());
    }
    if run_attribute_definitions.len() > TOTAL_POINT_LIMIT {
        return Err(ErrorKind::InternalError.with_message(format!(
            "requested {} series in one batch, exceeding the point budget",
            run_attribute_definitions.len()
        )));
    }

    let mut results: HashMap<RunAttributeDefinition, Vec<FloatPointValue>> =
        run_attribute_definitions
            .iter()
            .map(|definition| (definition.clone(), Vec::new()))
            .collect();

    let width = (run_attribute_definitions.len() - 1).to_string().len();
    let mut active: Vec<ActiveSeries> = run_attribute_definitions
        .iter()
        .enumerate()
        .map(|(index, _)| ActiveSeries {
            index,
            request_id: format!("{index:0width$}"),
            after_step: None,
        })
        .collect();

    let order = if tail_limit.is_some() {
        "descending"
    } else {
        "ascending"
    };

    while !active.is_empty() {
        let already_fetched = results[&run_attribute_definitions[active[0].index]].len();
        let mut per_series_limit = (TOTAL_POINT_LIMIT / active.len()).max(1);
        if let Some(tail_limit) = tail_limit {
            per_series_limit = per_series_limit.min(tail_limit - already_fetched).max(1);
        }

        let request = FloatSeriesValuesRequest {
            requests: active
                .iter()
                .map(|series| FloatSeriesRequestEntry {
                    request_id: series.request_id.clone(),
                    series: series_identifier(
                        &run_attribute_definitions[series.index],
                        include_inherited,
                        include_preview,
                    ),
                    after_step: series.after_step,
                })
                .collect(),
            step_range: StepRange {
                from: step_range.0,
                to: step_range.1,
            },
            order: order.to_string(),
            per_series_points_limit: per_series_limit,
        };

        let response = client.float_series_values(request).await?;

        let mut returned: HashMap<&str, (usize, Option<f64>)> = HashMap::new();
        for entry in &response.series {
            let Some(series) = active.iter().find(|s| s.request_id == entry.request_id) else {
                continue;
            };
            let definition = &run_attribute_definitions[series.index];
            let points = results
                .get_mut(definition)
                .expect("every requested series has a result slot");
            points.extend(entry.values.iter().map(|point| FloatPointValue {
                timestamp_millis: point.timestamp_millis,
                step: point.step,
                value: point.value,
                is_preview: point.is_preview,
                preview_completion: point.completion_ratio,
            }));
            returned.insert(
                entry.request_id.as_str(),
                (entry.values.len(), entry.values.last().map(|p| p.step)),
            );
        }

        active.retain_mut(|series| {
            let Some((count, last_step)) = returned.get(series.request_id.as_str()) else {
                // The backend dropped the series from the response; treat it
                // as complete rather than re-requesting it forever.
                return false;
            };
            let definition = &run_attribute_definitions[series.index];
            let is_page_full = *count == per_series_limit;
            let needs_more = match tail_limit {
                Some(tail_limit) => results[definition].len() < tail_limit,
                None => true,
            };
            if is_page_full && needs_more {
                series.after_step = *last_step;
                true
            } else {
                false
            }
        });
    }

    if tail_limit.is_some() {
        for points in results.values_mut() {
            points.reverse();
        }
    }

    Ok(results)
}

pub(crate) fn series_identifier(
    definition: &RunAttributeDefinition,
    include_inherited: bool,
    include_preview: bool,
) -> SeriesIdentifier {
    SeriesIdentifier {
        holder: SeriesHolder {
            identifier: definition.run_identifier.to_string(),
            r#type: "experiment".to_string(),
        },
        attribute: definition.attribute_definition.name.clone(),
        lineage: if include_inherited { "FULL" } else { "NONE" }.to_string(),
        include_preview,
    }
}
