// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Attribute definition retrieval.
//!
//! A disjunctive attribute filter is split into its leaves; each leaf becomes
//! one concurrent paginated call, and the merged results are deduplicated by
//! `(name, type)` so downstream stages see every definition exactly once.

use std::collections::HashSet;

use futures::stream::StreamExt;
use futures::Stream;

use crate::filter::{AttributeFilter, AttributeFilterExpr};
use crate::identifiers::{AttributeDefinition, ProjectIdentifier, RunIdentifier};
use crate::query::concurrency::{fork_concurrently, Executor, ResultStream};
use crate::retrieval::util::{fetch_pages, Page};
use crate::transport::{
    AttributeNameFilter, AttributeTypeFilter, BackendClient, PageRequest,
    QueryAttributeDefinitionsRequest, QueryAttributeDefinitionsResponse,
};
use crate::types::{warn_unsupported_value_type, Aggregation, AttributeType};
use crate::Result;

/// An attribute definition paired with one of the aggregations selected for
/// it, or with `None` in its role as a plain definition.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct AttributeDefinitionAggregation {
    pub attribute_definition: AttributeDefinition,
    pub aggregation: Option<Aggregation>,
}

/// Streams deduplicated attribute definitions matching the filter.
///
/// The `aggregations` field of the leaves is intentionally ignored here; it
/// only matters to the value and series fetches issued later.
pub(crate) fn fetch_attribute_definitions<'a, C: BackendClient>(
    client: &'a C,
    project_identifier: &ProjectIdentifier,
    run_identifiers: Option<&[RunIdentifier]>,
    attribute_filter: &AttributeFilterExpr,
    executor: &Executor,
    batch_size: usize,
) -> ResultStream<'a, Page<AttributeDefinition>> {
    let project = project_identifier.to_string();
    let runs = run_identifiers.map(render_runs);

    let streams: Vec<ResultStream<'a, Page<AttributeDefinition>>> = attribute_filter
        .leaves()
        .into_iter()
        .map(|leaf| fetch_single_filter(client, project.clone(), runs.clone(), leaf, batch_size).boxed())
        .collect();

    let mut seen: HashSet<AttributeDefinition> = HashSet::new();
    fork_concurrently(executor, streams)
        .map(move |page| {
            page.map(|page| {
                Page::new(
                    page.items
                        .into_iter()
                        .filter(|item| seen.insert(item.clone()))
                        .collect(),
                )
            })
        })
        .boxed()
}

/// Streams definition/aggregation pairs for the table pipeline.
///
/// Every definition is emitted once with `aggregation: None` when first
/// encountered; series-typed definitions are additionally emitted once per
/// aggregation requested by the leaf that matched them, intersected with the
/// aggregations the type supports. Pairs are deduplicated across leaves.
pub(crate) fn fetch_attribute_definition_aggregations<'a, C: BackendClient>(
    client: &'a C,
    project_identifier: &ProjectIdentifier,
    run_identifiers: Option<&[RunIdentifier]>,
    attribute_filter: &AttributeFilterExpr,
    executor: &Executor,
    batch_size: usize,
) -> ResultStream<'a, Page<AttributeDefinitionAggregation>> {
    let project = project_identifier.to_string();
    let runs = run_identifiers.map(render_runs);

    let streams: Vec<ResultStream<'a, Page<AttributeDefinitionAggregation>>> = attribute_filter
        .leaves()
        .into_iter()
        .map(|leaf| {
            let leaf_aggregations = leaf.aggregations.clone();
            fetch_single_filter(client, project.clone(), runs.clone(), leaf, batch_size)
                .map(move |page| {
                    page.map(|page| {
                        let mut items = Vec::new();
                        for definition in page.items {
                            items.push(AttributeDefinitionAggregation {
                                attribute_definition: definition.clone(),
                                aggregation: None,
                            });
                            for aggregation in &leaf_aggregations {
                                if definition.r#type.aggregations().contains(aggregation) {
                                    items.push(AttributeDefinitionAggregation {
                                        attribute_definition: definition.clone(),
                                        aggregation: Some(*aggregation),
                                    });
                                }
                            }
                        }
                        Page::new(items)
                    })
                })
                .boxed()
        })
        .collect();

    let mut seen: HashSet<AttributeDefinitionAggregation> = HashSet::new();
    fork_concurrently(executor, streams)
        .map(move |page| {
            page.map(|page| {
                Page::new(
                    page.items
                        .into_iter()
                        .filter(|item| seen.insert(item.clone()))
                        .collect(),
                )
            })
        })
        .boxed()
}

fn render_runs(run_identifiers: &[RunIdentifier]) -> Vec<String> {
    run_identifiers.iter().map(|run| run.to_string()).collect()
}

/// One leaf, one paginated wire call.
fn fetch_single_filter<'a, C: BackendClient>(
    client: &'a C,
    project_identifier: String,
    run_identifiers: Option<Vec<String>>,
    leaf: &AttributeFilter,
    batch_size: usize,
) -> impl Stream<Item = Result<Page<AttributeDefinition>>> + Send + 'a {
    let request = QueryAttributeDefinitionsRequest {
        project_identifiers: vec![project_identifier],
        experiment_ids_filter: run_identifiers,
        attribute_name_filter: AttributeNameFilter {
            must_match_regexes: leaf.wire_must_match_regexes(),
            must_not_match_regexes: leaf.must_not_match_regexes.clone(),
        },
        attribute_filter: Some(
            leaf.type_in
                .iter()
                .map(|r#type| AttributeTypeFilter {
                    attribute_type: r#type.backend_tag().to_string(),
                })
                .collect(),
        ),
        next_page: PageRequest::first(batch_size),
    };

    fetch_pages(
        request,
        move |request| client.query_attribute_definitions(request),
        process_page,
        move |mut request, data: &QueryAttributeDefinitionsResponse| {
            let token = data.next_page.next_page_token.clone()?;
            if token.is_empty() || data.entries.len() < batch_size {
                return None;
            }
            request.next_page.next_page_token = Some(token);
            Some(request)
        },
    )
}

fn process_page(data: &QueryAttributeDefinitionsResponse) -> Result<Page<AttributeDefinition>> {
    let mut items = Vec::with_capacity(data.entries.len());
    for entry in &data.entries {
        match AttributeType::from_backend_tag(&entry.r#type) {
            Some(r#type) => items.push(AttributeDefinition::new(entry.name.clone(), r#type)),
            None => warn_unsupported_value_type(&entry.r#type),
        }
    }
    Ok(Page::new(items))
}
