// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shared pipeline stages connecting the retrieval adapters.

use futures::stream::{self, StreamExt};

use crate::config::Settings;
use crate::filter::AttributeFilterExpr;
use crate::identifiers::{AttributeDefinition, ProjectIdentifier, RunIdentifier, SysId};
use crate::query::concurrency::{
    fork_concurrently, generate_concurrently, return_value, Executor, ResultStream,
};
use crate::retrieval::attribute_definitions::{
    fetch_attribute_definition_aggregations, AttributeDefinitionAggregation,
};
use crate::retrieval::attribute_values::{fetch_attribute_values, AttributeValue};
use crate::retrieval::split;
use crate::retrieval::util::Page;
use crate::transport::BackendClient;

/// The per-request budgets of one query, copied out of [`Settings`] so the
/// pipeline closures stay free of borrows.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Budgets {
    pub sys_attrs_batch_size: usize,
    pub attribute_definitions_batch_size: usize,
    pub attribute_values_batch_size: usize,
    pub series_batch_size: usize,
    pub query_size_limit: usize,
}

impl Budgets {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            sys_attrs_batch_size: settings.fetcher_sys_attrs_batch_size,
            attribute_definitions_batch_size: settings.fetcher_attribute_definitions_batch_size,
            attribute_values_batch_size: settings.fetcher_attribute_values_batch_size,
            series_batch_size: settings.fetcher_series_batch_size,
            query_size_limit: settings.fetcher_query_size_limit,
        }
    }
}

/// A record on the table pipeline's merge channel. The assembler dispatches
/// on the variant; keeping this a closed enum makes that dispatch exhaustive.
#[derive(Debug)]
pub(crate) enum TableChunk {
    Values(Page<AttributeValue>),
    Aggregations(Vec<AttributeDefinitionAggregation>),
}

/// The downstream side of the table pipeline for one page of run
/// identifiers: definitions (with selected aggregations) are fetched per
/// identifier split, and every definitions page forks into value fetches
/// plus an immediate aggregation record.
pub(crate) fn fetch_table_chunks<'a, C: BackendClient>(
    client: &'a C,
    project_identifier: &'a ProjectIdentifier,
    attribute_filter: &'a AttributeFilterExpr,
    executor: Executor,
    defs_executor: Executor,
    sys_ids: Vec<SysId>,
    budgets: Budgets,
) -> ResultStream<'a, TableChunk> {
    let splits = split::split_sys_ids(&sys_ids, budgets.sys_attrs_batch_size, budgets.query_size_limit);

    generate_concurrently(
        stream::iter(splits.into_iter().map(Ok)).boxed(),
        &executor,
        move |sys_ids_split: Vec<SysId>| {
            let runs: Vec<RunIdentifier> = sys_ids_split
                .iter()
                .map(|sys_id| RunIdentifier::new(project_identifier.clone(), sys_id.clone()))
                .collect();
            let definitions = fetch_attribute_definition_aggregations(
                client,
                project_identifier,
                Some(&runs),
                attribute_filter,
                &defs_executor,
                budgets.attribute_definitions_batch_size,
            );

            generate_concurrently(
                definitions,
                &executor,
                move |page: Page<AttributeDefinitionAggregation>| {
                    let mut definitions: Vec<AttributeDefinition> = Vec::new();
                    let mut aggregation_pairs: Vec<AttributeDefinitionAggregation> = Vec::new();
                    for item in page.items {
                        if item.aggregation.is_none() {
                            definitions.push(item.attribute_definition.clone());
                        } else {
                            aggregation_pairs.push(item);
                        }
                    }

                    let (attribute_batches, runs_per_request) = split::split_attribute_values(
                        definitions,
                        budgets.attribute_values_batch_size,
                        budgets.query_size_limit,
                        |definition| definition.name.as_str(),
                    );
                    let run_groups =
                        split::split_runs_for_values(&sys_ids_split, runs_per_request);

                    let mut streams: Vec<ResultStream<'a, TableChunk>> = Vec::new();
                    for run_group in &run_groups {
                        let group_runs: Vec<RunIdentifier> = run_group
                            .iter()
                            .map(|sys_id| {
                                RunIdentifier::new(project_identifier.clone(), sys_id.clone())
                            })
                            .collect();
                        for batch in &attribute_batches {
                            streams.push(
                                fetch_attribute_values(
                                    client,
                                    project_identifier,
                                    group_runs.clone(),
                                    batch.clone(),
                                    budgets.attribute_values_batch_size,
                                )
                                .map(|page| page.map(TableChunk::Values))
                                .boxed(),
                            );
                        }
                    }
                    streams.push(return_value(TableChunk::Aggregations(aggregation_pairs)));
                    fork_concurrently(&executor, streams)
                },
            )
        },
    )
}
