// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The non-numeric series query: search, definitions, series values,
//! assembly.

use std::collections::HashMap;
use std::sync::Mutex;

use futures::stream::{self, StreamExt};

use crate::config::Settings;
use crate::filter::{AttributeFilterExpr, Filter};
use crate::identifiers::{
    AttributeDefinition, Label, ProjectIdentifier, RunAttributeDefinition, RunIdentifier, SysId,
};
use crate::output::frames::SeriesFrame;
use crate::query::components::Budgets;
use crate::query::concurrency::{fork_concurrently, gather_results, generate_concurrently, Executor};
use crate::query::fetch_metrics::IncludeTime;
use crate::query::inference::infer_filter_types;
use crate::query::validation;
use crate::retrieval::attribute_definitions::fetch_attribute_definitions;
use crate::retrieval::search::{fetch_sys_id_labels, ContainerType, SortDirection};
use crate::retrieval::series::{fetch_series_values, SeriesValue};
use crate::retrieval::split;
use crate::retrieval::util::Page;
use crate::transport::BackendClient;
use crate::Result;

/// Options of a series query.
#[derive(Clone, Debug)]
pub struct SeriesParams {
    pub include_time: Option<IncludeTime>,
    pub step_range: (Option<f64>, Option<f64>),
    pub lineage_to_the_root: bool,
    pub tail_limit: Option<usize>,
}

impl Default for SeriesParams {
    fn default() -> Self {
        Self {
            include_time: None,
            step_range: (None, None),
            lineage_to_the_root: true,
            tail_limit: None,
        }
    }
}

/// Fetches the raw values of every non-numeric series matching the attribute
/// filter, over every container matching the run filter.
#[tracing::instrument(level = "debug", skip_all, err, fields(project = %project_identifier, container_type = ?container_type))]
pub(crate) async fn fetch_series<C: BackendClient>(
    client: &C,
    settings: &Settings,
    project_identifier: &ProjectIdentifier,
    filter: Option<&Filter>,
    attribute_filter: &AttributeFilterExpr,
    params: &SeriesParams,
    container_type: ContainerType,
) -> Result<SeriesFrame> {
    validation::validate_step_range(params.step_range)?;
    validation::validate_tail_limit(params.tail_limit)?;

    let executor = Executor::new(settings.fetcher_max_workers);
    let defs_executor = Executor::new(settings.fetcher_max_workers);
    let budgets = Budgets::from_settings(settings);
    let index_name = container_type.index_column_name();

    let inference = infer_filter_types(
        client,
        project_identifier,
        filter,
        container_type,
        &executor,
        &defs_executor,
        settings,
    )
    .await?;
    if inference.run_domain_empty {
        return Ok(SeriesFrame::empty(index_name, params.include_time.is_some()));
    }
    let filter = inference.result;

    let labels: Mutex<HashMap<SysId, Label>> = Mutex::new(HashMap::new());
    let mut series_data: HashMap<RunAttributeDefinition, Vec<SeriesValue>> = HashMap::new();

    {
        let include_inherited = params.lineage_to_the_root;
        let step_range = params.step_range;
        let tail_limit = params.tail_limit;

        let sys_pages = fetch_sys_id_labels(
            client,
            project_identifier,
            container_type,
            filter.as_ref(),
            None,
            SortDirection::default(),
            None,
            budgets.sys_attrs_batch_size,
        )
        .map(|page| {
            page.map(|page| {
                let mut labels = labels.lock().expect("label state poisoned");
                let mut sys_ids = Vec::with_capacity(page.items.len());
                for item in page.items {
                    labels.insert(item.sys_id.clone(), item.label);
                    sys_ids.push(item.sys_id);
                }
                sys_ids
            })
        })
        .boxed();

        let output = generate_concurrently(sys_pages, &executor, move |sys_ids: Vec<SysId>| {
            let splits = split::split_sys_ids(
                &sys_ids,
                budgets.sys_attrs_batch_size,
                budgets.query_size_limit,
            );
            generate_concurrently(
                stream::iter(splits.into_iter().map(Ok)).boxed(),
                &executor,
                move |sys_ids_split: Vec<SysId>| {
                    let runs: Vec<RunIdentifier> = sys_ids_split
                        .iter()
                        .map(|sys_id| {
                            RunIdentifier::new(project_identifier.clone(), sys_id.clone())
                        })
                        .collect();
                    let definitions = fetch_attribute_definitions(
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
                        move |page: Page<AttributeDefinition>| {
                            let series: Vec<RunAttributeDefinition> = sys_ids_split
                                .iter()
                                .flat_map(|sys_id| {
                                    page.items
                                        .iter()
                                        .filter(|definition| is_series_attribute(definition))
                                        .map(|definition| {
                                            RunAttributeDefinition::new(
                                                RunIdentifier::new(
                                                    project_identifier.clone(),
                                                    sys_id.clone(),
                                                ),
                                                definition.clone(),
                                            )
                                        })
                                })
                                .collect();
                            let batches = split::split_series_attributes(
                                series,
                                budgets.series_batch_size,
                                budgets.query_size_limit,
                                |item| item.attribute_definition.name.as_str(),
                            );
                            let streams = batches
                                .into_iter()
                                .map(|batch| {
                                    fetch_series_values(
                                        client,
                                        batch,
                                        include_inherited,
                                        step_range,
                                        tail_limit,
                                    )
                                    .boxed()
                                })
                                .collect();
                            fork_concurrently(&executor, streams)
                        },
                    )
                },
            )
        });

        gather_results(output, |page| {
            for (series, values) in page.items {
                series_data.entry(series).or_default().extend(values);
            }
            Ok(())
        })
        .await?;
    }

    let labels = labels.into_inner().expect("label state poisoned");
    Ok(SeriesFrame::from_values(
        index_name,
        series_data,
        &labels,
        params.include_time.is_some(),
    ))
}

/// Non-numeric series carry their values through the series endpoint; float
/// series belong to the metric query.
fn is_series_attribute(definition: &AttributeDefinition) -> bool {
    use crate::types::AttributeType;
    matches!(
        definition.r#type,
        AttributeType::StringSeries | AttributeType::HistogramSeries | AttributeType::FileSeries
    )
}
