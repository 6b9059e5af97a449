// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The experiments/runs table query: search, definitions, values, assembly.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use futures::stream::StreamExt;

use crate::config::Settings;
use crate::filter::{Attribute, AttributeFilterExpr, Filter};
use crate::identifiers::{AttributeDefinition, Label, ProjectIdentifier, SysId};
use crate::output::table::RunsTable;
use crate::query::components::{fetch_table_chunks, Budgets, TableChunk};
use crate::query::concurrency::{gather_results, generate_concurrently, Executor};
use crate::query::inference::{infer_filter_types, infer_sort_by_type};
use crate::query::validation;
use crate::retrieval::attribute_values::AttributeValue;
use crate::retrieval::search::{fetch_sys_id_labels, ContainerType, SortDirection};
use crate::transport::BackendClient;
use crate::types::Aggregation;
use crate::Result;

/// Options of a table query.
#[derive(Clone, Debug)]
pub struct TableParams {
    pub sort_by: Attribute,
    pub sort_direction: SortDirection,
    pub limit: Option<usize>,
    /// Keep the `:<type>` suffix on column names. Without it, a name shared
    /// by attributes of different types is a conflict.
    pub type_suffix_in_column_names: bool,
    /// Expand file attributes into `path` / `size_bytes` / `mime_type`
    /// subcolumns.
    pub flatten_file_properties: bool,
}

impl Default for TableParams {
    fn default() -> Self {
        Self {
            sort_by: Attribute::new("sys/creation_time")
                .with_type(crate::types::AttributeType::Datetime),
            sort_direction: SortDirection::Descending,
            limit: None,
            type_suffix_in_column_names: false,
            flatten_file_properties: false,
        }
    }
}

/// Fetches the metadata table for every container matching the filter.
#[tracing::instrument(level = "debug", skip_all, err, fields(project = %project_identifier, container_type = ?container_type))]
pub(crate) async fn fetch_table<C: BackendClient>(
    client: &C,
    settings: &Settings,
    project_identifier: &ProjectIdentifier,
    filter: Option<&Filter>,
    attribute_filter: &AttributeFilterExpr,
    params: &TableParams,
    container_type: ContainerType,
) -> Result<RunsTable> {
    validation::validate_limit(params.limit)?;

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
        return Ok(RunsTable::empty(index_name));
    }
    let filter = inference.result;

    let sort_inference = infer_sort_by_type(
        client,
        project_identifier,
        filter.as_ref(),
        &params.sort_by,
        container_type,
        &executor,
        &defs_executor,
        settings,
    )
    .await?;
    if sort_inference.run_domain_empty {
        return Ok(RunsTable::empty(index_name));
    }
    let sort_by = sort_inference.result;

    // Row order is the order sys ids first arrive from the identifier
    // stream; the label map is consumed only at assembly.
    let row_order: Mutex<Vec<SysId>> = Mutex::new(Vec::new());
    let labels: Mutex<HashMap<SysId, Label>> = Mutex::new(HashMap::new());

    let mut values_by_id: HashMap<SysId, Vec<AttributeValue>> = HashMap::new();
    let mut selected_aggregations: HashMap<AttributeDefinition, BTreeSet<Aggregation>> =
        HashMap::new();

    {
        let sys_pages = fetch_sys_id_labels(
            client,
            project_identifier,
            container_type,
            filter.as_ref(),
            Some(&sort_by),
            params.sort_direction,
            params.limit,
            budgets.sys_attrs_batch_size,
        )
        .map(|page| {
            page.map(|page| {
                let mut row_order = row_order.lock().expect("row order state poisoned");
                let mut labels = labels.lock().expect("label state poisoned");
                let mut sys_ids = Vec::with_capacity(page.items.len());
                for item in page.items {
                    if !labels.contains_key(&item.sys_id) {
                        row_order.push(item.sys_id.clone());
                    }
                    labels.insert(item.sys_id.clone(), item.label);
                    sys_ids.push(item.sys_id);
                }
                sys_ids
            })
        })
        .boxed();

        let output = generate_concurrently(sys_pages, &executor, |sys_ids: Vec<SysId>| {
            fetch_table_chunks(
                client,
                project_identifier,
                attribute_filter,
                executor,
                defs_executor,
                sys_ids,
                budgets,
            )
        });

        gather_results(output, |chunk| {
            match chunk {
                TableChunk::Values(page) => {
                    for value in page.items {
                        values_by_id
                            .entry(value.run_identifier.sys_id.clone())
                            .or_default()
                            .push(value);
                    }
                }
                TableChunk::Aggregations(pairs) => {
                    for pair in pairs {
                        if let Some(aggregation) = pair.aggregation {
                            selected_aggregations
                                .entry(pair.attribute_definition)
                                .or_default()
                                .insert(aggregation);
                        }
                    }
                }
            }
            Ok(())
        })
        .await?;
    }

    let row_order = row_order.into_inner().expect("row order state poisoned");
    let labels = labels.into_inner().expect("label state poisoned");
    let rows: Vec<(Label, Vec<AttributeValue>)> = row_order
        .into_iter()
        .map(|sys_id| {
            let label = labels
                .get(&sys_id)
                .cloned()
                .unwrap_or_else(|| sys_id.to_string());
            (label, values_by_id.remove(&sys_id).unwrap_or_default())
        })
        .collect();

    RunsTable::from_rows(
        index_name,
        rows,
        &selected_aggregations,
        params.type_suffix_in_column_names,
        params.flatten_file_properties,
    )
}
