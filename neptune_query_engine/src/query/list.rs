// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Listing queries: labels matching a filter, and attribute names matching a
//! run filter plus an attribute filter.

use std::collections::{BTreeSet, HashSet};

use futures::stream::{self, StreamExt, TryStreamExt};

use crate::config::Settings;
use crate::filter::{AttributeFilterExpr, Filter};
use crate::identifiers::{Label, ProjectIdentifier, RunIdentifier, SysId};
use crate::query::components::Budgets;
use crate::query::concurrency::{gather_results, generate_concurrently, Executor};
use crate::query::inference::infer_filter_types;
use crate::retrieval::attribute_definitions::fetch_attribute_definitions;
use crate::retrieval::search::{fetch_sys_id_labels, ContainerType, SortDirection};
use crate::retrieval::split;
use crate::transport::BackendClient;
use crate::Result;

/// Lists the labels of every container matching the filter, preserving
/// backend order and dropping duplicates.
pub(crate) async fn list_labels<C: BackendClient>(
    client: &C,
    settings: &Settings,
    project_identifier: &ProjectIdentifier,
    filter: Option<&Filter>,
    container_type: ContainerType,
) -> Result<Vec<Label>> {
    let executor = Executor::new(settings.fetcher_max_workers);
    let defs_executor = Executor::new(settings.fetcher_max_workers);

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
        return Ok(Vec::new());
    }
    let filter = inference.result;

    let mut seen: HashSet<Label> = HashSet::new();
    let mut labels = Vec::new();
    let pages = fetch_sys_id_labels(
        client,
        project_identifier,
        container_type,
        filter.as_ref(),
        None,
        SortDirection::default(),
        None,
        settings.fetcher_sys_attrs_batch_size,
    );
    futures::pin_mut!(pages);
    while let Some(page) = pages.try_next().await? {
        for item in page.items {
            if !item.label.is_empty() && seen.insert(item.label.clone()) {
                labels.push(item.label);
            }
        }
    }
    Ok(labels)
}

/// Lists the names of attributes matching the attribute filter on any
/// container matching the run filter, sorted and unique.
pub(crate) async fn list_attribute_names<C: BackendClient>(
    client: &C,
    settings: &Settings,
    project_identifier: &ProjectIdentifier,
    filter: Option<&Filter>,
    attribute_filter: &AttributeFilterExpr,
    container_type: ContainerType,
) -> Result<Vec<String>> {
    let executor = Executor::new(settings.fetcher_max_workers);
    let defs_executor = Executor::new(settings.fetcher_max_workers);
    let budgets = Budgets::from_settings(settings);

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
        return Ok(Vec::new());
    }
    let filter = inference.result;

    let mut names: BTreeSet<String> = BTreeSet::new();

    if filter.is_some() {
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
        .map(|page| page.map(|page| page.items.into_iter().map(|item| item.sys_id).collect()))
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
                        .into_iter()
                        .map(|sys_id| RunIdentifier::new(project_identifier.clone(), sys_id))
                        .collect();
                    fetch_attribute_definitions(
                        client,
                        project_identifier,
                        Some(&runs),
                        attribute_filter,
                        &defs_executor,
                        budgets.attribute_definitions_batch_size,
                    )
                },
            )
        });
        gather_results(output, |page| {
            names.extend(page.items.into_iter().map(|definition| definition.name));
            Ok(())
        })
        .await?;
    } else {
        let output = fetch_attribute_definitions(
            client,
            project_identifier,
            None,
            attribute_filter,
            &defs_executor,
            budgets.attribute_definitions_batch_size,
        );
        gather_results(output, |page| {
            names.extend(page.items.into_iter().map(|definition| definition.name));
            Ok(())
        })
        .await?;
    }

    Ok(names.into_iter().collect())
}
