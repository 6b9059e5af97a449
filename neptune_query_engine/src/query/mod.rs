// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Query composition: the public entry points, the type-inference stage, and
//! the concurrency framework they share.
//!
//! Every entry point takes an explicit backend client and settings; nothing
//! in here reads the global context. The thin convenience layer that
//! resolves the context into a connected client lives at the crate root.

pub mod concurrency;
mod components;
mod fetch_metrics;
mod fetch_series;
mod fetch_table;
mod inference;
mod list;
mod validation;

pub use fetch_metrics::{IncludeTime, MetricsParams};
pub use fetch_series::SeriesParams;
pub use fetch_table::TableParams;

use crate::config::Settings;
use crate::filter::{AttributeFilterExpr, Filter};
use crate::identifiers::{Label, ProjectIdentifier};
use crate::output::frames::{MetricsFrame, SeriesFrame};
use crate::output::table::RunsTable;
use crate::retrieval::search::ContainerType;
use crate::transport::BackendClient;
use crate::Result;

/// Fetches the metadata table of the experiments matching `experiments`.
///
/// Rows are experiments in the order their identifiers first arrive (the
/// sort applies server-side); columns are the attributes selected by
/// `attributes`, with one subcolumn per requested aggregation for series
/// attributes.
pub async fn fetch_experiments_table<C: BackendClient>(
    client: &C,
    settings: &Settings,
    project_identifier: &ProjectIdentifier,
    experiments: Option<&Filter>,
    attributes: &AttributeFilterExpr,
    params: &TableParams,
) -> Result<RunsTable> {
    fetch_table::fetch_table(
        client,
        settings,
        project_identifier,
        experiments,
        attributes,
        params,
        ContainerType::Experiment,
    )
    .await
}

/// Fetches the metadata table of the runs matching `runs`.
pub async fn fetch_runs_table<C: BackendClient>(
    client: &C,
    settings: &Settings,
    project_identifier: &ProjectIdentifier,
    runs: Option<&Filter>,
    attributes: &AttributeFilterExpr,
    params: &TableParams,
) -> Result<RunsTable> {
    fetch_table::fetch_table(
        client,
        settings,
        project_identifier,
        runs,
        attributes,
        params,
        ContainerType::Run,
    )
    .await
}

/// Fetches metric points of the experiments matching `experiments`.
pub async fn fetch_metrics<C: BackendClient>(
    client: &C,
    settings: &Settings,
    project_identifier: &ProjectIdentifier,
    experiments: Option<&Filter>,
    attributes: &AttributeFilterExpr,
    params: &MetricsParams,
) -> Result<MetricsFrame> {
    fetch_metrics::fetch_metrics(
        client,
        settings,
        project_identifier,
        experiments,
        attributes,
        params,
        ContainerType::Experiment,
    )
    .await
}

/// Fetches metric points of the runs matching `runs`.
pub async fn fetch_run_metrics<C: BackendClient>(
    client: &C,
    settings: &Settings,
    project_identifier: &ProjectIdentifier,
    runs: Option<&Filter>,
    attributes: &AttributeFilterExpr,
    params: &MetricsParams,
) -> Result<MetricsFrame> {
    fetch_metrics::fetch_metrics(
        client,
        settings,
        project_identifier,
        runs,
        attributes,
        params,
        ContainerType::Run,
    )
    .await
}

/// Fetches non-numeric series values of the experiments matching
/// `experiments`.
pub async fn fetch_series<C: BackendClient>(
    client: &C,
    settings: &Settings,
    project_identifier: &ProjectIdentifier,
    experiments: Option<&Filter>,
    attributes: &AttributeFilterExpr,
    params: &SeriesParams,
) -> Result<SeriesFrame> {
    fetch_series::fetch_series(
        client,
        settings,
        project_identifier,
        experiments,
        attributes,
        params,
        ContainerType::Experiment,
    )
    .await
}

/// Fetches non-numeric series values of the runs matching `runs`.
pub async fn fetch_run_series<C: BackendClient>(
    client: &C,
    settings: &Settings,
    project_identifier: &ProjectIdentifier,
    runs: Option<&Filter>,
    attributes: &AttributeFilterExpr,
    params: &SeriesParams,
) -> Result<SeriesFrame> {
    fetch_series::fetch_series(
        client,
        settings,
        project_identifier,
        runs,
        attributes,
        params,
        ContainerType::Run,
    )
    .await
}

/// Lists the names of the experiments matching `experiments`, in backend
/// order, without duplicates.
pub async fn list_experiments<C: BackendClient>(
    client: &C,
    settings: &Settings,
    project_identifier: &ProjectIdentifier,
    experiments: Option<&Filter>,
) -> Result<Vec<Label>> {
    list::list_labels(
        client,
        settings,
        project_identifier,
        experiments,
        ContainerType::Experiment,
    )
    .await
}

/// Lists the custom run ids of the runs matching `runs`.
pub async fn list_runs<C: BackendClient>(
    client: &C,
    settings: &Settings,
    project_identifier: &ProjectIdentifier,
    runs: Option<&Filter>,
) -> Result<Vec<Label>> {
    list::list_labels(client, settings, project_identifier, runs, ContainerType::Run).await
}

/// Lists the attribute names present on experiments matching `experiments`
/// and selected by `attributes`, sorted and unique.
pub async fn list_attributes<C: BackendClient>(
    client: &C,
    settings: &Settings,
    project_identifier: &ProjectIdentifier,
    experiments: Option<&Filter>,
    attributes: &AttributeFilterExpr,
) -> Result<Vec<String>> {
    list::list_attribute_names(
        client,
        settings,
        project_identifier,
        experiments,
        attributes,
        ContainerType::Experiment,
    )
    .await
}

/// Lists the attribute names present on runs matching `runs` and selected by
/// `attributes`, sorted and unique.
pub async fn list_run_attributes<C: BackendClient>(
    client: &C,
    settings: &Settings,
    project_identifier: &ProjectIdentifier,
    runs: Option<&Filter>,
    attributes: &AttributeFilterExpr,
) -> Result<Vec<String>> {
    list::list_attribute_names(
        client,
        settings,
        project_identifier,
        runs,
        attributes,
        ContainerType::Run,
    )
    .await
}
