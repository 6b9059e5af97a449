// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Type inference: resolves every untyped attribute reference in a filter or
//! sort-by attribute to exactly one concrete type before any data retrieval
//! call is dispatched.
//!
//! Inference never mutates the caller's filter. It works on a private copy,
//! runs a local pass first (well-known `sys/*` names, then aggregation
//! tables), and only consults the backend for the residual names. Failures
//! are collected and raised together at the end, listing every attribute
//! that could not be resolved.

use std::collections::{BTreeSet, HashMap};

use futures::stream::{self, StreamExt, TryStreamExt};

use crate::config::Settings;
use crate::filter::{Attribute, AttributeFilter, AttributeFilterExpr, Filter};
use crate::identifiers::{ProjectIdentifier, RunIdentifier, SysId};
use crate::query::concurrency::{gather_results, generate_concurrently, Executor};
use crate::retrieval::attribute_definitions::fetch_attribute_definitions;
use crate::retrieval::search::{fetch_sys_ids, ContainerType};
use crate::retrieval::split;
use crate::transport::BackendClient;
use crate::types::{Aggregation, AttributeType};
use crate::{ErrorKind, Result};

/// Types of the well-known system attributes, resolvable without a wire call.
const KNOWN_SYS_ATTRIBUTES: &[(&str, AttributeType)] = &[
    ("sys/archived", AttributeType::Bool),
    ("sys/creation_time", AttributeType::Datetime),
    ("sys/custom_run_id", AttributeType::String),
    ("sys/description", AttributeType::String),
    ("sys/diagnostics/attributes/bool_count", AttributeType::Int),
    ("sys/diagnostics/attributes/file_ref_count", AttributeType::Int),
    ("sys/diagnostics/attributes/file_ref_series_count", AttributeType::Int),
    ("sys/diagnostics/attributes/float_count", AttributeType::Int),
    ("sys/diagnostics/attributes/float_series_count", AttributeType::Int),
    ("sys/diagnostics/attributes/histogram_count", AttributeType::Int),
    ("sys/diagnostics/attributes/histogram_series_count", AttributeType::Int),
    ("sys/diagnostics/attributes/int_count", AttributeType::Int),
    ("sys/diagnostics/attributes/string_count", AttributeType::Int),
    ("sys/diagnostics/attributes/string_series_count", AttributeType::Int),
    ("sys/diagnostics/attributes/string_set_count", AttributeType::Int),
    ("sys/diagnostics/attributes/total_count", AttributeType::Int),
    ("sys/diagnostics/attributes/total_series_datapoints", AttributeType::Int),
    ("sys/diagnostics/project_uuid", AttributeType::String),
    ("sys/diagnostics/run_uuid", AttributeType::String),
    ("sys/experiment/is_head", AttributeType::Bool),
    ("sys/experiment/name", AttributeType::String),
    ("sys/experiment/running_time_seconds", AttributeType::Float),
    ("sys/failed", AttributeType::Bool),
    ("sys/family", AttributeType::String),
    ("sys/forking/depth", AttributeType::Int),
    ("sys/group_tags", AttributeType::StringSet),
    ("sys/id", AttributeType::String),
    ("sys/modification_time", AttributeType::Datetime),
    ("sys/name", AttributeType::String),
    ("sys/owner", AttributeType::String),
    ("sys/ping_time", AttributeType::Datetime),
    ("sys/relative_creation_time_ms", AttributeType::Int),
    ("sys/running_time_seconds", AttributeType::Float),
    ("sys/size", AttributeType::Int),
    ("sys/tags", AttributeType::StringSet),
    ("sys/trashed", AttributeType::Bool),
];

/// The outcome of an inference run.
///
/// When the backend reported no runs at all while inference looked for
/// attribute types, `run_domain_empty` is set and the caller short-circuits
/// to an empty result instead of raising.
#[derive(Clone, Debug)]
pub(crate) struct InferenceOutcome<T> {
    pub result: T,
    pub run_domain_empty: bool,
}

/// Per-attribute progress, in filter traversal order.
#[derive(Clone, Debug)]
struct AttributeState {
    name: String,
    aggregation: Option<Aggregation>,
    inferred: Option<AttributeType>,
    reason: Option<&'static str>,
    error: Option<String>,
}

impl AttributeState {
    fn from_attribute(attribute: &Attribute) -> Self {
        Self {
            name: attribute.name.clone(),
            aggregation: attribute.aggregation,
            inferred: attribute.r#type,
            reason: attribute.r#type.map(|_| "type provided"),
            error: None,
        }
    }

    fn is_finalized(&self) -> bool {
        self.inferred.is_some() || self.error.is_some()
    }

    fn set_success(&mut self, inferred: AttributeType, reason: &'static str) {
        self.inferred = Some(inferred);
        self.reason = Some(reason);
    }
}

/// Infers the types of every attribute referenced by the filter.
///
/// The remote pass is not restricted by the filter itself: the attribute may
/// exist on runs the filter excludes, and the filter cannot even be
/// serialized before its types are known.
pub(crate) async fn infer_filter_types<C: BackendClient>(
    client: &C,
    project_identifier: &ProjectIdentifier,
    filter: Option<&Filter>,
    container_type: ContainerType,
    executor: &Executor,
    defs_executor: &Executor,
    settings: &Settings,
) -> Result<InferenceOutcome<Option<Filter>>> {
    let Some(filter) = filter else {
        return Ok(InferenceOutcome {
            result: None,
            run_domain_empty: false,
        });
    };

    let mut result = filter.clone();
    let mut states = collect_states(&result);
    infer_locally(&mut states);

    let mut run_domain_empty = false;
    if states.iter().any(|state| !state.is_finalized()) {
        run_domain_empty = infer_remotely(
            client,
            project_identifier,
            None,
            container_type,
            &mut states,
            executor,
            defs_executor,
            settings,
        )
        .await?;
    }
    if run_domain_empty {
        return Ok(InferenceOutcome {
            result: Some(result),
            run_domain_empty: true,
        });
    }

    raise_if_incomplete(&states)?;
    apply_states(&mut result, &states);
    Ok(InferenceOutcome {
        result: Some(result),
        run_domain_empty: false,
    })
}

/// Infers the type of the sort-by attribute.
///
/// Unlike plain filter inference, the remote pass is restricted by the run
/// filter: sort order only matters over the filtered domain.
pub(crate) async fn infer_sort_by_type<C: BackendClient>(
    client: &C,
    project_identifier: &ProjectIdentifier,
    run_filter: Option<&Filter>,
    sort_by: &Attribute,
    container_type: ContainerType,
    executor: &Executor,
    defs_executor: &Executor,
    settings: &Settings,
) -> Result<InferenceOutcome<Attribute>> {
    let mut result = sort_by.clone();
    let mut states = vec![AttributeState::from_attribute(&result)];
    infer_locally(&mut states);

    let mut run_domain_empty = false;
    if !states[0].is_finalized() {
        run_domain_empty = infer_remotely(
            client,
            project_identifier,
            run_filter,
            container_type,
            &mut states,
            executor,
            defs_executor,
            settings,
        )
        .await?;
    }
    if run_domain_empty {
        return Ok(InferenceOutcome {
            result,
            run_domain_empty: true,
        });
    }

    raise_if_incomplete(&states)?;
    if result.r#type.is_none() {
        result.r#type = states[0].inferred;
    }
    Ok(InferenceOutcome {
        result,
        run_domain_empty: false,
    })
}

fn collect_states(filter: &Filter) -> Vec<AttributeState> {
    let mut states = Vec::new();
    filter.for_each_attribute(&mut |attribute| {
        states.push(AttributeState::from_attribute(attribute));
    });
    states
}

/// The local pass: well-known system names first, then the aggregation
/// tables. Idempotent: finalized states are never revisited.
fn infer_locally(states: &mut [AttributeState]) {
    for state in states.iter_mut().filter(|state| !state.is_finalized()) {
        if let Some((_, known)) = KNOWN_SYS_ATTRIBUTES
            .iter()
            .find(|(name, _)| *name == state.name)
        {
            state.set_success(*known, "inferred from attribute name");
            continue;
        }
        if let Some(aggregation) = state.aggregation {
            let matches: Vec<AttributeType> = [
                AttributeType::FloatSeries,
                AttributeType::StringSeries,
                AttributeType::FileSeries,
                AttributeType::HistogramSeries,
            ]
            .into_iter()
            .filter(|r#type| r#type.aggregations().contains(&aggregation))
            .collect();
            if let [only] = matches.as_slice() {
                state.set_success(*only, "inferred from aggregation");
            }
        }
    }
}

/// The remote pass: one attribute-definition query restricted to the
/// residual names, fanned out over the run domain. Returns whether the run
/// domain turned out to be empty.
#[allow(clippy::too_many_arguments)]
async fn infer_remotely<C: BackendClient>(
    client: &C,
    project_identifier: &ProjectIdentifier,
    run_filter: Option<&Filter>,
    container_type: ContainerType,
    states: &mut [AttributeState],
    executor: &Executor,
    defs_executor: &Executor,
    settings: &Settings,
) -> Result<bool> {
    let names: BTreeSet<String> = states
        .iter()
        .filter(|state| !state.is_finalized())
        .map(|state| state.name.clone())
        .collect();
    let name_filter = AttributeFilterExpr::from(AttributeFilter::name_eq(names.clone()));

    let mut sys_ids: Vec<SysId> = Vec::new();
    {
        let pages = fetch_sys_ids(
            client,
            project_identifier,
            container_type,
            run_filter,
            settings.fetcher_sys_attrs_batch_size,
        );
        futures::pin_mut!(pages);
        while let Some(page) = pages.try_next().await? {
            sys_ids.extend(page.items);
        }
    }
    if sys_ids.is_empty() {
        return Ok(true);
    }

    let splits = split::split_sys_ids(
        &sys_ids,
        settings.fetcher_sys_attrs_batch_size,
        settings.fetcher_query_size_limit,
    );
    let defs_batch_size = settings.fetcher_attribute_definitions_batch_size;

    let mut observed: HashMap<String, BTreeSet<AttributeType>> = HashMap::new();
    let merged = generate_concurrently(
        stream::iter(splits.into_iter().map(Ok)).boxed(),
        executor,
        |sys_ids_split: Vec<SysId>| {
            let runs: Vec<RunIdentifier> = sys_ids_split
                .into_iter()
                .map(|sys_id| RunIdentifier::new(project_identifier.clone(), sys_id))
                .collect();
            fetch_attribute_definitions(
                client,
                project_identifier,
                Some(&runs),
                &name_filter,
                defs_executor,
                defs_batch_size,
            )
        },
    );
    gather_results(merged, |page| {
        for definition in page.items {
            observed
                .entry(definition.name)
                .or_default()
                .insert(definition.r#type);
        }
        Ok(())
    })
    .await?;

    let container_name = match container_type {
        ContainerType::Run => "runs",
        ContainerType::Experiment => "experiments",
    };
    for state in states.iter_mut().filter(|state| !state.is_finalized()) {
        match observed.get(&state.name) {
            Some(types) if types.len() == 1 => {
                let only = *types.iter().next().expect("non-empty set");
                state.set_success(only, "inferred from the backend");
            }
            Some(types) if types.len() > 1 => {
                let types: Vec<&str> = types.iter().map(|t| t.as_str()).collect();
                state.error = Some(format!(
                    "the attribute name appears in multiple {container_name} with \
                     conflicting types: {}",
                    types.join(", ")
                ));
            }
            _ => {}
        }
    }
    Ok(false)
}

/// Raises the terminal inference error, listing every attribute that is
/// still unresolved and why.
fn raise_if_incomplete(states: &[AttributeState]) -> Result<()> {
    let failures: Vec<(String, String)> = states
        .iter()
        .filter(|state| state.inferred.is_none())
        .map(|state| {
            let reason = state
                .error
                .clone()
                .unwrap_or_else(|| "could not find the attribute".to_string());
            (state.name.clone(), reason)
        })
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(ErrorKind::AttributeTypeInference { failures }.into())
    }
}

/// Pins the resolved types onto the result filter, by traversal position.
fn apply_states(filter: &mut Filter, states: &[AttributeState]) {
    let mut position = 0usize;
    filter.for_each_attribute_mut(&mut |attribute| {
        if attribute.r#type.is_none() {
            attribute.r#type = states[position].inferred;
        }
        position += 1;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn states_for(filter: &Filter) -> Vec<AttributeState> {
        let mut states = collect_states(filter);
        infer_locally(&mut states);
        states
    }

    #[test]
    fn known_sys_names_resolve_locally() {
        let filter = Filter::eq("sys/owner", "vidar") & Filter::exists("sys/tags");
        let states = states_for(&filter);
        assert_eq!(states[0].inferred, Some(AttributeType::String));
        assert_eq!(states[1].inferred, Some(AttributeType::StringSet));
        assert_eq!(states[0].reason, Some("inferred from attribute name"));
    }

    #[test]
    fn unambiguous_aggregation_resolves_locally() {
        let filter = Filter::gt(
            Attribute::new("val/loss").with_aggregation(Aggregation::Variance),
            0.0,
        );
        let states = states_for(&filter);
        assert_eq!(states[0].inferred, Some(AttributeType::FloatSeries));
        assert_eq!(states[0].reason, Some("inferred from aggregation"));
    }

    #[test]
    fn last_aggregation_is_ambiguous_locally() {
        // Every series type supports `last`, so the local pass cannot decide.
        let filter = Filter::gt(
            Attribute::new("val/loss").with_aggregation(Aggregation::Last),
            0.0,
        );
        let states = states_for(&filter);
        assert_eq!(states[0].inferred, None);
        assert!(states[0].error.is_none());
    }

    #[test]
    fn provided_types_are_left_alone() {
        let filter = Filter::eq(
            Attribute::new("config/batch_size").with_type(AttributeType::Int),
            64,
        );
        let states = states_for(&filter);
        assert_eq!(states[0].inferred, Some(AttributeType::Int));
        assert_eq!(states[0].reason, Some("type provided"));
    }

    #[test]
    fn local_pass_is_idempotent() {
        let filter = Filter::eq("sys/owner", "v")
            & Filter::gt(
                Attribute::new("m").with_aggregation(Aggregation::Min),
                1.0,
            );
        let mut first = collect_states(&filter);
        infer_locally(&mut first);
        let mut second = first.clone();
        infer_locally(&mut second);
        assert_eq!(
            first.iter().map(|s| s.inferred).collect::<Vec<_>>(),
            second.iter().map(|s| s.inferred).collect::<Vec<_>>(),
        );
    }

    #[test]
    fn apply_pins_types_by_position() {
        let mut filter = Filter::eq("a", 1) & Filter::eq("a", 2.0);
        let states = vec![
            AttributeState {
                name: "a".into(),
                aggregation: None,
                inferred: Some(AttributeType::Int),
                reason: None,
                error: None,
            },
            AttributeState {
                name: "a".into(),
                aggregation: None,
                inferred: Some(AttributeType::Float),
                reason: None,
                error: None,
            },
        ];
        apply_states(&mut filter, &states);
        let mut seen = Vec::new();
        filter.for_each_attribute(&mut |attribute| seen.push(attribute.r#type));
        assert_eq!(
            seen,
            vec![Some(AttributeType::Int), Some(AttributeType::Float)]
        );
    }

    #[test]
    fn incomplete_states_raise_with_every_failure() {
        let filter = Filter::eq("missing/a", 1) & Filter::eq("missing/b", 2);
        let states = states_for(&filter);
        let error = raise_if_incomplete(&states).unwrap_err();
        match error.kind() {
            ErrorKind::AttributeTypeInference { failures } => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].0, "missing/a");
                assert_eq!(failures[1].0, "missing/b");
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }
}
