// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Run and experiment search: resolves a filter into pages of
//! `(SysId, Label)` pairs, in backend order.

use futures::stream;
use futures::Stream;

use crate::filter::{Attribute, Filter};
use crate::identifiers::{Label, ProjectIdentifier, SysId};
use crate::retrieval::util::Page;
use crate::transport::{BackendClient, PageRequest, SearchEntriesRequest, SearchEntry, SortRequest};
use crate::Result;

/// What kind of container a query addresses.
///
/// Experiment queries return lineage heads labeled by `sys/name`; run queries
/// return individual runs labeled by `sys/custom_run_id`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerType {
    Run,
    Experiment,
}

impl ContainerType {
    pub(crate) fn wire_tag(&self) -> &'static str {
        match self {
            ContainerType::Run => "run",
            ContainerType::Experiment => "experiment",
        }
    }

    /// The index name of tables and frames produced for this container type.
    pub fn index_column_name(&self) -> &'static str {
        match self {
            ContainerType::Run => "run",
            ContainerType::Experiment => "experiment",
        }
    }

    fn label_of(&self, entry: &SearchEntry) -> Label {
        match self {
            ContainerType::Experiment => entry.sys_name.clone().unwrap_or_default(),
            ContainerType::Run => entry.custom_run_id.clone().unwrap_or_default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

impl SortDirection {
    pub(crate) fn wire_tag(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "ascending",
            SortDirection::Descending => "descending",
        }
    }
}

/// One search hit: the run's sys id and its user-facing label.
#[derive(Clone, Debug, PartialEq)]
pub struct SysIdLabel {
    pub sys_id: SysId,
    pub label: Label,
}

/// Streams pages of matching identifiers and labels.
///
/// The filter is evaluated server-side; `sort_by` takes precedence over
/// arrival order, and when `limit` is set the total number of items across
/// all pages never exceeds it.
pub(crate) fn fetch_sys_id_labels<'a, C: BackendClient>(
    client: &'a C,
    project_identifier: &ProjectIdentifier,
    container_type: ContainerType,
    filter: Option<&Filter>,
    sort_by: Option<&Attribute>,
    sort_direction: SortDirection,
    limit: Option<usize>,
    batch_size: usize,
) -> impl Stream<Item = Result<Page<SysIdLabel>>> + Send + 'a {
    struct State {
        request: SearchEntriesRequest,
        token: Option<String>,
        remaining: Option<usize>,
        done: bool,
    }

    let request = SearchEntriesRequest {
        project_identifier: project_identifier.to_string(),
        types: vec![container_type.wire_tag().to_string()],
        query: filter.map(Filter::to_query),
        sort_by: sort_by.map(|attribute| SortRequest {
            name: attribute.name.clone(),
            r#type: attribute
                .r#type
                .map(|t| t.backend_tag().to_string())
                .unwrap_or_else(|| "string".to_string()),
            direction: sort_direction.wire_tag().to_string(),
        }),
        pagination: PageRequest::first(batch_size),
    };

    let state = State {
        request,
        token: None,
        remaining: limit,
        done: false,
    };

    stream::try_unfold(state, move |mut state| async move {
        if state.done {
            return Ok(None);
        }
        let page_limit = state
            .remaining
            .map_or(batch_size, |remaining| remaining.min(batch_size));
        if page_limit == 0 {
            return Ok(None);
        }

        state.request.pagination = PageRequest {
            limit: page_limit,
            next_page_token: state.token.clone(),
        };
        let response = client.search_entries(state.request.clone()).await?;

        let mut items: Vec<SysIdLabel> = response
            .entries
            .iter()
            .map(|entry| SysIdLabel {
                sys_id: SysId::new(entry.sys_id.clone()),
                label: container_type.label_of(entry),
            })
            .collect();
        if let Some(remaining) = &mut state.remaining {
            items.truncate(*remaining);
            *remaining -= items.len();
        }

        state.token = response.next_page_token.filter(|token| !token.is_empty());
        state.done = state.token.is_none();

        Ok(Some((Page::new(items), state)))
    })
}

/// Convenience wrapper for callers that only need the identifiers.
pub(crate) fn fetch_sys_ids<'a, C: BackendClient>(
    client: &'a C,
    project_identifier: &ProjectIdentifier,
    container_type: ContainerType,
    filter: Option<&Filter>,
    batch_size: usize,
) -> impl Stream<Item = Result<Page<SysId>>> + Send + 'a {
    use futures::StreamExt;
    fetch_sys_id_labels(
        client,
        project_identifier,
        container_type,
        filter,
        None,
        SortDirection::default(),
        None,
        batch_size,
    )
    .map(|page| {
        page.map(|page| Page::new(page.items.into_iter().map(|item| item.sys_id).collect()))
    })
}
