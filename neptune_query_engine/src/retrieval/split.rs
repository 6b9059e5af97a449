// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Batch splitting shared by the fetch pipelines.
//!
//! Two budgets govern every wire request: an item-count budget and a byte
//! budget on the encoded request. Run identifiers are costed at a fixed
//! estimate rather than their actual length, so batch shapes stay stable
//! across projects.

use crate::identifiers::SysId;

/// Estimated wire cost of a single run identifier, in bytes.
pub(crate) const SYS_ID_SIZE_ESTIMATE: usize = 50;

/// Splits run identifiers into near-equal batches.
///
/// The per-batch cap is the smaller of the sys-attrs item budget and the
/// number of identifier estimates fitting the query byte budget (4400 by
/// default). The input is divided into the fewest batches that respect the
/// cap, sized as evenly as possible: 10 000 identifiers split into
/// 3334 / 3334 / 3332.
pub(crate) fn split_sys_ids(
    sys_ids: &[SysId],
    batch_size: usize,
    query_size_limit: usize,
) -> Vec<Vec<SysId>> {
    if sys_ids.is_empty() {
        return Vec::new();
    }
    let cap = batch_size
        .min(query_size_limit / SYS_ID_SIZE_ESTIMATE)
        .max(1);
    let batches = sys_ids.len().div_ceil(cap);
    let batch_len = sys_ids.len().div_ceil(batches);
    sys_ids.chunks(batch_len).map(|chunk| chunk.to_vec()).collect()
}

/// Packs items into batches so that a batch never exceeds `batch_size` items
/// nor `query_size_limit` bytes of encoded paths. Greedy and stable: items
/// keep their order, and a batch is closed exactly when the next item would
/// overflow either budget.
///
/// A single item larger than the whole byte budget is emitted alone, with a
/// warning; splitting it is impossible and dropping it would violate
/// exhaustiveness.
pub(crate) fn split_series_attributes<T>(
    items: Vec<T>,
    batch_size: usize,
    query_size_limit: usize,
    get_path: impl Fn(&T) -> &str,
) -> Vec<Vec<T>> {
    let mut batches = Vec::new();
    let mut current: Vec<T> = Vec::new();
    let mut current_bytes = 0usize;

    for item in items {
        let path_bytes = get_path(&item).len();
        if path_bytes > query_size_limit {
            tracing::warn!(
                path_bytes,
                query_size_limit,
                "attribute path exceeds the query size budget; sending it alone"
            );
        }
        if !current.is_empty()
            && (current.len() >= batch_size || current_bytes + path_bytes > query_size_limit)
        {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += path_bytes;
        current.push(item);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Budgets an attribute-values request: attribute-name batches are packed
/// against the byte budget less one identifier estimate, and each request
/// carries at most as many runs as fit the byte budget next to the largest
/// name batch, capped so the run × attribute item count stays within the
/// values batch size.
pub(crate) fn split_attribute_values<T>(
    items: Vec<T>,
    batch_size: usize,
    query_size_limit: usize,
    get_path: impl Fn(&T) -> &str,
) -> (Vec<Vec<T>>, usize) {
    let name_budget = query_size_limit.saturating_sub(SYS_ID_SIZE_ESTIMATE);
    let batches = split_series_attributes(items, batch_size, name_budget, &get_path);

    let largest_bytes = batches
        .iter()
        .map(|batch| batch.iter().map(|item| get_path(item).len()).sum::<usize>())
        .max()
        .unwrap_or(0);
    let largest_len = batches.iter().map(Vec::len).max().unwrap_or(1).max(1);

    let runs_by_bytes = query_size_limit.saturating_sub(largest_bytes) / SYS_ID_SIZE_ESTIMATE;
    let runs_by_items = batch_size / largest_len;
    let runs_per_request = runs_by_bytes.min(runs_by_items).max(1);

    (batches, runs_per_request)
}

/// Splits runs greedily at the cap computed by [`split_attribute_values`].
pub(crate) fn split_runs_for_values(sys_ids: &[SysId], runs_per_request: usize) -> Vec<Vec<SysId>> {
    sys_ids
        .chunks(runs_per_request.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}
