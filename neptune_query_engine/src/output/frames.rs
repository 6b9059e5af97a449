// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Assembly of the metric and series frames.
//!
//! Both frames share one shape: rows indexed by `(label, step)`, sorted by
//! label then step ascending, and one column per attribute path, sorted by
//! name. Labels are interned, with rows carrying a code into the label
//! table, to keep memory flat when a query returns millions of points over
//! a handful of runs.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::identifiers::{Label, RunAttributeDefinition, SysId};
use crate::retrieval::attribute_values::millis_to_utc;
use crate::retrieval::metrics::FloatPointValue;
use crate::retrieval::series::{SeriesPointValue, SeriesValue};

/// One metric sample in the frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MetricCell {
    pub value: f64,
    pub absolute_time: Option<DateTime<Utc>>,
    pub is_preview: bool,
    pub preview_completion: f64,
}

/// One non-numeric sample in the frame.
#[derive(Clone, Debug, PartialEq)]
pub struct SeriesCell {
    pub value: SeriesPointValue,
    pub absolute_time: Option<DateTime<Utc>>,
}

/// One `(label, step)` row; cells are positional against the frame columns.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameRow<Cell> {
    label_code: u32,
    pub step: f64,
    cells: Vec<Option<Cell>>,
}

impl<Cell> FrameRow<Cell> {
    pub fn cells(&self) -> &[Option<Cell>] {
        &self.cells
    }
}

/// The metric point frame.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricsFrame {
    index_name: &'static str,
    include_absolute_time: bool,
    include_point_previews: bool,
    labels: Vec<Label>,
    columns: Vec<String>,
    rows: Vec<FrameRow<MetricCell>>,
}

impl MetricsFrame {
    pub(crate) fn empty(
        index_name: &'static str,
        include_absolute_time: bool,
        include_point_previews: bool,
    ) -> Self {
        Self {
            index_name,
            include_absolute_time,
            include_point_previews,
            labels: Vec::new(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub(crate) fn from_points(
        index_name: &'static str,
        metrics_data: HashMap<RunAttributeDefinition, Vec<FloatPointValue>>,
        label_map: &HashMap<SysId, Label>,
        include_absolute_time: bool,
        include_point_previews: bool,
        type_suffix_in_column_names: bool,
    ) -> Self {
        let column_name = |path: &str| {
            if type_suffix_in_column_names {
                format!("{path}:float_series")
            } else {
                path.to_string()
            }
        };
        let (labels, columns, rows) = pivot(
            metrics_data,
            label_map,
            column_name,
            |point| point.step,
            |point| MetricCell {
                value: point.value,
                absolute_time: include_absolute_time
                    .then(|| millis_to_utc(point.timestamp_millis)),
                is_preview: point.is_preview,
                preview_completion: point.preview_completion,
            },
        );
        Self {
            index_name,
            include_absolute_time,
            include_point_previews,
            labels,
            columns,
            rows,
        }
    }

    pub fn index_name(&self) -> &str {
        self.index_name
    }

    /// The per-path subcolumns this frame exposes; `value` always, the rest
    /// by request.
    pub fn subcolumns(&self) -> Vec<&'static str> {
        let mut subcolumns = vec!["value"];
        if self.include_absolute_time {
            subcolumns.push("absolute_time");
        }
        if self.include_point_previews {
            subcolumns.push("is_preview");
            subcolumns.push("preview_completion");
        }
        subcolumns
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[FrameRow<MetricCell>] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn label_of(&self, row: &FrameRow<MetricCell>) -> &str {
        &self.labels[row.label_code as usize]
    }

    /// The steps recorded for one label and path, in row order.
    pub fn steps(&self, label: &str, path: &str) -> Vec<f64> {
        let Some(column) = self.columns.iter().position(|c| c == path) else {
            return Vec::new();
        };
        self.rows
            .iter()
            .filter(|row| self.label_of(row) == label && row.cells[column].is_some())
            .map(|row| row.step)
            .collect()
    }

    /// The values recorded for one label and path, in row order.
    pub fn values(&self, label: &str, path: &str) -> Vec<f64> {
        let Some(column) = self.columns.iter().position(|c| c == path) else {
            return Vec::new();
        };
        self.rows
            .iter()
            .filter(|row| self.label_of(row) == label)
            .filter_map(|row| row.cells[column].as_ref().map(|cell| cell.value))
            .collect()
    }
}

/// The non-numeric series frame: same shape as the metric frame, object
/// values, no preview subcolumns.
#[derive(Clone, Debug, PartialEq)]
pub struct SeriesFrame {
    index_name: &'static str,
    include_absolute_time: bool,
    labels: Vec<Label>,
    columns: Vec<String>,
    rows: Vec<FrameRow<SeriesCell>>,
}

impl SeriesFrame {
    pub(crate) fn empty(index_name: &'static str, include_absolute_time: bool) -> Self {
        Self {
            index_name,
            include_absolute_time,
            labels: Vec::new(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub(crate) fn from_values(
        index_name: &'static str,
        series_data: HashMap<RunAttributeDefinition, Vec<SeriesValue>>,
        label_map: &HashMap<SysId, Label>,
        include_absolute_time: bool,
    ) -> Self {
        let (labels, columns, rows) = pivot(
            series_data,
            label_map,
            |path| path.to_string(),
            |point| point.step,
            |point| SeriesCell {
                value: point.value.clone(),
                absolute_time: include_absolute_time
                    .then(|| millis_to_utc(point.timestamp_millis)),
            },
        );
        Self {
            index_name,
            include_absolute_time,
            labels,
            columns,
            rows,
        }
    }

    pub fn index_name(&self) -> &str {
        self.index_name
    }

    pub fn subcolumns(&self) -> Vec<&'static str> {
        if self.include_absolute_time {
            vec!["value", "absolute_time"]
        } else {
            vec!["value"]
        }
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[FrameRow<SeriesCell>] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn label_of(&self, row: &FrameRow<SeriesCell>) -> &str {
        &self.labels[row.label_code as usize]
    }

    /// The cell at `(label, step, path)`, if present.
    pub fn cell(&self, label: &str, step: f64, path: &str) -> Option<&SeriesCell> {
        let column = self.columns.iter().position(|c| c == path)?;
        self.rows
            .iter()
            .find(|row| self.label_of(row) == label && row.step == step)?
            .cells[column]
            .as_ref()
    }
}

/// Pivots per-series point lists into `(label, step)` rows.
///
/// Labels and columns come out sorted; a `(label, step)` pair occupied by
/// several paths shares one row. Step comparison is exact; no epsilon
/// smoothing is applied.
fn pivot<Point, Cell>(
    data: HashMap<RunAttributeDefinition, Vec<Point>>,
    label_map: &HashMap<SysId, Label>,
    column_name: impl Fn(&str) -> String,
    step_of: impl Fn(&Point) -> f64,
    make_cell: impl Fn(&Point) -> Cell,
) -> (Vec<Label>, Vec<String>, Vec<FrameRow<Cell>>) {
    // Series that returned no points contribute neither labels nor columns.
    let data: HashMap<RunAttributeDefinition, Vec<Point>> = data
        .into_iter()
        .filter(|(_, points)| !points.is_empty())
        .collect();

    let label_of = |sys_id: &SysId| {
        label_map
            .get(sys_id)
            .cloned()
            .unwrap_or_else(|| sys_id.to_string())
    };

    let labels: Vec<Label> = data
        .keys()
        .map(|series| label_of(&series.run_identifier.sys_id))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let columns: Vec<String> = data
        .keys()
        .map(|series| column_name(&series.attribute_definition.name))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut row_index: HashMap<(u32, u64), usize> = HashMap::new();
    let mut rows: Vec<FrameRow<Cell>> = Vec::new();

    for (series, points) in &data {
        let label = label_of(&series.run_identifier.sys_id);
        let label_code = labels
            .binary_search(&label)
            .expect("every label is interned") as u32;
        let column = columns
            .binary_search(&column_name(&series.attribute_definition.name))
            .expect("every column is declared");

        for point in points {
            let step = step_of(point);
            let row = *row_index
                .entry((label_code, step.to_bits()))
                .or_insert_with(|| {
                    rows.push(FrameRow {
                        label_code,
                        step,
                        cells: std::iter::repeat_with(|| None).take(columns.len()).collect(),
                    });
                    rows.len() - 1
                });
            rows[row].cells[column] = Some(make_cell(point));
        }
    }

    rows.sort_by(|a, b| {
        a.label_code
            .cmp(&b.label_code)
            .then(a.step.total_cmp(&b.step))
    });

    (labels, columns, rows)
}
