// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Assembly of the experiments/runs metadata table.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::identifiers::{AttributeDefinition, Label};
use crate::retrieval::attribute_values::AttributeValue;
use crate::types::{Aggregation, FileRef, Histogram, Value};
use crate::{ErrorKind, Result};

/// A single table cell.
#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    String(String),
    Datetime(DateTime<Utc>),
    StringSet(BTreeSet<String>),
    File(FileRef),
    Histogram(Histogram),
}

/// A two-level column header: the attribute name and the aggregation
/// subcolumn (empty for plain scalars).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableColumn {
    pub attribute: String,
    pub subcolumn: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableRow {
    pub label: Label,
    cells: Vec<Option<CellValue>>,
}

impl TableRow {
    pub fn cells(&self) -> &[Option<CellValue>] {
        &self.cells
    }
}

/// The metadata table of an experiments/runs query.
///
/// Rows are containers in first-arrival order of their identifiers; columns
/// are sorted lexicographically by `(attribute, subcolumn)`. An empty table
/// keeps its index name and an empty column header.
#[derive(Clone, Debug, PartialEq)]
pub struct RunsTable {
    index_name: &'static str,
    columns: Vec<TableColumn>,
    rows: Vec<TableRow>,
}

impl RunsTable {
    pub(crate) fn empty(index_name: &'static str) -> Self {
        Self {
            index_name,
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Builds the table from per-row attribute values.
    ///
    /// Series-typed values contribute one subcolumn per aggregation selected
    /// for their definition; file values flatten into three subcolumns when
    /// requested. With `type_suffix_in_column_names` unset, attribute names
    /// that collapse onto each other with different types are a
    /// [`ErrorKind::ConflictingAttributeTypes`] error.
    pub(crate) fn from_rows(
        index_name: &'static str,
        rows: Vec<(Label, Vec<AttributeValue>)>,
        selected_aggregations: &HashMap<AttributeDefinition, BTreeSet<Aggregation>>,
        type_suffix_in_column_names: bool,
        flatten_file_properties: bool,
    ) -> Result<Self> {
        if rows.is_empty() {
            return Ok(Self::empty(index_name));
        }

        // Cells keyed by the type-suffixed column name first; the suffix is
        // stripped (and checked for collisions) after all rows are known.
        let mut row_cells: Vec<(Label, BTreeMap<TableColumn, CellValue>)> =
            Vec::with_capacity(rows.len());
        for (label, values) in rows {
            let mut cells: BTreeMap<TableColumn, CellValue> = BTreeMap::new();
            for value in values {
                append_cells(
                    &mut cells,
                    &value,
                    selected_aggregations,
                    flatten_file_properties,
                )?;
            }
            row_cells.push((label, cells));
        }

        let typed_columns: BTreeSet<TableColumn> = row_cells
            .iter()
            .flat_map(|(_, cells)| cells.keys().cloned())
            .collect();

        let columns: Vec<TableColumn> = if type_suffix_in_column_names {
            typed_columns.into_iter().collect()
        } else {
            strip_type_suffixes(&typed_columns)?
        };

        let index_of: HashMap<&TableColumn, usize> = if type_suffix_in_column_names {
            columns.iter().enumerate().map(|(i, c)| (c, i)).collect()
        } else {
            HashMap::new()
        };

        let rows = row_cells
            .into_iter()
            .map(|(label, cells)| {
                let mut materialized: Vec<Option<CellValue>> = vec![None; columns.len()];
                for (column, cell) in cells {
                    let position = if type_suffix_in_column_names {
                        index_of[&column]
                    } else {
                        let stripped = TableColumn {
                            attribute: strip_suffix(&column.attribute).to_string(),
                            subcolumn: column.subcolumn.clone(),
                        };
                        columns
                            .binary_search(&stripped)
                            .expect("every stripped column is declared")
                    };
                    materialized[position] = Some(cell);
                }
                TableRow {
                    label,
                    cells: materialized,
                }
            })
            .collect();

        Ok(Self {
            index_name,
            columns,
            rows,
        })
    }

    /// `experiment` or `run`.
    pub fn index_name(&self) -> &str {
        self.index_name
    }

    pub fn columns(&self) -> &[TableColumn] {
        &self.columns
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.rows.iter().map(|row| row.label.as_str()).collect()
    }

    /// The cell at `(label, attribute, subcolumn)`, if present.
    pub fn cell(&self, label: &str, attribute: &str, subcolumn: &str) -> Option<&CellValue> {
        let row = self.rows.iter().find(|row| row.label == label)?;
        let position = self
            .columns
            .iter()
            .position(|c| c.attribute == attribute && c.subcolumn == subcolumn)?;
        row.cells[position].as_ref()
    }
}

/// Expands one attribute value into its cells.
fn append_cells(
    cells: &mut BTreeMap<TableColumn, CellValue>,
    value: &AttributeValue,
    selected_aggregations: &HashMap<AttributeDefinition, BTreeSet<Aggregation>>,
    flatten_file_properties: bool,
) -> Result<()> {
    let definition = &value.attribute_definition;
    let column_name = format!("{}:{}", definition.name, definition.r#type);

    let mut insert = |subcolumn: &str, cell: CellValue| -> Result<()> {
        let column = TableColumn {
            attribute: column_name.clone(),
            subcolumn: subcolumn.to_string(),
        };
        if cells.insert(column, cell).is_some() {
            return Err(ErrorKind::ConflictingAttributeTypes {
                conflicts: vec![(
                    definition.name.clone(),
                    vec![definition.r#type.to_string()],
                )],
            }
            .into());
        }
        Ok(())
    };

    match &value.value {
        Value::Float(v) => insert("", CellValue::Float(*v))?,
        Value::Int(v) => insert("", CellValue::Int(*v))?,
        Value::Bool(v) => insert("", CellValue::Bool(*v))?,
        Value::String(v) => insert("", CellValue::String(v.clone()))?,
        Value::Datetime(v) => insert("", CellValue::Datetime(*v))?,
        Value::StringSet(v) => insert("", CellValue::StringSet(v.clone()))?,
        Value::File(file) => {
            if flatten_file_properties {
                insert("path", CellValue::String(file.path.clone()))?;
                insert("size_bytes", CellValue::Int(file.size_bytes as i64))?;
                insert("mime_type", CellValue::String(file.mime_type.clone()))?;
            } else {
                insert("", CellValue::File(file.clone()))?;
            }
        }
        Value::FloatSeries(aggregations) => {
            for aggregation in selected(selected_aggregations, definition) {
                let cell = match aggregation {
                    Aggregation::Last => CellValue::Float(aggregations.last),
                    Aggregation::Min => CellValue::Float(aggregations.min),
                    Aggregation::Max => CellValue::Float(aggregations.max),
                    Aggregation::Average => CellValue::Float(aggregations.average),
                    Aggregation::Variance => CellValue::Float(aggregations.variance),
                };
                insert(aggregation.as_str(), cell)?;
            }
        }
        Value::StringSeries(aggregations) => {
            for aggregation in selected(selected_aggregations, definition) {
                if aggregation == Aggregation::Last {
                    if let Some(last) = &aggregations.last {
                        insert("last", CellValue::String(last.clone()))?;
                    }
                }
            }
        }
        Value::FileSeries(aggregations) => {
            for aggregation in selected(selected_aggregations, definition) {
                if aggregation == Aggregation::Last {
                    if let Some(last) = &aggregations.last {
                        insert("last", CellValue::File(last.clone()))?;
                    }
                }
            }
        }
        Value::HistogramSeries(aggregations) => {
            for aggregation in selected(selected_aggregations, definition) {
                if aggregation == Aggregation::Last {
                    if let Some(last) = &aggregations.last {
                        insert("last", CellValue::Histogram(last.clone()))?;
                    }
                }
            }
        }
    }
    Ok(())
}

/// The aggregations selected for a definition, restricted to the ones its
/// type supports.
fn selected(
    selected_aggregations: &HashMap<AttributeDefinition, BTreeSet<Aggregation>>,
    definition: &AttributeDefinition,
) -> Vec<Aggregation> {
    let supported = definition.r#type.aggregations();
    selected_aggregations
        .get(definition)
        .map(|requested| {
            requested
                .iter()
                .copied()
                .filter(|aggregation| supported.contains(aggregation))
                .collect()
        })
        .unwrap_or_default()
}

fn strip_suffix(typed_name: &str) -> &str {
    typed_name.rsplit_once(':').map_or(typed_name, |(name, _)| name)
}

fn type_of(typed_name: &str) -> &str {
    typed_name.rsplit_once(':').map_or("", |(_, r#type)| r#type)
}

/// Strips type suffixes from the column names, failing when two attributes
/// of different types collapse onto the same name.
fn strip_type_suffixes(typed_columns: &BTreeSet<TableColumn>) -> Result<Vec<TableColumn>> {
    let mut types_by_name: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for column in typed_columns {
        types_by_name
            .entry(strip_suffix(&column.attribute))
            .or_default()
            .insert(type_of(&column.attribute));
    }

    let conflicts: Vec<(String, Vec<String>)> = types_by_name
        .iter()
        .filter(|(_, types)| types.len() > 1)
        .map(|(name, types)| {
            (
                name.to_string(),
                types.iter().map(|t| t.to_string()).collect(),
            )
        })
        .collect();
    if !conflicts.is_empty() {
        return Err(ErrorKind::ConflictingAttributeTypes { conflicts }.into());
    }

    let stripped: BTreeSet<TableColumn> = typed_columns
        .iter()
        .map(|column| TableColumn {
            attribute: strip_suffix(&column.attribute).to_string(),
            subcolumn: column.subcolumn.clone(),
        })
        .collect();
    Ok(stripped.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::{ProjectIdentifier, RunIdentifier, SysId};
    use crate::types::{AttributeType, FloatSeriesAggregations};
    use pretty_assertions::assert_eq;

    fn run(sys_id: &str) -> RunIdentifier {
        RunIdentifier::new(ProjectIdentifier::new("team/project"), SysId::new(sys_id))
    }

    fn value(sys_id: &str, name: &str, value: Value) -> AttributeValue {
        AttributeValue {
            run_identifier: run(sys_id),
            attribute_definition: AttributeDefinition::new(name, value.attribute_type()),
            value,
        }
    }

    #[test]
    fn empty_table_keeps_index_name_and_header() {
        let table = RunsTable::from_rows(
            "experiment",
            Vec::new(),
            &HashMap::new(),
            false,
            false,
        )
        .unwrap();
        assert!(table.is_empty());
        assert_eq!(table.index_name(), "experiment");
        assert!(table.columns().is_empty());
    }

    #[test]
    fn rows_keep_first_arrival_order_and_columns_sort() {
        let rows = vec![
            (
                "zulu".to_string(),
                vec![
                    value("R-1", "b/metric", Value::Int(2)),
                    value("R-1", "a/metric", Value::Int(1)),
                ],
            ),
            (
                "alpha".to_string(),
                vec![value("R-2", "a/metric", Value::Int(3))],
            ),
        ];
        let table =
            RunsTable::from_rows("experiment", rows, &HashMap::new(), false, false).unwrap();
        assert_eq!(table.labels(), vec!["zulu", "alpha"]);
        assert_eq!(
            table
                .columns()
                .iter()
                .map(|c| c.attribute.as_str())
                .collect::<Vec<_>>(),
            vec!["a/metric", "b/metric"]
        );
        assert_eq!(table.cell("zulu", "b/metric", ""), Some(&CellValue::Int(2)));
        assert_eq!(table.cell("alpha", "b/metric", ""), None);
    }

    #[test]
    fn series_values_expand_into_selected_aggregation_subcolumns() {
        let aggregations = FloatSeriesAggregations {
            last: 0.5,
            min: 0.1,
            max: 0.9,
            average: 0.4,
            variance: 0.02,
        };
        let definition = AttributeDefinition::new("metrics/loss", AttributeType::FloatSeries);
        let selected: HashMap<AttributeDefinition, BTreeSet<Aggregation>> = HashMap::from([(
            definition,
            BTreeSet::from([Aggregation::Last, Aggregation::Variance]),
        )]);
        let rows = vec![(
            "exp-A".to_string(),
            vec![value("R-1", "metrics/loss", Value::FloatSeries(aggregations))],
        )];
        let table = RunsTable::from_rows("experiment", rows, &selected, false, false).unwrap();
        assert_eq!(
            table.columns(),
            &[
                TableColumn {
                    attribute: "metrics/loss".into(),
                    subcolumn: "last".into()
                },
                TableColumn {
                    attribute: "metrics/loss".into(),
                    subcolumn: "variance".into()
                },
            ]
        );
        assert_eq!(
            table.cell("exp-A", "metrics/loss", "variance"),
            Some(&CellValue::Float(0.02))
        );
    }

    #[test]
    fn file_values_flatten_when_requested() {
        let file = FileRef {
            path: "artifacts/model.bin".into(),
            size_bytes: 1024,
            mime_type: "application/octet-stream".into(),
        };
        let rows = vec![(
            "exp-A".to_string(),
            vec![value("R-1", "model", Value::File(file))],
        )];
        let table = RunsTable::from_rows("experiment", rows, &HashMap::new(), false, true).unwrap();
        assert_eq!(
            table
                .columns()
                .iter()
                .map(|c| c.subcolumn.as_str())
                .collect::<Vec<_>>(),
            vec!["mime_type", "path", "size_bytes"]
        );
        assert_eq!(
            table.cell("exp-A", "model", "size_bytes"),
            Some(&CellValue::Int(1024))
        );
    }

    #[test]
    fn type_suffixes_stay_when_requested() {
        let rows = vec![(
            "exp-A".to_string(),
            vec![
                value("R-1", "config/batch_size", Value::Int(64)),
                value("R-1", "config/lr", Value::Float(0.1)),
            ],
        )];
        let table = RunsTable::from_rows("experiment", rows, &HashMap::new(), true, false).unwrap();
        assert_eq!(
            table
                .columns()
                .iter()
                .map(|c| c.attribute.as_str())
                .collect::<Vec<_>>(),
            vec!["config/batch_size:int", "config/lr:float"]
        );
    }

    #[test]
    fn collapsing_names_with_different_types_is_a_conflict() {
        let rows = vec![
            (
                "exp-A".to_string(),
                vec![value("R-1", "config/batch_size", Value::Int(64))],
            ),
            (
                "exp-B".to_string(),
                vec![value("R-2", "config/batch_size", Value::Float(64.0))],
            ),
        ];
        let error =
            RunsTable::from_rows("experiment", rows, &HashMap::new(), false, false).unwrap_err();
        match error.kind() {
            ErrorKind::ConflictingAttributeTypes { conflicts } => {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].0, "config/batch_size");
                assert_eq!(conflicts[0].1, vec!["float", "int"]);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
        assert!(error.is_user_error());
    }

    #[test]
    fn suffixed_columns_tolerate_conflicting_types() {
        let rows = vec![
            (
                "exp-A".to_string(),
                vec![value("R-1", "config/batch_size", Value::Int(64))],
            ),
            (
                "exp-B".to_string(),
                vec![value("R-2", "config/batch_size", Value::Float(64.0))],
            ),
        ];
        let table = RunsTable::from_rows("experiment", rows, &HashMap::new(), true, false).unwrap();
        assert_eq!(table.columns().len(), 2);
    }
}
