// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Assembly of the files listing frame.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

use crate::identifiers::{AttributeDefinition, Label, RunIdentifier, SysId};

/// One row per label, one column per attribute name, each cell holding the
/// resolved local path or `None` when the file was absent or not downloaded.
#[derive(Clone, Debug, PartialEq)]
pub struct FilesFrame {
    index_name: &'static str,
    columns: Vec<String>,
    rows: Vec<(Label, Vec<Option<String>>)>,
}

impl FilesFrame {
    /// Builds the frame from resolved download entries.
    pub fn from_entries(
        index_name: &'static str,
        entries: Vec<(RunIdentifier, AttributeDefinition, Option<PathBuf>)>,
        label_map: &HashMap<SysId, Label>,
    ) -> Self {
        if entries.is_empty() {
            return Self {
                index_name,
                columns: Vec::new(),
                rows: Vec::new(),
            };
        }

        let label_of = |sys_id: &SysId| {
            label_map
                .get(sys_id)
                .cloned()
                .unwrap_or_else(|| sys_id.to_string())
        };

        let columns: Vec<String> = entries
            .iter()
            .map(|(_, definition, _)| definition.name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut cells: BTreeMap<Label, Vec<Option<String>>> = BTreeMap::new();
        for (run, definition, path) in entries {
            let row = cells
                .entry(label_of(&run.sys_id))
                .or_insert_with(|| vec![None; columns.len()]);
            let column = columns
                .binary_search(&definition.name)
                .expect("every column is declared");
            row[column] = path.map(|path| path.display().to_string());
        }

        Self {
            index_name,
            columns,
            rows: cells.into_iter().collect(),
        }
    }

    pub fn index_name(&self) -> &str {
        self.index_name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[(Label, Vec<Option<String>>)] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::ProjectIdentifier;
    use crate::types::AttributeType;
    use pretty_assertions::assert_eq;

    #[test]
    fn one_row_per_label_with_sorted_columns() {
        let project = ProjectIdentifier::new("team/project");
        let run = |sys_id: &str| RunIdentifier::new(project.clone(), SysId::new(sys_id));
        let definition =
            |name: &str| AttributeDefinition::new(name, AttributeType::File);

        let labels: HashMap<SysId, Label> = HashMap::from([
            (SysId::new("R-1"), "alpha".to_string()),
            (SysId::new("R-2"), "beta".to_string()),
        ]);
        let frame = FilesFrame::from_entries(
            "experiment",
            vec![
                (
                    run("R-1"),
                    definition("z/model"),
                    Some(PathBuf::from("/tmp/model.bin")),
                ),
                (run("R-1"), definition("a/config"), None),
                (
                    run("R-2"),
                    definition("a/config"),
                    Some(PathBuf::from("/tmp/config.yaml")),
                ),
            ],
            &labels,
        );

        assert_eq!(frame.columns(), &["a/config".to_string(), "z/model".to_string()]);
        assert_eq!(frame.rows().len(), 2);
        assert_eq!(frame.rows()[0].0, "alpha");
        assert_eq!(
            frame.rows()[0].1,
            vec![None, Some("/tmp/model.bin".to_string())]
        );
        assert_eq!(
            frame.rows()[1].1,
            vec![Some("/tmp/config.yaml".to_string()), None]
        );
    }

    #[test]
    fn empty_entries_give_an_empty_frame() {
        let frame = FilesFrame::from_entries("run", Vec::new(), &HashMap::new());
        assert!(frame.is_empty());
        assert_eq!(frame.index_name(), "run");
    }
}
