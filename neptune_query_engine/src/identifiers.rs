// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::types::AttributeType;

/// A `workspace/project` identifier.
///
/// Produced once at query entry and carried, immutably, through every
/// retrieval call issued for that query.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectIdentifier(String);

impl ProjectIdentifier {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self(identifier.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ProjectIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProjectIdentifier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// An opaque, server-issued short identifier of a run.
///
/// Unique within a project. The ordering of sys ids is not lexicographic and
/// is preserved exactly as received from the backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SysId(String);

impl SysId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SysId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SysId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// The user-facing name of a run or experiment.
///
/// Experiments are labeled by `sys/name`, plain runs by `sys/custom_run_id`.
/// The `SysId -> Label` mapping is built while a query runs and is consumed
/// only at result assembly.
pub type Label = String;

/// A run addressed within a specific project.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RunIdentifier {
    pub project_identifier: ProjectIdentifier,
    pub sys_id: SysId,
}

impl RunIdentifier {
    pub fn new(project_identifier: ProjectIdentifier, sys_id: SysId) -> Self {
        Self {
            project_identifier,
            sys_id,
        }
    }
}

impl Display for RunIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}/{}", self.project_identifier, self.sys_id)
    }
}

/// A named, typed attribute as known to the backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AttributeDefinition {
    pub name: String,
    pub r#type: AttributeType,
}

impl AttributeDefinition {
    pub fn new(name: impl Into<String>, r#type: AttributeType) -> Self {
        Self {
            name: name.into(),
            r#type,
        }
    }
}

/// The primary key of a series or metric fetch: one attribute of one run.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RunAttributeDefinition {
    pub run_identifier: RunIdentifier,
    pub attribute_definition: AttributeDefinition,
}

impl RunAttributeDefinition {
    pub fn new(run_identifier: RunIdentifier, attribute_definition: AttributeDefinition) -> Self {
        Self {
            run_identifier,
            attribute_definition,
        }
    }
}
