// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The closed set of attribute types, the aggregations each series type
//! supports, and the decoded value union carried through the pipeline.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};

use chrono::{DateTime, Utc};

use crate::{ErrorKind, Result};

/// Every attribute type the backend can report.
///
/// Within a single result table an attribute name must resolve to exactly one
/// of these unless type-suffixed column names are requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttributeType {
    Float,
    Int,
    String,
    Bool,
    Datetime,
    FloatSeries,
    StringSet,
    StringSeries,
    File,
    FileSeries,
    HistogramSeries,
}

/// All attribute types, in the order the backend documents them.
pub const ALL_TYPES: [AttributeType; 11] = [
    AttributeType::Float,
    AttributeType::Int,
    AttributeType::String,
    AttributeType::Bool,
    AttributeType::Datetime,
    AttributeType::FloatSeries,
    AttributeType::StringSet,
    AttributeType::StringSeries,
    AttributeType::File,
    AttributeType::FileSeries,
    AttributeType::HistogramSeries,
];

impl AttributeType {
    /// The logical name used in filters and column suffixes.
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::Float => "float",
            AttributeType::Int => "int",
            AttributeType::String => "string",
            AttributeType::Bool => "bool",
            AttributeType::Datetime => "datetime",
            AttributeType::FloatSeries => "float_series",
            AttributeType::StringSet => "string_set",
            AttributeType::StringSeries => "string_series",
            AttributeType::File => "file",
            AttributeType::FileSeries => "file_series",
            AttributeType::HistogramSeries => "histogram_series",
        }
    }

    /// The tag used on the wire. Scalar types share their logical name; the
    /// composite types use the backend's camel-cased tags.
    pub fn backend_tag(&self) -> &'static str {
        match self {
            AttributeType::FloatSeries => "floatSeries",
            AttributeType::StringSet => "stringSet",
            AttributeType::StringSeries => "stringSeries",
            AttributeType::File => "fileRef",
            AttributeType::FileSeries => "fileRefSeries",
            AttributeType::HistogramSeries => "histogramSeries",
            other => other.as_str(),
        }
    }

    /// Parses a wire tag back into a logical type. Unknown tags are reported
    /// as `None` so the caller can skip the value (with a warning) instead of
    /// failing the whole page.
    pub fn from_backend_tag(tag: &str) -> Option<Self> {
        let parsed = match tag {
            "float" => AttributeType::Float,
            "int" => AttributeType::Int,
            "string" => AttributeType::String,
            "bool" => AttributeType::Bool,
            "datetime" => AttributeType::Datetime,
            "floatSeries" => AttributeType::FloatSeries,
            "stringSet" => AttributeType::StringSet,
            "stringSeries" => AttributeType::StringSeries,
            "fileRef" => AttributeType::File,
            "fileRefSeries" => AttributeType::FileSeries,
            "histogramSeries" => AttributeType::HistogramSeries,
            _ => return None,
        };
        Some(parsed)
    }

    /// The aggregations this type supports, or an empty slice for scalar
    /// types.
    pub fn aggregations(&self) -> &'static [Aggregation] {
        match self {
            AttributeType::FloatSeries => &FLOAT_SERIES_AGGREGATIONS,
            AttributeType::StringSeries => &STRING_SERIES_AGGREGATIONS,
            AttributeType::FileSeries => &FILE_SERIES_AGGREGATIONS,
            AttributeType::HistogramSeries => &HISTOGRAM_SERIES_AGGREGATIONS,
            _ => &[],
        }
    }

    /// True for the series types whose table cells are aggregation structs.
    pub fn is_series(&self) -> bool {
        !self.aggregations().is_empty()
    }
}

impl Display for AttributeType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AttributeType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        ALL_TYPES
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                ErrorKind::InvalidArgument.with_message(format!("unknown attribute type: {s}"))
            })
    }
}

/// A scalar summary over a series.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Aggregation {
    Last,
    Min,
    Max,
    Average,
    Variance,
}

pub const FLOAT_SERIES_AGGREGATIONS: [Aggregation; 5] = [
    Aggregation::Last,
    Aggregation::Min,
    Aggregation::Max,
    Aggregation::Average,
    Aggregation::Variance,
];
pub const STRING_SERIES_AGGREGATIONS: [Aggregation; 1] = [Aggregation::Last];
pub const FILE_SERIES_AGGREGATIONS: [Aggregation; 1] = [Aggregation::Last];
pub const HISTOGRAM_SERIES_AGGREGATIONS: [Aggregation; 1] = [Aggregation::Last];

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Last => "last",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Average => "average",
            Aggregation::Variance => "variance",
        }
    }
}

impl Display for Aggregation {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Aggregation {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        FLOAT_SERIES_AGGREGATIONS
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| {
                ErrorKind::InvalidArgument.with_message(format!("unknown aggregation: {s}"))
            })
    }
}

/// A file reference stored as an attribute value.
#[derive(Clone, Debug, PartialEq)]
pub struct FileRef {
    pub path: String,
    pub size_bytes: u64,
    pub mime_type: String,
}

/// A logged histogram: bucket edges plus one value per bucket.
#[derive(Clone, Debug, PartialEq)]
pub struct Histogram {
    pub r#type: String,
    pub edges: Vec<f64>,
    pub values: Vec<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FloatSeriesAggregations {
    pub last: f64,
    pub min: f64,
    pub max: f64,
    pub average: f64,
    pub variance: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StringSeriesAggregations {
    pub last: Option<String>,
    pub last_step: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FileSeriesAggregations {
    pub last: Option<FileRef>,
    pub last_step: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HistogramSeriesAggregations {
    pub last: Option<Histogram>,
    pub last_step: Option<f64>,
}

/// A decoded attribute value.
///
/// For series-typed attributes this is the aggregations struct, not the
/// series itself; the point and series adapters return the raw data.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Float(f64),
    Int(i64),
    String(String),
    Bool(bool),
    Datetime(DateTime<Utc>),
    StringSet(BTreeSet<String>),
    File(FileRef),
    FloatSeries(FloatSeriesAggregations),
    StringSeries(StringSeriesAggregations),
    FileSeries(FileSeriesAggregations),
    HistogramSeries(HistogramSeriesAggregations),
}

impl Value {
    /// The attribute type this value decodes as.
    pub fn attribute_type(&self) -> AttributeType {
        match self {
            Value::Float(_) => AttributeType::Float,
            Value::Int(_) => AttributeType::Int,
            Value::String(_) => AttributeType::String,
            Value::Bool(_) => AttributeType::Bool,
            Value::Datetime(_) => AttributeType::Datetime,
            Value::StringSet(_) => AttributeType::StringSet,
            Value::File(_) => AttributeType::File,
            Value::FloatSeries(_) => AttributeType::FloatSeries,
            Value::StringSeries(_) => AttributeType::StringSeries,
            Value::FileSeries(_) => AttributeType::FileSeries,
            Value::HistogramSeries(_) => AttributeType::HistogramSeries,
        }
    }
}

/// Warns about a value type this engine version does not understand.
///
/// Each unknown type is reported once per process so that a large result set
/// does not flood the log.
pub(crate) fn warn_unsupported_value_type(type_tag: &str) {
    static WARNED: OnceLock<Mutex<BTreeSet<String>>> = OnceLock::new();
    let warned = WARNED.get_or_init(|| Mutex::new(BTreeSet::new()));
    let mut warned = warned.lock().expect("warned-type set poisoned");
    if warned.insert(type_tag.to_string()) {
        tracing::warn!(
            type_tag,
            "a value of an unsupported type was returned by the query; values of this \
             type will be skipped"
        );
    }
}
