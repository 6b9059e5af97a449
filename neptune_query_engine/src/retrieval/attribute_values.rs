// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Attribute value retrieval: decodes the backend's typed union into
//! strongly typed cells.

use std::collections::HashSet;

use futures::stream::{self, StreamExt};
use futures::Stream;

use chrono::{DateTime, Utc};

use crate::identifiers::{AttributeDefinition, ProjectIdentifier, RunIdentifier, SysId};
use crate::retrieval::util::{fetch_pages, Page};
use crate::transport::{
    AttributeValueDto, BackendClient, FileRefDto, HistogramDto, PageRequest,
    QueryAttributeValuesRequest, QueryAttributeValuesResponse,
};
use crate::types::{
    warn_unsupported_value_type, AttributeType, FileRef, FileSeriesAggregations,
    FloatSeriesAggregations, Histogram, HistogramSeriesAggregations, StringSeriesAggregations,
    Value,
};
use crate::Result;

/// One decoded attribute value of one run.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeValue {
    pub run_identifier: RunIdentifier,
    pub attribute_definition: AttributeDefinition,
    pub value: Value,
}

/// Streams pages of attribute values for the given runs and definitions.
///
/// Values whose definition was not requested are dropped, and values of
/// types this engine version does not know are skipped with a once-per-
/// process warning.
pub(crate) fn fetch_attribute_values<'a, C: BackendClient>(
    client: &'a C,
    project_identifier: &ProjectIdentifier,
    run_identifiers: Vec<RunIdentifier>,
    attribute_definitions: Vec<AttributeDefinition>,
    batch_size: usize,
) -> impl Stream<Item = Result<Page<AttributeValue>>> + Send + 'a {
    if run_identifiers.is_empty() || attribute_definitions.is_empty() {
        return stream::empty().boxed();
    }

    let project = project_identifier.clone();
    let requested: HashSet<AttributeDefinition> = attribute_definitions.iter().cloned().collect();
    let request = QueryAttributeValuesRequest {
        project_identifier: project.to_string(),
        experiment_ids_filter: run_identifiers.iter().map(|run| run.to_string()).collect(),
        attribute_names_filter: attribute_definitions
            .iter()
            .map(|definition| definition.name.clone())
            .collect(),
        next_page: PageRequest::first(batch_size),
    };

    fetch_pages(
        request,
        move |request| client.query_attribute_values(request),
        move |data: &QueryAttributeValuesResponse| Ok(process_page(data, &project, &requested)),
        move |mut request, data: &QueryAttributeValuesResponse| {
            let token = data.next_page.next_page_token.clone()?;
            if token.is_empty() {
                return None;
            }
            request.next_page.next_page_token = Some(token);
            Some(request)
        },
    )
    .boxed()
}

fn process_page(
    data: &QueryAttributeValuesResponse,
    project_identifier: &ProjectIdentifier,
    requested: &HashSet<AttributeDefinition>,
) -> Page<AttributeValue> {
    let mut items = Vec::new();
    for entry in &data.entries {
        let run_identifier = RunIdentifier::new(
            project_identifier.clone(),
            SysId::new(entry.experiment_short_id.clone()),
        );
        for attribute in &entry.attributes {
            let Some(value) = decode_value(attribute) else {
                continue;
            };
            let definition =
                AttributeDefinition::new(attribute.name.clone(), value.attribute_type());
            if !requested.contains(&definition) {
                continue;
            }
            items.push(AttributeValue {
                run_identifier: run_identifier.clone(),
                attribute_definition: definition,
                value,
            });
        }
    }
    Page::new(items)
}

/// Decodes one wire attribute into a typed value, or `None` when the type is
/// unknown or its payload is missing.
pub(crate) fn decode_value(attribute: &AttributeValueDto) -> Option<Value> {
    let Some(r#type) = AttributeType::from_backend_tag(&attribute.r#type) else {
        // `experimentState` is known-but-unmapped; stay quiet about it.
        if attribute.r#type != "experimentState" {
            warn_unsupported_value_type(&attribute.r#type);
        }
        return None;
    };

    match r#type {
        AttributeType::Float => attribute
            .float_properties
            .as_ref()
            .map(|p| Value::Float(p.value)),
        AttributeType::Int => attribute.int_properties.as_ref().map(|p| Value::Int(p.value)),
        AttributeType::String => attribute
            .string_properties
            .as_ref()
            .map(|p| Value::String(p.value.clone())),
        AttributeType::Bool => attribute.bool_properties.as_ref().map(|p| Value::Bool(p.value)),
        AttributeType::Datetime => attribute
            .datetime_properties
            .as_ref()
            .map(|p| Value::Datetime(millis_to_utc(p.value))),
        AttributeType::StringSet => attribute
            .string_set_properties
            .as_ref()
            .map(|p| Value::StringSet(p.value.iter().cloned().collect())),
        AttributeType::File => attribute
            .file_ref_properties
            .as_ref()
            .map(|p| Value::File(file_ref(p))),
        AttributeType::FloatSeries => {
            attribute.float_series_properties.as_ref().map(|p| {
                Value::FloatSeries(FloatSeriesAggregations {
                    last: p.last,
                    min: p.min,
                    max: p.max,
                    average: p.average,
                    variance: p.variance,
                })
            })
        }
        AttributeType::StringSeries => attribute.string_series_properties.as_ref().map(|p| {
            Value::StringSeries(StringSeriesAggregations {
                last: p.last.clone(),
                last_step: p.last_step,
            })
        }),
        AttributeType::FileSeries => attribute.file_ref_series_properties.as_ref().map(|p| {
            Value::FileSeries(FileSeriesAggregations {
                last: p.last.as_ref().map(file_ref),
                last_step: p.last_step,
            })
        }),
        AttributeType::HistogramSeries => {
            attribute.histogram_series_properties.as_ref().map(|p| {
                Value::HistogramSeries(HistogramSeriesAggregations {
                    last: p.last.as_ref().map(histogram),
                    last_step: p.last_step,
                })
            })
        }
    }
}

pub(crate) fn file_ref(dto: &FileRefDto) -> FileRef {
    FileRef {
        path: dto.path.clone(),
        size_bytes: dto.size_bytes,
        mime_type: dto.mime_type.clone(),
    }
}

pub(crate) fn histogram(dto: &HistogramDto) -> Histogram {
    Histogram {
        r#type: dto.r#type.clone(),
        edges: dto.edges.clone(),
        values: dto.values.clone(),
    }
}

pub(crate) fn millis_to_utc(timestamp_millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(timestamp_millis).unwrap_or_else(|| {
        tracing::warn!(timestamp_millis, "timestamp out of range; clamping to epoch");
        DateTime::<Utc>::from_timestamp_millis(0).expect("epoch is representable")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ScalarBool, ScalarDatetime, ScalarInt, StringSetProperties};

    fn dto(name: &str, r#type: &str) -> AttributeValueDto {
        AttributeValueDto {
            name: name.to_string(),
            r#type: r#type.to_string(),
            ..AttributeValueDto::default()
        }
    }

    #[test]
    fn decodes_scalars() {
        let mut int = dto("epochs", "int");
        int.int_properties = Some(ScalarInt { value: 12 });
        assert_eq!(decode_value(&int), Some(Value::Int(12)));

        let mut flag = dto("sys/failed", "bool");
        flag.bool_properties = Some(ScalarBool { value: false });
        assert_eq!(decode_value(&flag), Some(Value::Bool(false)));

        let mut timestamp = dto("sys/creation_time", "datetime");
        timestamp.datetime_properties = Some(ScalarDatetime { value: 1_735_689_600_000 });
        match decode_value(&timestamp) {
            Some(Value::Datetime(at)) => assert_eq!(at.timestamp_millis(), 1_735_689_600_000),
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn decodes_string_set_into_a_set() {
        let mut tags = dto("sys/tags", "stringSet");
        tags.string_set_properties = Some(StringSetProperties {
            value: vec!["b".into(), "a".into(), "b".into()],
        });
        match decode_value(&tags) {
            Some(Value::StringSet(set)) => {
                assert_eq!(set.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn unknown_types_decode_to_none() {
        assert_eq!(decode_value(&dto("sys/state", "experimentState")), None);
        assert_eq!(decode_value(&dto("future", "tensorSeries")), None);
    }

    #[test]
    fn missing_payload_decodes_to_none() {
        // The tag promises an int but the union member is absent.
        assert_eq!(decode_value(&dto("epochs", "int")), None);
    }
}
