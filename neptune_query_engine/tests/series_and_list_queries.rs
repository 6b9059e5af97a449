// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end series and listing queries against the in-memory backend.

mod mock_backend;

use mock_backend::{
    int_attribute, string_attribute, string_point, string_series_attribute, MockBackend, MockRun,
};
use neptune_query_engine::config::Settings;
use neptune_query_engine::filter::{AttributeFilter, AttributeFilterExpr, Filter};
use neptune_query_engine::identifiers::ProjectIdentifier;
use neptune_query_engine::query::{
    fetch_series, list_attributes, list_experiments, list_runs, SeriesParams,
};
use neptune_query_engine::retrieval::series::SeriesPointValue;
use pretty_assertions::assert_eq;

fn project() -> ProjectIdentifier {
    ProjectIdentifier::new("team/project")
}

#[tokio::test]
async fn series_frame_holds_raw_string_values() {
    let backend = MockBackend::new(vec![MockRun::new("R-1", "exp-A").with_string_series(
        "messages",
        vec![
            string_point(1.0, "first"),
            string_point(2.0, "second"),
            string_point(3.0, "third"),
        ],
    )]);

    let frame = fetch_series(
        &backend,
        &Settings::default(),
        &project(),
        None,
        &AttributeFilter::name_eq(["messages"]).into(),
        &SeriesParams::default(),
    )
    .await
    .unwrap();

    assert_eq!(frame.index_name(), "experiment");
    assert_eq!(frame.columns(), &["messages".to_string()]);
    assert_eq!(frame.rows().len(), 3);
    assert_eq!(
        frame.cell("exp-A", 2.0, "messages").map(|c| &c.value),
        Some(&SeriesPointValue::String("second".to_string()))
    );
    // Rows sort ascending by step.
    let steps: Vec<f64> = frame.rows().iter().map(|row| row.step).collect();
    assert_eq!(steps, vec![1.0, 2.0, 3.0]);
}

#[tokio::test]
async fn series_tail_limit_keeps_the_last_values() {
    let backend = MockBackend::new(vec![MockRun::new("R-1", "exp-A").with_string_series(
        "messages",
        (0..8).map(|i| string_point(i as f64, &format!("m{i}"))).collect(),
    )]);

    let params = SeriesParams {
        tail_limit: Some(2),
        ..SeriesParams::default()
    };
    let frame = fetch_series(
        &backend,
        &Settings::default(),
        &project(),
        None,
        &AttributeFilter::name_eq(["messages"]).into(),
        &params,
    )
    .await
    .unwrap();

    let steps: Vec<f64> = frame.rows().iter().map(|row| row.step).collect();
    assert_eq!(steps, vec![6.0, 7.0]);
}

#[tokio::test]
async fn float_series_do_not_leak_into_the_series_frame() {
    let backend = MockBackend::new(vec![MockRun::new("R-1", "exp-A")
        .with_float_series("loss", vec![mock_backend::point(1.0, 0.5)])
        .with_string_series("messages", vec![string_point(1.0, "only this")])]);

    let frame = fetch_series(
        &backend,
        &Settings::default(),
        &project(),
        None,
        &AttributeFilterExpr::from(AttributeFilter::new()),
        &SeriesParams::default(),
    )
    .await
    .unwrap();

    assert_eq!(frame.columns(), &["messages".to_string()]);
}

#[tokio::test]
async fn list_experiments_preserves_backend_order() {
    let backend = MockBackend::new(vec![
        MockRun::new("R-3", "zulu"),
        MockRun::new("R-1", "alpha"),
        MockRun::new("R-2", "midway"),
    ]);

    let names = list_experiments(&backend, &Settings::default(), &project(), None)
        .await
        .unwrap();
    assert_eq!(names, vec!["zulu", "alpha", "midway"]);

    let filtered = list_experiments(
        &backend,
        &Settings::default(),
        &project(),
        Some(&Filter::name_in(&["alpha"]).unwrap()),
    )
    .await
    .unwrap();
    assert_eq!(filtered, vec!["alpha"]);
}

#[tokio::test]
async fn list_runs_returns_custom_run_ids() {
    let backend = MockBackend::new(vec![MockRun::new("R-1", "alpha")]);
    let names = list_runs(&backend, &Settings::default(), &project(), None)
        .await
        .unwrap();
    assert_eq!(names, vec!["alpha-run"]);
}

#[tokio::test]
async fn list_attributes_is_sorted_and_unique() {
    let backend = MockBackend::new(vec![
        MockRun::new("R-1", "exp-A")
            .with_attribute(string_attribute("zeta", "z"))
            .with_attribute(int_attribute("alpha", 1)),
        MockRun::new("R-2", "exp-B")
            .with_attribute(int_attribute("alpha", 2))
            .with_attribute(string_series_attribute("messages", "hi", 3.0)),
    ]);

    let names = list_attributes(
        &backend,
        &Settings::default(),
        &project(),
        None,
        &AttributeFilterExpr::from(AttributeFilter::new()),
    )
    .await
    .unwrap();
    assert_eq!(names, vec!["alpha", "messages", "zeta"]);
}

#[tokio::test]
async fn list_attributes_respects_the_run_filter() {
    let backend = MockBackend::new(vec![
        MockRun::new("R-1", "exp-A").with_attribute(string_attribute("only/a", "x")),
        MockRun::new("R-2", "exp-B").with_attribute(string_attribute("only/b", "y")),
    ]);

    let names = list_attributes(
        &backend,
        &Settings::default(),
        &project(),
        Some(&Filter::name_in(&["exp-B"]).unwrap()),
        &AttributeFilterExpr::from(AttributeFilter::new()),
    )
    .await
    .unwrap();
    assert_eq!(names, vec!["only/b"]);
}

#[tokio::test]
async fn list_attributes_applies_name_patterns() {
    let backend = MockBackend::new(vec![MockRun::new("R-1", "exp-A")
        .with_attribute(string_attribute("metrics/loss", "x"))
        .with_attribute(string_attribute("metrics/val_loss", "y"))
        .with_attribute(string_attribute("config/lr", "z"))]);

    let attributes = AttributeFilter::matching("^metrics/ & !val").unwrap();
    let names = list_attributes(
        &backend,
        &Settings::default(),
        &project(),
        None,
        &attributes,
    )
    .await
    .unwrap();
    assert_eq!(names, vec!["metrics/loss"]);
}
