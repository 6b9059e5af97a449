// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Client-side query engine for the Neptune experiment-tracking API.
//!
//! ## Overview
//!
//! Given a project identifier and a declarative query over experiments or
//! runs, the engine produces tabular result sets: metadata tables, metric
//! point frames, and non-numeric series frames. To do that it converts
//! high-level, partially typed filters into wire calls, infers missing
//! attribute types, fans paginated fetches out across many keys with bounded
//! concurrency, stitches the partial responses back into deterministic
//! tables, and surfaces a small taxonomy of domain errors.
//!
//! The composition entry points live in [`query`]; they take an explicit
//! [`transport::BackendClient`] and [`config::Settings`], so any transport
//! (the bundled [`transport::HttpBackendClient`] or an in-memory test
//! double) can drive the same pipeline. [`connect`] resolves the process-wide
//! [`config::Context`] into a ready HTTP client.

// Warnings are errors when building on CI.
#![cfg_attr(not(debug_assertions), deny(warnings))]

mod error;

pub(crate) use error::Result;
pub use error::{Error, ErrorKind};

pub mod config;
pub mod filter;
pub mod identifiers;
pub mod output;
pub mod query;
pub mod retrieval;
pub mod transport;
pub mod types;

use std::sync::Arc;

use config::{Context, Settings};
use transport::HttpBackendClient;

/// Connects to the backend using the given context, or the process-wide one
/// when `context` is `None`.
///
/// Credential errors are raised here, before any query is attempted; the
/// project is resolved per query, not per connection.
pub async fn connect(context: Option<&Context>) -> Result<HttpBackendClient> {
    let settings = Settings::from_env()?;
    match context {
        Some(context) => HttpBackendClient::connect(context, &settings).await,
        None => {
            let context: Arc<Context> = config::get_context();
            HttpBackendClient::connect(&context, &settings).await
        }
    }
}
