// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The reqwest-backed [`BackendClient`] implementation.
//!
//! Credentials are carried in the API token: a base64-encoded JSON document
//! holding the backend base URL. Connecting decodes the token, builds the
//! HTTP client from the settings (timeout, TLS verification, proxies), and
//! resolves the backend's client configuration before the first query call.
//! Every endpoint call is wrapped in the retry layer.

use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{
    BackendClient, FloatSeriesValuesRequest, FloatSeriesValuesResponse,
    QueryAttributeDefinitionsRequest, QueryAttributeDefinitionsResponse,
    QueryAttributeValuesRequest, QueryAttributeValuesResponse, RawResponse, SearchEntriesRequest,
    SearchEntriesResponse, SeriesValuesRequest, SeriesValuesResponse, TransportError,
};
use crate::config::{Context, Settings};
use crate::retrieval::retry::{self, RetryPolicy};
use crate::{ErrorKind, Result};

const CLIENT_CONFIG_ENDPOINT: &str = "client-config";
const SEARCH_ENDPOINT: &str = "search-leaderboard-entries";
const ATTRIBUTE_DEFINITIONS_ENDPOINT: &str = "query-attribute-definitions-within-project";
const ATTRIBUTE_VALUES_ENDPOINT: &str = "query-attributes-within-project";
const FLOAT_SERIES_ENDPOINT: &str = "float-series-values";
const SERIES_ENDPOINT: &str = "series-values";

/// The payload of a decoded API token.
#[derive(Debug, Deserialize)]
struct ApiTokenPayload {
    #[serde(default)]
    api_address: Option<String>,
    #[serde(default)]
    api_url: Option<String>,
}

/// Backend client configuration, resolved once per connection.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    pub security: SecurityConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityConfig {
    pub open_id_discovery: String,
    pub client_id: String,
}

pub struct HttpBackendClient {
    http: reqwest::Client,
    base_url: Url,
    api_token: String,
    retry_policy: RetryPolicy,
    client_config: ClientConfig,
}

impl HttpBackendClient {
    /// Connects to the backend named by the context's API token.
    #[tracing::instrument(level = "debug", skip_all, err)]
    pub async fn connect(context: &Context, settings: &Settings) -> Result<Self> {
        let api_token = context.require_api_token()?.to_string();
        let base_url = decode_base_url(&api_token)?;

        let mut builder = reqwest::Client::builder()
            .timeout(settings.http_request_timeout())
            .danger_accept_invalid_certs(!settings.verify_ssl);
        if let Some(proxies) = context.proxies() {
            for (scheme, proxy_url) in proxies {
                let proxy = match scheme.as_str() {
                    "http" => reqwest::Proxy::http(proxy_url),
                    "https" => reqwest::Proxy::https(proxy_url),
                    other => {
                        tracing::warn!(scheme = other, "ignoring proxy for unknown scheme");
                        continue;
                    }
                };
                builder = builder.proxy(proxy.map_err(|e| {
                    ErrorKind::InvalidArgument
                        .with_message(format!("invalid proxy URL for {scheme}: {e}"))
                })?);
            }
        }
        let http = builder.build().map_err(|e| {
            ErrorKind::InternalError
                .with_source(e)
                .with_message("failed to build the HTTP client")
        })?;

        let retry_policy = RetryPolicy::from_settings(settings);
        let config_url = base_url
            .join(CLIENT_CONFIG_ENDPOINT)
            .map_err(|e| ErrorKind::InvalidCredentials.with_source(e))?;
        let response = retry::with_retries(&retry_policy, || {
            let request = http.get(config_url.clone()).bearer_auth(&api_token);
            async move {
                let response = request.send().await.map_err(map_reqwest_error)?;
                collect_response(response).await
            }
        })
        .await?;
        let client_config: ClientConfig = serde_json::from_slice(&response.body)
            .map_err(|e| ErrorKind::InvalidBackendResponse.with_source(e))?;
        tracing::debug!(
            client_id = %client_config.security.client_id,
            "resolved backend client configuration"
        );

        Ok(Self {
            http,
            base_url,
            api_token,
            retry_policy,
            client_config,
        })
    }

    pub fn client_config(&self) -> &ClientConfig {
        &self.client_config
    }

    async fn post_raw<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> std::result::Result<RawResponse, TransportError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_token)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        collect_response(response).await
    }

    async fn call<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &'static str,
        request: &B,
    ) -> Result<R> {
        let response =
            retry::with_retries(&self.retry_policy, || self.post_raw(path, request)).await?;
        serde_json::from_slice(&response.body)
            .map_err(|e| ErrorKind::InvalidBackendResponse.with_source(e))
    }
}

impl BackendClient for HttpBackendClient {
    async fn search_entries(&self, request: SearchEntriesRequest) -> Result<SearchEntriesResponse> {
        self.call(SEARCH_ENDPOINT, &request).await
    }

    async fn query_attribute_definitions(
        &self,
        request: QueryAttributeDefinitionsRequest,
    ) -> Result<QueryAttributeDefinitionsResponse> {
        self.call(ATTRIBUTE_DEFINITIONS_ENDPOINT, &request).await
    }

    async fn query_attribute_values(
        &self,
        request: QueryAttributeValuesRequest,
    ) -> Result<QueryAttributeValuesResponse> {
        self.call(ATTRIBUTE_VALUES_ENDPOINT, &request).await
    }

    async fn float_series_values(
        &self,
        request: FloatSeriesValuesRequest,
    ) -> Result<FloatSeriesValuesResponse> {
        self.call(FLOAT_SERIES_ENDPOINT, &request).await
    }

    async fn series_values(&self, request: SeriesValuesRequest) -> Result<SeriesValuesResponse> {
        self.call(SERIES_ENDPOINT, &request).await
    }
}

/// Decodes the base URL carried inside the API token.
fn decode_base_url(api_token: &str) -> Result<Url> {
    let malformed = || {
        ErrorKind::InvalidCredentials
            .with_message("the API token is malformed; copy it again from the web interface")
    };
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(api_token.trim())
        .map_err(|_| malformed())?;
    let payload: ApiTokenPayload = serde_json::from_slice(&decoded).map_err(|_| malformed())?;
    let address = payload
        .api_url
        .or(payload.api_address)
        .ok_or_else(malformed)?;
    // A trailing slash keeps endpoint joins from replacing the last segment.
    let mut url = Url::parse(&address).map_err(|_| malformed())?;
    if !url.path().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }
    Ok(url)
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(error.to_string())
    } else {
        TransportError::Connection(error.to_string())
    }
}

async fn collect_response(
    response: reqwest::Response,
) -> std::result::Result<RawResponse, TransportError> {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok());
    let body = response
        .bytes()
        .await
        .map_err(map_reqwest_error)?
        .to_vec();
    Ok(RawResponse {
        status,
        retry_after,
        body,
    })
}
