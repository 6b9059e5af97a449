// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Process-wide configuration: engine settings resolved from `NEPTUNE_*`
//! environment variables, and the replaceable global [`Context`] carrying the
//! default project and credentials.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Deserializer, Serialize};

use crate::identifiers::ProjectIdentifier;
use crate::{ErrorKind, Result};

/// Engine knobs resolved from the environment.
///
/// Every field has a default, so a missing variable never fails; values that
/// cannot be parsed do. Field names map onto the `NEPTUNE_*` variables by
/// upper-casing, e.g. `fetcher_max_workers` reads
/// `NEPTUNE_FETCHER_MAX_WORKERS`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Disables TLS certificate verification when set to `false` or `0`.
    #[serde(deserialize_with = "deserialize_flag")]
    pub verify_ssl: bool,

    /// Per-call I/O timeout, applied to each wire request individually.
    pub http_request_timeout_seconds: u64,

    /// Worker bound for each of the two per-query pools.
    pub fetcher_max_workers: usize,

    pub fetcher_sys_attrs_batch_size: usize,
    pub fetcher_attribute_definitions_batch_size: usize,
    pub fetcher_attribute_values_batch_size: usize,
    pub fetcher_series_batch_size: usize,

    /// Budget, in UTF-8 bytes, for the encoded attribute names (plus the
    /// estimated identifier cost) of a single request.
    pub fetcher_query_size_limit: usize,

    /// Soft retry budget in seconds; server-directed delays extend it.
    pub fetcher_retry_soft_timeout: u64,

    /// Hard retry budget in seconds; an absolute wall-clock ceiling.
    pub fetcher_retry_hard_timeout: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            verify_ssl: true,
            http_request_timeout_seconds: 60,
            fetcher_max_workers: 10,
            fetcher_sys_attrs_batch_size: 10_000,
            fetcher_attribute_definitions_batch_size: 10_000,
            fetcher_attribute_values_batch_size: 10_000,
            fetcher_series_batch_size: 10_000,
            fetcher_query_size_limit: 220_000,
            fetcher_retry_soft_timeout: 1_800,
            fetcher_retry_hard_timeout: 3_600,
        }
    }
}

impl Settings {
    /// Resolves settings by layering `NEPTUNE_*` environment variables over
    /// the defaults.
    pub fn from_env() -> Result<Self> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Env::prefixed("NEPTUNE_"))
            .extract()
            .map_err(|e| {
                ErrorKind::InvalidArgument
                    .with_message(format!("invalid NEPTUNE_* environment variable: {e}"))
            })
    }

    pub fn http_request_timeout(&self) -> Duration {
        Duration::from_secs(self.http_request_timeout_seconds)
    }

    pub fn retry_soft_timeout(&self) -> Duration {
        Duration::from_secs(self.fetcher_retry_soft_timeout)
    }

    pub fn retry_hard_timeout(&self) -> Duration {
        Duration::from_secs(self.fetcher_retry_hard_timeout)
    }
}

/// Accepts `true`/`false`, `1`/`0`, and the equivalent strings, since the
/// environment provider surfaces `NEPTUNE_VERIFY_SSL=0` as a number rather
/// than a boolean.
fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    struct FlagVisitor;

    impl serde::de::Visitor<'_> for FlagVisitor {
        type Value = bool;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a boolean, 0/1, or a true/false string")
        }

        fn visit_bool<E>(self, v: bool) -> std::result::Result<bool, E> {
            Ok(v)
        }

        fn visit_i64<E>(self, v: i64) -> std::result::Result<bool, E> {
            Ok(v != 0)
        }

        fn visit_u64<E>(self, v: u64) -> std::result::Result<bool, E> {
            Ok(v != 0)
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> std::result::Result<bool, E> {
            match v.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                other => Err(E::custom(format!("invalid boolean: {other}"))),
            }
        }
    }

    deserializer.deserialize_any(FlagVisitor)
}

/// Credentials read alongside [`Settings`]; kept separate so the engine
/// settings stay printable without leaking the token.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Credentials {
    project: Option<String>,
    api_token: Option<String>,
}

impl Credentials {
    fn from_env() -> Self {
        Figment::new()
            .merge(Env::prefixed("NEPTUNE_").only(&["project", "api_token"]))
            .extract()
            .unwrap_or_default()
    }
}

/// The default project, credentials, and proxy map used when the caller does
/// not pass them explicitly.
///
/// The global context is initialized from the environment on first access and
/// can be replaced wholesale at runtime; replacement is a single atomic
/// pointer swap and no further cross-thread synchronization is promised.
#[derive(Clone, Debug, Default)]
pub struct Context {
    project: Option<String>,
    api_token: Option<String>,
    proxies: Option<HashMap<String, String>>,
}

impl Context {
    /// A context populated from `NEPTUNE_PROJECT` and `NEPTUNE_API_TOKEN`.
    pub fn from_env() -> Self {
        let credentials = Credentials::from_env();
        Self {
            project: credentials.project,
            api_token: credentials.api_token,
            proxies: None,
        }
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_api_token(mut self, api_token: impl Into<String>) -> Self {
        self.api_token = Some(api_token.into());
        self
    }

    /// Proxy URLs keyed by scheme (`http`, `https`).
    pub fn with_proxies(mut self, proxies: HashMap<String, String>) -> Self {
        self.proxies = Some(proxies);
        self
    }

    pub fn project(&self) -> Option<&str> {
        self.project.as_deref()
    }

    pub fn api_token(&self) -> Option<&str> {
        self.api_token.as_deref()
    }

    pub fn proxies(&self) -> Option<&HashMap<String, String>> {
        self.proxies.as_ref()
    }

    /// The project this context points at, or a user error telling the caller
    /// how to provide one.
    pub fn require_project(&self) -> Result<ProjectIdentifier> {
        self.project
            .as_deref()
            .map(ProjectIdentifier::new)
            .ok_or_else(|| ErrorKind::ProjectNotProvided.into())
    }

    /// The API token of this context, or a user error telling the caller how
    /// to provide one.
    pub fn require_api_token(&self) -> Result<&str> {
        self.api_token
            .as_deref()
            .ok_or_else(|| ErrorKind::ApiTokenNotProvided.into())
    }
}

static CONTEXT: ArcSwapOption<Context> = ArcSwapOption::const_empty();

/// Returns the global context, initializing it from the environment on first
/// access.
pub fn get_context() -> Arc<Context> {
    if let Some(context) = CONTEXT.load_full() {
        return context;
    }
    let context = Arc::new(Context::from_env());
    CONTEXT.store(Some(Arc::clone(&context)));
    context
}

/// Replaces the global context wholesale.
pub fn set_context(context: Context) -> Arc<Context> {
    let context = Arc::new(context);
    CONTEXT.store(Some(Arc::clone(&context)));
    context
}

/// Replaces the global context with one holding the given project; the token
/// and proxies are re-read from the environment.
pub fn set_project(project: impl Into<String>) -> Arc<Context> {
    set_context(Context::from_env().with_project(project))
}

/// Replaces the global context with one holding the given API token; the
/// project and proxies are re-read from the environment.
pub fn set_api_token(api_token: impl Into<String>) -> Arc<Context> {
    set_context(Context::from_env().with_api_token(api_token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert!(settings.verify_ssl);
        assert_eq!(settings.http_request_timeout_seconds, 60);
        assert_eq!(settings.fetcher_max_workers, 10);
        assert_eq!(settings.fetcher_sys_attrs_batch_size, 10_000);
        assert_eq!(settings.fetcher_query_size_limit, 220_000);
        assert_eq!(settings.retry_soft_timeout(), Duration::from_secs(1_800));
        assert_eq!(settings.retry_hard_timeout(), Duration::from_secs(3_600));
    }

    #[test]
    fn flag_accepts_zero_and_false() {
        let json = |raw: &str| -> Settings {
            serde_json::from_str(&format!("{{\"verify_ssl\": {raw}}}")).unwrap()
        };
        assert!(!json("0").verify_ssl);
        assert!(!json("\"false\"").verify_ssl);
        assert!(!json("false").verify_ssl);
        assert!(json("\"1\"").verify_ssl);
        assert!(json("true").verify_ssl);
    }

    #[test]
    fn context_requires_project_and_token() {
        let context = Context::default();
        assert!(context.require_project().is_err());
        assert!(context.require_api_token().is_err());

        let context = Context::default()
            .with_project("team/project")
            .with_api_token("token");
        assert_eq!(
            context.require_project().unwrap(),
            ProjectIdentifier::new("team/project")
        );
        assert_eq!(context.require_api_token().unwrap(), "token");
    }

    #[test]
    fn set_context_replaces_wholesale() {
        let first = set_context(Context::default().with_project("a/b").with_api_token("t"));
        assert_eq!(first.project(), Some("a/b"));

        let replaced = set_context(Context::default().with_project("c/d"));
        assert_eq!(replaced.project(), Some("c/d"));
        // The token from the previous context does not leak into the new one.
        assert!(replaced.api_token().is_none());
        assert_eq!(get_context().project(), Some("c/d"));
    }
}
