// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{borrow::Cow, fmt::Display, time::Duration};

pub type Result<T> = ::std::result::Result<T, Error>;

/// Maximum number of characters of a response body retained in an error.
const BODY_PREVIEW_LIMIT: usize = 1_000;

#[derive(Clone, Debug, PartialEq)]
pub enum ErrorKind {
    /// No project was provided via an explicit argument, the context, or the
    /// `NEPTUNE_PROJECT` environment variable.
    ProjectNotProvided,

    /// No API token was provided via the context or the `NEPTUNE_API_TOKEN`
    /// environment variable.
    ApiTokenNotProvided,

    /// A query argument failed validation before any wire call was made.
    ///
    /// Covers inverted step ranges, non-positive limits, invalid
    /// `include_time` values, and empty `contains_*` lists.
    InvalidArgument,

    /// A regular expression was rejected at filter construction time, either
    /// because it does not parse or because it uses features the backend's
    /// query language does not support.
    InvalidPattern,

    /// The API token was rejected by the backend, or a call was answered with
    /// an authentication failure. Never retried.
    InvalidCredentials,

    /// The project does not exist or the account has no access to it.
    ProjectInaccessible,

    /// Stripping type suffixes from column names would collapse attributes of
    /// different types into the same column.
    ConflictingAttributeTypes {
        /// Attribute names and the set of types observed for each.
        conflicts: Vec<(String, Vec<String>)>,
    },

    /// Type inference finished with at least one attribute unresolved.
    AttributeTypeInference {
        /// One entry per failing attribute: the attribute name and the reason
        /// inference failed for it.
        failures: Vec<(String, String)>,
    },

    /// The retry budget was exhausted without a successful response.
    RetryExhausted {
        attempts: u32,
        elapsed: Duration,
        last_status: Option<u16>,
        last_body: Option<String>,
    },

    /// The backend answered with a status or payload the engine does not
    /// recognize as either success or a retryable condition.
    UnexpectedResponse { status: u16, body: String },

    /// A response could not be decoded into the expected shape.
    ///
    /// This error is not recoverable and indicates a bug in the backend, as it
    /// should not be possible to receive a well-formed response that cannot be
    /// deserialized.
    InvalidBackendResponse,

    /// An internal invariant of the query pipeline was violated.
    ///
    /// This error is not recoverable and indicates a bug in the engine. It is
    /// surfaced only so the caller can log and report it.
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ErrorKind::ProjectNotProvided => write!(
                f,
                "the project name was not provided; pass it explicitly, set it on the \
                 context, or set the NEPTUNE_PROJECT environment variable"
            ),
            ErrorKind::ApiTokenNotProvided => write!(
                f,
                "the API token was not provided; set it on the context or set the \
                 NEPTUNE_API_TOKEN environment variable"
            ),
            ErrorKind::InvalidArgument => write!(f, "invalid argument"),
            ErrorKind::InvalidPattern => write!(f, "invalid regular expression pattern"),
            ErrorKind::InvalidCredentials => write!(
                f,
                "the API token was rejected by the server; make sure the token is valid \
                 and the account has access to the target project"
            ),
            ErrorKind::ProjectInaccessible => write!(
                f,
                "the project does not exist or you do not have access to it; check the \
                 workspace and project names and that the account has at least viewer access"
            ),
            ErrorKind::ConflictingAttributeTypes { conflicts } => {
                write!(f, "multiple types detected for attributes [")?;
                for (i, (name, types)) in conflicts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {{{}}}", types.join(", "))?;
                }
                write!(
                    f,
                    "]; use type-suffixed column names or restrict the attribute filter \
                     to a single type"
                )
            }
            ErrorKind::AttributeTypeInference { failures } => {
                write!(f, "failed to infer types for attributes [")?;
                for (i, (name, _)) in failures.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}")?;
                }
                write!(f, "]:")?;
                for (name, reason) in failures {
                    write!(f, "\n  {name}: {reason}")?;
                }
                write!(
                    f,
                    "\nspecify the attribute type explicitly when constructing the filter \
                     or the sort-by attribute"
                )
            }
            ErrorKind::RetryExhausted {
                attempts,
                elapsed,
                last_status,
                last_body,
            } => {
                write!(
                    f,
                    "the server kept returning errors for {:.2} seconds ({attempts} attempts)",
                    elapsed.as_secs_f64()
                )?;
                if let Some(status) = last_status {
                    write!(f, "; last response status: {status}")?;
                }
                if let Some(body) = last_body {
                    write!(f, "; last response body: {body}")?;
                }
                Ok(())
            }
            ErrorKind::UnexpectedResponse { status, body } => {
                write!(
                    f,
                    "the server returned an unexpected response; status: {status}, body: {body}"
                )
            }
            ErrorKind::InvalidBackendResponse => write!(f, "invalid data received from the server"),
            ErrorKind::InternalError => write!(f, "internal query engine error"),
        }
    }
}

impl ErrorKind {
    pub fn with_source(self, source: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::from(self).with_source(source)
    }

    pub fn with_message(self, message: impl Into<Cow<'static, str>>) -> Error {
        Error::from(self).with_message(message)
    }

    /// Builds the terminal error raised when the retry budget runs out.
    ///
    /// The last response body, if any, is decoded as UTF-8 (lossily) and
    /// truncated so that error messages stay readable.
    pub fn retry_exhausted(
        attempts: u32,
        elapsed: Duration,
        last_status: Option<u16>,
        last_body: Option<&[u8]>,
    ) -> Error {
        Error::from(ErrorKind::RetryExhausted {
            attempts,
            elapsed,
            last_status,
            last_body: last_body.map(decode_body_preview),
        })
    }

    pub fn unexpected_response(status: u16, body: &[u8]) -> Error {
        Error::from(ErrorKind::UnexpectedResponse {
            status,
            body: decode_body_preview(body),
        })
    }
}

fn decode_body_preview(body: &[u8]) -> String {
    let decoded = String::from_utf8_lossy(body);
    match decoded.char_indices().nth(BODY_PREVIEW_LIMIT) {
        Some((offset, _)) => decoded[..offset].to_string(),
        None => decoded.into_owned(),
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    message: Option<Cow<'static, str>>,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            source: None,
            message: None,
        }
    }
}

impl Error {
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_message(mut self, message: impl Into<Cow<'static, str>>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// True for errors caused by invalid caller input. These are raised before
    /// any wire call and are never retried.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ProjectNotProvided
                | ErrorKind::ApiTokenNotProvided
                | ErrorKind::InvalidArgument
                | ErrorKind::InvalidPattern
                | ErrorKind::ConflictingAttributeTypes { .. }
                | ErrorKind::AttributeTypeInference { .. }
        )
    }

    /// True when the backend rejected the caller's credentials or access to
    /// the project.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::InvalidCredentials | ErrorKind::ProjectInaccessible
        )
    }

    pub fn into_source(self) -> Option<Box<dyn std::error::Error + Send + Sync>> {
        self.source
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{message}"),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source = self.source.as_ref()?;
        Some(&**source)
    }
}
