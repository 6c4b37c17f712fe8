//! Classified export errors.
//!
//! Every failed [`export`](crate::plugin::Plugin::export) call returns a
//! [`PluginError`] carrying one [`ErrorKind`] out of a closed set, a compact
//! message for the host and, when available, the low-level cause.

use std::fmt;

use thiserror::Error;

/// Boxed low-level cause kept for diagnostics.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Closed taxonomy of export failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Query, transport or scan failure.
    CannotFetchData,
    /// Query succeeded but produced no logical rows.
    EmptyResult,
    /// The key is not served by the plugin.
    UnsupportedKey,
    /// Parameter arity or shape mismatch.
    InvalidParams,
    /// A connection or other resource could not be obtained.
    ResourceUnavailable,
}

impl ErrorKind {
    /// Stable identifier used by downstream triggers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CannotFetchData => "cannot_fetch_data",
            Self::EmptyResult => "empty_result",
            Self::UnsupportedKey => "unsupported_key",
            Self::InvalidParams => "invalid_params",
            Self::ResourceUnavailable => "resource_unavailable",
        }
    }

    /// Human-readable message presented to the host.
    pub fn message(&self) -> &'static str {
        match self {
            Self::CannotFetchData => "Cannot fetch data",
            Self::EmptyResult => "Empty result",
            Self::UnsupportedKey => "Unsupported metric",
            Self::InvalidParams => "Invalid parameters",
            Self::ResourceUnavailable => "Resource unavailable",
        }
    }

    /// Whether the host should retry on the next poll cycle.
    ///
    /// Configuration-level kinds are not retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CannotFetchData | Self::ResourceUnavailable | Self::EmptyResult
        )
    }

    /// Whether the kind is a hard failure worth alerting on.
    ///
    /// `EmptyResult` is a "no data" condition, not a failure.
    pub fn is_hard_failure(&self) -> bool {
        !matches!(self, Self::EmptyResult)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a failed export call.
///
/// Holds the kind, a compact message and the wrapped cause. Host code should
/// match on [`PluginError::kind`] rather than on the rendered text.
#[derive(Debug, Error)]
#[error("{}", render(.kind, .detail, .source))]
pub struct PluginError {
    kind: ErrorKind,
    detail: Option<String>,
    #[source]
    source: Option<BoxError>,
}

impl PluginError {
    /// Create an error of the given kind with no detail.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            detail: None,
            source: None,
        }
    }

    /// Create an error of the given kind with a detail message.
    pub fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: Some(detail.into()),
            source: None,
        }
    }

    /// Create an error of the given kind wrapping a low-level cause.
    pub fn wrap<E>(kind: ErrorKind, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self {
            kind,
            detail: None,
            source: Some(source.into()),
        }
    }

    /// Shorthand for [`ErrorKind::CannotFetchData`] wrapping `source`.
    pub fn cannot_fetch_data<E: Into<BoxError>>(source: E) -> Self {
        Self::wrap(ErrorKind::CannotFetchData, source)
    }

    /// Shorthand for [`ErrorKind::EmptyResult`] wrapping `source`.
    pub fn empty_result<E: Into<BoxError>>(source: E) -> Self {
        Self::wrap(ErrorKind::EmptyResult, source)
    }

    /// Shorthand for [`ErrorKind::UnsupportedKey`].
    pub fn unsupported_key(key: &str) -> Self {
        Self::with_detail(ErrorKind::UnsupportedKey, format!("unknown key '{key}'"))
    }

    /// Shorthand for [`ErrorKind::InvalidParams`].
    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::InvalidParams, detail)
    }

    /// Shorthand for [`ErrorKind::ResourceUnavailable`] wrapping `source`.
    pub fn resource_unavailable<E: Into<BoxError>>(source: E) -> Self {
        Self::wrap(ErrorKind::ResourceUnavailable, source)
    }

    /// The classified kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Detail message, if one was attached.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

fn render(kind: &ErrorKind, detail: &Option<String>, source: &Option<BoxError>) -> String {
    let mut out = kind.message().to_string();
    if let Some(detail) = detail {
        out.push_str(": ");
        out.push_str(detail);
    }
    if let Some(source) = source {
        out.push_str(": ");
        out.push_str(&source.to_string());
    }
    out.push('.');
    out
}
