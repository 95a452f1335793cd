//! Error taxonomy for the dispatch pipeline.
//!
//! The taxonomy is closed and two-tiered: [`RequestError`] covers failures
//! before the request reaches the transport, [`ResponseError`] covers
//! failures at or after the send. Response-tier errors carry whatever status
//! code and raw body were available, for diagnostics. Every failure is a
//! value — nothing in the pipeline panics on a bad response.

use bytes::Bytes;

/// Failures that occur before the request is handed to the transport.
///
/// These never carry a status code or body: no exchange has happened yet.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The transport request could not be constructed (malformed base URL,
    /// body serialization failure, bad header value).
    #[error("request encoding failed: {0}")]
    Encoding(#[source] anyhow::Error),

    /// A behavior's `validate` hook rejected the request.
    #[error("request validation failed: {0}")]
    Validation(#[source] anyhow::Error),
}

/// Failures classified from the transport exchange.
#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    /// The transport completed without producing a status code.
    #[error("empty response")]
    EmptyResponse,

    /// The status code fell outside the client's acceptable range.
    #[error("unexpected status code")]
    UnexpectedStatus,

    /// The body failed to decode, or the status code had no mapped response
    /// case. The two are deliberately conflated: generated decoders surface
    /// both through the same opaque error.
    #[error("response decoding failed: {0}")]
    Decoding(#[source] anyhow::Error),

    /// Transport-level failure (connection, timeout, cancellation).
    #[error("network error: {0}")]
    Network(#[source] anyhow::Error),
}

/// The single reportable shape every dispatch failure is normalized into.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Pre-send failure. Never reaches the transport.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Failure at or after the send, with whatever diagnostics were available.
    #[error("{kind}")]
    Response {
        #[source]
        kind: ResponseError,
        /// HTTP status code, when one was received.
        status: Option<u16>,
        /// Raw response body, when one was received.
        body: Option<Bytes>,
    },
}

impl ApiError {
    /// Builds a response-tier error with its diagnostics.
    #[must_use]
    pub fn response(kind: ResponseError, status: Option<u16>, body: Option<Bytes>) -> Self {
        Self::Response { kind, status, body }
    }

    /// The failure synthesized when a dispatch is cancelled before completion.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::response(
            ResponseError::Network(anyhow::anyhow!("request cancelled")),
            None,
            None,
        )
    }

    /// Status code attached to the failure, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Request(_) => None,
            Self::Response { status, .. } => *status,
        }
    }

    /// Raw response body attached to the failure, if any.
    #[must_use]
    pub fn body(&self) -> Option<&Bytes> {
        match self {
            Self::Request(_) => None,
            Self::Response { body, .. } => body.as_ref(),
        }
    }

    /// Stable human-readable label for the failure kind.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Request(RequestError::Encoding(_)) => "Request encoding failed",
            Self::Request(RequestError::Validation(_)) => "Request validation failed",
            Self::Response { kind, .. } => match kind {
                ResponseError::EmptyResponse => "Empty response",
                ResponseError::UnexpectedStatus => "Unexpected status code",
                ResponseError::Decoding(_) => "Decoding error",
                ResponseError::Network(_) => "Network error",
            },
        }
    }
}

/// What a generated `decode_response` implementation can fail with.
///
/// `Json` and `UnhandledStatus` both classify as [`ResponseError::Decoding`];
/// `Api` passes an already-classified error through unchanged so the
/// dispatcher never double-wraps it.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The body was not valid JSON for the mapped response case.
    #[error("json deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A date field did not match any accepted format.
    #[error("invalid date: {0}")]
    Date(#[from] chrono::format::ParseError),

    /// The status code has no mapped response case for this operation.
    #[error("no response case mapped for status {0}")]
    UnhandledStatus(u16),

    /// An error the operation already classified; passed through as-is.
    #[error(transparent)]
    Api(#[from] ApiError),
}
