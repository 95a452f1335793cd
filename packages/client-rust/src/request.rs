//! The contract the dispatch core consumes from generated operations.
//!
//! Code generation emits one [`ServiceDescriptor`] constant and one
//! [`ApiRequest`] implementation per API operation, plus a [`ResponseValue`]
//! enum keyed by status code. The core never sees operation-specific types
//! beyond these traits.

use bytes::Bytes;
use http::Method;

use crate::codec::JsonCodec;
use crate::error::DecodeError;

// ---------------------------------------------------------------------------
// ServiceDescriptor
// ---------------------------------------------------------------------------

/// Static metadata identifying one API operation.
///
/// Created once per operation at generation time; never mutated.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    /// Operation identifier, e.g. `"auth.oauth2Assert"`.
    pub id: &'static str,
    /// Grouping tag, e.g. `"auth"`.
    pub tag: &'static str,
    /// HTTP method.
    pub method: Method,
    /// Path template relative to the client's base URL.
    pub path: &'static str,
    /// Whether the operation defines a request body.
    pub has_body: bool,
    /// Whether the operation sends its form parameters as multipart.
    pub is_upload: bool,
}

impl ServiceDescriptor {
    #[must_use]
    pub fn new(
        id: &'static str,
        tag: &'static str,
        method: Method,
        path: &'static str,
        has_body: bool,
        is_upload: bool,
    ) -> Self {
        Self {
            id,
            tag,
            method,
            path,
            has_body,
            is_upload,
        }
    }
}

// ---------------------------------------------------------------------------
// Parameter values
// ---------------------------------------------------------------------------

/// A caller-supplied parameter value.
///
/// Closed variant rather than an open dynamic type, so the builder's
/// emptiness and encoding rules are exhaustively checkable.
#[derive(Debug, Clone)]
pub enum ParamValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Bytes),
    File(UploadFile),
}

impl ParamValue {
    /// Textual form used for query-string and form encoding.
    ///
    /// `Bytes` and `File` values have no textual form and are never placed
    /// in a query string or url-encoded form body.
    #[must_use]
    pub fn string_form(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Int(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Bytes(_) | Self::File(_) => None,
        }
    }

    /// True when the textual form exists and is the empty string.
    ///
    /// Blank values are dropped before encoding, idempotently: repeated
    /// blanks under the same name all disappear.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        matches!(self.string_form(), Some(s) if s.is_empty())
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Bytes> for ParamValue {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<UploadFile> for ParamValue {
    fn from(value: UploadFile) -> Self {
        Self::File(value)
    }
}

/// A named, optionally typed file reference for multipart uploads.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub source: FileSource,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

/// Where the file's bytes come from.
#[derive(Debug, Clone)]
pub enum FileSource {
    /// Read from disk at send time.
    Path(std::path::PathBuf),
    /// Already in memory.
    Bytes(Bytes),
}

impl UploadFile {
    #[must_use]
    pub fn from_path(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            source: FileSource::Path(path.into()),
            file_name: None,
            mime_type: None,
        }
    }

    #[must_use]
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            source: FileSource::Bytes(bytes.into()),
            file_name: None,
            mime_type: None,
        }
    }

    #[must_use]
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Generated operation traits
// ---------------------------------------------------------------------------

/// One API operation plus its per-call parameter values.
///
/// Implemented by generated request types. All parameter accessors default
/// to empty; `path` defaults to the descriptor's template and is overridden
/// by operations with path parameters.
pub trait ApiRequest: Send + Sync {
    /// The operation's typed response, keyed by status code.
    type Response: ResponseValue;

    /// Static operation metadata.
    fn service(&self) -> &ServiceDescriptor;

    /// Path with per-call parameters substituted.
    fn path(&self) -> String {
        self.service().path.to_owned()
    }

    /// Query parameters. Blank values are dropped before encoding.
    fn query_parameters(&self) -> Vec<(String, ParamValue)> {
        Vec::new()
    }

    /// Form parameters. Blank values are dropped before encoding; file
    /// values are only meaningful for upload operations.
    fn form_parameters(&self) -> Vec<(String, ParamValue)> {
        Vec::new()
    }

    /// Extra headers. Win over the client's default headers on collision.
    fn headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Explicit JSON body. When present it takes precedence over form
    /// encoding and forces `Content-Type: application/json`.
    ///
    /// # Errors
    ///
    /// Any failure here classifies as a request encoding error.
    fn encode_body(&self, codec: &JsonCodec) -> anyhow::Result<Option<Bytes>> {
        let _ = codec;
        Ok(None)
    }
}

/// A decoded, status-code-keyed response.
///
/// Implemented by generated response enums. `successful` is the operation's
/// business-level verdict — an operation may define non-2xx cases as valid,
/// or 2xx cases as failures.
pub trait ResponseValue: Sized + Send + Sync + 'static {
    /// Constructs the typed response for a status code and raw body.
    ///
    /// # Errors
    ///
    /// [`DecodeError::Json`] for malformed bodies,
    /// [`DecodeError::UnhandledStatus`] for status codes with no mapped case.
    fn decode(status: u16, body: &[u8], codec: &JsonCodec) -> Result<Self, DecodeError>;

    /// Whether this case counts as a success.
    fn successful(&self) -> bool;
}
