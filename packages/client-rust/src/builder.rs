//! Transport request construction.
//!
//! Turns a base URL plus one [`ApiRequest`] into a [`TransportRequest`]:
//! resolved URL, merged headers, encoded query string, and exactly one body
//! form — url-encoded form, multipart parts, or an explicit JSON body.
//!
//! Precedence: an explicit body encoder beats form encoding; the upload flag
//! selects multipart vs single-body construction exclusively, never both.

use anyhow::anyhow;
use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use http::Method;
use url::form_urlencoded;
use url::Url;

use crate::codec::JsonCodec;
use crate::error::{ApiError, RequestError};
use crate::request::{ApiRequest, FileSource, ParamValue};

// ---------------------------------------------------------------------------
// TransportRequest
// ---------------------------------------------------------------------------

/// A transport-ready request, built fresh per dispatch.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

/// The single body a request carries.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    None,
    Bytes(Bytes),
    Multipart(Vec<MultipartPart>),
}

/// One part of a multipart body.
#[derive(Debug, Clone)]
pub struct MultipartPart {
    pub name: String,
    pub data: PartData,
    /// Present only together with `mime_type`: a part is either fully typed
    /// (filename + mime) or carries a name alone.
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

/// Where a part's bytes come from.
#[derive(Debug, Clone)]
pub enum PartData {
    Path(std::path::PathBuf),
    Bytes(Bytes),
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

fn encoding_error(err: anyhow::Error) -> ApiError {
    ApiError::Request(RequestError::Encoding(err))
}

/// Builds the transport request for one dispatch.
///
/// # Errors
///
/// Fails with [`RequestError::Encoding`] when the base URL is malformed, a
/// header is not representable, or the explicit body encoder fails.
pub fn build_transport_request<R: ApiRequest>(
    base_url: &str,
    request: &R,
    default_headers: &[(String, String)],
    codec: &JsonCodec,
) -> Result<TransportRequest, ApiError> {
    let service = request.service();

    let path = request.path();
    let joined = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    let mut url =
        Url::parse(&joined).map_err(|e| encoding_error(anyhow!("malformed url {joined:?}: {e}")))?;

    // Default headers first, descriptor headers overlaid on top: the
    // descriptor wins on key collision.
    let mut headers = HeaderMap::new();
    for (key, value) in default_headers {
        insert_header(&mut headers, key, value)?;
    }
    for (key, value) in &request.headers() {
        insert_header(&mut headers, key, value)?;
    }

    let query: Vec<(String, String)> = non_blank_text(request.query_parameters());
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }

    let mut body = RequestBody::None;
    if service.is_upload {
        body = RequestBody::Multipart(multipart_parts(request.form_parameters()));
    } else {
        let form = non_blank_text(request.form_parameters());
        if !form.is_empty() {
            let encoded = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(form)
                .finish();
            body = RequestBody::Bytes(Bytes::from(encoded));
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded; charset=utf-8"),
            );
        }
    }

    // An explicit body encoder overrides whatever the form parameters built.
    if let Some(encoded) = request.encode_body(codec).map_err(encoding_error)? {
        body = RequestBody::Bytes(encoded);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    Ok(TransportRequest {
        url,
        method: service.method.clone(),
        headers,
        body,
    })
}

fn insert_header(headers: &mut HeaderMap, key: &str, value: &str) -> Result<(), ApiError> {
    let name = HeaderName::from_bytes(key.as_bytes())
        .map_err(|e| encoding_error(anyhow!("invalid header name {key:?}: {e}")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|e| encoding_error(anyhow!("invalid value for header {key:?}: {e}")))?;
    headers.insert(name, value);
    Ok(())
}

/// Keeps parameters with a non-empty textual form, in declaration order.
fn non_blank_text(params: Vec<(String, ParamValue)>) -> Vec<(String, String)> {
    params
        .into_iter()
        .filter_map(|(name, value)| {
            value
                .string_form()
                .filter(|s| !s.is_empty())
                .map(|s| (name, s))
        })
        .collect()
}

/// Maps form parameters to multipart parts.
///
/// File values keep their filename/mime pair only when both are present,
/// mirroring the two construction forms uploads support. Scalar values are
/// appended as plain named parts; blank text values are dropped.
fn multipart_parts(params: Vec<(String, ParamValue)>) -> Vec<MultipartPart> {
    let mut parts = Vec::new();
    for (name, value) in params {
        if value.is_blank() {
            continue;
        }
        let part = match value {
            ParamValue::File(file) => {
                let (file_name, mime_type) = match (file.file_name, file.mime_type) {
                    (Some(f), Some(m)) => (Some(f), Some(m)),
                    _ => (None, None),
                };
                MultipartPart {
                    name,
                    data: match file.source {
                        FileSource::Path(path) => PartData::Path(path),
                        FileSource::Bytes(bytes) => PartData::Bytes(bytes),
                    },
                    file_name,
                    mime_type,
                }
            }
            ParamValue::Bytes(bytes) => MultipartPart {
                name,
                data: PartData::Bytes(bytes),
                file_name: None,
                mime_type: None,
            },
            other => {
                // Scalars were filtered for blankness above; string_form is
                // always present for them.
                let text = other.string_form().unwrap_or_default();
                MultipartPart {
                    name,
                    data: PartData::Bytes(Bytes::from(text)),
                    file_name: None,
                    mime_type: None,
                }
            }
        };
        parts.push(part);
    }
    parts
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::error::DecodeError;
    use crate::request::{ResponseValue, ServiceDescriptor, UploadFile};

    struct Probe {
        service: ServiceDescriptor,
        query: Vec<(String, ParamValue)>,
        form: Vec<(String, ParamValue)>,
        headers: Vec<(String, String)>,
        body: Option<serde_json::Value>,
    }

    impl Probe {
        fn get(path: &'static str) -> Self {
            Self {
                service: ServiceDescriptor::new("probe.get", "probe", Method::GET, path, false, false),
                query: Vec::new(),
                form: Vec::new(),
                headers: Vec::new(),
                body: None,
            }
        }

        fn post(path: &'static str) -> Self {
            let mut probe = Self::get(path);
            probe.service.method = Method::POST;
            probe.service.has_body = true;
            probe
        }

        fn upload(path: &'static str) -> Self {
            let mut probe = Self::post(path);
            probe.service.is_upload = true;
            probe
        }
    }

    struct NoBody;

    impl ResponseValue for NoBody {
        fn decode(_status: u16, _body: &[u8], _codec: &JsonCodec) -> Result<Self, DecodeError> {
            Ok(NoBody)
        }
        fn successful(&self) -> bool {
            true
        }
    }

    impl ApiRequest for Probe {
        type Response = NoBody;

        fn service(&self) -> &ServiceDescriptor {
            &self.service
        }
        fn query_parameters(&self) -> Vec<(String, ParamValue)> {
            self.query.clone()
        }
        fn form_parameters(&self) -> Vec<(String, ParamValue)> {
            self.form.clone()
        }
        fn headers(&self) -> Vec<(String, String)> {
            self.headers.clone()
        }
        fn encode_body(&self, codec: &JsonCodec) -> anyhow::Result<Option<Bytes>> {
            self.body
                .as_ref()
                .map(|value| codec.encode(value))
                .transpose()
        }
    }

    fn build(probe: &Probe) -> TransportRequest {
        build_transport_request("https://api.example.com/v1", probe, &[], &JsonCodec::new())
            .unwrap()
    }

    #[test]
    fn blank_query_values_are_dropped() {
        let mut probe = Probe::get("/auth/oauth2/assert");
        probe.query = vec![
            ("code".into(), ParamValue::from("abc")),
            ("state".into(), ParamValue::from("")),
        ];
        let req = build(&probe);
        assert_eq!(req.url.query(), Some("code=abc"));
    }

    #[test]
    fn no_surviving_query_params_means_no_query_string() {
        let mut probe = Probe::get("/things");
        probe.query = vec![
            ("a".into(), ParamValue::from("")),
            ("b".into(), ParamValue::from("")),
        ];
        let req = build(&probe);
        assert_eq!(req.url.query(), None);
    }

    #[test]
    fn query_values_are_url_encoded() {
        let mut probe = Probe::get("/search");
        probe.query = vec![("q".into(), ParamValue::from("a b&c"))];
        let req = build(&probe);
        assert_eq!(req.url.query(), Some("q=a+b%26c"));
    }

    #[test]
    fn base_url_trailing_slash_is_tolerated() {
        let probe = Probe::get("/things");
        let req = build_transport_request(
            "https://api.example.com/v1/",
            &probe,
            &[],
            &JsonCodec::new(),
        )
        .unwrap();
        assert_eq!(req.url.as_str(), "https://api.example.com/v1/things");
    }

    #[test]
    fn malformed_base_url_is_an_encoding_error() {
        let probe = Probe::get("/things");
        let err =
            build_transport_request("not a url", &probe, &[], &JsonCodec::new()).unwrap_err();
        assert!(matches!(
            err,
            ApiError::Request(RequestError::Encoding(_))
        ));
    }

    #[test]
    fn descriptor_headers_win_over_defaults() {
        let mut probe = Probe::get("/things");
        probe.headers = vec![("x-tenant".into(), "blue".into())];
        let defaults = vec![
            ("x-tenant".to_string(), "default".to_string()),
            ("user-agent".to_string(), "lodestar".to_string()),
        ];
        let req = build_transport_request(
            "https://api.example.com",
            &probe,
            &defaults,
            &JsonCodec::new(),
        )
        .unwrap();
        assert_eq!(req.headers.get("x-tenant").unwrap(), "blue");
        assert_eq!(req.headers.get("user-agent").unwrap(), "lodestar");
    }

    #[test]
    fn form_parameters_encode_into_the_body() {
        let mut probe = Probe::post("/token");
        probe.form = vec![
            ("grant_type".into(), ParamValue::from("password")),
            ("scope".into(), ParamValue::from("")),
        ];
        let req = build(&probe);
        let RequestBody::Bytes(body) = &req.body else {
            panic!("expected a form body, got {:?}", req.body);
        };
        assert_eq!(body.as_ref(), b"grant_type=password");
        assert_eq!(
            req.headers.get(CONTENT_TYPE).unwrap(),
            "application/x-www-form-urlencoded; charset=utf-8"
        );
    }

    #[test]
    fn explicit_body_overrides_form_and_forces_json() {
        let mut probe = Probe::post("/token");
        probe.form = vec![("grant_type".into(), ParamValue::from("password"))];
        probe.body = Some(serde_json::json!({"grant_type": "password"}));
        let req = build(&probe);
        let RequestBody::Bytes(body) = &req.body else {
            panic!("expected a json body");
        };
        assert_eq!(body.as_ref(), br#"{"grant_type":"password"}"#);
        assert_eq!(req.headers.get(CONTENT_TYPE).unwrap(), "application/json");
    }

    #[test]
    fn upload_builds_multipart_with_typed_file_part() {
        let mut probe = Probe::upload("/avatar");
        probe.form = vec![(
            "image".into(),
            ParamValue::from(
                UploadFile::from_bytes(Bytes::from_static(b"\x89PNG"))
                    .with_file_name("a.png")
                    .with_mime_type("image/png"),
            ),
        )];
        let req = build(&probe);
        let RequestBody::Multipart(parts) = &req.body else {
            panic!("expected multipart body");
        };
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name, "image");
        assert_eq!(parts[0].file_name.as_deref(), Some("a.png"));
        assert_eq!(parts[0].mime_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn file_metadata_is_all_or_nothing() {
        let mut probe = Probe::upload("/avatar");
        probe.form = vec![(
            "image".into(),
            ParamValue::from(
                UploadFile::from_bytes(Bytes::from_static(b"x")).with_file_name("a.png"),
            ),
        )];
        let req = build(&probe);
        let RequestBody::Multipart(parts) = &req.body else {
            panic!("expected multipart body");
        };
        assert_eq!(parts[0].file_name, None);
        assert_eq!(parts[0].mime_type, None);
    }

    #[test]
    fn upload_scalars_become_plain_parts_and_blanks_are_dropped() {
        let mut probe = Probe::upload("/avatar");
        probe.form = vec![
            ("caption".into(), ParamValue::from("hello")),
            ("note".into(), ParamValue::from("")),
            ("raw".into(), ParamValue::from(Bytes::from_static(b"bin"))),
        ];
        let req = build(&probe);
        let RequestBody::Multipart(parts) = &req.body else {
            panic!("expected multipart body");
        };
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name, "caption");
        assert!(matches!(&parts[0].data, PartData::Bytes(b) if b.as_ref() == b"hello"));
        assert_eq!(parts[1].name, "raw");
    }

    #[test]
    fn upload_with_explicit_body_prefers_the_body() {
        let mut probe = Probe::upload("/avatar");
        probe.form = vec![("caption".into(), ParamValue::from("hello"))];
        probe.body = Some(serde_json::json!({"caption": "hello"}));
        let req = build(&probe);
        assert!(matches!(req.body, RequestBody::Bytes(_)));
        assert_eq!(req.headers.get(CONTENT_TYPE).unwrap(), "application/json");
    }

    proptest! {
        /// Blank-valued parameters never survive into the query string,
        /// regardless of how many appear or in what order.
        #[test]
        fn blank_params_never_reach_the_query(
            params in proptest::collection::vec(
                ("[a-z]{1,8}", prop_oneof![Just(String::new()), "[a-z0-9]{1,8}"]),
                0..8,
            )
        ) {
            let mut probe = Probe::get("/things");
            probe.query = params
                .iter()
                .cloned()
                .map(|(k, v)| (k, ParamValue::from(v)))
                .collect();
            let req = build(&probe);
            let query: Vec<(String, String)> = req
                .url
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            let expected: Vec<(String, String)> = params
                .into_iter()
                .filter(|(_, v)| !v.is_empty())
                .collect();
            prop_assert_eq!(query, expected);
        }
    }
}
