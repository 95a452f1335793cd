//! The network-sending dependency, behind a trait.
//!
//! The dispatcher only ever talks to [`Transport`]; production code injects
//! [`ReqwestTransport`], tests inject in-memory fakes. The acceptable status
//! range is enforced here so the classifier can tell an out-of-range status
//! ([`TransportFault::UnacceptableStatus`]) apart from a genuine network
//! failure.

use std::ops::Range;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;

use crate::builder::{MultipartPart, PartData, RequestBody, TransportRequest};

// ---------------------------------------------------------------------------
// Reply / fault
// ---------------------------------------------------------------------------

/// A completed transport exchange.
#[derive(Debug, Clone)]
pub struct TransportReply {
    /// Status code of the response. `None` models a transport that completed
    /// without producing one; the classifier turns that into an
    /// empty-response failure.
    pub status: Option<u16>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Failures reported by a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportFault {
    /// The response arrived but its status fell outside the acceptable range.
    #[error("unacceptable status code {status}")]
    UnacceptableStatus { status: u16, body: Bytes },

    /// Anything else: connection failures, timeouts, protocol errors.
    #[error("transport failed: {source}")]
    Network {
        source: anyhow::Error,
        status: Option<u16>,
        body: Option<Bytes>,
    },
}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// Session abstraction the dispatcher sends through.
///
/// Used as `Arc<dyn Transport>`. Each call delivers exactly one reply or
/// fault; retry and connection policy belong to the implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a plain (non-multipart) request.
    async fn send(
        &self,
        request: TransportRequest,
        acceptable: Range<u16>,
    ) -> Result<TransportReply, TransportFault>;

    /// Sends a multipart upload. `request.body` is ignored; the parts are
    /// the body.
    async fn upload(
        &self,
        parts: Vec<MultipartPart>,
        request: TransportRequest,
        acceptable: Range<u16>,
    ) -> Result<TransportReply, TransportFault>;
}

// ---------------------------------------------------------------------------
// Reqwest adapter
// ---------------------------------------------------------------------------

/// Production transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn builder(&self, request: &TransportRequest) -> reqwest::RequestBuilder {
        self.client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
    }

    async fn execute(
        builder: reqwest::RequestBuilder,
        acceptable: Range<u16>,
    ) -> Result<TransportReply, TransportFault> {
        let response = builder.send().await.map_err(|e| TransportFault::Network {
            source: anyhow::Error::new(e),
            status: None,
            body: None,
        })?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| TransportFault::Network {
            source: anyhow::Error::new(e),
            status: Some(status),
            body: None,
        })?;

        if !acceptable.contains(&status) {
            return Err(TransportFault::UnacceptableStatus { status, body });
        }

        Ok(TransportReply {
            status: Some(status),
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: TransportRequest,
        acceptable: Range<u16>,
    ) -> Result<TransportReply, TransportFault> {
        let mut builder = self.builder(&request);
        if let RequestBody::Bytes(bytes) = request.body {
            builder = builder.body(bytes);
        }
        Self::execute(builder, acceptable).await
    }

    async fn upload(
        &self,
        parts: Vec<MultipartPart>,
        request: TransportRequest,
        acceptable: Range<u16>,
    ) -> Result<TransportReply, TransportFault> {
        let mut form = reqwest::multipart::Form::new();
        for part in parts {
            let bytes = match part.data {
                PartData::Bytes(bytes) => bytes,
                PartData::Path(path) => Bytes::from(tokio::fs::read(&path).await.map_err(|e| {
                    TransportFault::Network {
                        source: anyhow!("reading upload part {:?} from {path:?}: {e}", part.name),
                        status: None,
                        body: None,
                    }
                })?),
            };
            let mut piece = reqwest::multipart::Part::bytes(bytes.to_vec());
            if let (Some(file_name), Some(mime_type)) = (part.file_name, part.mime_type) {
                piece = piece
                    .file_name(file_name)
                    .mime_str(&mime_type)
                    .map_err(|e| TransportFault::Network {
                        source: anyhow!("invalid mime type {mime_type:?}: {e}"),
                        status: None,
                        body: None,
                    })?;
            }
            form = form.part(part.name, piece);
        }
        Self::execute(self.builder(&request).multipart(form), acceptable).await
    }
}
