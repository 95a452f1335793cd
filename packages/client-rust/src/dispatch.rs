//! Per-dispatch state machine and response classification.
//!
//! One dispatch moves `Built -> Validating -> Sending -> Decoding ->
//! Completed`, with a cancelled flag checkable from any state. Every path
//! funnels into a single completion step so the terminal invariants hold on
//! all of them: exactly one of `on_success`/`on_failure` fires, `on_response`
//! fires exactly once, and the envelope is delivered exactly once.
//!
//! Response bodies are decoded on the blocking pool so CPU-bound parsing of
//! one response never stalls the I/O driver handling other in-flight
//! requests.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{HeaderMap, Method};
use tokio::sync::oneshot;
use tracing::{debug, info_span, Instrument};

use crate::behavior::{BehaviorGroup, ResponseView};
use crate::builder::{build_transport_request, RequestBody, TransportRequest};
use crate::client::CancelHandle;
use crate::codec::JsonCodec;
use crate::error::{ApiError, DecodeError, RequestError, ResponseError};
use crate::request::{ApiRequest, ResponseValue, ServiceDescriptor};
use crate::transport::{Transport, TransportFault, TransportReply};

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Timing recorded for one dispatch.
#[derive(Debug, Clone, Default)]
pub struct DispatchMetrics {
    /// Wall time from dispatch start to envelope construction.
    pub duration: Duration,
    /// Time spent inside the transport send, when one happened.
    pub transport_duration: Option<Duration>,
}

/// The terminal record of one dispatch: outcome plus diagnostics.
///
/// Immutable once constructed; delivered to the caller exactly once.
#[derive(Debug)]
pub struct ApiResponse<R> {
    /// Descriptor of the operation that was dispatched.
    pub service: ServiceDescriptor,
    /// Exactly one of: typed success value, classified error.
    pub result: Result<R, ApiError>,
    /// The decoded value's business-level verdict; false on any failure.
    pub successful: bool,
    /// The transport request that was (or would have been) sent.
    pub request: Option<TransportRequest>,
    /// Response status code, when one was received.
    pub status: Option<u16>,
    /// Response headers, when a reply was received.
    pub headers: Option<HeaderMap>,
    /// Raw response body, when one was received.
    pub body: Option<Bytes>,
    pub metrics: DispatchMetrics,
}

impl<R> ApiResponse<R> {
    /// The decoded value, when the dispatch succeeded.
    pub fn value(&self) -> Option<&R> {
        self.result.as_ref().ok()
    }

    /// The classified failure, when the dispatch failed.
    pub fn error(&self) -> Option<&ApiError> {
        self.result.as_ref().err()
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Client state snapshotted at dispatch time. Later client mutations do not
/// affect a dispatch already in flight.
pub(crate) struct DispatchContext {
    pub transport: Arc<dyn Transport>,
    pub codec: Arc<JsonCodec>,
    pub base_url: String,
    pub default_headers: Vec<(String, String)>,
    pub acceptable_statuses: Range<u16>,
    pub empty_body_statuses: HashSet<u16>,
}

/// Runs one dispatch end to end and delivers the envelope.
pub(crate) async fn run<Req: ApiRequest>(
    ctx: DispatchContext,
    request: Req,
    group: BehaviorGroup,
    cancel: CancelHandle,
    tx: oneshot::Sender<ApiResponse<Req::Response>>,
) {
    let service = request.service().clone();
    let span = info_span!(
        "dispatch",
        service = service.id,
        method = %service.method,
        duration_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    async move {
        let started = Instant::now();
        let outcome = run_pipeline(&ctx, &request, &group, &cancel).await;
        let metrics = DispatchMetrics {
            duration: started.elapsed(),
            transport_duration: outcome.transport_duration,
        };
        let successful = matches!(&outcome.result, Ok(value) if value.successful());

        let view = ResponseView {
            service: &service,
            successful,
            error: outcome.result.as_ref().err(),
            status: outcome.status,
            body: outcome.body.as_ref(),
            metrics: &metrics,
        };
        group.on_response(&view);

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = metrics.duration.as_millis() as u64;
        let outcome_label = match &outcome.result {
            Ok(_) => "ok",
            Err(_) => "error",
        };
        tracing::Span::current().record("duration_ms", duration_ms);
        tracing::Span::current().record("outcome", outcome_label);
        debug!(
            service = service.id,
            duration_ms,
            outcome = outcome_label,
            "dispatch complete"
        );

        let response = ApiResponse {
            service,
            result: outcome.result,
            successful,
            request: outcome.request,
            status: outcome.status,
            headers: outcome.headers,
            body: outcome.body,
            metrics,
        };
        // The caller may have dropped the handle; then there is no one to
        // deliver to.
        let _ = tx.send(response);
    }
    .instrument(span)
    .await;
}

struct Outcome<R> {
    result: Result<R, ApiError>,
    request: Option<TransportRequest>,
    status: Option<u16>,
    headers: Option<HeaderMap>,
    body: Option<Bytes>,
    transport_duration: Option<Duration>,
}

impl<R> Outcome<R> {
    fn pre_send(error: ApiError, request: Option<TransportRequest>) -> Self {
        Self {
            result: Err(error),
            request,
            status: None,
            headers: None,
            body: None,
            transport_duration: None,
        }
    }
}

async fn run_pipeline<Req: ApiRequest>(
    ctx: &DispatchContext,
    request: &Req,
    group: &BehaviorGroup,
    cancel: &CancelHandle,
) -> Outcome<Req::Response> {
    let service = request.service().clone();

    // Built
    let built = match build_transport_request(&ctx.base_url, request, &ctx.default_headers, &ctx.codec)
    {
        Ok(built) => built,
        Err(error) => {
            group.on_failure(&error);
            return Outcome::pre_send(error, None);
        }
    };

    // Validating
    let modified = group.modify_request(built);
    let before_validation = modified.clone();
    let validated = match group.validate(modified).await {
        Ok(validated) => validated,
        Err(source) => {
            let error = ApiError::Request(RequestError::Validation(source));
            group.on_failure(&error);
            return Outcome::pre_send(error, Some(before_validation));
        }
    };

    // Cancellation gate: a cancel that lands before this point guarantees no
    // transport work happens at all.
    if cancel.is_cancelled() {
        let error = ApiError::cancelled();
        group.on_failure(&error);
        return Outcome::pre_send(error, Some(validated));
    }

    // Sending
    group.before_send();
    debug!(service = service.id, url = %validated.url, "sending");
    let sent_request = validated.clone();
    let send_started = Instant::now();
    let sent = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        result = dispatch_transport(ctx, validated) => Some(result),
    };
    let transport_duration = Some(send_started.elapsed());

    // Once cancelled, only a failure outcome may reach the terminal hooks:
    // a racing late transport success is discarded here.
    let result = match sent {
        Some(result) if !cancel.is_cancelled() => result,
        _ => {
            let error = ApiError::cancelled();
            group.on_failure(&error);
            return Outcome {
                result: Err(error),
                request: Some(sent_request),
                status: None,
                headers: None,
                body: None,
                transport_duration,
            };
        }
    };

    // Decoding
    match result {
        Ok(reply) => {
            classify_reply(ctx, &service, group, cancel, reply, sent_request, transport_duration)
                .await
        }
        Err(fault) => {
            let (error, status, body) = classify_fault(fault);
            group.on_failure(&error);
            Outcome {
                result: Err(error),
                request: Some(sent_request),
                status,
                headers: None,
                body,
                transport_duration,
            }
        }
    }
}

/// Routes to the transport's plain or multipart entry point. The builder
/// produced exactly one body form, so the two are mutually exclusive.
async fn dispatch_transport(
    ctx: &DispatchContext,
    mut request: TransportRequest,
) -> Result<TransportReply, TransportFault> {
    let acceptable = ctx.acceptable_statuses.clone();
    match std::mem::take(&mut request.body) {
        RequestBody::Multipart(parts) => ctx.transport.upload(parts, request, acceptable).await,
        other => {
            request.body = other;
            ctx.transport.send(request, acceptable).await
        }
    }
}

async fn classify_reply<R: ResponseValue>(
    ctx: &DispatchContext,
    service: &ServiceDescriptor,
    group: &BehaviorGroup,
    cancel: &CancelHandle,
    reply: TransportReply,
    request: TransportRequest,
    transport_duration: Option<Duration>,
) -> Outcome<R> {
    let headers = Some(reply.headers.clone());

    let Some(status) = reply.status else {
        let error = ApiError::response(ResponseError::EmptyResponse, None, None);
        group.on_failure(&error);
        return Outcome {
            result: Err(error),
            request: Some(request),
            status: None,
            headers,
            body: Some(reply.body),
            transport_duration,
        };
    };

    // An empty body is only valid under a status that permits one, or for a
    // HEAD request.
    if reply.body.is_empty()
        && !ctx.empty_body_statuses.contains(&status)
        && service.method != Method::HEAD
    {
        let error = ApiError::response(
            ResponseError::Network(anyhow::anyhow!("empty response body for status {status}")),
            Some(status),
            Some(reply.body.clone()),
        );
        group.on_failure(&error);
        return Outcome {
            result: Err(error),
            request: Some(request),
            status: Some(status),
            headers,
            body: Some(reply.body),
            transport_duration,
        };
    }

    // Decode off the I/O context.
    let codec = Arc::clone(&ctx.codec);
    let body = reply.body.clone();
    let joined = tokio::task::spawn_blocking(move || R::decode(status, &body, &codec)).await;
    let decoded = match joined {
        Ok(decoded) => decoded,
        Err(join_error) => Err(DecodeError::Api(ApiError::response(
            ResponseError::Decoding(anyhow::anyhow!("decoder panicked: {join_error}")),
            Some(status),
            Some(reply.body.clone()),
        ))),
    };

    // Decoding is a suspension point too: a cancel that lands while the body
    // is being parsed suppresses the decoded outcome before any hook sees it.
    if cancel.is_cancelled() {
        let error = ApiError::cancelled();
        group.on_failure(&error);
        return Outcome {
            result: Err(error),
            request: Some(request),
            status: Some(status),
            headers,
            body: Some(reply.body),
            transport_duration,
        };
    }

    let result = match decoded {
        Ok(value) => {
            group.on_decoding(&reply, None);
            group.on_success(&value);
            Ok(value)
        }
        Err(DecodeError::Api(error)) => {
            // The operation already classified this; pass it through.
            group.on_decoding(&reply, Some(&error));
            group.on_failure(&error);
            Err(error)
        }
        Err(other) => {
            let error = ApiError::response(
                ResponseError::Decoding(anyhow::Error::new(other)),
                Some(status),
                Some(reply.body.clone()),
            );
            group.on_decoding(&reply, Some(&error));
            group.on_failure(&error);
            Err(error)
        }
    };

    Outcome {
        result,
        request: Some(request),
        status: Some(status),
        headers,
        body: Some(reply.body),
        transport_duration,
    }
}

fn classify_fault(fault: TransportFault) -> (ApiError, Option<u16>, Option<Bytes>) {
    match fault {
        TransportFault::UnacceptableStatus { status, body } => (
            ApiError::response(
                ResponseError::UnexpectedStatus,
                Some(status),
                Some(body.clone()),
            ),
            Some(status),
            Some(body),
        ),
        TransportFault::Network {
            source,
            status,
            body,
        } => (
            ApiError::response(ResponseError::Network(source), status, body.clone()),
            status,
            body,
        ),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
