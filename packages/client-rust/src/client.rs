//! The long-lived client: shared configuration, behavior registry, and the
//! entry point that spawns one dispatch per request.
//!
//! A [`Client`] is cheap to share (`Arc` it) and every dispatch snapshots the
//! configuration it needs up front, so mutating the client mid-flight only
//! affects requests made afterwards.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::RwLock;
use tokio::sync::{oneshot, watch};
use tracing::debug;

use crate::behavior::{Behavior, BehaviorGroup};
use crate::codec::JsonCodec;
use crate::dispatch::{self, ApiResponse, DispatchContext, DispatchMetrics};
use crate::error::{ApiError, ResponseError};
use crate::request::{ApiRequest, ServiceDescriptor};
use crate::transport::{ReqwestTransport, Transport};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Construction-time client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL every operation path is resolved against.
    pub base_url: String,
    /// Headers applied to every request. Per-request headers win on
    /// collision.
    pub default_headers: Vec<(String, String)>,
    /// Statuses the transport accepts without raising a fault.
    pub acceptable_statuses: Range<u16>,
    /// Statuses under which an empty body is valid.
    pub empty_body_statuses: HashSet<u16>,
    /// Date formats tried after the built-in ones when decoding.
    pub extra_date_formats: Vec<String>,
}

impl ClientConfig {
    /// Config with the conventional HTTP defaults: 2xx acceptable, empty
    /// bodies allowed for 204 and 205.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            default_headers: Vec::new(),
            acceptable_statuses: 200..300,
            empty_body_statuses: [204, 205].into_iter().collect(),
            extra_date_formats: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Requests cancellation of one dispatch. Clone freely; all clones share the
/// same flag.
///
/// Cancellation is a one-way, idempotent signal. A dispatch observes it at
/// its state boundaries: before the send it guarantees no network work, and
/// once set no success can reach the caller even if the transport finished
/// first.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<CancelState>,
}

struct CancelState {
    cancelled: AtomicBool,
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(CancelState {
                cancelled: AtomicBool::new(false),
                tx,
            }),
        }
    }

    /// Flags the dispatch as cancelled. Safe to call any number of times,
    /// from any thread, at any stage; late calls are no-ops.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            let _ = self.inner.tx.send(true);
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves when cancellation is requested; never resolves otherwise.
    pub(crate) async fn cancelled(&self) {
        let mut rx = self.inner.tx.subscribe();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // The sender lives inside `self`, so this arm is unreachable;
            // park rather than spuriously resolve.
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// RequestHandle
// ---------------------------------------------------------------------------

/// The caller's end of one in-flight dispatch.
///
/// Always returned by [`Client::make_request`], even when the request failed
/// before anything was sent; such failures resolve immediately through
/// [`RequestHandle::response`].
pub struct RequestHandle<R> {
    service: ServiceDescriptor,
    rx: oneshot::Receiver<ApiResponse<R>>,
    cancel: CancelHandle,
}

impl<R> RequestHandle<R> {
    /// Descriptor of the operation this handle tracks.
    #[must_use]
    pub fn service(&self) -> &ServiceDescriptor {
        &self.service
    }

    /// A detachable cancellation handle for this dispatch.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Requests cancellation without consuming the handle.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the dispatch to complete and yields its envelope.
    pub async fn response(self) -> ApiResponse<R> {
        match self.rx.await {
            Ok(response) => response,
            // The dispatch task went away without delivering (it panicked or
            // its runtime shut down). Synthesize a terminal failure so the
            // caller still gets exactly one envelope.
            Err(_) => ApiResponse {
                service: self.service,
                result: Err(ApiError::response(
                    ResponseError::Network(anyhow::anyhow!("dispatch task aborted")),
                    None,
                    None,
                )),
                successful: false,
                request: None,
                status: None,
                headers: None,
                body: None,
                metrics: DispatchMetrics::default(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Shared dispatch entry point for a generated API.
pub struct Client {
    base_url: ArcSwap<String>,
    default_headers: Vec<(String, String)>,
    acceptable_statuses: Range<u16>,
    empty_body_statuses: HashSet<u16>,
    behaviors: RwLock<Vec<Arc<dyn Behavior>>>,
    transport: Arc<dyn Transport>,
    codec: Arc<JsonCodec>,
}

impl Client {
    /// Client backed by a default `reqwest` transport.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self::with_transport(config, Arc::new(ReqwestTransport::default()))
    }

    /// Client with an injected transport; tests use in-memory fakes here.
    #[must_use]
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let mut codec = JsonCodec::new();
        for format in config.extra_date_formats {
            codec = codec.with_date_format(format);
        }
        Self {
            base_url: ArcSwap::from_pointee(config.base_url),
            default_headers: config.default_headers,
            acceptable_statuses: config.acceptable_statuses,
            empty_body_statuses: config.empty_body_statuses,
            behaviors: RwLock::new(Vec::new()),
            transport,
            codec: Arc::new(codec),
        }
    }

    /// The base URL used for dispatches made from now on.
    #[must_use]
    pub fn base_url(&self) -> String {
        self.base_url.load().as_ref().clone()
    }

    /// Swaps the base URL. In-flight dispatches keep the URL they started
    /// with.
    pub fn set_base_url(&self, base_url: impl Into<String>) {
        self.base_url.store(Arc::new(base_url.into()));
    }

    /// Appends a behavior that participates in every subsequent dispatch.
    pub fn add_behavior(&self, behavior: Arc<dyn Behavior>) {
        self.behaviors.write().push(behavior);
    }

    /// Dispatches one request. Never blocks: the pipeline runs on a spawned
    /// task and the returned handle resolves when it completes.
    pub fn make_request<Req>(&self, request: Req) -> RequestHandle<Req::Response>
    where
        Req: ApiRequest + 'static,
    {
        self.make_request_with_behaviors(request, Vec::new())
    }

    /// [`Client::make_request`] with extra behaviors appended after the
    /// client's own for this dispatch only.
    pub fn make_request_with_behaviors<Req>(
        &self,
        request: Req,
        extra: Vec<Arc<dyn Behavior>>,
    ) -> RequestHandle<Req::Response>
    where
        Req: ApiRequest + 'static,
    {
        let service = request.service().clone();
        let group = BehaviorGroup::new(&self.behaviors.read(), extra);
        let ctx = DispatchContext {
            transport: Arc::clone(&self.transport),
            codec: Arc::clone(&self.codec),
            base_url: self.base_url(),
            default_headers: self.default_headers.clone(),
            acceptable_statuses: self.acceptable_statuses.clone(),
            empty_body_statuses: self.empty_body_statuses.clone(),
        };
        let cancel = CancelHandle::new();
        let (tx, rx) = oneshot::channel();

        debug!(service = service.id, "dispatching");
        tokio::spawn(dispatch::run(ctx, request, group, cancel.clone(), tx));

        RequestHandle {
            service,
            rx,
            cancel,
        }
    }
}
