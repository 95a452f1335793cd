//! The behavior pipeline: ordered, cross-cutting hooks around each dispatch.
//!
//! A [`Behavior`] implements any subset of the hooks; everything defaults to
//! a no-op pass-through. A [`BehaviorGroup`] is composed once per dispatch
//! from the client's behaviors plus per-call additions and fans each hook
//! out in list order. The asynchronous `validate` chain is strictly
//! sequential and short-circuits on the first failure.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::builder::TransportRequest;
use crate::dispatch::DispatchMetrics;
use crate::error::ApiError;
use crate::request::ServiceDescriptor;
use crate::transport::TransportReply;

// ---------------------------------------------------------------------------
// Behavior
// ---------------------------------------------------------------------------

/// A pluggable hook attached to the dispatch pipeline.
///
/// Used as `Arc<dyn Behavior>`. Hooks receive references for the duration of
/// each invocation only; no behavior owns a request.
#[async_trait]
pub trait Behavior: Send + Sync {
    /// Synchronous, pure request transform. Runs before validation, each
    /// behavior receiving the previous one's output.
    fn modify_request(&self, request: TransportRequest) -> TransportRequest {
        request
    }

    /// Asynchronous validation, e.g. a token refresh. May return a modified
    /// request. The first failure aborts the pipeline before the send.
    async fn validate(&self, request: TransportRequest) -> anyhow::Result<TransportRequest> {
        Ok(request)
    }

    /// Runs immediately before the request is handed to the transport.
    fn before_send(&self) {}

    /// The dispatch produced a typed value. Exactly one of `on_success` /
    /// `on_failure` fires per dispatch.
    fn on_success(&self, value: &(dyn Any + Send + Sync)) {
        let _ = value;
    }

    /// The dispatch failed, at whatever stage. Fires at classification time.
    fn on_failure(&self, error: &ApiError) {
        let _ = error;
    }

    /// A decode attempt finished against a transport reply. Does not fire
    /// for pre-send failures or transport failures with nothing to decode.
    fn on_decoding(&self, reply: &TransportReply, error: Option<&ApiError>) {
        let _ = (reply, error);
    }

    /// The final envelope, regardless of outcome. Fires exactly once per
    /// dispatch, after all other hooks — the one hook that always runs.
    fn on_response(&self, response: &ResponseView<'_>) {
        let _ = response;
    }
}

/// Non-generic summary of a finished dispatch, handed to `on_response`.
#[derive(Debug)]
pub struct ResponseView<'a> {
    pub service: &'a ServiceDescriptor,
    /// Business-level verdict of the decoded value; false on any failure.
    pub successful: bool,
    /// The classified failure, when the dispatch failed.
    pub error: Option<&'a ApiError>,
    pub status: Option<u16>,
    pub body: Option<&'a Bytes>,
    pub metrics: &'a DispatchMetrics,
}

// ---------------------------------------------------------------------------
// BehaviorGroup
// ---------------------------------------------------------------------------

/// Ephemeral composition of the behaviors participating in one dispatch.
///
/// Hook invocation order equals list order; client-level behaviors come
/// before per-call ones.
pub struct BehaviorGroup {
    behaviors: Vec<Arc<dyn Behavior>>,
}

impl BehaviorGroup {
    #[must_use]
    pub fn new(client: &[Arc<dyn Behavior>], extra: Vec<Arc<dyn Behavior>>) -> Self {
        let mut behaviors = Vec::with_capacity(client.len() + extra.len());
        behaviors.extend(client.iter().cloned());
        behaviors.extend(extra);
        Self { behaviors }
    }

    /// Chains the synchronous request transforms in list order.
    #[must_use]
    pub fn modify_request(&self, mut request: TransportRequest) -> TransportRequest {
        for behavior in &self.behaviors {
            request = behavior.modify_request(request);
        }
        request
    }

    /// Runs the validation chain sequentially, short-circuiting on the first
    /// failure. Behaviors without a `validate` pass the request through.
    ///
    /// # Errors
    ///
    /// The first behavior error, unmodified; the caller classifies it.
    pub async fn validate(&self, mut request: TransportRequest) -> anyhow::Result<TransportRequest> {
        for behavior in &self.behaviors {
            request = behavior.validate(request).await?;
        }
        Ok(request)
    }

    pub fn before_send(&self) {
        for behavior in &self.behaviors {
            behavior.before_send();
        }
    }

    pub fn on_success(&self, value: &(dyn Any + Send + Sync)) {
        for behavior in &self.behaviors {
            behavior.on_success(value);
        }
    }

    pub fn on_failure(&self, error: &ApiError) {
        for behavior in &self.behaviors {
            behavior.on_failure(error);
        }
    }

    pub fn on_decoding(&self, reply: &TransportReply, error: Option<&ApiError>) {
        for behavior in &self.behaviors {
            behavior.on_decoding(reply, error);
        }
    }

    pub fn on_response(&self, response: &ResponseView<'_>) {
        for behavior in &self.behaviors {
            behavior.on_response(response);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use http::header::HeaderValue;
    use http::{HeaderMap, Method};
    use parking_lot::Mutex;
    use url::Url;

    use super::*;
    use crate::builder::RequestBody;

    fn make_request() -> TransportRequest {
        TransportRequest {
            url: Url::parse("https://api.example.com/things").unwrap(),
            method: Method::GET,
            headers: HeaderMap::new(),
            body: RequestBody::None,
        }
    }

    /// Appends its label to a shared log and stamps the request, so both
    /// invocation order and chaining are observable.
    struct Tagger {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Behavior for Tagger {
        fn modify_request(&self, mut request: TransportRequest) -> TransportRequest {
            self.log.lock().push(self.label);
            request
                .headers
                .append("x-tag", HeaderValue::from_static(self.label));
            request
        }

        async fn validate(&self, request: TransportRequest) -> anyhow::Result<TransportRequest> {
            self.log.lock().push(self.label);
            Ok(request)
        }
    }

    struct FailingValidator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Behavior for FailingValidator {
        async fn validate(&self, _request: TransportRequest) -> anyhow::Result<TransportRequest> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            anyhow::bail!("token expired")
        }
    }

    struct CountingValidator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Behavior for CountingValidator {
        async fn validate(&self, request: TransportRequest) -> anyhow::Result<TransportRequest> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(request)
        }
    }

    #[test]
    fn modify_request_chains_in_list_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let group = BehaviorGroup::new(
            &[
                Arc::new(Tagger { label: "a", log: Arc::clone(&log) }) as Arc<dyn Behavior>,
                Arc::new(Tagger { label: "b", log: Arc::clone(&log) }) as Arc<dyn Behavior>,
            ],
            vec![Arc::new(Tagger { label: "c", log: Arc::clone(&log) })],
        );

        let request = group.modify_request(make_request());
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);

        let tags: Vec<_> = request.headers.get_all("x-tag").iter().collect();
        assert_eq!(tags, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn validate_runs_sequentially_in_list_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let group = BehaviorGroup::new(
            &[
                Arc::new(Tagger { label: "first", log: Arc::clone(&log) }) as Arc<dyn Behavior>,
                Arc::new(Tagger { label: "second", log: Arc::clone(&log) }) as Arc<dyn Behavior>,
            ],
            Vec::new(),
        );

        group.validate(make_request()).await.unwrap();
        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn first_validation_failure_short_circuits_the_rest() {
        let failing = Arc::new(FailingValidator { calls: AtomicUsize::new(0) });
        let skipped = Arc::new(CountingValidator { calls: AtomicUsize::new(0) });
        let group = BehaviorGroup::new(
            &[
                Arc::clone(&failing) as Arc<dyn Behavior>,
                Arc::clone(&skipped) as Arc<dyn Behavior>,
            ],
            Vec::new(),
        );

        let err = group.validate(make_request()).await.unwrap_err();
        assert_eq!(err.to_string(), "token expired");
        assert_eq!(failing.calls.load(Ordering::Relaxed), 1);
        assert_eq!(skipped.calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn hookless_behavior_is_a_pass_through() {
        struct Inert;
        impl Behavior for Inert {}

        let group = BehaviorGroup::new(&[Arc::new(Inert) as Arc<dyn Behavior>], Vec::new());
        let request = group.modify_request(make_request());
        let request = group.validate(request).await.unwrap();
        assert!(request.headers.is_empty());

        // Terminal hooks on a hookless behavior must not panic.
        group.before_send();
        group.on_failure(&ApiError::cancelled());
    }
}
