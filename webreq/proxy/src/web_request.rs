//! Contract between the proxy and the web request listeners.
//!
//! The proxy consults [`WebRequestApi`] at fixed checkpoints of every request it intercepts.
//! A checkpoint either decides immediately ([`CheckpointOutcome::Allow`] or
//! [`CheckpointOutcome::Block`]) or suspends the request ([`CheckpointOutcome::Pending`]) until
//! the [`Continuation`] handed to the listener is resolved.

use std::{
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use http::{header::HeaderName, HeaderMap, HeaderValue, Method, StatusCode};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use url::{Origin, Url};
use webreq_protocol::{
    CompletionStatus, LoadOptions, NetError, RenderProcessId, ResourceRequest, ResponseHead,
    ResponseHeaders, RoutingId, WebRequestId,
};

/// Listener-facing snapshot of a request.
///
/// Derived again every time the request restarts, e.g. after a redirect.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestInfo {
    pub id: WebRequestId,
    pub url: Url,
    pub method: Method,
    /// Initiator the request was created with. Changes made by redirects are not reflected
    /// here.
    pub initiator: Option<Origin>,
    pub render_process_id: RenderProcessId,
    pub frame_id: RoutingId,
    pub routing_id: RoutingId,
    pub is_async: bool,
    pub is_service_worker_script: bool,
    pub response_code: Option<StatusCode>,
    pub response_headers: Option<ResponseHeaders>,
}

impl RequestInfo {
    pub(crate) fn new(
        id: WebRequestId,
        request: &ResourceRequest,
        original_initiator: Option<Origin>,
        render_process_id: RenderProcessId,
        routing_id: RoutingId,
        options: LoadOptions,
        is_service_worker_script: bool,
    ) -> Self {
        Self {
            id,
            url: request.url.clone(),
            method: request.method.clone(),
            initiator: original_initiator,
            render_process_id,
            frame_id: request.render_frame_id,
            routing_id,
            is_async: !options.contains(LoadOptions::SYNCHRONOUS),
            is_service_worker_script,
            response_code: None,
            response_headers: None,
        }
    }

    pub(crate) fn add_response(&mut self, head: &ResponseHead) {
        self.response_code = head.headers.as_ref().map(ResponseHeaders::status);
        self.response_headers = head.headers.clone();
    }
}

/// Result of a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointOutcome<T> {
    /// Proceed right away.
    Allow(T),
    /// Fail the request right away.
    Block(NetError),
    /// The listener keeps the [`Continuation`] and resolves it later.
    Pending,
}

/// Decision made in [`WebRequestApi::on_before_request`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BeforeRequestAction {
    /// Redirects the request here instead of loading it.
    pub redirect_url: Option<Url>,
}

impl BeforeRequestAction {
    pub fn redirect(url: Url) -> Self {
        Self {
            redirect_url: Some(url),
        }
    }
}

/// Header edits made in [`WebRequestApi::on_before_send_headers`].
///
/// Removals are applied first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderEdits {
    pub removed: Vec<HeaderName>,
    pub set: HeaderMap,
}

impl HeaderEdits {
    pub fn remove(mut self, name: HeaderName) -> Self {
        self.removed.push(name);
        self
    }

    pub fn set(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.set.insert(name, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.set.is_empty()
    }
}

/// Decision made in [`WebRequestApi::on_headers_received`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadersReceivedAction {
    /// Replaces the received headers. If these describe a redirect, the proxy follows it.
    pub override_headers: Option<ResponseHeaders>,
    /// Redirects the request here. Only honored when the headers come through the trusted header
    /// client.
    pub redirect_url: Option<Url>,
}

/// Decision carried by a resolved [`Continuation`].
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    BeforeRequest(BeforeRequestAction),
    BeforeSendHeaders(HeaderEdits),
    HeadersReceived(HeadersReceivedAction),
}

impl From<BeforeRequestAction> for Decision {
    fn from(action: BeforeRequestAction) -> Self {
        Self::BeforeRequest(action)
    }
}

impl From<HeaderEdits> for Decision {
    fn from(edits: HeaderEdits) -> Self {
        Self::BeforeSendHeaders(edits)
    }
}

impl From<HeadersReceivedAction> for Decision {
    fn from(action: HeadersReceivedAction) -> Self {
        Self::HeadersReceived(action)
    }
}

/// A resolved [`Continuation`], on its way back to the owning factory.
#[derive(Debug)]
pub(crate) struct Resolution {
    pub request_id: WebRequestId,
    pub ticket: u64,
    pub outcome: Result<Decision, NetError>,
}

/// Handle for resolving a suspended checkpoint.
///
/// Consumed on resolution, so a checkpoint cannot be resolved twice. Resolving a continuation
/// after its request finished, or after the request moved past the checkpoint, has no effect.
#[must_use = "dropping a continuation without resolving it stalls the request"]
pub struct Continuation<T> {
    request_id: WebRequestId,
    ticket: u64,
    tx: UnboundedSender<Resolution>,
    cancel: CancellationToken,
    _decision: PhantomData<fn(T)>,
}

impl<T: Into<Decision>> Continuation<T> {
    pub(crate) fn new(
        request_id: WebRequestId,
        ticket: u64,
        tx: UnboundedSender<Resolution>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            request_id,
            ticket,
            tx,
            cancel,
            _decision: PhantomData,
        }
    }

    pub fn request_id(&self) -> WebRequestId {
        self.request_id
    }

    pub fn resolve(self, result: Result<T, NetError>) {
        let resolution = Resolution {
            request_id: self.request_id,
            ticket: self.ticket,
            outcome: result.map(Into::into),
        };

        if self.tx.send(resolution).is_err() {
            tracing::trace!(
                request_id = self.request_id,
                "factory is gone, dropping resolution"
            );
        }
    }

    pub fn allow(self, decision: T) {
        self.resolve(Ok(decision))
    }

    pub fn block(self, error: NetError) {
        self.resolve(Err(error))
    }

    /// Returns `true` if the request no longer waits for this continuation.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the request no longer waits for this continuation.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

impl<T> std::fmt::Debug for Continuation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Continuation")
            .field("request_id", &self.request_id)
            .field("ticket", &self.ticket)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// The interception API consulted by the proxy.
///
/// Called synchronously from the factory's sequence, so implementations should not block.
/// Checkpoint methods allow by default, notification methods do nothing by default.
pub trait WebRequestApi: Send + Sync {
    /// Returns `false` if no listener is registered at all, in which case requests bypass the
    /// proxy.
    fn has_listener(&self) -> bool;

    /// Returns `true` if some listener wants to see the exact headers sent and received.
    fn has_extra_headers_listener(&self, _info: &RequestInfo) -> bool {
        false
    }

    fn on_before_request(
        &self,
        _info: &RequestInfo,
        _request: &ResourceRequest,
        _continuation: Continuation<BeforeRequestAction>,
    ) -> CheckpointOutcome<BeforeRequestAction> {
        CheckpointOutcome::Allow(Default::default())
    }

    fn on_before_send_headers(
        &self,
        _info: &RequestInfo,
        _request: &ResourceRequest,
        _continuation: Continuation<HeaderEdits>,
    ) -> CheckpointOutcome<HeaderEdits> {
        CheckpointOutcome::Allow(Default::default())
    }

    fn on_send_headers(&self, _info: &RequestInfo, _request: &ResourceRequest, _headers: &HeaderMap) {
    }

    fn on_headers_received(
        &self,
        _info: &RequestInfo,
        _request: &ResourceRequest,
        _headers: Option<&ResponseHeaders>,
        _continuation: Continuation<HeadersReceivedAction>,
    ) -> CheckpointOutcome<HeadersReceivedAction> {
        CheckpointOutcome::Allow(Default::default())
    }

    fn on_response_started(&self, _info: &RequestInfo, _request: &ResourceRequest) {}

    fn on_before_redirect(&self, _info: &RequestInfo, _request: &ResourceRequest, _new_url: &Url) {}

    fn on_completed(
        &self,
        _info: &RequestInfo,
        _request: &ResourceRequest,
        _status: &CompletionStatus,
    ) {
    }

    fn on_error_occurred(&self, _info: &RequestInfo, _request: &ResourceRequest, _error: NetError) {
    }
}

/// Mints [`WebRequestId`]s.
///
/// Clones share the counter, so every factory created from one generator (one per browsing
/// context) gets ids that are unique across all of them.
#[derive(Debug, Clone, Default)]
pub struct RequestIdGenerator(Arc<AtomicU64>);

impl RequestIdGenerator {
    pub fn next_id(&self) -> WebRequestId {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    #[test]
    fn continuation_resolves_through_loopback() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let continuation =
            Continuation::<HeaderEdits>::new(4, 9, tx, CancellationToken::new());

        continuation.allow(HeaderEdits::default().remove(http::header::COOKIE));

        let resolution = rx.try_recv().unwrap();
        assert_eq!(resolution.request_id, 4);
        assert_eq!(resolution.ticket, 9);
        assert_eq!(
            resolution.outcome,
            Ok(Decision::BeforeSendHeaders(HeaderEdits {
                removed: vec![http::header::COOKIE],
                set: Default::default(),
            }))
        );
    }

    #[test]
    fn continuation_observes_cancellation() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let continuation = Continuation::<BeforeRequestAction>::new(1, 1, tx, cancel.clone());

        assert!(!continuation.is_cancelled());
        cancel.cancel();
        assert!(continuation.is_cancelled());
    }

    #[test]
    fn ids_are_shared_between_clones() {
        let ids = RequestIdGenerator::default();
        let other = ids.clone();

        assert_eq!(ids.next_id(), 1);
        assert_eq!(other.next_id(), 2);
        assert_eq!(ids.next_id(), 3);
    }

    #[test]
    fn info_keeps_original_initiator() {
        let initiator = Url::parse("https://a.example").unwrap().origin();
        let request = ResourceRequest::get("https://b.example/x".parse().unwrap())
            .with_initiator(Origin::new_opaque());

        let info = RequestInfo::new(
            7,
            &request,
            Some(initiator.clone()),
            1,
            2,
            LoadOptions::SYNCHRONOUS,
            false,
        );

        assert_eq!(info.initiator, Some(initiator));
        assert!(!info.is_async);
        assert_eq!(info.response_code, None);
    }
}
