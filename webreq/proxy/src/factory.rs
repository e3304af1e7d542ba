//! The proxying loader factory.
//!
//! [`ProxyingFactory`] accepts loads from a client and decides how each one is served: by a
//! custom scheme handler, by the archive loader, straight by the target factory when nobody
//! listens, or as a [`ProxiedRequest`] that exposes the load to the [`WebRequestApi`].
//!
//! The factory does no I/O by itself. Its owner feeds it new loads with
//! [`ProxyingFactory::create_loader_and_start`] and drives everything else with
//! [`ProxyingFactory::next_event`] and [`ProxyingFactory::handle_event`], see
//! [`FactoryTask`](crate::task::FactoryTask).

use std::{fmt, ops::ControlFlow, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use webreq_protocol::{
    header_client::{LoaderCreated, TrustedHeaderClientReceiver},
    loader::{ClientEvent, LoaderStart, TargetFactoryRemote},
    CompletionStatus, NetError, NetworkRequestId, RenderProcessId, WebRequestId,
};

use crate::{
    config::{ExtraHeadersPolicy, ProxyConfig},
    pipes::{PipeKey, PipeMessage, Pipes},
    proxied_request::{ProxiedRequest, RequestFlow},
    scheme::{ArchiveLoader, InterceptedHandlers},
    table::RequestTable,
    web_request::{RequestIdGenerator, RequestInfo, Resolution, WebRequestApi},
};

/// What the loads of a factory are for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderFactoryType {
    Navigation,
    Download,
    #[default]
    DocumentSubResource,
    WorkerSubResource,
    ServiceWorkerSubResource,
    ServiceWorkerScript,
    Prefetch,
    DevTools,
}

/// Everything needed to create a [`ProxyingFactory`].
pub struct FactoryParams {
    pub api: Arc<dyn WebRequestApi>,
    pub handlers: InterceptedHandlers,
    pub archive_loader: Option<Arc<dyn ArchiveLoader>>,
    pub render_process_id: RenderProcessId,
    /// The real loader factory.
    pub target_factory: TargetFactoryRemote,
    /// Present if the network stack supports the trusted header client.
    pub header_client: Option<TrustedHeaderClientReceiver>,
    pub factory_type: LoaderFactoryType,
    pub ids: RequestIdGenerator,
    pub config: ProxyConfig,
}

/// A request that left the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFinished {
    pub id: WebRequestId,
    /// [`None`] if the request completed successfully.
    pub error: Option<NetError>,
}

/// Input for [`ProxyingFactory::handle_event`].
#[derive(Debug)]
pub struct FactoryEvent(EventKind);

#[derive(Debug)]
enum EventKind {
    Pipe(PipeKey, Option<PipeMessage>),
    Resolution(Resolution),
}

/// State shared by all requests of a factory.
pub(crate) struct FactoryContext {
    pub pipes: Pipes,
    pub api: Arc<dyn WebRequestApi>,
    pub target: Option<TargetFactoryRemote>,
    pub header_client_bound: bool,
    pub config: ProxyConfig,
    pub render_process_id: RenderProcessId,
    pub factory_type: LoaderFactoryType,
    loopback: UnboundedSender<Resolution>,
    last_ticket: u64,
}

impl FactoryContext {
    pub fn next_ticket(&mut self) -> u64 {
        self.last_ticket += 1;
        self.last_ticket
    }

    pub fn loopback(&self) -> UnboundedSender<Resolution> {
        self.loopback.clone()
    }

    pub fn is_for_service_worker_script(&self) -> bool {
        self.factory_type == LoaderFactoryType::ServiceWorkerScript
    }

    /// Whether the request should go through the trusted header client, if there is one.
    pub fn wants_extra_headers(&self, info: &RequestInfo) -> bool {
        match self.config.extra_headers {
            ExtraHeadersPolicy::Listener => self.api.has_extra_headers_listener(info),
            ExtraHeadersPolicy::Always => true,
            ExtraHeadersPolicy::Never => false,
        }
    }
}

pub struct ProxyingFactory {
    ctx: FactoryContext,
    requests: RequestTable<ProxiedRequest>,
    ids: RequestIdGenerator,
    handlers: InterceptedHandlers,
    archive_loader: Option<Arc<dyn ArchiveLoader>>,
    loopback: UnboundedReceiver<Resolution>,
    /// Whether new loads are still accepted from the client bindings.
    accepts_bindings: bool,
}

impl ProxyingFactory {
    pub fn new(params: FactoryParams) -> Self {
        let FactoryParams {
            api,
            handlers,
            archive_loader,
            render_process_id,
            target_factory,
            header_client,
            factory_type,
            ids,
            config,
        } = params;

        let (loopback_tx, loopback) = mpsc::unbounded_channel();

        let mut pipes = Pipes::default();
        pipes.bind_target(target_factory.clone());
        let header_client_bound = header_client.is_some();
        if let Some(header_client) = header_client {
            pipes.bind_trusted_header_client(header_client);
        }

        Self {
            ctx: FactoryContext {
                pipes,
                api,
                target: Some(target_factory),
                header_client_bound,
                config,
                render_process_id,
                factory_type,
                loopback: loopback_tx,
                last_ticket: 0,
            },
            requests: Default::default(),
            ids,
            handlers,
            archive_loader,
            loopback,
            accepts_bindings: true,
        }
    }

    /// Accepts a new load from the client.
    ///
    /// Returns [`Some`] if the load was intercepted and finished right away, e.g. because a
    /// listener blocked it.
    #[tracing::instrument(level = "trace", skip_all, fields(url = %start.request.url))]
    pub fn create_loader_and_start(&mut self, start: LoaderStart) -> Option<RequestFinished> {
        if let Some(handler) = self.handlers.get(start.request.url.scheme()) {
            tracing::trace!(protocol = ?handler.protocol, "load served by a scheme handler");
            handler.handle(start);
            return None;
        }

        if start.request.url.scheme() == "file" {
            if let Some(archive_loader) = &self.archive_loader {
                tracing::trace!("load served by the archive loader");
                archive_loader.start(start);
                return None;
            }
        }

        if !self.ctx.api.has_listener() {
            self.pass_through(start);
            return None;
        }

        let LoaderStart {
            loader,
            routing_id,
            request_id,
            options,
            request,
            client,
        } = start;

        // Ids are unique within the browsing context, network ids are not unique at all.
        let id = self.ids.next_id();
        let network_id = request_id.filter(|network_id| *network_id != 0);

        let proxied = ProxiedRequest::new(
            id,
            network_id,
            routing_id,
            options,
            request,
            client.clone(),
            &self.ctx,
        );

        if self.requests.insert(id, network_id, proxied).is_err() {
            tracing::error!(request_id = id, "request id is already taken");
            client.send(ClientEvent::Complete(CompletionStatus::from_error(
                NetError::Failed,
            )));
            return None;
        }

        tracing::debug!(request_id = id, network_request_id = ?network_id, "intercepting request");

        self.ctx.pipes.bind_client(id, loader, client);

        self.with_request(id, |request, ctx| request.restart(ctx))
    }

    fn pass_through(&mut self, start: LoaderStart) {
        let client = start.client.clone();

        let sent = match &self.ctx.target {
            Some(target) => target.send(start),
            None => false,
        };

        if !sent {
            tracing::debug!("target factory is gone, aborting pass-through load");
            client.send(ClientEvent::Complete(CompletionStatus::from_error(
                NetError::Aborted,
            )));
        }
    }

    /// Waits for the next event to handle.
    ///
    /// Cancel safe.
    pub async fn next_event(&mut self) -> FactoryEvent {
        tokio::select! {
            biased;

            Some(resolution) = self.loopback.recv() => FactoryEvent(EventKind::Resolution(resolution)),
            (key, message) = self.ctx.pipes.next() => FactoryEvent(EventKind::Pipe(key, message)),
        }
    }

    /// Handles an event returned from [`ProxyingFactory::next_event`].
    pub fn handle_event(&mut self, event: FactoryEvent) -> Option<RequestFinished> {
        match event.0 {
            EventKind::Resolution(resolution) => {
                let id = resolution.request_id;
                if !self.requests.contains(id) {
                    tracing::trace!(request_id = id, "resolution for a finished request");
                    return None;
                }

                self.with_request(id, |request, ctx| request.on_resolution(ctx, resolution))
            }
            EventKind::Pipe(key, message) => self.handle_pipe(key, message),
        }
    }

    #[tracing::instrument(level = "trace", skip(self))]
    fn handle_pipe(&mut self, key: PipeKey, message: Option<PipeMessage>) -> Option<RequestFinished> {
        match (key, message) {
            (PipeKey::ClientLoader(id), Some(PipeMessage::Loader(command))) => {
                self.with_request(id, |request, ctx| request.on_loader_command(ctx, command))
            }
            (PipeKey::ClientLoader(id), None) | (PipeKey::ClientGone(id), Some(_)) => self
                .with_request(id, |request, ctx| {
                    request.on_request_error(ctx, NetError::Aborted)
                }),
            (PipeKey::ClientGone(_), None) => None,

            (PipeKey::Upstream(id), Some(PipeMessage::Upstream(event))) => {
                self.with_request(id, |request, ctx| request.on_upstream_event(ctx, event))
            }
            (PipeKey::Upstream(id), None) => self.with_request(id, |request, ctx| {
                request.on_request_error(ctx, NetError::Failed)
            }),

            (PipeKey::HeaderClient(id), Some(PipeMessage::HeaderClient(call))) => {
                self.with_request(id, |request, ctx| request.on_header_client_call(ctx, call))
            }
            (PipeKey::HeaderClient(_), None) => None,

            (PipeKey::TrustedHeaderClient, Some(PipeMessage::LoaderCreated(created))) => {
                self.on_loader_created(created);
                None
            }
            (PipeKey::TrustedHeaderClient, None) => {
                tracing::debug!("trusted header client is gone");
                self.ctx.header_client_bound = false;
                None
            }

            (PipeKey::TargetGone, _) => {
                self.on_target_factory_error();
                None
            }

            (key, Some(message)) => {
                tracing::error!(?key, ?message, "message arrived on an unexpected pipe");
                None
            }
        }
    }

    /// Routes the header client of a new upstream loader to its request.
    fn on_loader_created(&mut self, created: LoaderCreated) {
        let LoaderCreated {
            request_id,
            header_client,
        } = created;

        let Some(id) = self.requests.find_by_network_id(request_id) else {
            tracing::trace!(network_request_id = request_id, "loader created for a finished request");
            return;
        };

        if let Some(request) = self.requests.get_mut(id) {
            request.on_loader_created(&mut self.ctx, header_client);
        }
    }

    /// Runs `f` on the request with the given id and removes the request if `f` finished it.
    fn with_request<F>(&mut self, id: WebRequestId, f: F) -> Option<RequestFinished>
    where
        F: FnOnce(&mut ProxiedRequest, &mut FactoryContext) -> RequestFlow,
    {
        let Some(request) = self.requests.get_mut(id) else {
            tracing::trace!(request_id = id, "event for a finished request");
            return None;
        };

        match f(request, &mut self.ctx) {
            ControlFlow::Continue(()) => None,
            ControlFlow::Break(error) => Some(self.remove_request(id, error)),
        }
    }

    fn remove_request(&mut self, id: WebRequestId, error: Option<NetError>) -> RequestFinished {
        let network_id = self
            .requests
            .get_mut(id)
            .and_then(|request| request.network_id());
        self.requests.remove(id, network_id);
        self.ctx.pipes.close_request(id);

        tracing::trace!(request_id = id, in_flight = self.requests.len(), "request removed");

        RequestFinished { id, error }
    }

    /// The target factory is gone. Requests in flight keep their upstream loaders, but no new
    /// loads can be started.
    pub fn on_target_factory_error(&mut self) {
        tracing::debug!(in_flight = self.requests.len(), "target factory is gone");

        self.ctx.target = None;
        self.ctx.pipes.close(PipeKey::TargetGone);
        self.accepts_bindings = false;
    }

    /// Every client binding is gone.
    pub fn on_proxy_binding_error(&mut self) {
        tracing::debug!(in_flight = self.requests.len(), "all client bindings are gone");

        self.ctx.target = None;
        self.ctx.pipes.close(PipeKey::TargetGone);
        self.accepts_bindings = false;
    }

    /// Fails a load that arrived after the factory stopped accepting bindings.
    pub fn reject(&self, start: LoaderStart) {
        tracing::debug!(url = %start.request.url, "factory no longer accepts loads, aborting");
        start
            .client
            .send(ClientEvent::Complete(CompletionStatus::from_error(
                NetError::Aborted,
            )));
    }

    /// Whether the owner should keep reading loads from the client bindings.
    pub fn accepts_bindings(&self) -> bool {
        self.accepts_bindings
    }

    /// Whether the factory has nothing left to do.
    pub fn is_idle(&self) -> bool {
        self.ctx.target.is_none() && self.requests.is_empty()
    }

    /// Drops everything the factory still holds.
    pub fn dispose(&mut self) {
        let leftover: Vec<_> = self.requests.ids().collect();
        if !leftover.is_empty() {
            tracing::warn!(?leftover, "disposing factory with requests in flight");
        }

        self.ctx.target = None;
        self.ctx.pipes.clear();
        self.requests = Default::default();

        tracing::debug!(render_process_id = self.ctx.render_process_id, "factory disposed");
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.ctx.config
    }

    pub fn in_flight(&self) -> usize {
        self.requests.len()
    }

    pub fn is_in_flight(&self, id: WebRequestId) -> bool {
        self.requests.contains(id)
    }

    pub fn find_by_network_id(&self, network_id: NetworkRequestId) -> Option<WebRequestId> {
        self.requests.find_by_network_id(network_id)
    }
}

impl fmt::Debug for ProxyingFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyingFactory")
            .field("in_flight", &self.requests.len())
            .field("target_bound", &self.ctx.target.is_some())
            .field("header_client_bound", &self.ctx.header_client_bound)
            .field("accepts_bindings", &self.accepts_bindings)
            .finish_non_exhaustive()
    }
}
