//! State machine of a single intercepted request.
//!
//! A [`ProxiedRequest`] is driven by its factory: by the client's loader commands, by upstream
//! events, by header client calls and by resolved listener continuations. Every entry point
//! returns a [`RequestFlow`], and [`ControlFlow::Break`] tells the factory that the request is
//! done and must be removed.

use std::{mem, ops::ControlFlow};

use http::{HeaderMap, HeaderName, Method};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use url::{Origin, Url};
use webreq_protocol::{
    header_client::{
        BeforeSendHeadersReply, HeaderClientCall, HeaderClientReceiver, HeadersReceivedReply,
        HeadersReceivedResult,
    },
    loader::{client_pipe, loader_pipe, ClientEvent, ClientRemote, LoaderCommand, LoaderRemote, LoaderStart},
    CompletionStatus, LoadOptions, NetError, NetworkRequestId, RedirectInfo, ResourceRequest,
    ResponseHead, ResponseHeaders, RoutingId, WebRequestId,
};

use crate::{
    error::ProxyError,
    factory::FactoryContext,
    pipes::PipeKey,
    redirect::{self, FollowRedirectParams, INTERNAL_REDIRECT_STATUS},
    web_request::{
        BeforeRequestAction, CheckpointOutcome, Continuation, Decision, HeaderEdits,
        HeadersReceivedAction, RequestInfo, Resolution,
    },
};

/// [`ControlFlow::Break`] carries the error the request ended with, if any.
pub(crate) type RequestFlow = ControlFlow<Option<NetError>>;

/// What to do once the listeners are done with the received headers.
#[derive(Debug)]
enum AfterHeaders {
    ResponseStarted,
    BeforeRedirect(RedirectInfo),
    /// Reply to the header client.
    OverrideHeaders,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingStage {
    BeforeRequest,
    BeforeSendHeaders,
    HeadersReceived,
}

/// The single checkpoint a request is suspended at.
#[derive(Debug)]
struct PendingCheckpoint {
    ticket: u64,
    stage: PendingStage,
    cancel: CancellationToken,
}

#[derive(Debug)]
pub(crate) struct ProxiedRequest {
    id: WebRequestId,
    network_id: Option<NetworkRequestId>,
    routing_id: RoutingId,
    options: LoadOptions,
    request: ResourceRequest,
    original_initiator: Option<Origin>,
    info: RequestInfo,
    current_response: ResponseHead,
    /// The loading client.
    client: ClientRemote,
    /// The upstream loader, once the load was started.
    target_loader: Option<LoaderRemote>,
    uses_header_client: bool,
    has_any_extra_headers_listeners: bool,
    /// Set once a redirect was delivered to the client, until the next restart.
    request_completed: bool,
    redirect_url: Option<Url>,
    override_headers: Option<ResponseHeaders>,
    /// Step to take once the headers received checkpoint is decided.
    after_headers: Option<AfterHeaders>,
    pending_follow_redirect: Option<FollowRedirectParams>,
    before_send_headers_reply: Option<oneshot::Sender<BeforeSendHeadersReply>>,
    headers_received_reply: Option<oneshot::Sender<HeadersReceivedResult>>,
    pending: Option<PendingCheckpoint>,
}

impl ProxiedRequest {
    pub fn new(
        id: WebRequestId,
        network_id: Option<NetworkRequestId>,
        routing_id: RoutingId,
        options: LoadOptions,
        request: ResourceRequest,
        client: ClientRemote,
        ctx: &FactoryContext,
    ) -> Self {
        let original_initiator = request.request_initiator.clone();
        let info = RequestInfo::new(
            id,
            &request,
            original_initiator.clone(),
            ctx.render_process_id,
            routing_id,
            options,
            ctx.is_for_service_worker_script(),
        );

        Self {
            id,
            network_id,
            routing_id,
            options,
            request,
            original_initiator,
            info,
            current_response: Default::default(),
            client,
            target_loader: None,
            uses_header_client: false,
            has_any_extra_headers_listeners: false,
            request_completed: false,
            redirect_url: None,
            override_headers: None,
            after_headers: None,
            pending_follow_redirect: None,
            before_send_headers_reply: None,
            headers_received_reply: None,
            pending: None,
        }
    }

    pub fn network_id(&self) -> Option<NetworkRequestId> {
        self.network_id
    }

    #[cfg(test)]
    pub fn uses_header_client(&self) -> bool {
        self.uses_header_client
    }

    #[cfg(test)]
    pub fn is_suspended(&self) -> bool {
        self.pending.is_some()
    }

    /// Starts the request from scratch with up to date [`RequestInfo`].
    pub fn restart(&mut self, ctx: &mut FactoryContext) -> RequestFlow {
        self.update_request_info(ctx);
        self.restart_internal(ctx)
    }

    fn update_request_info(&mut self, ctx: &FactoryContext) {
        self.info = RequestInfo::new(
            self.id,
            &self.request,
            self.original_initiator.clone(),
            ctx.render_process_id,
            self.routing_id,
            self.options,
            ctx.is_for_service_worker_script(),
        );

        self.uses_header_client = ctx.header_client_bound
            && self.network_id.is_some()
            && ctx.wants_extra_headers(&self.info);
        self.has_any_extra_headers_listeners |= self.uses_header_client;
    }

    #[tracing::instrument(level = "trace", skip(self, ctx), fields(request_id = self.id, url = %self.request.url))]
    fn restart_internal(&mut self, ctx: &mut FactoryContext) -> RequestFlow {
        self.request_completed = false;
        self.redirect_url = None;
        self.cancel_pending();

        let (continuation, pending) = self.checkpoint(ctx, PendingStage::BeforeRequest);
        let outcome = ctx
            .api
            .on_before_request(&self.info, &self.request, continuation);

        let pause = [PipeKey::Upstream(self.id), PipeKey::HeaderClient(self.id)];
        match self.decide(ctx, outcome, pending, &pause) {
            Some(result) => self.continue_after_before_request(ctx, result),
            None => ControlFlow::Continue(()),
        }
    }

    fn continue_after_before_request(
        &mut self,
        ctx: &mut FactoryContext,
        result: Result<BeforeRequestAction, NetError>,
    ) -> RequestFlow {
        let action = match result {
            Ok(action) => action,
            Err(error) => return self.on_request_error(ctx, error),
        };

        self.redirect_url = action.redirect_url;

        if self.uses_header_client {
            self.continue_to_start_request(ctx)
        } else {
            self.continue_to_before_send_headers(ctx)
        }
    }

    fn continue_to_before_send_headers(&mut self, ctx: &mut FactoryContext) -> RequestFlow {
        if !self.uses_header_client {
            if let Some(redirect_url) = self.redirect_url.clone() {
                return self.handle_before_request_redirect(ctx, redirect_url);
            }
        }

        ctx.pipes.resume(PipeKey::Upstream(self.id));

        let (continuation, pending) = self.checkpoint(ctx, PendingStage::BeforeSendHeaders);
        let outcome = ctx
            .api
            .on_before_send_headers(&self.info, &self.request, continuation);

        match self.decide(ctx, outcome, pending, &[PipeKey::Upstream(self.id)]) {
            Some(Ok(edits)) => self.continue_to_send_headers(ctx, edits),
            Some(Err(error)) => self.on_request_error(ctx, error),
            None => ControlFlow::Continue(()),
        }
    }

    fn continue_to_send_headers(
        &mut self,
        ctx: &mut FactoryContext,
        edits: HeaderEdits,
    ) -> RequestFlow {
        self.request.apply_header_edits(&edits.removed, &edits.set);

        if self.uses_header_client {
            match self.before_send_headers_reply.take() {
                Some(reply) => {
                    let _ = reply.send(Ok(Some(self.request.headers.clone())));
                }
                None => {
                    tracing::error!(request_id = self.id, "no header client call to reply to");
                }
            }
        } else if let Some(mut params) = self.pending_follow_redirect.take() {
            params.merge_listener_edits(&edits, &self.request.headers);

            if let Some(loader) = &self.target_loader {
                loader.send(params.into_command());
            }
        }

        ctx.pipes.resume(PipeKey::Upstream(self.id));

        ctx.api
            .on_send_headers(&self.info, &self.request, &self.request.headers);

        if self.uses_header_client {
            ControlFlow::Continue(())
        } else {
            self.continue_to_start_request(ctx)
        }
    }

    fn continue_to_start_request(&mut self, ctx: &mut FactoryContext) -> RequestFlow {
        if self.uses_header_client {
            if let Some(redirect_url) = self.redirect_url.clone() {
                return self.handle_before_request_redirect(ctx, redirect_url);
            }
        }

        ctx.pipes.resume(PipeKey::Upstream(self.id));
        ctx.pipes.resume(PipeKey::HeaderClient(self.id));

        if self.target_loader.is_some() {
            return ControlFlow::Continue(());
        }

        let Some(target) = &ctx.target else {
            tracing::debug!(
                request_id = self.id,
                "target factory is gone, cannot start the request"
            );
            return self.on_request_error(ctx, NetError::Aborted);
        };

        let mut options = self.options;
        // Later redirects may need the header client even if this load does not.
        if self.has_any_extra_headers_listeners {
            options |= LoadOptions::USE_HEADER_CLIENT;
        }

        let (loader_remote, loader) = loader_pipe();
        let (client, upstream) = client_pipe();
        let start = LoaderStart {
            loader,
            routing_id: self.routing_id,
            request_id: self.network_id,
            options,
            request: self.request.clone(),
            client,
        };

        if !target.send(start) {
            tracing::debug!(
                request_id = self.id,
                "target factory is gone, cannot start the request"
            );
            return self.on_request_error(ctx, NetError::Aborted);
        }

        tracing::debug!(
            request_id = self.id,
            network_request_id = ?self.network_id,
            url = %self.request.url,
            uses_header_client = self.uses_header_client,
            "started upstream load",
        );

        ctx.pipes.bind_upstream(self.id, upstream);
        self.target_loader = Some(loader_remote);

        ControlFlow::Continue(())
    }

    /// Realizes a redirect requested by a listener before the request was sent.
    ///
    /// The upstream load (if any) is abandoned and the client is told about an internal
    /// redirect. Following it starts a new upstream load.
    fn handle_before_request_redirect(
        &mut self,
        ctx: &mut FactoryContext,
        redirect_url: Url,
    ) -> RequestFlow {
        self.detach_upstream(ctx);

        let redirect_info = redirect::synthetic_redirect_info(
            INTERNAL_REDIRECT_STATUS,
            &self.request,
            redirect_url.clone(),
        );

        match redirect::internal_redirect_head(
            &mut self.request,
            &redirect_url,
            ctx.config.cors_mode,
        ) {
            Ok(head) => self.current_response = head,
            Err(error) => {
                tracing::warn!(request_id = self.id, %error, "failed to build internal redirect");
                return self.on_request_error(ctx, error.net_error());
            }
        }

        tracing::debug!(request_id = self.id, to = %redirect_url, "internal redirect");

        self.continue_to_before_redirect(ctx, redirect_info)
    }

    /// Runs the headers received checkpoint for `current_response`.
    fn handle_response_or_redirect_headers(
        &mut self,
        ctx: &mut FactoryContext,
        then: AfterHeaders,
    ) -> RequestFlow {
        self.override_headers = None;
        self.redirect_url = None;
        self.after_headers = Some(then);

        self.info.add_response(&self.current_response);

        let (continuation, pending) = self.checkpoint(ctx, PendingStage::HeadersReceived);
        let outcome = ctx.api.on_headers_received(
            &self.info,
            &self.request,
            self.current_response.headers.as_ref(),
            continuation,
        );

        match self.decide(ctx, outcome, pending, &[PipeKey::Upstream(self.id)]) {
            Some(result) => self.continue_after_headers_received(ctx, result),
            None => ControlFlow::Continue(()),
        }
    }

    fn continue_after_headers_received(
        &mut self,
        ctx: &mut FactoryContext,
        result: Result<HeadersReceivedAction, NetError>,
    ) -> RequestFlow {
        let action = match result {
            Ok(action) => action,
            Err(error) => return self.on_request_error(ctx, error),
        };

        let Some(then) = self.after_headers.take() else {
            tracing::error!(request_id = self.id, "lost track of the headers received step");
            return self.on_request_error(ctx, NetError::Failed);
        };

        self.override_headers = action.override_headers;
        self.redirect_url = action.redirect_url;

        match then {
            AfterHeaders::ResponseStarted => self.continue_to_response_started(ctx),
            AfterHeaders::BeforeRedirect(redirect_info) => {
                self.continue_to_before_redirect(ctx, redirect_info)
            }
            AfterHeaders::OverrideHeaders => self.continue_to_handle_override_headers(ctx),
        }
    }

    fn continue_to_handle_override_headers(&mut self, ctx: &mut FactoryContext) -> RequestFlow {
        let headers = self.override_headers.take().map(|headers| {
            let raw = headers.to_raw();
            if self.uses_header_client {
                // The plain response head misses cookie headers, keep the full set.
                self.current_response.headers = Some(headers);
            }
            raw
        });

        match self.headers_received_reply.take() {
            Some(reply) => {
                let _ = reply.send(Ok(HeadersReceivedReply {
                    headers,
                    redirect_url: self.redirect_url.clone(),
                }));
            }
            None => {
                tracing::error!(request_id = self.id, "no header client call to reply to");
            }
        }

        ctx.pipes.resume(PipeKey::Upstream(self.id));

        ControlFlow::Continue(())
    }

    fn continue_to_response_started(&mut self, ctx: &mut FactoryContext) -> RequestFlow {
        if let Some(headers) = self.override_headers.take() {
            match redirect::override_redirect_target(&headers, &self.request.url) {
                Some(Ok(new_url)) => {
                    // Too late to change what the network stack does with this response, so
                    // the client gets a redirect made up by the proxy instead.
                    let redirect_info =
                        redirect::synthetic_redirect_info(headers.status(), &self.request, new_url);
                    self.current_response.headers = Some(headers);
                    self.detach_upstream(ctx);

                    tracing::debug!(
                        request_id = self.id,
                        to = %redirect_info.new_url,
                        "response headers overridden into a redirect",
                    );

                    return self.continue_to_before_redirect(ctx, redirect_info);
                }
                Some(Err(error)) => {
                    tracing::warn!(request_id = self.id, %error, "cannot follow overridden redirect");
                    return self.on_request_error(ctx, error.net_error());
                }
                None => self.current_response.headers = Some(headers),
            }
        }

        self.info.add_response(&self.current_response);

        ctx.pipes.resume(PipeKey::Upstream(self.id));

        ctx.api.on_response_started(&self.info, &self.request);
        self.client.send(ClientEvent::ReceiveResponse(mem::take(
            &mut self.current_response,
        )));

        ControlFlow::Continue(())
    }

    fn continue_to_before_redirect(
        &mut self,
        ctx: &mut FactoryContext,
        redirect_info: RedirectInfo,
    ) -> RequestFlow {
        self.info.add_response(&self.current_response);

        ctx.pipes.resume(PipeKey::Upstream(self.id));

        ctx.api
            .on_before_redirect(&self.info, &self.request, &redirect_info.new_url);
        self.client.send(ClientEvent::ReceiveRedirect(
            redirect_info.clone(),
            mem::take(&mut self.current_response),
        ));

        self.request.url = redirect_info.new_url;
        self.request.method = redirect_info.new_method;
        self.request.site_for_cookies = redirect_info.new_site_for_cookies;
        self.request.referrer = redirect_info.new_referrer;
        self.request.referrer_policy = redirect_info.new_referrer_policy;

        if self.request.method == Method::GET {
            self.request.body = None;
        }

        self.request_completed = true;

        ControlFlow::Continue(())
    }

    /// Abandons the upstream load. A new one is started when the client follows the redirect.
    fn detach_upstream(&mut self, ctx: &mut FactoryContext) {
        ctx.pipes.close(PipeKey::Upstream(self.id));
        ctx.pipes.close(PipeKey::HeaderClient(self.id));
        self.target_loader = None;
    }

    /// Handles a command from the loading client.
    #[tracing::instrument(level = "trace", skip(self, ctx), fields(request_id = self.id))]
    pub fn on_loader_command(
        &mut self,
        ctx: &mut FactoryContext,
        command: LoaderCommand,
    ) -> RequestFlow {
        match command {
            LoaderCommand::FollowRedirect {
                removed_headers,
                modified_headers,
                new_url,
            } => self.follow_redirect(ctx, removed_headers, modified_headers, new_url),
            command @ (LoaderCommand::SetPriority(..)
            | LoaderCommand::PauseReadingBodyFromNet
            | LoaderCommand::ResumeReadingBodyFromNet) => {
                if let Some(loader) = &self.target_loader {
                    loader.send(command);
                }

                ControlFlow::Continue(())
            }
        }
    }

    fn follow_redirect(
        &mut self,
        ctx: &mut FactoryContext,
        removed_headers: Vec<HeaderName>,
        modified_headers: HeaderMap,
        new_url: Option<Url>,
    ) -> RequestFlow {
        if let Some(new_url) = &new_url {
            self.request.url = new_url.clone();
        }
        self.request
            .apply_header_edits(&removed_headers, &modified_headers);

        // Decides whether the header client is used from now on.
        self.update_request_info(ctx);

        if let Some(loader) = &self.target_loader {
            let params = FollowRedirectParams {
                removed_headers,
                modified_headers,
                new_url,
            };

            if self.uses_header_client {
                // The network stack calls back with the headers only after this.
                loader.send(params.into_command());
            } else {
                self.pending_follow_redirect = Some(params);
            }
        }

        self.restart_internal(ctx)
    }

    /// Handles an event from the upstream loader.
    #[tracing::instrument(level = "trace", skip(self, ctx), fields(request_id = self.id))]
    pub fn on_upstream_event(&mut self, ctx: &mut FactoryContext, event: ClientEvent) -> RequestFlow {
        match event {
            ClientEvent::ReceiveResponse(head) => {
                if self.uses_header_client {
                    let saved_headers = self.current_response.headers.take();
                    self.current_response = head;
                    self.current_response.headers = saved_headers;
                    self.continue_to_response_started(ctx)
                } else {
                    self.current_response = head;
                    self.handle_response_or_redirect_headers(ctx, AfterHeaders::ResponseStarted)
                }
            }
            ClientEvent::ReceiveRedirect(redirect_info, head) => {
                if self.uses_header_client {
                    let saved_headers = self.current_response.headers.take();
                    self.current_response = head;
                    // Redirects made by the network stack itself skip the header client.
                    if saved_headers.is_some() {
                        self.current_response.headers = saved_headers;
                    }
                    self.continue_to_before_redirect(ctx, redirect_info)
                } else {
                    self.current_response = head;
                    self.handle_response_or_redirect_headers(
                        ctx,
                        AfterHeaders::BeforeRedirect(redirect_info),
                    )
                }
            }
            ClientEvent::Complete(status) => self.on_complete(ctx, status),
            relayed @ (ClientEvent::UploadProgress { .. }
            | ClientEvent::ReceiveCachedMetadata(..)
            | ClientEvent::TransferSizeUpdated(..)
            | ClientEvent::StartLoadingResponseBody(..)) => {
                self.client.send(relayed);
                ControlFlow::Continue(())
            }
        }
    }

    fn on_complete(&mut self, ctx: &mut FactoryContext, status: CompletionStatus) -> RequestFlow {
        if let Some(error) = status.error {
            return self.on_request_error(ctx, error);
        }

        self.client.send(ClientEvent::Complete(status));
        ctx.api.on_completed(&self.info, &self.request, &status);

        tracing::debug!(request_id = self.id, url = %self.request.url, "request completed");

        self.finish(None)
    }

    /// Takes the header client of the upstream loader created for this request.
    pub fn on_loader_created(&mut self, ctx: &mut FactoryContext, header_client: HeaderClientReceiver) {
        ctx.pipes.bind_header_client(self.id, header_client);
    }

    /// Handles a call from the upstream header client.
    #[tracing::instrument(level = "trace", skip(self, ctx), fields(request_id = self.id))]
    pub fn on_header_client_call(
        &mut self,
        ctx: &mut FactoryContext,
        call: HeaderClientCall,
    ) -> RequestFlow {
        match call {
            HeaderClientCall::BeforeSendHeaders { headers, reply } => {
                if !self.uses_header_client {
                    let _ = reply.send(Ok(None));
                    return ControlFlow::Continue(());
                }

                self.request.headers = headers;
                self.before_send_headers_reply = Some(reply);
                self.continue_to_before_send_headers(ctx)
            }
            HeaderClientCall::HeadersReceived {
                raw_headers,
                remote_endpoint,
                reply,
            } => {
                if !self.uses_header_client {
                    let _ = reply.send(Ok(Default::default()));
                    return ControlFlow::Continue(());
                }

                self.headers_received_reply = Some(reply);

                let headers = match ResponseHeaders::parse(&raw_headers) {
                    Ok(headers) => headers,
                    Err(error) => {
                        let error = ProxyError::MalformedResponseHeaders(error);
                        tracing::warn!(request_id = self.id, %error, "header client sent bad headers");
                        return self.on_request_error(ctx, error.net_error());
                    }
                };

                self.current_response = ResponseHead {
                    headers: Some(headers),
                    remote_endpoint,
                    ..Default::default()
                };
                self.handle_response_or_redirect_headers(ctx, AfterHeaders::OverrideHeaders)
            }
        }
    }

    /// Handles a resolved listener continuation.
    #[tracing::instrument(level = "trace", skip(self, ctx), fields(request_id = self.id))]
    pub fn on_resolution(&mut self, ctx: &mut FactoryContext, resolution: Resolution) -> RequestFlow {
        let pending = match self.pending.take() {
            Some(pending) if pending.ticket == resolution.ticket => pending,
            other => {
                self.pending = other;
                let error = ProxyError::StaleContinuation {
                    request_id: self.id,
                };
                tracing::warn!(%error, ticket = resolution.ticket, "ignoring resolution");
                return ControlFlow::Continue(());
            }
        };
        pending.cancel.cancel();

        match (pending.stage, resolution.outcome) {
            (_, Err(error)) => self.on_request_error(ctx, error),
            (PendingStage::BeforeRequest, Ok(Decision::BeforeRequest(action))) => {
                self.continue_after_before_request(ctx, Ok(action))
            }
            (PendingStage::BeforeSendHeaders, Ok(Decision::BeforeSendHeaders(edits))) => {
                self.continue_to_send_headers(ctx, edits)
            }
            (PendingStage::HeadersReceived, Ok(Decision::HeadersReceived(action))) => {
                self.continue_after_headers_received(ctx, Ok(action))
            }
            (stage, Ok(decision)) => {
                tracing::error!(?stage, ?decision, "decision does not match the pending checkpoint");
                self.on_request_error(ctx, NetError::Failed)
            }
        }
    }

    /// Ends the request with an error.
    ///
    /// The client and the listeners are not notified if a redirect was already delivered since
    /// the last restart.
    pub fn on_request_error(&mut self, ctx: &mut FactoryContext, error: NetError) -> RequestFlow {
        tracing::debug!(request_id = self.id, url = %self.request.url, %error, "request failed");

        if !self.request_completed {
            self.client
                .send(ClientEvent::Complete(CompletionStatus::from_error(error)));
            ctx.api.on_error_occurred(&self.info, &self.request, error);
        }

        self.finish(Some(error))
    }

    fn finish(&mut self, error: Option<NetError>) -> RequestFlow {
        self.cancel_pending();

        let reply_error = error.unwrap_or(NetError::Aborted);
        if let Some(reply) = self.before_send_headers_reply.take() {
            let _ = reply.send(Err(reply_error));
        }
        if let Some(reply) = self.headers_received_reply.take() {
            let _ = reply.send(Err(reply_error));
        }

        ControlFlow::Break(error)
    }

    /// Mints a continuation for a new checkpoint.
    fn checkpoint<T: Into<Decision>>(
        &self,
        ctx: &mut FactoryContext,
        stage: PendingStage,
    ) -> (Continuation<T>, PendingCheckpoint) {
        let ticket = ctx.next_ticket();
        let cancel = CancellationToken::new();
        let continuation = Continuation::new(self.id, ticket, ctx.loopback(), cancel.clone());

        (
            continuation,
            PendingCheckpoint {
                ticket,
                stage,
                cancel,
            },
        )
    }

    /// Returns the decision of a checkpoint decided right away, or suspends the request pausing
    /// the given pipes.
    fn decide<T>(
        &mut self,
        ctx: &mut FactoryContext,
        outcome: CheckpointOutcome<T>,
        pending: PendingCheckpoint,
        pause: &[PipeKey],
    ) -> Option<Result<T, NetError>> {
        match outcome {
            CheckpointOutcome::Allow(decision) => {
                pending.cancel.cancel();
                Some(Ok(decision))
            }
            CheckpointOutcome::Block(error) => {
                pending.cancel.cancel();
                Some(Err(error))
            }
            CheckpointOutcome::Pending => {
                for key in pause {
                    ctx.pipes.pause(*key);
                }

                tracing::trace!(request_id = self.id, stage = ?pending.stage, "waiting for listeners");
                self.pending = Some(pending);
                None
            }
        }
    }

    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel.cancel();
        }
        self.after_headers = None;
    }
}
