//! [`ProxyingFactory`] running as a [`BackgroundTask`].
//!
//! Every [`TaskSender`](crate::background_tasks::TaskSender) clone is one client binding of the
//! factory. The task exits, disposing the factory, once the factory is idle: the target factory
//! is gone (or every binding is) and no request is in flight. Once the target factory is gone the
//! bindings are closed and loads still queued on them are aborted.

use std::convert::Infallible;

use webreq_protocol::loader::LoaderStart;

use crate::{
    background_tasks::{BackgroundTask, MessageBus},
    factory::{FactoryParams, ProxyingFactory, RequestFinished},
};

/// Calls made through a client binding.
#[derive(Debug)]
pub enum FactoryCall {
    CreateLoaderAndStart(LoaderStart),
}

impl From<LoaderStart> for FactoryCall {
    fn from(start: LoaderStart) -> Self {
        Self::CreateLoaderAndStart(start)
    }
}

/// Updates reported to the task's parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryUpdate {
    RequestFinished(RequestFinished),
}

impl From<RequestFinished> for FactoryUpdate {
    fn from(finished: RequestFinished) -> Self {
        Self::RequestFinished(finished)
    }
}

pub struct FactoryTask {
    factory: ProxyingFactory,
}

impl FactoryTask {
    pub fn new(params: FactoryParams) -> Self {
        Self {
            factory: ProxyingFactory::new(params),
        }
    }

    /// Capacity to use for the task's binding bus.
    pub fn channel_size(&self) -> usize {
        self.factory.config().channel_size.max(1)
    }
}

impl From<ProxyingFactory> for FactoryTask {
    fn from(factory: ProxyingFactory) -> Self {
        Self { factory }
    }
}

impl BackgroundTask for FactoryTask {
    type Error = Infallible;
    type MessageIn = FactoryCall;
    type MessageOut = FactoryUpdate;

    async fn run(&mut self, message_bus: &mut MessageBus<Self>) -> Result<(), Self::Error> {
        let mut bindings_open = true;

        loop {
            let read_bindings = bindings_open && self.factory.accepts_bindings();

            let finished = tokio::select! {
                // A lost target must be noticed before more loads are taken.
                biased;

                event = self.factory.next_event() => self.factory.handle_event(event),

                call = message_bus.recv(), if read_bindings => match call {
                    Some(FactoryCall::CreateLoaderAndStart(start)) => {
                        self.factory.create_loader_and_start(start)
                    }
                    None => {
                        bindings_open = false;
                        self.factory.on_proxy_binding_error();
                        None
                    }
                },
            };

            if let Some(finished) = finished {
                message_bus.send(finished).await;
            }

            if bindings_open && !self.factory.accepts_bindings() {
                bindings_open = false;
                message_bus.close();
                while let Some(FactoryCall::CreateLoaderAndStart(start)) = message_bus.try_recv() {
                    self.factory.reject(start);
                }
            }

            if self.factory.is_idle() {
                self.factory.dispose();
                break Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration,
    };

    use tokio::sync::mpsc::{self, UnboundedSender};
    use webreq_protocol::{
        loader::{target_factory_pipe, ClientEvent},
        CompletionStatus, LoadOptions, NetError, ResourceRequest, ResponseHead,
        ResponseHeaders,
    };

    use super::*;
    use crate::{
        background_tasks::{BackgroundTasks, TaskUpdate},
        config::ProxyConfig,
        scheme::InterceptedHandlers,
        web_request::{
            BeforeRequestAction, CheckpointOutcome, Continuation, RequestIdGenerator, RequestInfo,
            WebRequestApi,
        },
    };

    struct Listening;

    impl WebRequestApi for Listening {
        fn has_listener(&self) -> bool {
            true
        }
    }

    /// Holds back the first request in `on_before_request` and allows the others.
    struct HoldFirst {
        held: AtomicBool,
        continuations: UnboundedSender<Continuation<BeforeRequestAction>>,
    }

    impl WebRequestApi for HoldFirst {
        fn has_listener(&self) -> bool {
            true
        }

        fn on_before_request(
            &self,
            _info: &RequestInfo,
            _request: &ResourceRequest,
            continuation: Continuation<BeforeRequestAction>,
        ) -> CheckpointOutcome<BeforeRequestAction> {
            if self.held.swap(true, Ordering::SeqCst) {
                return CheckpointOutcome::Allow(Default::default());
            }

            let _ = self.continuations.send(continuation);
            CheckpointOutcome::Pending
        }
    }

    fn params(target_factory: webreq_protocol::loader::TargetFactoryRemote) -> FactoryParams {
        FactoryParams {
            api: Arc::new(Listening),
            handlers: InterceptedHandlers::default(),
            archive_loader: None,
            render_process_id: 1,
            target_factory,
            header_client: None,
            factory_type: Default::default(),
            ids: RequestIdGenerator::default(),
            config: ProxyConfig::default(),
        }
    }

    #[tokio::test]
    async fn reports_finished_requests_and_exits_when_idle() {
        let (target_remote, mut target) = target_factory_pipe();
        let mut tasks: BackgroundTasks<&'static str, FactoryUpdate, Infallible> =
            Default::default();
        let task = FactoryTask::new(params(target_remote));
        let channel_size = task.channel_size();
        let binding = tasks.register(task, "factory", channel_size);

        let request = ResourceRequest::get("https://a.example/x".parse().unwrap());
        let (start, _loader, mut client) = LoaderStart::new(request, None, LoadOptions::NONE);
        binding.send(start).await;

        let upstream = target.recv().await.unwrap();
        assert_eq!(upstream.request.url.as_str(), "https://a.example/x");
        upstream.client.send(ClientEvent::ReceiveResponse(ResponseHead::with_headers(
            ResponseHeaders::parse("HTTP/1.1 200 OK").unwrap(),
        )));
        upstream
            .client
            .send(ClientEvent::Complete(CompletionStatus::ok()));

        let (_, update) = tasks.next().await.unwrap();
        assert_eq!(
            update.unwrap_message(),
            FactoryUpdate::RequestFinished(RequestFinished { id: 1, error: None })
        );
        assert!(matches!(
            client.recv().await,
            Some(ClientEvent::ReceiveResponse(..))
        ));
        assert!(matches!(
            client.recv().await,
            Some(ClientEvent::Complete(status)) if status.is_ok()
        ));

        // Dropping the last binding with nothing in flight disposes the factory.
        drop(binding);
        let (id, update) = tasks.next().await.unwrap();
        assert_eq!(id, "factory");
        assert!(matches!(update, TaskUpdate::Finished(Ok(()))));
    }

    #[tokio::test]
    async fn stays_alive_for_requests_in_flight() {
        let (target_remote, mut target) = target_factory_pipe();
        let mut tasks: BackgroundTasks<&'static str, FactoryUpdate, Infallible> =
            Default::default();
        let binding = tasks.register(FactoryTask::new(params(target_remote)), "factory", 16);
        let second_binding = binding.clone();

        let request = ResourceRequest::get("https://a.example/x".parse().unwrap());
        let (start, _loader, mut client) = LoaderStart::new(request, None, LoadOptions::NONE);
        second_binding.send(start).await;
        let upstream = target.recv().await.unwrap();

        // All bindings are gone, but the request keeps the factory alive.
        drop(binding);
        drop(second_binding);

        upstream
            .client
            .send(ClientEvent::Complete(CompletionStatus::from_error(
                NetError::ConnectionReset,
            )));

        let (_, update) = tasks.next().await.unwrap();
        assert_eq!(
            update.unwrap_message(),
            FactoryUpdate::RequestFinished(RequestFinished {
                id: 1,
                error: Some(NetError::ConnectionReset)
            })
        );
        assert!(matches!(
            client.recv().await,
            Some(ClientEvent::Complete(status)) if status.error == Some(NetError::ConnectionReset)
        ));

        let (_, update) = tasks.next().await.unwrap();
        assert_eq!(update.unwrap_finished(), Ok(()));
    }

    #[tokio::test]
    async fn aborts_queued_loads_once_target_is_gone() {
        let (target_remote, target) = target_factory_pipe();
        let (continuations_tx, mut continuations) = mpsc::unbounded_channel();
        let mut params = params(target_remote);
        params.api = Arc::new(HoldFirst {
            held: AtomicBool::new(false),
            continuations: continuations_tx,
        });

        let mut tasks: BackgroundTasks<&'static str, FactoryUpdate, Infallible> =
            Default::default();
        let binding = tasks.register(FactoryTask::new(params), "factory", 16);

        let request = ResourceRequest::get("https://a.example/x".parse().unwrap());
        let (start, _loader, mut held_client) = LoaderStart::new(request, None, LoadOptions::NONE);
        binding.send(start).await;
        let continuation = continuations.recv().await.unwrap();

        // Queued before the task notices the target is gone.
        let request = ResourceRequest::get("https://a.example/y".parse().unwrap());
        let (start, _loader, mut queued_client) = LoaderStart::new(request, None, LoadOptions::NONE);
        binding.send(start).await;
        drop(target);

        let event = tokio::time::timeout(Duration::from_secs(5), queued_client.recv())
            .await
            .unwrap();
        assert!(matches!(
            event,
            Some(ClientEvent::Complete(status)) if status.error == Some(NetError::Aborted)
        ));
        assert!(binding.is_closed());

        // The held request can no longer reach the network.
        continuation.allow(Default::default());
        let event = tokio::time::timeout(Duration::from_secs(5), held_client.recv())
            .await
            .unwrap();
        assert!(matches!(
            event,
            Some(ClientEvent::Complete(status)) if status.error == Some(NetError::Aborted)
        ));

        let (_, update) = tasks.next().await.unwrap();
        assert_eq!(
            update.unwrap_message(),
            FactoryUpdate::RequestFinished(RequestFinished {
                id: 1,
                error: Some(NetError::Aborted)
            })
        );
        let (_, update) = tasks.next().await.unwrap();
        assert_eq!(update.unwrap_finished(), Ok(()));
    }
}
