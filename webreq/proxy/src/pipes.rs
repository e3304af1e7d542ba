//! All pipes a factory consumes, merged into one stream.
//!
//! A paused pipe is taken out of the stream and parked. Its queued messages stay queued and are
//! delivered in order once it is resumed.

use std::collections::HashMap;

use futures::{
    stream::{self, BoxStream},
    StreamExt as _,
};
use tokio_stream::{wrappers::UnboundedReceiverStream, StreamMap, StreamNotifyClose};
use webreq_protocol::{
    header_client::{HeaderClientCall, HeaderClientReceiver, LoaderCreated, TrustedHeaderClientReceiver},
    loader::{ClientEvent, ClientReceiver, ClientRemote, LoaderCommand, LoaderReceiver, TargetFactoryRemote},
    pipe::Receiver,
    WebRequestId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum PipeKey {
    /// Commands from the loading client.
    ClientLoader(WebRequestId),
    /// Fires once the loading client is gone.
    ClientGone(WebRequestId),
    /// Events from the upstream loader.
    Upstream(WebRequestId),
    /// Calls from the upstream header client.
    HeaderClient(WebRequestId),
    /// Fires once the target factory is gone.
    TargetGone,
    /// Loader announcements from the trusted header client.
    TrustedHeaderClient,
}

impl PipeKey {
    #[cfg(test)]
    fn request_id(self) -> Option<WebRequestId> {
        match self {
            Self::ClientLoader(id)
            | Self::ClientGone(id)
            | Self::Upstream(id)
            | Self::HeaderClient(id) => Some(id),
            Self::TargetGone | Self::TrustedHeaderClient => None,
        }
    }
}

#[derive(Debug)]
pub(crate) enum PipeMessage {
    Loader(LoaderCommand),
    ClientGone,
    Upstream(ClientEvent),
    HeaderClient(HeaderClientCall),
    TargetGone,
    LoaderCreated(LoaderCreated),
}

type PipeStream = StreamNotifyClose<BoxStream<'static, PipeMessage>>;

fn receiver_stream<T, F>(receiver: Receiver<T>, wrap: F) -> PipeStream
where
    T: 'static + Send,
    F: 'static + Send + FnMut(T) -> PipeMessage,
{
    StreamNotifyClose::new(
        UnboundedReceiverStream::new(receiver.into_inner())
            .map(wrap)
            .boxed(),
    )
}

#[derive(Default)]
pub(crate) struct Pipes {
    active: StreamMap<PipeKey, PipeStream>,
    parked: HashMap<PipeKey, PipeStream>,
}

impl Pipes {
    fn bind(&mut self, key: PipeKey, stream: PipeStream) {
        self.parked.remove(&key);
        self.active.insert(key, stream);
    }

    pub fn bind_client(&mut self, id: WebRequestId, loader: LoaderReceiver, client: ClientRemote) {
        self.bind(
            PipeKey::ClientLoader(id),
            receiver_stream(loader, PipeMessage::Loader),
        );

        let gone = stream::once(async move {
            client.closed().await;
            PipeMessage::ClientGone
        });
        self.bind(PipeKey::ClientGone(id), StreamNotifyClose::new(gone.boxed()));
    }

    pub fn bind_upstream(&mut self, id: WebRequestId, upstream: ClientReceiver) {
        self.bind(
            PipeKey::Upstream(id),
            receiver_stream(upstream, PipeMessage::Upstream),
        );
    }

    pub fn bind_header_client(&mut self, id: WebRequestId, header_client: HeaderClientReceiver) {
        self.bind(
            PipeKey::HeaderClient(id),
            receiver_stream(header_client, PipeMessage::HeaderClient),
        );
    }

    pub fn bind_target(&mut self, target: TargetFactoryRemote) {
        let gone = stream::once(async move {
            target.closed().await;
            PipeMessage::TargetGone
        });
        self.bind(PipeKey::TargetGone, StreamNotifyClose::new(gone.boxed()));
    }

    pub fn bind_trusted_header_client(&mut self, receiver: TrustedHeaderClientReceiver) {
        self.bind(
            PipeKey::TrustedHeaderClient,
            receiver_stream(receiver, PipeMessage::LoaderCreated),
        );
    }

    #[cfg(test)]
    pub fn is_paused(&self, key: PipeKey) -> bool {
        self.parked.contains_key(&key)
    }

    /// Stops delivering messages from the pipe. Does nothing if the pipe is not bound.
    pub fn pause(&mut self, key: PipeKey) {
        if let Some(stream) = self.active.remove(&key) {
            self.parked.insert(key, stream);
        }
    }

    /// Delivers messages from the pipe again. Does nothing if the pipe is not paused.
    pub fn resume(&mut self, key: PipeKey) {
        if let Some(stream) = self.parked.remove(&key) {
            self.active.insert(key, stream);
        }
    }

    /// Drops the pipe. Its closure is not reported.
    pub fn close(&mut self, key: PipeKey) {
        self.active.remove(&key);
        self.parked.remove(&key);
    }

    /// Drops every pipe of the given request.
    pub fn close_request(&mut self, id: WebRequestId) {
        for key in [
            PipeKey::ClientLoader(id),
            PipeKey::ClientGone(id),
            PipeKey::Upstream(id),
            PipeKey::HeaderClient(id),
        ] {
            self.close(key);
        }
    }

    pub fn clear(&mut self) {
        self.active.clear();
        self.parked.clear();
    }

    /// Number of pipes bound for the given request.
    #[cfg(test)]
    pub fn bound_for(&self, id: WebRequestId) -> usize {
        self.active
            .keys()
            .chain(self.parked.keys())
            .filter(|key| key.request_id() == Some(id))
            .count()
    }

    /// Returns the next message from one of the active pipes.
    ///
    /// [`None`] as the message means that the pipe closed. A closed pipe is then dropped.
    /// Never resolves if no pipe is active.
    pub async fn next(&mut self) -> (PipeKey, Option<PipeMessage>) {
        if self.active.is_empty() {
            return std::future::pending().await;
        }

        match tokio_stream::StreamExt::next(&mut self.active).await {
            Some(item) => item,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;
    use webreq_protocol::loader::{client_pipe, loader_pipe, LoaderCommand};

    use super::*;

    #[test]
    fn paused_pipe_delivers_later_in_order() {
        let mut pipes = Pipes::default();
        let (loader_remote, loader) = loader_pipe();
        let (client, _client_receiver) = client_pipe();
        pipes.bind_client(1, loader, client);

        pipes.pause(PipeKey::ClientLoader(1));
        loader_remote.send(LoaderCommand::PauseReadingBodyFromNet);
        loader_remote.send(LoaderCommand::ResumeReadingBodyFromNet);

        assert!(pipes.is_paused(PipeKey::ClientLoader(1)));
        assert!(pipes.next().now_or_never().is_none());

        pipes.resume(PipeKey::ClientLoader(1));
        let (key, message) = pipes.next().now_or_never().unwrap();
        assert_eq!(key, PipeKey::ClientLoader(1));
        assert!(matches!(
            message,
            Some(PipeMessage::Loader(LoaderCommand::PauseReadingBodyFromNet))
        ));
        let (_, message) = pipes.next().now_or_never().unwrap();
        assert!(matches!(
            message,
            Some(PipeMessage::Loader(LoaderCommand::ResumeReadingBodyFromNet))
        ));
    }

    #[test]
    fn reports_client_gone() {
        let mut pipes = Pipes::default();
        let (_loader_remote, loader) = loader_pipe();
        let (client, client_receiver) = client_pipe();
        pipes.bind_client(3, loader, client);
        assert_eq!(pipes.bound_for(3), 2);

        drop(client_receiver);
        let (key, message) = pipes.next().now_or_never().unwrap();
        assert_eq!(key, PipeKey::ClientGone(3));
        assert!(matches!(message, Some(PipeMessage::ClientGone)));

        pipes.close_request(3);
        assert_eq!(pipes.bound_for(3), 0);
        assert!(pipes.next().now_or_never().is_none());
    }

    #[test]
    fn reports_closure() {
        let mut pipes = Pipes::default();
        let (upstream_remote, upstream) = client_pipe();
        pipes.bind_upstream(5, upstream);

        drop(upstream_remote);
        let (key, message) = pipes.next().now_or_never().unwrap();
        assert_eq!(key, PipeKey::Upstream(5));
        assert!(message.is_none());
    }
}
