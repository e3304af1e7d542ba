//! Pipes of the loading interface.
//!
//! A load involves three links:
//! 1. [`LoaderStart`] sent through a [`TargetFactoryRemote`] issues the load,
//! 2. [`LoaderCommand`]s sent through a [`LoaderRemote`] steer the running load,
//! 3. [`ClientEvent`]s sent through a [`ClientRemote`] report its progress back.
//!
//! The proxy consumes all three facing the loading client and produces them facing the upstream
//! network stack.

use bytes::Bytes;
use http::{HeaderMap, HeaderName};
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::{
    pipe::{self, Receiver, Remote},
    CompletionStatus, LoadOptions, NetworkRequestId, RedirectInfo, RequestPriority,
    ResourceRequest, ResponseHead, RoutingId,
};

/// Callbacks delivered to a loading client.
#[derive(Debug)]
pub enum ClientEvent {
    ReceiveResponse(ResponseHead),
    ReceiveRedirect(RedirectInfo, ResponseHead),
    UploadProgress {
        current: i64,
        total: i64,
        /// Resolved by the client once the progress was processed.
        ack: oneshot::Sender<()>,
    },
    ReceiveCachedMetadata(Bytes),
    TransferSizeUpdated(i32),
    StartLoadingResponseBody(BodyPipe),
    Complete(CompletionStatus),
}

pub type ClientRemote = Remote<ClientEvent>;
pub type ClientReceiver = Receiver<ClientEvent>;

pub fn client_pipe() -> (ClientRemote, ClientReceiver) {
    pipe::pipe()
}

/// Commands that steer a running load.
#[derive(Debug, Clone, PartialEq)]
pub enum LoaderCommand {
    FollowRedirect {
        removed_headers: Vec<HeaderName>,
        modified_headers: HeaderMap,
        new_url: Option<Url>,
    },
    SetPriority(RequestPriority, i32),
    PauseReadingBodyFromNet,
    ResumeReadingBodyFromNet,
}

impl LoaderCommand {
    /// A plain [`LoaderCommand::FollowRedirect`], without any edits.
    pub fn follow_redirect() -> Self {
        Self::FollowRedirect {
            removed_headers: Default::default(),
            modified_headers: Default::default(),
            new_url: None,
        }
    }
}

pub type LoaderRemote = Remote<LoaderCommand>;
pub type LoaderReceiver = Receiver<LoaderCommand>;

pub fn loader_pipe() -> (LoaderRemote, LoaderReceiver) {
    pipe::pipe()
}

/// Issues a new load.
///
/// The factory that receives this message takes ownership of the `loader` end and reports
/// through `client`.
#[derive(Debug)]
pub struct LoaderStart {
    pub loader: LoaderReceiver,
    pub routing_id: RoutingId,
    /// Id assigned by the network stack, if any.
    pub request_id: Option<NetworkRequestId>,
    pub options: LoadOptions,
    pub request: ResourceRequest,
    pub client: ClientRemote,
}

impl LoaderStart {
    /// Prepares a new load of `request`, returning the message together with the loader and
    /// client ends kept by the caller.
    pub fn new(
        request: ResourceRequest,
        request_id: Option<NetworkRequestId>,
        options: LoadOptions,
    ) -> (Self, LoaderRemote, ClientReceiver) {
        let (loader_remote, loader) = loader_pipe();
        let (client, client_receiver) = client_pipe();

        let start = Self {
            loader,
            routing_id: request.render_frame_id,
            request_id,
            options,
            request,
            client,
        };

        (start, loader_remote, client_receiver)
    }
}

pub type TargetFactoryRemote = Remote<LoaderStart>;
pub type TargetFactoryReceiver = Receiver<LoaderStart>;

pub fn target_factory_pipe() -> (TargetFactoryRemote, TargetFactoryReceiver) {
    pipe::pipe()
}

/// Consuming end of a response body stream.
#[derive(Debug)]
pub struct BodyPipe(mpsc::Receiver<Bytes>);

impl BodyPipe {
    pub async fn read(&mut self) -> Option<Bytes> {
        self.0.recv().await
    }

    pub fn try_read(&mut self) -> Option<Bytes> {
        self.0.try_recv().ok()
    }
}

/// Producing end of a response body stream.
#[derive(Debug, Clone)]
pub struct BodyWriter(mpsc::Sender<Bytes>);

impl BodyWriter {
    /// Writes a chunk, waiting for room in the pipe.
    ///
    /// Returns `false` if the reader is gone.
    pub async fn write(&self, chunk: Bytes) -> bool {
        self.0.send(chunk).await.is_ok()
    }

    pub fn try_write(&self, chunk: Bytes) -> bool {
        self.0.try_send(chunk).is_ok()
    }
}

/// Creates a body pipe holding up to `capacity` chunks.
pub fn body_pipe(capacity: usize) -> (BodyWriter, BodyPipe) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (BodyWriter(tx), BodyPipe(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loader_start_carries_frame_id() {
        let mut request = ResourceRequest::get("https://a.example/".parse().unwrap());
        request.render_frame_id = 7;

        let (start, loader, _client) = LoaderStart::new(request, Some(3), LoadOptions::NONE);
        assert_eq!(start.routing_id, 7);
        assert_eq!(start.request_id, Some(3));

        loader.send(LoaderCommand::PauseReadingBodyFromNet);
        let mut commands = start.loader;
        assert_eq!(
            commands.try_recv().unwrap(),
            LoaderCommand::PauseReadingBodyFromNet
        );
    }

    #[test]
    fn body_pipe_keeps_chunks_in_order() {
        let (writer, mut body) = body_pipe(4);
        assert!(writer.try_write(Bytes::from_static(b"hello ")));
        assert!(writer.try_write(Bytes::from_static(b"world")));
        drop(writer);

        assert_eq!(body.try_read().unwrap(), "hello ");
        assert_eq!(body.try_read().unwrap(), "world");
        assert!(body.try_read().is_none());
    }
}
