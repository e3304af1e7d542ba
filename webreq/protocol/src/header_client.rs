//! Pipes of the trusted header client.
//!
//! When a load is issued with [`LoadOptions::USE_HEADER_CLIENT`](crate::LoadOptions), the network
//! stack announces the load through a [`TrustedHeaderClientRemote`] and then calls back with the
//! exact headers it is about to send and with the raw headers it received, before they are
//! processed any further.

use std::net::SocketAddr;

use bytes::Bytes;
use http::HeaderMap;
use tokio::sync::oneshot;
use url::Url;

use crate::{
    pipe::{self, Receiver, Remote},
    NetError, NetworkRequestId,
};

/// Reply to [`HeaderClientCall::BeforeSendHeaders`].
///
/// `Ok(None)` leaves the headers unchanged.
pub type BeforeSendHeadersReply = Result<Option<HeaderMap>, NetError>;

/// Reply to [`HeaderClientCall::HeadersReceived`].
pub type HeadersReceivedResult = Result<HeadersReceivedReply, NetError>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadersReceivedReply {
    /// Raw header block replacing the received one.
    pub headers: Option<Bytes>,
    /// Url the request should be redirected to instead.
    pub redirect_url: Option<Url>,
}

/// Calls made by the network stack on behalf of a single load.
#[derive(Debug)]
pub enum HeaderClientCall {
    BeforeSendHeaders {
        headers: HeaderMap,
        reply: oneshot::Sender<BeforeSendHeadersReply>,
    },
    HeadersReceived {
        raw_headers: String,
        remote_endpoint: Option<SocketAddr>,
        reply: oneshot::Sender<HeadersReceivedResult>,
    },
}

pub type HeaderClientRemote = Remote<HeaderClientCall>;
pub type HeaderClientReceiver = Receiver<HeaderClientCall>;

pub fn header_client_pipe() -> (HeaderClientRemote, HeaderClientReceiver) {
    pipe::pipe()
}

impl HeaderClientRemote {
    /// Sends [`HeaderClientCall::BeforeSendHeaders`] and returns the pending reply.
    ///
    /// Returns [`None`] if the other side is gone.
    pub fn before_send_headers(
        &self,
        headers: HeaderMap,
    ) -> Option<oneshot::Receiver<BeforeSendHeadersReply>> {
        let (reply, rx) = oneshot::channel();
        self.send(HeaderClientCall::BeforeSendHeaders { headers, reply })
            .then_some(rx)
    }

    /// Sends [`HeaderClientCall::HeadersReceived`] and returns the pending reply.
    ///
    /// Returns [`None`] if the other side is gone.
    pub fn headers_received(
        &self,
        raw_headers: impl Into<String>,
        remote_endpoint: Option<SocketAddr>,
    ) -> Option<oneshot::Receiver<HeadersReceivedResult>> {
        let (reply, rx) = oneshot::channel();
        self.send(HeaderClientCall::HeadersReceived {
            raw_headers: raw_headers.into(),
            remote_endpoint,
            reply,
        })
        .then_some(rx)
    }
}

/// Announces that the network stack created a loader for the request with the given id, and
/// hands over the receiving end of its header client.
#[derive(Debug)]
pub struct LoaderCreated {
    pub request_id: NetworkRequestId,
    pub header_client: HeaderClientReceiver,
}

pub type TrustedHeaderClientRemote = Remote<LoaderCreated>;
pub type TrustedHeaderClientReceiver = Receiver<LoaderCreated>;

pub fn trusted_header_client_pipe() -> (TrustedHeaderClientRemote, TrustedHeaderClientReceiver) {
    pipe::pipe()
}

impl TrustedHeaderClientRemote {
    /// Announces a new loader and returns the remote end of its header client.
    pub fn loader_created(&self, request_id: NetworkRequestId) -> HeaderClientRemote {
        let (remote, header_client) = header_client_pipe();
        self.send(LoaderCreated {
            request_id,
            header_client,
        });
        remote
    }
}
