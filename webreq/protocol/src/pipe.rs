//! Generic message pipe connecting two peers.
//!
//! A pipe has two halves: a [`Remote`] that sends messages and a [`Receiver`] that consumes them.
//! Dropping the [`Receiver`] makes every [`Remote`] observe a disconnect (see [`Remote::closed`]),
//! and dropping every [`Remote`] ends the stream of messages seen by the [`Receiver`].

use std::fmt;

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

/// Creates a new pipe.
pub fn pipe<T>() -> (Remote<T>, Receiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Remote(tx), Receiver(rx))
}

/// Sending half of a pipe.
pub struct Remote<T>(UnboundedSender<T>);

impl<T> Remote<T> {
    /// Sends a message to the other side.
    ///
    /// Returns `false` if the other side is gone and the message was dropped.
    pub fn send(&self, message: T) -> bool {
        self.0.send(message).is_ok()
    }

    /// Resolves when the other side is gone.
    pub async fn closed(&self) {
        self.0.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

impl<T> Clone for Remote<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> fmt::Debug for Remote<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Remote")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Receiving half of a pipe.
pub struct Receiver<T>(UnboundedReceiver<T>);

impl<T> Receiver<T> {
    /// Receives the next message.
    /// [`None`] means that every [`Remote`] is gone and there will be no more messages.
    pub async fn recv(&mut self) -> Option<T> {
        self.0.recv().await
    }

    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        self.0.try_recv()
    }

    /// Drains all messages that are already queued.
    pub fn drain(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.0.try_recv().ok()).collect()
    }

    /// Returns `true` if every [`Remote`] is gone and no messages are left.
    pub fn is_disconnected(&self) -> bool {
        self.0.is_closed() && self.0.is_empty()
    }

    pub fn into_inner(self) -> UnboundedReceiver<T> {
        self.0
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("queued", &self.0.len())
            .finish()
    }
}
