//! Logic for running proxying factories as background tasks.
//!
//! Each factory lives in its own task, so that a host can own many of them (one per renderer
//! process, per service worker and so on) and learn about their requests finishing through a
//! single stream of updates.
//!
//! Each background task implements the [`BackgroundTask`] trait, which specifies its properties and
//! allows for managing groups of related tasks with one [`BackgroundTasks`] instance.

use std::{collections::HashMap, fmt, future::Future, hash::Hash};

use thiserror::Error;
use tokio::{
    sync::mpsc::{self, Receiver, Sender},
    task::JoinHandle,
};
use tokio_stream::{wrappers::ReceiverStream, StreamExt, StreamMap, StreamNotifyClose};

/// The only way [`BackgroundTask`]s communicate with their parents.
///
/// Messages sent to the task come from every [`TaskSender`] clone, so the bus stays open as long
/// as at least one of them is alive.
pub struct MessageBus<T: BackgroundTask> {
    tx: Sender<T::MessageOut>,
    rx: Receiver<T::MessageIn>,
}

impl<T: BackgroundTask> MessageBus<T> {
    /// Attempts to send a message to this task's parent.
    pub async fn send<M: Into<T::MessageOut>>(&self, msg: M) {
        let _ = self.tx.send(msg.into()).await;
    }

    /// Receives a message from this task's parent.
    /// [`None`] means that every [`TaskSender`] is gone and there will be no more messages.
    pub async fn recv(&mut self) -> Option<T::MessageIn> {
        tokio::select! {
            _ = self.tx.closed() => None,
            msg = self.rx.recv() => msg,
        }
    }

    /// Stops accepting messages from this task's parent.
    /// Messages already queued can still be taken with [`MessageBus::try_recv`].
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Takes a queued message without waiting.
    pub fn try_recv(&mut self) -> Option<T::MessageIn> {
        self.rx.try_recv().ok()
    }
}

/// Common trait for all background tasks.
pub trait BackgroundTask: Sized {
    /// Type of errors that can occur during the execution.
    type Error;
    /// Type of messages consumed by the task.
    type MessageIn;
    /// Type of messages produced by the task.
    type MessageOut;

    /// Runs this task.
    /// The task can use the provided [`MessageBus`] for communication.
    fn run(
        &mut self,
        message_bus: &mut MessageBus<Self>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// A struct for managing groups of related [`BackgroundTask`]s.
/// Tasks managed with a single instance of this struct must produce messages of the same type
/// `MOut` and return errors convertible to `Err`.
pub struct BackgroundTasks<Id, MOut, Err> {
    streams: StreamMap<Id, StreamNotifyClose<ReceiverStream<MOut>>>,
    handles: HashMap<Id, JoinHandle<Result<(), Err>>>,
}

impl<Id, MOut, Err> Default for BackgroundTasks<Id, MOut, Err> {
    fn default() -> Self {
        Self {
            streams: Default::default(),
            handles: Default::default(),
        }
    }
}

impl<Id, MOut, Err> BackgroundTasks<Id, MOut, Err>
where
    Id: fmt::Debug + Hash + PartialEq + Eq + Clone + Unpin,
    Err: 'static + Send,
    MOut: Send + Unpin,
{
    /// Registers a new background task in this struct. Returns a [`TaskSender`] that can be used to
    /// send messages to the task. Dropping all clones of this sender closes the channel of
    /// messages consumed by the task (see [`MessageBus`]).
    ///
    /// # Arguments
    ///
    /// * `task` - the [`BackgroundTask`] to be spawned and managed.
    /// * `id` - unique identifier of the task.
    /// * `channel_size` - size of [`mpsc`] channels used to communicate with the task.
    ///
    /// # Panics
    ///
    /// This method panics when attempting to register a task with a duplicate id.
    pub fn register<T>(&mut self, mut task: T, id: Id, channel_size: usize) -> TaskSender<T>
    where
        T: 'static + BackgroundTask<MessageOut = MOut> + Send,
        Err: From<T::Error>,
        T::MessageIn: Send,
    {
        if self.streams.contains_key(&id) {
            panic!("duplicate task id {id:?}");
        }

        let (in_msg_tx, in_msg_rx) = mpsc::channel(channel_size);
        let (out_msg_tx, out_msg_rx) = mpsc::channel(channel_size);

        self.streams.insert(
            id.clone(),
            StreamNotifyClose::new(ReceiverStream::new(out_msg_rx)),
        );

        let mut message_bus = MessageBus {
            tx: out_msg_tx,
            rx: in_msg_rx,
        };

        self.handles.insert(
            id.clone(),
            tokio::spawn(async move { task.run(&mut message_bus).await.map_err(Into::into) }),
        );

        TaskSender(in_msg_tx)
    }

    /// Returns the next update from one of registered tasks.
    pub async fn next(&mut self) -> Option<(Id, TaskUpdate<MOut, Err>)> {
        let (id, msg) = self.streams.next().await?;

        let msg = match msg {
            Some(msg) => (id, TaskUpdate::Message(msg)),
            None => {
                let Some(handle) = self.handles.remove(&id) else {
                    tracing::error!(?id, "task handles and streams are out of sync");
                    return Some((id, TaskUpdate::Finished(Err(TaskError::Panic))));
                };

                match handle.await {
                    Err(error) => {
                        tracing::error!(?error, "task panicked");
                        (id, TaskUpdate::Finished(Err(TaskError::Panic)))
                    }
                    Ok(res) => (id, TaskUpdate::Finished(res.map_err(TaskError::Error))),
                }
            }
        };

        Some(msg)
    }
}

/// An error that can occur when executing a [`BackgroundTask`].
#[derive(Debug, Error)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub enum TaskError<Err> {
    /// An internal task error.
    #[error(transparent)]
    Error(Err),
    /// A panic.
    #[error("task panicked")]
    Panic,
}

/// An update received from a [`BackgroundTask`] registered in the [`BackgroundTasks`] struct.
#[derive(Debug)]
pub enum TaskUpdate<MOut, Err> {
    /// The task produced a message.
    Message(MOut),
    /// The task finished and was deregistered.
    Finished(Result<(), TaskError<Err>>),
}

#[cfg(test)]
impl<MOut: fmt::Debug, Err: fmt::Debug> TaskUpdate<MOut, Err> {
    pub fn unwrap_message(self) -> MOut {
        match self {
            Self::Message(mout) => mout,
            Self::Finished(res) => panic!("expected a message, got task result: {res:?}"),
        }
    }

    pub fn unwrap_finished(self) -> Result<(), TaskError<Err>> {
        match self {
            Self::Finished(res) => res,
            Self::Message(mout) => panic!("expected task result, got a message: {mout:?}"),
        }
    }
}

/// A struct that can be used to send messages to a [`BackgroundTask`] registered in the
/// [`BackgroundTasks`] struct.
///
/// Every clone is a separate binding to the task. Dropping all of them closes the channel of
/// messages consumed by the task (see [`MessageBus`]).
pub struct TaskSender<T: BackgroundTask>(Sender<T::MessageIn>);

impl<T: BackgroundTask> TaskSender<T> {
    /// Attempt to send a message to the task.
    pub async fn send<M: Into<T::MessageIn>>(&self, msg: M) {
        let _ = self.0.send(msg.into()).await;
    }

    /// Returns `true` if the task is no longer receiving messages.
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

impl<T: BackgroundTask> Clone for TaskSender<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
