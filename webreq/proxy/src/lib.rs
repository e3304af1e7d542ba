#![warn(clippy::indexing_slicing)]

//! Request-interception proxy for a loader factory.
//!
//! [`ProxyingFactory`] stands between a loading client and the real network stack and exposes
//! every load it intercepts to a [`WebRequestApi`], which can observe it, block it, redirect it
//! or rewrite its headers at a fixed set of checkpoints. Listeners may decide later, through a
//! [`Continuation`], while other requests keep flowing.
//!
//! The factory itself is sans-IO, [`FactoryTask`] runs it as a
//! [`BackgroundTask`](background_tasks::BackgroundTask).

pub mod background_tasks;
pub mod config;
pub mod error;
pub mod factory;
mod pipes;
mod proxied_request;
mod redirect;
pub mod scheme;
mod table;
pub mod task;
pub mod web_request;

pub use config::ProxyConfig;
pub use error::ProxyError;
pub use factory::{FactoryEvent, FactoryParams, LoaderFactoryType, ProxyingFactory, RequestFinished};
pub use redirect::INTERNAL_REDIRECT_STATUS;
pub use task::{FactoryCall, FactoryTask, FactoryUpdate};
pub use web_request::{
    BeforeRequestAction, CheckpointOutcome, Continuation, HeaderEdits, HeadersReceivedAction,
    RequestIdGenerator, RequestInfo, WebRequestApi,
};
