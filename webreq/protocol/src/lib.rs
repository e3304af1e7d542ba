#![warn(clippy::indexing_slicing)]

//! Types shared by the request-interception proxy and its peers.
//!
//! The proxy sits between a loading client and the real network stack. Every link between them
//! is a typed pipe (see [`loader`] and [`header_client`]): a remote half that sends messages and
//! a receiver half that consumes them. Dropping either half is how a peer disconnects.

pub mod error;
pub mod header_client;
pub mod loader;
pub mod pipe;
pub mod request;
pub mod response;

pub use error::*;
pub use request::*;
pub use response::*;

/// Id minted by the proxy for every request it intercepts.
///
/// Unique within the owning context. This is the only id listeners ever see.
pub type WebRequestId = u64;

/// Id assigned to a request by the network stack.
///
/// Opaque and not guaranteed to be unique. Used only to route trusted header-client channels.
pub type NetworkRequestId = i32;

/// Id of the frame/route that issued a load.
pub type RoutingId = i32;

/// Id of the renderer process that owns the proxying factory.
pub type RenderProcessId = i32;
