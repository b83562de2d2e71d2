//! The HTTP server.
//!
//! This module provides the HTTP front-end of the node. The central item
//! is [`HttpServer`] which takes the subsystem through its life cycle.
//! Handler modules register themselves for a path prefix and receive an
//! [`HttpRequest`] for every matching request on one of the worker
//! threads.

pub use self::event::{EventBase, HttpEvent};
pub use self::request::{HttpRequest, RequestMethod};
pub use self::router::Handler;
pub use self::server::HttpServer;

// First, a bit of scaffolding. `dispatch` contains the state necessary
// for admitting requests, `listener` the reactor thread that owns all
// socket I/O.
mod dispatch;
mod listener;

// The components the dispatch is built from.
pub mod acl;
pub mod event;
pub mod queue;
pub mod request;
pub mod response;
pub mod router;

// Finally, the life cycle.
pub mod server;
