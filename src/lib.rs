//! The embedded HTTP front-end of the node.
//!
//! This crate contains the HTTP server that fronts the node’s RPC and
//! REST interfaces. It terminates HTTP/1.1 on one or more configured
//! endpoints, authorizes peers by their network address, and runs the
//! registered path handlers on a bounded pool of worker threads. The
//! node itself only has to create a [`Config`], drive an [`HttpServer`]
//! through its life cycle, and register its handlers.

pub use self::config::Config;
pub use self::error::Failed;
pub use self::http::HttpServer;

pub mod config;
pub mod error;
pub mod http;
pub mod log;
pub mod utils;
