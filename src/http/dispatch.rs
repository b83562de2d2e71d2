//! Admitting requests and dispatching them to the worker pool.
//!
//! [`State`] is everything the reactor needs to answer requests: the
//! access list, the handler list, the work queue, and the flags the
//! lifecycle controller flips. Its [`handle_request`][State::handle_request]
//! method is the generic callback run for every request read off a
//! connection. Requests that fail admission are answered right there on
//! the reactor thread; everything else becomes a work item.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use bytes::Bytes;
use http_body_util::{BodyExt, Limited, LengthLimitError};
use hyper::StatusCode;
use hyper::body::Incoming;
use log::{debug, log_enabled, trace, warn, Level};
use tokio::sync::oneshot;
use crate::config::Config;
use crate::utils::str::sanitize_uri;
use super::acl::AccessList;
use super::event::EventBase;
use super::queue::WorkQueue;
use super::request::{HttpRequest, RequestMethod, WorkItem};
use super::response::{Body, Response};
use super::router::PathHandlers;

/// The smallest body size the server always accepts.
///
/// Twice the excessive block size is added to this value so RPC keeps
/// working for blocks of any configured size.
const MIN_SUPPORTED_BODY_SIZE: usize = 0x0200_0000;

/// How many characters of a request target end up in the log.
const MAX_LOGGED_URI_LEN: usize = 100;


//------------ State ---------------------------------------------------------

/// The state needed for answering requests.
pub struct State {
    /// The server configuration.
    config: Arc<Config>,

    /// The peers allowed to talk to us.
    acl: AccessList,

    /// The registered path handlers.
    handlers: PathHandlers,

    /// The queue feeding the worker threads.
    queue: Arc<WorkQueue<WorkItem>>,

    /// The reactor’s trigger channel.
    event_base: EventBase,

    /// Set while the server shuts down; makes every request a 503.
    interrupted: AtomicBool,

    /// The process-wide shutdown sentinel.
    ///
    /// The server only reads it to mark replies with `Connection: close`.
    shutdown: Arc<AtomicBool>,

    /// The maximum accepted request body size.
    max_body_size: usize,

    /// How long an idle connection is kept open.
    server_timeout: Duration,
}

impl State {
    /// Creates the state from its parts.
    pub fn new(
        config: Arc<Config>,
        acl: AccessList,
        queue: Arc<WorkQueue<WorkItem>>,
        event_base: EventBase,
    ) -> Self {
        let max_body_size = MIN_SUPPORTED_BODY_SIZE.saturating_add(
            (config.excessive_block_size as usize).saturating_mul(2)
        );
        let server_timeout = config.rpc_server_timeout;
        State {
            config,
            acl,
            handlers: PathHandlers::new(),
            queue,
            event_base,
            interrupted: AtomicBool::new(false),
            shutdown: Arc::new(AtomicBool::new(false)),
            max_body_size,
            server_timeout,
        }
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Returns the handler list.
    pub fn handlers(&self) -> &PathHandlers {
        &self.handlers
    }

    /// Returns the work queue.
    pub fn queue(&self) -> &Arc<WorkQueue<WorkItem>> {
        &self.queue
    }

    /// Returns the reactor’s trigger channel.
    pub fn event_base(&self) -> &EventBase {
        &self.event_base
    }

    /// Returns the process-wide shutdown sentinel.
    pub fn shutdown_flag(&self) -> &Arc<AtomicBool> {
        &self.shutdown
    }

    /// Returns the idle timeout for connections.
    pub fn server_timeout(&self) -> Duration {
        self.server_timeout
    }

    /// Switches the state into rejecting all further requests.
    ///
    /// Worker threads waiting on the queue drain out and exit.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.queue.interrupt();
    }

    /// Handles a single request.
    ///
    /// This runs on the reactor thread. Requests failing admission are
    /// answered immediately; admitted requests go through the work queue
    /// and the returned future resolves once a worker has replied.
    pub async fn handle_request(
        &self,
        request: hyper::Request<Incoming>,
        peer: SocketAddr,
    ) -> hyper::Response<Body> {
        if self.interrupted.load(Ordering::SeqCst) {
            debug!("Rejecting request while shutting down");
            return Response::service_unavailable().into_hyper()
        }

        let (parts, body) = request.into_parts();

        // The handlers get the body in one piece, so collect it here,
        // capped at the configured maximum.
        let body = match Limited::new(
            body, self.max_body_size
        ).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                if err.downcast_ref::<LengthLimitError>().is_some() {
                    debug!(
                        "HTTP request from {} rejected: \
                         request body too large",
                        peer
                    );
                    return Response::payload_too_large().into_hyper()
                }
                debug!(
                    "Error reading HTTP request body from {}: {}", peer, err
                );
                return Response::bad_body().into_hyper()
            }
        };

        let method = RequestMethod::from(&parts.method);
        let uri = parts.uri.to_string();
        let input_headers: Vec<(String, String)> = parts.headers.iter().map(
            |(name, value)| {
                (
                    name.as_str().into(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned()
                )
            }
        ).collect();

        trace_request(peer, method, &uri, &input_headers, &body);

        // Early address-based allow check.
        if !self.acl.contains(peer.ip()) {
            debug!(
                "HTTP request from {} rejected: \
                 Client network is not allowed RPC access",
                peer
            );
            return Response::forbidden().into_hyper()
        }

        // Early reject unknown HTTP methods.
        if method == RequestMethod::Unknown {
            debug!(
                "HTTP request from {} rejected: \
                 Unknown HTTP request method",
                peer
            );
            return Response::bad_method().into_hyper()
        }

        debug!(
            "Received a {} request for {} from {}",
            method, sanitize_uri(&uri, MAX_LOGGED_URI_LEN), peer
        );

        // Find a registered handler for the request target.
        let (handler, path) = match self.handlers.find(&uri) {
            Some(found) => found,
            None => return Response::not_found().into_hyper()
        };

        // The server may have been interrupted while this request was
        // still reading its body. Check again so nothing enters the
        // queue after the workers have been told to drain.
        if self.interrupted.load(Ordering::SeqCst) {
            debug!("Rejecting request while shutting down");
            return Response::service_unavailable().into_hyper()
        }

        // Dispatch to a worker thread.
        let (tx, rx) = oneshot::channel();
        let request = Box::new(HttpRequest::new(
            peer, method, uri, input_headers, body,
            tx, self.event_base.clone(), self.shutdown.clone(),
        ));
        let item = WorkItem::new(
            self.config.clone(), request, path, handler
        );
        if let Err(item) = self.queue.enqueue(item) {
            warn!(
                "request rejected because http work queue depth exceeded, \
                 it can be increased with the -rpcworkqueue= setting"
            );
            item.into_request().write_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Work queue depth exceeded"
            );
        }

        // The reply arrives through the trigger the request fires, either
        // from the handler or from the safety net in its drop handler.
        match rx.await {
            Ok(response) => response,
            Err(_) => {
                debug!("HTTP request disappeared without a reply");
                Response::internal_error("Unhandled request").into_hyper()
            }
        }
    }
}

/// Logs the full request when tracing is enabled.
///
/// Note that unlike with the regular log lines nothing coming from the
/// peer is sanitized here. This is a debugging surface not intended for
/// general use.
fn trace_request(
    peer: SocketAddr,
    method: RequestMethod,
    uri: &str,
    headers: &[(String, String)],
    body: &Bytes,
) {
    if !log_enabled!(target: "httptrace", Level::Trace) {
        return
    }
    let header_lines = headers.iter().map(|(name, value)| {
        format!("{name}: {value}\n")
    }).collect::<String>();
    trace!(
        target: "httptrace",
        "Request from {}, method: \"{}\", URI: \"{}\", headers: {}, \
         content: {} bytes\n\
         --- HEADERS ---\n{}--- CONTENT ---\n{}",
        peer, method, uri, headers.len(), body.len(),
        header_lines, String::from_utf8_lossy(body)
    );
}
