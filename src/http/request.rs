//! The HTTP request object handed to path handlers.
//!
//! A [`HttpRequest`] wraps one in-flight exchange. It is created on the
//! reactor thread once a request has been read completely, travels through
//! the work queue to a worker thread, and is consumed by the handler
//! calling [`write_reply`][HttpRequest::write_reply]. The reply is not
//! written to the socket by the worker: the request posts it back to the
//! reactor thread through a one-shot trigger and the connection there picks
//! it up.
//!
//! A request that is dropped without a reply answers itself with a
//! synthetic 500 so the connection never hangs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::fmt;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Method, StatusCode};
use log::{debug, log_enabled, trace, warn, Level};
use tokio::sync::oneshot;
use crate::config::Config;
use crate::utils::str::append_hex;
use super::event::EventBase;
use super::queue::Work;
use super::response::Body;
use super::router::Handler;


//------------ RequestMethod -------------------------------------------------

/// The method of an HTTP request.
///
/// Only the methods the server actually dispatches get their own variant.
/// Everything else ends up as `Unknown` and is rejected before routing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestMethod {
    Get,
    Post,
    Head,
    Put,
    Options,
    Unknown,
}

impl From<&Method> for RequestMethod {
    fn from(method: &Method) -> Self {
        match *method {
            Method::GET => RequestMethod::Get,
            Method::POST => RequestMethod::Post,
            Method::HEAD => RequestMethod::Head,
            Method::PUT => RequestMethod::Put,
            Method::OPTIONS => RequestMethod::Options,
            _ => RequestMethod::Unknown,
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            RequestMethod::Get => "GET",
            RequestMethod::Post => "POST",
            RequestMethod::Head => "HEAD",
            RequestMethod::Put => "PUT",
            RequestMethod::Options => "OPTIONS",
            RequestMethod::Unknown => "unknown",
        })
    }
}


//------------ HttpRequest ---------------------------------------------------

/// A single in-flight HTTP exchange.
pub struct HttpRequest {
    /// The address of the peer that sent the request.
    peer: SocketAddr,

    /// The request method.
    method: RequestMethod,

    /// The raw request target.
    uri: String,

    /// The request headers in wire order.
    input_headers: Vec<(String, String)>,

    /// The complete request body.
    body: Bytes,

    /// Headers to be included in the reply, in the order they were added.
    output_headers: Vec<(String, String)>,

    /// The way back to the connection. Taken by the reply.
    handle: Option<ReplyHandle>,

    /// Whether a reply has been written.
    reply_sent: bool,

    /// The process-wide shutdown sentinel.
    shutdown: Arc<AtomicBool>,
}

/// The connection side of a request.
struct ReplyHandle {
    /// Completes the connection’s wait for the response.
    tx: oneshot::Sender<hyper::Response<Body>>,

    /// Used to move the actual send onto the reactor thread.
    base: EventBase,
}

impl HttpRequest {
    /// Creates a new request.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        peer: SocketAddr,
        method: RequestMethod,
        uri: String,
        input_headers: Vec<(String, String)>,
        body: Bytes,
        tx: oneshot::Sender<hyper::Response<Body>>,
        base: EventBase,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        HttpRequest {
            peer, method, uri, input_headers, body,
            output_headers: Vec::new(),
            handle: Some(ReplyHandle { tx, base }),
            reply_sent: false,
            shutdown,
        }
    }

    /// Returns the address of the peer that sent the request.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Returns the request method.
    pub fn method(&self) -> RequestMethod {
        self.method
    }

    /// Returns the raw request target.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Returns the value of the first request header with the given name.
    ///
    /// Header names compare case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.input_headers.iter().find(|(key, _)| {
            key.eq_ignore_ascii_case(name)
        }).map(|(_, value)| value.as_str())
    }

    /// Returns all request headers in wire order.
    pub fn all_input_headers(&self) -> &[(String, String)] {
        &self.input_headers
    }

    /// Returns all headers added to the reply so far, in order.
    pub fn all_output_headers(&self) -> &[(String, String)] {
        &self.output_headers
    }

    /// Returns the request body.
    ///
    /// If `drain` is true, the stored body is emptied and subsequent reads
    /// return nothing.
    pub fn read_body(&mut self, drain: bool) -> Bytes {
        if drain {
            std::mem::take(&mut self.body)
        }
        else {
            self.body.clone()
        }
    }

    /// Adds a header to the reply.
    ///
    /// All headers have to be added before the reply itself is written.
    pub fn write_header(
        &mut self, name: impl Into<String>, value: impl Into<String>
    ) {
        assert!(!self.reply_sent, "header written after HTTP reply");
        self.output_headers.push((name.into(), value.into()));
    }

    /// Writes the reply, consuming the request’s connection handle.
    ///
    /// The body is assembled on the calling thread; sending it is
    /// scheduled onto the reactor thread, which owns the connection. The
    /// request must not be used in any way afterwards.
    ///
    /// # Panics
    ///
    /// The method panics if a reply has already been written.
    pub fn write_reply(
        &mut self, status: StatusCode, body: impl Into<Bytes>
    ) {
        assert!(!self.reply_sent, "double reply on HTTP request");
        let handle = self.handle.take().expect(
            "HTTP request without a connection"
        );
        if self.shutdown.load(Ordering::SeqCst) {
            self.output_headers.push(("Connection".into(), "close".into()));
        }
        let body = body.into();
        self.trace_reply(status, &body);

        // Anything from here on may panic, so mark the reply as sent
        // first: the drop handler must not try a second one.
        self.reply_sent = true;
        let mut builder = hyper::Response::builder().status(status);
        for (name, value) in &self.output_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder.body(
            Full::new(body)
        ).expect("broken HTTP response builder");

        // Hand the send over to the reactor thread.
        let ReplyHandle { tx, base } = handle;
        base.trigger(move || {
            if tx.send(response).is_err() {
                debug!("HTTP reply dropped: the connection is gone");
            }
        });
    }

    /// Logs the reply when tracing is enabled.
    fn trace_reply(&self, status: StatusCode, body: &Bytes) {
        if !log_enabled!(target: "httptrace", Level::Trace) {
            return
        }
        let is_binary = self.output_headers.iter().any(|(name, value)| {
            name.eq_ignore_ascii_case("Content-Type")
                && value == "application/octet-stream"
        });
        let headers = self.output_headers.iter().map(|(name, value)| {
            format!("{name}: {value}\n")
        }).collect::<String>();
        let (content_desc, content) = if is_binary {
            let mut hex = String::new();
            append_hex(body, &mut hex);
            (" (binary data, hex encoded)", hex)
        }
        else {
            ("", String::from_utf8_lossy(body).into_owned())
        };
        trace!(
            target: "httptrace",
            "Writing reply to {}, status: {}, headers: {}, \
             content: {} bytes\n\
             --- HEADERS ---\n{}--- CONTENT{} ---\n{}",
            self.peer, status.as_u16(), self.output_headers.len(),
            body.len(), headers, content_desc, content
        );
    }
}


//--- Drop

impl Drop for HttpRequest {
    fn drop(&mut self) {
        // Keep track of whether a reply was sent to avoid request leaks.
        if !self.reply_sent && self.handle.is_some() {
            warn!("Unhandled HTTP request from {}", self.peer);
            self.write_reply(
                StatusCode::INTERNAL_SERVER_ERROR, "Unhandled request"
            );
        }
    }
}


//------------ WorkItem ------------------------------------------------------

/// A request on its way to a worker thread.
///
/// The item owns the request, the handler the router resolved for it, and
/// the path remaining after the handler’s prefix.
pub struct WorkItem {
    /// The server configuration handed to the handler.
    config: Arc<Config>,

    /// The request itself.
    request: Box<HttpRequest>,

    /// The request target with the handler’s prefix removed.
    path: String,

    /// The resolved handler.
    handler: Handler,
}

impl WorkItem {
    /// Creates a new work item.
    pub fn new(
        config: Arc<Config>,
        request: Box<HttpRequest>,
        path: String,
        handler: Handler,
    ) -> Self {
        WorkItem { config, request, path, handler }
    }

    /// Takes the request back out of the item.
    ///
    /// Used when the item could not be queued and has to be answered
    /// directly.
    pub fn into_request(self) -> Box<HttpRequest> {
        self.request
    }
}

impl Work for WorkItem {
    fn run(mut self) {
        (self.handler)(&self.config, &mut self.request, &self.path)
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use super::super::event::Event;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn request(
        shutdown: bool
    ) -> (
        HttpRequest,
        oneshot::Receiver<hyper::Response<Body>>,
        UnboundedReceiver<Event>,
    ) {
        let (base, events) = EventBase::new();
        let (tx, rx) = oneshot::channel();
        let req = HttpRequest::new(
            ([127, 0, 0, 1], 4000).into(),
            RequestMethod::Get,
            "/test".into(),
            vec![("Content-Type".into(), "text/plain".into())],
            Bytes::from_static(b"hello"),
            tx,
            base,
            Arc::new(AtomicBool::new(shutdown)),
        );
        (req, rx, events)
    }

    /// Runs all immediate events, delivering pending replies.
    fn pump(events: &mut UnboundedReceiver<Event>) {
        while let Ok(event) = events.try_recv() {
            match event {
                Event::Now(f) => f(),
                Event::After(..) => panic!("unexpected timed event"),
            }
        }
    }

    #[test]
    fn header_lookup() {
        let (req, _rx, _events) = request(false);
        assert_eq!(req.header("content-type").unwrap(), "text/plain");
        assert_eq!(req.header("CONTENT-TYPE").unwrap(), "text/plain");
        assert!(req.header("x-missing").is_none());
    }

    #[test]
    fn body_draining() {
        let (mut req, _rx, _events) = request(false);
        assert_eq!(req.read_body(false), "hello");
        assert_eq!(req.read_body(true), "hello");
        assert!(req.read_body(false).is_empty());
    }

    #[test]
    fn reply_reaches_connection() {
        let (mut req, mut rx, mut events) = request(false);
        req.write_header("X-Test", "1");
        req.write_reply(StatusCode::OK, "fine");

        // Nothing arrives before the reactor runs the trigger.
        assert!(rx.try_recv().is_err());
        pump(&mut events);
        let response = rx.try_recv().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("X-Test").unwrap(), "1");
    }

    #[test]
    #[should_panic(expected = "double reply")]
    fn double_reply_is_fatal() {
        let (mut req, _rx, _events) = request(false);
        req.write_reply(StatusCode::OK, "");
        req.write_reply(StatusCode::OK, "");
    }

    #[test]
    fn drop_without_reply_sends_500() {
        let (req, mut rx, mut events) = request(false);
        drop(req);
        pump(&mut events);
        let response = rx.try_recv().unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn drop_after_reply_stays_quiet() {
        let (mut req, mut rx, mut events) = request(false);
        req.write_reply(StatusCode::OK, "done");
        drop(req);
        pump(&mut events);
        let response = rx.try_recv().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn shutdown_appends_connection_close() {
        let (mut req, mut rx, mut events) = request(true);
        req.write_reply(StatusCode::OK, "");
        pump(&mut events);
        let response = rx.try_recv().unwrap();
        assert_eq!(response.headers().get("Connection").unwrap(), "close");
    }
}
