//! The HTTP listener and reactor thread.
//!
//! All socket I/O of the server happens on one dedicated thread, the
//! reactor. It owns a single-threaded async runtime driving the accept
//! loops, one task per connection, and the event pump that executes
//! triggers posted from other threads. Binding itself is done early and
//! synchronously by [`bind_addresses`] so that startup can fail cleanly
//! before any thread exists.

use std::io;
use std::cell::RefCell;
use std::convert::Infallible;
use std::future::Future;
use std::net::{SocketAddr, TcpListener as StdListener};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use log::{debug, error, warn};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime;
use tokio::sync::{mpsc, watch};
use tokio::task::{self, JoinHandle};
use tokio::time::{Instant, Sleep};
use crate::config::Config;
use crate::utils::net;
use super::dispatch::State;
use super::event::Event;

/// Maximum size of an HTTP request line plus headers.
const MAX_HEADERS_SIZE: usize = 8192;


//------------ bind_addresses ------------------------------------------------

/// Binds the listener sockets the configuration asks for.
///
/// Without both an allow list and an explicit bind list, only the loopback
/// endpoints are bound. Binding is best effort: endpoints that fail are
/// logged and skipped, so the result may be empty.
pub fn bind_addresses(config: &Config) -> Vec<StdListener> {
    let http_port = config.rpc_port;
    let mut endpoints = Vec::new();

    // Determine what addresses to bind to.
    if config.rpc_allow_ip.is_empty() || config.rpc_bind.is_empty() {
        // Default to loopback if not allowing external IPs.
        endpoints.push(("::1".to_string(), http_port));
        endpoints.push(("127.0.0.1".to_string(), http_port));
        if !config.rpc_allow_ip.is_empty() {
            warn!(
                "option -rpcallowip was specified without -rpcbind; \
                 this doesn't usually make sense"
            );
        }
        if !config.rpc_bind.is_empty() {
            warn!(
                "option -rpcbind was ignored because -rpcallowip was not \
                 specified, refusing to allow everyone to connect"
            );
        }
    }
    else {
        // Specific bind addresses.
        for bind in &config.rpc_bind {
            match net::split_host_port(bind, http_port) {
                Ok(endpoint) => endpoints.push(endpoint),
                Err(_) => {
                    error!("Invalid -rpcbind endpoint: {}", bind);
                }
            }
        }
    }

    // Bind addresses.
    let mut listeners = Vec::new();
    for (host, port) in endpoints {
        debug!("Binding HTTP on address {} port {}", host, port);
        let bound = net::resolve(&host, port).and_then(|addr| {
            net::bind(&addr)
        });
        match bound {
            Ok(listener) => listeners.push(listener),
            Err(err) => {
                error!(
                    "Binding HTTP on address {} port {} failed: {}",
                    host, port, err
                );
            }
        }
    }
    listeners
}


//------------ run -----------------------------------------------------------

/// The reactor thread function.
///
/// Runs until the shutdown channel fires and all connections have
/// drained. Triggers already posted when the shutdown arrives are still
/// executed so pending replies reach their connections.
pub fn run(
    state: Arc<State>,
    listeners: Vec<StdListener>,
    events: mpsc::UnboundedReceiver<Event>,
    shutdown: watch::Receiver<bool>,
) {
    debug!("Entering http event loop");
    let runtime = match runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("Failed to create the HTTP reactor runtime: {}", err);
            return
        }
    };
    let tasks = task::LocalSet::new();
    tasks.block_on(&runtime, reactor(state, listeners, events, shutdown));
    debug!("Exited http event loop");
}

/// The top-level future of the reactor.
async fn reactor(
    state: Arc<State>,
    listeners: Vec<StdListener>,
    mut events: mpsc::UnboundedReceiver<Event>,
    shutdown: watch::Receiver<bool>,
) {
    let connections = Rc::new(RefCell::new(Vec::new()));
    let mut accepting = Vec::new();
    for listener in listeners {
        let listener = match TcpListener::from_std(listener) {
            Ok(listener) => listener,
            Err(err) => {
                error!("Failed to prepare HTTP listener: {}", err);
                continue
            }
        };
        accepting.push(task::spawn_local(accept_loop(
            listener, state.clone(), shutdown.clone(), connections.clone()
        )));
    }

    // The event pump. Everything posted through the event base runs here,
    // on the reactor thread.
    let stop = wait_shutdown(shutdown.clone());
    tokio::pin!(stop);
    loop {
        tokio::select! {
            _ = &mut stop => break,
            event = events.recv() => {
                match event {
                    Some(event) => run_event(event),
                    None => break
                }
            }
        }
    }

    // Deliver the triggers that are already queued; pending replies are
    // among them.
    while let Ok(event) = events.try_recv() {
        run_event(event)
    }

    // Let the accept loops end and the open connections drain.
    for handle in accepting {
        let _ = handle.await;
    }
    let connections = connections.take();
    for handle in connections {
        let _ = handle.await;
    }
}

/// Resolves once the shutdown channel has fired.
///
/// Unlike waiting on the channel directly, this also notices a signal
/// sent before the call.
async fn wait_shutdown(mut shutdown: watch::Receiver<bool>) {
    if *shutdown.borrow_and_update() {
        return
    }
    let _ = shutdown.changed().await;
}

/// Executes a single trigger.
fn run_event(event: Event) {
    match event {
        Event::Now(handler) => handler(),
        Event::After(delay, handler) => {
            task::spawn_local(async move {
                tokio::time::sleep(delay).await;
                handler()
            });
        }
    }
}

/// Accepts connections on a single listener until shutdown.
async fn accept_loop(
    listener: TcpListener,
    state: Arc<State>,
    shutdown: watch::Receiver<bool>,
    connections: Rc<RefCell<Vec<JoinHandle<()>>>>,
) {
    let stop = wait_shutdown(shutdown.clone());
    tokio::pin!(stop);
    loop {
        tokio::select! {
            _ = &mut stop => break,
            res = listener.accept() => {
                match res {
                    Ok((stream, peer)) => {
                        let mut connections = connections.borrow_mut();
                        connections.retain(|handle| !handle.is_finished());
                        connections.push(task::spawn_local(
                            serve_connection(
                                stream, peer,
                                state.clone(), shutdown.clone()
                            )
                        ));
                    }
                    Err(err) => {
                        debug!("HTTP accept error: {}", err);
                    }
                }
            }
        }
    }
}

/// Serves a single connection.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<State>,
    shutdown: watch::Receiver<bool>,
) {
    let stream = IdleStream::new(stream, state.server_timeout());
    let service = service_fn(move |request| {
        let state = state.clone();
        async move {
            Ok::<_, Infallible>(state.handle_request(request, peer).await)
        }
    });
    let conn = http1::Builder::new()
        .max_buf_size(MAX_HEADERS_SIZE)
        .serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);
    tokio::select! {
        res = conn.as_mut() => {
            if let Err(err) = res {
                debug!("HTTP connection from {}: {}", peer, err);
            }
        }
        _ = wait_shutdown(shutdown) => {
            // Finish the in-flight exchange, then close.
            conn.as_mut().graceful_shutdown();
            if let Err(err) = conn.as_mut().await {
                debug!("HTTP connection from {}: {}", peer, err);
            }
        }
    }
}


//------------ IdleStream ----------------------------------------------------

/// A TCP stream that gives up after a period of inactivity.
///
/// Every completed read or write pushes the deadline out by the configured
/// timeout. Once the deadline passes while the stream has nothing to do,
/// reads and writes fail with `TimedOut` and hyper drops the connection.
/// This covers the whole exchange the way the connection timeout of the
/// original event library did: request line, headers, body, and idle time
/// between keep-alive requests.
struct IdleStream {
    /// The wrapped stream.
    stream: TcpStream,

    /// How long the stream may sit idle.
    timeout: Duration,

    /// Fires once the stream has been idle for too long.
    timer: Pin<Box<Sleep>>,
}

impl IdleStream {
    fn new(stream: TcpStream, timeout: Duration) -> Self {
        IdleStream {
            stream,
            timeout,
            timer: Box::pin(tokio::time::sleep(timeout)),
        }
    }

    /// Restarts the idle timer after activity on the stream.
    fn touch(&mut self) {
        let deadline = Instant::now() + self.timeout;
        self.timer.as_mut().reset(deadline);
    }

    /// Returns whether the idle deadline has passed.
    ///
    /// Polling also registers the waker, so the task wakes up and fails
    /// the pending I/O once the deadline hits.
    fn expired(&mut self, cx: &mut Context) -> bool {
        self.timer.as_mut().poll(cx).is_ready()
    }
}

impl AsyncRead for IdleStream {
    fn poll_read(
        self: Pin<&mut Self>, cx: &mut Context, buf: &mut ReadBuf
    ) -> Poll<Result<(), io::Error>> {
        let this = self.get_mut();
        match Pin::new(&mut this.stream).poll_read(cx, buf) {
            Poll::Pending => {
                if this.expired(cx) {
                    Poll::Ready(Err(idle_timeout()))
                }
                else {
                    Poll::Pending
                }
            }
            res => {
                this.touch();
                res
            }
        }
    }
}

impl AsyncWrite for IdleStream {
    fn poll_write(
        self: Pin<&mut Self>, cx: &mut Context, buf: &[u8]
    ) -> Poll<Result<usize, io::Error>> {
        let this = self.get_mut();
        match Pin::new(&mut this.stream).poll_write(cx, buf) {
            Poll::Pending => {
                if this.expired(cx) {
                    Poll::Ready(Err(idle_timeout()))
                }
                else {
                    Poll::Pending
                }
            }
            res => {
                this.touch();
                res
            }
        }
    }

    fn poll_flush(
        self: Pin<&mut Self>, cx: &mut Context
    ) -> Poll<Result<(), io::Error>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(
        self: Pin<&mut Self>, cx: &mut Context
    ) -> Poll<Result<(), io::Error>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

/// The error failing I/O on an idle connection.
fn idle_timeout() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "inactivity timeout")
}


//============ Tests =========================================================
