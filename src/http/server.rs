//! The HTTP server lifecycle.
//!
//! [`HttpServer`] owns everything the server consists of: the access list,
//! the handler list, the work queue, the bound sockets, and the threads.
//! Its life runs through four phases. [`init`][HttpServer::init] builds
//! the state and binds the sockets but starts no threads, so handlers can
//! still be registered. [`start`][HttpServer::start] launches the reactor
//! and the worker pool. [`interrupt`][HttpServer::interrupt] turns every
//! new request into a 503 and drains the workers, and
//! [`stop`][HttpServer::stop] takes the whole thing apart again, waiting
//! for in-flight requests on the way out.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;
use log::{debug, error, info};
use tokio::sync::{mpsc, watch};
use crate::config::Config;
use crate::error::Failed;
use super::acl::AccessList;
use super::dispatch::State;
use super::event::{Event, EventBase};
use super::listener;
use super::queue::WorkQueue;
use super::router::Handler;


//------------ HttpServer ----------------------------------------------------

/// The embedded HTTP server.
pub struct HttpServer {
    /// The state shared with the reactor and the workers.
    state: Arc<State>,

    /// The bound sockets, waiting to be handed to the reactor.
    listeners: Option<Vec<std::net::TcpListener>>,

    /// The addresses the sockets ended up bound to.
    local_addrs: Vec<SocketAddr>,

    /// The receiving end of the trigger channel, waiting likewise.
    events: Option<mpsc::UnboundedReceiver<Event>>,

    /// Tells the reactor to wind down.
    shutdown_tx: watch::Sender<bool>,

    /// The template for per-task shutdown receivers.
    shutdown_rx: watch::Receiver<bool>,

    /// The reactor thread, once started.
    reactor: Option<thread::JoinHandle<()>>,

    /// The worker threads, once started.
    workers: Vec<thread::JoinHandle<()>>,
}

impl HttpServer {
    /// Initializes the server.
    ///
    /// Builds the access list, binds the listener sockets, and creates the
    /// work queue. No threads are running yet afterwards; registering
    /// handlers and then calling [`start`][Self::start] completes the
    /// startup. On error everything already acquired is released again and
    /// the diagnostics have been logged.
    pub fn init(config: Arc<Config>) -> Result<Self, Failed> {
        let acl = AccessList::from_config(&config)?;
        let listeners = listener::bind_addresses(&config);
        if listeners.is_empty() {
            error!("Unable to bind any endpoint for HTTP server");
            return Err(Failed)
        }
        let local_addrs = listeners.iter().filter_map(|listener| {
            listener.local_addr().ok()
        }).collect();

        let depth = config.rpc_work_queue.max(1);
        info!("HTTP: creating work queue of depth {}", depth);
        let queue = Arc::new(WorkQueue::new(depth));

        let (event_base, events) = EventBase::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(State::new(config, acl, queue, event_base));

        debug!("Initialized HTTP server");
        Ok(HttpServer {
            state,
            listeners: Some(listeners),
            local_addrs,
            events: Some(events),
            shutdown_tx,
            shutdown_rx,
            reactor: None,
            workers: Vec::new(),
        })
    }

    /// Registers a handler for a path prefix.
    ///
    /// If `exact` is true, only a request target equal to `prefix` is
    /// dispatched to the handler, otherwise every target starting with it.
    /// Handlers have to be registered before the server starts.
    pub fn register_handler(
        &self, prefix: &str, exact: bool, handler: Handler
    ) {
        self.state.handlers().register(prefix, exact, handler)
    }

    /// Removes the handler registered for the given prefix.
    ///
    /// Handlers may only be removed once the server no longer dispatches,
    /// i.e., after [`interrupt`][Self::interrupt].
    pub fn unregister_handler(&self, prefix: &str, exact: bool) {
        self.state.handlers().unregister(prefix, exact)
    }

    /// Starts the server threads.
    ///
    /// Launches the reactor thread and the configured number of worker
    /// threads. Must be called exactly once.
    pub fn start(&mut self) {
        debug!("Starting HTTP server");
        let threads = self.state.config().rpc_threads.max(1);
        info!("HTTP: starting {} worker threads", threads);

        let listeners = self.listeners.take().expect(
            "HTTP server started twice"
        );
        let events = self.events.take().expect("HTTP server started twice");
        let state = self.state.clone();
        let shutdown = self.shutdown_rx.clone();
        self.reactor = Some(
            thread::Builder::new().name("http".into()).spawn(move || {
                listener::run(state, listeners, events, shutdown)
            }).expect("failed to spawn the HTTP reactor thread")
        );

        for i in 0..threads {
            let queue = self.state.queue().clone();
            self.workers.push(
                thread::Builder::new().name(
                    format!("httpworker.{}", i)
                ).spawn(move || {
                    queue.run()
                }).expect("failed to spawn an HTTP worker thread")
            );
        }
    }

    /// Interrupts the server.
    ///
    /// Every request from here on is answered with a 503 and no new work
    /// items enter the queue. Requests already executing on a worker
    /// thread are not affected; [`stop`][Self::stop] waits for them.
    pub fn interrupt(&self) {
        debug!("Interrupting HTTP server");
        self.state.interrupt();
    }

    /// Stops the server, consuming it.
    ///
    /// Joins the worker threads, answers whatever is still pending in the
    /// queue with the safety-net 500, closes the listeners, and waits for
    /// the reactor to drain its connections. Can also be called on a
    /// server that was never started.
    pub fn stop(mut self) {
        debug!("Stopping HTTP server");
        // Make sure the workers wake up even if interrupt was skipped.
        self.state.interrupt();

        if !self.workers.is_empty() {
            debug!("Waiting for HTTP worker threads to exit");
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("HTTP worker thread panicked");
            }
        }

        // Pending items reply with their synthetic 500 as they are
        // dropped; the reactor is still alive to deliver those.
        self.state.queue().clear();

        // Closing the channel stops the accept loops and lets open
        // connections drain.
        let _ = self.shutdown_tx.send(true);
        if let Some(reactor) = self.reactor.take() {
            debug!("Waiting for HTTP event thread to exit");
            if reactor.join().is_err() {
                error!("HTTP reactor thread panicked");
            }
        }
        debug!("Stopped HTTP server");
    }

    /// Returns a handle for scheduling triggers on the reactor thread.
    pub fn event_base(&self) -> EventBase {
        self.state.event_base().clone()
    }

    /// Returns the process-wide shutdown sentinel.
    ///
    /// Once the flag is set, replies carry a `Connection: close` header.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.state.shutdown_flag().clone()
    }

    /// Returns the addresses the server is listening on.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }
}
