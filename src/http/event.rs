//! Cross-thread triggers delivered on the reactor thread.
//!
//! The connection state of the underlying HTTP machinery may only be
//! touched from the reactor thread. Worker threads therefore never write
//! replies themselves; they post a closure through an [`EventBase`] and the
//! reactor executes it in its event loop. The same mechanism is available
//! to external modules that need to run something on the reactor thread,
//! optionally after a delay.

use std::time::Duration;
use log::debug;
use std::sync::Arc;
use tokio::sync::mpsc;


//------------ Event ---------------------------------------------------------

/// A closure on its way to the reactor thread.
pub enum Event {
    /// Run the closure as soon as possible.
    Now(Box<dyn FnOnce() + Send>),

    /// Run the closure after the given delay has passed.
    After(Duration, Box<dyn FnOnce() + Send>),
}


//------------ EventBase -----------------------------------------------------

/// A handle for posting closures to the reactor thread.
///
/// The handle can be cloned freely and used from any thread. Closures
/// posted through it run on the reactor thread in posting order; delayed
/// closures run once their delay has passed. Posting is only meaningful
/// while the reactor is alive: afterwards, closures are silently dropped.
#[derive(Clone)]
pub struct EventBase {
    /// The sending end of the reactor’s event channel.
    tx: mpsc::UnboundedSender<Event>,
}

impl EventBase {
    /// Creates an event base and the receiving end for the reactor.
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventBase { tx }, rx)
    }

    /// Schedules a closure to run on the reactor thread right away.
    pub fn trigger<F: FnOnce() + Send + 'static>(&self, handler: F) {
        self.send(Event::Now(Box::new(handler)))
    }

    /// Schedules a closure to run on the reactor thread after a delay.
    pub fn trigger_after<F: FnOnce() + Send + 'static>(
        &self, delay: Duration, handler: F
    ) {
        self.send(Event::After(delay, Box::new(handler)))
    }

    /// Sends an event, dropping it if the reactor is gone.
    fn send(&self, event: Event) {
        if self.tx.send(event).is_err() {
            debug!("Dropping trigger: the HTTP reactor has terminated");
        }
    }
}


//------------ HttpEvent -----------------------------------------------------

/// A reusable trigger owned by its creator.
///
/// Unlike the one-shot closures posted through [`EventBase::trigger`], an
/// `HttpEvent` keeps its handler and can be fired any number of times.
pub struct HttpEvent {
    /// The event base used for delivery.
    base: EventBase,

    /// The handler to run on the reactor thread.
    handler: Arc<dyn Fn() + Send + Sync>,
}

impl HttpEvent {
    /// Creates a new event with the given handler.
    pub fn new(
        base: EventBase,
        handler: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        HttpEvent { base, handler: Arc::new(handler) }
    }

    /// Fires the event.
    ///
    /// Without a delay the handler runs on the reactor thread as soon as
    /// possible, otherwise after the delay has passed.
    pub fn trigger(&self, delay: Option<Duration>) {
        let handler = self.handler.clone();
        match delay {
            None => self.base.trigger(move || handler()),
            Some(delay) => {
                self.base.trigger_after(delay, move || handler())
            }
        }
    }
}
