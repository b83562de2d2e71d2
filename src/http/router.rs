//! Dispatching requests to path handlers.
//!
//! Handler modules register themselves for a URI prefix, either matching
//! exactly or as a leading substring. Lookup walks the list in registration
//! order and the first match wins, so more specific prefixes need to be
//! registered first.
//!
//! Registration happens during single-threaded startup and removal during
//! single-threaded teardown, but since nothing enforces that on callers,
//! the list sits behind a read-write lock that is uncontended in steady
//! state.

use std::sync::Arc;
use log::debug;
use crate::config::Config;
use crate::utils::sync::RwLock;
use super::request::HttpRequest;


//------------ Handler -------------------------------------------------------

/// A callback serving all requests below one path prefix.
///
/// The handler receives the configuration, the request, and the part of
/// the request target remaining after the registered prefix. It runs on a
/// worker thread and must reply to the request exactly once.
pub type Handler = Arc<
    dyn Fn(&Config, &mut HttpRequest, &str) + Send + Sync
>;


//------------ PathHandlers --------------------------------------------------

/// The ordered list of registered path handlers.
#[derive(Default)]
pub struct PathHandlers {
    /// The handlers in registration order.
    handlers: RwLock<Vec<PathHandler>>,
}

/// A single registered handler.
struct PathHandler {
    /// The URI prefix the handler serves.
    prefix: String,

    /// If true, the request target has to equal the prefix exactly.
    exact: bool,

    /// The handler itself.
    handler: Handler,
}

impl PathHandlers {
    /// Creates an empty handler list.
    pub fn new() -> Self {
        Default::default()
    }

    /// Appends a handler for the given prefix.
    pub fn register(&self, prefix: &str, exact: bool, handler: Handler) {
        debug!(
            "Registering HTTP handler for {} (exactmatch {})", prefix, exact
        );
        self.handlers.write().push(PathHandler {
            prefix: prefix.into(),
            exact,
            handler,
        })
    }

    /// Removes the first handler registered for the given prefix.
    ///
    /// Does nothing if there is no such handler.
    pub fn unregister(&self, prefix: &str, exact: bool) {
        let mut handlers = self.handlers.write();
        if let Some(pos) = handlers.iter().position(|item| {
            item.prefix == prefix && item.exact == exact
        }) {
            debug!(
                "Unregistering HTTP handler for {} (exactmatch {})",
                prefix, exact
            );
            handlers.remove(pos);
        }
    }

    /// Looks up the handler for a request target.
    ///
    /// Returns the first matching handler in registration order together
    /// with the path remaining after its prefix, or `None` if no handler
    /// matches.
    pub fn find(&self, uri: &str) -> Option<(Handler, String)> {
        for item in self.handlers.read().iter() {
            let matched = if item.exact {
                uri == item.prefix
            }
            else {
                uri.starts_with(&item.prefix)
            };
            if matched {
                return Some((
                    item.handler.clone(),
                    uri[item.prefix.len()..].into()
                ))
            }
        }
        None
    }
}


//============ Tests =========================================================
