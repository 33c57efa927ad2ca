//! The fatal-error plane: a topology-wide sink for unrecoverable node
//! failures, fed by static and dynamic executors alike (spec.md §4.5).
//!
//! Grounded in `original_source/core/default_static_topology.go`'s
//! `AddFatalListener`/`notifyFatalListeners`: listeners are invoked
//! serially, one at a time, under the same lock used to register them,
//! so a listener can never observe two reports interleaved and a slow
//! listener backpressures the reporter rather than racing the next one.

use std::sync::Mutex;

/// A report delivered to every registered listener exactly once, in the
/// order it was raised.
#[derive(Debug, Clone)]
pub struct FatalReport {
    pub node_name: String,
    pub message: String,
}

type Listener = Box<dyn Fn(&FatalReport) + Send + Sync>;

/// Owned by a topology. `report` is called from whichever task first
/// observes a node's fatal error; `add_listener` is typically called
/// once at topology-construction time but is safe to call at any point.
pub struct FatalPlane {
    listeners: Mutex<Vec<Listener>>,
}

impl Default for FatalPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl FatalPlane {
    pub fn new() -> Self {
        FatalPlane {
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&FatalReport) + Send + Sync + 'static,
    {
        self.listeners.lock().unwrap().push(Box::new(listener));
    }

    /// Invokes every registered listener with `report`, one at a time,
    /// while holding the registration lock — matching
    /// `notifyFatalListeners`'s serialization guarantee exactly.
    pub fn report(&self, report: FatalReport) {
        let listeners = self.listeners.lock().unwrap();
        for listener in listeners.iter() {
            listener(&report);
        }
    }
}
