//! Node kinds and their public contracts (spec.md §6, "Node public API").
//!
//! Three small async traits — one per kind — rather than one fat trait
//! with optional methods, following the same shape as the teacher's
//! `Command` dispatch in `cmd/mod.rs`: each concrete node implements
//! exactly the one trait matching its role, and the executors (static,
//! dynamic) are generic over whichever of the three they're driving.

use async_trait::async_trait;

use crate::error::EngineError;
use crate::lifecycle::NodeState;
use crate::status::StatusMap;
use crate::tuple::{Tuple, Writer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Source,
    Box,
    Sink,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Source => "source",
            NodeKind::Box => "box",
            NodeKind::Sink => "sink",
        }
    }
}

/// A producer with no upstream inputs. Runs once per topology lifetime;
/// `generate_stream` owns the task until it returns (normally, by error,
/// or by panic) or `stop` is called from outside.
#[async_trait]
pub trait Source<T>: Send + Sync {
    fn name(&self) -> &str;

    /// Pushes tuples into `writer` until the source is exhausted or
    /// asked to stop. A `Fatal` return (or panic, converted to one)
    /// closes the source's outbound edge and is reported to the fatal
    /// plane (spec.md §4.5 step 3).
    async fn generate_stream(&self, writer: &mut (dyn Writer<T> + Send)) -> std::result::Result<(), EngineError>;

    /// Requests that `generate_stream` return. Sources that can't react
    /// promptly may still be draining when this returns; the executor
    /// only waits on the worker, not on this call.
    async fn stop(&self) -> std::result::Result<(), EngineError>;
}

/// A stateful transform with one input and (typically) one output.
/// `init` runs once, in declaration order, before the topology starts
/// (spec.md §4.5 step 1); `process` runs once per inbound tuple.
#[async_trait]
pub trait StatefulBox<T>: Send + Sync {
    fn name(&self) -> &str;

    async fn init(&self) -> std::result::Result<(), EngineError> {
        Ok(())
    }

    async fn process(
        &self,
        tuple: Tuple<T>,
        writer: &mut (dyn Writer<T> + Send),
    ) -> std::result::Result<(), EngineError>;

    /// Best-effort cleanup, called on rollback after a later box's
    /// `init` fails, and on normal topology teardown. Panics are
    /// swallowed and logged by the caller (spec.md §4.5 step 1).
    async fn terminate(&self) {}
}

/// A terminal consumer. `write` runs once per inbound tuple; `close`
/// runs exactly once, after the node's input aggregator has drained.
#[async_trait]
pub trait Sink<T>: Send + Sync {
    fn name(&self) -> &str;

    async fn write(&self, tuple: Tuple<T>) -> std::result::Result<(), EngineError>;

    async fn close(&self);
}

/// Builds the `behaviors` sub-map every node's `Status()` exposes
/// (spec.md §6).
pub fn behaviors_status(stop_on_disconnect: bool, graceful_stop: bool) -> StatusMap {
    let mut m = StatusMap::new();
    m.insert("stop_on_disconnect".into(), stop_on_disconnect.into());
    m.insert("graceful_stop".into(), graceful_stop.into());
    m
}

/// Assembles the common shape of a node's `Status()` map: `state`,
/// `input_stats`, `behaviors`, and — only when terminated with one —
/// `error` (spec.md §6).
pub fn base_status(
    state: NodeState,
    input_stats: StatusMap,
    behaviors: StatusMap,
    error: Option<&str>,
) -> StatusMap {
    let mut m = StatusMap::new();
    m.insert("state".into(), state.as_str().into());
    m.insert("input_stats".into(), input_stats.into());
    m.insert("behaviors".into(), behaviors.into());
    if state == NodeState::Stopped {
        if let Some(e) = error {
            m.insert("error".into(), e.into());
        }
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_status_omits_error_unless_stopped() {
        let running = base_status(NodeState::Running, StatusMap::new(), StatusMap::new(), None);
        assert!(!running.contains_key("error"));

        let err = EngineError::Fatal("boom".into());
        let stopped = base_status(
            NodeState::Stopped,
            StatusMap::new(),
            StatusMap::new(),
            Some(&err.to_string()),
        );
        assert!(stopped.contains_key("error"));
    }

    #[test]
    fn behaviors_status_reports_both_flags() {
        let b = behaviors_status(true, false);
        assert_eq!(b.get("stop_on_disconnect"), Some(&crate::status::StatusValue::Bool(true)));
        assert_eq!(b.get("graceful_stop"), Some(&crate::status::StatusValue::Bool(false)));
    }
}
