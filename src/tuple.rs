//! The unit of data flowing through the topology, plus the trace writer
//! that annotates hop events (spec.md §2, "Tuple & trace writer").

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::error::EngineError;

/// An opaque payload plus a mutable `input_name` tag, set by the sender
/// at enqueue time so the receiver knows which input port delivered it
/// (spec.md §3). Tuples are logically immutable w.r.t. `payload`; when
/// fan-out requires more than one downstream, the producer calls
/// `deep_copy` so each downstream may mutate `input_name` without races.
#[derive(Debug, Clone)]
pub struct Tuple<T> {
    pub payload: T,
    pub input_name: String,
    trace: Vec<TraceEvent>,
}

impl<T> Tuple<T> {
    pub fn new(payload: T) -> Self {
        Tuple {
            payload,
            input_name: String::new(),
            trace: Vec::new(),
        }
    }

    pub fn trace(&self) -> &[TraceEvent] {
        &self.trace
    }

    fn push_trace(&mut self, event: TraceEvent) {
        self.trace.push(event);
    }
}

impl<T: Clone> Tuple<T> {
    /// Independent copy required whenever fan-out exceeds one
    /// destination (spec.md §3). `input_name` is left for the next pipe
    /// to overwrite.
    pub fn deep_copy(&self) -> Self {
        Tuple {
            payload: self.payload.clone(),
            input_name: self.input_name.clone(),
            trace: self.trace.clone(),
        }
    }
}

/// Which hop of a node a trace event marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Input,
    Output,
}

#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub node_name: String,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// Anything tuples can be written into: a pipe sender, a box, a sink, or
/// another writer decorator. Mirrors the teacher's use of small async
/// traits at connection/command seams (`Connection::write_frame`), here
/// generalized to the engine's `Writer` seam (spec.md §6).
#[async_trait]
pub trait Writer<T>: Send {
    async fn write(&mut self, tuple: Tuple<T>) -> std::result::Result<(), EngineError>;
}

/// A source of `Instant`s for [`TraceWriter`], supplied by whoever
/// constructs it rather than read from the system clock inside the
/// trace-writing path itself — so a test can inject a deterministic
/// sequence of instants instead of depending on wall-clock timing.
type Clock = Arc<dyn Fn() -> Instant + Send + Sync>;

/// Wraps an inner `Writer` and appends a `TraceEvent` on every call,
/// grounded in sensorbee's `newTraceWriter` (used by both
/// `default_static_topology.go`'s source goroutines and
/// `default_sink_node.go`'s `run`).
pub struct TraceWriter<W> {
    inner: W,
    node_name: String,
    event_type: EventType,
    clock: Clock,
}

impl<W> TraceWriter<W> {
    /// Timestamps each hop with the system clock (`Instant::now`).
    pub fn new(inner: W, node_name: impl Into<String>, event_type: EventType) -> Self {
        Self::with_clock(inner, node_name, event_type, Instant::now)
    }

    /// Timestamps each hop with `clock` instead of the system clock, so
    /// trace-ordering tests can supply a deterministic, caller-controlled
    /// sequence of instants.
    pub fn with_clock(
        inner: W,
        node_name: impl Into<String>,
        event_type: EventType,
        clock: impl Fn() -> Instant + Send + Sync + 'static,
    ) -> Self {
        TraceWriter {
            inner,
            node_name: node_name.into(),
            event_type,
            clock: Arc::new(clock),
        }
    }
}

impl<W: Clone> Clone for TraceWriter<W> {
    fn clone(&self) -> Self {
        TraceWriter {
            inner: self.inner.clone(),
            node_name: self.node_name.clone(),
            event_type: self.event_type,
            clock: self.clock.clone(),
        }
    }
}

#[async_trait]
impl<T, W> Writer<T> for TraceWriter<W>
where
    T: Send + 'static,
    W: Writer<T>,
{
    async fn write(&mut self, mut tuple: Tuple<T>) -> std::result::Result<(), EngineError> {
        tuple.push_trace(TraceEvent {
            node_name: self.node_name.clone(),
            event_type: self.event_type,
            timestamp: (self.clock)(),
        });
        self.inner.write(tuple).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_copy_is_independent() {
        let mut t = Tuple::new(vec![1, 2, 3]);
        t.input_name = "a".into();
        let mut copy = t.deep_copy();
        copy.input_name = "b".into();
        copy.payload.push(4);

        assert_eq!(t.input_name, "a");
        assert_eq!(t.payload, vec![1, 2, 3]);
        assert_eq!(copy.payload, vec![1, 2, 3, 4]);
    }

    struct Sink(Vec<Tuple<i32>>);

    #[async_trait]
    impl Writer<i32> for Sink {
        async fn write(&mut self, tuple: Tuple<i32>) -> std::result::Result<(), EngineError> {
            self.0.push(tuple);
            Ok(())
        }
    }

    #[tokio::test]
    async fn trace_writer_appends_hop() {
        let mut traced = TraceWriter::new(Sink(Vec::new()), "box1", EventType::Output);
        traced.write(Tuple::new(42)).await.unwrap();
        assert_eq!(traced.inner.0.len(), 1);
        let trace = traced.inner.0[0].trace();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].node_name, "box1");
        assert_eq!(trace[0].event_type, EventType::Output);
    }

    #[tokio::test]
    async fn trace_writer_timestamps_come_from_the_injected_clock() {
        use std::sync::atomic::{AtomicU64, Ordering};
        use std::time::Duration;

        let base = Instant::now();
        let tick = Arc::new(AtomicU64::new(0));
        let tick2 = tick.clone();
        let clock = move || base + Duration::from_secs(tick2.fetch_add(1, Ordering::SeqCst));

        let mut traced = TraceWriter::with_clock(Sink(Vec::new()), "box1", EventType::Output, clock);
        traced.write(Tuple::new(1)).await.unwrap();
        traced.write(Tuple::new(2)).await.unwrap();

        let t0 = traced.inner.0[0].trace()[0].timestamp;
        let t1 = traced.inner.0[1].trace()[0].timestamp;
        assert_eq!(t1 - t0, Duration::from_secs(1), "timestamps must follow the injected clock, not wall time");
    }
}
