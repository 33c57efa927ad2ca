//! Nodes that can be wired together at runtime, each with its own
//! run/stop lifecycle (spec.md §4.6).
//!
//! Grounded in `original_source/core/default_sink_node.go`'s
//! `defaultSinkNode`: `Input` builds a fresh pipe, registers the
//! send-handle on the upstream node's `DataDestinations` and the
//! receive-handle on this node's `DataSources`, rolling back the first
//! registration if the second fails. `run` pours until the aggregator
//! drains; `Stop` asks the aggregator to stop and waits for `Stopped`.
//! Sources are simpler (no inputs) but follow the same
//! `checkAndPrepareFor*`/state-holder discipline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::data_destinations::DataDestinations;
use crate::data_sources::DataSources;
use crate::error::EngineError;
use crate::fatal::{FatalPlane, FatalReport};
use crate::lifecycle::{NodeState, StateHolder};
use crate::node::{base_status, behaviors_status, Sink, Source, StatefulBox};
use crate::pipe::pipe;
use crate::status::StatusMap;
use crate::tuple::{EventType, Tuple, TraceWriter, Writer};

struct DestinationsWriter<T>(Arc<DataDestinations<T>>);

impl<T> Clone for DestinationsWriter<T> {
    fn clone(&self) -> Self {
        DestinationsWriter(self.0.clone())
    }
}

#[async_trait::async_trait]
impl<T: Clone + Send + 'static> Writer<T> for DestinationsWriter<T> {
    async fn write(&mut self, tuple: Tuple<T>) -> std::result::Result<(), EngineError> {
        self.0
            .write(tuple)
            .await
            .map_err(|bulk| EngineError::Unclassified(Box::new(bulk)))
    }
}

struct SinkWriter<T>(Arc<dyn Sink<T>>);

impl<T> Clone for SinkWriter<T> {
    fn clone(&self) -> Self {
        SinkWriter(self.0.clone())
    }
}

#[async_trait::async_trait]
impl<T: Send + 'static> Writer<T> for SinkWriter<T> {
    async fn write(&mut self, tuple: Tuple<T>) -> std::result::Result<(), EngineError> {
        self.0.write(tuple).await
    }
}

struct BoxProcessWriter<T> {
    node: Arc<dyn StatefulBox<T>>,
    downstream: TraceWriter<DestinationsWriter<T>>,
}

impl<T> Clone for BoxProcessWriter<T> {
    fn clone(&self) -> Self {
        BoxProcessWriter {
            node: self.node.clone(),
            downstream: self.downstream.clone(),
        }
    }
}

#[async_trait::async_trait]
impl<T: Clone + Send + 'static> Writer<T> for BoxProcessWriter<T> {
    async fn write(&mut self, tuple: Tuple<T>) -> std::result::Result<(), EngineError> {
        self.node.process(tuple, &mut self.downstream).await
    }
}

/// A source that can be added, connected to, and stopped independently
/// of any other node.
pub struct DynamicSourceNode<T> {
    name: String,
    source: Arc<dyn Source<T>>,
    pub destinations: Arc<DataDestinations<T>>,
    state: Arc<StateHolder>,
    fatal: Mutex<Option<Arc<FatalPlane>>>,
}

impl<T: Clone + Send + 'static> DynamicSourceNode<T> {
    pub fn new(name: impl Into<String>, source: Arc<dyn Source<T>>) -> Arc<Self> {
        let name = name.into();
        Arc::new(DynamicSourceNode {
            destinations: Arc::new(DataDestinations::new(name.clone())),
            name,
            source,
            state: Arc::new(StateHolder::new()),
            fatal: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> NodeState {
        self.state.get()
    }

    pub async fn wait(&self, target: NodeState) -> NodeState {
        self.state.wait(target).await
    }

    pub fn attach_fatal_plane(&self, plane: Arc<FatalPlane>) {
        *self.fatal.lock().unwrap() = Some(plane);
    }

    pub async fn run(&self) -> std::result::Result<(), EngineError> {
        self.state
            .check_and_prepare_for_running()
            .map_err(|(_, e)| e)?;
        self.state.set(NodeState::Running);

        let mut writer = TraceWriter::new(
            DestinationsWriter(self.destinations.clone()),
            self.name.clone(),
            EventType::Output,
        );
        let src = self.source.clone();
        let result = match tokio::spawn(async move {
            let r = src.generate_stream(&mut writer).await;
            (src, r)
        })
        .await
        {
            Ok((_src, r)) => r,
            Err(join_err) => Err(EngineError::from_panic_payload(join_err.into_panic())),
        };

        self.destinations.close();
        self.state.set(NodeState::Stopped);
        if let Err(e) = &result {
            if e.is_fatal() {
                if let Some(plane) = self.fatal.lock().unwrap().as_ref() {
                    plane.report(FatalReport {
                        node_name: self.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
        result
    }

    pub async fn stop(&self) -> std::result::Result<(), EngineError> {
        self.source.stop().await
    }
}

/// A stateful box or sink aggregator shared shape: `input` wires a new
/// upstream edge in with rollback, `run` pours until drained, `stop`
/// asks the aggregator to stop and waits for `Stopped`.
struct RunnableInput<T> {
    name: String,
    srcs: Arc<DataSources<T>>,
    state: Arc<StateHolder>,
    graceful_stop: AtomicBool,
    stop_on_disconnect: AtomicBool,
    run_err: Mutex<Option<String>>,
    fatal: Mutex<Option<Arc<FatalPlane>>>,
}

impl<T: Clone + Send + 'static> RunnableInput<T> {
    fn new(name: String) -> Self {
        RunnableInput {
            srcs: Arc::new(DataSources::new(name.clone())),
            name,
            state: Arc::new(StateHolder::new()),
            graceful_stop: AtomicBool::new(false),
            stop_on_disconnect: AtomicBool::new(false),
            run_err: Mutex::new(None),
            fatal: Mutex::new(None),
        }
    }

    /// Shares a topology-wide fatal plane with this node; a box's or
    /// sink's own fatal error is reported to it (see
    /// `DynamicSourceNode::attach_fatal_plane` for the source side of
    /// the same wiring).
    fn attach_fatal_plane(&self, plane: Arc<FatalPlane>) {
        *self.fatal.lock().unwrap() = Some(plane);
    }

    fn report_if_fatal(&self, e: &EngineError) {
        if e.is_fatal() {
            if let Some(plane) = self.fatal.lock().unwrap().as_ref() {
                plane.report(FatalReport {
                    node_name: self.name.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    fn input(
        &self,
        upstream: &DataDestinations<T>,
        input_name: impl Into<String>,
        capacity: usize,
    ) -> std::result::Result<(), EngineError> {
        let input_name = input_name.into();
        let (rx, tx) = pipe::<T>(input_name.clone(), capacity);
        upstream.add(&self.name, tx)?;
        if let Err(e) = self.srcs.add(input_name, rx) {
            upstream.remove(&self.name);
            return Err(e);
        }
        Ok(())
    }

    fn enable_graceful_stop(&self) {
        self.graceful_stop.store(true, Ordering::SeqCst);
        self.srcs.enable_graceful_stop();
    }

    fn stop_on_disconnect(&self) {
        self.stop_on_disconnect.store(true, Ordering::SeqCst);
        self.srcs.stop_on_disconnect();
    }

    async fn stop(&self) -> std::result::Result<(), EngineError> {
        let was_already_stopped = self.state.check_and_prepare_for_stopping(false)?;
        if was_already_stopped {
            return Ok(());
        }
        self.state.set(NodeState::Stopping);
        self.srcs.stop().await;
        self.state.wait(NodeState::Stopped).await;
        Ok(())
    }

    fn status(&self) -> StatusMap {
        let behaviors = behaviors_status(
            self.stop_on_disconnect.load(Ordering::SeqCst),
            self.graceful_stop.load(Ordering::SeqCst),
        );
        let input_stats = self.srcs.status();
        let err = self.run_err.lock().unwrap();
        base_status(self.state.get(), input_stats, behaviors, err.as_deref())
    }
}

/// A stateful box with a dynamic set of inputs and one fan-out output.
pub struct DynamicBoxNode<T> {
    node: Arc<dyn StatefulBox<T>>,
    pub destinations: Arc<DataDestinations<T>>,
    input: RunnableInput<T>,
}

impl<T: Clone + Send + 'static> DynamicBoxNode<T> {
    pub fn new(name: impl Into<String>, node: Arc<dyn StatefulBox<T>>) -> Arc<Self> {
        let name = name.into();
        Arc::new(DynamicBoxNode {
            destinations: Arc::new(DataDestinations::new(name.clone())),
            input: RunnableInput::new(name),
            node,
        })
    }

    pub fn name(&self) -> &str {
        &self.input.name
    }

    pub fn state(&self) -> NodeState {
        self.input.state.get()
    }

    pub fn input(
        &self,
        upstream: &DataDestinations<T>,
        input_name: impl Into<String>,
        capacity: usize,
    ) -> std::result::Result<(), EngineError> {
        self.input.input(upstream, input_name, capacity)
    }

    pub fn enable_graceful_stop(&self) {
        self.input.enable_graceful_stop();
    }

    pub fn stop_on_disconnect(&self) {
        self.input.stop_on_disconnect();
    }

    pub fn status(&self) -> StatusMap {
        self.input.status()
    }

    pub fn attach_fatal_plane(&self, plane: Arc<FatalPlane>) {
        self.input.attach_fatal_plane(plane);
    }

    pub async fn run(&self) -> std::result::Result<(), EngineError> {
        self.input
            .state
            .check_and_prepare_for_running()
            .map_err(|(_, e)| e)?;
        self.input.state.set(NodeState::Running);

        let downstream = TraceWriter::new(
            DestinationsWriter(self.destinations.clone()),
            self.input.name.clone(),
            EventType::Output,
        );
        let writer = BoxProcessWriter {
            node: self.node.clone(),
            downstream,
        };
        let result = self.input.srcs.pour(writer, 1, || {}).await;
        self.destinations.close();
        self.input.state.set(NodeState::Stopped);
        if let Err(e) = &result {
            *self.input.run_err.lock().unwrap() = Some(e.to_string());
            self.input.report_if_fatal(e);
        }
        result
    }

    pub async fn stop(&self) -> std::result::Result<(), EngineError> {
        self.input.stop().await
    }
}

/// A terminal sink with a dynamic set of inputs, directly grounded in
/// `defaultSinkNode`.
pub struct DynamicSinkNode<T> {
    sink: Arc<dyn Sink<T>>,
    input: RunnableInput<T>,
}

impl<T: Clone + Send + 'static> DynamicSinkNode<T> {
    pub fn new(name: impl Into<String>, sink: Arc<dyn Sink<T>>) -> Arc<Self> {
        Arc::new(DynamicSinkNode {
            input: RunnableInput::new(name.into()),
            sink,
        })
    }

    pub fn name(&self) -> &str {
        &self.input.name
    }

    pub fn state(&self) -> NodeState {
        self.input.state.get()
    }

    pub fn input(
        &self,
        upstream: &DataDestinations<T>,
        input_name: impl Into<String>,
        capacity: usize,
    ) -> std::result::Result<(), EngineError> {
        self.input.input(upstream, input_name, capacity)
    }

    pub fn enable_graceful_stop(&self) {
        self.input.enable_graceful_stop();
    }

    pub fn stop_on_disconnect(&self) {
        self.input.stop_on_disconnect();
    }

    pub fn status(&self) -> StatusMap {
        self.input.status()
    }

    pub fn attach_fatal_plane(&self, plane: Arc<FatalPlane>) {
        self.input.attach_fatal_plane(plane);
    }

    /// Mirrors `defaultSinkNode.run`: transitions to `Running`, pours
    /// until the aggregator drains, closes the sink exactly once, then
    /// transitions to `Stopped` regardless of outcome.
    pub async fn run(&self) -> std::result::Result<(), EngineError> {
        self.input
            .state
            .check_and_prepare_for_running()
            .map_err(|(_, e)| e)?;
        self.input.state.set(NodeState::Running);

        let writer = TraceWriter::new(SinkWriter(self.sink.clone()), self.input.name.clone(), EventType::Input);
        let result = self.input.srcs.pour(writer, 1, || {}).await;
        self.sink.close().await;
        self.input.state.set(NodeState::Stopped);
        if let Err(e) = &result {
            *self.input.run_err.lock().unwrap() = Some(e.to_string());
            self.input.report_if_fatal(e);
        }
        result
    }

    pub async fn stop(&self) -> std::result::Result<(), EngineError> {
        self.input.stop().await
    }
}

/// The public entry point for the dynamic variant (spec.md §6): a named
/// registry of independently runnable nodes sharing one fatal plane.
/// Unlike [`crate::static_topology::StaticTopology`], nodes can be added
/// and wired after earlier ones are already running — each `add_*`
/// returns the node handle immediately so the caller can `run()` it on
/// its own task right away.
pub struct DynamicTopology<T> {
    fatal: Arc<FatalPlane>,
    sources: Mutex<HashMap<String, Arc<DynamicSourceNode<T>>>>,
    boxes: Mutex<HashMap<String, Arc<DynamicBoxNode<T>>>>,
    sinks: Mutex<HashMap<String, Arc<DynamicSinkNode<T>>>>,
}

impl<T: Clone + Send + 'static> Default for DynamicTopology<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> DynamicTopology<T> {
    pub fn new() -> Self {
        DynamicTopology {
            fatal: Arc::new(FatalPlane::new()),
            sources: Mutex::new(HashMap::new()),
            boxes: Mutex::new(HashMap::new()),
            sinks: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_fatal_listener<F>(&self, listener: F)
    where
        F: Fn(&FatalReport) + Send + Sync + 'static,
    {
        self.fatal.add_listener(listener);
    }

    pub fn add_source(&self, name: impl Into<String>, source: Arc<dyn Source<T>>) -> Arc<DynamicSourceNode<T>> {
        let name = name.into();
        let node = DynamicSourceNode::new(name.clone(), source);
        node.attach_fatal_plane(self.fatal.clone());
        self.sources.lock().unwrap().insert(name, node.clone());
        node
    }

    pub fn add_box(&self, name: impl Into<String>, b: Arc<dyn StatefulBox<T>>) -> Arc<DynamicBoxNode<T>> {
        let name = name.into();
        let node = DynamicBoxNode::new(name.clone(), b);
        node.attach_fatal_plane(self.fatal.clone());
        self.boxes.lock().unwrap().insert(name, node.clone());
        node
    }

    pub fn add_sink(&self, name: impl Into<String>, sink: Arc<dyn Sink<T>>) -> Arc<DynamicSinkNode<T>> {
        let name = name.into();
        let node = DynamicSinkNode::new(name.clone(), sink);
        node.attach_fatal_plane(self.fatal.clone());
        self.sinks.lock().unwrap().insert(name, node.clone());
        node
    }

    pub fn source(&self, name: &str) -> Option<Arc<DynamicSourceNode<T>>> {
        self.sources.lock().unwrap().get(name).cloned()
    }

    pub fn box_node(&self, name: &str) -> Option<Arc<DynamicBoxNode<T>>> {
        self.boxes.lock().unwrap().get(name).cloned()
    }

    pub fn sink(&self, name: &str) -> Option<Arc<DynamicSinkNode<T>>> {
        self.sinks.lock().unwrap().get(name).cloned()
    }

    fn destinations_of(&self, name: &str) -> std::result::Result<Arc<DataDestinations<T>>, EngineError> {
        if let Some(s) = self.sources.lock().unwrap().get(name) {
            return Ok(s.destinations.clone());
        }
        if let Some(b) = self.boxes.lock().unwrap().get(name) {
            return Ok(b.destinations.clone());
        }
        Err(EngineError::LifecycleMisuse(format!(
            "'{name}' has no outbound edge (unknown, or a sink)"
        )))
    }

    /// Wires `from`'s output into `to_box`'s input named `input_name`.
    /// `from` may be a source or another box.
    pub fn connect_to_box(
        &self,
        from: &str,
        to_box: &str,
        input_name: impl Into<String>,
        capacity: usize,
    ) -> std::result::Result<(), EngineError> {
        let upstream = self.destinations_of(from)?;
        let node = self
            .boxes
            .lock()
            .unwrap()
            .get(to_box)
            .cloned()
            .ok_or_else(|| EngineError::LifecycleMisuse(format!("unknown box '{to_box}'")))?;
        node.input(&upstream, input_name, capacity)
    }

    /// Wires `from`'s output into `to_sink`'s input named `input_name`.
    pub fn connect_to_sink(
        &self,
        from: &str,
        to_sink: &str,
        input_name: impl Into<String>,
        capacity: usize,
    ) -> std::result::Result<(), EngineError> {
        let upstream = self.destinations_of(from)?;
        let node = self
            .sinks
            .lock()
            .unwrap()
            .get(to_sink)
            .cloned()
            .ok_or_else(|| EngineError::LifecycleMisuse(format!("unknown sink '{to_sink}'")))?;
        node.input(&upstream, input_name, capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct OneShotSource {
        value: i32,
    }

    #[async_trait::async_trait]
    impl Source<i32> for OneShotSource {
        fn name(&self) -> &str {
            "src"
        }

        async fn generate_stream(
            &self,
            writer: &mut (dyn Writer<i32> + Send),
        ) -> std::result::Result<(), EngineError> {
            writer.write(Tuple::new(self.value)).await
        }

        async fn stop(&self) -> std::result::Result<(), EngineError> {
            Ok(())
        }
    }

    struct CollectingSink {
        collected: Arc<Mutex<Vec<i32>>>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Sink<i32> for CollectingSink {
        fn name(&self) -> &str {
            "sink"
        }

        async fn write(&self, tuple: Tuple<i32>) -> std::result::Result<(), EngineError> {
            self.collected.lock().unwrap().push(tuple.payload);
            Ok(())
        }

        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn input_wires_source_to_sink_and_runs() {
        let source = DynamicSourceNode::new("src", Arc::new(OneShotSource { value: 7 }));
        let collected = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicUsize::new(0));
        let sink = DynamicSinkNode::new(
            "sink",
            Arc::new(CollectingSink {
                collected: collected.clone(),
                closed: closed.clone(),
            }),
        );

        sink.input(&source.destinations, "src", 4).unwrap();

        let src_run = {
            let source = source.clone();
            tokio::spawn(async move { source.run().await })
        };
        let sink_run = {
            let sink = sink.clone();
            tokio::spawn(async move { sink.run().await })
        };

        src_run.await.unwrap().unwrap();
        sink_run.await.unwrap().unwrap();

        assert_eq!(*collected.lock().unwrap(), vec![7]);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(sink.state(), NodeState::Stopped);
    }

    #[tokio::test]
    async fn input_rolls_back_upstream_when_own_aggregator_rejects_duplicate() {
        let source1 = DynamicSourceNode::new("src1", Arc::new(OneShotSource { value: 1 }));
        let source2 = DynamicSourceNode::new("src2", Arc::new(OneShotSource { value: 2 }));
        let sink = DynamicSinkNode::new(
            "sink",
            Arc::new(CollectingSink {
                collected: Arc::new(Mutex::new(Vec::new())),
                closed: Arc::new(AtomicUsize::new(0)),
            }),
        );

        // First hookup claims input name "a".
        sink.input(&source1.destinations, "a", 4).unwrap();
        // Second hookup reuses "a" from a different upstream: the sink's
        // own aggregator rejects the duplicate input name, so the
        // half-registered destination on `source2` must be rolled back.
        let err = sink.input(&source2.destinations, "a", 4);
        assert!(err.is_err());
        assert_eq!(source2.destinations.len(), 0);
        assert_eq!(source1.destinations.len(), 1);
    }

    struct FailingSink;

    #[async_trait::async_trait]
    impl Sink<i32> for FailingSink {
        fn name(&self) -> &str {
            "failing_sink"
        }

        async fn write(&self, _tuple: Tuple<i32>) -> std::result::Result<(), EngineError> {
            Err(EngineError::Fatal("sink blew up".into()))
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn registry_wires_nodes_and_reports_sink_fatal_errors() {
        let topology = DynamicTopology::<i32>::new();
        let reports = Arc::new(Mutex::new(Vec::new()));
        let r = reports.clone();
        topology.add_fatal_listener(move |report| {
            r.lock().unwrap().push(report.node_name.clone());
        });

        let source = topology.add_source("src", Arc::new(OneShotSource { value: 9 }));
        let sink = topology.add_sink("sink", Arc::new(FailingSink));
        topology.connect_to_sink("src", "sink", "src", 4).unwrap();

        let src_run = tokio::spawn(async move { source.run().await });
        let sink_run = tokio::spawn(async move { sink.run().await });

        src_run.await.unwrap().unwrap();
        assert!(sink_run.await.unwrap().is_err());

        assert_eq!(*reports.lock().unwrap(), vec!["sink".to_string()]);
    }
}
