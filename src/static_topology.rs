//! A topology frozen at construction time and run exactly once
//! (spec.md §4.5).
//!
//! Grounded in `original_source/core/default_static_topology.go`:
//! `Run` initializes stateful boxes in declaration order with
//! reverse-order rollback on failure, spawns one worker per node, and
//! blocks until they all exit; `Stop` asks every source to stop and
//! either waits for a clean shutdown or force-transitions to `Stopped`
//! if any source refuses.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::data_destinations::DataDestinations;
use crate::data_sources::DataSources;
use crate::error::EngineError;
use crate::fatal::{FatalPlane, FatalReport};
use crate::lifecycle::{NodeState, StateHolder};
use crate::node::{Sink, Source, StatefulBox};
use crate::tuple::{EventType, Tuple, TraceWriter, Writer};

/// Adapts `&Arc<DataDestinations<T>>` to the `Writer` seam so it can sit
/// behind a `TraceWriter` the same way a pipe sender does.
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

/// Like `DestinationsWriter`, but additionally rejects writes once the
/// destinations have already been closed, whether by this node's own
/// normal end-of-stream teardown or by `StaticTopology::stop`'s
/// force-close of a source that refused to cooperate. Writing to an
/// already-closed destination map is what makes a stuck source's write
/// loop observe failure and return, mirroring the Go static executor's
/// closed-channel-send panic (spec.md §4.5 step 5, §8 "no zombie
/// workers"); `DestinationsWriter`'s plain `Ok(())`-on-close behavior
/// (needed for box/sink destinations, which never get force-closed
/// mid-write) would leave such a source spinning forever.
struct SourceDestinationsWriter<T>(Arc<DataDestinations<T>>);

impl<T> Clone for SourceDestinationsWriter<T> {
    fn clone(&self) -> Self {
        SourceDestinationsWriter(self.0.clone())
    }
}

#[async_trait::async_trait]
impl<T: Clone + Send + 'static> Writer<T> for SourceDestinationsWriter<T> {
    async fn write(&mut self, tuple: Tuple<T>) -> std::result::Result<(), EngineError> {
        if self.0.is_closed() {
            return Err(EngineError::PipeClosed);
        }
        self.0
            .write(tuple)
            .await
            .map_err(|bulk| EngineError::Unclassified(Box::new(bulk)))
    }
}

/// Adapts a box's `process` into the `Writer` seam expected by
/// `DataSources::pour`: every inbound tuple is handed to the box, which
/// decides what (if anything) to emit downstream.
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

/// Adapts a sink's `write` into the `Writer` seam.
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

struct Inner<T> {
    sources: Vec<(String, Arc<dyn Source<T>>)>,
    boxes: Vec<(String, Arc<dyn StatefulBox<T>>)>,
    sinks: Vec<(String, Arc<dyn Sink<T>>)>,
    destinations: HashMap<String, Arc<DataDestinations<T>>>,
    aggregators: HashMap<String, Arc<DataSources<T>>>,
    state: Arc<StateHolder>,
    fatal: Arc<FatalPlane>,
    src_dst_closed: Mutex<HashSet<String>>,
}

/// A topology whose nodes and edges are fixed before `run` and never
/// change afterward (spec.md §4.5); contrast with [`crate::dynamic_topology`].
pub struct StaticTopology<T> {
    inner: Arc<Inner<T>>,
}

/// Assembles a `StaticTopology`. Wiring (`connect`) can fail, so callers
/// build incrementally and only get a runnable topology once every edge
/// type-checks against its endpoints.
pub struct StaticTopologyBuilder<T> {
    sources: Vec<(String, Arc<dyn Source<T>>)>,
    boxes: Vec<(String, Arc<dyn StatefulBox<T>>)>,
    sinks: Vec<(String, Arc<dyn Sink<T>>)>,
    destinations: HashMap<String, Arc<DataDestinations<T>>>,
    aggregators: HashMap<String, Arc<DataSources<T>>>,
}

impl<T: Clone + Send + 'static> Default for StaticTopologyBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> StaticTopologyBuilder<T> {
    pub fn new() -> Self {
        StaticTopologyBuilder {
            sources: Vec::new(),
            boxes: Vec::new(),
            sinks: Vec::new(),
            destinations: HashMap::new(),
            aggregators: HashMap::new(),
        }
    }

    pub fn add_source(&mut self, name: impl Into<String>, source: Arc<dyn Source<T>>) {
        let name = name.into();
        self.destinations.insert(name.clone(), Arc::new(DataDestinations::new(name.clone())));
        self.sources.push((name, source));
    }

    pub fn add_box(&mut self, name: impl Into<String>, b: Arc<dyn StatefulBox<T>>) {
        let name = name.into();
        self.destinations.insert(name.clone(), Arc::new(DataDestinations::new(name.clone())));
        self.aggregators.insert(name.clone(), Arc::new(DataSources::new(name.clone())));
        self.boxes.push((name, b));
    }

    pub fn add_sink(&mut self, name: impl Into<String>, sink: Arc<dyn Sink<T>>) {
        let name = name.into();
        self.aggregators.insert(name.clone(), Arc::new(DataSources::new(name.clone())));
        self.sinks.push((name, sink));
    }

    /// Wires `from`'s output to `to`'s input named `input_name`, with a
    /// buffer of `capacity` tuples. Rolls back the send-side registration
    /// if the receive side fails to register (spec.md §4.6, "partial
    /// failure").
    pub fn connect(
        &mut self,
        from: &str,
        to: &str,
        input_name: impl Into<String>,
        capacity: usize,
    ) -> std::result::Result<(), EngineError> {
        let input_name = input_name.into();
        let dst = self
            .destinations
            .get(from)
            .ok_or_else(|| EngineError::LifecycleMisuse(format!("unknown source node '{from}'")))?
            .clone();
        let agg = self
            .aggregators
            .get(to)
            .ok_or_else(|| EngineError::LifecycleMisuse(format!("unknown destination node '{to}'")))?
            .clone();

        let (rx, tx) = crate::pipe::pipe::<T>(input_name.clone(), capacity);
        dst.add(to, tx)?;
        if let Err(e) = agg.add(input_name, rx) {
            dst.remove(to);
            return Err(e);
        }
        Ok(())
    }

    /// Enables graceful draining on a box's or sink's input aggregator:
    /// once `Stop` is called, already-buffered tuples are still handed
    /// to the writer before the worker exits (spec.md §8, "graceful
    /// drain"). Has no effect on sources, which have no aggregator.
    pub fn enable_graceful_stop(&mut self, node_name: &str) {
        if let Some(agg) = self.aggregators.get(node_name) {
            agg.enable_graceful_stop();
        }
    }

    /// Marks a box's or sink's input aggregator to drop its keepalive
    /// once every registered input has disconnected, rather than idling
    /// forever waiting for an `add` that will never come.
    pub fn stop_on_disconnect(&mut self, node_name: &str) {
        if let Some(agg) = self.aggregators.get(node_name) {
            agg.stop_on_disconnect();
        }
    }

    pub fn build(self) -> StaticTopology<T> {
        StaticTopology {
            inner: Arc::new(Inner {
                sources: self.sources,
                boxes: self.boxes,
                sinks: self.sinks,
                destinations: self.destinations,
                aggregators: self.aggregators,
                state: Arc::new(StateHolder::new()),
                fatal: Arc::new(FatalPlane::new()),
                src_dst_closed: Mutex::new(HashSet::new()),
            }),
        }
    }
}

impl<T: Clone + Send + 'static> StaticTopology<T> {
    pub fn state(&self) -> NodeState {
        self.inner.state.get()
    }

    pub async fn wait(&self, target: NodeState) -> NodeState {
        self.inner.state.wait(target).await
    }

    pub fn add_fatal_listener<F>(&self, listener: F)
    where
        F: Fn(&FatalReport) + Send + Sync + 'static,
    {
        self.inner.fatal.add_listener(listener);
    }

    async fn close_source_destination(inner: &Inner<T>, name: &str) {
        let should_close = inner.src_dst_closed.lock().unwrap().insert(name.to_string());
        if should_close {
            if let Some(dst) = inner.destinations.get(name) {
                dst.close();
            }
        }
    }

    /// Initializes every stateful box in declaration order, spawns one
    /// worker per node, and blocks until every worker has exited — either
    /// because the topology was stopped or because every source ran dry
    /// and the resulting end-of-stream cascaded through every downstream
    /// node (spec.md §4.5).
    pub async fn run(&self) -> std::result::Result<(), EngineError> {
        self.inner
            .state
            .check_and_prepare_for_running()
            .map_err(|(_, e)| e)?;

        let mut initialized = Vec::new();
        for (name, b) in &self.inner.boxes {
            match call_init_catching_panics(b.clone()).await {
                Ok(()) => initialized.push(b.clone()),
                Err(e) => {
                    for prior in initialized.into_iter().rev() {
                        call_terminate_catching_panics(prior).await;
                    }
                    self.inner.state.set(NodeState::Stopped);
                    return Err(EngineError::InitFailure(
                        format!("box '{name}' failed to initialize: {e}").into(),
                    ));
                }
            }
        }

        let mut handles: Vec<JoinHandle<std::result::Result<(), EngineError>>> = Vec::new();

        for (name, b) in self.inner.boxes.clone() {
            let inner = self.inner.clone();
            handles.push(tokio::spawn(Self::run_box_worker(inner, name, b)));
        }
        for (name, s) in self.inner.sinks.clone() {
            let inner = self.inner.clone();
            handles.push(tokio::spawn(Self::run_sink_worker(inner, name, s)));
        }
        for (name, src) in self.inner.sources.clone() {
            let inner = self.inner.clone();
            handles.push(tokio::spawn(Self::run_source_worker(inner, name, src)));
        }

        self.inner.state.set(NodeState::Running);

        let mut first_err = None;
        for h in handles {
            match h.await {
                Ok(Ok(())) => {}
                // A source forced to stop via `stop()`'s destinations
                // close observes `PipeClosed` from its own write loop;
                // that is the forced-shutdown signal working as intended,
                // not a topology-level failure to surface.
                Ok(Err(EngineError::PipeClosed)) => {}
                Ok(Err(e)) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                Err(join_err) => {
                    let e = EngineError::from_panic_payload(join_err.into_panic());
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }

        self.inner.state.set(NodeState::Stopped);
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn run_box_worker(
        inner: Arc<Inner<T>>,
        name: String,
        b: Arc<dyn StatefulBox<T>>,
    ) -> std::result::Result<(), EngineError> {
        let dests = inner.destinations.get(&name).expect("box has a destination map").clone();
        let downstream = TraceWriter::new(DestinationsWriter(dests), name.clone(), EventType::Output);
        let writer = BoxProcessWriter { node: b, downstream };
        let agg = inner.aggregators.get(&name).expect("box has an aggregator").clone();
        let result = agg.pour(writer, 1, || {}).await;
        if let Some(dest) = inner.destinations.get(&name) {
            dest.close();
        }
        if let Err(e) = &result {
            if e.is_fatal() {
                inner.fatal.report(FatalReport {
                    node_name: name.clone(),
                    message: e.to_string(),
                });
            }
        }
        result
    }

    async fn run_sink_worker(
        inner: Arc<Inner<T>>,
        name: String,
        sink: Arc<dyn Sink<T>>,
    ) -> std::result::Result<(), EngineError> {
        let writer = TraceWriter::new(SinkWriter(sink.clone()), name.clone(), EventType::Input);
        let agg = inner.aggregators.get(&name).expect("sink has an aggregator").clone();
        let result = agg.pour(writer, 1, || {}).await;
        sink.close().await;
        if let Err(e) = &result {
            if e.is_fatal() {
                inner.fatal.report(FatalReport {
                    node_name: name.clone(),
                    message: e.to_string(),
                });
            }
        }
        result
    }

    async fn run_source_worker(
        inner: Arc<Inner<T>>,
        name: String,
        src: Arc<dyn Source<T>>,
    ) -> std::result::Result<(), EngineError> {
        let dests = inner.destinations.get(&name).expect("source has a destination map").clone();
        let mut writer = TraceWriter::new(SourceDestinationsWriter(dests), name.clone(), EventType::Output);

        let result = match tokio::spawn(async move {
            let r = src.generate_stream(&mut writer).await;
            (src, r)
        })
        .await
        {
            Ok((_src, r)) => r,
            Err(join_err) => Err(EngineError::from_panic_payload(join_err.into_panic())),
        };

        Self::close_source_destination(&inner, &name).await;

        if let Err(e) = &result {
            if e.is_fatal() {
                inner.fatal.report(FatalReport {
                    node_name: name.clone(),
                    message: e.to_string(),
                });
            }
        }
        result
    }

    /// Stops every source; if all stop cleanly the topology waits for the
    /// end-of-stream cascade to reach `Stopped` on its own. If any source
    /// refuses, the topology is force-transitioned to `Stopped` instead of
    /// risking a permanent deadlock (spec.md §4.5 step 5).
    pub async fn stop(&self) -> std::result::Result<(), EngineError> {
        let was_already_stopped = self.inner.state.check_and_prepare_for_stopping(true)?;
        if was_already_stopped {
            return Ok(());
        }

        let mut failures = Vec::new();
        for (name, src) in &self.inner.sources {
            let src = src.clone();
            match tokio::spawn(async move { src.stop().await }).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    // `stop` refused or failed: force-close this source's
                    // destinations so its write loop observes
                    // `PipeClosed` and actually returns instead of
                    // spinning forever (spec.md §4.5 step 5).
                    Self::close_source_destination(&self.inner, name).await;
                    failures.push(format!("{name}: {e}"));
                }
                Err(join_err) => {
                    let e = EngineError::from_panic_payload(join_err.into_panic());
                    Self::close_source_destination(&self.inner, name).await;
                    failures.push(format!("{name}: {e}"));
                }
            }
        }

        if failures.is_empty() {
            self.inner.state.wait(NodeState::Stopped).await;
            Ok(())
        } else {
            self.inner.state.set(NodeState::Stopped);
            Err(EngineError::StopFailure(failures))
        }
    }
}

async fn call_init_catching_panics<T: Send + 'static>(
    b: Arc<dyn StatefulBox<T>>,
) -> std::result::Result<(), EngineError> {
    match tokio::spawn(async move { b.init().await }).await {
        Ok(result) => result,
        Err(join_err) => Err(EngineError::from_panic_payload(join_err.into_panic())),
    }
}

async fn call_terminate_catching_panics<T: Send + 'static>(b: Arc<dyn StatefulBox<T>>) {
    if let Err(join_err) = tokio::spawn(async move { b.terminate().await }).await {
        let e = EngineError::from_panic_payload(join_err.into_panic());
        tracing::error!(error = %e, "panic while terminating box during init rollback");
    }
}
