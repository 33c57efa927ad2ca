//! tupleflow: a stream-processing dataflow engine. Sources, stateful
//! boxes, and sinks are wired together by bounded pipes and driven by
//! one of two executors — a [`static_topology`] frozen at construction
//! time, or a [`dynamic_topology`] whose nodes can be wired and run
//! independently (spec.md §1-§2).

pub mod error;
pub use error::{EngineError, Error, Result};

pub mod lifecycle;
pub use lifecycle::{NodeState, StateHolder};

pub mod tuple;
pub use tuple::{EventType, Tuple, TraceEvent, TraceWriter, Writer};

pub mod pipe;
pub use pipe::{pipe, PipeCloseHandle, PipeReceiver, PipeSender};

pub mod status;
pub use status::{StatusMap, StatusValue};

pub mod data_destinations;
pub use data_destinations::DataDestinations;

pub mod data_sources;
pub use data_sources::DataSources;

pub mod fatal;
pub use fatal::{FatalPlane, FatalReport};

pub mod node;
pub use node::{NodeKind, Sink, Source, StatefulBox};

pub mod static_topology;
pub use static_topology::{StaticTopology, StaticTopologyBuilder};

pub mod dynamic_topology;
pub use dynamic_topology::{DynamicBoxNode, DynamicSinkNode, DynamicSourceNode, DynamicTopology};

pub mod parser;
