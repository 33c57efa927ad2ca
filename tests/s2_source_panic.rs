//! S2 (source panic): S panics on its second tuple. Expect K's log
//! contains at least {v:1}; the fatal listener fires exactly once, for
//! node "S"; the topology still reaches Stopped.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tupleflow::{EngineError, NodeState, Sink, Source, StatefulBox, StaticTopologyBuilder, Tuple, Writer};

struct PanicsOnSecondSource;

#[async_trait]
impl Source<i32> for PanicsOnSecondSource {
    fn name(&self) -> &str {
        "S"
    }

    async fn generate_stream(&self, writer: &mut (dyn Writer<i32> + Send)) -> Result<(), EngineError> {
        writer.write(Tuple::new(1)).await?;
        panic!("source blew up on its second tuple");
    }

    async fn stop(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

struct IdentityBox;

#[async_trait]
impl StatefulBox<i32> for IdentityBox {
    fn name(&self) -> &str {
        "B"
    }

    async fn process(&self, tuple: Tuple<i32>, writer: &mut (dyn Writer<i32> + Send)) -> Result<(), EngineError> {
        writer.write(tuple).await
    }
}

struct AccumulatingSink {
    log: Arc<Mutex<Vec<i32>>>,
}

#[async_trait]
impl Sink<i32> for AccumulatingSink {
    fn name(&self) -> &str {
        "K"
    }

    async fn write(&self, tuple: Tuple<i32>) -> Result<(), EngineError> {
        self.log.lock().unwrap().push(tuple.payload);
        Ok(())
    }

    async fn close(&self) {}
}

#[tokio::test]
async fn source_panic_is_reported_once_and_topology_still_stops() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let fatal_nodes = Arc::new(Mutex::new(Vec::new()));

    let mut builder = StaticTopologyBuilder::<i32>::new();
    builder.add_source("S", Arc::new(PanicsOnSecondSource));
    builder.add_box("B", Arc::new(IdentityBox));
    builder.add_sink("K", Arc::new(AccumulatingSink { log: log.clone() }));
    builder.connect("S", "B", "S", 8).unwrap();
    builder.connect("B", "K", "B", 8).unwrap();

    let topology = builder.build();
    let reported = fatal_nodes.clone();
    topology.add_fatal_listener(move |report| {
        reported.lock().unwrap().push(report.node_name.clone());
    });

    let _ = topology.run().await;

    assert!(log.lock().unwrap().contains(&1));
    assert_eq!(topology.state(), NodeState::Stopped);
    assert_eq!(*fatal_nodes.lock().unwrap(), vec!["S".to_string()]);
}
