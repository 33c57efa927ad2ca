//! S1 (static happy path): source S emits {v:1},{v:2}; box B is
//! identity; sink K accumulates. Expect K's log == [1, 2], final state
//! Stopped, no error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tupleflow::{EngineError, NodeState, Sink, Source, StatefulBox, StaticTopologyBuilder, Tuple, Writer};

struct TwoValueSource {
    stopped: Arc<AtomicBool>,
}

#[async_trait]
impl Source<i32> for TwoValueSource {
    fn name(&self) -> &str {
        "S"
    }

    async fn generate_stream(&self, writer: &mut (dyn Writer<i32> + Send)) -> Result<(), EngineError> {
        for v in [1, 2] {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            writer.write(Tuple::new(v)).await?;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.stopped.store(true, Ordering::SeqCst);
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
async fn static_happy_path_delivers_both_values_in_order() {
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut builder = StaticTopologyBuilder::<i32>::new();
    builder.add_source(
        "S",
        Arc::new(TwoValueSource {
            stopped: Arc::new(AtomicBool::new(false)),
        }),
    );
    builder.add_box("B", Arc::new(IdentityBox));
    builder.add_sink("K", Arc::new(AccumulatingSink { log: log.clone() }));
    builder.connect("S", "B", "S", 8).unwrap();
    builder.connect("B", "K", "B", 8).unwrap();

    let topology = builder.build();
    topology.run().await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    assert_eq!(topology.state(), NodeState::Stopped);
}
