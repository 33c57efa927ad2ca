//! S5 (graceful stop): 100 tuples are already buffered in a pipe; `stop`
//! is called with graceful draining enabled almost immediately after
//! `pour` starts. Expect every one of the 100 tuples still reaches the
//! writer before the aggregator's pour future resolves (spec.md §8,
//! "graceful drain").

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tupleflow::{pipe, DataSources, EngineError, Tuple, Writer};

#[derive(Clone)]
struct CollectingWriter(Arc<Mutex<Vec<i32>>>);

#[async_trait]
impl Writer<i32> for CollectingWriter {
    async fn write(&mut self, tuple: Tuple<i32>) -> Result<(), EngineError> {
        self.0.lock().unwrap().push(tuple.payload);
        Ok(())
    }
}

#[tokio::test]
async fn graceful_stop_drains_every_buffered_tuple_before_exiting() {
    let ds = Arc::new(DataSources::new("B"));
    ds.enable_graceful_stop();

    let (rx, tx) = pipe::<i32>("S", 100);
    ds.add("S", rx).unwrap();
    for i in 0..100 {
        tx.send(Tuple::new(i)).await.unwrap();
    }

    let collected = Arc::new(Mutex::new(Vec::new()));
    let writer = CollectingWriter(collected.clone());

    let ds2 = ds.clone();
    let pour = tokio::spawn(async move { ds2.pour(writer, 1, || {}).await });

    // Request stop right away; because graceful draining is enabled the
    // worker must still forward every already-buffered tuple instead of
    // exiting on the spot.
    ds.stop().await;

    pour.await.unwrap().unwrap();

    let got = collected.lock().unwrap().clone();
    assert_eq!(got.len(), 100, "every buffered tuple must have been observed");
    assert_eq!(got, (0..100).collect::<Vec<i32>>(), "per-edge FIFO order must be preserved");
}
