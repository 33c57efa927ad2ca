//! S3 (fan-out + one closed destination): B fans to K1, K2; K2 closes
//! its input mid-stream. Expect K1 receives the full prefix of tuples
//! B emitted up to that point; `write` never returns an error; K2's
//! removal from B's destinations completes (observable via `len()`).

use tupleflow::{pipe, DataDestinations, Tuple};

#[tokio::test]
async fn closing_one_fan_out_destination_does_not_error_or_stall_the_other() {
    let dests = DataDestinations::<i32>::new("B");
    let (mut k1_rx, k1_tx) = pipe::<i32>("B", 8);
    let (k2_rx, k2_tx) = pipe::<i32>("B", 8);
    dests.add("K1", k1_tx).unwrap();
    dests.add("K2", k2_tx).unwrap();

    dests.write(Tuple::new(1)).await.unwrap();
    dests.write(Tuple::new(2)).await.unwrap();

    // K2 closes its input mid-stream.
    k2_rx.close();
    tokio::task::yield_now().await;

    // Further writes must not error even though one destination just
    // went away, and K1 must still see everything sent to it.
    dests.write(Tuple::new(3)).await.unwrap();
    dests.write(Tuple::new(4)).await.unwrap();

    assert_eq!(k1_rx.recv().await.unwrap().payload, 1);
    assert_eq!(k1_rx.recv().await.unwrap().payload, 2);
    assert_eq!(k1_rx.recv().await.unwrap().payload, 3);
    assert_eq!(k1_rx.recv().await.unwrap().payload, 4);

    assert_eq!(dests.len(), 1, "K2 must have been pruned from the destination map");
}
