//! Fan-in aggregator: many named inbound pipes poured into one writer by
//! a pool of worker tasks (spec.md §4.2).
//!
//! Grounded in `original_source/core/dynamic_pipe.go`'s
//! `dynamicDataSources`/`pouringThread`. The Go worker builds a
//! `reflect.Select` case list out of every registered receive channel
//! plus two control cases (`newRecv`, `stopSignal`) and a `default`, so
//! one goroutine can wait on an arbitrary, changing set of channels.
//! `tokio::select!` cases are fixed at compile time, so this crate gets
//! the same *effect* — an arbitrary, changing set of inputs feeding a
//! worker pool — with a merging relay task per registered receiver
//! (spec.md §9): each relay forwards its pipe into one shared `mpsc`
//! channel, and the `parallelism` workers all pull from that channel,
//! competing the way multiple Go goroutines would compete reading off
//! the same `chan`. Adding an input while pouring is already running
//! just spawns one more relay; no worker needs to learn about a new
//! case.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::error::EngineError;
use crate::pipe::{PipeCloseHandle, PipeReceiver};
use crate::status::{StatusMap, StatusValue};
use crate::tuple::{Tuple, Writer};

#[derive(Debug, Default, Clone, Copy)]
struct InputStats {
    received: u64,
    forwarded: u64,
    dropped: u64,
}

impl From<InputStats> for StatusValue {
    fn from(s: InputStats) -> Self {
        let mut m = StatusMap::new();
        m.insert("received".into(), StatusValue::UInt(s.received));
        m.insert("forwarded".into(), StatusValue::UInt(s.forwarded));
        m.insert("dropped".into(), StatusValue::UInt(s.dropped));
        StatusValue::Map(m)
    }
}

enum Bump {
    Received,
    Forwarded,
    Dropped,
}

fn bump(stats: &Mutex<HashMap<String, InputStats>>, name: &str, which: Bump) {
    let mut guard = stats.lock().unwrap();
    let entry = guard.entry(name.to_string()).or_default();
    match which {
        Bump::Received => entry.received += 1,
        Bump::Forwarded => entry.forwarded += 1,
        Bump::Dropped => entry.dropped += 1,
    }
}

/// Inner state guarded by a plain `std::sync::Mutex` — every operation
/// under the lock is non-blocking bookkeeping; the actual pouring work
/// happens in spawned tasks, never while holding it.
struct Inner<T> {
    closed: bool,
    started: bool,
    pending: HashMap<String, PipeReceiver<T>>,
    close_handles: HashMap<String, PipeCloseHandle<T>>,
    merge_tx: Option<mpsc::Sender<Tuple<T>>>,
    keepalive: Option<mpsc::Sender<Tuple<T>>>,
}

/// Fans many named inbound pipes into a single writer. One instance
/// backs either a box's inputs or a sink's inputs (spec.md §4.2).
pub struct DataSources<T> {
    node_name: String,
    inner: Arc<Mutex<Inner<T>>>,
    graceful_stop: Arc<AtomicBool>,
    stop_on_disconnect: Arc<AtomicBool>,
    active_relays: Arc<AtomicUsize>,
    stop_requested: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    stats: Arc<Mutex<HashMap<String, InputStats>>>,
}

impl<T: Send + 'static> DataSources<T> {
    pub fn new(node_name: impl Into<String>) -> Self {
        DataSources {
            node_name: node_name.into(),
            inner: Arc::new(Mutex::new(Inner {
                closed: false,
                started: false,
                pending: HashMap::new(),
                close_handles: HashMap::new(),
                merge_tx: None,
                keepalive: None,
            })),
            graceful_stop: Arc::new(AtomicBool::new(false)),
            stop_on_disconnect: Arc::new(AtomicBool::new(false)),
            active_relays: Arc::new(AtomicUsize::new(0)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            stop_notify: Arc::new(Notify::new()),
            stats: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn enable_graceful_stop(&self) {
        self.graceful_stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_on_disconnect(&self) {
        self.stop_on_disconnect.store(true, Ordering::SeqCst);
    }

    /// Registers a new named inbound pipe. If `pour` has already started,
    /// the receiver is handed straight to a relay task so it's polled
    /// immediately, mirroring `dynamicDataSources.add`'s hand-off to
    /// already-running workers.
    pub fn add(&self, name: impl Into<String>, receiver: PipeReceiver<T>) -> std::result::Result<(), EngineError> {
        let name = name.into();
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(EngineError::LifecycleMisuse(format!(
                "node '{}' is no longer accepting inputs",
                self.node_name
            )));
        }
        if inner.pending.contains_key(&name) || inner.close_handles.contains_key(&name) {
            return Err(EngineError::LifecycleMisuse(format!(
                "node '{}' already has the input '{}'",
                self.node_name, name
            )));
        }
        inner.close_handles.insert(name.clone(), receiver.close_handle());
        if inner.started {
            let merge_tx = inner
                .merge_tx
                .clone()
                .expect("merge_tx is set once started becomes true");
            self.spawn_relay(name, receiver, merge_tx);
        } else {
            inner.pending.insert(name, receiver);
        }
        Ok(())
    }

    /// Unregisters and closes a named input. Idempotent; the relay task
    /// (if any) winds down on its own once the closed pipe drains.
    pub fn remove(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending.remove(name);
        if let Some(handle) = inner.close_handles.remove(name) {
            handle.close();
        }
    }

    fn spawn_relay(&self, name: String, mut receiver: PipeReceiver<T>, merge_tx: mpsc::Sender<Tuple<T>>) {
        let stats = self.stats.clone();
        let active_relays = self.active_relays.clone();
        let stop_on_disconnect = self.stop_on_disconnect.clone();
        let inner = self.inner.clone();
        active_relays.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Some(tuple) => {
                        bump(&stats, &name, Bump::Received);
                        if merge_tx.send(tuple).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            if active_relays.fetch_sub(1, Ordering::SeqCst) == 1 && stop_on_disconnect.load(Ordering::SeqCst) {
                // Last relay just exited and no disconnect-driven restart
                // is possible (new inputs would have to come through
                // `add`, which still works fine after this). Dropping our
                // keepalive clone lets the merged channel close for real
                // once any other recently-spawned relays finish too.
                inner.lock().unwrap().keepalive = None;
            }
        });
    }

    /// Snapshot of per-input counters for `Status()` (spec.md §6).
    pub fn status(&self) -> StatusMap {
        let mut m = StatusMap::new();
        for (name, stats) in self.stats.lock().unwrap().iter() {
            m.insert(name.clone(), (*stats).into());
        }
        m
    }
}

impl<T: Send + 'static> DataSources<T> {
    /// Starts `parallelism` worker tasks pouring every registered (and
    /// subsequently added) input into `writer`, and blocks until they've
    /// all exited. `on_started` fires once workers are spawned but before
    /// this call blocks, mirroring the `newTraceWriter`/state-transition
    /// ordering in `default_sink_node.go`'s `run`.
    pub async fn pour<W>(
        &self,
        writer: W,
        parallelism: usize,
        on_started: impl FnOnce(),
    ) -> std::result::Result<(), EngineError>
    where
        W: Writer<T> + Clone + Send + 'static,
    {
        assert!(parallelism >= 1, "parallelism must be at least 1");

        let (merge_tx, merge_rx) = mpsc::channel::<Tuple<T>>(parallelism.max(1) * 4);
        let merge_rx = Arc::new(tokio::sync::Mutex::new(merge_rx));

        let pending = {
            let mut inner = self.inner.lock().unwrap();
            if inner.started {
                return Err(EngineError::LifecycleMisuse(format!(
                    "node '{}' is already pouring",
                    self.node_name
                )));
            }
            inner.started = true;
            inner.merge_tx = Some(merge_tx.clone());
            // An extra clone kept alive by `DataSources` itself, so the
            // merged channel does not close just because the currently
            // registered relays happen to hit zero (e.g. between one
            // input disconnecting and the next one being added) — unless
            // `stop_on_disconnect` is set, in which case we drop it below
            // as soon as that happens.
            inner.keepalive = Some(merge_tx.clone());
            std::mem::take(&mut inner.pending)
        };

        let had_no_inputs = pending.is_empty();
        for (name, receiver) in pending {
            self.spawn_relay(name, receiver, merge_tx.clone());
        }
        drop(merge_tx);

        if had_no_inputs && self.stop_on_disconnect.load(Ordering::SeqCst) {
            self.inner.lock().unwrap().keepalive = None;
        }

        let mut handles: Vec<JoinHandle<std::result::Result<(), EngineError>>> = Vec::with_capacity(parallelism);
        for _ in 0..parallelism {
            let merge_rx = merge_rx.clone();
            let stop_requested = self.stop_requested.clone();
            let stop_notify = self.stop_notify.clone();
            let stats = self.stats.clone();
            let graceful = self
                .graceful_stop
                .load(Ordering::SeqCst);
            let mut writer = writer.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(merge_rx, stop_requested, stop_notify, graceful, &mut writer, stats).await
            }));
        }

        on_started();

        let mut first_err = None;
        for h in handles {
            match h.await {
                Ok(Ok(())) => {}
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

        {
            let mut inner = self.inner.lock().unwrap();
            inner.merge_tx = None;
            inner.keepalive = None;
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Signals every worker to stop, then closes every registered input
    /// so producers upstream observe `PipeClosed` rather than blocking
    /// forever on a full buffer. With graceful stop disabled, workers
    /// exit as soon as they observe the signal, without draining what's
    /// already buffered.
    pub async fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();

        let handles: Vec<PipeCloseHandle<T>> = {
            let mut inner = self.inner.lock().unwrap();
            inner.closed = true;
            inner.pending.clear();
            inner.close_handles.drain().map(|(_, h)| h).collect()
        };
        for h in handles {
            h.close();
        }

        let mut inner = self.inner.lock().unwrap();
        inner.keepalive = None;
    }
}

async fn worker_loop<T, W>(
    merge_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Tuple<T>>>>,
    stop_requested: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    graceful: bool,
    writer: &mut W,
    stats: Arc<Mutex<HashMap<String, InputStats>>>,
) -> std::result::Result<(), EngineError>
where
    T: Send + 'static,
    W: Writer<T> + Clone + Send + 'static,
{
    let mut fatal: Option<EngineError> = None;

    loop {
        if stop_requested.load(Ordering::SeqCst) && !graceful && fatal.is_none() {
            return Ok(());
        }

        let recv_fut = async {
            let mut guard = merge_rx.lock().await;
            guard.recv().await
        };

        // `enable()` registers this waiter with `Notify` before we
        // re-check the flag, so a `stop()` landing between the flag
        // check above and this `select!` is never missed (`notify_waiters`
        // only wakes waiters already registered at the time it's called).
        let notified = stop_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if stop_requested.load(Ordering::SeqCst) && !graceful && fatal.is_none() {
            return Ok(());
        }
        tokio::select! {
            _ = notified.as_mut() => {
                // Loop back around; the flag check above decides what to
                // do next (exit immediately, or keep draining).
                continue;
            }
            maybe_tuple = recv_fut => {
                match maybe_tuple {
                    None => return match fatal {
                        Some(e) => Err(e),
                        None => Ok(()),
                    },
                    Some(tuple) => {
                        let input_name = tuple.input_name.clone();
                        if fatal.is_some() {
                            // Pure drainer: a prior write panicked. Keep
                            // consuming so the producer never blocks, but
                            // never call the (now possibly poisoned)
                            // writer again.
                            bump(&stats, &input_name, Bump::Dropped);
                            continue;
                        }

                        match call_writer_catching_panics(writer.clone(), tuple).await {
                            Ok(()) => bump(&stats, &input_name, Bump::Forwarded),
                            Err(EngineError::Temporary(e)) => {
                                tracing::warn!(input = %input_name, error = %e, "temporary write error; dropping tuple (retry unimplemented)");
                                bump(&stats, &input_name, Bump::Dropped);
                            }
                            Err(e) => {
                                let fatal_err = e.into_fatal();
                                tracing::error!(input = %input_name, error = %fatal_err, "fatal write error; switching to drain mode");
                                bump(&stats, &input_name, Bump::Dropped);
                                fatal = Some(fatal_err);
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Runs `writer.write(tuple)` on its own task so a panic inside user code
/// is caught as a `JoinError` rather than taking this worker down with
/// it, then converted into a `Fatal` `EngineError` (spec.md §7). This is
/// the Rust-idiomatic analogue of the Go worker's `recover()` around a
/// single `Write` call.
async fn call_writer_catching_panics<T, W>(mut writer: W, tuple: Tuple<T>) -> std::result::Result<(), EngineError>
where
    T: Send + 'static,
    W: Writer<T> + Send + 'static,
{
    match tokio::spawn(async move { writer.write(tuple).await }).await {
        Ok(result) => result,
        Err(join_err) => Err(EngineError::from_panic_payload(join_err.into_panic())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::pipe;
    use std::sync::atomic::AtomicBool as StdAtomicBool;

    #[derive(Clone)]
    struct CollectingWriter(Arc<Mutex<Vec<i32>>>);

    #[async_trait::async_trait]
    impl Writer<i32> for CollectingWriter {
        async fn write(&mut self, tuple: Tuple<i32>) -> std::result::Result<(), EngineError> {
            self.0.lock().unwrap().push(tuple.payload);
            Ok(())
        }
    }

    #[tokio::test]
    async fn pours_a_single_input_to_completion() {
        let ds = DataSources::new("box1");
        let (rx, tx) = pipe::<i32>("up", 4);
        ds.add("up", rx).unwrap();
        for i in 0..3 {
            tx.send(Tuple::new(i)).await.unwrap();
        }
        tx.close();

        let collected = Arc::new(Mutex::new(Vec::new()));
        let writer = CollectingWriter(collected.clone());
        let started = Arc::new(StdAtomicBool::new(false));
        let started2 = started.clone();
        ds.pour(writer, 2, move || started2.store(true, Ordering::SeqCst))
            .await
            .unwrap();

        assert!(started.load(Ordering::SeqCst));
        let mut got = collected.lock().unwrap().clone();
        got.sort();
        assert_eq!(got, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn add_after_pour_started_is_polled() {
        let ds = Arc::new(DataSources::new("box1"));
        let (rx1, tx1) = pipe::<i32>("a", 4);
        ds.add("a", rx1).unwrap();
        tx1.close();

        let collected = Arc::new(Mutex::new(Vec::new()));
        let writer = CollectingWriter(collected.clone());

        let ds2 = ds.clone();
        let (rx2, tx2) = pipe::<i32>("b", 4);
        let pour = tokio::spawn(async move { ds2.pour(writer, 1, || {}).await });

        tokio::task::yield_now().await;
        ds.add("b", rx2).unwrap();
        tx2.send(Tuple::new(99)).await.unwrap();
        tx2.close();

        pour.await.unwrap().unwrap();
        assert!(collected.lock().unwrap().contains(&99));
    }

    #[tokio::test]
    async fn stop_without_graceful_exits_promptly() {
        let ds = Arc::new(DataSources::new("box1"));
        let (_rx, _tx) = pipe::<i32>("a", 4);
        // No inputs added; pour should just idle until stop() is called.
        let collected = Arc::new(Mutex::new(Vec::new()));
        let writer = CollectingWriter(collected.clone());

        let ds2 = ds.clone();
        let pour = tokio::spawn(async move { ds2.pour(writer, 1, || {}).await });
        tokio::task::yield_now().await;
        ds.stop().await;
        pour.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn status_reports_forwarded_count() {
        let ds = DataSources::new("box1");
        let (rx, tx) = pipe::<i32>("up", 4);
        ds.add("up", rx).unwrap();
        tx.send(Tuple::new(1)).await.unwrap();
        tx.close();

        let collected = Arc::new(Mutex::new(Vec::new()));
        ds.pour(CollectingWriter(collected), 1, || {}).await.unwrap();

        let status = ds.status();
        match status.get("up") {
            Some(StatusValue::Map(m)) => {
                assert_eq!(m.get("forwarded"), Some(&StatusValue::UInt(1)));
            }
            other => panic!("unexpected status shape: {other:?}"),
        }
    }
}
