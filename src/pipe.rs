//! A single-producer, single-consumer bounded FIFO between two nodes
//! (spec.md §4.1).
//!
//! Grounded in `original_source/core/dynamic_pipe.go`
//! (`dynamicPipeReceiver`/`dynamicPipeSender`): exactly one send-handle
//! and one receive-handle reference the same bounded buffer. Closing is
//! only ever safe from the sender side; the receiver's `close` routes to
//! the sender instead of touching the channel directly, because
//! `tokio::sync::mpsc`, like a Go `chan`, only tolerates a single closer.
//! Concretely: the underlying `mpsc::Sender` lives behind a shared
//! `Option`, and "closing" means taking it out and dropping it, which is
//! what actually makes the channel observe end-of-stream on the receive
//! side (setting a boolean flag alone wouldn't stop `Receiver::recv` from
//! blocking forever).

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::error::EngineError;
use crate::tuple::{Tuple, Writer};

type SharedSender<T> = Arc<Mutex<Option<mpsc::Sender<Tuple<T>>>>>;

/// The send half of a pipe. `send` fails with `EngineError::PipeClosed`
/// if this side has been closed; otherwise it tags the tuple with
/// `input_name` and enqueues, blocking if the buffer is full. Never
/// panics (spec.md §4.1).
pub struct PipeSender<T> {
    input_name: String,
    inner: SharedSender<T>,
}

impl<T> Clone for PipeSender<T> {
    /// All clones share the same underlying close state, so closing any
    /// one of them closes the pipe for every clone — there is still
    /// exactly one logical send-handle (spec.md §4.1), just possibly
    /// multiple references to it (needed so a fan-out writer can hold a
    /// sender across an `.await` without pinning a lock over the whole
    /// destination map).
    fn clone(&self) -> Self {
        PipeSender {
            input_name: self.input_name.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> PipeSender<T> {
    pub async fn send(&self, mut tuple: Tuple<T>) -> std::result::Result<(), EngineError> {
        let maybe_tx = self.inner.lock().unwrap().clone();
        let tx = maybe_tx.ok_or(EngineError::PipeClosed)?;
        tuple.input_name = self.input_name.clone();
        tx.send(tuple).await.map_err(|_| EngineError::PipeClosed)
    }

    /// Idempotent: takes the shared sender out (dropping the channel's
    /// last write handle) exactly once. Subsequent calls are no-ops.
    pub fn close(&self) {
        self.inner.lock().unwrap().take();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().is_none()
    }
}

#[async_trait::async_trait]
impl<T: Send + 'static> Writer<T> for PipeSender<T> {
    async fn write(&mut self, tuple: Tuple<T>) -> std::result::Result<(), EngineError> {
        self.send(tuple).await
    }
}

/// The receive half of a pipe. `recv` drains all already-enqueued tuples
/// before observing end-of-stream (spec.md §4.1(b)). `close` does not
/// touch the buffer directly; it drops the shared sender handle, which
/// is the only safe way to terminate the pipe (spec.md §4.1(c)).
pub struct PipeReceiver<T> {
    input: mpsc::Receiver<Tuple<T>>,
    sender: SharedSender<T>,
}

impl<T: Send + 'static> PipeReceiver<T> {
    /// Returns the next tuple, or `None` at end-of-stream.
    pub async fn recv(&mut self) -> Option<Tuple<T>> {
        self.input.recv().await
    }

    /// Requests that the sender close. This is the *only* safe way for a
    /// receiver to stop the pipe (spec.md §4.1).
    pub fn close(&self) {
        self.sender.lock().unwrap().take();
    }

    /// A detached handle that can close this pipe's sender without
    /// holding on to the receive half itself. `DataSources` uses this to
    /// retain the ability to `remove` a named input after the matching
    /// `PipeReceiver` has already been moved into a relay task.
    pub fn close_handle(&self) -> PipeCloseHandle<T> {
        PipeCloseHandle {
            sender: self.sender.clone(),
        }
    }
}

/// See [`PipeReceiver::close_handle`].
pub struct PipeCloseHandle<T> {
    sender: SharedSender<T>,
}

impl<T> PipeCloseHandle<T> {
    pub fn close(&self) {
        self.sender.lock().unwrap().take();
    }
}

/// Constructs a pipe bound to `input_name`, with the given bounded
/// capacity (`C >= 1`).
pub fn pipe<T: Send + 'static>(
    input_name: impl Into<String>,
    capacity: usize,
) -> (PipeReceiver<T>, PipeSender<T>) {
    assert!(capacity >= 1, "pipe capacity must be at least 1");
    let (tx, rx) = mpsc::channel(capacity);
    let shared = Arc::new(Mutex::new(Some(tx)));
    let sender = PipeSender {
        input_name: input_name.into(),
        inner: shared.clone(),
    };
    let receiver = PipeReceiver {
        input: rx,
        sender: shared,
    };
    (receiver, sender)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let (mut rx, tx) = pipe::<i32>("a", 4);
        for i in 0..4 {
            tx.send(Tuple::new(i)).await.unwrap();
        }
        for i in 0..4 {
            assert_eq!(rx.recv().await.unwrap().payload, i);
        }
    }

    #[tokio::test]
    async fn send_tags_input_name() {
        let (mut rx, tx) = pipe::<i32>("upstream", 1);
        tx.send(Tuple::new(7)).await.unwrap();
        let t = rx.recv().await.unwrap();
        assert_eq!(t.input_name, "upstream");
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (_rx, tx) = pipe::<i32>("a", 1);
        tx.close();
        let err = tx.send(Tuple::new(1)).await.unwrap_err();
        assert!(err.is_pipe_closed());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (_rx, tx) = pipe::<i32>("a", 1);
        tx.close();
        tx.close();
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn receiver_drains_before_eos() {
        let (mut rx, tx) = pipe::<i32>("a", 4);
        tx.send(Tuple::new(1)).await.unwrap();
        tx.send(Tuple::new(2)).await.unwrap();
        tx.close();
        assert_eq!(rx.recv().await.unwrap().payload, 1);
        assert_eq!(rx.recv().await.unwrap().payload, 2);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn receiver_close_signals_sender() {
        let (rx, tx) = pipe::<i32>("a", 1);
        rx.close();
        let err = tx.send(Tuple::new(1)).await.unwrap_err();
        assert!(err.is_pipe_closed());
    }

    #[tokio::test]
    async fn concurrent_close_from_both_sides_is_safe() {
        let (rx, tx) = pipe::<i32>("a", 1);
        let tx = Arc::new(tx);
        let rx = Arc::new(rx);
        let (tx2, rx2) = (tx.clone(), rx.clone());
        let h1 = tokio::spawn(async move { tx2.close() });
        let h2 = tokio::spawn(async move { rx2.close() });
        h1.await.unwrap();
        h2.await.unwrap();
        assert!(tx.is_closed());
    }
}
