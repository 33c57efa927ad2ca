//! Per-producer multiplexer that duplicates tuples to many destinations
//! and prunes dead ones (spec.md §4.3).
//!
//! Grounded in `original_source/core/dynamic_pipe.go`'s
//! `dynamicDataDestinations`: a `RwLock`-guarded map from destination
//! name to sender, a write path that takes the read lock for the common
//! case and only upgrades to the write lock to prune destinations whose
//! send failed with `PipeClosed`.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{BulkError, EngineError};
use crate::pipe::PipeSender;
use crate::tuple::Tuple;

pub struct DataDestinations<T> {
    node_name: String,
    dsts: RwLock<Option<HashMap<String, PipeSender<T>>>>,
}

impl<T: Clone + Send + 'static> DataDestinations<T> {
    pub fn new(node_name: impl Into<String>) -> Self {
        DataDestinations {
            node_name: node_name.into(),
            dsts: RwLock::new(Some(HashMap::new())),
        }
    }

    /// Registers an outbound edge. Fails if already closed or the name
    /// collides with an existing destination.
    pub fn add(&self, name: impl Into<String>, sender: PipeSender<T>) -> std::result::Result<(), EngineError> {
        let name = name.into();
        let mut guard = self.dsts.write().unwrap();
        let map = guard.as_mut().ok_or_else(|| {
            EngineError::LifecycleMisuse(format!("node '{}' already closed its output", self.node_name))
        })?;
        if map.contains_key(&name) {
            return Err(EngineError::LifecycleMisuse(format!(
                "node '{}' already has the destination '{}'",
                self.node_name, name
            )));
        }
        map.insert(name, sender);
        Ok(())
    }

    /// Unregisters and closes the edge. Idempotent.
    pub fn remove(&self, name: &str) {
        let mut guard = self.dsts.write().unwrap();
        if let Some(map) = guard.as_mut() {
            if let Some(sender) = map.remove(name) {
                sender.close();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.dsts.read().unwrap().as_ref().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once `close` has taken the destination map, i.e. no further
    /// write will ever reach a real destination again.
    pub fn is_closed(&self) -> bool {
        self.dsts.read().unwrap().is_none()
    }

    /// For each destination, sends either the tuple directly (single
    /// destination) or a deep copy. Destinations whose send fails with
    /// `PipeClosed` are pruned afterward under the write lock and never
    /// reported upward; any other error is aggregated.
    pub async fn write(&self, tuple: Tuple<T>) -> std::result::Result<(), BulkError> {
        // Collect a snapshot of (name, sender) under the read lock, then
        // release it before the async sends so slow destinations don't
        // block `add`/`remove` on other edges.
        let snapshot: Vec<(String, PipeSender<T>)> = {
            let guard = self.dsts.read().unwrap();
            match guard.as_ref() {
                Some(map) => map.iter().map(|(n, s)| (n.clone(), s.clone())).collect(),
                None => return Ok(()),
            }
        };

        let mut closed = Vec::new();
        let mut errors = BulkError::new();

        if snapshot.len() <= 1 {
            // Single destination (or none): the tuple is moved directly,
            // no copy needed (spec.md §4.3 copy policy).
            if let Some((name, sender)) = snapshot.into_iter().next() {
                match sender.send(tuple).await {
                    Ok(()) => {}
                    Err(EngineError::PipeClosed) => closed.push(name),
                    Err(other) => errors.append(format!("a tuple cannot be written to {name}: {other}")),
                }
            }
        } else {
            for (name, sender) in snapshot {
                match sender.send(tuple.deep_copy()).await {
                    Ok(()) => {}
                    Err(EngineError::PipeClosed) => closed.push(name),
                    Err(other) => errors.append(format!("a tuple cannot be written to {name}: {other}")),
                }
            }
        }

        if !closed.is_empty() {
            let mut guard = self.dsts.write().unwrap();
            if let Some(map) = guard.as_mut() {
                for name in closed {
                    map.remove(&name);
                }
            }
        }

        match errors.into_result() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Closes all destinations and marks the multiplexer closed.
    pub fn close(&self) {
        let mut guard = self.dsts.write().unwrap();
        if let Some(map) = guard.take() {
            for (_, sender) in map {
                sender.close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::pipe;

    #[tokio::test]
    async fn single_destination_receives_tuple() {
        let dd = DataDestinations::new("src");
        let (mut rx, tx) = pipe::<i32>("src", 4);
        dd.add("k1", tx).unwrap();
        dd.write(Tuple::new(42)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().payload, 42);
    }

    #[tokio::test]
    async fn fan_out_duplicates_to_all() {
        let dd = DataDestinations::new("src");
        let (mut rx1, tx1) = pipe::<i32>("src", 4);
        let (mut rx2, tx2) = pipe::<i32>("src", 4);
        dd.add("k1", tx1).unwrap();
        dd.add("k2", tx2).unwrap();
        dd.write(Tuple::new(1)).await.unwrap();
        assert_eq!(rx1.recv().await.unwrap().payload, 1);
        assert_eq!(rx2.recv().await.unwrap().payload, 1);
    }

    #[tokio::test]
    async fn closed_destination_is_pruned_without_error() {
        let dd = DataDestinations::new("src");
        let (rx1, tx1) = pipe::<i32>("src", 4);
        let (mut rx2, tx2) = pipe::<i32>("src", 4);
        dd.add("k1", tx1).unwrap();
        dd.add("k2", tx2).unwrap();
        rx1.close();
        // Give the close a moment to take effect before writing.
        tokio::task::yield_now().await;
        dd.write(Tuple::new(9)).await.unwrap();
        assert_eq!(rx2.recv().await.unwrap().payload, 9);
        assert_eq!(dd.len(), 1);
    }

    #[test]
    fn duplicate_add_fails() {
        let dd = DataDestinations::new("src");
        let (_rx, tx) = pipe::<i32>("src", 4);
        let (_rx2, tx2) = pipe::<i32>("src", 4);
        dd.add("k1", tx).unwrap();
        assert!(dd.add("k1", tx2).is_err());
    }

    #[test]
    fn is_closed_reflects_close() {
        let dd = DataDestinations::<i32>::new("src");
        assert!(!dd.is_closed());
        dd.close();
        assert!(dd.is_closed());
    }
}
