//! Node and topology lifecycle state, spec.md §4.4.
//!
//! The teacher's `shutdown.rs` layers a boolean latch over a
//! `broadcast::Receiver` for a single fixed signal ("has shutdown been
//! requested?"). A node's lifecycle needs the same publish/wait shape but
//! over a five-value, strictly-increasing state, so `wait(target)` has to
//! compare against an arbitrary target rather than react to one event.
//! That's implemented here with a `Mutex<NodeState>` guarding the current
//! value plus a `tokio::sync::Notify` to wake waiters, rather than a
//! broadcast channel (which would need re-subscription on every
//! transition to avoid missing one).

use std::sync::Mutex;

use tokio::sync::Notify;

use crate::error::EngineError;

/// `Initialized → Starting → Running → Stopping → Stopped`. Transitions
/// are linear and monotonic; `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeState {
    Initialized,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Initialized => "initialized",
            NodeState::Starting => "starting",
            NodeState::Running => "running",
            NodeState::Stopping => "stopping",
            NodeState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State holder shared between a node (or a topology) and anyone
/// observing it. Every transition goes through `set`, so wake-ups are
/// consistent with last-writer-wins ordering (spec.md §5).
#[derive(Debug)]
pub struct StateHolder {
    state: Mutex<NodeState>,
    notify: Notify,
}

impl Default for StateHolder {
    fn default() -> Self {
        Self::new()
    }
}

impl StateHolder {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NodeState::Initialized),
            notify: Notify::new(),
        }
    }

    pub fn get(&self) -> NodeState {
        *self.state.lock().unwrap()
    }

    pub fn set(&self, s: NodeState) {
        {
            let mut guard = self.state.lock().unwrap();
            *guard = s;
        }
        // Wake everyone; spurious wake-ups are safe because callers
        // re-check `get() >= target` after waking.
        self.notify.notify_waiters();
    }

    /// Blocks until the current state is `>= target` in the linear order.
    pub async fn wait(&self, target: NodeState) -> NodeState {
        loop {
            let current = self.get();
            if current >= target {
                return current;
            }
            let notified = self.notify.notified();
            // Re-check after registering interest to avoid missing a
            // transition that happened between the first `get` and here.
            if self.get() >= target {
                return self.get();
            }
            notified.await;
        }
    }

    /// Initialized → Starting, atomically. Fails if the node is already
    /// running or stopped, returning the observed state alongside the
    /// `LifecycleMisuse` error.
    pub fn check_and_prepare_for_running(&self) -> std::result::Result<(), (NodeState, EngineError)> {
        let mut guard = self.state.lock().unwrap();
        match *guard {
            NodeState::Initialized => {
                *guard = NodeState::Starting;
                drop(guard);
                self.notify.notify_waiters();
                Ok(())
            }
            other => Err((
                other,
                EngineError::LifecycleMisuse(format!(
                    "cannot start: node is already in state {other}"
                )),
            )),
        }
    }

    /// Running → Stopping (or Starting → Stopping if `allow_from_starting`).
    /// Returns `(was_already_stopped, ())`; idempotent when the node is
    /// already stopping or stopped.
    pub fn check_and_prepare_for_stopping(
        &self,
        allow_from_starting: bool,
    ) -> std::result::Result<bool, EngineError> {
        let mut guard = self.state.lock().unwrap();
        match *guard {
            NodeState::Stopped => Ok(true),
            NodeState::Stopping => Ok(false),
            NodeState::Running => {
                *guard = NodeState::Stopping;
                drop(guard);
                self.notify.notify_waiters();
                Ok(false)
            }
            NodeState::Starting if allow_from_starting => {
                *guard = NodeState::Stopping;
                drop(guard);
                self.notify.notify_waiters();
                Ok(false)
            }
            other => Err(EngineError::LifecycleMisuse(format!(
                "cannot stop: node is in state {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn states_are_ordered() {
        assert!(NodeState::Initialized < NodeState::Starting);
        assert!(NodeState::Starting < NodeState::Running);
        assert!(NodeState::Running < NodeState::Stopping);
        assert!(NodeState::Stopping < NodeState::Stopped);
    }

    #[tokio::test]
    async fn wait_returns_immediately_once_already_reached() {
        let holder = StateHolder::new();
        holder.set(NodeState::Running);
        let reached = holder.wait(NodeState::Starting).await;
        assert_eq!(reached, NodeState::Running);
    }

    #[tokio::test]
    async fn wait_wakes_up_on_later_transition() {
        let holder = Arc::new(StateHolder::new());
        let waiter = {
            let holder = holder.clone();
            tokio::spawn(async move { holder.wait(NodeState::Stopped).await })
        };
        // Give the waiter a chance to register before we transition.
        tokio::task::yield_now().await;
        holder.set(NodeState::Running);
        holder.set(NodeState::Stopping);
        holder.set(NodeState::Stopped);
        let reached = waiter.await.unwrap();
        assert_eq!(reached, NodeState::Stopped);
    }

    #[test]
    fn check_and_prepare_for_running_rejects_reentry() {
        let holder = StateHolder::new();
        holder.check_and_prepare_for_running().unwrap();
        let err = holder.check_and_prepare_for_running();
        assert!(err.is_err());
    }

    #[test]
    fn check_and_prepare_for_stopping_is_idempotent() {
        let holder = StateHolder::new();
        holder.set(NodeState::Running);
        let first = holder.check_and_prepare_for_stopping(false).unwrap();
        assert!(!first);
        holder.set(NodeState::Stopped);
        let second = holder.check_and_prepare_for_stopping(false).unwrap();
        assert!(second);
    }
}
