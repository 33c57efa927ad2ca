//! Error taxonomy for the dataflow engine.
//!
//! mini-redis gets away with a single boxed `std::error::Error` because a
//! protocol error always terminates the one connection that hit it. A
//! dataflow node needs finer classification: a `Write` failure has to tell
//! its caller whether the node is dead (`Fatal`), whether the tuple should
//! just be retried later (`Temporary`), or whether only the one tuple is
//! bad (`Unclassified`). The classification is by wrapper type, mirroring
//! `IsFatalError`/`IsTemporaryError` in sensorbee's `core` package.

use std::fmt;

/// Error returned by most functions in this crate.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// A specialized `Result` type for tupleflow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Wraps an error with a classification the engine acts on.
#[derive(Debug)]
pub enum EngineError {
    /// The pipe's send side has been closed. Never surfaced as a user
    /// error; it's the normal end-of-stream signal (spec.md §7).
    PipeClosed,

    /// The node cannot continue; it terminates and the error is routed to
    /// fatal listeners.
    Fatal(Error),

    /// Transient; currently logged and dropped. Retry is a documented
    /// TODO (spec.md §9, Open Question) — not implemented here.
    Temporary(Error),

    /// Per-tuple error with no further meaning; logged at Warning and the
    /// tuple is dropped.
    Unclassified(Error),

    /// Stateful box `Init` failed during `Run`; previously-initialized
    /// boxes are rolled back in reverse order.
    InitFailure(Error),

    /// Caller misused the lifecycle API: `Run` while running, `Input`
    /// after close, duplicate `add`, etc. Returned directly to the caller,
    /// never routed anywhere.
    LifecycleMisuse(String),

    /// One or more sources refused to stop. The topology still
    /// transitions to `Stopped`; this error just reports which sources.
    StopFailure(Vec<String>),
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Fatal(_))
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, EngineError::Temporary(_))
    }

    pub fn is_pipe_closed(&self) -> bool {
        matches!(self, EngineError::PipeClosed)
    }

    /// Wraps `err` as fatal unless it already carries a classification,
    /// which is preserved. Used when an inner `Result<_, EngineError>`
    /// needs to be forced fatal without losing a more specific kind.
    pub fn into_fatal(self) -> EngineError {
        match self {
            EngineError::Fatal(_) => self,
            EngineError::Temporary(e) | EngineError::Unclassified(e) => EngineError::Fatal(e),
            other => other,
        }
    }

    /// Converts a caught panic payload into a `Fatal` error. An existing
    /// error preserves its classification (defaulted to Fatal if it
    /// wasn't already classified); any other payload becomes
    /// `Fatal("unknown error through panic: <v>")`, per spec.md §4.7.
    pub fn from_panic_payload(payload: Box<dyn std::any::Any + Send>) -> EngineError {
        if let Some(err) = payload.downcast_ref::<EngineError>() {
            return match err {
                EngineError::Fatal(_) => EngineError::Fatal(format!("{err}").into()),
                EngineError::Temporary(_) | EngineError::Unclassified(_) => {
                    EngineError::Fatal(format!("{err}").into())
                }
                _ => EngineError::Fatal(format!("{err}").into()),
            };
        }
        if let Some(s) = payload.downcast_ref::<&str>() {
            return EngineError::Fatal(format!("unknown error through panic: {s}").into());
        }
        if let Some(s) = payload.downcast_ref::<String>() {
            return EngineError::Fatal(format!("unknown error through panic: {s}").into());
        }
        EngineError::Fatal("unknown error through panic: <opaque payload>".into())
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::PipeClosed => write!(f, "pipe closed"),
            EngineError::Fatal(e) => write!(f, "fatal error: {e}"),
            EngineError::Temporary(e) => write!(f, "temporary error: {e}"),
            EngineError::Unclassified(e) => write!(f, "unclassified error: {e}"),
            EngineError::InitFailure(e) => write!(f, "init failure: {e}"),
            EngineError::LifecycleMisuse(s) => write!(f, "lifecycle misuse: {s}"),
            EngineError::StopFailure(names) => {
                write!(f, "{} sources couldn't be stopped: {}", names.len(), names.join(", "))
            }
        }
    }
}

impl std::error::Error for EngineError {}

/// Aggregates several errors into one, grounded in `bulkErrors` from
/// `original_source/core/dynamic_pipe.go` / `default_static_topology.go`.
/// `DataDestinations::write`/`close` use this to report failures across
/// many destinations without losing per-destination detail.
#[derive(Debug, Default)]
pub struct BulkError {
    errors: Vec<String>,
}

impl BulkError {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn append(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns `None` when nothing was appended, mirroring
    /// `bulkErrors.returnError`'s `nil`-on-empty behavior.
    pub fn into_result(self) -> Option<BulkError> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Display for BulkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.errors.join("; "))
    }
}

impl std::error::Error for BulkError {}
