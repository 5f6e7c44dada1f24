//! The debugger core: breakpoint and marker tables, the hit test, event fan-out and register
//! introspection.

use thiserror::Error;

use crate::addr::AddrError;

pub mod breakpoints;
pub mod debugger;
pub mod markers;
pub mod notify;
pub mod registers;

use breakpoints::DEFAULT_INDEX_THRESHOLD;
use markers::{MarkerId, DEFAULT_MARKER_CAPACITY};

/// An error for the debugger core. All of these mean "nothing was created or changed".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DbgError {
    #[error("table full, maximum of {capacity} already used")]
    CapacityExceeded { capacity: usize },
    #[error("marker {0} is already in progress")]
    MarkerAlreadyInProgress(MarkerId),
    #[error("marker {0} does not exist or is not in progress")]
    MarkerNotFound(MarkerId),
    #[error("no marker is in progress")]
    NoMarkerInProgress,
    #[error(transparent)]
    Translate(#[from] AddrError),
}

/// Type alias for Result<T, [DbgError]>.
pub type DResult<T> = Result<T, DbgError>;

/// Sizing of the debugger tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebuggerConfig {
    pub breakpoint_capacity: usize,
    /// Enabled CPU-execution breakpoints above this count are looked up by address.
    pub exec_index_threshold: usize,
    pub marker_capacity: usize,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            breakpoint_capacity: 32,
            exec_index_threshold: DEFAULT_INDEX_THRESHOLD,
            marker_capacity: DEFAULT_MARKER_CAPACITY,
        }
    }
}
