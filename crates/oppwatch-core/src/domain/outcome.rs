//! Outcome model: what one cycle reports back to the supervisor.

use super::errors::{CycleFailure, ErrorKind};

/// Whether the card list showed up before the extraction wait ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStatus {
    Found,
    /// No card marker appeared in time. Not an error: the dashboard may
    /// simply have no postings.
    TimedOut,
}

/// Counters for a successful cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    /// Valid records extracted from the page.
    pub total: usize,
    /// Records whose id was not in the seen-store.
    pub new: usize,
    /// New records whose notification went out.
    pub notified: usize,
    /// Size of the seen-store after the cycle.
    pub tracked: usize,
    pub extraction: ExtractionStatus,
}

impl CycleStats {
    pub fn empty(extraction: ExtractionStatus, tracked: usize) -> Self {
        Self {
            total: 0,
            new: 0,
            notified: 0,
            tracked,
            extraction,
        }
    }
}

/// Result of one check. Failures never escape a cycle as a raised error;
/// they arrive here as a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Success(CycleStats),
    Failure(CycleFailure),
}

impl CycleOutcome {
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        CycleOutcome::Failure(CycleFailure::new(kind, message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CycleOutcome::Success(_))
    }
}
