//! Domain model (records, session state, outcomes, error classification).

pub mod errors;
pub mod outcome;
pub mod record;
pub mod session;

pub use self::errors::{CycleFailure, ErrorKind};
pub use self::outcome::{CycleOutcome, CycleStats, ExtractionStatus};
pub use self::record::{InvalidRecord, Record, RecordStatus, UNKNOWN_TIME_POSTED};
pub use self::session::{AuthMethod, SessionPhase, SessionState};
