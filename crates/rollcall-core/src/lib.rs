//! rollcall-core: Attendance reconciliation engine.
//!
//! Turns the faces an external detector finds in a class photo into an
//! ordered attendance roster against a gallery of known people.

pub mod analyzer;
pub mod attendance;
pub mod dedup;
pub mod gallery;
pub mod matcher;
pub mod roster;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer};
pub use attendance::{take_attendance, AttendanceOutcome};
pub use gallery::{Gallery, GalleryError, GalleryStatus, GalleryStore, RebuildReport};
pub use matcher::{MatchOutcome, Matcher};
pub use roster::{build_roster, ReconcilePolicy, Roster, RosterSummary, RosterUnavailable};
pub use types::{AttendanceRecord, AttendanceStatus, BoundingBox, Detection, Embedding, GalleryEntry};
