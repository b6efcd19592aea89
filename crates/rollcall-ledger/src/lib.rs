//! rollcall-ledger: Attendance history and reports.
//!
//! Keeps every roster ever taken in a flat CSV file and derives per-date,
//! per-student and range summaries from it.

pub mod ledger;
pub mod report;

pub use ledger::{AttendanceLedger, LedgerError, LedgerRow, LedgerStats, LedgerSummary};
pub use report::{DetailedReport, RosterLine, SummaryReport};
