use chrono::{Local, NaiveDate};
use rollcall_core::{AttendanceRecord, AttendanceStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::report::{attendance_rate, export_filename, render_csv};

const HEADER: [&str; 5] = ["Date", "Student Name", "Status", "Confidence", "Timestamp"];
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger csv: {0}")]
    Csv(#[from] csv::Error),
}

/// One stored attendance line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRow {
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Student Name")]
    pub name: String,
    #[serde(rename = "Status")]
    pub status: AttendanceStatus,
    #[serde(rename = "Confidence")]
    pub confidence: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
}

/// Aggregate over a date range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerSummary {
    pub total_records: usize,
    pub unique_students: usize,
    pub present: usize,
    pub absent: usize,
    pub unknown: usize,
    pub errored: usize,
    /// Percent of Present among Present + Absent, two decimals.
    pub attendance_rate: f64,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerStats {
    pub total_records: usize,
    pub total_dates: usize,
    pub total_students: usize,
    pub file_size: u64,
}

/// Append-only CSV history of taken rosters.
pub struct AttendanceLedger {
    path: PathBuf,
}

impl AttendanceLedger {
    /// Open the ledger, creating the file (with header) if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let ledger = Self { path: path.into() };
        if !ledger.path.exists() {
            if let Some(parent) = ledger.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| ledger.io_err(e))?;
            }
            ledger.write_all(&[])?;
            tracing::info!(path = %ledger.path.display(), "initialized attendance ledger");
        }
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row per record, sharing a timestamp. Returns rows written.
    pub fn record(&self, date: NaiveDate, records: &[AttendanceRecord]) -> Result<usize, LedgerError> {
        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;
        let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(file);

        for r in records {
            wtr.serialize(LedgerRow {
                date,
                name: r.name.clone(),
                status: r.status,
                confidence: r.confidence.clone(),
                timestamp: timestamp.clone(),
            })?;
        }
        wtr.flush().map_err(|e| self.io_err(e))?;

        tracing::info!(%date, rows = records.len(), "saved attendance");
        Ok(records.len())
    }

    /// Rows for `date`, ordered Present, Absent, Unknown, Error.
    pub fn records_for_date(&self, date: NaiveDate) -> Result<Vec<LedgerRow>, LedgerError> {
        let mut rows: Vec<LedgerRow> = self
            .read_all()?
            .into_iter()
            .filter(|r| r.date == date)
            .collect();
        rows.sort_by_key(|r| r.status.priority());
        Ok(rows)
    }

    /// Distinct dates, newest first.
    pub fn dates(&self) -> Result<Vec<NaiveDate>, LedgerError> {
        let dates: BTreeSet<NaiveDate> = self.read_all()?.into_iter().map(|r| r.date).collect();
        Ok(dates.into_iter().rev().collect())
    }

    /// Every row for one student, newest date first.
    pub fn student_history(&self, name: &str) -> Result<Vec<LedgerRow>, LedgerError> {
        let mut rows: Vec<LedgerRow> = self
            .read_all()?
            .into_iter()
            .filter(|r| r.name == name)
            .collect();
        rows.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(rows)
    }

    /// Summary over an optional inclusive date range; `None` when nothing matches.
    pub fn summary(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Option<LedgerSummary>, LedgerError> {
        let rows: Vec<LedgerRow> = self
            .read_all()?
            .into_iter()
            .filter(|r| start.map_or(true, |s| r.date >= s) && end.map_or(true, |e| r.date <= e))
            .collect();

        let (Some(first_date), Some(last_date)) = (
            rows.iter().map(|r| r.date).min(),
            rows.iter().map(|r| r.date).max(),
        ) else {
            return Ok(None);
        };

        let count = |status: AttendanceStatus| rows.iter().filter(|r| r.status == status).count();
        let present = count(AttendanceStatus::Present);
        let absent = count(AttendanceStatus::Absent);
        let students: BTreeSet<&str> = rows.iter().map(|r| r.name.as_str()).collect();

        Ok(Some(LedgerSummary {
            total_records: rows.len(),
            unique_students: students.len(),
            present,
            absent,
            unknown: count(AttendanceStatus::Unknown),
            errored: count(AttendanceStatus::Error),
            attendance_rate: attendance_rate(present, absent),
            first_date,
            last_date,
        }))
    }

    /// Remove every row for `date`. Returns how many were removed.
    pub fn delete_date(&self, date: NaiveDate) -> Result<usize, LedgerError> {
        let rows = self.read_all()?;
        let before = rows.len();
        let kept: Vec<LedgerRow> = rows.into_iter().filter(|r| r.date != date).collect();
        let removed = before - kept.len();

        self.write_all(&kept)?;
        tracing::info!(%date, removed, "deleted attendance records");
        Ok(removed)
    }

    /// Copy the ledger to `dest`, or to a timestamped file beside it.
    pub fn export(&self, dest: Option<&Path>) -> Result<PathBuf, LedgerError> {
        let dest = match dest {
            Some(d) => d.to_path_buf(),
            None => {
                let stamp = Local::now().format("%Y%m%d_%H%M%S");
                self.path
                    .with_file_name(format!("attendance_export_{stamp}.csv"))
            }
        };
        std::fs::copy(&self.path, &dest).map_err(|e| self.io_err(e))?;
        tracing::info!(dest = %dest.display(), "exported attendance data");
        Ok(dest)
    }

    /// Write the day's report CSV to `dest`, or to a timestamped
    /// `attendance_<date>_*.csv` beside the ledger.
    pub fn export_report(&self, date: NaiveDate, dest: Option<&Path>) -> Result<PathBuf, LedgerError> {
        let rows = self.records_for_date(date)?;
        let dest = match dest {
            Some(d) => d.to_path_buf(),
            None => self.path.with_file_name(export_filename(date, "attendance")),
        };
        let content = render_csv(&rows, date)?;
        std::fs::write(&dest, content).map_err(|e| self.io_err(e))?;
        tracing::info!(%date, dest = %dest.display(), rows = rows.len(), "wrote attendance report");
        Ok(dest)
    }

    pub fn stats(&self) -> Result<LedgerStats, LedgerError> {
        if !self.path.exists() {
            return Ok(LedgerStats::default());
        }
        let rows = self.read_all()?;
        let dates: BTreeSet<NaiveDate> = rows.iter().map(|r| r.date).collect();
        let students: BTreeSet<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        let file_size = std::fs::metadata(&self.path)
            .map_err(|e| self.io_err(e))?
            .len();

        Ok(LedgerStats {
            total_records: rows.len(),
            total_dates: dates.len(),
            total_students: students.len(),
            file_size,
        })
    }

    fn read_all(&self) -> Result<Vec<LedgerRow>, LedgerError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut rdr = csv::Reader::from_path(&self.path)?;
        let rows = rdr.deserialize().collect::<Result<Vec<LedgerRow>, _>>()?;
        Ok(rows)
    }

    /// Replace the file contents via a temporary sibling.
    fn write_all(&self, rows: &[LedgerRow]) -> Result<(), LedgerError> {
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut wtr = csv::WriterBuilder::new().has_headers(false).from_path(&tmp)?;
        wtr.write_record(HEADER)?;
        for row in rows {
            wtr.serialize(row)?;
        }
        wtr.flush().map_err(|e| self.io_err(e))?;
        drop(wtr);

        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))
    }

    fn io_err(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
