//! Report rendering over a day's attendance lines.

use chrono::{Local, NaiveDate};
use rollcall_core::{AttendanceRecord, AttendanceStatus};
use serde::Serialize;

use crate::ledger::{LedgerError, LedgerRow};

const LOW_ATTENDANCE_PERCENT: f64 = 80.0;

/// Anything that reads as one roster line: a fresh record or a stored row.
pub trait RosterLine {
    fn name(&self) -> &str;
    fn status(&self) -> AttendanceStatus;
    fn confidence(&self) -> &str;
}

impl RosterLine for AttendanceRecord {
    fn name(&self) -> &str {
        &self.name
    }
    fn status(&self) -> AttendanceStatus {
        self.status
    }
    fn confidence(&self) -> &str {
        &self.confidence
    }
}

impl RosterLine for LedgerRow {
    fn name(&self) -> &str {
        &self.name
    }
    fn status(&self) -> AttendanceStatus {
        self.status
    }
    fn confidence(&self) -> &str {
        &self.confidence
    }
}

/// Percent Present among Present + Absent, rounded to two decimals.
pub fn attendance_rate(present: usize, absent: usize) -> f64 {
    let counted = present + absent;
    if counted == 0 {
        return 0.0;
    }
    let rate = present as f64 / counted as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}

/// Render lines as a downloadable CSV document.
pub fn render_csv<L: RosterLine>(lines: &[L], date: NaiveDate) -> Result<String, LedgerError> {
    let generated_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let date = date.to_string();

    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(["Date", "Student Name", "Status", "Confidence", "Generated At"])?;
    for line in lines {
        wtr.write_record([
            date.as_str(),
            line.name(),
            line.status().as_str(),
            line.confidence(),
            generated_at.as_str(),
        ])?;
    }

    let bytes = wtr.into_inner().map_err(|e| LedgerError::Csv(e.into_error().into()))?;
    tracing::info!(%date, records = lines.len(), "generated CSV report");
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryReport {
    pub date: NaiveDate,
    pub total_records: usize,
    pub present: usize,
    pub absent: usize,
    pub unknown: usize,
    pub attendance_rate: f64,
    pub summary: String,
}

pub fn summary_report<L: RosterLine>(lines: &[L], date: NaiveDate) -> SummaryReport {
    let count = |status: AttendanceStatus| lines.iter().filter(|l| l.status() == status).count();
    let present = count(AttendanceStatus::Present);
    let absent = count(AttendanceStatus::Absent);
    let unknown = count(AttendanceStatus::Unknown);
    let rate = attendance_rate(present, absent);

    let summary = if lines.is_empty() {
        "No attendance data available".to_string()
    } else {
        let mut parts = Vec::new();
        if present > 0 {
            parts.push(format!("{present} students present"));
        }
        if absent > 0 {
            parts.push(format!("{absent} students absent"));
        }
        if unknown > 0 {
            parts.push(format!("{unknown} unknown persons detected"));
        }
        format!(
            "Class attendance for {date}: {}. Overall attendance rate: {rate:.1}%",
            parts.join(", ")
        )
    };

    SummaryReport {
        date,
        total_records: lines.len(),
        present,
        absent,
        unknown,
        attendance_rate: rate,
        summary,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailedReport {
    pub summary: SummaryReport,
    pub present: Vec<String>,
    pub absent: Vec<String>,
    pub unknown: Vec<String>,
    pub recommendations: Vec<String>,
}

pub fn detailed_report<L: RosterLine>(lines: &[L], date: NaiveDate) -> DetailedReport {
    let summary = summary_report(lines, date);
    let names = |status: AttendanceStatus| -> Vec<String> {
        lines
            .iter()
            .filter(|l| l.status() == status)
            .map(|l| l.name().to_string())
            .collect()
    };
    let present = names(AttendanceStatus::Present);
    let absent = names(AttendanceStatus::Absent);
    let unknown = names(AttendanceStatus::Unknown);

    let mut recommendations = Vec::new();
    if !lines.is_empty() {
        if summary.attendance_rate < LOW_ATTENDANCE_PERCENT {
            recommendations.push(
                "Low attendance rate detected. Consider following up with absent students.".to_string(),
            );
        }
        if !unknown.is_empty() {
            recommendations.push(format!(
                "{} unknown persons detected. Review class photo for unrecognized faces.",
                unknown.len()
            ));
        }
        if !absent.is_empty() {
            recommendations.push(format!("Follow up with {} absent students.", absent.len()));
        }
    }

    DetailedReport {
        summary,
        present,
        absent,
        unknown,
        recommendations,
    }
}

/// `<kind>_<date>_<YYYYmmdd_HHMMSS>.csv`
pub fn export_filename(date: NaiveDate, kind: &str) -> String {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    format!("{kind}_{date}_{stamp}.csv")
}
