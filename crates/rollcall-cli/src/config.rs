use anyhow::{Context, Result};
use rollcall_core::ReconcilePolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// CLI configuration: defaults, then an optional TOML file named by
/// `ROLLCALL_CONFIG`, then `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory with one reference photo per student.
    pub reference_dir: PathBuf,
    /// Persisted gallery snapshot.
    pub snapshot_path: PathBuf,
    /// Attendance history CSV.
    pub ledger_path: PathBuf,
    /// External face analyzer program, invoked as `<program> [args...] <image>`.
    pub analyzer_command: Option<String>,
    pub analyzer_args: Vec<String>,
    pub policy: ReconcilePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reference_dir: PathBuf::from("dataset"),
            snapshot_path: PathBuf::from("models/gallery.json"),
            ledger_path: PathBuf::from("attendance/attendance.csv"),
            analyzer_command: None,
            analyzer_args: Vec::new(),
            policy: ReconcilePolicy::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env(&mut self) {
        if let Some(dir) = env_path("ROLLCALL_REFERENCE_DIR") {
            self.reference_dir = dir;
        }
        if let Some(path) = env_path("ROLLCALL_SNAPSHOT_PATH") {
            self.snapshot_path = path;
        }
        if let Some(path) = env_path("ROLLCALL_LEDGER_PATH") {
            self.ledger_path = path;
        }
        if let Ok(cmd) = std::env::var("ROLLCALL_ANALYZER_COMMAND") {
            self.analyzer_command = Some(cmd);
        }
        let policy = &mut self.policy;
        policy.match_tolerance = env_f32("ROLLCALL_MATCH_TOLERANCE", policy.match_tolerance);
        policy.acceptance_threshold =
            env_f32("ROLLCALL_ACCEPTANCE_THRESHOLD", policy.acceptance_threshold);
        policy.dedup_radius_px = env_f32("ROLLCALL_DEDUP_RADIUS_PX", policy.dedup_radius_px);
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
