//! Audit trail — one JSON line per processing decision.
//!
//! Every processed message appends a record to the daily audit file,
//! followed by a run summary line at the end of each batch. Write
//! failures are logged and swallowed; an audit hiccup must never take
//! down a run.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::LoggingConfig;
use crate::error::ConfigError;
use crate::pipeline::types::ProcessingRecord;

/// Reply text is truncated to this many chars in the audit file.
const REPLY_LOG_LIMIT: usize = 500;

#[derive(Serialize)]
struct RunSummary<'a> {
    timestamp: chrono::DateTime<Utc>,
    #[serde(rename = "type")]
    kind: &'static str,
    run_id: Uuid,
    dry_run: bool,
    total_processed: usize,
    outcome_counts: HashMap<&'a str, usize>,
    errors: usize,
}

pub struct AuditLogger {
    log_dir: PathBuf,
}

impl AuditLogger {
    pub fn new(config: &LoggingConfig) -> Result<Self, ConfigError> {
        let log_dir = PathBuf::from(&config.log_dir);
        fs::create_dir_all(&log_dir)?;
        Ok(Self { log_dir })
    }

    fn audit_file(&self) -> PathBuf {
        self.log_dir
            .join(format!("audit_{}.jsonl", Utc::now().format("%Y-%m-%d")))
    }

    /// Append one processing record to the daily audit file.
    pub fn log_record(&self, record: &ProcessingRecord) {
        let mut record = record.clone();
        if let Some(reply) = record.reply.take() {
            record.reply = Some(truncate(&reply, REPLY_LOG_LIMIT));
        }
        self.append_json(&record);
    }

    /// Append the end-of-run summary line.
    pub fn log_summary(&self, run_id: Uuid, records: &[ProcessingRecord], dry_run: bool) {
        let mut outcome_counts: HashMap<&str, usize> = HashMap::new();
        let mut errors = 0;
        for record in records {
            *outcome_counts.entry(record.outcome.label()).or_default() += 1;
            if !record.success {
                errors += 1;
            }
        }

        info!(
            run_id = %run_id,
            total = records.len(),
            errors, dry_run, "Run complete"
        );

        self.append_json(&RunSummary {
            timestamp: Utc::now(),
            kind: "run_summary",
            run_id,
            dry_run,
            total_processed: records.len(),
            outcome_counts,
            errors,
        });
    }

    fn append_json<T: Serialize>(&self, value: &T) {
        let path = self.audit_file();
        if let Err(e) = append_line(&path, value) {
            error!(path = %path.display(), error = %e, "Failed to write audit log");
        }
    }
}

fn append_line<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(value)?;
    writeln!(file, "{line}")
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
