// src/utils/status_log.rs
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

use comparisons::Severity;

#[derive(Serialize)]
struct StatusLine<'a> {
    ts: String,
    run_id: Uuid,
    event: &'a str,
    identifier: &'a str,
    comparison: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

/// Append-only JSONL record of comparison start/finish events.
#[derive(Debug)]
pub struct StatusLog {
    path: PathBuf,
    write: Mutex<()>,
}

impl StatusLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn started(&self, run_id: Uuid, identifier: &str, comparison: &str) -> Result<()> {
        self.append(&StatusLine {
            ts: Utc::now().to_rfc3339(),
            run_id,
            event: "start",
            identifier,
            comparison: comparison.to_string(),
            severity: None,
            reason: None,
        })
    }

    pub fn finished(
        &self,
        run_id: Uuid,
        identifier: &str,
        comparison: &str,
        severity: Severity,
        reason: Option<&str>,
    ) -> Result<()> {
        self.append(&StatusLine {
            ts: Utc::now().to_rfc3339(),
            run_id,
            event: "finish",
            identifier,
            comparison: comparison.to_string(),
            severity: Some(severity),
            reason,
        })
    }

    fn append(&self, line: &StatusLine<'_>) -> Result<()> {
        let json = serde_json::to_string(line)?;
        let _guard = self.write.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating status log dir {}", parent.display()))?;
        }
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening status log {}", self.path.display()))?;
        writeln!(f, "{}", json)?;
        Ok(())
    }
}
