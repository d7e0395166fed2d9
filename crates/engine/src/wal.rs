//! Per-worker write-ahead log: newline-delimited JSON mirroring the
//! lifecycle transitions. Forensic only; the database is the source of
//! truth.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WalEvent {
    WorkerStart {
        worker_id: String,
        states: Vec<String>,
        ts: DateTime<Utc>,
    },
    TargetStart {
        worker_id: String,
        target_id: i64,
        ts: DateTime<Utc>,
    },
    TargetComplete {
        worker_id: String,
        target_id: i64,
        outcome: String,
        ts: DateTime<Utc>,
    },
    WorkerStop {
        worker_id: String,
        targets_processed: u64,
        ts: DateTime<Utc>,
    },
}

pub struct WorkerWal {
    path: PathBuf,
    file: File,
}

impl WorkerWal {
    pub fn open(dir: &Path, worker_id: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating WAL dir {}", dir.display()))?;
        let path = dir.join(format!("worker-{worker_id}.wal"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening WAL {}", path.display()))?;
        Ok(Self { path, file })
    }

    pub fn append(&mut self, event: &WalEvent) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_append_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = WorkerWal::open(dir.path(), "w0").unwrap();
        wal.append(&WalEvent::WorkerStart {
            worker_id: "w0".into(),
            states: vec!["TX".into(), "OK".into()],
            ts: Utc::now(),
        })
        .unwrap();
        wal.append(&WalEvent::TargetStart {
            worker_id: "w0".into(),
            target_id: 42,
            ts: Utc::now(),
        })
        .unwrap();
        wal.append(&WalEvent::TargetComplete {
            worker_id: "w0".into(),
            target_id: 42,
            outcome: "done".into(),
            ts: Utc::now(),
        })
        .unwrap();

        let content = std::fs::read_to_string(wal.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "worker_start");
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["event"], "target_start");
        assert_eq!(second["target_id"], 42);
        let third: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(third["outcome"], "done");
    }

    #[test]
    fn reopening_appends_rather_than_truncates() {
        let dir = tempfile::tempdir().unwrap();
        for _ in 0..2 {
            let mut wal = WorkerWal::open(dir.path(), "w1").unwrap();
            wal.append(&WalEvent::WorkerStop {
                worker_id: "w1".into(),
                targets_processed: 0,
                ts: Utc::now(),
            })
            .unwrap();
        }
        let content =
            std::fs::read_to_string(dir.path().join("worker-w1.wal")).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
