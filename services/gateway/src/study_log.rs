//! Per-connection study log: a flat append-only file of every event this
//! connection has seen, independent of the Merkle store.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct StudyLog {
    path: PathBuf,
    closed: bool,
}

impl StudyLog {
    /// Filename convention: `{timestamp}-{counter:010}-{username}-{pid}.study`.
    /// `username` falls back to `GUEST` until an identity is known.
    pub fn open(dir: &Path, username: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let counter = COUNTER.fetch_add(1, Ordering::SeqCst);
        let timestamp = classlog_merkle::timestamp().replace([':', '.'], "-");
        let filename = format!(
            "{timestamp}-{counter:010}-{username}-{pid}.study",
            pid = std::process::id()
        );
        Ok(StudyLog {
            path: dir.join(filename),
            closed: false,
        })
    }

    pub fn append(&self, event: &serde_json::Value) -> std::io::Result<()> {
        if self.closed {
            return Ok(());
        }
        let line = serde_json::to_string(event)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")
    }

    pub fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_writes_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let log = StudyLog::open(dir.path(), "GUEST").unwrap();
        log.append(&serde_json::json!({"event": "a"})).unwrap();
        log.append(&serde_json::json!({"event": "b"})).unwrap();
        let contents = std::fs::read_to_string(&log.path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn close_suppresses_further_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = StudyLog::open(dir.path(), "GUEST").unwrap();
        log.append(&serde_json::json!({"event": "a"})).unwrap();
        log.close();
        log.append(&serde_json::json!({"event": "b"})).unwrap();
        let contents = std::fs::read_to_string(&log.path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }
}
