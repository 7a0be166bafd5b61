//! Append-only violation log stored as a JSON array.
//!
//! Every append rewrites the whole file through a sibling temp file and a
//! rename, so a crash leaves either the old or the new array on disk.

use log::debug;
use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::violations::ViolationRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("violation log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("violation log {path} is not a JSON array of records: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ViolationLog {
    path: PathBuf,
}

impl ViolationLog {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// All records written so far; a missing file is an empty log.
    pub fn load(&self) -> Result<Vec<ViolationRecord>, StoreError> {
        let txt = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_err(e)),
        };
        if txt.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&txt).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })
    }

    pub fn append(&self, record: &ViolationRecord) -> Result<(), StoreError> {
        let mut all = self.load()?;
        all.push(record.clone());

        let dir = match self.path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| self.io_err(e))?;

        let body = serde_json::to_vec_pretty(&all).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;

        let file_name = self
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("violations.json");
        let tmp = dir.join(format!(".{file_name}.{}.tmp", std::process::id()));

        let written = fs::File::create(&tmp).and_then(|mut f| {
            f.write_all(&body)?;
            f.sync_all()
        });
        if let Err(e) = written.and_then(|_| fs::rename(&tmp, &self.path)) {
            let _ = fs::remove_file(&tmp);
            return Err(self.io_err(e));
        }
        debug!(
            "violation for hand {} appended to {}",
            record.hand_id,
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("scoopwatch-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn record(frame_id: u64, scooper_id: Option<i64>) -> ViolationRecord {
        ViolationRecord {
            frame_id,
            hand_id: 3,
            roi_id: "protein".into(),
            scooper_id,
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn appends_preserve_earlier_records() {
        let dir = scratch("append");
        let log = ViolationLog::open(dir.join("nested").join("violations.json"));
        assert!(log.load().unwrap().is_empty());

        log.append(&record(50, None)).unwrap();
        log.append(&record(90, Some(7))).unwrap();
        assert_eq!(log.load().unwrap(), vec![record(50, None), record(90, Some(7))]);

        let leftovers: Vec<_> = fs::read_dir(log.path().parent().unwrap())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn on_disk_schema() {
        let dir = scratch("schema");
        let log = ViolationLog::open(dir.join("violations.json"));
        log.append(&record(50, None)).unwrap();
        let v: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(log.path()).unwrap()).unwrap();
        assert_eq!(
            v,
            serde_json::json!([{
                "frame_id": 50,
                "hand_id": 3,
                "roi_id": "protein",
                "scooper_id": null,
                "timestamp": 1_700_000_000
            }])
        );
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_log_is_an_error_and_left_untouched() {
        let dir = scratch("corrupt");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("violations.json");
        fs::write(&path, "{not json").unwrap();
        let log = ViolationLog::open(&path);
        assert!(matches!(log.append(&record(1, None)), Err(StoreError::Json { .. })));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{not json");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn unwritable_location_surfaces_io_error() {
        let dir = scratch("blocked");
        fs::create_dir_all(&dir).unwrap();
        // a regular file where the parent directory should be
        let blocker = dir.join("blocker");
        fs::write(&blocker, "").unwrap();
        let log = ViolationLog::open(blocker.join("violations.json"));
        assert!(matches!(log.append(&record(1, None)), Err(StoreError::Io { .. })));
        let _ = fs::remove_dir_all(&dir);
    }
}
