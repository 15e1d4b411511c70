//! Filesystem-backed research history: one JSON file per session.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use reagent_core::{Error, HistoryStore, ResearchRecord, Result, TIMESTAMP_FORMAT};
use serde::Serialize;

pub const DEFAULT_HISTORY_DIR: &str = "research_history";

const FILE_PREFIX: &str = "research_";
const MAX_COLLISION_SUFFIX: u32 = 1_000;

#[derive(Debug, Clone)]
pub struct FsHistory {
    dir: PathBuf,
}

impl FsHistory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `research_<YYYYmmdd_HHMMSS>` from the record's own timestamp, or the current time when
    /// that does not parse.
    fn file_stem(record: &ResearchRecord) -> String {
        let stamp = chrono::NaiveDateTime::parse_from_str(&record.timestamp, TIMESTAMP_FORMAT)
            .map(|dt| dt.format("%Y%m%d_%H%M%S").to_string())
            .unwrap_or_else(|_| chrono::Local::now().format("%Y%m%d_%H%M%S").to_string());
        format!("{FILE_PREFIX}{stamp}")
    }

    fn to_pretty_json(record: &ResearchRecord) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let fmt = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, fmt);
        record
            .serialize(&mut ser)
            .map_err(|e| Error::Persist(e.to_string()))?;
        Ok(buf)
    }

    fn is_history_file(path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        name.starts_with(FILE_PREFIX) && name.ends_with(".json")
    }
}

impl HistoryStore for FsHistory {
    fn append(&self, record: &ResearchRecord) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Persist(format!("create {}: {e}", self.dir.display()))
        })?;
        let body = Self::to_pretty_json(record)?;
        let stem = Self::file_stem(record);

        for n in 0..=MAX_COLLISION_SUFFIX {
            let name = if n == 0 {
                format!("{stem}.json")
            } else {
                format!("{stem}_{n}.json")
            };
            let path = self.dir.join(name);
            let mut f = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(f) => f,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(Error::Persist(format!("open {}: {e}", path.display()))),
            };
            f.write_all(&body)
                .and_then(|_| f.flush())
                .map_err(|e| Error::Persist(format!("write {}: {e}", path.display())))?;
            tracing::info!(path = %path.display(), "history record saved");
            return Ok(path);
        }
        Err(Error::Persist(format!(
            "too many history files named {stem}*.json in {}",
            self.dir.display()
        )))
    }

    fn list(&self) -> Result<Vec<ResearchRecord>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Persist(format!("read {}: {e}", self.dir.display()))),
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| Self::is_history_file(p))
            .collect();
        // Names embed the timestamp, so name order is time order.
        paths.sort();
        paths.reverse();

        let mut out = Vec::with_capacity(paths.len());
        for p in paths {
            let parsed = std::fs::read(&p)
                .map_err(|e| e.to_string())
                .and_then(|b| {
                    serde_json::from_slice::<ResearchRecord>(&b).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(r) => out.push(r),
                Err(e) => tracing::warn!(
                    path = %p.display(),
                    error = %e,
                    "skipping unreadable history file"
                ),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(query: &str, h: u32) -> ResearchRecord {
        let at = chrono::Local
            .with_ymd_and_hms(2025, 3, 14, h, 15, 9)
            .single()
            .unwrap();
        ResearchRecord::new(
            query,
            vec!["https://a.example".to_string(), "https://b.example".to_string()],
            "the report",
            at,
        )
    }

    #[test]
    fn append_creates_dir_and_writes_indented_json() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsHistory::new(tmp.path().join("nested/research_history"));
        let path = store.append(&record("what is rust", 12)).unwrap();

        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "research_20250314_121509.json"
        );
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\n    \"query\": \"what is rust\""), "{text}");
        let back: ResearchRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, record("what is rust", 12));
        assert_eq!(back.timestamp, "2025-03-14 12:15:09");
    }

    #[test]
    fn second_append_in_same_second_never_touches_the_first_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsHistory::new(tmp.path());
        let first = store.append(&record("first", 12)).unwrap();
        let before = std::fs::read(&first).unwrap();

        let second = store.append(&record("second", 12)).unwrap();
        assert_ne!(first, second);
        assert!(second.to_str().unwrap().ends_with("research_20250314_121509_1.json"));
        assert_eq!(std::fs::read(&first).unwrap(), before);

        let third = store.append(&record("third", 12)).unwrap();
        assert!(third.to_str().unwrap().ends_with("_2.json"));
    }

    #[test]
    fn list_is_newest_first_and_skips_garbage() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsHistory::new(tmp.path());
        store.append(&record("morning", 9)).unwrap();
        store.append(&record("evening", 18)).unwrap();
        store.append(&record("evening again", 18)).unwrap();
        std::fs::write(tmp.path().join("research_20250314_230000.json"), "not json").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();

        let all = store.list().unwrap();
        let queries: Vec<&str> = all.iter().map(|r| r.query.as_str()).collect();
        assert_eq!(queries, vec!["evening again", "evening", "morning"]);
    }

    #[test]
    fn list_of_missing_dir_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsHistory::new(tmp.path().join("never-created"));
        assert!(store.list().unwrap().is_empty());
    }
}
