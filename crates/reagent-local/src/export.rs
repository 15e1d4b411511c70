//! Flat exports of extracted documents: a `url,content` CSV and a plain-text bundle.

use std::path::{Path, PathBuf};

use reagent_core::{Error, ExtractedDocument, Result};

fn persist_err(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Persist(format!("{}: {e}", path.display()))
}

/// `name` with a `.csv` extension, appended only when missing (case-insensitive).
pub fn csv_file_name(name: Option<&str>, now: chrono::DateTime<chrono::Local>) -> String {
    match name.map(str::trim).filter(|s| !s.is_empty()) {
        Some(n) if n.to_ascii_lowercase().ends_with(".csv") => n.to_string(),
        Some(n) => format!("{n}.csv"),
        None => format!("scraped_content_{}.csv", now.format("%Y%m%d_%H%M%S")),
    }
}

/// One row per document, in order, under a `url,content` header.
pub fn write_csv(dir: &Path, name: Option<&str>, docs: &[ExtractedDocument]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| persist_err(dir, e))?;
    let path = dir.join(csv_file_name(name, chrono::Local::now()));
    let mut w = csv::Writer::from_path(&path).map_err(|e| persist_err(&path, e))?;
    w.write_record(["url", "content"])
        .map_err(|e| persist_err(&path, e))?;
    for d in docs {
        w.write_record([d.url.as_str(), d.text.as_str()])
            .map_err(|e| persist_err(&path, e))?;
    }
    w.flush().map_err(|e| persist_err(&path, e))?;
    tracing::info!(path = %path.display(), rows = docs.len(), "csv export saved");
    Ok(path)
}

pub fn text_bundle(docs: &[ExtractedDocument]) -> String {
    docs.iter()
        .map(|d| format!("{}\n{}", d.url, d.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `research_<YYYYmmdd>.txt` holding `url\ntext` pairs.
pub fn write_text_bundle(dir: &Path, docs: &[ExtractedDocument]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| persist_err(dir, e))?;
    let path = dir.join(format!(
        "research_{}.txt",
        chrono::Local::now().format("%Y%m%d")
    ));
    std::fs::write(&path, text_bundle(docs)).map_err(|e| persist_err(&path, e))?;
    tracing::info!(path = %path.display(), documents = docs.len(), "text bundle saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reagent_core::ExtractionPath;

    fn docs() -> Vec<ExtractedDocument> {
        vec![
            ExtractedDocument {
                url: "https://a.example".to_string(),
                text: "Alpha, with \"quotes\"\nand a newline".to_string(),
                path: ExtractionPath::Rendered,
            },
            ExtractedDocument {
                url: "https://b.example".to_string(),
                text: "Could not retrieve content from https://b.example: refused".to_string(),
                path: ExtractionPath::Placeholder,
            },
        ]
    }

    #[test]
    fn csv_names_default_and_get_extension_once() {
        let now = chrono::Local
            .with_ymd_and_hms(2025, 1, 2, 3, 4, 5)
            .single()
            .unwrap();
        assert_eq!(csv_file_name(None, now), "scraped_content_20250102_030405.csv");
        assert_eq!(csv_file_name(Some("  "), now), "scraped_content_20250102_030405.csv");
        assert_eq!(csv_file_name(Some("out"), now), "out.csv");
        assert_eq!(csv_file_name(Some("OUT.CSV"), now), "OUT.CSV");
    }

    #[test]
    fn csv_round_trips_through_a_reader() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_csv(tmp.path(), Some("run"), &docs()).unwrap();
        assert!(path.ends_with("run.csv"));

        let mut r = csv::Reader::from_path(&path).unwrap();
        assert_eq!(
            r.headers().unwrap().iter().collect::<Vec<_>>(),
            vec!["url", "content"]
        );
        let rows: Vec<csv::StringRecord> = r.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "https://a.example");
        assert_eq!(&rows[0][1], "Alpha, with \"quotes\"\nand a newline");
        assert!(rows[1][1].contains("https://b.example"));
    }

    #[test]
    fn text_bundle_pairs_url_and_text() {
        assert_eq!(
            text_bundle(&docs()[1..]),
            "https://b.example\nCould not retrieve content from https://b.example: refused"
        );
        let tmp = tempfile::tempdir().unwrap();
        let path = write_text_bundle(tmp.path(), &docs()).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with("research_") && name.ends_with(".txt"), "{name}");
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.starts_with("https://a.example\nAlpha"));
    }

    #[test]
    fn unwritable_target_is_persist_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let err = write_csv(&blocker.join("sub"), None, &docs()).unwrap_err();
        assert!(matches!(err, Error::Persist(_)));
    }
}
