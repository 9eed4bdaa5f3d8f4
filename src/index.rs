//! The remote package index.
//!
//! Two shapes are accepted:
//!
//! ```json
//! [{"name": "acme/widget", "summary": "Widgets", "versions": ["1.0.0"]}]
//! {"acme/widget": ["1.0.0"]}
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::{HttpClient, HttpError};
use crate::mirror::MirrorPaths;
use crate::mirror::atomic::write_atomic;
use crate::types::{PackageName, ParseError};

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("failed to fetch package index: {0}")]
    Fetch(#[from] HttpError),
    #[error("failed to read package index {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write index snapshot: {0}")]
    Snapshot(#[source] std::io::Error),
    #[error("malformed package index: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One package entry. The name is kept raw; it is validated per package so
/// one bad entry does not reject the whole index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub versions: BTreeSet<String>,
}

impl PackageRecord {
    pub fn new(name: impl Into<String>, versions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            summary: None,
            versions: versions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn package_name(&self) -> Result<PackageName, ParseError> {
        self.name.parse()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IndexDocument {
    Records(Vec<PackageRecord>),
    Versions(BTreeMap<String, BTreeSet<String>>),
}

impl From<IndexDocument> for Vec<PackageRecord> {
    fn from(doc: IndexDocument) -> Self {
        match doc {
            IndexDocument::Records(records) => records,
            IndexDocument::Versions(map) => map
                .into_iter()
                .map(|(name, versions)| PackageRecord {
                    name,
                    summary: None,
                    versions,
                })
                .collect(),
        }
    }
}

pub fn parse_index(body: &str) -> Result<Vec<PackageRecord>, IndexError> {
    let doc: IndexDocument = serde_json::from_str(body)?;
    Ok(doc.into())
}

/// Load an index from a local file. No snapshot is written.
pub fn load_index_file(path: &Path) -> Result<Vec<PackageRecord>, IndexError> {
    let body = std::fs::read_to_string(path).map_err(|source| IndexError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_index(&body)
}

/// Fetch the index from `url`, keep the raw body as `<root>/all-packages`,
/// then parse it.
pub fn fetch_index(
    client: &HttpClient,
    url: &str,
    paths: &MirrorPaths,
) -> Result<Vec<PackageRecord>, IndexError> {
    log::info!("Fetching package index from {}", url);
    let body = client.get_text(url)?;
    write_atomic(&paths.index_snapshot(), body.as_bytes()).map_err(IndexError::Snapshot)?;

    let records = parse_index(&body)?;
    log::info!("Package index lists {} packages", records.len());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RetryPolicy;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use tempfile::tempdir;

    #[test]
    fn parses_record_list() {
        let body = r#"[
            {"name": "acme/widget", "summary": "Widgets", "versions": ["1.0.0", "1.1.0"]},
            {"name": "elm/core", "versions": []}
        ]"#;

        let records = parse_index(body).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "acme/widget");
        assert_eq!(records[0].summary.as_deref(), Some("Widgets"));
        assert!(records[0].versions.contains("1.1.0"));
        assert!(records[1].summary.is_none());
    }

    #[test]
    fn parses_version_map() {
        let records = parse_index(r#"{"acme/widget": ["1.0.0"], "elm/core": ["1.0.0", "1.0.1"]}"#)
            .unwrap();

        assert_eq!(records, vec![
            PackageRecord::new("acme/widget", ["1.0.0"]),
            PackageRecord::new("elm/core", ["1.0.0", "1.0.1"]),
        ]);
    }

    #[test]
    fn invalid_names_survive_parsing() {
        let records = parse_index(r#"{"../etc": ["1.0.0"]}"#).unwrap();

        assert_eq!(records[0].name, "../etc");
        assert!(records[0].package_name().is_err());
    }

    #[test]
    fn rejects_other_shapes() {
        assert!(matches!(parse_index("42"), Err(IndexError::Parse(_))));
        assert!(matches!(parse_index("[{\"summary\":\"x\"}]"), Err(IndexError::Parse(_))));
    }

    #[test]
    fn load_missing_file_is_read_error() {
        let dir = tempdir().unwrap();
        let err = load_index_file(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, IndexError::Read { .. }));
    }

    #[test]
    fn load_file_does_not_write_snapshot() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("index.json");
        std::fs::write(&file, r#"{"acme/widget": ["1.0.0"]}"#).unwrap();

        let records = load_index_file(&file).unwrap();

        assert_eq!(records.len(), 1);
        assert!(!MirrorPaths::new(dir.path()).index_snapshot().exists());
    }

    #[test]
    fn fetch_keeps_raw_snapshot() {
        let body = r#"[{"name":"acme/widget","summary":"x","versions":["1.0.0"]}]"#;
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/all-packages", listener.local_addr().unwrap());
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 2 {
                line.clear();
            }
            write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            )
            .unwrap();
        });

        let dir = tempdir().unwrap();
        let paths = MirrorPaths::new(dir.path());
        let client = HttpClient::new(RetryPolicy::default());

        let records = fetch_index(&client, &url, &paths).unwrap();
        server.join().unwrap();

        assert_eq!(records[0].name, "acme/widget");
        assert_eq!(std::fs::read_to_string(paths.index_snapshot()).unwrap(), body);
    }
}
