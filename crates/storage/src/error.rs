use std::path::PathBuf;

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    #[snafu(display("failed to create storage directory at {path:?} on `{stage}`: {source}"))]
    CreateDirectory {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to read record '{key}' from {path:?} on `{stage}`: {source}"))]
    ReadRecord {
        stage: &'static str,
        key: String,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to write record '{key}' to {path:?} on `{stage}`: {source}"))]
    WriteRecord {
        stage: &'static str,
        key: String,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace record '{key}' from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    ReplaceRecord {
        stage: &'static str,
        key: String,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to remove record '{key}' at {path:?} on `{stage}`: {source}"))]
    RemoveRecord {
        stage: &'static str,
        key: String,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("record key '{key}' is not a plain name"))]
    InvalidKey { stage: &'static str, key: String },
    #[snafu(display("quota of {limit} bytes exceeded by record '{key}' ({attempted} bytes)"))]
    QuotaExceeded {
        stage: &'static str,
        key: String,
        limit: usize,
        attempted: usize,
    },
    #[snafu(display("storage is unavailable on `{stage}`: {details}"))]
    Unavailable {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("failed to serialize history on `{stage}`: {source}"))]
    SerializeHistory {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to parse history record on `{stage}`: {source}"))]
    ParseHistory {
        stage: &'static str,
        source: serde_json::Error,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;
