use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GenomaError {
    #[error("unparseable listing entry `{line}`: {reason}")]
    FilenameParse { line: String, reason: String },

    #[error("unknown assembly record field: {0}")]
    UnknownField(String),

    #[error("invalid value for field {field}: {value}")]
    InvalidFieldValue { field: String, value: String },

    #[error("invalid SRA accession: {0}")]
    InvalidAccession(String),

    #[error("invalid taxonomy id: {0}")]
    InvalidTaxonomyId(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("remote listing failed for {path}: {message}")]
    RemoteListing { path: String, message: String },

    #[error("remote fetch failed for {path}: {message}")]
    RemoteFetch { path: String, message: String },

    #[error("remote connection failed: {0}")]
    RemoteConnection(String),

    #[error("no remote source registered for {0}")]
    UnknownSource(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("assembly not found in catalog: {0}")]
    AssemblyNotFound(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("taxonomy table error: {0}")]
    TaxonomyTable(String),

    #[error("taxonomy download failed: {0}")]
    TaxonomyHttp(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("step {step} failed for {assembly}: {message}")]
    StepFailed {
        assembly: String,
        step: String,
        exit_code: Option<i32>,
        message: String,
    },

    #[error("eutils request failed: {0}")]
    EutilsHttp(String),

    #[error("eutils returned status {status}: {message}")]
    EutilsStatus { status: u16, message: String },

    #[error("malformed eutils response: {0}")]
    EutilsParse(String),

    #[error("worker pool error: {0}")]
    WorkerPool(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<rusqlite::Error> for GenomaError {
    fn from(err: rusqlite::Error) -> Self {
        GenomaError::Catalog(err.to_string())
    }
}
