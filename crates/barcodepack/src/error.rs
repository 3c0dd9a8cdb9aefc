use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BarcodePackError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid job: {0}")]
    JobSpec(#[from] JobSpecError),

    #[error("Symbology error: {0}")]
    Symbology(#[from] SymbologyError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Status store error: {0}")]
    Store(#[from] StoreError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Finalize error: {0}")]
    Finalize(#[from] FinalizeError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid value '{value}' for environment variable {name}: {reason}")]
    EnvOverride {
        name: String,
        value: String,
        reason: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SymbologyError {
    #[error("Invalid input '{input}': expected {expected}")]
    InvalidInput {
        input: String,
        expected: &'static str,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobSpecError {
    #[error("{field} must be exactly 11 digits, got '{value}'")]
    InvalidBase { field: &'static str, value: String },

    #[error("Start {start} is greater than end {end}")]
    RangeOrder { start: String, end: String },

    #[error("Order id must not be empty")]
    EmptyOrderId,

    #[error("Unknown output format '{0}'")]
    UnknownFormat(String),

    #[error("Chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("Invalid callback URL '{0}'")]
    InvalidCallbackUrl(String),
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Symbology(#[from] SymbologyError),

    #[error("Failed to read font '{path}': {source}")]
    FontRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Font '{path}' is not a usable TrueType/OpenType font")]
    FontParse { path: PathBuf },

    #[error("Failed to encode '{code}': {reason}")]
    Encode { code: String, reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy file from '{from}' to '{to}': {source}")]
    CopyFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove '{path}': {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory scan failed for '{path}': {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Job '{0}' not found")]
    NotFound(String),

    #[error("Job '{0}' already exists")]
    Duplicate(String),

    #[error("Status store lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Archive source '{0}' does not exist")]
    SourceMissing(PathBuf),

    #[error("I/O error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory scan failed for '{path}': {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Zip writer failed for '{path}': {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    External {
        tool: String,
        status: String,
        stderr: String,
    },
}

#[derive(Error, Debug)]
pub enum FinalizeError {
    #[error("Job '{0}' not found")]
    JobNotFound(String),

    #[error("Output root '{0}' does not exist")]
    RootMissing(PathBuf),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Symbology(#[from] SymbologyError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Failed to start HTTP runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Failed to encode payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Invalid signing key")]
    InvalidKey,

    #[error("Request to '{url}' failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("'{url}' answered {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Chunk {chunk_index} of job '{job_id}' failed: {reason}")]
    ChunkFailed {
        job_id: String,
        chunk_index: u64,
        reason: String,
    },

    #[error("Chunk {chunk_index} of job '{job_id}' exceeded its budget ({elapsed_ms} ms)")]
    BudgetExceeded {
        job_id: String,
        chunk_index: u64,
        elapsed_ms: u128,
    },

    #[error("Finalize of job '{job_id}' exceeded its budget ({elapsed_ms} ms)")]
    FinalizeBudgetExceeded { job_id: String, elapsed_ms: u128 },

    #[error("Finalize of job '{job_id}' failed: {reason}")]
    FinalizeFailed { job_id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, BarcodePackError>;
