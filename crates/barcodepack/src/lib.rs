pub mod archive;
pub mod config;
pub mod db;
pub mod error;
pub mod finalize;
pub mod job;
pub mod lock;
pub mod progress;
pub mod render;
pub mod sanitize;
pub mod service;
pub mod storage;
pub mod store;
pub mod symbology;
pub mod watchdog;
pub mod worker;

pub use config::{load_config, Config};
pub use error::{BarcodePackError, Result};
pub use finalize::{FinalizeOutcome, Finalizer};
pub use job::{BaseCode, JobRequest, JobSpec};
pub use service::{PackageService, ServiceParts, StatusView, Submission};
pub use store::{JobStatus, StatusStore};
pub use symbology::{CodePair, Symbology};
