pub mod loader;
pub mod schema;

pub use loader::{apply_env_overrides, load_config, load_config_from_str, load_config_with_env};
pub use schema::{
    ArchiveConfig, CompressionMode, Config, FinalizeConfig, OrderPolicy, RasterConfig,
    VectorConfig, WatchdogConfig, WorkerConfig,
};
