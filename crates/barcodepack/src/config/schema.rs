use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub output_directory: String,
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default = "default_true")]
    pub enable_pdf: bool,
    #[serde(default = "default_true")]
    pub enable_eps: bool,
    #[serde(default = "default_true")]
    pub make_ean13: bool,
    #[serde(default)]
    pub order_policy: OrderPolicy,
    #[serde(default)]
    pub raster: RasterConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub finalize: FinalizeConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl Config {
    /// Minimal configuration writing into `output_directory`.
    pub fn with_output_directory(output_directory: impl Into<String>) -> Self {
        Self {
            version: "1.0".to_string(),
            output_directory: output_directory.into(),
            database_path: None,
            worker_count: default_worker_count(),
            chunk_size: default_chunk_size(),
            enable_pdf: true,
            enable_eps: true,
            make_ean13: true,
            order_policy: OrderPolicy::default(),
            raster: RasterConfig::default(),
            vector: VectorConfig::default(),
            archive: ArchiveConfig::default(),
            finalize: FinalizeConfig::default(),
            watchdog: WatchdogConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_chunk_size() -> u64 {
    20
}

fn default_true() -> bool {
    true
}

/// What to do with earlier jobs for the same order id when a new one is accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderPolicy {
    #[default]
    Coexist,
    Replace,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterConfig {
    #[serde(default)]
    pub font_path: Option<String>,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_dpi")]
    pub dpi: u16,
}

fn default_jpeg_quality() -> u8 {
    90
}

fn default_dpi() -> u16 {
    300
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            jpeg_quality: default_jpeg_quality(),
            dpi: default_dpi(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    #[serde(default = "default_module_pt")]
    pub module_pt: f32,
    #[serde(default = "default_bar_height_pt")]
    pub bar_height_pt: f32,
    #[serde(default = "default_quiet_modules")]
    pub quiet_modules: u32,
    #[serde(default = "default_true")]
    pub show_text: bool,
    #[serde(default = "default_font")]
    pub font: String,
    #[serde(default = "default_font_pt")]
    pub font_pt: f32,
    #[serde(default = "default_text_gap_pt")]
    pub text_gap_pt: f32,
}

fn default_module_pt() -> f32 {
    1.0
}

fn default_bar_height_pt() -> f32 {
    50.0
}

fn default_quiet_modules() -> u32 {
    11
}

fn default_font() -> String {
    "Helvetica".to_string()
}

fn default_font_pt() -> f32 {
    10.0
}

fn default_text_gap_pt() -> f32 {
    2.0
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            module_pt: default_module_pt(),
            bar_height_pt: default_bar_height_pt(),
            quiet_modules: default_quiet_modules(),
            show_text: true,
            font: default_font(),
            font_pt: default_font_pt(),
            text_gap_pt: default_text_gap_pt(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    Store,
    #[default]
    Deflate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default)]
    pub compression: CompressionMode,
    #[serde(default = "default_level")]
    pub level: u8,
    #[serde(default = "default_cache_days")]
    pub cache_days: u32,
    #[serde(default = "default_external_bin")]
    pub external_bin: String,
    #[serde(default = "default_true")]
    pub prefer_external: bool,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

fn default_level() -> u8 {
    3
}

fn default_cache_days() -> u32 {
    7
}

fn default_external_bin() -> String {
    "7z".to_string()
}

fn default_allowed_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "pdf", "eps", "csv"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            compression: CompressionMode::default(),
            level: default_level(),
            cache_days: default_cache_days(),
            external_bin: default_external_bin(),
            prefer_external: true,
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeConfig {
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    #[serde(default)]
    pub front_matter_dir: Option<String>,
    #[serde(default)]
    pub download_url_base: Option<String>,
    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,
}

fn default_lock_ttl_secs() -> u64 {
    600
}

fn default_webhook_timeout_secs() -> u64 {
    15
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: default_lock_ttl_secs(),
            front_matter_dir: None,
            download_url_base: None,
            webhook_timeout_secs: default_webhook_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
}

fn default_interval_secs() -> u64 {
    15
}

fn default_max_lifetime_secs() -> u64 {
    6 * 60 * 60
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            max_lifetime_secs: default_max_lifetime_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_chunk_budget_secs")]
    pub chunk_budget_secs: u64,
    #[serde(default = "default_finalize_budget_secs")]
    pub finalize_budget_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_chunk_budget_secs() -> u64 {
    20 * 60
}

fn default_finalize_budget_secs() -> u64 {
    30 * 60
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            chunk_budget_secs: default_chunk_budget_secs(),
            finalize_budget_secs: default_finalize_budget_secs(),
        }
    }
}
