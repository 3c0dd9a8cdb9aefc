//! Builders for test configurations and job requests.

#![allow(dead_code)]

use barcodepack::config::{CompressionMode, Config, OrderPolicy};
use barcodepack::JobRequest;

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Small, fast defaults: two workers, chunks of two, no vector output,
    /// no external archiver.
    pub fn new(output_directory: &str) -> Self {
        let mut config = Config::with_output_directory(output_directory);
        config.worker_count = 2;
        config.chunk_size = 2;
        config.enable_pdf = false;
        config.enable_eps = false;
        config.archive.prefer_external = false;
        config.watchdog.interval_secs = 1;
        Self { config }
    }

    pub fn chunk_size(mut self, size: u64) -> Self {
        self.config.chunk_size = size;
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    pub fn vector(mut self, enabled: bool) -> Self {
        self.config.enable_pdf = enabled;
        self.config.enable_eps = enabled;
        self
    }

    pub fn make_ean13(mut self, enabled: bool) -> Self {
        self.config.make_ean13 = enabled;
        self
    }

    pub fn compression(mut self, mode: CompressionMode) -> Self {
        self.config.archive.compression = mode;
        self
    }

    pub fn order_policy(mut self, policy: OrderPolicy) -> Self {
        self.config.order_policy = policy;
        self
    }

    pub fn watchdog(mut self, enabled: bool) -> Self {
        self.config.watchdog.enabled = enabled;
        self
    }

    pub fn database_path(mut self, path: &str) -> Self {
        self.config.database_path = Some(path.to_string());
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

pub struct RequestBuilder {
    request: JobRequest,
}

impl RequestBuilder {
    pub fn new(start: &str, end: &str, order: &str) -> Self {
        Self {
            request: JobRequest {
                start: start.to_string(),
                end: end.to_string(),
                order_no: order.to_string(),
                ..JobRequest::default()
            },
        }
    }

    pub fn formats(mut self, formats: &[&str]) -> Self {
        self.request.formats = Some(formats.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn callback(mut self, url: &str, token: Option<&str>) -> Self {
        self.request.callback_url = Some(url.to_string());
        self.request.callback_token = token.map(str::to_string);
        self
    }

    pub fn build(self) -> JobRequest {
        self.request
    }
}
