use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::JobSpecError;
use crate::render::OutputFormat;

/// Largest value representable in 11 decimal digits.
const MAX_BASE: u64 = 99_999_999_999;

/// An 11-digit numeric base code. Leading zeros are significant in its text form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BaseCode(u64);

impl BaseCode {
    pub const WIDTH: usize = 11;

    pub fn parse(value: &str) -> Option<Self> {
        if value.len() != Self::WIDTH || !value.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        value.parse().ok().map(BaseCode)
    }

    pub fn from_u64(value: u64) -> Option<Self> {
        (value <= MAX_BASE).then_some(BaseCode(value))
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// The base `n` steps after this one, if it still fits in 11 digits.
    pub fn offset(self, n: u64) -> Option<Self> {
        self.0.checked_add(n).and_then(Self::from_u64)
    }
}

impl fmt::Display for BaseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:011}", self.0)
    }
}

impl Serialize for BaseCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BaseCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BaseCode::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid 11-digit base '{}'", s)))
    }
}

/// Output formats requested for a job. Raster images are always produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatSet {
    pub pdf: bool,
    pub eps: bool,
    pub number_list: bool,
}

impl FormatSet {
    pub fn raster_only() -> Self {
        Self {
            pdf: false,
            eps: false,
            number_list: false,
        }
    }

    /// Default set: raster and number lists, vector formats per configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            pdf: config.enable_pdf,
            eps: config.enable_eps,
            number_list: true,
        }
    }

    /// Parses an explicit format list such as `["jpg", "pdf", "xls"]`.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, JobSpecError> {
        let mut set = Self::raster_only();
        for name in names {
            match name.as_ref().trim().to_ascii_lowercase().as_str() {
                "jpg" | "jpeg" | "raster" => {}
                "pdf" => set.pdf = true,
                "eps" => set.eps = true,
                "xls" | "csv" | "list" | "number_list" => set.number_list = true,
                other => return Err(JobSpecError::UnknownFormat(other.to_string())),
            }
        }
        Ok(set)
    }

    /// Rendered formats in output order.
    pub fn render_formats(&self) -> Vec<OutputFormat> {
        let mut formats = vec![OutputFormat::Jpg];
        if self.pdf {
            formats.push(OutputFormat::Pdf);
        }
        if self.eps {
            formats.push(OutputFormat::Eps);
        }
        formats
    }
}

/// Where to announce a ready package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackTarget {
    pub url: String,
    pub token: Option<String>,
}

/// Unvalidated job input, as received from a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequest {
    pub start: String,
    pub end: String,
    pub order_no: String,
    #[serde(default)]
    pub formats: Option<Vec<String>>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub callback_token: Option<String>,
}

/// A validated, immutable job specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub order_id: String,
    pub start: BaseCode,
    pub end: BaseCode,
    pub formats: FormatSet,
    pub chunk_size: u64,
    pub callback: Option<CallbackTarget>,
}

impl JobSpec {
    pub fn from_request(request: &JobRequest, config: &Config) -> Result<Self, JobSpecError> {
        let start = BaseCode::parse(request.start.trim()).ok_or_else(|| {
            JobSpecError::InvalidBase {
                field: "start",
                value: request.start.clone(),
            }
        })?;
        let end =
            BaseCode::parse(request.end.trim()).ok_or_else(|| JobSpecError::InvalidBase {
                field: "end",
                value: request.end.clone(),
            })?;
        if start > end {
            return Err(JobSpecError::RangeOrder {
                start: start.to_string(),
                end: end.to_string(),
            });
        }

        let order_id = request.order_no.trim().to_string();
        if order_id.is_empty() {
            return Err(JobSpecError::EmptyOrderId);
        }

        if config.chunk_size == 0 {
            return Err(JobSpecError::ZeroChunkSize);
        }

        let formats = match &request.formats {
            Some(names) => FormatSet::from_names(names)?,
            None => FormatSet::from_config(config),
        };

        let callback = match request.callback_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => {
                let parsed = reqwest::Url::parse(url)
                    .map_err(|_| JobSpecError::InvalidCallbackUrl(url.to_string()))?;
                if parsed.scheme() != "http" && parsed.scheme() != "https" {
                    return Err(JobSpecError::InvalidCallbackUrl(url.to_string()));
                }
                Some(CallbackTarget {
                    url: url.to_string(),
                    token: request
                        .callback_token
                        .clone()
                        .filter(|t| !t.is_empty()),
                })
            }
            _ => None,
        };

        Ok(Self {
            order_id,
            start,
            end,
            formats,
            chunk_size: config.chunk_size,
            callback,
        })
    }

    /// Number of base codes in the inclusive range.
    pub fn code_count(&self) -> u64 {
        self.end.value() - self.start.value() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(start: &str, end: &str) -> JobRequest {
        JobRequest {
            start: start.to_string(),
            end: end.to_string(),
            order_no: "A-100".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_base_code_parse_and_display() {
        let base = BaseCode::parse("00000000042").unwrap();
        assert_eq!(base.value(), 42);
        assert_eq!(base.to_string(), "00000000042");
        assert_eq!(BaseCode::from_u64(7).unwrap().to_string(), "00000000007");

        for bad in ["", "42", "000000000042", "0000000004x", "+0000000042"] {
            assert!(BaseCode::parse(bad).is_none(), "accepted '{}'", bad);
        }
    }

    #[test]
    fn test_base_code_offset_bounds() {
        let top = BaseCode::parse("99999999999").unwrap();
        assert!(top.offset(1).is_none());
        assert_eq!(top.offset(0), Some(top));
        assert!(BaseCode::from_u64(100_000_000_000).is_none());
    }

    #[test]
    fn test_from_request_defaults_follow_config() {
        let mut config = Config::with_output_directory("/out");
        config.enable_pdf = true;
        config.enable_eps = false;
        config.chunk_size = 5;

        let spec = JobSpec::from_request(&request("00000000001", "00000000010"), &config).unwrap();

        assert_eq!(spec.order_id, "A-100");
        assert_eq!(spec.code_count(), 10);
        assert_eq!(spec.chunk_size, 5);
        assert!(spec.formats.pdf);
        assert!(!spec.formats.eps);
        assert!(spec.formats.number_list);
        assert!(spec.callback.is_none());
    }

    #[test]
    fn test_from_request_explicit_formats() {
        let config = Config::with_output_directory("/out");
        let mut req = request("00000000001", "00000000001");
        req.formats = Some(vec!["JPG".to_string(), "eps".to_string()]);

        let spec = JobSpec::from_request(&req, &config).unwrap();

        assert_eq!(spec.formats.render_formats(), vec![OutputFormat::Jpg, OutputFormat::Eps]);
        assert!(!spec.formats.number_list);
    }

    #[test]
    fn test_from_request_rejections() {
        let config = Config::with_output_directory("/out");

        let err = JobSpec::from_request(&request("1", "00000000001"), &config).unwrap_err();
        assert!(matches!(err, JobSpecError::InvalidBase { field: "start", .. }));

        let err =
            JobSpec::from_request(&request("00000000009", "00000000001"), &config).unwrap_err();
        assert!(matches!(err, JobSpecError::RangeOrder { .. }));

        let mut req = request("00000000001", "00000000002");
        req.order_no = "  ".to_string();
        assert_eq!(
            JobSpec::from_request(&req, &config).unwrap_err(),
            JobSpecError::EmptyOrderId
        );

        let mut req = request("00000000001", "00000000002");
        req.formats = Some(vec!["tiff".to_string()]);
        assert_eq!(
            JobSpec::from_request(&req, &config).unwrap_err(),
            JobSpecError::UnknownFormat("tiff".to_string())
        );

        let mut req = request("00000000001", "00000000002");
        req.callback_url = Some("ftp://example.com/hook".to_string());
        assert!(matches!(
            JobSpec::from_request(&req, &config).unwrap_err(),
            JobSpecError::InvalidCallbackUrl(_)
        ));
    }

    #[test]
    fn test_from_request_callback() {
        let config = Config::with_output_directory("/out");
        let mut req = request("00000000001", "00000000002");
        req.callback_url = Some("https://shop.example.com/hooks/barcodes".to_string());
        req.callback_token = Some("s3cret".to_string());

        let spec = JobSpec::from_request(&req, &config).unwrap();
        let callback = spec.callback.unwrap();
        assert_eq!(callback.url, "https://shop.example.com/hooks/barcodes");
        assert_eq!(callback.token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_base_code_serde() {
        let base = BaseCode::parse("00000000123").unwrap();
        let json = serde_json::to_string(&base).unwrap();
        assert_eq!(json, "\"00000000123\"");
        let back: BaseCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, base);
        assert!(serde_json::from_str::<BaseCode>("\"123\"").is_err());
    }
}
