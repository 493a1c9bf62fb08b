use crate::error::{Result, VectorStoreError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Similarity metric, fixed per index at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Inner product, higher is better.
    #[default]
    Ip,
    /// Squared Euclidean distance, lower is better.
    L2,
}

impl Metric {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::L2 => "l2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Exact,
    Approx,
}

impl SearchMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Approx => "approx",
        }
    }
}

/// Requested compute device. `Mps` maps to Apple Metal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRequest {
    #[default]
    Auto,
    Cuda,
    Mps,
    Cpu,
}

impl DeviceRequest {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Cuda => "cuda",
            Self::Mps => "mps",
            Self::Cpu => "cpu",
        }
    }
}

macro_rules! parse_choice {
    ($ty:ty, $what:literal, [$($name:literal => $variant:expr),+ $(,)?]) => {
        impl FromStr for $ty {
            type Err = VectorStoreError;

            fn from_str(raw: &str) -> Result<Self> {
                match raw.trim().to_ascii_lowercase().as_str() {
                    $($name => Ok($variant),)+
                    other => Err(VectorStoreError::config_invalid(format!(
                        concat!("unknown ", $what, " '{}' (expected one of: {})"),
                        other,
                        [$($name),+].join(", ")
                    ))),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

parse_choice!(Metric, "metric", ["ip" => Metric::Ip, "l2" => Metric::L2]);
parse_choice!(SearchMode, "search mode", [
    "exact" => SearchMode::Exact,
    "approx" => SearchMode::Approx,
]);
parse_choice!(DeviceRequest, "device", [
    "auto" => DeviceRequest::Auto,
    "cuda" => DeviceRequest::Cuda,
    "mps" => DeviceRequest::Mps,
    "cpu" => DeviceRequest::Cpu,
]);

/// Persisted retrieval settings of one index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorConfig {
    #[serde(default)]
    pub device: DeviceRequest,
    #[serde(default)]
    pub metric: Metric,
    #[serde(default)]
    pub search_mode: SearchMode,
    #[serde(default = "default_sample_rate")]
    pub approx_sample_rate: f64,
    #[serde(default)]
    pub approx_seed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_vram_mb: Option<u64>,
}

const fn default_sample_rate() -> f64 {
    1.0
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            device: DeviceRequest::Auto,
            metric: Metric::Ip,
            search_mode: SearchMode::Exact,
            approx_sample_rate: default_sample_rate(),
            approx_seed: 0,
            max_vram_mb: None,
        }
    }
}

impl VectorConfig {
    pub fn validate(&self) -> Result<()> {
        let rate = self.approx_sample_rate;
        if rate.is_nan() || rate <= 0.0 || rate > 1.0 {
            return Err(VectorStoreError::config_invalid(format!(
                "approx_sample_rate must be in (0, 1], got {rate}"
            )));
        }
        if self.max_vram_mb == Some(0) {
            return Err(VectorStoreError::config_invalid(
                "max_vram_mb must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Effective configuration for one call. `self` is left untouched.
    pub fn with_overrides(&self, overrides: &SearchOverrides) -> Result<Self> {
        let mut merged = self.clone();
        if let Some(device) = overrides.device {
            merged.device = device;
        }
        if let Some(mode) = overrides.search_mode {
            merged.search_mode = mode;
        }
        if let Some(rate) = overrides.approx_sample_rate {
            merged.approx_sample_rate = rate;
        }
        if let Some(max_vram_mb) = overrides.max_vram_mb {
            merged.max_vram_mb = Some(max_vram_mb);
        }
        merged.validate()?;
        Ok(merged)
    }
}

/// Per-call overlay on top of a persisted [`VectorConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_mode: Option<SearchMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approx_sample_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_vram_mb: Option<u64>,
}

impl SearchOverrides {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_choices_case_insensitively() {
        assert_eq!("CUDA".parse::<DeviceRequest>().unwrap(), DeviceRequest::Cuda);
        assert_eq!(" Mps ".parse::<DeviceRequest>().unwrap(), DeviceRequest::Mps);
        assert_eq!("L2".parse::<Metric>().unwrap(), Metric::L2);
        assert_eq!("Approx".parse::<SearchMode>().unwrap(), SearchMode::Approx);
    }

    #[test]
    fn unknown_choice_is_config_invalid() {
        let err = "rocm".parse::<DeviceRequest>().unwrap_err();
        assert!(matches!(err, VectorStoreError::ConfigInvalid(_)));
        assert!(err.to_string().contains("rocm"));
        assert!("cosine".parse::<Metric>().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_rates() {
        for rate in [0.0, -0.5, 1.5, f64::NAN] {
            let config = VectorConfig {
                approx_sample_rate: rate,
                ..VectorConfig::default()
            };
            assert!(config.validate().is_err(), "rate {rate} should be rejected");
        }
        let config = VectorConfig {
            approx_sample_rate: 1.0,
            ..VectorConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_vram_budget() {
        let config = VectorConfig {
            max_vram_mb: Some(0),
            ..VectorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(VectorStoreError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn overrides_do_not_mutate_base() {
        let base = VectorConfig::default();
        let overrides = SearchOverrides {
            device: Some(DeviceRequest::Cpu),
            search_mode: Some(SearchMode::Approx),
            approx_sample_rate: Some(0.25),
            max_vram_mb: Some(64),
        };
        let merged = base.with_overrides(&overrides).unwrap();
        assert_eq!(merged.device, DeviceRequest::Cpu);
        assert_eq!(merged.search_mode, SearchMode::Approx);
        assert_eq!(merged.max_vram_mb, Some(64));
        assert_eq!(base, VectorConfig::default());
        assert!(SearchOverrides::default().is_empty());
    }

    #[test]
    fn invalid_override_is_rejected() {
        let overrides = SearchOverrides {
            approx_sample_rate: Some(2.0),
            ..SearchOverrides::default()
        };
        assert!(VectorConfig::default().with_overrides(&overrides).is_err());
    }

    #[test]
    fn config_json_uses_lowercase_names() {
        let config = VectorConfig {
            device: DeviceRequest::Mps,
            metric: Metric::L2,
            search_mode: SearchMode::Approx,
            approx_sample_rate: 0.5,
            approx_seed: 7,
            max_vram_mb: Some(128),
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["device"], "mps");
        assert_eq!(json["metric"], "l2");
        assert_eq!(json["search_mode"], "approx");
        let back: VectorConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
