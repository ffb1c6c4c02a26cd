use crate::domain::money::FeeRate;
use crate::error::{Result, SettlementError};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct FeeSettings {
    /// The one place the platform fee percentage is defined.
    pub platform_fee_percent: u8,
}

impl Default for FeeSettings {
    fn default() -> Self {
        Self {
            platform_fee_percent: 20,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct GatewaySettings {
    #[serde(default = "default_gateway_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub webhook_secret: String,
    #[serde(default = "default_webhook_tolerance_seconds")]
    pub webhook_tolerance_seconds: i64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            timeout: default_gateway_timeout(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            webhook_secret: String::new(),
            webhook_tolerance_seconds: default_webhook_tolerance_seconds(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ReconcilerSettings {
    #[serde(default = "default_max_deferred_attempts")]
    pub max_deferred_attempts: u32,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            max_deferred_attempts: default_max_deferred_attempts(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct GuarantorSettings {
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for GuarantorSettings {
    fn default() -> Self {
        Self {
            sweep_interval: default_sweep_interval(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub fees: FeeSettings,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub reconciler: ReconcilerSettings,
    #[serde(default)]
    pub guarantor: GuarantorSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fees: FeeSettings::default(),
            currency: default_currency(),
            gateway: GatewaySettings::default(),
            reconciler: ReconcilerSettings::default(),
            guarantor: GuarantorSettings::default(),
        }
    }
}

impl Settings {
    /// Loads defaults, then the TOML file (if given and present), then
    /// `SHOUTOUT_`-prefixed environment variables. Nested keys use `__`,
    /// e.g. `SHOUTOUT_FEES__PLATFORM_FEE_PERCENT=15`.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = config_path {
            if !path.exists() {
                return Err(SettlementError::ValidationError(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("SHOUTOUT_").split("__"));

        let settings: Settings = figment
            .extract()
            .map_err(|e| SettlementError::ValidationError(format!("invalid configuration: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        FeeRate::new(self.fees.platform_fee_percent)?;
        if self.gateway.max_attempts == 0 {
            return Err(SettlementError::ValidationError(
                "gateway.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.currency.trim().is_empty() {
            return Err(SettlementError::ValidationError(
                "currency must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn fee_rate(&self) -> Result<FeeRate> {
        FeeRate::new(self.fees.platform_fee_percent)
    }
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_gateway_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    2_000
}

fn default_webhook_tolerance_seconds() -> i64 {
    300 // 5 minutes
}

fn default_max_deferred_attempts() -> u32 {
    5
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(600)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.fee_rate().unwrap().percent(), 20);
        assert_eq!(settings.gateway.max_attempts, 3);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "currency = \"eur\"\n[fees]\nplatform_fee_percent = 15\n[gateway]\ntimeout = \"3s\""
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.currency, "eur");
        assert_eq!(settings.fees.platform_fee_percent, 15);
        assert_eq!(settings.gateway.timeout, Duration::from_secs(3));
        assert_eq!(settings.gateway.max_attempts, 3);
    }

    #[test]
    fn test_out_of_range_fee_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[fees]\nplatform_fee_percent = 120").unwrap();
        assert!(Settings::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_missing_config_file() {
        assert!(Settings::load(Some(Path::new("/nonexistent/shoutout.toml"))).is_err());
    }
}
