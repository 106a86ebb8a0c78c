use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::client::ResolveOptions;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("Invalid retry count: {0}")]
    InvalidRetries(String),

    #[error("Invalid UDP payload size: {0}")]
    InvalidPayloadSize(String),

    #[error("Invalid server domain: {0}")]
    InvalidServerDomain(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),

    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneConfig {
    /// Folder holding the list files and the zone snapshot directory
    pub config_folder: PathBuf,

    /// Domain this server answers as; used in synthetic SOA/NS records
    pub server_domain: String,

    /// Timeout for each refresh query
    pub refresh_timeout: Duration,

    /// Retries per refresh query
    pub refresh_retries: u8,

    /// Delay before a manually triggered refresh runs
    pub trigger_delay: Duration,

    /// EDNS payload size advertised on refresh queries
    pub udp_payload_size: u16,

    /// Prefer IPv6 when resolving primary name server addresses
    pub prefer_ipv6: bool,

    /// TTL applied to records added without an explicit TTL
    pub default_ttl: u32,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            config_folder: PathBuf::from("./config"),
            server_domain: "localhost".to_string(),
            refresh_timeout: Duration::from_secs(10),
            refresh_retries: 5,
            trigger_delay: Duration::from_millis(crate::zone::constants::DEFAULT_TRIGGER_DELAY_MS),
            udp_payload_size: 1232,
            prefer_ipv6: false,
            default_ttl: 3600,
        }
    }
}

/// Keys accepted in the TOML file; every key is optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ZoneConfigFile {
    config_folder: Option<PathBuf>,
    server_domain: Option<String>,
    refresh_timeout_secs: Option<u64>,
    refresh_retries: Option<u8>,
    trigger_delay_ms: Option<u64>,
    udp_payload_size: Option<u16>,
    prefer_ipv6: Option<bool>,
    default_ttl: Option<u32>,
}

impl ZoneConfig {
    /// Create a ZoneConfig from environment variables
    /// Returns Err if critical configuration is invalid
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load overrides from a TOML file on top of the defaults, then apply
    /// environment overrides on top of that
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML content as partial overrides of the defaults
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ZoneConfigFile =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        let mut config = Self::default();
        if let Some(folder) = file.config_folder {
            config.config_folder = folder;
        }
        if let Some(domain) = file.server_domain {
            config.server_domain = domain;
        }
        if let Some(secs) = file.refresh_timeout_secs {
            config.refresh_timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = file.refresh_retries {
            config.refresh_retries = retries;
        }
        if let Some(ms) = file.trigger_delay_ms {
            config.trigger_delay = Duration::from_millis(ms);
        }
        if let Some(size) = file.udp_payload_size {
            config.udp_payload_size = size;
        }
        if let Some(prefer) = file.prefer_ipv6 {
            config.prefer_ipv6 = prefer;
        }
        if let Some(ttl) = file.default_ttl {
            config.default_ttl = ttl;
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(folder) = std::env::var("AUTHZONE_CONFIG_FOLDER") {
            self.config_folder = PathBuf::from(folder);
        }

        if let Ok(domain) = std::env::var("AUTHZONE_SERVER_DOMAIN") {
            self.server_domain = domain;
        }

        if let Ok(timeout_str) = std::env::var("AUTHZONE_REFRESH_TIMEOUT") {
            let timeout_secs = timeout_str
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidTimeout(timeout_str.clone()))?;
            self.refresh_timeout = Duration::from_secs(timeout_secs);
        }

        if let Ok(retries) = std::env::var("AUTHZONE_REFRESH_RETRIES") {
            self.refresh_retries = retries
                .parse::<u8>()
                .map_err(|_| ConfigError::InvalidRetries(retries.clone()))?;
        }

        if let Ok(delay) = std::env::var("AUTHZONE_TRIGGER_DELAY_MS") {
            let ms = delay.parse::<u64>().map_err(|_| {
                ConfigError::ParseError(format!("Invalid trigger delay: {}", delay))
            })?;
            self.trigger_delay = Duration::from_millis(ms);
        }

        if let Ok(size) = std::env::var("AUTHZONE_UDP_PAYLOAD_SIZE") {
            self.udp_payload_size = size
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPayloadSize(size.clone()))?;
        }

        if let Ok(prefer) = std::env::var("AUTHZONE_PREFER_IPV6") {
            self.prefer_ipv6 = parse_bool(&prefer, false);
        }

        if let Ok(default_ttl) = std::env::var("AUTHZONE_DEFAULT_TTL") {
            self.default_ttl = default_ttl.parse::<u32>().map_err(|_| {
                ConfigError::ParseError(format!("Invalid default TTL: {}", default_ttl))
            })?;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if self.refresh_timeout.as_secs() > 300 {
            return Err(ConfigError::InvalidTimeout(
                "Timeout too large (max 300 seconds)".to_string(),
            ));
        }

        if self.refresh_retries > 10 {
            return Err(ConfigError::InvalidRetries(
                "Retry count too large (max 10)".to_string(),
            ));
        }

        if !(512..=4096).contains(&self.udp_payload_size) {
            return Err(ConfigError::InvalidPayloadSize(format!(
                "{} is outside 512..=4096",
                self.udp_payload_size
            )));
        }

        if !is_valid_domain(&self.server_domain) {
            return Err(ConfigError::InvalidServerDomain(self.server_domain.clone()));
        }

        Ok(())
    }

    /// Resolution knobs used by the refresh engine (sequential, one server at a time)
    pub fn refresh_options(&self) -> ResolveOptions {
        ResolveOptions {
            timeout: self.refresh_timeout,
            retries: self.refresh_retries,
            concurrency: 1,
            prefer_ipv6: self.prefer_ipv6,
            udp_payload_size: self.udp_payload_size,
        }
    }

    pub fn zones_folder(&self) -> PathBuf {
        self.config_folder.join("zones")
    }
}

/// Parse a boolean from a string, with a default value for invalid input
fn parse_bool(s: &str, default: bool) -> bool {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => default,
    }
}

/// Host-name syntax check: non-empty, labels of 1..=63 letters, digits,
/// hyphens or underscores, at most 253 characters overall
pub fn is_valid_domain(domain: &str) -> bool {
    let domain = domain.trim_end_matches('.');
    if domain.is_empty() || domain.len() > 253 {
        return false;
    }

    domain.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ZoneConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.zones_folder(), PathBuf::from("./config/zones"));
    }

    #[test]
    fn test_invalid_timeout() {
        let config = ZoneConfig {
            refresh_timeout: Duration::from_secs(400),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ZoneConfig {
            refresh_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_payload_and_domain() {
        let config = ZoneConfig {
            udp_payload_size: 100,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPayloadSize(_))));

        let config = ZoneConfig {
            server_domain: "bad domain".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidServerDomain(_))));
    }

    #[test]
    fn test_toml_partial_override() {
        let config = ZoneConfig::from_toml_str(
            r#"
            server_domain = "ns.example.net"
            refresh_retries = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.server_domain, "ns.example.net");
        assert_eq!(config.refresh_retries, 3);
        assert_eq!(config.refresh_timeout, Duration::from_secs(10));

        assert!(ZoneConfig::from_toml_str("unknown_key = 1").is_err());
        assert!(ZoneConfig::from_toml_str("refresh_retries = 50").is_err());
    }

    #[test]
    fn test_refresh_options_are_sequential() {
        let options = ZoneConfig::default().refresh_options();
        assert_eq!(options.concurrency, 1);
        assert_eq!(options.retries, 5);
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true", false));
        assert!(parse_bool("YES", false));
        assert!(parse_bool("on", false));
        assert!(!parse_bool("0", true));
        assert!(!parse_bool("off", true));
        assert!(parse_bool("invalid", true));
        assert!(!parse_bool("invalid", false));
    }

    #[test]
    fn test_domain_syntax() {
        assert!(is_valid_domain("localhost"));
        assert!(is_valid_domain("ns1.example.com."));
        assert!(is_valid_domain("_dmarc.example.com"));
        assert!(!is_valid_domain(""));
        assert!(!is_valid_domain("a..b"));
        assert!(!is_valid_domain(&"a".repeat(64)));
    }
}
