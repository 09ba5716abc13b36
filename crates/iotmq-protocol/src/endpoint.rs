//! Broker endpoint derivation.
//!
//! AWS IoT data endpoints follow the shape
//! ```text
//! {account_prefix}.iot.{region}.{domain}:8883
//! ```

use crate::error::{ProtocolError, ProtocolResult};

/// Standard port for MQTT over TLS.
pub const SECURE_MQTT_PORT: u16 = 8883;

const DEFAULT_DOMAIN: &str = "amazonaws.com";
const CHINA_DOMAIN: &str = "amazonaws.com.cn";

/// Host and port of the MQTT broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Build the account-specific IoT endpoint for a region.
    ///
    /// `domain` defaults to the partition domain of the region.
    pub fn aws_iot(prefix: &str, region: &str, domain: Option<&str>) -> ProtocolResult<Self> {
        if prefix.is_empty() {
            return Err(ProtocolError::InvalidEndpoint(
                "account endpoint prefix is empty".into(),
            ));
        }
        if region.is_empty() {
            return Err(ProtocolError::InvalidEndpoint("region is empty".into()));
        }
        let domain = domain.unwrap_or_else(|| region_domain(region));
        Ok(Self::new(
            format!("{prefix}.iot.{region}.{domain}"),
            SECURE_MQTT_PORT,
        ))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Domain suffix of the partition a region belongs to.
pub fn region_domain(region: &str) -> &'static str {
    if region.starts_with("cn-") {
        CHINA_DOMAIN
    } else {
        DEFAULT_DOMAIN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aws_iot_endpoint() {
        let endpoint = Endpoint::aws_iot("a1b2c3-ats", "us-east-1", None).unwrap();
        assert_eq!(endpoint.host, "a1b2c3-ats.iot.us-east-1.amazonaws.com");
        assert_eq!(endpoint.port, 8883);
        assert_eq!(
            endpoint.to_string(),
            "a1b2c3-ats.iot.us-east-1.amazonaws.com:8883"
        );
    }

    #[test]
    fn china_region_uses_cn_domain() {
        let endpoint = Endpoint::aws_iot("a1b2c3", "cn-north-1", None).unwrap();
        assert_eq!(endpoint.host, "a1b2c3.iot.cn-north-1.amazonaws.com.cn");
    }

    #[test]
    fn explicit_domain_wins() {
        let endpoint = Endpoint::aws_iot("a1b2c3", "us-east-1", Some("example.net")).unwrap();
        assert_eq!(endpoint.host, "a1b2c3.iot.us-east-1.example.net");
    }

    #[test]
    fn empty_parts_rejected() {
        assert!(Endpoint::aws_iot("", "us-east-1", None).is_err());
        assert!(Endpoint::aws_iot("a1b2c3", "", None).is_err());
    }
}
