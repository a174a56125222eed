use axum::http::HeaderMap;
use ipnet::IpNet;
use std::net::IpAddr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid trusted subnet '{0}'")]
pub struct InvalidSubnet(pub String);

/// The CIDR gate in front of the internal stats endpoint.
///
/// Unconfigured means nobody is trusted: `allows` is false for every
/// address. A configured-but-unparseable CIDR is rejected at construction,
/// which the supervisor treats as fatal.
#[derive(Debug, Clone, Default)]
pub struct TrustedSubnet {
    net: Option<IpNet>,
}

impl TrustedSubnet {
    /// A gate that denies unconditionally.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn parse(cidr: &str) -> Result<Self, InvalidSubnet> {
        let cidr = cidr.trim();
        let net = cidr
            .parse::<IpNet>()
            .map_err(|_| InvalidSubnet(cidr.to_string()))?;
        Ok(Self { net: Some(net) })
    }

    /// Builds the gate from the optional configuration value; `None` or an
    /// empty string yields the deny-all gate.
    pub fn from_config(cidr: Option<&str>) -> Result<Self, InvalidSubnet> {
        match cidr {
            Some(cidr) if !cidr.trim().is_empty() => Self::parse(cidr),
            _ => Ok(Self::none()),
        }
    }

    pub fn allows(&self, ip: IpAddr) -> bool {
        self.net.is_some_and(|net| net.contains(&ip))
    }
}

/// Resolves the stats caller's address: `X-Real-IP` first, then the first
/// entry of a comma-separated `X-Forwarded-For`. An absent or unparseable
/// address yields `None`, which the handler turns into 403.
pub fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(value) = headers.get("x-real-ip") {
        return value.to_str().ok()?.trim().parse().ok();
    }
    let forwarded = headers.get("x-forwarded-for")?.to_str().ok()?;
    forwarded.split(',').next()?.trim().parse().ok()
}
