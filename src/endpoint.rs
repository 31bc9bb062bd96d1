use std::fmt::{self, Debug, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

pub const PRODUCTION_HOST: &str = "api.push.apple.com";
pub const DEVELOPMENT_HOST: &str = "api.sandbox.push.apple.com";

/// The default APNs port.
pub const DEFAULT_PORT: u16 = 443;

/// An alternative port APNs accepts provider connections on, for networks
/// that block outbound 443.
pub const ALTERNATE_PORT: u16 = 2197;

/// Apple Push Notification service endpoint.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Production,
    Development,
    Custom { host: String, port: u16 },
}

impl Endpoint {
    pub fn host(&self) -> &str {
        match self {
            Self::Production => PRODUCTION_HOST,
            Self::Development => DEVELOPMENT_HOST,
            Self::Custom { host, .. } => host,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Self::Production | Self::Development => DEFAULT_PORT,
            Self::Custom { port, .. } => *port,
        }
    }

    /// The `host:port` authority used for dialing, SNI, and the
    /// `:authority` pseudo-header.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host(), self.port())
    }

    /// Returns the same host on a different port, e.g.
    /// [`ALTERNATE_PORT`].
    pub fn with_port(&self, port: u16) -> Self {
        Self::Custom {
            host: self.host().to_owned(),
            port,
        }
    }
}

impl Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => f.debug_tuple("Production").field(&self.authority()).finish(),
            Self::Development => f
                .debug_tuple("Development")
                .field(&self.authority())
                .finish(),
            Self::Custom { host, port } => {
                f.debug_tuple("Custom").field(host).field(port).finish()
            }
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => f.write_str("production"),
            Self::Development => f.write_str("development"),
            Self::Custom { host, port } => write!(f, "https://{host}:{port}"),
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::Production
    }
}

impl FromStr for Endpoint {
    type Err = url::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("prod") || s.eq_ignore_ascii_case("production") {
            Ok(Self::Production)
        } else if s.eq_ignore_ascii_case("dev")
            || s.eq_ignore_ascii_case("development")
            || s.eq_ignore_ascii_case("sandbox")
        {
            Ok(Self::Development)
        } else {
            let url = Url::parse(s)?;
            let host = url.host_str().ok_or(url::ParseError::EmptyHost)?.to_owned();
            let port = url.port().unwrap_or(DEFAULT_PORT);
            Ok(Self::Custom { host, port })
        }
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{Error, Unexpected};

        let s = String::deserialize(deserializer)?;
        Endpoint::from_str(&s)
            .map_err(|err| Error::invalid_value(Unexpected::Str(&s), &err.to_string().as_str()))
    }
}

impl Serialize for Endpoint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_authorities() {
        assert_eq!(Endpoint::Production.authority(), "api.push.apple.com:443");
        assert_eq!(
            Endpoint::Development.authority(),
            "api.sandbox.push.apple.com:443"
        );
    }

    #[test]
    fn alternate_port() {
        let endpoint = Endpoint::Production.with_port(ALTERNATE_PORT);
        assert_eq!(endpoint.authority(), "api.push.apple.com:2197");
    }

    #[test]
    fn parses_aliases() {
        assert_eq!("prod".parse::<Endpoint>().unwrap(), Endpoint::Production);
        assert_eq!(
            "Production".parse::<Endpoint>().unwrap(),
            Endpoint::Production
        );
        assert_eq!("dev".parse::<Endpoint>().unwrap(), Endpoint::Development);
        assert_eq!(
            "sandbox".parse::<Endpoint>().unwrap(),
            Endpoint::Development
        );
    }

    #[test]
    fn parses_custom_url() {
        let endpoint = "https://localhost:2197".parse::<Endpoint>().unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Custom {
                host: "localhost".into(),
                port: 2197,
            }
        );

        let endpoint = "https://apns.example.com".parse::<Endpoint>().unwrap();
        assert_eq!(endpoint.port(), DEFAULT_PORT);
    }

    #[test]
    fn rejects_hostless_url() {
        assert!("https://".parse::<Endpoint>().is_err());
    }

    #[test]
    fn serde_round_trip() {
        for endpoint in [
            Endpoint::Production,
            Endpoint::Development,
            Endpoint::Custom {
                host: "apns.example.com".into(),
                port: 2197,
            },
        ] {
            let json = serde_json::to_string(&endpoint).unwrap();
            let parsed: Endpoint = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, endpoint);
        }
    }
}
