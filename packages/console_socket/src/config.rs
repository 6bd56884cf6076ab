use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;

use crate::error::SocketError;
use crate::port::{
    DEFAULT_BIND_ATTEMPTS, DEFAULT_PORT_RANGE_SIZE, DEFAULT_PORT_RANGE_START, PortAllocator,
};

// =============================================================================
// File config (figment-deserialized from defaults / console-socket.toml / env)
// =============================================================================
//
//   console-socket.toml:   port_range_start = 4000
//                          host = "127.0.0.1"
//
//   env var:               CONSOLE_SOCKET_PORT_RANGE_START=4000

pub const ENV_PREFIX: &str = "CONSOLE_SOCKET_";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SocketFileConfig {
    /// Address to bind. Unset means probe for a dual-stack wildcard.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,
    #[serde(default = "default_port_range_size")]
    pub port_range_size: u16,
    #[serde(default = "default_bind_attempts")]
    pub bind_attempts: u32,
}

impl Default for SocketFileConfig {
    fn default() -> Self {
        Self {
            host: None,
            port_range_start: default_port_range_start(),
            port_range_size: default_port_range_size(),
            bind_attempts: default_bind_attempts(),
        }
    }
}

fn default_port_range_start() -> u16 {
    DEFAULT_PORT_RANGE_START
}
fn default_port_range_size() -> u16 {
    DEFAULT_PORT_RANGE_SIZE
}
fn default_bind_attempts() -> u32 {
    DEFAULT_BIND_ATTEMPTS
}

/// Build a figment that layers: defaults → `config_file` (if any) → CONSOLE_SOCKET_* env vars.
pub fn load_config(config_file: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(SocketFileConfig::default()));
    if let Some(path) = config_file {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed(ENV_PREFIX))
}

// =============================================================================
// Runtime config
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocketConfig {
    /// Explicit bind address, or `None` for the probed wildcard.
    pub host: Option<IpAddr>,
    pub ports: PortAllocator,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            host: None,
            ports: PortAllocator::default(),
        }
    }
}

impl SocketConfig {
    pub fn from_file(fc: &SocketFileConfig) -> Result<Self, SocketError> {
        let host = fc
            .host
            .as_deref()
            .map(|h| {
                h.parse::<IpAddr>()
                    .map_err(|e| SocketError::InvalidArgument(format!("invalid host {h:?}: {e}")))
            })
            .transpose()?;
        let ports = PortAllocator::new(fc.port_range_start, fc.port_range_size, fc.bind_attempts)?;
        Ok(Self { host, ports })
    }

    /// Loopback-only config, handy for embedding and tests.
    pub fn loopback() -> Self {
        Self {
            host: Some(IpAddr::from([127, 0, 0, 1])),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_config_defaults() {
        let d = SocketFileConfig::default();
        assert!(d.host.is_none());
        assert_eq!(d.port_range_start, 3000);
        assert_eq!(d.port_range_size, 5000);
        assert_eq!(d.bind_attempts, 20);
    }

    #[test]
    fn test_from_file_defaults() {
        let sc = SocketConfig::from_file(&SocketFileConfig::default()).unwrap();
        assert_eq!(sc, SocketConfig::default());
    }

    #[test]
    fn test_from_file_parses_host() {
        let fc = SocketFileConfig {
            host: Some("::1".to_string()),
            ..Default::default()
        };
        let sc = SocketConfig::from_file(&fc).unwrap();
        assert_eq!(sc.host, Some("::1".parse().unwrap()));
    }

    #[test]
    fn test_from_file_rejects_bad_host() {
        let fc = SocketFileConfig {
            host: Some("localhost:80".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            SocketConfig::from_file(&fc),
            Err(SocketError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_from_file_rejects_bad_range() {
        let fc = SocketFileConfig {
            port_range_start: 65000,
            port_range_size: 1000,
            ..Default::default()
        };
        assert!(SocketConfig::from_file(&fc).is_err());
    }

    #[test]
    fn test_load_config_defaults() {
        let fc: SocketFileConfig = load_config(None).extract().unwrap();
        assert_eq!(fc.port_range_start, 3000);
        assert_eq!(fc.bind_attempts, 20);
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("console-socket.toml");
        std::fs::write(
            &path,
            "host = \"127.0.0.1\"\nport_range_start = 9000\nport_range_size = 10\nbind_attempts = 3\n",
        )
        .unwrap();

        let fc: SocketFileConfig = load_config(Some(&path)).extract().unwrap();
        assert_eq!(fc.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(fc.port_range_start, 9000);
        assert_eq!(fc.port_range_size, 10);
        assert_eq!(fc.bind_attempts, 3);

        let sc = SocketConfig::from_file(&fc).unwrap();
        assert_eq!(sc.ports.range_end(), 9010);
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: SocketFileConfig = load_config(Some(&tmp.path().join("absent.toml")))
            .extract()
            .unwrap();
        assert_eq!(fc, SocketFileConfig::default());
    }

    #[test]
    fn test_loopback() {
        let sc = SocketConfig::loopback();
        assert_eq!(sc.host, Some(IpAddr::from([127, 0, 0, 1])));
        assert_eq!(sc.ports, PortAllocator::default());
    }
}
