use std::fmt;

use crate::commands::{cmds, Identity};
use crate::config::ConnectionConfig;
use crate::transport::{ScpiStream, Transport, TransportError};

/// Default port of the raw SCPI socket on Tektronix scopes.
pub const DEFAULT_SOCKET_PORT: u16 = 4000;

/// Where a scope can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Serial { path: String },
    Tcp { host: String, port: u16 },
}

impl Resource {
    /// Parse a VISA-style resource string.
    ///
    /// Accepted forms:
    /// - `TCPIP::192.168.0.10::4000::SOCKET`, `TCPIP0::scope.lan::SOCKET` (port 4000)
    /// - `ASRL/dev/ttyUSB0::INSTR`, `ASRL3::INSTR` (`COM3`)
    /// - `192.168.0.10:4000`
    /// - `/dev/ttyUSB0`, `COM3`
    pub fn parse(text: &str) -> Result<Self, ConnectorError> {
        let text = text.trim();
        let invalid = |reason: &str| ConnectorError::Resource {
            resource: text.to_string(),
            reason: reason.to_string(),
        };

        if text.is_empty() {
            return Err(invalid("empty resource"));
        }

        let parts: Vec<&str> = text.split("::").collect();
        if parts.len() > 1 {
            let interface = parts[0].to_ascii_uppercase();
            let class = parts[parts.len() - 1].to_ascii_uppercase();

            if let Some(board) = interface.strip_prefix("TCPIP") {
                if !board.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid("unknown interface"));
                }
                if class != "SOCKET" {
                    return Err(invalid("only raw SOCKET resources are supported over TCP/IP"));
                }
                return match parts.as_slice() {
                    [_, host, _] => Self::tcp(host, DEFAULT_SOCKET_PORT, invalid),
                    [_, host, port, _] => {
                        let port = port.parse().map_err(|_| invalid("invalid port"))?;
                        Self::tcp(host, port, invalid)
                    }
                    _ => Err(invalid("expected TCPIP::host[::port]::SOCKET")),
                };
            }

            if interface.starts_with("ASRL") {
                if parts.len() != 2 || class != "INSTR" {
                    return Err(invalid("expected ASRL<port>::INSTR"));
                }
                let port = &parts[0][4..];
                if port.is_empty() {
                    return Err(invalid("missing serial port"));
                }
                let path = if port.bytes().all(|b| b.is_ascii_digit()) {
                    format!("COM{port}")
                } else {
                    port.to_string()
                };
                return Ok(Self::Serial { path });
            }

            return Err(invalid("unknown interface"));
        }

        // Bare `host:port`, unless it looks like a path.
        if let Some((host, port)) = text.rsplit_once(':') {
            if !text.contains('/') && !text.contains('\\') {
                let port = port.parse().map_err(|_| invalid("invalid port"))?;
                return Self::tcp(host, port, invalid);
            }
        }

        Ok(Self::Serial {
            path: text.to_string(),
        })
    }

    fn tcp(
        host: &str,
        port: u16,
        invalid: impl Fn(&str) -> ConnectorError,
    ) -> Result<Self, ConnectorError> {
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        Ok(Self::Tcp {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial { path } => write!(f, "ASRL{path}::INSTR"),
            Self::Tcp { host, port } => write!(f, "TCPIP::{host}::{port}::SOCKET"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("Invalid resource '{resource}': {reason}")]
    Resource { resource: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{resource} is not a Tektronix scope (identifies as '{manufacturer}')")]
    NotTektronix {
        resource: String,
        manufacturer: String,
    },
}

pub struct ScopeConnector;

impl ScopeConnector {
    /// Open the transport named by `resource` and, if configured, check that a Tektronix scope
    /// answers on it.
    pub fn connect(
        resource: &str,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn Transport>, ConnectorError> {
        let resource = Resource::parse(resource)?;
        log::debug!("Connecting to {}", resource);

        let mut transport: Box<dyn Transport> = match &resource {
            Resource::Serial { path } => Box::new(ScpiStream::open_serial(path, config)?),
            Resource::Tcp { host, port } => Box::new(ScpiStream::connect_tcp(host, *port, config)?),
        };

        if config.verify_identity {
            Self::verify(&resource, transport.as_mut())?;
        }
        Ok(transport)
    }

    fn verify(
        resource: &Resource,
        transport: &mut dyn Transport,
    ) -> Result<Identity, ConnectorError> {
        let reply = transport.query(cmds::IDN)?;
        let manufacturer = match Identity::parse(&reply) {
            Ok(identity) if identity.is_tektronix() => {
                log::info!(
                    "Connected to {} {} ({})",
                    identity.manufacturer,
                    identity.model,
                    identity.serial_number
                );
                return Ok(identity);
            }
            Ok(identity) => identity.manufacturer,
            Err(_) => reply,
        };
        Err(ConnectorError::NotTektronix {
            resource: resource.to_string(),
            manufacturer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Replies(VecDeque<&'static str>);

    impl Transport for Replies {
        fn write(&mut self, _command: &str) -> Result<(), TransportError> {
            Ok(())
        }

        fn query(&mut self, _command: &str) -> Result<String, TransportError> {
            Ok(self.0.pop_front().unwrap_or_default().to_string())
        }

        fn query_binary(&mut self, _command: &str) -> Result<Vec<u8>, TransportError> {
            Ok(Vec::new())
        }
    }

    fn tcp(host: &str, port: u16) -> Resource {
        Resource::Tcp {
            host: host.to_string(),
            port,
        }
    }

    fn serial(path: &str) -> Resource {
        Resource::Serial {
            path: path.to_string(),
        }
    }

    #[test]
    fn test_parse_visa_socket_resources() {
        assert_eq!(
            Resource::parse("TCPIP::192.168.0.10::4000::SOCKET").unwrap(),
            tcp("192.168.0.10", 4000)
        );
        assert_eq!(
            Resource::parse("TCPIP0::scope.lan::5025::socket").unwrap(),
            tcp("scope.lan", 5025)
        );
        assert_eq!(
            Resource::parse("TCPIP::scope.lan::SOCKET").unwrap(),
            tcp("scope.lan", DEFAULT_SOCKET_PORT)
        );
    }

    #[test]
    fn test_parse_serial_resources() {
        assert_eq!(Resource::parse("ASRL/dev/ttyUSB0::INSTR").unwrap(), serial("/dev/ttyUSB0"));
        assert_eq!(Resource::parse("ASRL3::INSTR").unwrap(), serial("COM3"));
        assert_eq!(Resource::parse("/dev/ttyACM0").unwrap(), serial("/dev/ttyACM0"));
        assert_eq!(Resource::parse("COM4").unwrap(), serial("COM4"));
    }

    #[test]
    fn test_parse_bare_host_and_port() {
        assert_eq!(Resource::parse("10.0.0.2:4000").unwrap(), tcp("10.0.0.2", 4000));
        assert!(Resource::parse("10.0.0.2:http").is_err());
    }

    #[test]
    fn test_parse_rejects_unsupported_resources() {
        for text in [
            "",
            "TCPIP::10.0.0.2::INSTR",
            "TCPIP::10.0.0.2::99999::SOCKET",
            "TCPIP::::SOCKET",
            "USB0::0x0699::0x0401::C000001::INSTR",
            "GPIB0::1::INSTR",
            "ASRL::INSTR",
        ] {
            assert!(
                matches!(Resource::parse(text), Err(ConnectorError::Resource { .. })),
                "{text} should be rejected"
            );
        }
    }

    #[test]
    fn test_display_round_trips() {
        for resource in [tcp("scope.lan", 4000), serial("/dev/ttyUSB0")] {
            assert_eq!(Resource::parse(&resource.to_string()).unwrap(), resource);
        }
    }

    #[test]
    fn test_identity_check() {
        let resource = tcp("scope.lan", 4000);

        let mut tek = Replies(VecDeque::from(["TEKTRONIX,MSO44,B012345,CF:91.1CT FV:1.44"]));
        let identity = ScopeConnector::verify(&resource, &mut tek).unwrap();
        assert_eq!(identity.model, "MSO44");

        let mut other = Replies(VecDeque::from(["KEYSIGHT,DSOX1204G,CN0000,1.0"]));
        assert!(matches!(
            ScopeConnector::verify(&resource, &mut other),
            Err(ConnectorError::NotTektronix { ref manufacturer, .. }) if manufacturer == "KEYSIGHT"
        ));

        let mut garbage = Replies(VecDeque::from(["hello"]));
        assert!(ScopeConnector::verify(&resource, &mut garbage).is_err());
    }
}
