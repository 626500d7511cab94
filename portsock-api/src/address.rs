use crate::error::ArgumentError;

/// Well-known service names and their ports.
const WELL_KNOWN_SERVICES: &[(&str, u16)] = &[
    ("echo", 7),
    ("discard", 9),
    ("daytime", 13),
    ("ftp-data", 20),
    ("ftp", 21),
    ("ssh", 22),
    ("telnet", 23),
    ("smtp", 25),
    ("time", 37),
    ("domain", 53),
    ("tftp", 69),
    ("http", 80),
    ("pop3", 110),
    ("sunrpc", 111),
    ("nntp", 119),
    ("ntp", 123),
    ("imap", 143),
    ("snmp", 161),
    ("ldap", 389),
    ("https", 443),
    ("syslog", 514),
    ("submission", 587),
    ("ldaps", 636),
    ("imaps", 993),
    ("pop3s", 995),
    ("mqtt", 1883),
    ("http-alt", 8080),
    ("mqtts", 8883),
];

/// The remote service to connect to: a port number or a service name.
///
/// Ports are kept as given until [`Service::resolve_port`] so out-of-range values fail with an
/// [`ArgumentError`] instead of being truncated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Service {
    /// A numeric port.
    Port(i64),
    /// A numeric string or a well-known service name such as `"http"`.
    Name(String),
}

impl Service {
    /// Resolves the service to a port in `1..=65535`.
    pub fn resolve_port(&self) -> Result<u16, ArgumentError> {
        match self {
            Service::Port(port) => validate_port(*port),
            Service::Name(name) => {
                let name = name.trim();
                if let Ok(port) = name.parse::<i64>() {
                    return validate_port(port);
                }
                WELL_KNOWN_SERVICES
                    .iter()
                    .find(|(known, _)| known.eq_ignore_ascii_case(name))
                    .map(|(_, port)| *port)
                    .ok_or_else(|| ArgumentError::UnknownService(name.to_owned()))
            }
        }
    }
}

/// Checks that `port` is a connectable port.
pub fn validate_port(port: i64) -> Result<u16, ArgumentError> {
    match u16::try_from(port) {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ArgumentError::InvalidPort(port)),
    }
}

impl From<u16> for Service {
    fn from(port: u16) -> Self {
        Service::Port(port.into())
    }
}

impl From<u32> for Service {
    fn from(port: u32) -> Self {
        Service::Port(port.into())
    }
}

impl From<i32> for Service {
    fn from(port: i32) -> Self {
        Service::Port(port.into())
    }
}

impl From<i64> for Service {
    fn from(port: i64) -> Self {
        Service::Port(port)
    }
}

impl From<&str> for Service {
    fn from(name: &str) -> Self {
        Service::Name(name.to_owned())
    }
}

impl From<String> for Service {
    fn from(name: String) -> Self {
        Service::Name(name)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Service::from(80u16), 80; "u16 port")]
    #[test_case(Service::from(65535), 65535; "highest port")]
    #[test_case(Service::from("http"), 80; "service name")]
    #[test_case(Service::from("HTTPS"), 443; "case insensitive name")]
    #[test_case(Service::from(" 8080 "), 8080; "numeric string")]
    fn resolves(service: Service, expected: u16) {
        assert_eq!(service.resolve_port(), Ok(expected));
    }

    #[test_case(Service::from(0), 0; "zero")]
    #[test_case(Service::from(-1), -1; "negative")]
    #[test_case(Service::from(65536), 65536; "just above range")]
    #[test_case(Service::from(2147483647), 2147483647; "i32 max")]
    #[test_case(Service::from("99999"), 99999; "numeric string out of range")]
    fn rejects_out_of_range(service: Service, port: i64) {
        assert_eq!(service.resolve_port(), Err(ArgumentError::InvalidPort(port)));
    }

    #[test]
    fn rejects_unknown_names() {
        assert_eq!(
            Service::from("no-such-service").resolve_port(),
            Err(ArgumentError::UnknownService("no-such-service".to_owned()))
        );
    }
}
