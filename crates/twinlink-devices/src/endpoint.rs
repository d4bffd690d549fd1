//! Source endpoint URLs: `scheme://host[:port][/path][?query]`.

use std::fmt;

use crate::driver::DriverError;

/// A parsed source endpoint URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// URL scheme, selects the driver
    pub scheme: String,
    /// Host name or address (IPv6 without brackets)
    pub host: String,
    /// Explicit port, if any
    pub port: Option<u16>,
    /// Non-empty path segments
    pub path: Vec<String>,
    /// Query parameters in order
    pub query: Vec<(String, String)>,
    raw: String,
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Self, DriverError> {
        let invalid = |reason: &str| DriverError::InvalidUrl(format!("{url}: {reason}"));

        let (scheme, rest) = url.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        if scheme.is_empty() {
            return Err(invalid("missing scheme"));
        }

        let (rest, query) = match rest.split_once('?') {
            Some((r, q)) => (r, q),
            None => (rest, ""),
        };
        let (authority, path) = match rest.split_once('/') {
            Some((a, p)) => (a, p),
            None => (rest, ""),
        };

        let (host, port) = split_host_port(authority).ok_or_else(|| invalid("bad authority"))?;
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let query = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect();

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_string(),
            port,
            path: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            query,
            raw: url.to_string(),
        })
    }

    /// First value of a query parameter.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// `host:port` for a TCP connect, with the given default port.
    pub fn socket_address(&self, default_port: u16) -> String {
        let port = self.port.unwrap_or(default_port);
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, port)
        } else {
            format!("{}:{}", self.host, port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_host_port(authority: &str) -> Option<(&str, Option<u16>)> {
    if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        return match after.strip_prefix(':') {
            Some(port) => Some((host, Some(port.parse().ok()?))),
            None if after.is_empty() => Some((host, None)),
            None => None,
        };
    }
    match authority.rsplit_once(':') {
        Some((host, port)) => Some((host, Some(port.parse().ok()?))),
        None => Some((authority, None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s7_url() {
        let ep = Endpoint::parse("s7://192.168.0.1/0/1").unwrap();
        assert_eq!(ep.scheme, "s7");
        assert_eq!(ep.host, "192.168.0.1");
        assert_eq!(ep.port, None);
        assert_eq!(ep.path, vec!["0", "1"]);
        assert_eq!(ep.socket_address(102), "192.168.0.1:102");
        assert_eq!(ep.to_string(), "s7://192.168.0.1/0/1");
    }

    #[test]
    fn test_parse_port_and_query() {
        let ep = Endpoint::parse("modbus://plc.local:5020?unit-identifier=3").unwrap();
        assert_eq!(ep.host, "plc.local");
        assert_eq!(ep.port, Some(5020));
        assert!(ep.path.is_empty());
        assert_eq!(ep.query_param("unit-identifier"), Some("3"));
        assert_eq!(ep.query_param("missing"), None);
    }

    #[test]
    fn test_parse_ipv6() {
        let ep = Endpoint::parse("modbus://[::1]:502").unwrap();
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.socket_address(0), "[::1]:502");
    }

    #[test]
    fn test_invalid_urls() {
        for url in ["192.168.0.1/0/1", "://host", "s7://", "s7://host:notaport/0/1"] {
            assert!(
                matches!(Endpoint::parse(url), Err(DriverError::InvalidUrl(_))),
                "{url} should be rejected"
            );
        }
    }
}
