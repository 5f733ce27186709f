/// Docker Compose style port spec grammar: `[IP:]HOST[:CONTAINER][/PROTO]`.
///
/// A bare integer means `container = N`, `host = N` for a non-container
/// service or `host = None` (unpublished, container picks its own) for a
/// container service.

use anyhow::{anyhow, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub bind_ip: Option<String>,
    pub host: Option<u16>,
    pub container: u16,
    pub protocol: Protocol,
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ip) = &self.bind_ip {
            write!(f, "{}:", ip)?;
        }
        if let Some(host) = self.host {
            write!(f, "{}:{}", host, self.container)?;
        } else {
            write!(f, "{}", self.container)?;
        }
        if self.protocol == Protocol::Udp {
            write!(f, "/udp")?;
        }
        Ok(())
    }
}

/// Parse a single port spec string. `is_container` selects the default
/// host-port behaviour for a bare integer (see module docs).
pub fn parse_port_spec(raw: &str, is_container: bool) -> Result<PortSpec> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(anyhow!("empty port spec"));
    }

    let (body, protocol) = match raw.rsplit_once('/') {
        Some((b, "udp")) => (b, Protocol::Udp),
        Some((b, "tcp")) => (b, Protocol::Tcp),
        Some(_) => return Err(anyhow!("invalid port spec protocol: {}", raw)),
        None => (raw, Protocol::Tcp),
    };

    // Split on ':' and peel host/container off the right — this naturally
    // handles IPv6 bind addresses (e.g. "::1:3000:8080") since everything
    // left of the last two numeric fields is taken as the bind address,
    // colons and all.
    let fields: Vec<&str> = body.split(':').collect();
    let (bind_ip, host, container) = match fields.len() {
        1 => {
            let n: u16 = fields[0]
                .parse()
                .map_err(|_| anyhow!("invalid port number in spec: {}", raw))?;
            if is_container {
                (None, None, n)
            } else {
                (None, Some(n), n)
            }
        }
        2 => {
            let h: u16 = fields[0]
                .parse()
                .map_err(|_| anyhow!("invalid host port in spec: {}", raw))?;
            let c: u16 = fields[1]
                .parse()
                .map_err(|_| anyhow!("invalid container port in spec: {}", raw))?;
            (None, Some(h), c)
        }
        n if n >= 3 => {
            let h: u16 = fields[n - 2]
                .parse()
                .map_err(|_| anyhow!("invalid host port in spec: {}", raw))?;
            let c: u16 = fields[n - 1]
                .parse()
                .map_err(|_| anyhow!("invalid container port in spec: {}", raw))?;
            let ip = fields[..n - 2].join(":");
            (Some(ip), Some(h), c)
        }
        _ => return Err(anyhow!("invalid port spec: {}", raw)),
    };

    Ok(PortSpec {
        bind_ip,
        host,
        container,
        protocol,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_integer_non_container() {
        let p = parse_port_spec("8080", false).unwrap();
        assert_eq!(p.host, Some(8080));
        assert_eq!(p.container, 8080);
        assert_eq!(p.protocol, Protocol::Tcp);
    }

    #[test]
    fn bare_integer_container_is_unpublished() {
        let p = parse_port_spec("8080", true).unwrap();
        assert_eq!(p.host, None);
        assert_eq!(p.container, 8080);
    }

    #[test]
    fn host_colon_container() {
        let p = parse_port_spec("8080:80", false).unwrap();
        assert_eq!(p.host, Some(8080));
        assert_eq!(p.container, 80);
    }

    #[test]
    fn ip_host_container() {
        let p = parse_port_spec("127.0.0.1:8080:80", false).unwrap();
        assert_eq!(p.bind_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(p.host, Some(8080));
        assert_eq!(p.container, 80);
    }

    #[test]
    fn udp_suffix() {
        let p = parse_port_spec("53:53/udp", false).unwrap();
        assert_eq!(p.protocol, Protocol::Udp);
    }

    #[test]
    fn ipv6_bind_prefix() {
        let p = parse_port_spec("::1:3000:8080", false).unwrap();
        assert_eq!(p.bind_ip.as_deref(), Some("::1"));
        assert_eq!(p.host, Some(3000));
        assert_eq!(p.container, 8080);
    }

    #[test]
    fn round_trip_format() {
        let p = parse_port_spec("127.0.0.1:8080:80/udp", false).unwrap();
        let formatted = p.to_string();
        let reparsed = parse_port_spec(&formatted, false).unwrap();
        assert_eq!(p, reparsed);
    }
}
