//! Seed and peer host addresses

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use aerie_core::{Error, Result};

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// A host name (or IP) and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Host {
    /// Host name or IP literal
    pub name: String,
    /// TCP port
    pub port: u16,
}

impl Host {
    /// Build a host.
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Host {
            name: name.into(),
            port,
        }
    }

    /// Parse `"name"` or `"name:port"`, using `default_port` when absent.
    ///
    /// IPv6 literals go in brackets: `"[::1]:3000"`.
    pub fn parse(s: &str, default_port: u16) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::parameter("empty host"));
        }
        if let Some(rest) = s.strip_prefix('[') {
            let (addr, tail) = rest
                .split_once(']')
                .ok_or_else(|| Error::parameter(format!("unterminated IPv6 literal: {}", s)))?;
            let port = match tail.strip_prefix(':') {
                Some(p) => parse_port(p, s)?,
                None if tail.is_empty() => default_port,
                None => return Err(Error::parameter(format!("invalid host: {}", s))),
            };
            return Ok(Host::new(addr, port));
        }
        match s.rsplit_once(':') {
            Some((name, port)) if !name.contains(':') => {
                if name.is_empty() {
                    return Err(Error::parameter(format!("invalid host: {}", s)));
                }
                Ok(Host::new(name, parse_port(port, s)?))
            }
            _ => Ok(Host::new(s, default_port)),
        }
    }

    /// Parse a comma-separated host list such as `"h1:3000,h2"`.
    pub fn parse_list(s: &str, default_port: u16) -> Result<Vec<Host>> {
        let hosts = s
            .split(',')
            .filter(|h| !h.trim().is_empty())
            .map(|h| Host::parse(h, default_port))
            .collect::<Result<Vec<_>>>()?;
        if hosts.is_empty() {
            return Err(Error::parameter("host list is empty"));
        }
        Ok(hosts)
    }

    /// Resolve to socket addresses.
    pub async fn resolve(&self) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((self.name.as_str(), self.port))
            .await
            .map_err(|e| Error::connection(format!("cannot resolve {}: {}", self, e)))?
            .collect();
        if addrs.is_empty() {
            return Err(Error::connection(format!("{} resolved to no addresses", self)));
        }
        Ok(addrs)
    }
}

fn parse_port(p: &str, whole: &str) -> Result<u16> {
    p.parse::<u16>()
        .map_err(|_| Error::parameter(format!("invalid port in host: {}", whole)))
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.contains(':') {
            write!(f, "[{}]:{}", self.name, self.port)
        } else {
            write!(f, "{}:{}", self.name, self.port)
        }
    }
}

impl From<SocketAddr> for Host {
    fn from(addr: SocketAddr) -> Self {
        Host::new(addr.ip().to_string(), addr.port())
    }
}
