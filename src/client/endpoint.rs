use std::fmt;

use crate::error::{AppError, Result};

/// Default path when the URL carries none
pub const DEFAULT_STREAM_PATH: &str = "/stream";

/// Where a viewer connects: `http://host:port/path`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl StreamEndpoint {
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            path: path.into(),
        }
    }

    /// Parse `[http://]host[:port][/path]`
    ///
    /// The port defaults to 80 and the path to `/stream`. IPv6 hosts go in
    /// brackets (`http://[::1]:8080/stream`).
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        let rest = match url.split_once("://") {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("http") => rest,
            Some((scheme, _)) => {
                return Err(AppError::Config(format!("unsupported scheme: {}", scheme)))
            }
            None => url,
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        let path = if path.is_empty() || path == "/" {
            DEFAULT_STREAM_PATH
        } else {
            path
        };

        let (host, port) = split_host_port(authority)?;
        if host.is_empty() {
            return Err(AppError::Config(format!("missing host in {:?}", url)));
        }

        Ok(Self::new(host, port, path))
    }

    /// Same server, different path
    pub fn with_path(&self, path: &str) -> Self {
        Self::new(self.host.clone(), self.port, path)
    }

    /// `host:port` suitable for `TcpStream::connect`
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Request head sent on connect
    pub fn request(&self, accept: &str) -> String {
        format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nAccept: {}\r\nConnection: close\r\n\r\n",
            self.path,
            self.address(),
            accept
        )
    }
}

fn split_host_port(authority: &str) -> Result<(&str, u16)> {
    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| AppError::Config(format!("unterminated IPv6 host: {}", authority)))?;
        (host, after.strip_prefix(':'))
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    let port = match port {
        Some(port) => port
            .parse()
            .map_err(|_| AppError::Config(format!("invalid port: {:?}", port)))?,
        None => 80,
    };
    Ok((host, port))
}

impl fmt::Display for StreamEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http://{}{}", self.address(), self.path)
    }
}
