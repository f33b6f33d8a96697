use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use url::{Host, Url};

use super::Origin;
use crate::error::{ConntraceError, Result};

/// An HTTP proxy endpoint taken from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyServer {
    pub host: Host<String>,
    pub port: u16,
    /// Ready-to-send `Proxy-Authorization` value
    pub authorization: Option<String>,
}

impl ProxyServer {
    /// Parse `http://[user:pass@]host[:port]`. A missing scheme means `http`.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{trimmed}")
        };
        let url = Url::parse(&with_scheme).map_err(|e| ConntraceError::Config(format!("invalid proxy url {trimmed:?}: {e}")))?;
        if url.scheme() != "http" {
            return Err(ConntraceError::Config(format!(
                "unsupported proxy scheme {:?} in {trimmed:?}",
                url.scheme()
            )));
        }
        let host = url
            .host()
            .map(|host| host.to_owned())
            .ok_or_else(|| ConntraceError::Config(format!("proxy url {trimmed:?} has no host")))?;
        let port = url.port_or_known_default().unwrap_or(80);
        let authorization = if url.username().is_empty() {
            None
        } else {
            let credentials = format!("{}:{}", url.username(), url.password().unwrap_or(""));
            Some(format!("Basic {}", STANDARD.encode(credentials)))
        };
        Ok(Self {
            host,
            port,
            authorization,
        })
    }
}

impl fmt::Display for ProxyServer {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.host, self.port)
    }
}

/// One `NO_PROXY` entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum NoProxyRule {
    Any,
    Domain { host: String, port: Option<u16> },
}

impl NoProxyRule {
    pub(crate) fn parse(text: &str) -> Option<Self> {
        let candidate = text.trim();
        if candidate.is_empty() {
            return None;
        }
        if candidate == "*" {
            return Some(Self::Any);
        }
        let candidate = candidate.trim_start_matches('*').trim_start_matches('.');
        let (host, port) = if let Some(stripped) = candidate.strip_prefix('[') {
            let end = stripped.find(']')?;
            let suffix = &stripped[end + 1..];
            let port = match suffix.strip_prefix(':') {
                Some(raw) => Some(raw.parse::<u16>().ok()?),
                None if suffix.is_empty() => None,
                None => return None,
            };
            (&stripped[..end], port)
        } else if candidate.matches(':').count() == 1 {
            let (host, raw) = candidate.rsplit_once(':')?;
            (host, Some(raw.parse::<u16>().ok()?))
        } else {
            (candidate, None)
        };
        if host.is_empty() {
            return None;
        }
        Some(Self::Domain {
            host: host.to_ascii_lowercase(),
            port,
        })
    }

    pub(crate) fn matches(&self, host: &str, port: u16) -> bool {
        match self {
            Self::Any => true,
            Self::Domain {
                host: domain,
                port: rule_port,
            } => {
                let host_matches = host == domain || host.ends_with(&format!(".{domain}"));
                host_matches && rule_port.is_none_or(|rule_port| rule_port == port)
            }
        }
    }
}

/// Which proxy, if any, a request should go through.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProxyConfig {
    http: Option<ProxyServer>,
    https: Option<ProxyServer>,
    no_proxy: Vec<NoProxyRule>,
}

impl ProxyConfig {
    /// Always connect directly.
    pub fn none() -> Self {
        Self::default()
    }

    /// Read `HTTP_PROXY`, `HTTPS_PROXY` and `NO_PROXY` (upper case first, then lower).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let first = |keys: [&str; 2]| {
            keys.iter()
                .filter_map(|key| lookup(key))
                .find(|value| !value.trim().is_empty())
        };
        let http = first(["HTTP_PROXY", "http_proxy"]).map(|raw| ProxyServer::parse(&raw)).transpose()?;
        let https = first(["HTTPS_PROXY", "https_proxy"]).map(|raw| ProxyServer::parse(&raw)).transpose()?;
        let no_proxy: Vec<NoProxyRule> = first(["NO_PROXY", "no_proxy"])
            .map(|raw| raw.split(',').filter_map(NoProxyRule::parse).collect())
            .unwrap_or_default();
        Ok(Self { http, https, no_proxy })
    }

    pub fn with_http(mut self, server: ProxyServer) -> Self {
        self.http = Some(server);
        self
    }

    pub fn with_https(mut self, server: ProxyServer) -> Self {
        self.https = Some(server);
        self
    }

    pub fn is_direct(&self) -> bool {
        self.http.is_none() && self.https.is_none()
    }

    pub(crate) fn proxy_for(&self, origin: &Origin) -> Option<&ProxyServer> {
        let server = if origin.https { self.https.as_ref() } else { self.http.as_ref() }?;
        if is_loopback(&origin.host) {
            return None;
        }
        let host = match &origin.host {
            Host::Domain(name) => name.to_ascii_lowercase(),
            Host::Ipv4(ip) => ip.to_string(),
            Host::Ipv6(ip) => ip.to_string(),
        };
        if self.no_proxy.iter().any(|rule| rule.matches(&host, origin.port)) {
            return None;
        }
        Some(server)
    }
}

fn is_loopback(host: &Host<String>) -> bool {
    match host {
        Host::Domain(name) => name.eq_ignore_ascii_case("localhost") || name.to_ascii_lowercase().ends_with(".localhost"),
        Host::Ipv4(ip) => ip.is_loopback(),
        Host::Ipv6(ip) => ip.is_loopback(),
    }
}
