use reqwest::Url;
use tracing::warn;

/// Allow-list of the single upstream host the proxy may reach.
///
/// A configured port is compared against the URL's effective port, so
/// `p6.internal:443` and `p6.internal` both admit `https://p6.internal/`.
#[derive(Debug, Clone)]
pub struct HostGuard {
    host: String,
    port: Option<u16>,
}

impl HostGuard {
    /// `allowed_host` is `host` or `host:port`.
    pub fn new(allowed_host: impl Into<String>) -> Self {
        let allowed = allowed_host.into().trim().to_ascii_lowercase();
        let (host, port) = split_host_port(&allowed);
        Self {
            host: host.to_string(),
            port,
        }
    }

    pub fn allowed_host(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// Check a `host[:port]` string. Without a scheme there is no default
    /// port to fall back on, so ports must match as written.
    pub fn is_permitted_host(&self, host: &str) -> bool {
        let (name, port) = split_host_port(host.trim());
        self.check(name, port == self.port, host)
    }

    /// Check the target of an outbound request.
    pub fn is_permitted_url(&self, url: &Url) -> bool {
        let name = url.host_str().unwrap_or_default();
        let port_ok = match self.port {
            Some(port) => url.port_or_known_default() == Some(port),
            None => url.port().is_none(),
        };
        self.check(name, port_ok, url.as_str())
    }

    fn check(&self, name: &str, port_ok: bool, target: &str) -> bool {
        let permitted = !self.host.is_empty() && port_ok && name.eq_ignore_ascii_case(&self.host);
        if !permitted {
            warn!(target_host = target, allowed = %self.allowed_host(), "Blocked request to disallowed host");
        }
        permitted
    }
}

/// `host:port` into its parts. A bracketed IPv6 literal keeps its colons.
fn split_host_port(value: &str) -> (&str, Option<u16>) {
    match value.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && (!host.contains(':') || host.ends_with(']')) => {
            match port.parse() {
                Ok(port) => (host, Some(port)),
                Err(_) => (value, None),
            }
        }
        _ => (value, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_host_match() {
        let guard = HostGuard::new("ca1.p6.oraclecloud.com");
        assert!(guard.is_permitted_host("ca1.p6.oraclecloud.com"));
        assert!(guard.is_permitted_host("CA1.P6.OracleCloud.com"));
        assert!(!guard.is_permitted_host("evil.example.com"));
        assert!(!guard.is_permitted_host("ca1.p6.oraclecloud.com.evil.com"));
        assert!(!guard.is_permitted_host("ca1.p6.oraclecloud.com:8443"));
    }

    #[test]
    fn test_empty_guard_blocks_everything() {
        let guard = HostGuard::new("  ");
        assert!(!guard.is_permitted_host(""));
        assert!(!guard.is_permitted_host("localhost"));
        assert!(!guard.is_permitted_url(&Url::parse("https://localhost/").unwrap()));
    }

    #[test]
    fn test_default_port_written_out() {
        let url = Url::parse("https://p6.internal/p6ws/restapi/project").unwrap();
        assert!(HostGuard::new("p6.internal:443").is_permitted_url(&url));
        assert!(HostGuard::new("P6.Internal").is_permitted_url(&url));
        assert!(!HostGuard::new("p6.internal:8443").is_permitted_url(&url));

        let custom = Url::parse("https://p6.internal:8443/p6ws").unwrap();
        assert!(HostGuard::new("p6.internal:8443").is_permitted_url(&custom));
        assert!(!HostGuard::new("p6.internal").is_permitted_url(&custom));
        assert!(!HostGuard::new("p6.internal:443").is_permitted_url(&custom));
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("p6.internal:443"), ("p6.internal", Some(443)));
        assert_eq!(split_host_port("p6.internal"), ("p6.internal", None));
        assert_eq!(split_host_port("[::1]:8206"), ("[::1]", Some(8206)));
        assert_eq!(split_host_port("[::1]"), ("[::1]", None));
        assert_eq!(HostGuard::new("P6.internal:443").allowed_host(), "p6.internal:443");
    }
}
