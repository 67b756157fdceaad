//! Classification of connection hostnames

use crate::config::ServiceConfig;
use crate::IngressError;
use burrow_router::normalize_hostname;

/// Who serves a hostname
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostClass {
    /// API and relay upgrades, served locally
    Api,
    /// Website, served locally
    Web,
    /// The bare domain, redirected to the website
    Apex,
    /// Anything else belongs to a relay
    Customer,
}

/// The service's own hostnames, normalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hostnames {
    domain: String,
    api: String,
    web: String,
}

impl Hostnames {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            domain: normalize_hostname(&config.domain),
            api: normalize_hostname(&config.api_hostname()),
            web: normalize_hostname(&config.web_hostname()),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn api(&self) -> &str {
        &self.api
    }

    pub fn web(&self) -> &str {
        &self.web
    }

    /// `hostname` must already be normalized.
    pub fn classify(&self, hostname: &str) -> HostClass {
        if hostname == self.api {
            HostClass::Api
        } else if hostname == self.web {
            HostClass::Web
        } else if hostname == self.domain {
            HostClass::Apex
        } else {
            HostClass::Customer
        }
    }

    /// `<subdomain>.<username>.<domain>`, lowercased.
    ///
    /// Both parts must be single DNS labels.
    pub fn relay_hostname(&self, subdomain: &str, username: &str) -> Result<String, IngressError> {
        for label in [subdomain, username] {
            if !is_dns_label(label) {
                return Err(IngressError::InvalidHostname(format!(
                    "'{}' is not a valid DNS label",
                    label
                )));
            }
        }

        let hostname = format!(
            "{}.{}.{}",
            subdomain.to_ascii_lowercase(),
            username.to_ascii_lowercase(),
            self.domain
        );

        if self.classify(&hostname) != HostClass::Customer {
            return Err(IngressError::InvalidHostname(format!(
                "{} is reserved",
                hostname
            )));
        }
        Ok(hostname)
    }
}

/// 1 to 63 ASCII letters, digits or hyphens, not starting or ending with a hyphen
pub fn is_dns_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 63
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

pub fn is_valid_hostname(hostname: &str) -> bool {
    let hostname = hostname.strip_suffix('.').unwrap_or(hostname);
    hostname.len() <= 253 && hostname.split('.').all(is_dns_label)
}

/// Drop a `:port` suffix from a `Host` header value.
pub fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        // Bracketed IPv6 literal
        return match rest.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        };
    }

    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hostnames() -> Hostnames {
        Hostnames::new(&ServiceConfig::new("Example.com."))
    }

    #[test]
    fn test_classify() {
        let names = hostnames();
        assert_eq!(names.classify("api.example.com"), HostClass::Api);
        assert_eq!(names.classify("www.example.com"), HostClass::Web);
        assert_eq!(names.classify("example.com"), HostClass::Apex);
        assert_eq!(names.classify("app.alice.example.com"), HostClass::Customer);
        assert_eq!(names.classify("other.org"), HostClass::Customer);
    }

    #[test]
    fn test_relay_hostname() {
        let names = hostnames();
        assert_eq!(
            names.relay_hostname("App", "Alice").unwrap(),
            "app.alice.example.com"
        );
    }

    #[test]
    fn test_relay_hostname_rejects_bad_labels() {
        let names = hostnames();
        for (subdomain, username) in [
            ("", "alice"),
            ("app", ""),
            ("a.b", "alice"),
            ("-app", "alice"),
            ("app", "al ice"),
            ("app", "alice/.."),
        ] {
            assert!(
                matches!(
                    names.relay_hostname(subdomain, username),
                    Err(IngressError::InvalidHostname(_))
                ),
                "{subdomain:?} / {username:?} accepted"
            );
        }
        assert!(names.relay_hostname(&"a".repeat(64), "alice").is_err());
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("example.com:8080"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("[::1]:80"), "[::1]");
        assert_eq!(strip_port("::1"), "::1");
        assert_eq!(strip_port("example.com:abc"), "example.com:abc");
    }

    #[test]
    fn test_valid_hostname() {
        assert!(is_valid_hostname("api.example.com"));
        assert!(is_valid_hostname("example.com."));
        assert!(is_valid_hostname("localhost"));
        assert!(!is_valid_hostname("bad..example.com"));
        assert!(!is_valid_hostname(""));
    }
}
