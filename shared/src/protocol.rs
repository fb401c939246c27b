/// Lookup domain used when a query does not name one
pub const DEFAULT_DOMAIN: &str = "local";

/// Separator used when flattening TXT segments into `ServiceEntry::info`
pub const INFO_SEPARATOR: &str = "|";

/// Strip a single trailing dot from a DNS name
pub fn trim_dot(name: &str) -> &str {
    name.strip_suffix('.').unwrap_or(name)
}

/// Builds the DNS-SD browse name for a service in a domain,
/// e.g. ("_http._tcp", "local") -> "_http._tcp.local"
pub fn service_address(service: &str, domain: &str) -> String {
    let domain = trim_dot(domain);
    let domain = if domain.is_empty() { DEFAULT_DOMAIN } else { domain };
    format!("{}.{}", trim_dot(service), domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_address_trims_dots() {
        assert_eq!(service_address("_http._tcp.", "local."), "_http._tcp.local");
        assert_eq!(service_address("_http._tcp", "local"), "_http._tcp.local");
    }

    #[test]
    fn test_service_address_defaults_domain() {
        assert_eq!(service_address("_ssh._tcp", ""), "_ssh._tcp.local");
    }

    #[test]
    fn test_trim_dot_only_removes_one() {
        assert_eq!(trim_dot("local.."), "local.");
        assert_eq!(trim_dot("local"), "local");
    }
}
