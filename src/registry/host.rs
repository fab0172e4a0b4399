// src/registry/host.rs
use hyper::http::uri::Authority;

/// Reduce a `Host` header or registration host to the registry key: the
/// authority's host part, lowercased, without port.
pub fn normalize_host(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let authority: Authority = raw.parse().ok()?;
    let host = authority.host();
    if host.is_empty() {
        return None;
    }

    Some(host.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_port_and_case() {
        assert_eq!(normalize_host("A.com:8081").as_deref(), Some("a.com"));
        assert_eq!(normalize_host("a.com").as_deref(), Some("a.com"));
        assert_eq!(normalize_host(" b.example.org ").as_deref(), Some("b.example.org"));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(normalize_host(""), None);
        assert_eq!(normalize_host("   "), None);
        assert_eq!(normalize_host("a b.com"), None);
    }
}
