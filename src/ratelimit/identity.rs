//! Client identifier and request metadata extraction

use std::net::IpAddr;

use axum::http::{header, HeaderMap, HeaderName, Method, Uri};

use super::history::RequestMetadata;

/// Identifier used when no address can be determined
pub const UNKNOWN_IDENTIFIER: &str = "unknown";

/// Resolves the identifier requests are counted against.
///
/// Order: first entry of the trusted proxy header, then `X-Real-IP`, then the
/// socket peer address.
#[derive(Debug, Clone)]
pub struct IdentifierResolver {
    trusted_header: Option<HeaderName>,
}

impl IdentifierResolver {
    pub fn new(trusted_proxy_header: &str) -> Self {
        let trusted_header = if trusted_proxy_header.trim().is_empty() {
            None
        } else {
            match HeaderName::try_from(trusted_proxy_header.trim()) {
                Ok(name) => Some(name),
                Err(e) => {
                    tracing::warn!(
                        header = %trusted_proxy_header,
                        error = %e,
                        "Ignoring invalid trusted proxy header name"
                    );
                    None
                }
            }
        };

        Self { trusted_header }
    }

    pub fn resolve(&self, headers: &HeaderMap, peer: Option<IpAddr>) -> String {
        if let Some(name) = &self.trusted_header {
            let forwarded = headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if let Some(ip) = forwarded {
                return ip.to_string();
            }
        }

        let real_ip = headers
            .get("X-Real-IP")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = real_ip {
            return ip.to_string();
        }

        peer.map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN_IDENTIFIER.to_string())
    }
}

impl Default for IdentifierResolver {
    fn default() -> Self {
        Self::new("X-Forwarded-For")
    }
}

/// Headers a fronting proxy sets on an auth subrequest to describe the
/// request it is asking about, most specific first
const ORIGINAL_URI_HEADERS: [&str; 2] = ["X-Original-URI", "X-Forwarded-Uri"];
const ORIGINAL_METHOD_HEADERS: [&str; 2] = ["X-Original-Method", "X-Forwarded-Method"];

fn first_header<'a>(headers: &'a HeaderMap, names: &[&str]) -> Option<&'a str> {
    names.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    })
}

/// Path of the proxied request, without query or fragment
fn original_path(headers: &HeaderMap) -> Option<String> {
    let raw = first_header(headers, &ORIGINAL_URI_HEADERS)?;
    let path = match raw.parse::<Uri>() {
        Ok(uri) => uri.path().to_string(),
        Err(_) => raw.split(['?', '#']).next().unwrap_or(raw).to_string(),
    };
    (!path.is_empty()).then_some(path)
}

fn original_method(headers: &HeaderMap) -> Option<Method> {
    let raw = first_header(headers, &ORIGINAL_METHOD_HEADERS)?;
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes()).ok()
}

/// Whether the request is a proxy auth subrequest about another request
pub fn is_subrequest(headers: &HeaderMap) -> bool {
    original_path(headers).is_some()
}

/// Capture the request attributes the classifier and learner look at.
///
/// For auth subrequests the proxied request's method and path are used.
pub fn extract_metadata(method: &Method, uri: &Uri, headers: &HeaderMap) -> RequestMetadata {
    let header_string = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    };

    let method = original_method(headers).unwrap_or_else(|| method.clone());
    let path = original_path(headers).unwrap_or_else(|| uri.path().to_string());

    RequestMetadata {
        method: method.as_str().to_string(),
        path,
        user_agent: header_string(header::USER_AGENT),
        referer: header_string(header::REFERER),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_forwarded_header_first_entry() {
        let resolver = IdentifierResolver::default();
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Forwarded-For",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("X-Real-IP", HeaderValue::from_static("198.51.100.1"));

        assert_eq!(resolver.resolve(&headers, None), "203.0.113.7");
    }

    #[test]
    fn test_real_ip_then_peer() {
        let resolver = IdentifierResolver::default();
        let mut headers = HeaderMap::new();
        headers.insert("X-Real-IP", HeaderValue::from_static("198.51.100.1"));
        assert_eq!(resolver.resolve(&headers, None), "198.51.100.1");

        let peer: IpAddr = "192.0.2.9".parse().unwrap();
        assert_eq!(resolver.resolve(&HeaderMap::new(), Some(peer)), "192.0.2.9");
        assert_eq!(resolver.resolve(&HeaderMap::new(), None), UNKNOWN_IDENTIFIER);
    }

    #[test]
    fn test_disabled_trusted_header() {
        let resolver = IdentifierResolver::new("");
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", HeaderValue::from_static("203.0.113.7"));
        assert_eq!(resolver.resolve(&headers, None), UNKNOWN_IDENTIFIER);
    }

    #[test]
    fn test_extract_metadata() {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8.0"));
        let uri: Uri = "/api/items?page=2".parse().unwrap();

        let metadata = extract_metadata(&Method::POST, &uri, &headers);
        assert_eq!(metadata.method, "POST");
        assert_eq!(metadata.path, "/api/items");
        assert_eq!(metadata.user_agent.as_deref(), Some("curl/8.0"));
        assert!(metadata.referer.is_none());
    }

    #[test]
    fn test_subrequest_uses_original_request() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Original-URI", HeaderValue::from_static("/home?ref=mail"));
        headers.insert("X-Original-Method", HeaderValue::from_static("post"));
        let uri: Uri = "/api/v1/admission".parse().unwrap();

        assert!(is_subrequest(&headers));
        let metadata = extract_metadata(&Method::GET, &uri, &headers);
        assert_eq!(metadata.method, "POST");
        assert_eq!(metadata.path, "/home");
    }

    #[test]
    fn test_forwarded_uri_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Forwarded-Uri",
            HeaderValue::from_static("https://shop.example.com/cart?step=2"),
        );
        headers.insert("X-Original-Method", HeaderValue::from_static("not a method"));
        let uri: Uri = "/api/v1/admission".parse().unwrap();

        let metadata = extract_metadata(&Method::GET, &uri, &headers);
        assert_eq!(metadata.method, "GET");
        assert_eq!(metadata.path, "/cart");
    }

    #[test]
    fn test_blank_original_uri_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Original-URI", HeaderValue::from_static("  "));
        let uri: Uri = "/api/items".parse().unwrap();

        assert!(!is_subrequest(&headers));
        assert_eq!(extract_metadata(&Method::GET, &uri, &headers).path, "/api/items");
    }
}
