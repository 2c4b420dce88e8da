//! Blocking HTTP transport on ureq
//!
//! Response bodies are decoded with the charset from `Content-Type`, falling
//! back to a `<meta charset>` declaration and then UTF-8, so GBK sites come
//! back as proper strings.

use std::sync::OnceLock;
use std::time::Duration;

use regex::bytes::Regex;
use tracing::debug;

use crate::config::HttpConfig;
use crate::error::TransportError;
use crate::ports::{CharsetCodec, EncodingRsCodec, HttpTransport};

/// How far into the body to look for a `<meta charset>`
const SNIFF_LIMIT: usize = 2048;

/// `HttpTransport` backed by a shared `ureq::Agent`
pub struct UreqTransport {
    agent: ureq::Agent,
    headers: Vec<(String, String)>,
    codec: EncodingRsCodec,
}

impl UreqTransport {
    pub fn new(config: &HttpConfig) -> Self {
        let agent = ureq::Agent::new_with_config(
            ureq::Agent::config_builder()
                .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
                .user_agent(config.user_agent.as_str())
                .max_redirects(config.max_redirects)
                .build(),
        );
        Self {
            agent,
            headers: Vec::new(),
            codec: EncodingRsCodec,
        }
    }

    /// Headers sent with every request, e.g. a source's `header` field.
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    /// Default headers not overridden by `extra`, then `extra`.
    fn merged<'a>(
        &'a self,
        extra: &'a [(String, String)],
    ) -> impl Iterator<Item = &'a (String, String)> {
        self.headers
            .iter()
            .filter(move |(name, _)| !extra.iter().any(|(n, _)| n.eq_ignore_ascii_case(name)))
            .chain(extra)
    }

    fn read(
        &self,
        url: &str,
        outcome: Result<ureq::http::Response<ureq::Body>, ureq::Error>,
    ) -> Result<String, TransportError> {
        let response = outcome.map_err(|e| map_error(url, e))?;
        let mut body = response.into_body();
        let declared = body.charset().map(str::to_string);
        let bytes = body.read_to_vec().map_err(|e| map_error(url, e))?;

        let charset = declared
            .or_else(|| sniff_charset(&bytes))
            .unwrap_or_else(|| "utf-8".to_string());
        debug!("Fetched {} ({} bytes, {})", url, bytes.len(), charset);
        Ok(self.codec.decode(&bytes, &charset))
    }
}

impl HttpTransport for UreqTransport {
    fn get(&self, url: &str) -> Result<String, TransportError> {
        self.get_with_headers(url, &[])
    }

    fn get_with_headers(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<String, TransportError> {
        let mut request = self.agent.get(url);
        for (name, value) in self.merged(headers) {
            request = request.header(name.as_str(), value.as_str());
        }
        self.read(url, request.call())
    }

    fn post(
        &self,
        url: &str,
        body: &str,
        headers: &[(String, String)],
    ) -> Result<String, TransportError> {
        let mut request = self.agent.post(url);
        let mut has_content_type = false;
        for (name, value) in self.merged(headers) {
            has_content_type |= name.eq_ignore_ascii_case("content-type");
            request = request.header(name.as_str(), value.as_str());
        }
        if !has_content_type {
            request = request.header("Content-Type", "application/x-www-form-urlencoded");
        }
        self.read(url, request.send(body))
    }
}

fn map_error(url: &str, error: ureq::Error) -> TransportError {
    match error {
        ureq::Error::StatusCode(status) => TransportError::Status {
            status,
            url: url.to_string(),
        },
        ureq::Error::BadUri(_) => TransportError::InvalidUrl(url.to_string()),
        other => TransportError::Request {
            url: url.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Charset declared by a `<meta>` tag near the start of an HTML body.
fn sniff_charset(bytes: &[u8]) -> Option<String> {
    static META: OnceLock<Option<Regex>> = OnceLock::new();
    let meta = META
        .get_or_init(|| Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?([A-Za-z0-9_-]+)"#).ok())
        .as_ref()?;

    let head = &bytes[..bytes.len().min(SNIFF_LIMIT)];
    let captures = meta.captures(head)?;
    let label = captures.get(1)?.as_bytes();
    std::str::from_utf8(label).ok().map(str::to_ascii_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_meta_charset() {
        let html = br#"<html><head><meta charset="gbk"><title>x</title></head></html>"#;
        assert_eq!(sniff_charset(html), Some("gbk".to_string()));

        let html = br#"<meta http-equiv="Content-Type" content="text/html; charset=GB2312">"#;
        assert_eq!(sniff_charset(html), Some("gb2312".to_string()));

        assert_eq!(sniff_charset(b"<html><body>plain</body></html>"), None);
    }

    #[test]
    fn test_sniff_only_looks_at_the_head() {
        let mut html = vec![b' '; SNIFF_LIMIT];
        html.extend_from_slice(br#"<meta charset="gbk">"#);
        assert_eq!(sniff_charset(&html), None);
    }

    #[test]
    fn test_status_error_mapping() {
        let err = map_error("https://a.example/x", ureq::Error::StatusCode(404));
        assert_eq!(
            err,
            TransportError::Status {
                status: 404,
                url: "https://a.example/x".into()
            }
        );
        assert_eq!(err.to_string(), "HTTP 404 for https://a.example/x");
    }

    #[test]
    fn test_request_headers_override_defaults() {
        let pair = |n: &str, v: &str| (n.to_string(), v.to_string());
        let transport = UreqTransport::new(&HttpConfig::default()).with_headers(vec![
            pair("User-Agent", "Mobile"),
            pair("Referer", "https://a.example/"),
        ]);
        let extra = [pair("referer", "https://b.example/"), pair("X-Token", "t")];

        let merged: Vec<_> = transport.merged(&extra).cloned().collect();
        assert_eq!(
            merged,
            vec![
                pair("User-Agent", "Mobile"),
                pair("referer", "https://b.example/"),
                pair("X-Token", "t"),
            ]
        );
        assert!(transport.get_with_headers("not a url", &extra).is_err());
    }

    #[test]
    fn test_invalid_url_fails_without_network() {
        let transport = UreqTransport::new(&HttpConfig::default());
        assert!(transport.get("not a url").is_err());
    }
}
