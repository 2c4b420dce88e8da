//! Collaborator interfaces
//!
//! The rule core talks to the network, the HTML evaluator, the log sink and
//! the charset converter only through these traits. Default adapters live
//! next to them (`TracingLogSink`, `EncodingRsCodec`, `OfflineTransport`);
//! the networked and HTML-backed ones are in `transport` and `xpath`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use encoding_rs::Encoding;

use crate::error::{SelectorError, TransportError};

/// Cooperative cancellation flag shared between a caller and the engine.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Blocking HTTP fetcher
pub trait HttpTransport {
    fn get(&self, url: &str) -> Result<String, TransportError>;

    /// GET with per-request headers. Transports without header support fall
    /// back to a plain `get`.
    fn get_with_headers(
        &self,
        url: &str,
        _headers: &[(String, String)],
    ) -> Result<String, TransportError> {
        self.get(url)
    }

    fn post(
        &self,
        url: &str,
        body: &str,
        headers: &[(String, String)],
    ) -> Result<String, TransportError>;
}

/// Evaluates an XPath expression against an HTML payload.
///
/// Element results come back as outer HTML, attribute and text results as
/// plain strings, in document order.
pub trait XPathEvaluator {
    fn evaluate(
        &self,
        payload: &str,
        expr: &str,
        stop: &StopFlag,
    ) -> Result<Vec<String>, SelectorError>;
}

/// Destination for `java.log` and `console.log`
pub trait LogSink {
    fn write(&self, msg: &str);
}

/// Converts between Rust strings and legacy byte encodings (GBK etc.)
pub trait CharsetCodec {
    fn encode(&self, text: &str, charset: &str) -> Vec<u8>;

    fn decode(&self, bytes: &[u8], charset: &str) -> String;
}

/// Forwards script log lines to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn write(&self, msg: &str) {
        tracing::info!(target: "legado_rules::script", "{}", msg);
    }
}

/// `CharsetCodec` over encoding_rs labels (`gbk`, `gb2312`, `big5`, ...)
///
/// Unknown labels fall back to UTF-8.
#[derive(Debug, Default, Clone, Copy)]
pub struct EncodingRsCodec;

impl EncodingRsCodec {
    fn lookup(charset: &str) -> &'static Encoding {
        Encoding::for_label(charset.trim().as_bytes()).unwrap_or(encoding_rs::UTF_8)
    }
}

impl CharsetCodec for EncodingRsCodec {
    fn encode(&self, text: &str, charset: &str) -> Vec<u8> {
        let (bytes, _, _) = Self::lookup(charset).encode(text);
        bytes.into_owned()
    }

    fn decode(&self, bytes: &[u8], charset: &str) -> String {
        let (text, _, _) = Self::lookup(charset).decode(bytes);
        text.into_owned()
    }
}

/// Transport that refuses every request
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineTransport;

impl HttpTransport for OfflineTransport {
    fn get(&self, _url: &str) -> Result<String, TransportError> {
        Err(TransportError::Offline)
    }

    fn post(
        &self,
        _url: &str,
        _body: &str,
        _headers: &[(String, String)],
    ) -> Result<String, TransportError> {
        Err(TransportError::Offline)
    }
}
