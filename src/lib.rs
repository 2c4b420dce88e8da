//! Legado book-source rule engine
//!
//! Evaluates the rules of Legado book sources against fetched pages:
//! - XPath, jsoup-style CSS, legacy dotted selectors and JSONPath
//!   (CSS and legacy selectors are transpiled to XPath)
//! - `@js:` / `<js>` script tails and `{{…}}` templates on an embedded
//!   QuickJS runtime with the `java` host functions
//! - book-source decoding with a per-record acceptance gate
//! - search, book info, table of contents and content stages
//!
//! The network, the HTML evaluator, logging and charset conversion sit behind
//! the traits in [`ports`]; default adapters are provided.

pub mod config;
pub mod error;
pub mod ffi;
pub mod orchestrator;
pub mod ports;
pub mod rule;
pub mod script;
pub mod selector;
pub mod source;
pub mod transport;
pub mod xpath;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use ffi::*;
pub use orchestrator::{BookInfo, Chapter, Orchestrator, SearchResult};
pub use ports::{CharsetCodec, HttpTransport, LogSink, StopFlag, XPathEvaluator};
pub use rule::RuleEngine;
pub use script::{HostServices, ScriptHost};
pub use selector::{classify, CanonicalSelector, RuleField, RuleKind};
pub use source::{decode_sources, BookSourceRecord, DecodeSummary};
pub use transport::UreqTransport;
pub use xpath::HtmlXPathEvaluator;
