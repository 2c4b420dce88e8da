//! Search, book info, table of contents and chapter content stages
//!
//! Each stage resets the ambient script globals, fetches a page through the
//! transport, and evaluates the source's rules against it. Rules that fail
//! degrade to empty values. Only a failed fetch of the first page, a missing
//! list rule or a raised stop flag fail a stage.

use std::collections::HashSet;
use std::rc::Rc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, OrchestratorConfig};
use crate::error::{OrchestratorError, ScriptError};
use crate::ports::{CharsetCodec, HttpTransport, StopFlag, XPathEvaluator};
use crate::rule::RuleEngine;
use crate::script::{encode_uri, HostServices, ScriptHost};
use crate::selector::RuleField;
use crate::source::{resolve_url, split_url_options, BookSourceRecord, SearchMethod};

/// One entry of a search result page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub name: String,
    pub author: String,
    pub book_url: String,
    pub cover_url: String,
    pub intro: String,
    pub kind: String,
    pub last_chapter: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BookInfo {
    pub name: String,
    pub author: String,
    pub intro: String,
    pub cover_url: String,
    pub kind: String,
    pub last_chapter: String,
    pub toc_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Chapter {
    pub index: usize,
    pub title: String,
    pub url: String,
}

/// A request built from a source's URL template
#[derive(Debug, Clone, PartialEq, Eq)]
struct Request {
    url: String,
    method: SearchMethod,
    body: String,
    headers: Vec<(String, String)>,
}

/// Runs the reading stages for a set of decoded sources.
pub struct Orchestrator {
    sources: Vec<BookSourceRecord>,
    host: ScriptHost,
    transport: Rc<dyn HttpTransport>,
    codec: Rc<dyn CharsetCodec>,
    xpath: Rc<dyn XPathEvaluator>,
    config: OrchestratorConfig,
    stop: StopFlag,
}

impl Orchestrator {
    pub fn new(
        sources: Vec<BookSourceRecord>,
        services: HostServices,
        xpath: Rc<dyn XPathEvaluator>,
        config: &EngineConfig,
    ) -> Result<Self, ScriptError> {
        let transport = services.transport.clone();
        let codec = services.codec.clone();
        let host = ScriptHost::new(&config.script, services)?;
        let stop = StopFlag::new();
        host.set_stop_flag(&stop);

        Ok(Self {
            sources,
            host,
            transport,
            codec,
            xpath,
            config: config.orchestrator.clone(),
            stop,
        })
    }

    pub fn sources(&self) -> &[BookSourceRecord] {
        &self.sources
    }

    /// Look a source up by `bookSourceUrl` or `bookSourceName`.
    pub fn find_source(&self, key: &str) -> Option<&BookSourceRecord> {
        self.sources
            .iter()
            .find(|s| s.source_url == key || s.source_name == key)
    }

    pub fn host(&self) -> &ScriptHost {
        &self.host
    }

    /// Flag that aborts the running stage; shared with the script runtime.
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    pub fn search(
        &self,
        source: &BookSourceRecord,
        key: &str,
        page: i64,
    ) -> Result<Vec<SearchResult>, OrchestratorError> {
        self.begin(source)?;
        self.host.set_key(key);
        self.host.set_page(page);

        let rules = &source.search_rule;
        let book_list = require(source, &rules.book_list, "bookList")?;
        let engine = self.engine();

        let request = self.search_request(&engine, source, key)?;
        info!("Searching `{}` for `{}`: {}", source.source_name, key, request.url);
        let body = self.fetch(&request)?;
        self.host.set_base_url(&request.url);

        let items = engine.evaluate_in_page(book_list, &body, &self.stop);
        debug!("{} search items", items.len());

        let mut results = Vec::with_capacity(items.len());
        for item in &items {
            if self.stop.is_stopped() {
                break;
            }
            let field = |rule: &Option<RuleField>| self.first(&engine, rule, item);
            let result = SearchResult {
                name: field(&rules.name).trim().to_string(),
                author: field(&rules.author).trim().to_string(),
                book_url: self.link(&request.url, &field(&rules.book_url)),
                cover_url: self.link(&request.url, &field(&rules.cover_url)),
                intro: field(&rules.intro).trim().to_string(),
                kind: field(&rules.kind).trim().to_string(),
                last_chapter: field(&rules.last_chapter).trim().to_string(),
            };
            if result.name.is_empty() {
                debug!("Dropping search item without a name");
                continue;
            }
            results.push(result);
        }

        info!("`{}`: {} search results", source.source_name, results.len());
        Ok(results)
    }

    pub fn book_info(
        &self,
        source: &BookSourceRecord,
        book_url: &str,
    ) -> Result<BookInfo, OrchestratorError> {
        self.begin(source)?;
        let book_url = resolve_url(&source.source_url, book_url);
        let rules = &source.book_info_rule;

        if rules.is_empty() {
            // nothing to read; the book page doubles as the toc
            return Ok(BookInfo {
                toc_url: book_url,
                ..BookInfo::default()
            });
        }

        info!("Book info from `{}`: {}", source.source_name, book_url);
        let body = self.fetch(&self.get_request(source, &book_url))?;
        self.host.set_base_url(&book_url);
        let engine = self.engine();
        let field = |rule: &Option<RuleField>| self.first(&engine, rule, &body);

        let name = field(&rules.name).trim().to_string();
        let author = field(&rules.author).trim().to_string();
        self.host.set_book_info(&name, &author, &book_url);

        let toc_url = self.link(&book_url, &field(&rules.toc_url));
        Ok(BookInfo {
            name,
            author,
            intro: field(&rules.intro).trim().to_string(),
            cover_url: self.link(&book_url, &field(&rules.cover_url)),
            kind: field(&rules.kind).trim().to_string(),
            last_chapter: field(&rules.last_chapter).trim().to_string(),
            toc_url: if toc_url.is_empty() {
                book_url.clone()
            } else {
                toc_url
            },
        })
    }

    /// Chapters of a book, following `nextTocUrl` pages.
    pub fn toc(
        &self,
        source: &BookSourceRecord,
        toc_url: &str,
    ) -> Result<Vec<Chapter>, OrchestratorError> {
        self.begin(source)?;
        let rules = &source.toc_rule;
        let chapter_list = require(source, &rules.chapter_list, "chapterList")?;
        let engine = self.engine();

        let mut chapters = Vec::new();
        for (page_url, body) in self.pages(source, toc_url, &engine, &rules.next_toc_url)? {
            let items = engine.evaluate_in_page(chapter_list, &body, &self.stop);
            debug!("{} chapter items on {}", items.len(), page_url);

            for item in &items {
                if self.stop.is_stopped() {
                    break;
                }
                let title = self.first(&engine, &rules.chapter_name, item);
                let title = title.trim();
                if title.is_empty() {
                    continue;
                }
                let url = self.link(&page_url, &self.first(&engine, &rules.chapter_url, item));
                chapters.push(Chapter {
                    index: chapters.len(),
                    title: title.to_string(),
                    url: if url.is_empty() { page_url.clone() } else { url },
                });
            }
        }

        info!("`{}`: {} chapters", source.source_name, chapters.len());
        Ok(chapters)
    }

    /// Text of a chapter, following `nextContentUrl` pages.
    pub fn content(
        &self,
        source: &BookSourceRecord,
        chapter_url: &str,
        title: &str,
    ) -> Result<String, OrchestratorError> {
        self.begin(source)?;
        let rules = &source.content_rule;
        let content = require(source, &rules.content, "content")?;
        let engine = self.engine();
        self.host.set_chapter_info(title, chapter_url);

        let mut parts = Vec::new();
        for (_, body) in self.pages(source, chapter_url, &engine, &rules.next_content_url)? {
            let text = engine.evaluate_joined(content, &body, &self.stop);
            if !text.is_empty() {
                parts.push(text);
            }
        }

        let text = parts.join("\n");
        Ok(match &rules.replace_regex {
            Some(filter) => filter.apply(&text).into_owned(),
            None => text,
        })
    }

    /// Reset per-operation state and refuse to start once stopped.
    fn begin(&self, source: &BookSourceRecord) -> Result<(), OrchestratorError> {
        if self.stop.is_stopped() {
            return Err(OrchestratorError::Stopped);
        }
        self.host.reset_ambient();
        self.host.clear_error();
        self.host.set_base_url(&source.source_url);
        Ok(())
    }

    fn engine(&self) -> RuleEngine<'_> {
        RuleEngine::new(&self.host, self.xpath.as_ref())
    }

    fn first(&self, engine: &RuleEngine<'_>, rule: &Option<RuleField>, payload: &str) -> String {
        match rule {
            Some(rule) => engine.evaluate_first(rule, payload, &self.stop),
            None => String::new(),
        }
    }

    fn link(&self, base: &str, url: &str) -> String {
        let url = url.trim();
        if url.is_empty() {
            return String::new();
        }
        resolve_url(base, url)
    }

    /// Fetch `first_url` and the pages its `next` rule points at.
    ///
    /// Stops at `max_pages`, at a URL already visited, when the rule yields
    /// nothing, or when a later page fails to load.
    fn pages(
        &self,
        source: &BookSourceRecord,
        first_url: &str,
        engine: &RuleEngine<'_>,
        next: &Option<RuleField>,
    ) -> Result<Vec<(String, String)>, OrchestratorError> {
        let mut url = resolve_url(&source.source_url, first_url);
        let mut visited = HashSet::new();
        let mut pages = Vec::new();

        while pages.len() < self.config.max_pages.max(1) {
            if self.stop.is_stopped() {
                if pages.is_empty() {
                    return Err(OrchestratorError::Stopped);
                }
                break;
            }
            visited.insert(url.clone());

            let body = match self.fetch(&self.get_request(source, &url)) {
                Ok(body) => body,
                Err(e) if pages.is_empty() => return Err(e),
                Err(e) => {
                    warn!("Stopping at {}: {}", url, e);
                    break;
                }
            };
            self.host.set_base_url(&url);

            let following = self.link(&url, &self.first(engine, next, &body));
            pages.push((url, body));
            if following.is_empty() || visited.contains(&following) {
                break;
            }
            url = following;
        }

        if pages.len() >= self.config.max_pages {
            debug!("Page limit {} reached", self.config.max_pages);
        }
        Ok(pages)
    }

    fn get_request(&self, source: &BookSourceRecord, url: &str) -> Request {
        let (url, options) = split_url_options(url);
        let options = options.unwrap_or_default();
        Request {
            url: url.to_string(),
            method: options.method,
            body: options.body.unwrap_or_default(),
            headers: merge_headers(&source.headers, &options.headers),
        }
    }

    fn search_request(
        &self,
        engine: &RuleEngine<'_>,
        source: &BookSourceRecord,
        key: &str,
    ) -> Result<Request, OrchestratorError> {
        let search = &source.search;

        if search.is_script() {
            let built = engine
                .evaluate_selector(&RuleField::parse(&search.url).selector, "", &self.stop)
                .into_iter()
                .next()
                .unwrap_or_default();
            if built.is_empty() {
                return Err(OrchestratorError::NoSearchUrl(source.source_name.clone()));
            }
            let mut request = self.get_request(source, &built);
            request.url = resolve_url(&source.source_url, &request.url);
            return Ok(request);
        }

        let encoded = encode_uri(&self.codec.encode(key, search.charset.label()));
        let fill = |text: &str| {
            let text = text.replace("%s", &encoded);
            engine.process_template(&text, &self.stop)
        };

        let url = fill(&search.url);
        if url.is_empty() {
            return Err(OrchestratorError::NoSearchUrl(source.source_name.clone()));
        }
        Ok(Request {
            url,
            method: search.method,
            body: fill(&search.body),
            headers: merge_headers(&source.headers, &search.headers),
        })
    }

    fn fetch(&self, request: &Request) -> Result<String, OrchestratorError> {
        if self.stop.is_stopped() {
            return Err(OrchestratorError::Stopped);
        }
        let body = match request.method {
            SearchMethod::Post => {
                self.transport
                    .post(&request.url, &request.body, &request.headers)?
            }
            SearchMethod::Get => {
                self.transport
                    .get_with_headers(&request.url, &request.headers)?
            }
        };
        Ok(body)
    }
}

fn require<'r>(
    source: &BookSourceRecord,
    rule: &'r Option<RuleField>,
    field: &'static str,
) -> Result<&'r RuleField, OrchestratorError> {
    rule.as_ref().ok_or_else(|| OrchestratorError::MissingRule {
        source_name: source.source_name.clone(),
        field,
    })
}

/// Source headers overridden by request headers of the same name
fn merge_headers(
    base: &[(String, String)],
    extra: &[(String, String)],
) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = base
        .iter()
        .filter(|(name, _)| !extra.iter().any(|(n, _)| n.eq_ignore_ascii_case(name)))
        .cloned()
        .collect();
    merged.extend(extra.iter().cloned());
    merged
}
