//! `searchUrl` templates and the `url,{options}` request syntax

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use url::Url;

use crate::rule::find_js_block;

/// HTTP method of a search request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SearchMethod {
    #[default]
    Get,
    Post,
}

impl SearchMethod {
    fn from_label(label: &str) -> Self {
        if label.trim().eq_ignore_ascii_case("post") {
            SearchMethod::Post
        } else {
            SearchMethod::Get
        }
    }
}

/// Charset used to percent-encode the search key (and to read the response)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Charset {
    #[default]
    Utf8,
    Gbk,
    /// Unrecognized label; the key is sent as UTF-8
    Auto,
}

impl Charset {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "gbk" | "gb2312" | "gb18030" => Charset::Gbk,
            "utf8" | "utf-8" | "" => Charset::Utf8,
            _ => Charset::Auto,
        }
    }

    /// encoding_rs label
    pub fn label(self) -> &'static str {
        match self {
            Charset::Gbk => "gbk",
            Charset::Utf8 | Charset::Auto => "utf-8",
        }
    }
}

/// Options object following a request URL
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlOptions {
    pub method: SearchMethod,
    pub charset: Option<Charset>,
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl UrlOptions {
    pub fn is_post(&self) -> bool {
        self.method == SearchMethod::Post
    }
}

#[derive(Deserialize)]
struct RawOptions {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    charset: Option<String>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    headers: Option<Value>,
}

/// Split `url,{"method":"POST",...}` at the first `,{`.
///
/// Options that are not valid JSON are dropped with a warning and the URL part
/// is still returned.
pub fn split_url_options(raw: &str) -> (&str, Option<UrlOptions>) {
    let Some(pos) = raw.find(",{") else {
        return (raw.trim(), None);
    };
    let url = raw[..pos].trim();
    let options = &raw[pos + 1..];

    match serde_json::from_str::<RawOptions>(options.trim()) {
        Ok(parsed) => (url, Some(parsed.into())),
        Err(e) => {
            warn!("Ignoring malformed URL options `{}`: {}", options, e);
            (url, None)
        }
    }
}

impl From<RawOptions> for UrlOptions {
    fn from(raw: RawOptions) -> Self {
        Self {
            method: raw
                .method
                .as_deref()
                .map(SearchMethod::from_label)
                .unwrap_or_default(),
            charset: raw.charset.as_deref().map(Charset::from_label),
            body: raw.body.map(|body| match body {
                Value::String(text) => text,
                other => other.to_string(),
            }),
            headers: raw.headers.map(|h| header_pairs(&h)).unwrap_or_default(),
        }
    }
}

/// Header pairs from a JSON object, or from a string holding one.
pub(crate) fn header_pairs(value: &Value) -> Vec<(String, String)> {
    let parsed;
    let object = match value {
        Value::Object(map) => map,
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => {
                parsed = map;
                &parsed
            }
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    object
        .iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            (name.clone(), value)
        })
        .collect()
}

/// Decoded `searchUrl`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchUrl {
    /// Absolute URL with `%s` for the key; may hold `{{…}}` holes
    pub url: String,
    pub method: SearchMethod,
    pub charset: Charset,
    /// Request body for POST, empty unless given
    pub body: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
}

impl SearchUrl {
    /// Parse a raw `searchUrl` of the source at `base`.
    pub fn parse(raw: &str, base: &str) -> Self {
        let raw = raw.trim();
        if is_script_url(raw) {
            // the script builds the URL (and options) at search time
            return Self {
                url: raw.to_string(),
                ..Self::default()
            };
        }

        let (url, options) = split_url_options(raw);
        let options = options.unwrap_or_default();
        let url = substitute_key(url);
        let body = options.body.as_deref().map(substitute_key).unwrap_or_default();

        let charset = match options.charset {
            Some(charset) => charset,
            None if mentions_gbk(&url) || mentions_gbk(&body) => Charset::Gbk,
            None => Charset::Utf8,
        };

        Self {
            url: resolve_url(base, &url),
            method: options.method,
            charset,
            body,
            headers: options.headers,
        }
    }

    /// True when the whole URL is produced by a script.
    pub fn is_script(&self) -> bool {
        is_script_url(&self.url)
    }

    /// True when the key can reach the request: a `%s`, or a `{{…}}` hole
    /// that reads `key` or `searchKey`.
    pub fn has_key_hole(&self) -> bool {
        self.is_script()
            || [&self.url, &self.body].iter().any(|text| {
                text.contains("%s")
                    || template_holes(text).any(|hole| {
                        find_identifier(hole, "key").is_some()
                            || find_identifier(hole, "searchKey").is_some()
                    })
            })
    }
}

fn is_script_url(raw: &str) -> bool {
    raw.starts_with("@js:") || find_js_block(raw).is_some_and(|block| block.start == 0)
}

/// `{{key}}`, `{{searchKey}}` and a bare `searchKey` token become `%s`.
/// Other holes are copied as they are.
fn substitute_key(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("{{") {
        replace_bare_search_key(&rest[..open], &mut out);
        let Some(close) = rest[open..].find("}}").map(|c| open + c + 2) else {
            out.push_str(&rest[open..]);
            return out;
        };
        let hole = &rest[open..close];
        match hole[2..hole.len() - 2].trim() {
            "key" | "searchKey" => out.push_str("%s"),
            _ => out.push_str(hole),
        }
        rest = &rest[close..];
    }
    replace_bare_search_key(rest, &mut out);
    out
}

fn replace_bare_search_key(mut text: &str, out: &mut String) {
    while let Some(at) = find_identifier(text, "searchKey") {
        out.push_str(&text[..at]);
        out.push_str("%s");
        text = &text[at + "searchKey".len()..];
    }
    out.push_str(text);
}

/// Inner text of each `{{…}}` hole.
fn template_holes(text: &str) -> impl Iterator<Item = &str> {
    text.split("{{")
        .skip(1)
        .filter_map(|part| part.find("}}").map(|close| &part[..close]))
}

/// Byte offset of `name` as a whole identifier, not part of a longer one
/// and not a property (`a.key`).
fn find_identifier(text: &str, name: &str) -> Option<usize> {
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '$';
    text.match_indices(name).map(|(at, _)| at).find(|&at| {
        let before = text[..at].chars().next_back();
        let after = text[at + name.len()..].chars().next();
        !before.is_some_and(|c| is_ident(c) || c == '.') && !after.is_some_and(is_ident)
    })
}

/// A script hole such as `{{java.encodeURI(key, "gbk")}}`
fn mentions_gbk(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("{{") && (lower.contains("\"gbk\"") || lower.contains("'gbk'"))
}

/// Resolve a possibly relative URL template against the source URL.
///
/// String based so that `%s` and `{{…}}` holes survive untouched.
pub(crate) fn resolve_url(base: &str, url: &str) -> String {
    let url = url.trim();
    if url.is_empty() || url.contains("://") {
        return url.to_string();
    }
    let Ok(parsed) = Url::parse(base.trim()) else {
        return url.to_string();
    };
    if let Some(rest) = url.strip_prefix("//") {
        return format!("{}://{}", parsed.scheme(), rest);
    }
    if url.starts_with('/') {
        return format!("{}{}", parsed.origin().ascii_serialization(), url);
    }
    match parsed.join(url) {
        Ok(joined) if !url.contains("{{") => joined.to_string(),
        _ => format!("{}/{}", base.trim().trim_end_matches('/'), url),
    }
}
