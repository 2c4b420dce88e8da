//! Book-source records
//!
//! A book source is a Legado JSON record describing how to search a site and
//! extract book info, the table of contents and chapter text from it. The
//! decoder turns such records into [`BookSourceRecord`]s with every rule field
//! already classified and transpiled.

mod decoder;
mod search_url;

pub use decoder::{decode_sources, DecodeSummary};
pub use search_url::{split_url_options, Charset, SearchMethod, SearchUrl, UrlOptions};

pub(crate) use search_url::resolve_url;

use serde::Serialize;

use crate::selector::{PostFilter, RuleField};

/// Content kind of a source (`bookSourceType`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Text,
    Audio,
    Image,
}

impl SourceKind {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(SourceKind::Text),
            1 => Some(SourceKind::Audio),
            2 => Some(SourceKind::Image),
            _ => None,
        }
    }
}

/// A decoded, accepted book source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookSourceRecord {
    pub source_url: String,
    pub source_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_group: Option<String>,
    pub kind: SourceKind,
    pub search: SearchUrl,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
    pub search_rule: SearchRule,
    pub book_info_rule: BookInfoRule,
    pub toc_rule: TocRule,
    pub content_rule: ContentRule,
}

/// `ruleSearch`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_list: Option<RuleField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<RuleField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<RuleField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_url: Option<RuleField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<RuleField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intro: Option<RuleField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<RuleField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_chapter: Option<RuleField>,
}

/// `ruleBookInfo`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BookInfoRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<RuleField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<RuleField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intro: Option<RuleField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<RuleField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toc_url: Option<RuleField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<RuleField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_chapter: Option<RuleField>,
}

impl BookInfoRule {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// `ruleToc`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TocRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_list: Option<RuleField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_name: Option<RuleField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_url: Option<RuleField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_toc_url: Option<RuleField>,
}

/// `ruleContent`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContentRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<RuleField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_content_url: Option<RuleField>,
    /// `replaceRegex`, applied to the joined chapter text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replace_regex: Option<PostFilter>,
}
