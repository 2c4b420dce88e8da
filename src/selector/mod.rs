//! Selector classification and transpilation
//!
//! Book-source rules arrive in several dialects: XPath, jsoup-style CSS
//! (`@css:`), JSONPath, the legacy dotted form (`class.name.0@tag.a@href`)
//! and bare attribute names. Everything that can be expressed as XPath is
//! rewritten to XPath here so that the runtime only has one selector kind to
//! evaluate. All functions in this module are pure.

mod canonical;
mod css;
mod jsonpath;
mod legacy;

pub use canonical::{CanonicalSelector, MultiOp, PostFilter, RuleField};
pub use css::css_to_xpath;
pub use jsonpath::{jsonpath_member_chain, jsonpath_script};
pub use legacy::legacy_to_xpath;

use serde::Serialize;

use crate::rule::{find_js_block, has_template_pair};

/// What a raw rule string is, decided by its surface syntax alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    XPath,
    Css,
    JsonPath,
    Legacy,
    Literal,
    Script,
    Template,
    Compound,
}

/// Classify a raw rule
///
/// The order matters: script markers win over everything, then explicit
/// prefixes, then the legacy dotted form, and a bare word is an attribute.
pub fn classify(raw: &str) -> RuleKind {
    let rule = raw.trim();

    if let Some(pos) = rule.find("@js:") {
        return if rule[..pos].trim().is_empty() {
            RuleKind::Script
        } else {
            RuleKind::Compound
        };
    }
    if let Some(block) = find_js_block(rule) {
        let outside = format!("{}{}", &rule[..block.start], &rule[block.end..]);
        return if outside.trim().is_empty() {
            RuleKind::Script
        } else {
            RuleKind::Compound
        };
    }
    if has_template_pair(rule) {
        return RuleKind::Template;
    }
    if is_xpath(rule) {
        return RuleKind::XPath;
    }
    if is_jsonpath(rule) {
        return RuleKind::JsonPath;
    }
    if is_css(rule) {
        return RuleKind::Css;
    }
    if rule.contains('@') || rule.contains('.') {
        return RuleKind::Legacy;
    }
    RuleKind::Literal
}

pub fn is_xpath(rule: &str) -> bool {
    let rule = rule.trim_start();
    rule.starts_with('/') || rule.starts_with("@XPath:") || rule.starts_with("@xpath:")
}

pub fn is_jsonpath(rule: &str) -> bool {
    let rule = rule.trim_start();
    rule.starts_with("$.") || rule.starts_with("$[") || rule.starts_with("@json:")
}

pub fn is_css(rule: &str) -> bool {
    rule.trim_start().starts_with("@css:")
}

pub fn is_script(rule: &str) -> bool {
    matches!(classify(rule), RuleKind::Script | RuleKind::Compound)
}

pub fn is_template(rule: &str) -> bool {
    classify(rule) == RuleKind::Template
}

/// Strip an `@XPath:` / `@xpath:` prefix
pub fn strip_xpath_prefix(rule: &str) -> &str {
    let rule = rule.trim();
    rule.strip_prefix("@XPath:")
        .or_else(|| rule.strip_prefix("@xpath:"))
        .unwrap_or(rule)
        .trim()
}

/// Strip an `@json:` prefix
pub fn strip_json_prefix(rule: &str) -> &str {
    let rule = rule.trim();
    rule.strip_prefix("@json:").unwrap_or(rule).trim()
}

pub(crate) fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// XPath string literal, switching quote style when the value holds `'`.
pub(crate) fn xpath_literal(value: &str) -> String {
    if value.contains('\'') && !value.contains('"') {
        format!("\"{}\"", value)
    } else {
        format!("'{}'", value.replace('\'', ""))
    }
}

/// Terminal extraction for a trailing attribute-like token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Terminal {
    /// Keep the element itself
    Identity,
    /// Append this XPath tail (`/text()`, `/@href`, ...)
    Path(String),
    /// Not a usable name
    Invalid,
}

pub(crate) fn terminal_for(name: &str) -> Terminal {
    let name = name.trim();
    match name.to_ascii_lowercase().as_str() {
        "text" | "textnodes" | "owntext" => Terminal::Path("/text()".into()),
        "href" => Terminal::Path("/@href".into()),
        "src" => Terminal::Path("/@src".into()),
        "html" | "innerhtml" | "outerhtml" | "all" => Terminal::Identity,
        _ if is_attribute_name(name) => Terminal::Path(format!("/@{}", name)),
        _ => Terminal::Invalid,
    }
}

fn is_attribute_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == ':')
}

/// XPath for a bare literal rule such as `href` or `data-id`.
///
/// Returns `None` for identity names (`html`, `all`) and an empty string when
/// the word cannot be an attribute name.
pub fn literal_to_xpath(rule: &str) -> Option<String> {
    match terminal_for(rule) {
        Terminal::Identity => None,
        Terminal::Path(tail) => Some(tail.trim_start_matches('/').to_string()),
        Terminal::Invalid => Some(String::new()),
    }
}
