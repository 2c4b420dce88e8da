//! Canonical selector form stored in decoded records

use std::borrow::Cow;

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::rule::{split_rule, SplitRule};

use super::{
    classify, css_to_xpath, legacy_to_xpath, literal_to_xpath, strip_json_prefix,
    strip_xpath_prefix, RuleKind,
};

/// A rule after classification and transpilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CanonicalSelector {
    #[serde(rename = "xpath")]
    XPath(String),
    Script(String),
    Template(String),
    JsonPath(String),
    /// Selector head whose results are each fed to a script tail
    Compound {
        head: Box<CanonicalSelector>,
        tail: String,
    },
    /// Yields the payload itself
    Identity,
    /// Not convertible; the text is the value
    Literal(String),
    /// `a||b`, `a&&b`, `a%%b`
    Alternatives {
        op: MultiOp,
        parts: Vec<CanonicalSelector>,
    },
}

/// Legado multi-rule operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MultiOp {
    /// First part with a non-empty result wins
    #[serde(rename = "||")]
    Or,
    /// Results of all parts, concatenated
    #[serde(rename = "&&")]
    And,
    /// Results of all parts, interleaved element by element
    #[serde(rename = "%%")]
    Interleave,
}

impl MultiOp {
    fn token(self) -> &'static str {
        match self {
            MultiOp::Or => "||",
            MultiOp::And => "&&",
            MultiOp::Interleave => "%%",
        }
    }
}

impl CanonicalSelector {
    /// Canonical form of a raw rule, ignoring any `##` post-filter.
    pub fn parse(raw: &str) -> Self {
        RuleField::parse(raw).selector
    }

    /// Canonical form of a selector head (no script markers).
    ///
    /// `None` means the head cannot be expressed as XPath or JSONPath.
    pub fn from_head(head: &str) -> Option<Self> {
        let head = head.trim();
        if head.is_empty() || is_identity_rule(head) {
            return Some(CanonicalSelector::Identity);
        }

        let xpath = match classify(head) {
            RuleKind::XPath => {
                return Some(CanonicalSelector::XPath(strip_xpath_prefix(head).into()))
            }
            RuleKind::JsonPath => {
                return Some(CanonicalSelector::JsonPath(strip_json_prefix(head).into()))
            }
            RuleKind::Css => css_to_xpath(head),
            RuleKind::Legacy => legacy_to_xpath(head),
            RuleKind::Literal => match literal_to_xpath(head) {
                Some(xpath) => xpath,
                None => return Some(CanonicalSelector::Identity),
            },
            RuleKind::Template => return Some(CanonicalSelector::Template(head.into())),
            RuleKind::Script | RuleKind::Compound => String::new(),
        };

        if xpath.is_empty() {
            None
        } else {
            Some(CanonicalSelector::XPath(xpath))
        }
    }

    /// True when evaluating needs the script runtime.
    pub fn needs_script(&self) -> bool {
        match self {
            CanonicalSelector::Script(_)
            | CanonicalSelector::Template(_)
            | CanonicalSelector::JsonPath(_)
            | CanonicalSelector::Compound { .. } => true,
            CanonicalSelector::Alternatives { parts, .. } => parts.iter().any(Self::needs_script),
            _ => false,
        }
    }
}

/// `html`, `all`, `@html`, `@all`...
fn is_identity_rule(head: &str) -> bool {
    head.split('@')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .all(|t| t == "html" || t == "all")
        && head.chars().any(|c| c != '@' && !c.is_whitespace())
}

/// Regex replacement attached to a rule with `##regex##replacement`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostFilter {
    pub pattern: String,
    pub replacement: String,
    /// `###` suffix: replace the first match only
    pub first_only: bool,
}

impl PostFilter {
    /// Parse the text after the first `##` (a leading `##` is tolerated).
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.strip_prefix("##").unwrap_or(text);
        let (body, first_only) = match text.strip_suffix("###") {
            Some(body) => (body, true),
            None => (text, false),
        };
        let (pattern, replacement) = match body.find("##") {
            Some(pos) => (&body[..pos], &body[pos + 2..]),
            None => (body, ""),
        };
        if pattern.is_empty() {
            return None;
        }
        Some(Self {
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
            first_only,
        })
    }

    /// Apply to one value; an invalid pattern leaves the value untouched.
    pub fn apply<'a>(&self, value: &'a str) -> Cow<'a, str> {
        let re = match Regex::new(&self.pattern) {
            Ok(re) => re,
            Err(e) => {
                warn!("Invalid post-filter regex `{}`: {}", self.pattern, e);
                return Cow::Borrowed(value);
            }
        };
        if self.first_only {
            re.replacen(value, 1, self.replacement.as_str())
        } else {
            re.replace_all(value, self.replacement.as_str())
        }
    }
}

/// Split off a `##` post-filter, ignoring `##` inside `{{…}}`.
pub(crate) fn split_filter(text: &str) -> (&str, Option<PostFilter>) {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'{', b'{') => {
                depth += 1;
                i += 2;
            }
            (b'}', b'}') if depth > 0 => {
                depth -= 1;
                i += 2;
            }
            (b'#', b'#') if depth == 0 => {
                return (&text[..i], PostFilter::parse(&text[i + 2..]));
            }
            _ => i += 1,
        }
    }
    (text, None)
}

/// Split `a||b` style heads at the first operator found at top level.
fn split_multi(head: &str) -> Option<(MultiOp, Vec<&str>)> {
    for op in [MultiOp::Or, MultiOp::And, MultiOp::Interleave] {
        let token = op.token();
        if !head.contains(token) {
            continue;
        }
        let parts = split_top_level_str(head, token);
        if parts.len() > 1 {
            return Some((op, parts));
        }
    }
    None
}

fn split_top_level_str<'a>(text: &'a str, token: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        if i < start {
            continue;
        }
        match (quote, c) {
            (Some(q), _) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[' | '(') => depth += 1,
            (None, ']' | ')') => depth -= 1,
            (None, _) if depth == 0 && text[i..].starts_with(token) => {
                parts.push(&text[start..i]);
                start = i + token.len();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// One rule field of a decoded record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleField {
    pub raw: String,
    pub selector: CanonicalSelector,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<PostFilter>,
}

impl RuleField {
    pub fn parse(raw: &str) -> Self {
        let (selector, filter) = match split_rule(raw) {
            SplitRule::Inline { head, tail } => compound(head, tail),
            SplitRule::Tagged { head, tail } => compound(&head, tail),
            SplitRule::Template(text) => {
                let (text, filter) = split_filter(text);
                (CanonicalSelector::Template(text.trim().to_string()), filter)
            }
            SplitRule::Plain(head) => {
                let (head, filter) = split_filter(head);
                (parse_head(head), filter)
            }
        };

        Self {
            raw: raw.to_string(),
            selector,
            filter,
        }
    }
}

fn compound(head: &str, tail: &str) -> (CanonicalSelector, Option<PostFilter>) {
    let (head, filter) = split_filter(head);
    let tail = tail.trim().to_string();
    if head.trim().is_empty() {
        (CanonicalSelector::Script(tail), filter)
    } else {
        let head = Box::new(parse_head(head));
        (CanonicalSelector::Compound { head, tail }, filter)
    }
}

fn parse_head(head: &str) -> CanonicalSelector {
    match split_multi(head) {
        Some((op, parts)) => CanonicalSelector::Alternatives {
            op,
            parts: parts.into_iter().map(parse_single).collect(),
        },
        None => parse_single(head),
    }
}

fn parse_single(head: &str) -> CanonicalSelector {
    CanonicalSelector::from_head(head)
        .unwrap_or_else(|| CanonicalSelector::Literal(head.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xpath(s: &str) -> CanonicalSelector {
        CanonicalSelector::XPath(s.to_string())
    }

    #[test]
    fn test_parse_pure_kinds() {
        assert_eq!(
            CanonicalSelector::parse("@XPath://h1/text()"),
            xpath("//h1/text()")
        );
        assert_eq!(
            CanonicalSelector::parse("@css:div.book a@href"),
            xpath("//div[contains(@class,'book')]//a/@href")
        );
        assert_eq!(
            CanonicalSelector::parse("@json:$.data.list"),
            CanonicalSelector::JsonPath("$.data.list".into())
        );
        assert_eq!(CanonicalSelector::parse("href"), xpath("@href"));
        assert_eq!(CanonicalSelector::parse("html"), CanonicalSelector::Identity);
        assert_eq!(CanonicalSelector::parse("@html"), CanonicalSelector::Identity);
        assert_eq!(CanonicalSelector::parse(""), CanonicalSelector::Identity);
    }

    #[test]
    fn test_parse_compound() {
        assert_eq!(
            CanonicalSelector::parse("class.name@text@js:result.trim()"),
            CanonicalSelector::Compound {
                head: Box::new(xpath("//*[@class='name']/text()")),
                tail: "result.trim()".into(),
            }
        );
        assert_eq!(
            CanonicalSelector::parse("<js>java.md5Encode(result)</js>"),
            CanonicalSelector::Script("java.md5Encode(result)".into())
        );
        assert_eq!(
            CanonicalSelector::parse("$.list<js>result</js>"),
            CanonicalSelector::Compound {
                head: Box::new(CanonicalSelector::JsonPath("$.list".into())),
                tail: "result".into(),
            }
        );
    }

    #[test]
    fn test_parse_template() {
        assert_eq!(
            CanonicalSelector::parse("https://a.com/{{key}}"),
            CanonicalSelector::Template("https://a.com/{{key}}".into())
        );
        assert_eq!(
            CanonicalSelector::parse("/b/{{$.id}}@js:result + '.html'"),
            CanonicalSelector::Compound {
                head: Box::new(CanonicalSelector::Template("/b/{{$.id}}".into())),
                tail: "result + '.html'".into(),
            }
        );
    }

    #[test]
    fn test_unconvertible_is_literal() {
        assert_eq!(
            CanonicalSelector::parse("@css:h1 + p"),
            CanonicalSelector::Literal("@css:h1 + p".into())
        );
    }

    #[test]
    fn test_field_filter_detached() {
        let field = RuleField::parse("class.intro@text##\\s+##_");
        assert_eq!(field.selector, xpath("//*[@class='intro']/text()"));
        let filter = field.filter.unwrap();
        assert_eq!(filter.pattern, "\\s+");
        assert_eq!(filter.replacement, "_");
        assert!(!filter.first_only);
        assert_eq!(filter.apply("a  b c"), "a_b_c");
    }

    #[test]
    fn test_filter_first_only_and_delete() {
        let filter = PostFilter::parse("##\\d##X###").unwrap();
        assert!(filter.first_only);
        assert_eq!(filter.apply("a1b2"), "aXb2");

        let filter = PostFilter::parse("广告").unwrap();
        assert_eq!(filter.apply("正文广告结束"), "正文结束");
    }

    #[test]
    fn test_filter_not_split_inside_braces() {
        let (text, filter) = split_filter("{{'a##b'}}x");
        assert_eq!(text, "{{'a##b'}}x");
        assert!(filter.is_none());
    }

    #[test]
    fn test_invalid_filter_regex_keeps_value() {
        let filter = PostFilter::parse("(unclosed").unwrap();
        assert_eq!(filter.apply("keep"), "keep");
    }

    #[test]
    fn test_alternatives() {
        assert_eq!(
            CanonicalSelector::parse("class.a@text||class.b@text"),
            CanonicalSelector::Alternatives {
                op: MultiOp::Or,
                parts: vec![
                    xpath("//*[@class='a']/text()"),
                    xpath("//*[@class='b']/text()")
                ],
            }
        );
        match CanonicalSelector::parse("//a/@href&&//link/@href") {
            CanonicalSelector::Alternatives { op, parts } => {
                assert_eq!(op, MultiOp::And);
                assert_eq!(parts.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_single_pipe_xpath_is_not_split() {
        assert_eq!(
            CanonicalSelector::parse("//h1/text() | //h2/text()"),
            xpath("//h1/text() | //h2/text()")
        );
    }

    #[test]
    fn test_needs_script() {
        assert!(CanonicalSelector::parse("$.a").needs_script());
        assert!(!CanonicalSelector::parse("//a").needs_script());
    }
}
