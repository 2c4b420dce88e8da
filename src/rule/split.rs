//! Splitting a raw rule at its script boundary

use std::ops::Range;

/// Location of a `<js>…</js>` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsBlock {
    /// Byte offset of `<js>`
    pub start: usize,
    /// Byte offset just past `</js>`
    pub end: usize,
    /// Script between the tags
    pub code: Range<usize>,
}

/// First `<js>` with a matching `</js>` after it.
pub fn find_js_block(rule: &str) -> Option<JsBlock> {
    let start = rule.find("<js>")?;
    let code_start = start + "<js>".len();
    let close = rule[code_start..].find("</js>")? + code_start;
    Some(JsBlock {
        start,
        end: close + "</js>".len(),
        code: code_start..close,
    })
}

/// A rule cut into its selector head and script tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitRule<'a> {
    /// `head@js:tail`
    Inline { head: &'a str, tail: &'a str },
    /// `head<js>tail</js>rest`, head is the text around the block
    Tagged { head: String, tail: &'a str },
    /// Text with `{{…}}` holes
    Template(&'a str),
    /// Selector only
    Plain(&'a str),
}

impl SplitRule<'_> {
    pub fn head(&self) -> &str {
        match self {
            SplitRule::Inline { head, .. } => head,
            SplitRule::Tagged { head, .. } => head,
            SplitRule::Template(_) => "",
            SplitRule::Plain(head) => head,
        }
    }

    pub fn tail(&self) -> Option<&str> {
        match self {
            SplitRule::Inline { tail, .. } | SplitRule::Tagged { tail, .. } => Some(tail),
            _ => None,
        }
    }
}

/// Split a rule: `@js:` first, then `<js>…</js>`, then templates.
pub fn split_rule(rule: &str) -> SplitRule<'_> {
    if let Some(pos) = rule.find("@js:") {
        return SplitRule::Inline {
            head: &rule[..pos],
            tail: &rule[pos + "@js:".len()..],
        };
    }

    if let Some(block) = find_js_block(rule) {
        let mut head = String::with_capacity(rule.len());
        head.push_str(&rule[..block.start]);
        head.push_str(&rule[block.end..]);
        return SplitRule::Tagged {
            head,
            tail: &rule[block.code],
        };
    }

    if has_template_pair(rule) {
        return SplitRule::Template(rule);
    }

    SplitRule::Plain(rule)
}

/// True when a `{{` is later closed by `}}`.
pub fn has_template_pair(rule: &str) -> bool {
    rule.find("{{")
        .map(|open| rule[open + 2..].contains("}}"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_split_inline() {
        let split = split_rule("//li/a/text()@js:result.trim()");
        assert_eq!(
            split,
            SplitRule::Inline {
                head: "//li/a/text()",
                tail: "result.trim()"
            }
        );
        assert_eq!(split.tail(), Some("result.trim()"));
    }

    #[test]
    fn test_split_first_marker_only() {
        let split = split_rule("a@js:x@js:y");
        assert_eq!(split.head(), "a");
        assert_eq!(split.tail(), Some("x@js:y"));
    }

    #[test]
    fn test_split_tagged() {
        let split = split_rule("<js>result + 1</js>");
        assert_eq!(
            split,
            SplitRule::Tagged {
                head: String::new(),
                tail: "result + 1"
            }
        );

        let split = split_rule("$.list<js>result</js>");
        assert_eq!(split.head(), "$.list");
    }

    #[test]
    fn test_unclosed_tag_is_plain() {
        assert_eq!(split_rule("<js>oops"), SplitRule::Plain("<js>oops"));
    }

    #[test]
    fn test_split_template() {
        assert_eq!(
            split_rule("/s?q={{key}}"),
            SplitRule::Template("/s?q={{key}}")
        );
        assert_eq!(split_rule("/s?q={{key"), SplitRule::Plain("/s?q={{key"));
    }

    proptest! {
        #[test]
        fn prop_inline_split_is_lossless(head in "[^@]{0,20}", tail in "\\PC{0,20}") {
            let rule = format!("{}@js:{}", head, tail);
            match split_rule(&rule) {
                SplitRule::Inline { head: h, tail: t } => {
                    prop_assert_eq!(format!("{}@js:{}", h, t), rule);
                }
                other => prop_assert!(false, "unexpected split {:?}", other),
            }
        }
    }
}
