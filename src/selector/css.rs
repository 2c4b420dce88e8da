//! CSS → XPath
//!
//! Covers the jsoup subset book sources actually use: type, class, id and
//! attribute selectors, descendant and child combinators, selector groups
//! and a trailing `@attr` extraction.

use super::{terminal_for, xpath_literal, Terminal};

/// Transpile `@css:sel@attr` (prefix optional) to XPath.
///
/// Returns an empty string when the selector cannot be expressed.
pub fn css_to_xpath(rule: &str) -> String {
    let rule = rule.trim();
    let rule = rule.strip_prefix("@css:").unwrap_or(rule).trim();

    let (selector, terminal) = match find_terminal_at(rule) {
        Some(pos) => (&rule[..pos], Some(&rule[pos + 1..])),
        None => (rule, None),
    };

    let tail = match terminal.map(terminal_for) {
        None | Some(Terminal::Identity) => String::new(),
        Some(Terminal::Path(path)) => path,
        Some(Terminal::Invalid) => return String::new(),
    };

    let mut groups = Vec::new();
    for group in split_top_level(selector, ',') {
        if group.trim().is_empty() {
            continue;
        }
        match group_to_xpath(group) {
            Some(xpath) => groups.push(format!("{}{}", xpath, tail)),
            None => return String::new(),
        }
    }

    groups.join(" | ")
}

/// Position of the last `@` outside brackets, parens and quotes, if it is
/// not the first character.
fn find_terminal_at(rule: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut found = None;

    for (i, c) in rule.char_indices() {
        match (quote, c) {
            (Some(q), _) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[' | '(') => depth += 1,
            (None, ']' | ')') => depth -= 1,
            (None, '@') if depth == 0 && i > 0 => found = Some(i),
            _ => {}
        }
    }
    found
}

/// Split on `sep` where it is not nested in brackets, parens or quotes.
pub(crate) fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), _) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[' | '(') => depth += 1,
            (None, ']' | ')') => depth -= 1,
            (None, _) if c == sep && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Compound(&'a str),
    Child,
    Sibling,
}

fn tokenize(selector: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start: Option<usize> = None;

    for (i, c) in selector.char_indices() {
        match (quote, c) {
            (Some(q), _) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => {
                quote = Some(c);
                start.get_or_insert(i);
            }
            (None, '[' | '(') => {
                depth += 1;
                start.get_or_insert(i);
            }
            (None, ']' | ')') => depth -= 1,
            (None, '>') if depth == 0 => {
                flush(selector, &mut tokens, &mut start, i);
                tokens.push(Token::Child);
            }
            (None, '+' | '~') if depth == 0 => {
                flush(selector, &mut tokens, &mut start, i);
                tokens.push(Token::Sibling);
            }
            (None, _) if c.is_whitespace() && depth == 0 => {
                flush(selector, &mut tokens, &mut start, i);
            }
            _ => {
                start.get_or_insert(i);
            }
        }
    }
    flush(selector, &mut tokens, &mut start, selector.len());
    tokens
}

fn flush<'a>(
    selector: &'a str,
    tokens: &mut Vec<Token<'a>>,
    start: &mut Option<usize>,
    end: usize,
) {
    if let Some(s) = start.take() {
        tokens.push(Token::Compound(&selector[s..end]));
    }
}

fn group_to_xpath(group: &str) -> Option<String> {
    let mut xpath = String::new();
    let mut axis = "//";

    for token in tokenize(group.trim()) {
        match token {
            Token::Child => axis = "/",
            // no sibling axes in the evaluated subset
            Token::Sibling => return None,
            Token::Compound(text) => {
                xpath.push_str(axis);
                xpath.push_str(&compound_to_step(text)?);
                axis = "//";
            }
        }
    }

    if xpath.is_empty() {
        None
    } else {
        Some(xpath)
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn take_name(text: &str) -> (&str, &str) {
    let end = text
        .char_indices()
        .find(|(_, c)| !is_name_char(*c))
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    (&text[..end], &text[end..])
}

/// One compound selector (`div.a#b[c=d]`) to one XPath step.
pub(crate) fn compound_to_step(text: &str) -> Option<String> {
    let mut rest = text;
    let mut tag = "*";

    if let Some(after) = rest.strip_prefix('*') {
        rest = after;
    } else {
        let (name, after) = take_name(rest);
        if !name.is_empty() {
            tag = name;
            rest = after;
        }
    }

    let mut predicates: Vec<String> = Vec::new();
    while let Some(c) = rest.chars().next() {
        match c {
            '.' => {
                let (name, after) = take_name(&rest[1..]);
                if name.is_empty() {
                    return None;
                }
                predicates.push(format!("contains(@class,{})", xpath_literal(name)));
                rest = after;
            }
            '#' => {
                let (name, after) = take_name(&rest[1..]);
                if name.is_empty() {
                    return None;
                }
                predicates.push(format!("@id={}", xpath_literal(name)));
                rest = after;
            }
            '[' => {
                let close = rest.find(']')?;
                predicates.push(attribute_predicate(&rest[1..close])?);
                rest = &rest[close + 1..];
            }
            ':' => {
                // pseudo-classes are dropped, arguments included
                let (_, after) = take_name(&rest[1..]);
                rest = match after.strip_prefix('(') {
                    Some(args) => &args[args.find(')')? + 1..],
                    None => after,
                };
            }
            _ => return None,
        }
    }

    if predicates.is_empty() {
        Some(tag.to_string())
    } else {
        Some(format!("{}[{}]", tag, predicates.join(" and ")))
    }
}

fn attribute_predicate(body: &str) -> Option<String> {
    let body = body.trim();
    let Some(eq) = body.find('=') else {
        let (name, rest) = take_name(body);
        if name.is_empty() || !rest.trim().is_empty() {
            return None;
        }
        return Some(format!("@{}", name));
    };

    let (name_part, op) = match body[..eq].chars().last() {
        Some(c @ ('^' | '*' | '~' | '$' | '|')) => (&body[..eq - 1], Some(c)),
        _ => (&body[..eq], None),
    };
    let name = name_part.trim();
    if name.is_empty() || !name.chars().all(is_name_char) {
        return None;
    }

    let value = body[eq + 1..].trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);
    let literal = xpath_literal(value);

    Some(match op {
        None => format!("@{}={}", name, literal),
        Some('^') => format!("starts-with(@{},{})", name, literal),
        Some('$') => format!("ends-with(@{},{})", name, literal),
        Some('~') => format!(
            "contains(concat(' ',normalize-space(@{}),' '),{})",
            name,
            xpath_literal(&format!(" {} ", value))
        ),
        Some('|') => format!(
            "(@{0}={1} or starts-with(@{0},{2}))",
            name,
            literal,
            xpath_literal(&format!("{}-", value))
        ),
        _ => format!("contains(@{},{})", name, literal),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_css_with_terminal_attr() {
        assert_eq!(
            css_to_xpath("@css:div.book a@href"),
            "//div[contains(@class,'book')]//a/@href"
        );
    }

    #[test]
    fn test_css_predicates_joined() {
        assert_eq!(
            css_to_xpath("@css:div.a.b#main[data-x=1]"),
            "//div[contains(@class,'a') and contains(@class,'b') and @id='main' and @data-x='1']"
        );
        assert_eq!(css_to_xpath("@css:[title]"), "//*[@title]");
        assert_eq!(css_to_xpath("@css:.intro"), "//*[contains(@class,'intro')]");
    }

    #[test]
    fn test_css_terminals() {
        assert_eq!(css_to_xpath("@css:h1@text"), "//h1/text()");
        assert_eq!(css_to_xpath("@css:img@src"), "//img/@src");
        assert_eq!(css_to_xpath("@css:div#content@html"), "//div[@id='content']");
        assert_eq!(css_to_xpath("@css:div@innerHtml"), "//div");
        assert_eq!(css_to_xpath("@css:meta@content"), "//meta/@content");
        assert_eq!(css_to_xpath("@css:a@data-id"), "//a/@data-id");
    }

    #[test]
    fn test_css_child_combinator() {
        assert_eq!(css_to_xpath("@css:ul > li a"), "//ul/li//a");
        assert_eq!(css_to_xpath("@css:ul>li"), "//ul/li");
    }

    #[test]
    fn test_css_attribute_operators() {
        assert_eq!(
            css_to_xpath("@css:a[href^='/book']@href"),
            "//a[starts-with(@href,'/book')]/@href"
        );
        assert_eq!(css_to_xpath("@css:a[href*=txt]"), "//a[contains(@href,'txt')]");
        assert_eq!(
            css_to_xpath("@css:a[href$='.html']@href"),
            "//a[ends-with(@href,'.html')]/@href"
        );
        assert_eq!(
            css_to_xpath("@css:div[class~=item]"),
            "//div[contains(concat(' ',normalize-space(@class),' '),' item ')]"
        );
        assert_eq!(
            css_to_xpath("@css:p[lang|=zh]"),
            "//p[(@lang='zh' or starts-with(@lang,'zh-'))]"
        );
    }

    #[test]
    fn test_css_ends_with_evaluates() {
        use crate::ports::{StopFlag, XPathEvaluator};
        use crate::xpath::HtmlXPathEvaluator;

        let html = r#"<a href="/b/1.html">甲</a><a href="/b/2">乙</a><a href="/b/3.html">丙</a>"#;
        let xpath = css_to_xpath("@css:a[href$='.html']@text");
        let names = HtmlXPathEvaluator.evaluate(html, &xpath, &StopFlag::new()).unwrap();
        assert_eq!(names, vec!["甲", "丙"]);
    }

    #[test]
    fn test_css_quoted_space_is_one_token() {
        assert_eq!(
            css_to_xpath("@css:meta[property=\"og:novel author\"]@content"),
            "//meta[@property='og:novel author']/@content"
        );
    }

    #[test]
    fn test_css_groups_and_pseudo() {
        assert_eq!(css_to_xpath("@css:h1, h2@text"), "//h1/text() | //h2/text()");
        assert_eq!(css_to_xpath("@css:li:nth-child(2) a"), "//li//a");
    }

    #[test]
    fn test_css_unconvertible() {
        assert_eq!(css_to_xpath("@css:"), "");
        assert_eq!(css_to_xpath("@css:h1 + p"), "");
        assert_eq!(css_to_xpath("@css:div@a b"), "");
    }
}
