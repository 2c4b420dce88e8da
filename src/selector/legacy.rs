//! Legacy dotted selectors (`class.list.0@tag.a@href`) → XPath

use super::css::compound_to_step;
use super::xpath_literal;

enum Piece {
    Step(String),
    Tail(&'static str),
    Nothing,
}

/// Transpile a legacy dotted rule; empty output means not convertible.
pub fn legacy_to_xpath(rule: &str) -> String {
    let mut xpath = String::new();
    let mut has_step = false;

    for token in rule.split('@').map(str::trim).filter(|t| !t.is_empty()) {
        match token_to_piece(token) {
            Some(Piece::Step(step)) => {
                xpath.push_str("//");
                xpath.push_str(&step);
                has_step = true;
            }
            Some(Piece::Tail(tail)) => {
                if tail == "/*" {
                    has_step = true;
                }
                xpath.push_str(tail);
            }
            Some(Piece::Nothing) => {}
            None => return String::new(),
        }
    }

    if has_step {
        xpath
    } else {
        // only terminals: relative to the current node
        xpath.trim_start_matches('/').to_string()
    }
}

fn token_to_piece(token: &str) -> Option<Piece> {
    let mut segments = token.splitn(3, '.');
    let kind = segments.next().unwrap_or_default();
    let name = segments.next().unwrap_or_default();
    let index = segments.next().and_then(position_predicate);

    let piece = match kind {
        "class" if !name.is_empty() => Piece::Step(format!(
            "*[@class={}]{}",
            xpath_literal(name),
            index.unwrap_or_default()
        )),
        "id" if !name.is_empty() => Piece::Step(format!("*[@id={}]", xpath_literal(name))),
        "tag" => {
            let tag = if name.is_empty() { "*" } else { name };
            Piece::Step(format!("{}{}", tag, index.unwrap_or_default()))
        }
        "text" | "textNodes" | "ownText" => Piece::Tail("/text()"),
        "href" => Piece::Tail("/@href"),
        "src" => Piece::Tail("/@src"),
        "content" => Piece::Tail("/@content"),
        "children" => Piece::Tail("/*"),
        "html" | "all" => Piece::Nothing,
        // anything else is read as a plain CSS compound selector
        _ => Piece::Step(compound_to_step(token)?),
    };
    Some(piece)
}

/// Legado indices are 0-based and may count from the end.
fn position_predicate(index: &str) -> Option<String> {
    let index: i64 = index.trim().parse().ok()?;
    Some(match index {
        i if i >= 0 => format!("[{}]", i + 1),
        -1 => "[last()]".to_string(),
        i => format!("[last()-{}]", -i - 1),
    })
}
