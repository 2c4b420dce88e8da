//! JSONPath → script member access
//!
//! Only plain member chains are supported (`$.a.b`, `$.a[0]`, `$['a-b']`).
//! The path is evaluated by the script runtime against `JSON.parse(result)`.

use crate::error::SelectorError;

use super::{is_identifier, strip_json_prefix};

/// `$.data.list[0]` → `.data.list[0]`
pub fn jsonpath_member_chain(path: &str) -> Result<String, SelectorError> {
    let unsupported = || SelectorError::UnsupportedJsonPath(path.to_string());

    let body = strip_json_prefix(path);
    let mut rest = body.strip_prefix('$').ok_or_else(unsupported)?;
    if rest.starts_with("..") {
        return Err(unsupported());
    }

    let mut chain = String::new();
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let end = after.find(['.', '[']).unwrap_or(after.len());
            let name = &after[..end];
            if name.is_empty() {
                return Err(unsupported());
            }
            push_member(&mut chain, name);
            rest = &after[end..];
        } else if let Some(after) = rest.strip_prefix('[') {
            let close = after.find(']').ok_or_else(unsupported)?;
            let inner = after[..close].trim();
            if inner == "*" {
                // wildcard over a list: keep the list itself
            } else if let Ok(index) = inner.parse::<usize>() {
                chain.push_str(&format!("[{}]", index));
            } else if let Some(name) = quoted(inner) {
                push_member(&mut chain, name);
            } else {
                return Err(unsupported());
            }
            rest = &after[close + 1..];
        } else {
            return Err(unsupported());
        }
    }

    Ok(chain)
}

/// The script evaluated for a JSONPath head, with `result` bound to the payload.
pub fn jsonpath_script(path: &str) -> Result<String, SelectorError> {
    let chain = jsonpath_member_chain(path)?;
    Ok(format!("var data = JSON.parse(result); data{};", chain))
}

fn push_member(chain: &mut String, name: &str) {
    if is_identifier(name) {
        chain.push('.');
        chain.push_str(name);
    } else {
        chain.push_str(&format!("[{}]", serde_json::Value::from(name)));
    }
}

fn quoted(text: &str) -> Option<&str> {
    text.strip_prefix('\'')
        .and_then(|t| t.strip_suffix('\''))
        .or_else(|| text.strip_prefix('"').and_then(|t| t.strip_suffix('"')))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_chain() {
        assert_eq!(jsonpath_member_chain("$.data.list").unwrap(), ".data.list");
        assert_eq!(jsonpath_member_chain("@json:$.a.b").unwrap(), ".a.b");
        assert_eq!(jsonpath_member_chain("$").unwrap(), "");
    }

    #[test]
    fn test_indices_and_quoted_keys() {
        assert_eq!(
            jsonpath_member_chain("$.list[0].name").unwrap(),
            ".list[0].name"
        );
        assert_eq!(
            jsonpath_member_chain("$['book-name']").unwrap(),
            "[\"book-name\"]"
        );
        assert_eq!(jsonpath_member_chain("$.list[*]").unwrap(), ".list");
    }

    #[test]
    fn test_script_synthesis() {
        assert_eq!(
            jsonpath_script("$.data.list").unwrap(),
            "var data = JSON.parse(result); data.data.list;"
        );
    }

    #[test]
    fn test_rejects_unsupported() {
        assert!(jsonpath_member_chain("$..name").is_err());
        assert!(jsonpath_member_chain("$.list[?(@.x)]").is_err());
        assert!(jsonpath_member_chain("data.list").is_err());
        assert!(jsonpath_member_chain("$.a.").is_err());
    }
}
