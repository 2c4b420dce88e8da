//! HTML-backed `XPathEvaluator`
//!
//! Payloads are parsed with `sxd_html` (html5ever into an `sxd_document`)
//! and expressions are evaluated by `sxd_xpath`, an XPath 1.0 engine with
//! `ends-with` registered on top.
//!
//! Book-source conventions layered over standard XPath:
//! - element results come back as outer HTML, attributes as their values;
//! - a trailing `/text()` yields the trimmed text content of each matched
//!   element (jsoup `text()`), not its individual text nodes;
//! - a list item handed back as a payload is parsed as a fragment and
//!   relative paths start at its top elements.

use sxd_document::dom::{ChildOfElement, ChildOfRoot, Document, Element};
use sxd_document::Package;
use sxd_xpath::context::Evaluation;
use sxd_xpath::function::{self, Args, Function};
use sxd_xpath::nodeset::Node;
use sxd_xpath::{Context, Factory, Value, XPath};

use crate::error::SelectorError;
use crate::ports::{StopFlag, XPathEvaluator};

/// Elements serialized without a closing tag
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// `XPathEvaluator` over `sxd_html` and `sxd_xpath`
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlXPathEvaluator;

impl XPathEvaluator for HtmlXPathEvaluator {
    fn evaluate(
        &self,
        payload: &str,
        expr: &str,
        stop: &StopFlag,
    ) -> Result<Vec<String>, SelectorError> {
        if stop.is_stopped() {
            return Err(SelectorError::Stopped);
        }
        let (expr, text_mode) = text_content_form(expr.trim());
        let xpath = compile(&expr)?;

        let (package, wrapper) = parse_payload(payload);
        let document = package.as_document();
        let mut context = Context::new();
        context.set_function("ends-with", EndsWith);

        let starts = if is_absolute(&expr) {
            vec![Node::Root(document.root())]
        } else {
            top_nodes(document, wrapper)
        };

        let mut values = Vec::new();
        for start in starts {
            if stop.is_stopped() {
                return Err(SelectorError::Stopped);
            }
            let value = xpath
                .evaluate(&context, start)
                .map_err(|e| invalid(&expr, e.to_string()))?;
            collect(value, text_mode, &mut values);
        }
        Ok(values)
    }
}

fn compile(expr: &str) -> Result<XPath, SelectorError> {
    Factory::new()
        .build(expr)
        .map_err(|e| invalid(expr, e.to_string()))?
        .ok_or_else(|| invalid(expr, "empty expression".to_string()))
}

fn invalid(expr: &str, reason: String) -> SelectorError {
    SelectorError::InvalidXPath {
        expr: expr.to_string(),
        reason,
    }
}

fn collect(value: Value<'_>, text_mode: bool, out: &mut Vec<String>) {
    let nodes = match value {
        Value::Nodeset(nodes) => nodes.document_order(),
        other => {
            out.push(other.into_string());
            return;
        }
    };
    for node in nodes {
        let text = if text_mode {
            node.string_value().trim().to_string()
        } else {
            node_output(node)
        };
        if !text.is_empty() {
            out.push(text);
        }
    }
}

fn node_output(node: Node<'_>) -> String {
    match node {
        Node::Element(element) => outer_html(element),
        Node::Attribute(attribute) => attribute.value().to_string(),
        Node::Text(text) => text.text().trim().to_string(),
        other => other.string_value(),
    }
}

/// Rewrites `path/text()` (in every branch of a union) to `path`, flagging
/// that matches should be read as their text content.
fn text_content_form(expr: &str) -> (String, bool) {
    let branches = split_union(expr);
    let stripped: Option<Vec<&str>> = branches.iter().map(|b| strip_text_step(b)).collect();
    match stripped {
        Some(paths) => (paths.join(" | "), true),
        None => (expr.to_string(), false),
    }
}

fn strip_text_step(branch: &str) -> Option<&str> {
    let branch = branch.trim();
    if branch == "text()" {
        return Some(".");
    }
    let path = branch.strip_suffix("/text()")?.trim_end_matches('/');
    Some(if path.is_empty() { "." } else { path })
}

/// Top-level `|` branches, ignoring those inside predicates, calls or quotes.
fn split_union(expr: &str) -> Vec<&str> {
    let mut branches = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in expr.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[' | '(') => depth += 1,
            (None, ']' | ')') => depth = depth.saturating_sub(1),
            (None, '|') if depth == 0 => {
                branches.push(&expr[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    branches.push(&expr[start..]);
    branches
}

fn is_absolute(expr: &str) -> bool {
    expr.starts_with('/') || expr.starts_with('(')
}

/// Fragments are parsed inside a `<body>`; table parts are dropped by the
/// parser outside a table, so fragments starting with them get wrapped too.
/// The slice names the wrapper elements below `<html>`.
fn parse_payload(payload: &str) -> (Package, Option<&'static [&'static str]>) {
    let head = payload.trim_start();
    let head = head.get(..16).unwrap_or(head).to_ascii_lowercase();

    if head.starts_with("<!doctype") || head.starts_with("<html") {
        return (sxd_html::parse_html(payload), None);
    }

    let (open, close, names): (&str, &str, &'static [&'static str]) =
        if head.starts_with("<tr") {
            ("<table><tbody>", "</tbody></table>", &["body", "table", "tbody"])
        } else if head.starts_with("<td")
            || (head.starts_with("<th") && !head.starts_with("<thead"))
        {
            (
                "<table><tbody><tr>",
                "</tr></tbody></table>",
                &["body", "table", "tbody", "tr"],
            )
        } else if ["<tbody", "<thead", "<tfoot"].iter().any(|t| head.starts_with(t)) {
            ("<table>", "</table>", &["body", "table"])
        } else {
            ("", "", &["body"])
        };

    let html = format!("<html><body>{}{}{}</body></html>", open, payload, close);
    (sxd_html::parse_html(&html), Some(names))
}

/// Context nodes for relative expressions: the `<html>` element of a
/// document, or the top elements of a fragment.
fn top_nodes<'d>(document: Document<'d>, wrapper: Option<&[&str]>) -> Vec<Node<'d>> {
    let Some(root) = document.root().children().into_iter().find_map(|child| match child {
        ChildOfRoot::Element(element) => Some(element),
        _ => None,
    }) else {
        return vec![Node::Root(document.root())];
    };
    let Some(names) = wrapper else {
        return vec![Node::Element(root)];
    };

    let mut container = root;
    for name in names {
        match child_elements(container).find(|child| child.name().local_part() == *name) {
            Some(child) => container = child,
            None => break,
        }
    }
    let tops: Vec<Node<'d>> = child_elements(container).map(Node::Element).collect();
    if tops.is_empty() {
        // plain text payload
        return vec![Node::Element(container)];
    }
    tops
}

fn child_elements<'d>(element: Element<'d>) -> impl Iterator<Item = Element<'d>> {
    element.children().into_iter().filter_map(|child| match child {
        ChildOfElement::Element(element) => Some(element),
        _ => None,
    })
}

fn outer_html(element: Element<'_>) -> String {
    let mut out = String::new();
    write_element(element, &mut out);
    out
}

fn write_element(element: Element<'_>, out: &mut String) {
    let name = element.name().local_part();
    out.push('<');
    out.push_str(name);
    for attribute in element.attributes() {
        out.push(' ');
        out.push_str(attribute.name().local_part());
        out.push_str("=\"");
        push_escaped(attribute.value(), true, out);
        out.push('"');
    }
    out.push('>');
    if VOID_ELEMENTS.contains(&name) {
        return;
    }

    let raw = matches!(name, "script" | "style");
    for child in element.children() {
        match child {
            ChildOfElement::Element(child) => write_element(child, out),
            ChildOfElement::Text(text) if raw => out.push_str(text.text()),
            ChildOfElement::Text(text) => push_escaped(text.text(), false, out),
            ChildOfElement::Comment(comment) => {
                out.push_str("<!--");
                out.push_str(comment.text());
                out.push_str("-->");
            }
            ChildOfElement::ProcessingInstruction(_) => {}
        }
    }
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn push_escaped(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

/// XPath 2.0 `ends-with`, emitted for CSS `[attr$=value]`
struct EndsWith;

impl Function for EndsWith {
    fn evaluate<'c, 'd>(
        &self,
        _context: &Evaluation<'c, 'd>,
        args: Vec<Value<'d>>,
    ) -> Result<Value<'d>, function::Error> {
        let mut args = Args(args);
        args.exactly(2)?;
        let suffix = args.pop_string()?;
        let text = args.pop_string()?;
        Ok(Value::Boolean(text.ends_with(&suffix)))
    }
}
