use std::cell::RefCell;

use tracing::{debug, warn};

use crate::ports::{StopFlag, XPathEvaluator};
use crate::script::ScriptHost;
use crate::selector::{jsonpath_script, CanonicalSelector, MultiOp, RuleField};

/// Template holes that are selectors rather than script
const SELECTOR_HOLES: [&str; 5] = ["@css:", "@XPath:", "@xpath:", "@json:", "$."];

/// Evaluates rules against a payload.
///
/// Borrows the script host and the XPath backend; holds no other state than
/// the message of the last failed selector or script.
pub struct RuleEngine<'a> {
    host: &'a ScriptHost,
    xpath: &'a dyn XPathEvaluator,
    last_error: RefCell<Option<String>>,
}

impl<'a> RuleEngine<'a> {
    pub fn new(host: &'a ScriptHost, xpath: &'a dyn XPathEvaluator) -> Self {
        Self {
            host,
            xpath,
            last_error: RefCell::new(None),
        }
    }

    pub fn host(&self) -> &ScriptHost {
        self.host
    }

    /// Parse and evaluate a raw rule.
    pub fn evaluate(&self, rule: &str, payload: &str, stop: &StopFlag) -> Vec<String> {
        self.evaluate_field(&RuleField::parse(rule), payload, stop)
    }

    /// Evaluate a decoded rule field, applying its post-filter to every value.
    pub fn evaluate_field(
        &self,
        field: &RuleField,
        payload: &str,
        stop: &StopFlag,
    ) -> Vec<String> {
        let values = self.evaluate_selector(&field.selector, payload, stop);
        match &field.filter {
            Some(filter) => values
                .iter()
                .map(|value| filter.apply(value).into_owned())
                .collect(),
            None => values,
        }
    }

    /// Like [`evaluate_field`](Self::evaluate_field), but a script-only rule
    /// sees the payload as `result`.
    ///
    /// Used for the fields of a fetched page, where `<js>…</js>` rules work
    /// on the page body.
    pub fn evaluate_in_page(
        &self,
        field: &RuleField,
        payload: &str,
        stop: &StopFlag,
    ) -> Vec<String> {
        match &field.selector {
            CanonicalSelector::Script(code) => {
                let compound = RuleField {
                    raw: field.raw.clone(),
                    selector: CanonicalSelector::Compound {
                        head: Box::new(CanonicalSelector::Identity),
                        tail: code.clone(),
                    },
                    filter: field.filter.clone(),
                };
                self.evaluate_field(&compound, payload, stop)
            }
            _ => self.evaluate_field(field, payload, stop),
        }
    }

    /// First non-empty value, or `""`.
    pub fn evaluate_first(&self, field: &RuleField, payload: &str, stop: &StopFlag) -> String {
        self.evaluate_in_page(field, payload, stop)
            .into_iter()
            .find(|value| !value.is_empty())
            .unwrap_or_default()
    }

    /// All values joined by newlines.
    pub fn evaluate_joined(&self, field: &RuleField, payload: &str, stop: &StopFlag) -> String {
        self.evaluate_in_page(field, payload, stop).join("\n")
    }

    pub fn evaluate_selector(
        &self,
        selector: &CanonicalSelector,
        payload: &str,
        stop: &StopFlag,
    ) -> Vec<String> {
        if stop.is_stopped() {
            return Vec::new();
        }

        match selector {
            CanonicalSelector::XPath(expr) => self.select_xpath(payload, expr, stop),
            CanonicalSelector::JsonPath(path) => self.select_json(payload, path),
            CanonicalSelector::Identity => vec![payload.to_string()],
            CanonicalSelector::Literal(text) => vec![text.clone()],
            CanonicalSelector::Script(code) => {
                self.host.set_result("");
                non_empty(self.run_script(code))
            }
            CanonicalSelector::Template(text) => {
                let text = self.process_template(text, stop);
                non_empty(self.expand_selector_holes(&text, payload, stop))
            }
            CanonicalSelector::Compound { head, tail } => {
                let heads = self.evaluate_selector(head, payload, stop);
                self.apply_tail(&heads, tail, stop)
            }
            CanonicalSelector::Alternatives { op, parts } => {
                self.evaluate_alternatives(*op, parts, payload, stop)
            }
        }
    }

    /// Interpolate `{{…}}` holes by evaluating each one as script.
    ///
    /// Literal text is copied through, an unmatched `{{` and everything after
    /// it is kept verbatim, and selector holes (`{{@css:…}}`, `{{$.a}}`) or
    /// `{{@js:…}}` keep their braces.
    pub fn process_template(&self, text: &str, stop: &StopFlag) -> String {
        let mut output = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(open) = rest.find("{{") {
            output.push_str(&rest[..open]);
            if stop.is_stopped() {
                return output;
            }
            let after = &rest[open + 2..];
            let Some(close) = after.find("}}") else {
                output.push_str(&rest[open..]);
                return output;
            };

            let expr = &after[..close];
            let trimmed = expr.trim_start();
            if trimmed.starts_with("@js:") || is_selector_hole(trimmed) {
                output.push_str(&rest[open..open + 2 + close + 2]);
            } else {
                output.push_str(&self.run_script(expr));
            }
            rest = &after[close + 2..];
        }

        output.push_str(rest);
        output
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }

    pub fn clear_error(&self) {
        self.last_error.borrow_mut().take();
        self.host.clear_error();
    }

    fn select_xpath(&self, payload: &str, expr: &str, stop: &StopFlag) -> Vec<String> {
        match self.xpath.evaluate(payload, expr, stop) {
            Ok(values) => values,
            Err(e) => {
                self.record(e.to_string());
                Vec::new()
            }
        }
    }

    fn select_json(&self, payload: &str, path: &str) -> Vec<String> {
        let code = match jsonpath_script(path) {
            Ok(code) => code,
            Err(e) => {
                self.record(e.to_string());
                return Vec::new();
            }
        };
        self.host.set_result(payload);
        non_empty(self.run_script(&code))
    }

    fn apply_tail(&self, heads: &[String], tail: &str, stop: &StopFlag) -> Vec<String> {
        let mut output = Vec::with_capacity(heads.len());
        for head in heads {
            if stop.is_stopped() {
                debug!("Stopped after {} of {} results", output.len(), heads.len());
                break;
            }
            self.host.set_result(head);
            let value = self.run_script(tail);
            if !value.is_empty() {
                output.push(value);
            }
        }
        output
    }

    fn evaluate_alternatives(
        &self,
        op: MultiOp,
        parts: &[CanonicalSelector],
        payload: &str,
        stop: &StopFlag,
    ) -> Vec<String> {
        match op {
            MultiOp::Or => parts
                .iter()
                .map(|part| self.evaluate_selector(part, payload, stop))
                .find(|values| values.iter().any(|v| !v.is_empty()))
                .unwrap_or_default(),
            MultiOp::And => parts
                .iter()
                .flat_map(|part| self.evaluate_selector(part, payload, stop))
                .collect(),
            MultiOp::Interleave => {
                let lists: Vec<Vec<String>> = parts
                    .iter()
                    .map(|part| self.evaluate_selector(part, payload, stop))
                    .collect();
                let longest = lists.iter().map(Vec::len).max().unwrap_or(0);
                let mut output = Vec::new();
                for i in 0..longest {
                    for list in &lists {
                        if let Some(value) = list.get(i) {
                            output.push(value.clone());
                        }
                    }
                }
                output
            }
        }
    }

    /// Replace `{{@css:…}}` style holes with the first match in the payload.
    fn expand_selector_holes(&self, text: &str, payload: &str, stop: &StopFlag) -> String {
        if !text.contains("{{") {
            return text.to_string();
        }

        let mut output = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(open) = rest.find("{{") {
            output.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            let Some(close) = after.find("}}") else {
                output.push_str(&rest[open..]);
                return output;
            };
            let inner = after[..close].trim();
            if is_selector_hole(inner) {
                let selector = CanonicalSelector::parse(inner);
                let value = self
                    .evaluate_selector(&selector, payload, stop)
                    .into_iter()
                    .next()
                    .unwrap_or_default();
                output.push_str(&value);
            } else {
                output.push_str(&rest[open..open + 2 + close + 2]);
            }
            rest = &after[close + 2..];
        }
        output.push_str(rest);
        output
    }

    fn run_script(&self, code: &str) -> String {
        self.host.clear_error();
        let value = self.host.evaluate(code);
        if let Some(error) = self.host.last_error() {
            *self.last_error.borrow_mut() = Some(error);
        }
        value
    }

    fn record(&self, message: String) {
        warn!("{}", message);
        *self.last_error.borrow_mut() = Some(message);
    }
}

fn is_selector_hole(expr: &str) -> bool {
    SELECTOR_HOLES.iter().any(|prefix| expr.starts_with(prefix))
}

fn non_empty(value: String) -> Vec<String> {
    if value.is_empty() {
        Vec::new()
    } else {
        vec![value]
    }
}
