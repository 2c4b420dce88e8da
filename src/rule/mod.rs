//! Rule splitting and evaluation
//!
//! A rule is split at its script boundary ([`split_rule`]), its head is
//! evaluated by the selector backend and the optional script tail is applied
//! to every head result by the [`RuleEngine`].

mod engine;
mod split;

pub use engine::RuleEngine;
pub use split::{find_js_block, has_template_pair, split_rule, JsBlock, SplitRule};
