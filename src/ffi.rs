//! FFI interface for the host reader
//!
//! Provides C-compatible functions for decoding book sources, transpiling a
//! single rule and evaluating a rule against a payload. Results are passed
//! back as JSON.

use std::ffi::{c_char, CStr, CString};
use std::ptr;

use serde::Serialize;

use crate::ports::StopFlag;
use crate::rule::RuleEngine;
use crate::script::ScriptHost;
use crate::selector::{classify, RuleField, RuleKind};
use crate::source::{decode_sources, BookSourceRecord, DecodeSummary};
use crate::xpath::HtmlXPathEvaluator;

/// Result struct returned to C
/// Both pointers are owned by Rust and must be freed via legado_free_result
#[repr(C)]
pub struct LegadoResultFFI {
    /// JSON-serialized result (null-terminated), or null on failure
    pub json_ptr: *mut c_char,
    /// Error message (null-terminated), or null on success
    pub error_ptr: *mut c_char,
}

#[derive(Serialize)]
struct DecodeOutput {
    sources: Vec<BookSourceRecord>,
    summary: DecodeSummary,
}

#[derive(Serialize)]
struct TranspileOutput {
    kind: RuleKind,
    #[serde(flatten)]
    field: RuleField,
}

#[derive(Serialize)]
struct EvaluateOutput {
    values: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Decode a Legado book-source document.
///
/// Returns `{"sources":[...],"summary":{"success":..,"skipped":..,"failed":..,"errors":[..]}}`.
///
/// # Safety
/// - `json` must be a valid null-terminated C string
/// - Caller must free the result via `legado_free_result`
#[no_mangle]
pub unsafe extern "C" fn legado_decode_sources(json: *const c_char) -> LegadoResultFFI {
    let json = match read_c_str(json, "Source JSON") {
        Ok(s) => s,
        Err(result) => return result,
    };

    match decode_sources(json) {
        Ok((sources, summary)) => make_json_result(&DecodeOutput { sources, summary }),
        Err(e) => make_error_result(&e.to_string()),
    }
}

/// Classify and transpile a single rule.
///
/// Returns `{"kind":..,"raw":..,"selector":{..},"filter":{..}}`.
///
/// # Safety
/// - `rule` must be a valid null-terminated C string
/// - Caller must free the result via `legado_free_result`
#[no_mangle]
pub unsafe extern "C" fn legado_transpile_rule(rule: *const c_char) -> LegadoResultFFI {
    let rule = match read_c_str(rule, "Rule") {
        Ok(s) => s,
        Err(result) => return result,
    };

    make_json_result(&TranspileOutput {
        kind: classify(rule),
        field: RuleField::parse(rule),
    })
}

/// Evaluate a rule against a payload with a fresh, offline script host.
///
/// Returns `{"values":[..],"error":".."}`; `error` is present when a
/// selector or script failed.
///
/// # Safety
/// - `payload_ptr` must point to valid memory of at least `payload_len` bytes
/// - `rule` must be a valid null-terminated C string
/// - Caller must free the result via `legado_free_result`
#[no_mangle]
pub unsafe extern "C" fn legado_evaluate_rule(
    payload_ptr: *const c_char,
    payload_len: usize,
    rule: *const c_char,
) -> LegadoResultFFI {
    let payload = if payload_ptr.is_null() || payload_len == 0 {
        ""
    } else {
        let slice = std::slice::from_raw_parts(payload_ptr as *const u8, payload_len);
        match std::str::from_utf8(slice) {
            Ok(s) => s,
            Err(_) => return make_error_result("Invalid UTF-8 in payload"),
        }
    };
    let rule = match read_c_str(rule, "Rule") {
        Ok(s) => s,
        Err(result) => return result,
    };

    let host = match ScriptHost::with_defaults() {
        Ok(host) => host,
        Err(e) => return make_error_result(&e.to_string()),
    };
    let xpath = HtmlXPathEvaluator;
    let engine = RuleEngine::new(&host, &xpath);

    let values = engine.evaluate_in_page(&RuleField::parse(rule), payload, &StopFlag::new());
    make_json_result(&EvaluateOutput {
        values,
        error: engine.last_error(),
    })
}

/// Free a LegadoResultFFI returned by any `legado_*` function
///
/// # Safety
/// - `result` must have been returned by a `legado_*` function
/// - Must only be called once per result
#[no_mangle]
pub unsafe extern "C" fn legado_free_result(result: LegadoResultFFI) {
    if !result.json_ptr.is_null() {
        drop(CString::from_raw(result.json_ptr));
    }
    if !result.error_ptr.is_null() {
        drop(CString::from_raw(result.error_ptr));
    }
}

unsafe fn read_c_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str, LegadoResultFFI> {
    if ptr.is_null() {
        return Err(make_error_result(&format!("{} is null", what)));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| make_error_result(&format!("Invalid UTF-8 in {}", what)))
}

fn make_json_result<T: Serialize>(value: &T) -> LegadoResultFFI {
    match serde_json::to_string(value) {
        Ok(json) => match CString::new(json) {
            Ok(cstr) => LegadoResultFFI {
                json_ptr: cstr.into_raw(),
                error_ptr: ptr::null_mut(),
            },
            Err(_) => make_error_result("Result JSON contains null bytes"),
        },
        Err(e) => make_error_result(&format!("Failed to serialize result: {}", e)),
    }
}

fn make_error_result(msg: &str) -> LegadoResultFFI {
    let error_cstr = CString::new(msg.replace('\0', " ")).unwrap_or_default();
    LegadoResultFFI {
        json_ptr: ptr::null_mut(),
        error_ptr: error_cstr.into_raw(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    /// Take ownership of the result's strings and free it.
    fn take(result: LegadoResultFFI) -> (Option<Value>, Option<String>) {
        let json = (!result.json_ptr.is_null()).then(|| {
            let text = unsafe { CStr::from_ptr(result.json_ptr) }.to_str().unwrap();
            serde_json::from_str(text).unwrap()
        });
        let error = (!result.error_ptr.is_null()).then(|| {
            unsafe { CStr::from_ptr(result.error_ptr) }
                .to_str()
                .unwrap()
                .to_string()
        });
        unsafe { legado_free_result(result) };
        (json, error)
    }

    #[test]
    fn test_decode_sources_ffi() {
        let input = CString::new(
            r#"[{"bookSourceUrl":"https://a.example","bookSourceName":"A","searchUrl":"/s?q={{key}}",
                 "ruleSearch":{"bookList":"@css:div.book"}},
                {"bookSourceUrl":"https://b.example","bookSourceName":"B","bookSourceType":2,"searchUrl":"/s?q={{key}}"}]"#,
        )
        .unwrap();
        let (json, error) = take(unsafe { legado_decode_sources(input.as_ptr()) });
        assert!(error.is_none());

        let json = json.unwrap();
        assert_eq!(json["summary"]["success"], 1);
        assert_eq!(json["summary"]["skipped"], 1);
        assert_eq!(json["sources"][0]["search"]["url"], "https://a.example/s?q=%s");
        assert_eq!(
            json["sources"][0]["search_rule"]["book_list"]["selector"]["value"],
            "//div[contains(@class,'book')]"
        );
    }

    #[test]
    fn test_decode_sources_ffi_invalid_json() {
        let input = CString::new("{oops").unwrap();
        let (json, error) = take(unsafe { legado_decode_sources(input.as_ptr()) });
        assert!(json.is_none());
        assert!(error.unwrap().starts_with("document is not valid JSON"));
    }

    #[test]
    fn test_transpile_rule_ffi() {
        let input = CString::new("@css:div.book a@href##\\?.*").unwrap();
        let (json, _) = take(unsafe { legado_transpile_rule(input.as_ptr()) });
        let json = json.unwrap();
        assert_eq!(json["kind"], "css");
        assert_eq!(json["selector"]["type"], "xpath");
        assert_eq!(json["selector"]["value"], "//div[contains(@class,'book')]//a/@href");
        assert_eq!(json["filter"]["pattern"], "\\?.*");
    }

    #[test]
    fn test_evaluate_rule_ffi() {
        let payload = r#"<ul><li><a href="/c/1">一</a></li><li><a href="/c/2">二</a></li></ul>"#;
        let rule = CString::new("//li/a@js:result.replace(/<[^>]+>/g, '')").unwrap();
        let (json, _) = take(unsafe {
            legado_evaluate_rule(payload.as_ptr() as *const c_char, payload.len(), rule.as_ptr())
        });
        assert_eq!(json.unwrap()["values"], serde_json::json!(["一", "二"]));
    }

    #[test]
    fn test_evaluate_rule_ffi_reports_script_error() {
        let rule = CString::new("@js:undefinedFunction()").unwrap();
        let (json, _) = take(unsafe { legado_evaluate_rule(ptr::null(), 0, rule.as_ptr()) });
        let json = json.unwrap();
        assert_eq!(json["values"], serde_json::json!([]));
        assert!(json["error"].as_str().unwrap().starts_with("JS Error:"));
    }

    #[test]
    fn test_null_rule() {
        let (json, error) = take(unsafe { legado_transpile_rule(ptr::null()) });
        assert!(json.is_none());
        assert_eq!(error.as_deref(), Some("Rule is null"));
    }
}
