//! Embedded script host
//!
//! One QuickJS runtime and one context, a `java` global carrying the host
//! functions Legado rules expect, typed setters for the ambient globals and a
//! persistent key/value store that survives between operations.
//!
//! Script values never leave [`ScriptHost::evaluate`]; every host function
//! converts its arguments to owned Rust strings before doing any work.

mod functions;

pub use functions::{
    base64_decode, base64_encode, decode_uri, encode_uri, html_format, md5_hex, md5_hex16,
    time_format,
};

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use rquickjs::context::EvalOptions;
use rquickjs::prelude::{Opt, Rest};
use rquickjs::{
    CatchResultExt, CaughtError, Coerced, Context, Ctx, FromJs, Function, Object, Runtime, Value,
};
use tracing::{debug, warn};

use crate::config::ScriptConfig;
use crate::error::ScriptError;
use crate::ports::{
    CharsetCodec, EncodingRsCodec, HttpTransport, LogSink, OfflineTransport, StopFlag,
    TracingLogSink,
};
use crate::source::split_url_options;

/// Collaborators reachable from scripts
#[derive(Clone)]
pub struct HostServices {
    pub transport: Rc<dyn HttpTransport>,
    pub log: Rc<dyn LogSink>,
    pub codec: Rc<dyn CharsetCodec>,
}

impl Default for HostServices {
    fn default() -> Self {
        Self {
            transport: Rc::new(OfflineTransport),
            log: Rc::new(TracingLogSink),
            codec: Rc::new(EncodingRsCodec),
        }
    }
}

type Store = Rc<RefCell<HashMap<String, String>>>;

/// Owner of the script runtime and its ambient context.
pub struct ScriptHost {
    context: Context,
    runtime: Runtime,
    store: Store,
    last_error: RefCell<Option<String>>,
}

impl ScriptHost {
    pub fn new(config: &ScriptConfig, services: HostServices) -> Result<Self, ScriptError> {
        let runtime = Runtime::new().map_err(|e| ScriptError::Init(e.to_string()))?;
        runtime.set_memory_limit(config.memory_limit);
        runtime.set_max_stack_size(config.max_stack_size);

        let context = Context::full(&runtime).map_err(|e| ScriptError::Init(e.to_string()))?;
        let store: Store = Rc::default();

        context
            .with(|ctx| install_globals(&ctx, &services, &store))
            .map_err(|e| ScriptError::Init(e.to_string()))?;

        let host = Self {
            context,
            runtime,
            store,
            last_error: RefCell::new(None),
        };
        host.reset_ambient();
        debug!("Script host ready ({} byte heap cap)", config.memory_limit);
        Ok(host)
    }

    /// Host with default limits, offline transport and tracing log sink
    pub fn with_defaults() -> Result<Self, ScriptError> {
        Self::new(&ScriptConfig::default(), HostServices::default())
    }

    /// Evaluate `code`; on failure returns `""` and records the error.
    pub fn evaluate(&self, code: &str) -> String {
        match self.try_evaluate(code) {
            Ok(value) => value,
            Err(e) => {
                warn!("{}", e);
                *self.last_error.borrow_mut() = Some(e.to_string());
                String::new()
            }
        }
    }

    /// Evaluate `code` and return its completion value as a string.
    ///
    /// `undefined` and `null` become `""`; everything else goes through the
    /// script's own string conversion.
    pub fn try_evaluate(&self, code: &str) -> Result<String, ScriptError> {
        self.context.with(|ctx| {
            let value = match wrap_expression(code) {
                Some(wrapped) => match eval_sloppy(&ctx, wrapped).catch(&ctx) {
                    Ok(value) => value,
                    // not an expression after all, e.g. `if (a) b`
                    Err(e) if is_syntax_error(&e) => {
                        eval_sloppy(&ctx, code).catch(&ctx).map_err(describe)?
                    }
                    Err(e) => return Err(describe(e)),
                },
                None => eval_sloppy(&ctx, code).catch(&ctx).map_err(describe)?,
            };
            value_to_string(&ctx, value)
                .catch(&ctx)
                .map_err(describe)
        })
    }

    /// Evaluate and parse the result as an integer, `None` when not numeric.
    pub fn evaluate_int(&self, code: &str) -> Option<i64> {
        let value = self.evaluate(code);
        let value = value.trim();
        value
            .parse::<i64>()
            .ok()
            .or_else(|| value.parse::<f64>().ok().map(|f| f as i64))
    }

    /// Evaluate and read the result with script truthiness rules.
    pub fn evaluate_bool(&self, code: &str) -> bool {
        let value = self.evaluate(code);
        !matches!(value.trim(), "" | "false" | "0" | "NaN" | "null" | "undefined")
    }

    /// Bind a string global.
    pub fn set_ambient(&self, name: &str, value: &str) {
        self.bind(name, |_, globals| globals.set(name, value));
    }

    pub fn set_result(&self, value: &str) {
        self.set_ambient("result", value);
    }

    pub fn set_base_url(&self, url: &str) {
        self.set_ambient("baseUrl", url);
    }

    pub fn set_key(&self, key: &str) {
        self.set_ambient("key", key);
    }

    /// `page` is a number so `{{page + 1}}` does arithmetic.
    pub fn set_page(&self, page: i64) {
        self.bind("page", |_, globals| globals.set("page", page as f64));
    }

    pub fn set_book_info(&self, name: &str, author: &str, url: &str) {
        self.bind("book", |ctx, globals| {
            let book = Object::new(ctx.clone())?;
            book.set("name", name)?;
            book.set("author", author)?;
            book.set("bookUrl", url)?;
            globals.set("book", book)
        });
    }

    pub fn set_chapter_info(&self, title: &str, url: &str) {
        self.set_ambient("title", title);
        self.set_ambient("chapterUrl", url);
    }

    /// Reset every ambient global; the `put`/`get` store is kept.
    pub fn reset_ambient(&self) {
        for name in ["result", "baseUrl", "key", "title", "chapterUrl"] {
            self.set_ambient(name, "");
        }
        self.set_page(1);
        self.set_book_info("", "", "");
    }

    /// Write to the persistent store shared with `java.put`.
    pub fn put(&self, key: &str, value: &str) {
        self.store
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
    }

    /// Read from the persistent store; missing keys are `""`.
    pub fn get(&self, key: &str) -> String {
        self.store.borrow().get(key).cloned().unwrap_or_default()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }

    pub fn clear_error(&self) {
        self.last_error.borrow_mut().take();
    }

    /// Abort running scripts once `flag` is raised.
    pub fn set_stop_flag(&self, flag: &StopFlag) {
        let flag = flag.clone();
        self.runtime
            .set_interrupt_handler(Some(Box::new(move || flag.is_stopped())));
    }

    fn bind<F>(&self, name: &str, bind: F)
    where
        F: for<'js> FnOnce(&Ctx<'js>, &Object<'js>) -> rquickjs::Result<()>,
    {
        let outcome = self.context.with(|ctx| bind(&ctx, &ctx.globals()));
        if let Err(e) = outcome {
            warn!("Failed to bind global `{}`: {}", name, e);
        }
    }
}

/// Global, non-strict evaluation: rule scripts assign undeclared globals.
fn eval_sloppy<'js, S>(ctx: &Ctx<'js>, code: S) -> rquickjs::Result<Value<'js>>
where
    S: Into<Vec<u8>>,
{
    let mut options = EvalOptions::default();
    options.global = true;
    options.strict = false;
    ctx.eval_with_options(code, options)
}

/// Wrap bare expressions so their value is the completion value.
fn wrap_expression(code: &str) -> Option<String> {
    let trimmed = code.trim_start();
    let is_statement = code.contains(';')
        || ["var ", "let ", "const ", "function "]
            .iter()
            .any(|kw| trimmed.starts_with(kw));
    if is_statement || trimmed.is_empty() {
        None
    } else {
        Some(format!("(\n{}\n)", code))
    }
}

fn is_syntax_error(error: &CaughtError<'_>) -> bool {
    match error {
        CaughtError::Exception(ex) => ex
            .as_object()
            .get::<_, String>("name")
            .map(|name| name == "SyntaxError")
            .unwrap_or(false),
        _ => false,
    }
}

fn describe(error: CaughtError<'_>) -> ScriptError {
    let message = match error {
        CaughtError::Exception(ex) => {
            let name = ex
                .as_object()
                .get::<_, String>("name")
                .unwrap_or_else(|_| "Error".to_string());
            match ex.message() {
                Some(message) => format!("{}: {}", name, message),
                None => name,
            }
        }
        CaughtError::Value(value) => format!("uncaught {:?}", value),
        CaughtError::Error(e) => e.to_string(),
    };
    ScriptError::Runtime(message)
}

fn value_to_string<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> rquickjs::Result<String> {
    if value.is_undefined() || value.is_null() {
        return Ok(String::new());
    }
    Ok(Coerced::<String>::from_js(ctx, value)?.0)
}

fn arg(value: Opt<Coerced<String>>) -> String {
    value.0.map(|c| c.0).unwrap_or_default()
}

fn is_utf8_label(charset: &str) -> bool {
    let charset = charset.trim();
    charset.is_empty()
        || charset.eq_ignore_ascii_case("utf-8")
        || charset.eq_ignore_ascii_case("utf8")
}

fn install_globals<'js>(
    ctx: &Ctx<'js>,
    services: &HostServices,
    store: &Store,
) -> rquickjs::Result<()> {
    let java = Object::new(ctx.clone())?;

    let log = services.log.clone();
    java.set(
        "log",
        Function::new(ctx.clone(), move |msg: Opt<Coerced<String>>| {
            log.write(&arg(msg));
        })?,
    )?;

    let transport = services.transport.clone();
    java.set(
        "ajax",
        Function::new(ctx.clone(), move |url: Opt<Coerced<String>>| {
            ajax(transport.as_ref(), &arg(url))
        })?,
    )?;

    let transport = services.transport.clone();
    java.set(
        "post",
        Function::new(
            ctx.clone(),
            move |url: Opt<Coerced<String>>,
                  body: Opt<Coerced<String>>,
                  headers: Opt<Value<'js>>| {
                let headers = headers.0.map(headers_from_value).unwrap_or_default();
                let url = arg(url);
                transport
                    .post(&url, &arg(body), &headers)
                    .unwrap_or_else(|e| {
                        warn!("java.post failed: {}", e);
                        String::new()
                    })
            },
        )?,
    )?;

    let values = store.clone();
    java.set(
        "get",
        Function::new(ctx.clone(), move |key: Opt<Coerced<String>>| {
            values.borrow().get(&arg(key)).cloned().unwrap_or_default()
        })?,
    )?;

    let values = store.clone();
    java.set(
        "put",
        Function::new(
            ctx.clone(),
            move |key: Opt<Coerced<String>>, value: Opt<Coerced<String>>| {
                let value = arg(value);
                values.borrow_mut().insert(arg(key), value.clone());
                value
            },
        )?,
    )?;

    java.set(
        "md5Encode",
        Function::new(ctx.clone(), |text: Opt<Coerced<String>>| md5_hex(&arg(text)))?,
    )?;
    java.set(
        "md5Encode16",
        Function::new(ctx.clone(), |text: Opt<Coerced<String>>| md5_hex16(&arg(text)))?,
    )?;
    java.set(
        "base64Encode",
        Function::new(ctx.clone(), |text: Opt<Coerced<String>>| {
            base64_encode(arg(text).as_bytes())
        })?,
    )?;
    for name in ["base64Decode", "base64DecodeToString"] {
        java.set(
            name,
            Function::new(ctx.clone(), |text: Opt<Coerced<String>>| {
                String::from_utf8_lossy(&base64_decode(&arg(text))).into_owned()
            })?,
        )?;
    }

    let codec = services.codec.clone();
    java.set(
        "encodeURI",
        Function::new(
            ctx.clone(),
            move |text: Opt<Coerced<String>>, charset: Opt<Coerced<String>>| {
                let text = arg(text);
                let charset = arg(charset);
                if is_utf8_label(&charset) {
                    encode_uri(text.as_bytes())
                } else {
                    encode_uri(&codec.encode(&text, &charset))
                }
            },
        )?,
    )?;

    let codec = services.codec.clone();
    java.set(
        "decodeURI",
        Function::new(
            ctx.clone(),
            move |text: Opt<Coerced<String>>, charset: Opt<Coerced<String>>| {
                let bytes = decode_uri(&arg(text));
                let charset = arg(charset);
                if is_utf8_label(&charset) {
                    String::from_utf8_lossy(&bytes).into_owned()
                } else {
                    codec.decode(&bytes, &charset)
                }
            },
        )?,
    )?;

    java.set(
        "timeFormat",
        Function::new(
            ctx.clone(),
            |time: Opt<Coerced<f64>>, pattern: Opt<Coerced<String>>| {
                let time = time.0.map(|c| c.0).unwrap_or_default();
                let pattern = pattern.0.map(|c| c.0);
                time_format(time as i64, pattern.as_deref())
            },
        )?,
    )?;
    java.set(
        "htmlFormat",
        Function::new(ctx.clone(), |text: Opt<Coerced<String>>| html_format(&arg(text)))?,
    )?;

    let globals = ctx.globals();
    globals.set("java", java)?;

    let console = Object::new(ctx.clone())?;
    let log = services.log.clone();
    console.set(
        "log",
        Function::new(ctx.clone(), move |parts: Rest<Coerced<String>>| {
            let line: Vec<String> = parts.0.into_iter().map(|c| c.0).collect();
            log.write(&line.join(" "));
        })?,
    )?;
    globals.set("console", console)?;

    Ok(())
}

/// `java.ajax(url)`; the url may carry `,{"method":..,"body":..,"headers":..}`.
fn ajax(transport: &dyn HttpTransport, raw: &str) -> String {
    let (url, options) = split_url_options(raw);
    let outcome = match options {
        Some(options) if options.is_post() => {
            transport.post(url, options.body.as_deref().unwrap_or_default(), &options.headers)
        }
        Some(options) => transport.get_with_headers(url, &options.headers),
        None => transport.get(url),
    };
    outcome.unwrap_or_else(|e| {
        warn!("java.ajax failed: {}", e);
        String::new()
    })
}

fn headers_from_value(value: Value<'_>) -> Vec<(String, String)> {
    let Some(object) = value.as_object() else {
        return Vec::new();
    };
    object
        .props::<String, Coerced<String>>()
        .filter_map(|entry| entry.ok())
        .map(|(name, value)| (name, value.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    #[derive(Default)]
    struct RecordingTransport {
        calls: RefCell<Vec<String>>,
    }

    impl HttpTransport for RecordingTransport {
        fn get(&self, url: &str) -> Result<String, TransportError> {
            self.calls.borrow_mut().push(format!("GET {}", url));
            Ok(format!("body of {}", url))
        }

        fn get_with_headers(
            &self,
            url: &str,
            headers: &[(String, String)],
        ) -> Result<String, TransportError> {
            self.calls
                .borrow_mut()
                .push(format!("GET {} {:?}", url, headers));
            Ok(format!("body of {}", url))
        }

        fn post(
            &self,
            url: &str,
            body: &str,
            headers: &[(String, String)],
        ) -> Result<String, TransportError> {
            self.calls
                .borrow_mut()
                .push(format!("POST {} {} {:?}", url, body, headers));
            Ok("posted".to_string())
        }
    }

    #[derive(Default)]
    struct MemoryLog(RefCell<Vec<String>>);

    impl LogSink for MemoryLog {
        fn write(&self, msg: &str) {
            self.0.borrow_mut().push(msg.to_string());
        }
    }

    fn host() -> ScriptHost {
        ScriptHost::with_defaults().unwrap()
    }

    #[test]
    fn test_expression_and_statement() {
        let host = host();
        assert_eq!(host.evaluate("1 + 2"), "3");
        assert_eq!(host.evaluate("var a = 'x'; a + 'y'"), "xy");
        assert_eq!(host.evaluate("if (true) 'yes'"), "yes");
        assert_eq!(host.evaluate("undefined"), "");
        assert_eq!(host.evaluate("null"), "");
    }

    #[test]
    fn test_undeclared_assignment_is_global() {
        let host = host();
        assert_eq!(host.try_evaluate("x = 5; x + 1").unwrap(), "6");
        assert_eq!(host.evaluate("x"), "5");
        assert_eq!(host.evaluate("(function () { return this !== undefined; })()"), "true");
    }

    #[test]
    fn test_error_sets_last_error() {
        let host = host();
        assert_eq!(host.evaluate("nosuchthing.call()"), "");
        let error = host.last_error().unwrap();
        assert!(error.starts_with("JS Error:"), "{}", error);
        assert!(error.contains("ReferenceError"));

        host.clear_error();
        assert_eq!(host.evaluate("throw 'plain'"), "");
        assert!(host.last_error().unwrap().starts_with("JS Error:"));
    }

    #[test]
    fn test_ambient_values_are_not_source_text() {
        let host = host();
        host.set_result("it's a \"quote\"\n'); throw 1; ('");
        assert_eq!(host.evaluate("result"), "it's a \"quote\"\n'); throw 1; ('");
        host.set_page(2);
        assert_eq!(host.evaluate("page + 1"), "3");
        host.set_book_info("Name", "Author", "http://b");
        assert_eq!(host.evaluate("book.name + '/' + book.bookUrl"), "Name/http://b");
        host.set_chapter_info("Ch1", "http://c/1");
        assert_eq!(host.evaluate("title + chapterUrl"), "Ch1http://c/1");
    }

    #[test]
    fn test_reset_keeps_store() {
        let host = host();
        host.set_key("k");
        host.evaluate("java.put('token', 'abc')");
        host.reset_ambient();
        assert_eq!(host.evaluate("key"), "");
        assert_eq!(host.evaluate("java.get('token')"), "abc");
        assert_eq!(host.get("token"), "abc");
        assert_eq!(host.evaluate("java.get('missing')"), "");
    }

    #[test]
    fn test_put_get_survives_evaluations() {
        let host = host();
        host.put("k", "v");
        host.evaluate("var x = 1; x++");
        host.evaluate("throw new Error('boom')");
        assert_eq!(host.evaluate("java.get('k')"), "v");
    }

    #[test]
    fn test_java_helpers() {
        let host = host();
        assert_eq!(host.evaluate("java.md5Encode('')"), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(host.evaluate("java.md5Encode16('')"), "8f00b204e9800998");
        assert_eq!(host.evaluate("java.base64Encode('Hello World')"), "SGVsbG8gV29ybGQ=");
        assert_eq!(host.evaluate("java.base64Decode('SGVsbG8gV29ybGQ=')"), "Hello World");
        assert_eq!(host.evaluate("java.encodeURI('你好')"), "%E4%BD%A0%E5%A5%BD");
        assert_eq!(host.evaluate("java.encodeURI('斗破', 'gbk')"), "%B6%B7%C6%C6");
        assert_eq!(host.evaluate("java.decodeURI('%B6%B7%C6%C6', 'gbk')"), "斗破");
        assert_eq!(host.evaluate("java.decodeURI('a+b')"), "a b");
        assert_eq!(host.evaluate("java.htmlFormat('a&amp;b<br/>c')"), "a&b\nc");
    }

    #[test]
    fn test_transport_calls() {
        let transport = Rc::new(RecordingTransport::default());
        let services = HostServices {
            transport: transport.clone(),
            ..HostServices::default()
        };
        let host = ScriptHost::new(&ScriptConfig::default(), services).unwrap();

        assert_eq!(host.evaluate("java.ajax('http://a/1')"), "body of http://a/1");
        assert_eq!(
            host.evaluate("java.post('http://a/2', 'x=1', {'X-Token': 't'})"),
            "posted"
        );
        assert_eq!(
            host.evaluate(r#"java.ajax('http://a/3,{"method":"POST","body":"q=2"}')"#),
            "posted"
        );

        let calls = transport.calls.borrow();
        assert_eq!(calls[0], "GET http://a/1");
        assert_eq!(calls[1], r#"POST http://a/2 x=1 [("X-Token", "t")]"#);
        assert!(calls[2].starts_with("POST http://a/3 q=2"));
        drop(calls);

        assert_eq!(
            host.evaluate(r#"java.ajax('http://a/4,{"headers":{"Referer":"http://a/"}}')"#),
            "body of http://a/4"
        );
        assert_eq!(
            transport.calls.borrow()[3],
            r#"GET http://a/4 [("Referer", "http://a/")]"#
        );
    }

    #[test]
    fn test_offline_ajax_is_empty() {
        let host = host();
        assert_eq!(host.evaluate("java.ajax('http://x')"), "");
        assert!(host.last_error().is_none());
    }

    #[test]
    fn test_logging() {
        let log = Rc::new(MemoryLog::default());
        let services = HostServices {
            log: log.clone(),
            ..HostServices::default()
        };
        let host = ScriptHost::new(&ScriptConfig::default(), services).unwrap();
        host.evaluate("java.log('hello'); console.log('a', 1)");
        assert_eq!(*log.0.borrow(), vec!["hello".to_string(), "a 1".to_string()]);
    }

    #[test]
    fn test_memory_limit_is_a_script_error() {
        let config = ScriptConfig {
            memory_limit: 4 * 1024 * 1024,
            ..ScriptConfig::default()
        };
        let host = ScriptHost::new(&config, HostServices::default()).unwrap();
        let out = host.evaluate("var a = []; while (true) { a.push('x'.repeat(1024)); }");
        assert_eq!(out, "");
        assert!(host.last_error().unwrap().starts_with("JS Error:"));
    }

    #[test]
    fn test_stop_flag_interrupts() {
        let host = host();
        let flag = StopFlag::new();
        host.set_stop_flag(&flag);
        flag.stop();
        assert_eq!(host.evaluate("while (true) {}"), "");
        assert!(host.last_error().is_some());
    }

    #[test]
    fn test_evaluate_typed() {
        let host = host();
        assert_eq!(host.evaluate_int("40 + 2"), Some(42));
        assert_eq!(host.evaluate_int("'abc'"), None);
        assert!(host.evaluate_bool("1 < 2"));
        assert!(!host.evaluate_bool("1 > 2"));
    }
}
