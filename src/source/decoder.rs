use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::DecodeError;
use crate::selector::{PostFilter, RuleField};

use super::search_url::header_pairs;
use super::{
    BookInfoRule, BookSourceRecord, ContentRule, SearchRule, SearchUrl, SourceKind, TocRule,
};

/// Per-document acceptance counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecodeSummary {
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
    /// One message per failed record
    pub errors: Vec<String>,
}

/// Decode a Legado book-source document (an array of records or one record).
///
/// Only a document that is not JSON at all is an error. Individual records
/// are accepted, skipped (non-text kind, disabled) or failed (missing
/// fields, not an object), and counted in the summary. A bare scalar is one
/// failed record.
pub fn decode_sources(
    json: &str,
) -> Result<(Vec<BookSourceRecord>, DecodeSummary), DecodeError> {
    let json = json.trim_start_matches('\u{feff}');
    let document: Value =
        serde_json::from_str(json).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

    let entries: Vec<&Value> = match &document {
        Value::Array(items) => items.iter().collect(),
        _ => vec![&document],
    };

    let mut records = Vec::with_capacity(entries.len());
    let mut summary = DecodeSummary::default();

    for (index, entry) in entries.into_iter().enumerate() {
        match BookSourceRecord::from_value(index, entry) {
            Ok(record) => {
                debug!("Accepted source `{}`", record.source_name);
                summary.success += 1;
                records.push(record);
            }
            Err(e) if e.is_skip() => {
                debug!("Skipped: {}", e);
                summary.skipped += 1;
            }
            Err(e) => {
                warn!("Rejected: {}", e);
                summary.failed += 1;
                summary.errors.push(e.to_string());
            }
        }
    }

    info!(
        "Decoded book sources: {} accepted, {} skipped, {} failed",
        summary.success, summary.skipped, summary.failed
    );
    Ok((records, summary))
}

impl BookSourceRecord {
    /// Decode one record; `index` is its position in the document.
    pub fn from_value(index: usize, value: &Value) -> Result<Self, DecodeError> {
        let Value::Object(object) = value else {
            return Err(DecodeError::NotAnObject { index });
        };

        let kind = match object.get("bookSourceType") {
            None | Some(Value::Null) => SourceKind::Text,
            Some(code) => {
                let code = kind_code(code);
                match SourceKind::from_code(code) {
                    Some(SourceKind::Text) => SourceKind::Text,
                    _ => return Err(DecodeError::UnsupportedKind { index, code }),
                }
            }
        };
        if is_disabled(object.get("enabled")) {
            return Err(DecodeError::Disabled { index });
        }

        let source_url = required(object, index, "bookSourceUrl")?;
        let source_name = required(object, index, "bookSourceName")?;
        let search_url = required(object, index, "searchUrl")?;

        let search = SearchUrl::parse(&search_url, &source_url);
        if !search.has_key_hole() {
            return Err(DecodeError::NoKeyHole { index });
        }

        let headers = object.get("header").map(header_pairs).unwrap_or_default();

        let group = object.get("ruleSearch");
        let search_rule = SearchRule {
            book_list: rule(group, "bookList"),
            name: rule(group, "name"),
            author: rule(group, "author"),
            book_url: rule(group, "bookUrl"),
            cover_url: rule(group, "coverUrl"),
            intro: rule(group, "intro"),
            kind: rule(group, "kind"),
            last_chapter: rule(group, "lastChapter"),
        };

        let group = object.get("ruleBookInfo");
        let book_info_rule = BookInfoRule {
            name: rule(group, "name"),
            author: rule(group, "author"),
            intro: rule(group, "intro"),
            cover_url: rule(group, "coverUrl"),
            toc_url: rule(group, "tocUrl"),
            kind: rule(group, "kind"),
            last_chapter: rule(group, "lastChapter"),
        };

        let group = object.get("ruleToc");
        let toc_rule = TocRule {
            chapter_list: rule(group, "chapterList"),
            chapter_name: rule(group, "chapterName"),
            chapter_url: rule(group, "chapterUrl"),
            next_toc_url: rule(group, "nextTocUrl"),
        };

        let group = object.get("ruleContent");
        let content_rule = ContentRule {
            content: rule(group, "content"),
            next_content_url: rule(group, "nextContentUrl"),
            replace_regex: text(group, "replaceRegex").and_then(|r| PostFilter::parse(&r)),
        };

        Ok(Self {
            source_url,
            source_name,
            source_group: object
                .get("bookSourceGroup")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(str::to_string),
            kind,
            search,
            headers,
            search_rule,
            book_info_rule,
            toc_rule,
            content_rule,
        })
    }
}

/// `bookSourceType` as a number; strings are accepted, garbage is `-1`.
fn kind_code(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or(-1),
        Value::String(s) => s.trim().parse().unwrap_or(-1),
        _ => -1,
    }
}

fn is_disabled(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(enabled)) => !enabled,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("false"),
        Some(Value::Number(n)) => n.as_i64() == Some(0),
        _ => false,
    }
}

fn required(
    object: &Map<String, Value>,
    index: usize,
    field: &'static str,
) -> Result<String, DecodeError> {
    object
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(DecodeError::MissingField { index, field })
}

fn text(group: Option<&Value>, key: &str) -> Option<String> {
    group?
        .get(key)?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn rule(group: Option<&Value>, key: &str) -> Option<RuleField> {
    text(group, key).map(|raw| RuleField::parse(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::CanonicalSelector;
    use crate::source::{Charset, SearchMethod};

    const THREE_SOURCES: &str = r###"[
      {
        "bookSourceUrl": "https://www.biquge.example",
        "bookSourceName": "笔趣阁",
        "bookSourceGroup": "网文",
        "bookSourceType": 0,
        "enabled": true,
        "searchUrl": "/search.php?keyword={{key}}",
        "header": "{\"User-Agent\":\"Mozilla/5.0 Mobile\"}",
        "ruleSearch": {
          "bookList": "@css:div.result-item",
          "name": "@css:h3 a@text",
          "author": "class.author@text",
          "bookUrl": "@css:h3 a@href",
          "coverUrl": "img@src"
        },
        "ruleBookInfo": { "intro": "//div[@id='intro']/text()##\\s+## " },
        "ruleToc": {
          "chapterList": "//dl/dd",
          "chapterName": "a@text",
          "chapterUrl": "a@href"
        },
        "ruleContent": {
          "content": "id.content@html",
          "replaceRegex": "##请收藏本站|最新章节"
        }
      },
      {
        "bookSourceUrl": "https://audio.example",
        "bookSourceName": "听书",
        "bookSourceType": 1,
        "searchUrl": "/s?q={{key}}"
      },
      {
        "bookSourceUrl": "https://old.example",
        "bookSourceName": "旧站",
        "enabled": false,
        "searchUrl": "/s?q={{key}}"
      }
    ]"###;

    #[test]
    fn test_acceptance_gate_summary() {
        let (records, summary) = decode_sources(THREE_SOURCES).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            summary,
            DecodeSummary {
                success: 1,
                skipped: 2,
                failed: 0,
                errors: vec![],
            }
        );
        assert_eq!(records[0].source_name, "笔趣阁");
    }

    #[test]
    fn test_record_fields() {
        let (records, _) = decode_sources(THREE_SOURCES).unwrap();
        let record = &records[0];

        assert_eq!(record.source_group.as_deref(), Some("网文"));
        assert_eq!(record.kind, SourceKind::Text);
        assert_eq!(
            record.search.url,
            "https://www.biquge.example/search.php?keyword=%s"
        );
        assert_eq!(record.search.method, SearchMethod::Get);
        assert_eq!(record.search.charset, Charset::Utf8);
        assert_eq!(
            record.headers,
            vec![("User-Agent".to_string(), "Mozilla/5.0 Mobile".to_string())]
        );

        let name = record.search_rule.name.as_ref().unwrap();
        assert_eq!(name.selector, CanonicalSelector::XPath("//h3//a/text()".into()));
        assert_eq!(
            record.search_rule.book_list.as_ref().unwrap().selector,
            CanonicalSelector::XPath("//div[contains(@class,'result-item')]".into())
        );
        assert!(record.search_rule.intro.is_none());

        let intro = record.book_info_rule.intro.as_ref().unwrap();
        assert_eq!(intro.selector, CanonicalSelector::XPath("//div[@id='intro']/text()".into()));
        assert_eq!(intro.filter.as_ref().unwrap().pattern, "\\s+");

        let replace = record.content_rule.replace_regex.as_ref().unwrap();
        assert_eq!(replace.pattern, "请收藏本站|最新章节");
        assert_eq!(replace.replacement, "");
    }

    #[test]
    fn test_single_object() {
        let (records, summary) = decode_sources(
            r#"{"bookSourceUrl":"https://a.example","bookSourceName":"A","searchUrl":"https://a.example/s?q={{key}}"}"#,
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(summary.success, 1);
    }

    #[test]
    fn test_failed_records_are_reported() {
        let (records, summary) = decode_sources(
            r#"[
              {"bookSourceUrl":"https://a.example","bookSourceName":"A"},
              "not a record",
              {"bookSourceName":"B","searchUrl":"/s?q={{key}}"},
              {"bookSourceUrl":"https://c.example","bookSourceName":"C","searchUrl":"/top.html"}
            ]"#,
        )
        .unwrap();
        assert!(records.is_empty());
        assert_eq!(summary.failed, 4);
        assert_eq!(
            summary.errors,
            vec![
                "record #0: missing required field `searchUrl`",
                "record #1 is not an object",
                "record #2: missing required field `bookSourceUrl`",
                "record #3: searchUrl has no place for the search key",
            ]
        );
    }

    #[test]
    fn test_invalid_json_is_fatal() {
        assert!(matches!(
            decode_sources("[{\"bookSourceUrl\":"),
            Err(DecodeError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_scalar_document_is_one_failed_record() {
        let (records, summary) = decode_sources("42").unwrap();
        assert!(records.is_empty());
        assert_eq!(
            summary,
            DecodeSummary {
                success: 0,
                skipped: 0,
                failed: 1,
                errors: vec!["record #0 is not an object".to_string()],
            }
        );
        assert_eq!(decode_sources("\"text\"").unwrap().1.failed, 1);
    }

    #[test]
    fn test_search_url_without_key_is_rejected() {
        let (records, summary) = decode_sources(
            r#"{"bookSourceUrl":"https://a.example","bookSourceName":"A","searchUrl":"/top.html?p={{page}}"}"#,
        )
        .unwrap();
        assert!(records.is_empty());
        assert_eq!(
            summary.errors,
            vec!["record #0: searchUrl has no place for the search key"]
        );
    }

    #[test]
    fn test_lenient_gate_values() {
        let (records, summary) = decode_sources(
            r#"[
              {"bookSourceUrl":"https://a.example","bookSourceName":"A","bookSourceType":"0","searchUrl":"/s?q={{key}}"},
              {"bookSourceUrl":"https://b.example","bookSourceName":"B","bookSourceType":"2","searchUrl":"/s?q={{key}}"},
              {"bookSourceUrl":"https://c.example","bookSourceName":"C","enabled":"false","searchUrl":"/s?q={{key}}"}
            ]"#,
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(summary.skipped, 2);
    }

    #[test]
    fn test_script_fields_stay_compound() {
        let (records, _) = decode_sources(
            r#"{
              "bookSourceUrl":"https://a.example","bookSourceName":"A",
              "searchUrl":"<js>'https://a.example/s?q=' + java.encodeURI(key)</js>",
              "ruleToc":{"chapterList":"$.data.chapters","chapterName":"$.title","chapterUrl":"$.id@js:'/c/' + result"}
            }"#,
        )
        .unwrap();
        let toc = &records[0].toc_rule;
        assert!(records[0].search.is_script());
        assert_eq!(
            toc.chapter_list.as_ref().unwrap().selector,
            CanonicalSelector::JsonPath("$.data.chapters".into())
        );
        assert!(matches!(
            &toc.chapter_url.as_ref().unwrap().selector,
            CanonicalSelector::Compound { tail, .. } if tail == "'/c/' + result"
        ));
    }

    #[test]
    fn test_byte_order_mark() {
        let json = "\u{feff}[]";
        let (records, summary) = decode_sources(json).unwrap();
        assert!(records.is_empty());
        assert_eq!(summary, DecodeSummary::default());
    }
}
