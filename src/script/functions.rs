//! Pure helpers behind the `java.*` host functions
//!
//! Kept free of the script runtime so they can be tested directly.

use std::borrow::Cow;
use std::sync::OnceLock;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use chrono::{Local, TimeZone};
use md5::{Digest, Md5};
use percent_encoding::{percent_decode_str, percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;

/// Everything except `A–Z a–z 0–9 - _ . ~` is escaped.
const URI_UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Timestamps above this are milliseconds.
const MILLIS_THRESHOLD: i64 = 9_999_999_999;

const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Lowercase 32-hex MD5
pub fn md5_hex(text: &str) -> String {
    format!("{:x}", Md5::digest(text.as_bytes()))
}

/// Middle 16 hex chars of the MD5 (offset 8)
pub fn md5_hex16(text: &str) -> String {
    md5_hex(text)[8..24].to_string()
}

pub fn base64_encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Lenient decoder: non-alphabet characters are skipped, padding is optional
/// and a dangling final character is dropped.
pub fn base64_decode(text: &str) -> Vec<u8> {
    const LENIENT: GeneralPurpose = GeneralPurpose::new(
        &alphabet::STANDARD,
        GeneralPurposeConfig::new()
            .with_decode_padding_mode(DecodePaddingMode::Indifferent)
            .with_decode_allow_trailing_bits(true),
    );

    let mut cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '+' || *c == '/')
        .collect();
    if cleaned.len() % 4 == 1 {
        cleaned.pop();
    }
    LENIENT.decode(cleaned.as_bytes()).unwrap_or_default()
}

/// Percent-encode already charset-converted bytes with uppercase hex.
pub fn encode_uri(bytes: &[u8]) -> String {
    percent_encode(bytes, URI_UNRESERVED).to_string()
}

/// Inverse of `encode_uri`; `+` is a space.
pub fn decode_uri(text: &str) -> Vec<u8> {
    let spaced = text.replace('+', " ");
    percent_decode_str(&spaced).collect()
}

/// Format a unix timestamp (seconds or milliseconds) in local time.
///
/// `pattern` is a Java `SimpleDateFormat`-style pattern (`yyyy-MM-dd`).
pub fn time_format(timestamp: i64, pattern: Option<&str>) -> String {
    let seconds = if timestamp > MILLIS_THRESHOLD {
        timestamp / 1000
    } else {
        timestamp
    };

    let format = match pattern.map(str::trim).filter(|p| !p.is_empty()) {
        Some(pattern) => java_pattern_to_strftime(pattern),
        None => DEFAULT_TIME_FORMAT.to_string(),
    };

    match Local.timestamp_opt(seconds, 0).single() {
        Some(time) => time.format(&format).to_string(),
        None => String::new(),
    }
}

fn java_pattern_to_strftime(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            // quoted literal
            i += 1;
            while i < chars.len() && chars[i] != '\'' {
                push_literal(&mut out, chars[i]);
                i += 1;
            }
            i += 1;
            continue;
        }

        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }
        let spec = match (c, run) {
            ('y', 2) => Some("%y"),
            ('y', _) => Some("%Y"),
            ('M', 1) => Some("%-m"),
            ('M', 2) => Some("%m"),
            ('M', 3) => Some("%b"),
            ('M', _) => Some("%B"),
            ('d', 1) => Some("%-d"),
            ('d', _) => Some("%d"),
            ('H', 1) => Some("%-H"),
            ('H', _) => Some("%H"),
            ('h', _) => Some("%I"),
            ('m', _) => Some("%M"),
            ('s', _) => Some("%S"),
            ('S', _) => Some("%3f"),
            ('a', _) => Some("%p"),
            ('E', _) => Some("%a"),
            _ => None,
        };
        match spec {
            Some(spec) => out.push_str(spec),
            None => (0..run).for_each(|_| push_literal(&mut out, c)),
        }
        i += run;
    }
    out
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}

fn br_pattern() -> Option<&'static Regex> {
    static BR: OnceLock<Option<Regex>> = OnceLock::new();
    BR.get_or_init(|| Regex::new(r"(?i)<br\s*/?>").ok()).as_ref()
}

/// Decode HTML entities and turn `<br>` variants into newlines.
pub fn html_format(text: &str) -> String {
    let text = match br_pattern() {
        Some(br) => br.replace_all(text, "\n"),
        None => Cow::Borrowed(text),
    };

    let mut out = String::with_capacity(text.len());
    let mut rest: &str = &text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let candidate = &rest[amp..];
        match decode_entity(candidate) {
            Some((decoded, consumed)) => {
                out.push(decoded);
                rest = &candidate[consumed..];
            }
            None => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Decode one entity at the start of `text`, returning the char and the
/// number of bytes consumed.
fn decode_entity(text: &str) -> Option<(char, usize)> {
    let semi = text.get(..12).unwrap_or(text).find(';')?;
    let name = &text[1..semi];

    let decoded = match name {
        "nbsp" => ' ',
        "lt" => '<',
        "gt" => '>',
        "amp" => '&',
        "quot" => '"',
        "apos" => '\'',
        _ => {
            let digits = name.strip_prefix('#')?;
            let code = match digits.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => digits.parse::<u32>().ok()?,
            };
            char::from_u32(code)?
        }
    };
    Some((decoded, semi + 1))
}
