//! HTML/XML character reference decoding.
//!
//! Only terminated references (`&name;`, `&#65;`, `&#x41;`) are decoded.
//! Bare ampersands and unknown names are kept verbatim, so query strings
//! such as `?a=1&b=2` pass through untouched.

use lazy_static::lazy_static;
use quick_xml::escape::resolve_html5_entity;
use regex::{Captures, Regex};
use std::borrow::Cow;

lazy_static! {
    static ref ENTITY_REGEX: Regex =
        Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[A-Za-z][A-Za-z0-9]{1,31});").unwrap();
}

fn resolve(reference: &str) -> Option<String> {
    if let Some(numeric) = reference.strip_prefix('#') {
        let hex = numeric
            .strip_prefix('x')
            .or_else(|| numeric.strip_prefix('X'));
        let code = match hex {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse().ok()?,
        };
        // NUL is not a valid character reference
        if code == 0 {
            return None;
        }
        return char::from_u32(code).map(String::from);
    }

    resolve_html5_entity(reference).map(str::to_string)
}

/// Decode one level of character references
pub fn decode_entities(input: &str) -> Cow<'_, str> {
    if !input.contains('&') {
        return Cow::Borrowed(input);
    }

    ENTITY_REGEX.replace_all(input, |caps: &Captures| {
        resolve(&caps[1]).unwrap_or_else(|| caps[0].to_string())
    })
}

/// Decode repeatedly until nothing changes.
///
/// Handles double-encoded text such as `&amp;amp;`. Every decoding step
/// shortens the text by at least one character, so the loop terminates.
pub fn decode_entities_fully(input: &str) -> String {
    let mut current = input.to_string();
    loop {
        let next = match decode_entities(&current) {
            Cow::Borrowed(_) => return current,
            Cow::Owned(decoded) => decoded,
        };
        if next == current {
            return current;
        }
        current = next;
    }
}
