//! Tokenizing logical lines into `KEY[;PARAMS]` → value fields.

use std::collections::HashMap;

use crate::dates::DateFormat;

/// One `key:value` line from inside a record block. The key keeps any
/// `;PARAM=...` suffix verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawField {
    pub key: String,
    pub value: String,
}

/// Split on the first `:`. Lines without one are not fields.
pub fn split_field(line: &str) -> Option<RawField> {
    let (key, value) = line.split_once(':')?;
    Some(RawField {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// A date-bearing field resolved from a block, with the format its key implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateField {
    pub raw: String,
    pub hint: Option<DateFormat>,
    pub tzid: Option<String>,
}

/// Scratch map for the block currently being read. Later duplicates win.
#[derive(Debug, Default)]
pub struct FieldMap {
    fields: HashMap<String, String>,
}

impl FieldMap {
    pub fn clear(&mut self) {
        self.fields.clear();
    }

    pub fn insert(&mut self, field: RawField) {
        self.fields.insert(field.key, field.value);
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Value for `name`, with or without parameters (`SUMMARY`, `SUMMARY;LANGUAGE=en`).
    pub fn text(&self, name: &str) -> Option<&str> {
        if let Some(value) = self.fields.get(name) {
            return Some(value.as_str());
        }
        self.fields
            .iter()
            .filter(|(key, _)| params_of(key, name).is_some())
            .min_by(|a, b| a.0.cmp(b.0))
            .map(|(_, value)| value.as_str())
    }

    /// Resolve `DTSTART`/`DTEND`: the `VALUE=DATE` variant first, then a
    /// `TZID=` variant, then the bare key, then any other parameterised variant.
    pub fn date(&self, name: &str) -> Option<DateField> {
        if let Some(value) = self.find_param(name, |p| p == "VALUE=DATE") {
            return Some(DateField {
                raw: value.to_string(),
                hint: Some(DateFormat::DateOnly),
                tzid: None,
            });
        }
        let zoned = self
            .fields
            .iter()
            .filter_map(|(key, value)| {
                let tzid = params_of(key, name)?.find_map(|p| p.strip_prefix("TZID="))?;
                Some((key, value, tzid))
            })
            .min_by(|a, b| a.0.cmp(b.0));
        if let Some((_, value, tzid)) = zoned {
            return Some(DateField {
                raw: value.clone(),
                hint: Some(DateFormat::LocalDateTime),
                tzid: Some(tzid.to_string()),
            });
        }
        let value = match self.fields.get(name) {
            Some(value) => value.as_str(),
            None => self.find_param(name, |_| true)?,
        };
        Some(DateField {
            raw: value.to_string(),
            hint: None,
            tzid: None,
        })
    }

    /// The lexically smallest `name;...` key with a parameter matching `pred`.
    fn find_param(&self, name: &str, pred: impl Fn(&str) -> bool) -> Option<&str> {
        self.fields
            .iter()
            .filter(|(key, _)| params_of(key, name).is_some_and(|mut params| params.any(&pred)))
            .min_by(|a, b| a.0.cmp(b.0))
            .map(|(_, value)| value.as_str())
    }
}

/// Parameters of `key` if it is `name;...`.
fn params_of<'a>(key: &'a str, name: &str) -> Option<impl Iterator<Item = &'a str>> {
    let rest = key.strip_prefix(name)?.strip_prefix(';')?;
    Some(rest.split(';'))
}

/// Decode a TEXT value for display: iCalendar backslash escapes, then HTML entities.
pub fn decode_text(raw: &str) -> String {
    decode_html_entities(&unescape_ical(raw))
}

fn unescape_ical(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('n' | 'N') => {
                out.push('\n');
                chars.next();
            }
            Some(next @ (',' | ';' | '\\')) => {
                out.push(next);
                chars.next();
            }
            _ => out.push('\\'),
        }
    }
    out
}

fn decode_html_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        match tail[1..].find(';').filter(|&end| end <= 10) {
            Some(end) => match decode_entity(&tail[1..=end]) {
                Some(decoded) => {
                    out.push(decoded);
                    rest = &tail[end + 2..];
                }
                None => {
                    out.push('&');
                    rest = &tail[1..];
                }
            },
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let numeric = entity.strip_prefix('#')?;
            let code = match numeric.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => numeric.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}
