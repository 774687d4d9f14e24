//! Line-protocol ingestion
//!
//! Inbound pushed records arrive as line-protocol text:
//!
//! ```text
//! measurement[,tag=value...] field=value[,field=value...] [timestamp]
//! ```
//!
//! The first whitespace-delimited token (stripped of tags) is the stream
//! name used as the dispatch key. [`decode`] converts one line into a
//! [`Record`]: tags and fields land in the metadata map, integer fields use
//! the `NNNi` suffix form, and the trailing timestamp is kept under
//! `influx_ts`.

use edgeflow_core::{Metadata, Record, Value};

/// Metadata key holding the trailing line-protocol timestamp.
pub const TIMESTAMP_KEY: &str = "influx_ts";

/// Line decoding errors. Malformed lines are logged and dropped by the
/// caller; they never reach the dispatcher.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum LineFormatError {
    #[error("empty line")]
    Empty,

    #[error("line has no field set")]
    MissingFields,

    #[error("malformed key-value pair: '{0}'")]
    BadPair(String),
}

/// Extracts the stream/measurement name: the first whitespace-delimited
/// token, stripped of `,tag=value` suffixes.
pub fn stream_name(line: &str) -> Option<&str> {
    let first = line.split_whitespace().next()?;
    let name = first.split(',').next().unwrap_or(first);
    (!name.is_empty()).then_some(name)
}

/// Decodes one line-protocol line into a record whose topic is the
/// measurement name.
pub fn decode(line: &str) -> Result<Record, LineFormatError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(LineFormatError::Empty);
    }

    let (head, rest) = line
        .split_once(char::is_whitespace)
        .ok_or(LineFormatError::MissingFields)?;
    let rest = rest.trim();
    if rest.is_empty() {
        return Err(LineFormatError::MissingFields);
    }

    // A trailing integer token is the timestamp.
    let (fields_part, timestamp) = match rest.rsplit_once(char::is_whitespace) {
        Some((fields, last)) => match last.parse::<i64>() {
            Ok(ts) => (fields.trim_end(), Some(ts)),
            Err(_) => (rest, None),
        },
        None => (rest, None),
    };

    let mut tags_iter = head.split(',');
    let measurement = tags_iter.next().ok_or(LineFormatError::Empty)?;
    if measurement.is_empty() {
        return Err(LineFormatError::Empty);
    }

    let mut metadata = Metadata::default();
    for tag in tags_iter {
        let (key, value) = tag
            .split_once('=')
            .ok_or_else(|| LineFormatError::BadPair(tag.to_string()))?;
        metadata.insert(key.to_string(), Value::Str(value.to_string()));
    }

    for pair in split_pairs(fields_part) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| LineFormatError::BadPair(pair.to_string()))?;
        metadata.insert(key.to_string(), parse_field_value(value));
    }

    if let Some(ts) = timestamp {
        metadata.insert(TIMESTAMP_KEY.to_string(), Value::Int(ts));
    }

    Ok(Record::from_metadata(measurement, metadata))
}

/// Splits the field set on commas, honoring double-quoted string values
/// which may contain commas and spaces.
fn split_pairs(fields: &str) -> Vec<&str> {
    let mut pairs = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    for (i, c) in fields.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                pairs.push(&fields[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    pairs.push(&fields[start..]);
    pairs
}

fn parse_field_value(raw: &str) -> Value {
    let raw = raw.trim();
    if let Some(stripped) = raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return Value::Str(stripped.to_string());
    }
    if let Some(int_part) = raw.strip_suffix('i') {
        if let Ok(n) = int_part.parse::<i64>() {
            return Value::Int(n);
        }
    }
    match raw {
        "t" | "T" | "true" | "True" | "TRUE" => return Value::Bool(true),
        "f" | "F" | "false" | "False" | "FALSE" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = raw.parse::<f64>() {
        return Value::Float(n);
    }
    Value::Str(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_name_strips_tags() {
        assert_eq!(
            stream_name("classifier_results,cam_sn=B1 idx=3i 1588791183"),
            Some("classifier_results")
        );
        assert_eq!(stream_name("stream1 v=1"), Some("stream1"));
        assert_eq!(stream_name("   "), None);
    }

    #[test]
    fn decodes_tags_fields_and_timestamp() {
        let record =
            decode("classifier_results,cam_sn=B1 ImgHandle=\"abc123\",idx=3i,score=0.92 1588791183")
                .unwrap();

        assert_eq!(record.topic.as_ref(), "classifier_results");
        assert_eq!(record.get_str("cam_sn"), Some("B1"));
        assert_eq!(record.get_str("ImgHandle"), Some("abc123"));
        assert_eq!(record.get_int("idx"), Some(3));
        assert_eq!(record.get_float("score"), Some(0.92));
        assert_eq!(record.get_int(TIMESTAMP_KEY), Some(1588791183));
    }

    #[test]
    fn quoted_values_may_contain_commas_and_spaces() {
        let record = decode("m v=\"a, b and c\",n=2i").unwrap();
        assert_eq!(record.get_str("v"), Some("a, b and c"));
        assert_eq!(record.get_int("n"), Some(2));
    }

    #[test]
    fn booleans_and_bare_strings() {
        let record = decode("m ok=true,state=ready").unwrap();
        assert_eq!(record.get_bool("ok"), Some(true));
        assert_eq!(record.get_str("state"), Some("ready"));
    }

    #[test]
    fn malformed_lines_are_typed_errors() {
        assert_eq!(decode("").unwrap_err(), LineFormatError::Empty);
        assert_eq!(
            decode("measurement_only").unwrap_err(),
            LineFormatError::MissingFields
        );
        assert_eq!(
            decode("m,badtag v=1").unwrap_err(),
            LineFormatError::BadPair("badtag".to_string())
        );
        assert_eq!(
            decode("m notapair").unwrap_err(),
            LineFormatError::BadPair("notapair".to_string())
        );
    }
}
