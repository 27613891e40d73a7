//! The pair-list wire format.
//!
//! ```text
//! key=value[;type=<id>][,key=value[;type=<id>]]...
//! ```
//!
//! Keys and values are percent-encoded. String values carry no `type`
//! attribute; the other scalar types carry their single-character tag from
//! [`ValueType`].

use crate::context::{ContextValue, DataMap, ValueType};
use crate::errors::CodecDecodeWarning;

const PAIR_SEPARATOR: char = ',';
const ATTRIBUTE_SEPARATOR: char = ';';
const KEY_VALUE_SEPARATOR: char = '=';
const TYPE_ATTRIBUTE: &str = "type";

/// Encodes pairs into one header value.
///
/// Objects are skipped. Returns `None` when no pair is eligible. Pairs are
/// written in key order.
pub fn encode_pairs<'a, I>(pairs: I) -> Option<String>
where
    I: IntoIterator<Item = (&'a String, &'a ContextValue)>,
{
    let mut eligible: Vec<(&String, &ContextValue)> = pairs
        .into_iter()
        .filter(|(_, value)| value.is_scalar())
        .collect();
    if eligible.is_empty() {
        return None;
    }
    eligible.sort_by(|a, b| a.0.cmp(b.0));

    let mut header = String::new();
    for (key, value) in eligible {
        let Some(raw) = value.to_wire_string() else {
            continue;
        };
        if !header.is_empty() {
            header.push(PAIR_SEPARATOR);
        }
        header.push_str(&urlencoding::encode(key));
        header.push(KEY_VALUE_SEPARATOR);
        header.push_str(&urlencoding::encode(&raw));
        if let Some(value_type) = value.value_type() {
            header.push(ATTRIBUTE_SEPARATOR);
            header.push_str(TYPE_ATTRIBUTE);
            header.push(KEY_VALUE_SEPARATOR);
            header.push(value_type.id());
        }
    }
    Some(header)
}

/// Decodes a header value.
///
/// Malformed or unparsable pairs are dropped and reported as warnings;
/// the remaining pairs are still decoded.
pub fn decode_pairs(header: &str) -> (DataMap, Vec<CodecDecodeWarning>) {
    let mut data = DataMap::new();
    let mut warnings = Vec::new();

    for segment in header.split(PAIR_SEPARATOR).map(str::trim) {
        if segment.is_empty() {
            continue;
        }
        match decode_segment(segment) {
            Ok((key, value)) => {
                data.insert(key, value);
            }
            Err(reason) => warnings.push(CodecDecodeWarning::new(segment, reason)),
        }
    }

    (data, warnings)
}

fn decode_segment(segment: &str) -> Result<(String, ContextValue), String> {
    let mut parts = segment.split(ATTRIBUTE_SEPARATOR).map(str::trim);
    let pair = parts.next().unwrap_or_default();

    let (raw_key, raw_value) = split_key_value(pair)
        .ok_or_else(|| format!("expected exactly one '{KEY_VALUE_SEPARATOR}' in '{pair}'"))?;
    let key = percent_decode(raw_key)?;
    let value = percent_decode(raw_value)?;

    let value_type = parts
        .filter_map(split_key_value)
        .find(|(name, _)| *name == TYPE_ATTRIBUTE)
        .and_then(|(_, id)| ValueType::from_id(id));

    let value = match value_type {
        Some(value_type) => value_type.parse(&value)?,
        None => ContextValue::String(value),
    };
    Ok((key, value))
}

fn split_key_value(part: &str) -> Option<(&str, &str)> {
    let mut pieces = part.split(KEY_VALUE_SEPARATOR).map(str::trim);
    match (pieces.next(), pieces.next(), pieces.next()) {
        (Some(key), Some(value), None) => Some((key, value)),
        _ => None,
    }
}

fn percent_decode(raw: &str) -> Result<String, String> {
    // Form-style encoders write spaces as '+'; a literal '+' is always %2B.
    urlencoding::decode(&raw.replace('+', " "))
        .map(std::borrow::Cow::into_owned)
        .map_err(|e| format!("invalid percent-encoding: {e}"))
}
