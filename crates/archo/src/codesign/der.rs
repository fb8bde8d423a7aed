//! DER encoding of plist entitlements (special slot -7).
//!
//! Apple stores entitlements a second time in a compact DER form:
//!
//! ```text
//! [APPLICATION 16] {
//!     INTEGER 1,
//!     [CONTEXT 16] {                 -- dictionary
//!         SEQUENCE { UTF8String key, value },
//!         ...                        -- sorted by key bytes
//!     }
//! }
//! ```
//!
//! Values map as BOOLEAN, INTEGER, UTF8String, SEQUENCE (array) and nested
//! `[CONTEXT 16]` dictionaries. Data, dates and reals have no encoding.

use crate::{Error, Result};
use plist::{Dictionary, Value};

const DER_TAG_BOOLEAN: u8 = 0x01;
const DER_TAG_INTEGER: u8 = 0x02;
const DER_TAG_UTF8STRING: u8 = 0x0c;
const DER_TAG_SEQUENCE: u8 = 0x30;

/// `[APPLICATION 16]`, constructed
const DER_TAG_ENTITLEMENTS: u8 = 0x70;

/// `[CONTEXT 16]`, constructed
const DER_TAG_DICTIONARY: u8 = 0xb0;

const ENTITLEMENTS_DER_VERSION: i64 = 1;

/// Encode a length value in DER format.
///
/// For lengths < 128, uses short form (1 byte).
/// For lengths >= 128, uses long form (1 + n bytes).
fn encode_length(output: &mut Vec<u8>, length: usize) {
    if length < 128 {
        output.push(length as u8);
        return;
    }
    let bytes = length.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    output.push(0x80 | (bytes.len() - skip) as u8);
    output.extend(&bytes[skip..]);
}

fn encode_tlv(output: &mut Vec<u8>, tag: u8, content: &[u8]) {
    output.push(tag);
    encode_length(output, content.len());
    output.extend(content);
}

/// Minimal two's-complement big-endian encoding.
fn encode_integer(output: &mut Vec<u8>, value: i64) {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    encode_tlv(output, DER_TAG_INTEGER, &bytes[start..]);
}

fn encode_dictionary(output: &mut Vec<u8>, dict: &Dictionary) -> Result<()> {
    let mut entries: Vec<(&String, &Value)> = dict.iter().collect();
    entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    let mut content = Vec::new();
    for (key, value) in entries {
        let mut pair = Vec::new();
        encode_tlv(&mut pair, DER_TAG_UTF8STRING, key.as_bytes());
        encode_value(&mut pair, value)
            .map_err(|e| Error::Format(format!("entitlement {key}: {e}")))?;
        encode_tlv(&mut content, DER_TAG_SEQUENCE, &pair);
    }
    encode_tlv(output, DER_TAG_DICTIONARY, &content);
    Ok(())
}

fn encode_value(output: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Boolean(b) => encode_tlv(output, DER_TAG_BOOLEAN, &[if *b { 0xff } else { 0x00 }]),
        Value::Integer(i) => {
            let value = i
                .as_signed()
                .ok_or_else(|| Error::Format(format!("integer {i:?} out of range")))?;
            encode_integer(output, value);
        }
        Value::String(s) => encode_tlv(output, DER_TAG_UTF8STRING, s.as_bytes()),
        Value::Array(items) => {
            let mut content = Vec::new();
            for item in items {
                encode_value(&mut content, item)?;
            }
            encode_tlv(output, DER_TAG_SEQUENCE, &content);
        }
        Value::Dictionary(dict) => encode_dictionary(output, dict)?,
        other => {
            return Err(Error::Format(format!(
                "unsupported value type in DER entitlements: {other:?}"
            )))
        }
    }
    Ok(())
}

/// Converts an XML (or binary) plist entitlements dictionary to DER.
///
/// # Errors
///
/// [`Error::Plist`] if the input does not parse, [`Error::Format`] if the
/// root is not a dictionary or a value has no DER form.
pub fn plist_to_der(plist_data: &[u8]) -> Result<Vec<u8>> {
    let value: Value = plist::from_bytes(plist_data)?;
    let dict = value
        .as_dictionary()
        .ok_or_else(|| Error::Format("entitlements root is not a dictionary".into()))?;

    let mut content = Vec::new();
    encode_integer(&mut content, ENTITLEMENTS_DER_VERSION);
    encode_dictionary(&mut content, dict)?;

    let mut output = Vec::with_capacity(content.len() + 4);
    encode_tlv(&mut output, DER_TAG_ENTITLEMENTS, &content);
    Ok(output)
}
