//! String encoding of context data for transports.
//!
//! Only text entries with [`DataScope::AcrossTransports`] are encoded. The
//! format is a list of sections joined by `||`. Each section starts with a
//! one-character tag (`d` downstream, `u` upstream, `b` bidirectional)
//! followed by `|key:value` pairs. A pair whose key or value contains `|` or
//! `:` is written as `|:base64(key):base64(value)`.
//!
//! ```text
//! d|tenant:acme|region:eu||b|:a2V5OjE=:dmFsdWU=
//! ```

use crate::context::{ContextData, DataScope, DispatchContext};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

const SECTION_SEPARATOR: &str = "||";
const ENTRY_SEPARATOR: char = '|';
const KEY_VALUE_SEPARATOR: char = ':';

/// Encoded context data could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid formatted context data: {reason}")]
pub struct ContextDataFormatError {
    reason: String,
}

impl ContextDataFormatError {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Returns what was wrong with the input.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl DispatchContext {
    /// Encodes downstream and bidirectional data that crosses transports.
    ///
    /// Returns `None` when there is nothing to encode.
    #[must_use]
    pub fn encode_downstream(&self) -> Option<String> {
        let mut out = String::new();
        encode_section(self.downstream_data(), 'd', &mut out);
        encode_section(self.data(), 'b', &mut out);
        (!out.is_empty()).then_some(out)
    }

    /// Encodes upstream and bidirectional data that crosses transports.
    ///
    /// Returns `None` when there is nothing to encode.
    #[must_use]
    pub fn encode_upstream(&self) -> Option<String> {
        let mut out = String::new();
        encode_section(self.upstream_data(), 'u', &mut out);
        encode_section(self.data(), 'b', &mut out);
        (!out.is_empty()).then_some(out)
    }

    /// Decodes encoded context data into the matching bags.
    ///
    /// Decoded entries are stored with [`DataScope::AcrossTransports`].
    /// Entries decoded before an error was detected stay in the context.
    pub fn decode_context_data<I, S>(&self, values: I) -> Result<(), ContextDataFormatError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for value in values {
            self.decode_one(value.as_ref())?;
        }
        Ok(())
    }

    fn decode_one(&self, encoded: &str) -> Result<(), ContextDataFormatError> {
        if encoded.is_empty() {
            return Ok(());
        }

        for section in encoded.split(SECTION_SEPARATOR) {
            let mut entries = section.split(ENTRY_SEPARATOR);
            let tag = entries.next().unwrap_or_default();
            let target = match tag {
                "d" => self.downstream_data(),
                "u" => self.upstream_data(),
                "b" => self.data(),
                other => {
                    return Err(ContextDataFormatError::new(format!(
                        "unknown context data type tag '{other}'"
                    )))
                }
            };

            let mut decoded = 0usize;
            for entry in entries {
                let (key, value) = decode_entry(entry)?;
                target.set_with_scope(key, value, DataScope::AcrossTransports);
                decoded += 1;
            }
            tracing::trace!(tag, entries = decoded, "decoded context data section");
        }

        Ok(())
    }
}

fn encode_section(data: &ContextData, tag: char, out: &mut String) {
    let mut wrote_tag = false;

    for (key, entry) in data.entries() {
        if entry.scope != DataScope::AcrossTransports {
            continue;
        }
        let Some(value) = entry.value.as_text() else {
            continue;
        };

        if !wrote_tag {
            if !out.is_empty() {
                out.push_str(SECTION_SEPARATOR);
            }
            out.push(tag);
            wrote_tag = true;
        }

        out.push(ENTRY_SEPARATOR);
        if needs_base64(&key) || needs_base64(value) {
            out.push(KEY_VALUE_SEPARATOR);
            out.push_str(&STANDARD.encode(key.as_bytes()));
            out.push(KEY_VALUE_SEPARATOR);
            out.push_str(&STANDARD.encode(value.as_bytes()));
        } else {
            out.push_str(&key);
            out.push(KEY_VALUE_SEPARATOR);
            out.push_str(value);
        }
    }
}

// An empty key would make a plain pair start with ':' and read back as base64.
fn needs_base64(text: &str) -> bool {
    text.is_empty() || text.contains(ENTRY_SEPARATOR) || text.contains(KEY_VALUE_SEPARATOR)
}

fn decode_entry(entry: &str) -> Result<(String, String), ContextDataFormatError> {
    if let Some(encoded) = entry.strip_prefix(KEY_VALUE_SEPARATOR) {
        let (key, value) = encoded
            .split_once(KEY_VALUE_SEPARATOR)
            .ok_or_else(|| ContextDataFormatError::new(format!("malformed entry '{entry}'")))?;
        return Ok((decode_base64(key)?, decode_base64(value)?));
    }

    let (key, value) = entry
        .split_once(KEY_VALUE_SEPARATOR)
        .ok_or_else(|| ContextDataFormatError::new(format!("malformed entry '{entry}'")))?;
    Ok((key.to_owned(), value.to_owned()))
}

fn decode_base64(text: &str) -> Result<String, ContextDataFormatError> {
    let bytes = STANDARD
        .decode(text)
        .map_err(|e| ContextDataFormatError::new(format!("invalid base64 '{text}': {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| ContextDataFormatError::new(format!("invalid utf-8 in '{text}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_skips_in_process_and_objects() {
        let ctx = DispatchContext::new();
        ctx.downstream_data().set("local", "x");
        ctx.downstream_data().set_object("object", 5_u8);
        assert_eq!(ctx.encode_downstream(), None);

        ctx.downstream_data()
            .set_with_scope("tenant", "acme", DataScope::AcrossTransports);
        assert_eq!(ctx.encode_downstream().as_deref(), Some("d|tenant:acme"));
    }

    #[test]
    fn test_encode_sections_by_direction() {
        let ctx = DispatchContext::new();
        ctx.downstream_data()
            .set_with_scope("a", "1", DataScope::AcrossTransports);
        ctx.upstream_data()
            .set_with_scope("b", "2", DataScope::AcrossTransports);
        ctx.data().set_with_scope("c", "3", DataScope::AcrossTransports);

        assert_eq!(ctx.encode_downstream().as_deref(), Some("d|a:1||b|c:3"));
        assert_eq!(ctx.encode_upstream().as_deref(), Some("u|b:2||b|c:3"));
    }

    #[test]
    fn test_delimiters_are_base64_encoded() {
        let ctx = DispatchContext::new();
        ctx.data()
            .set_with_scope("key:1", "a|b", DataScope::AcrossTransports);
        ctx.data().set_with_scope("", "v", DataScope::AcrossTransports);
        let encoded = ctx.encode_downstream().unwrap_or_default();
        assert!(encoded.starts_with("b|:"));

        let target = DispatchContext::new();
        target.decode_context_data([encoded]).unwrap();
        assert_eq!(target.data().get_text("key:1").as_deref(), Some("a|b"));
        assert_eq!(target.data().get_text("").as_deref(), Some("v"));
        assert_eq!(
            target.data().get("key:1").map(|e| e.scope),
            Some(DataScope::AcrossTransports)
        );
    }

    #[test]
    fn test_decode_multiple_values() {
        let ctx = DispatchContext::new();
        ctx.decode_context_data(["d|x:1", "u|y:2||b|z:", ""]).unwrap();
        assert_eq!(ctx.downstream_data().get_text("x").as_deref(), Some("1"));
        assert_eq!(ctx.upstream_data().get_text("y").as_deref(), Some("2"));
        assert_eq!(ctx.data().get_text("z").as_deref(), Some(""));
    }

    #[test]
    fn test_decode_rejects_malformed_input() {
        let ctx = DispatchContext::new();
        let err = ctx.decode_context_data(["x|a:1"]).unwrap_err();
        assert!(err.reason().contains("unknown context data type tag"));

        assert!(ctx.decode_context_data(["d|novalue"]).is_err());
        assert!(ctx.decode_context_data(["d|:!!!:???"]).is_err());
        assert!(err.to_string().starts_with("invalid formatted context data"));
    }
}
