//! Shared parser for the PostgreSQL array text representation.
//!
//! Handles quoted elements with backslash escapes, `NULL` tokens, nested
//! braces, a configurable element separator (`;` for box arrays), and the
//! optional dimension prefix `[lo:hi]...=`.

use crate::error::{ProtocolError, Result};
use crate::types::Value;

/// Decode one element's text into a [`Value`].
pub type ElementDecoder<'a> = &'a mut dyn FnMut(&str) -> Result<Value>;

/// Parse an array literal, decoding each element with `decode`.
pub fn parse_array(src: &str, decode: ElementDecoder<'_>, separator: char) -> Result<Value> {
    let mut body = src;

    // Optional dimension prefix, e.g. "[1:3][0:1]={...}"
    if body.starts_with('[') {
        match body.find("={") {
            Some(eq) => body = &body[eq + 1..],
            None => {
                return Err(malformed(src, "dimension prefix without body"));
            }
        }
    }

    let bytes = body.as_bytes();
    let mut pos = 0;
    let values = parse_braced(body, bytes, &mut pos, decode, separator)?;
    if pos != bytes.len() {
        return Err(malformed(src, "trailing characters after closing brace"));
    }
    Ok(Value::Array(values))
}

fn malformed(src: &str, reason: &str) -> crate::error::Error {
    ProtocolError::MalformedFrame(format!("invalid array literal {src:?}: {reason}")).into()
}

fn parse_braced(
    src: &str,
    bytes: &[u8],
    pos: &mut usize,
    decode: ElementDecoder<'_>,
    separator: char,
) -> Result<Vec<Value>> {
    if bytes.get(*pos).copied() != Some(b'{') {
        return Err(malformed(src, "expected opening brace"));
    }
    *pos += 1;

    let mut values = Vec::new();
    if bytes.get(*pos).copied() == Some(b'}') {
        *pos += 1;
        return Ok(values);
    }

    loop {
        match bytes.get(*pos).copied() {
            Some(b'{') => {
                let nested = parse_braced(src, bytes, pos, decode, separator)?;
                values.push(Value::Array(nested));
            }
            Some(b'"') => {
                let text = parse_quoted(src, bytes, pos)?;
                values.push(decode(&text)?);
            }
            Some(_) => {
                let token = parse_bare(src, bytes, pos, separator)?;
                if token.eq_ignore_ascii_case("NULL") {
                    values.push(Value::Null);
                } else {
                    values.push(decode(token)?);
                }
            }
            None => return Err(malformed(src, "unterminated array")),
        }

        match bytes.get(*pos).copied() {
            Some(b) if b == separator as u8 => *pos += 1,
            Some(b'}') => {
                *pos += 1;
                return Ok(values);
            }
            _ => return Err(malformed(src, "expected separator or closing brace")),
        }
    }
}

fn parse_quoted(src: &str, bytes: &[u8], pos: &mut usize) -> Result<String> {
    *pos += 1; // opening quote
    let mut text = String::new();
    loop {
        match bytes.get(*pos).copied() {
            Some(b'\\') => {
                let escaped = *bytes
                    .get(*pos + 1)
                    .ok_or_else(|| malformed(src, "dangling backslash"))?;
                text.push(escaped as char);
                *pos += 2;
            }
            Some(b'"') => {
                *pos += 1;
                return Ok(text);
            }
            Some(_) => {
                // advance one UTF-8 character
                let rest = &src[*pos..];
                let ch = rest
                    .chars()
                    .next()
                    .ok_or_else(|| malformed(src, "unterminated quoted element"))?;
                text.push(ch);
                *pos += ch.len_utf8();
            }
            None => return Err(malformed(src, "unterminated quoted element")),
        }
    }
}

fn parse_bare<'a>(
    src: &'a str,
    bytes: &[u8],
    pos: &mut usize,
    separator: char,
) -> Result<&'a str> {
    let start = *pos;
    let mut depth = 0usize;
    loop {
        match bytes.get(*pos).copied() {
            Some(b'(') | Some(b'[') | Some(b'<') => {
                depth += 1;
                *pos += 1;
            }
            Some(b')') | Some(b']') | Some(b'>') => {
                depth = depth.saturating_sub(1);
                *pos += 1;
            }
            Some(b) if depth == 0 && (b == separator as u8 || b == b'}') => break,
            Some(_) => *pos += 1,
            None => return Err(malformed(src, "unterminated element")),
        }
    }
    Ok(&src[start..*pos])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_decoder() -> impl FnMut(&str) -> Result<Value> {
        |s: &str| Ok(Value::Text(s.to_string()))
    }

    fn parse(src: &str) -> Value {
        let mut decode = text_decoder();
        parse_array(src, &mut decode, ',').unwrap()
    }

    #[test]
    fn flat_array() {
        assert_eq!(
            parse("{a,b,c}"),
            Value::Array(vec![
                Value::Text("a".into()),
                Value::Text("b".into()),
                Value::Text("c".into()),
            ])
        );
    }

    #[test]
    fn empty_array() {
        assert_eq!(parse("{}"), Value::Array(vec![]));
    }

    #[test]
    fn null_tokens_are_case_insensitive() {
        assert_eq!(
            parse("{NULL,null,x}"),
            Value::Array(vec![
                Value::Null,
                Value::Null,
                Value::Text("x".into())
            ])
        );
    }

    #[test]
    fn quoted_null_is_a_string() {
        assert_eq!(
            parse(r#"{"NULL"}"#),
            Value::Array(vec![Value::Text("NULL".into())])
        );
    }

    #[test]
    fn quoted_elements_with_escapes() {
        assert_eq!(
            parse(r#"{"a,b","say \"hi\"","back\\slash"}"#),
            Value::Array(vec![
                Value::Text("a,b".into()),
                Value::Text("say \"hi\"".into()),
                Value::Text("back\\slash".into()),
            ])
        );
    }

    #[test]
    fn nested_arrays() {
        assert_eq!(
            parse("{{1,2},{3,4}}"),
            Value::Array(vec![
                Value::Array(vec![Value::Text("1".into()), Value::Text("2".into())]),
                Value::Array(vec![Value::Text("3".into()), Value::Text("4".into())]),
            ])
        );
    }

    #[test]
    fn dimension_prefix_is_consumed() {
        assert_eq!(
            parse("[0:1]={5,6}"),
            Value::Array(vec![Value::Text("5".into()), Value::Text("6".into())])
        );
    }

    #[test]
    fn semicolon_separator_keeps_commas_in_elements() {
        let mut decode = text_decoder();
        let parsed = parse_array("{(1,2),(3,4);(5,6),(7,8)}", &mut decode, ';').unwrap();
        assert_eq!(
            parsed,
            Value::Array(vec![
                Value::Text("(1,2),(3,4)".into()),
                Value::Text("(5,6),(7,8)".into()),
            ])
        );
    }

    #[test]
    fn malformed_inputs_fail() {
        let mut decode = text_decoder();
        assert!(parse_array("{a,b", &mut decode, ',').is_err());
        let mut decode = text_decoder();
        assert!(parse_array("a,b}", &mut decode, ',').is_err());
        let mut decode = text_decoder();
        assert!(parse_array("{a}x", &mut decode, ',').is_err());
    }
}
