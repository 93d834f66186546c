//! OID-driven decoding of text-format column values.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::error::{ProtocolError, Result};
use crate::protocol::backend::ColumnDescription;
use crate::protocol::types::{oid, FormatCode, Oid};

use super::array::parse_array;
use super::{
    Circle, Date, Line, LineSegment, Path, Point, Polygon, Rectangle, Tid, Timestamp, Value,
};

/// How column values are materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeStrategy {
    /// Decode by type OID using the default decoder set
    #[default]
    Auto,
    /// Return every value as its raw text
    String,
}

/// A custom decoder: receives the raw column bytes and the column's type
/// OID. Installing one for an OID also makes binary-format columns of that
/// OID decodable.
pub type DecoderFn = Arc<dyn Fn(&[u8], Oid) -> Result<Value> + Send + Sync>;

/// Registry of caller-installed decoders, keyed by type OID or by type
/// name. Numeric keys take precedence over name keys.
#[derive(Clone, Default)]
pub struct Decoders {
    by_oid: HashMap<Oid, DecoderFn>,
    by_name: HashMap<String, DecoderFn>,
}

impl Decoders {
    /// Install a decoder for a numeric type OID.
    pub fn insert_oid(&mut self, type_oid: Oid, decoder: DecoderFn) {
        self.by_oid.insert(type_oid, decoder);
    }

    /// Install a decoder for a catalog type name (e.g. `"int4"`, `"_bool"`).
    pub fn insert_name(&mut self, name: impl Into<String>, decoder: DecoderFn) {
        self.by_name.insert(name.into(), decoder);
    }

    fn lookup(&self, type_oid: Oid) -> Option<&DecoderFn> {
        self.by_oid.get(&type_oid).or_else(|| {
            oid::type_name(type_oid).and_then(|name| self.by_name.get(name))
        })
    }
}

impl std::fmt::Debug for Decoders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoders")
            .field("by_oid", &self.by_oid.len())
            .field("by_name", &self.by_name.len())
            .finish()
    }
}

/// Decode one raw column value according to the strategy and registry.
///
/// Custom decoders always win over the strategy. An array OID with no
/// override of its own falls back to the scalar override of its element
/// type, applied per element.
pub fn decode_column(
    raw: Option<&[u8]>,
    column: &ColumnDescription,
    strategy: DecodeStrategy,
    decoders: &Decoders,
) -> Result<Value> {
    let Some(bytes) = raw else {
        return Ok(Value::Null);
    };

    if let Some(custom) = decoders.lookup(column.type_oid) {
        return custom(bytes, column.type_oid);
    }

    if column.format == FormatCode::Binary {
        return Err(ProtocolError::UnsupportedBinaryFormat {
            column: column.name.clone(),
        }
        .into());
    }

    let text = std::str::from_utf8(bytes).map_err(|e| {
        ProtocolError::MalformedFrame(format!(
            "column {:?}: invalid UTF-8 in text value: {e}",
            column.name
        ))
    })?;

    match strategy {
        DecodeStrategy::String => Ok(Value::Text(text.to_string())),
        DecodeStrategy::Auto => {
            if let Some(element) = oid::element_of(column.type_oid) {
                if let Some(custom) = decoders.lookup(element) {
                    let mut decode = |s: &str| custom(s.as_bytes(), element);
                    return parse_array(text, &mut decode, element_separator(element));
                }
            }
            decode_text(column.type_oid, text)
        }
    }
}

/// Box arrays separate elements with `;` because the box text form itself
/// contains commas.
fn element_separator(element: Oid) -> char {
    if element == oid::BOX { ';' } else { ',' }
}

/// Decode a text-format value by its type OID. Unknown OIDs pass through
/// as text.
pub fn decode_text(type_oid: Oid, text: &str) -> Result<Value> {
    if let Some(element) = oid::element_of(type_oid) {
        let mut decode = |s: &str| decode_scalar(element, s);
        return parse_array(text, &mut decode, element_separator(element));
    }
    decode_scalar(type_oid, text)
}

fn malformed(what: &str, text: &str) -> crate::error::Error {
    ProtocolError::MalformedFrame(format!("invalid {what} value: {text:?}")).into()
}

fn decode_scalar(type_oid: Oid, text: &str) -> Result<Value> {
    let value = match type_oid {
        oid::BOOL => Value::Bool(matches!(text, "t" | "true" | "yes" | "on" | "1")),
        oid::INT2 => Value::Int2(text.parse().map_err(|_| malformed("int2", text))?),
        oid::INT4 => Value::Int4(text.parse().map_err(|_| malformed("int4", text))?),
        oid::INT8 => Value::Int8(text.parse().map_err(|_| malformed("int8", text))?),
        oid::OID | oid::XID | oid::CID => {
            Value::Oid(text.parse().map_err(|_| malformed("oid", text))?)
        }
        oid::FLOAT4 => Value::Float4(text.parse().unwrap_or(f32::NAN)),
        oid::FLOAT8 => Value::Float8(text.parse().unwrap_or(f64::NAN)),
        oid::NUMERIC => Value::Numeric(text.to_string()),
        oid::BYTEA => Value::Bytea(decode_bytea(text)?),
        oid::DATE => Value::Date(decode_date(text)?),
        oid::TIMESTAMP | oid::TIMESTAMPTZ => Value::Timestamp(decode_timestamp(text)?),
        oid::JSON | oid::JSONB => {
            Value::Json(serde_json::from_str(text).map_err(|_| malformed("json", text))?)
        }
        oid::POINT => Value::Point(decode_point(text)?),
        oid::LINE => Value::Line(decode_line(text)?),
        oid::LSEG => Value::LineSegment(decode_lseg(text)?),
        oid::BOX => Value::Rectangle(decode_box(text)?),
        oid::CIRCLE => Value::Circle(decode_circle(text)?),
        oid::PATH => Value::Path(decode_path(text)?),
        oid::POLYGON => Value::Polygon(Polygon {
            points: decode_point_list(text)?,
        }),
        oid::TID => Value::Tid(decode_tid(text)?),
        // text families and types without a richer default representation
        _ => Value::Text(text.to_string()),
    };
    Ok(value)
}

fn decode_bytea(text: &str) -> Result<Vec<u8>> {
    if let Some(hex) = text.strip_prefix("\\x") {
        if hex.len() % 2 != 0 {
            return Err(malformed("bytea", text));
        }
        let mut bytes = Vec::with_capacity(hex.len() / 2);
        for i in (0..hex.len()).step_by(2) {
            let pair = hex.get(i..i + 2).ok_or_else(|| malformed("bytea", text))?;
            bytes.push(u8::from_str_radix(pair, 16).map_err(|_| malformed("bytea", text))?);
        }
        Ok(bytes)
    } else {
        // Legacy escape format: printable bytes as-is, \\ for backslash,
        // \nnn octal for everything else.
        let mut bytes = Vec::with_capacity(text.len());
        let raw = text.as_bytes();
        let mut i = 0;
        while i < raw.len() {
            if raw[i] == b'\\' {
                if raw.get(i + 1) == Some(&b'\\') {
                    bytes.push(b'\\');
                    i += 2;
                } else {
                    let octal = raw
                        .get(i + 1..i + 4)
                        .and_then(|digits| std::str::from_utf8(digits).ok())
                        .ok_or_else(|| malformed("bytea", text))?;
                    bytes.push(
                        u8::from_str_radix(octal, 8).map_err(|_| malformed("bytea", text))?,
                    );
                    i += 4;
                }
            } else {
                bytes.push(raw[i]);
                i += 1;
            }
        }
        Ok(bytes)
    }
}

fn decode_date(text: &str) -> Result<Date> {
    match text {
        "infinity" | "Infinity" => Ok(Date::PosInfinity),
        "-infinity" | "-Infinity" => Ok(Date::NegInfinity),
        _ => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map(Date::Value)
            .map_err(|_| malformed("date", text)),
    }
}

fn decode_timestamp(text: &str) -> Result<Timestamp> {
    match text {
        "infinity" | "Infinity" => return Ok(Timestamp::PosInfinity),
        "-infinity" | "-Infinity" => return Ok(Timestamp::NegInfinity),
        _ => {}
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(parsed) = DateTime::parse_from_str(text, format) {
            return Ok(Timestamp::Value(parsed));
        }
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(Timestamp::Value(parsed.and_utc().fixed_offset()));
        }
    }
    Err(malformed("timestamp", text))
}

fn parse_f64(text: &str) -> Result<f64> {
    text.trim().parse().map_err(|_| malformed("float", text))
}

fn decode_point(text: &str) -> Result<Point> {
    let inner = text
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(|| malformed("point", text))?;
    decode_point_inner(inner).map_err(|_| malformed("point", text))
}

fn decode_point_inner(inner: &str) -> Result<Point> {
    let (x, y) = inner
        .split_once(',')
        .ok_or_else(|| malformed("point", inner))?;
    Ok(Point {
        x: parse_f64(x)?,
        y: parse_f64(y)?,
    })
}

fn decode_point_list(text: &str) -> Result<Vec<Point>> {
    let mut points = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find('(') {
        let close = rest[open..]
            .find(')')
            .ok_or_else(|| malformed("point list", text))?
            + open;
        points.push(decode_point_inner(&rest[open + 1..close])?);
        rest = &rest[close + 1..];
    }
    if points.is_empty() {
        return Err(malformed("point list", text));
    }
    Ok(points)
}

fn decode_line(text: &str) -> Result<Line> {
    let inner = text
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .ok_or_else(|| malformed("line", text))?;
    let mut parts = inner.split(',');
    let (a, b, c) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(a), Some(b), Some(c), None) => (a, b, c),
        _ => return Err(malformed("line", text)),
    };
    Ok(Line {
        a: parse_f64(a)?,
        b: parse_f64(b)?,
        c: parse_f64(c)?,
    })
}

fn decode_lseg(text: &str) -> Result<LineSegment> {
    let points = decode_point_list(text)?;
    match points.as_slice() {
        [a, b] => Ok(LineSegment { a: *a, b: *b }),
        _ => Err(malformed("lseg", text)),
    }
}

fn decode_box(text: &str) -> Result<Rectangle> {
    let points = decode_point_list(text)?;
    match points.as_slice() {
        [a, b] => Ok(Rectangle { a: *a, b: *b }),
        _ => Err(malformed("box", text)),
    }
}

fn decode_circle(text: &str) -> Result<Circle> {
    let inner = text
        .strip_prefix('<')
        .and_then(|t| t.strip_suffix('>'))
        .ok_or_else(|| malformed("circle", text))?;
    let close = inner.rfind(')').ok_or_else(|| malformed("circle", text))?;
    let center = decode_point(&inner[..=close])?;
    let radius = inner[close + 1..]
        .strip_prefix(',')
        .ok_or_else(|| malformed("circle", text))?;
    Ok(Circle {
        center,
        radius: parse_f64(radius)?,
    })
}

fn decode_path(text: &str) -> Result<Path> {
    let closed = text.starts_with('(');
    Ok(Path {
        points: decode_point_list(text)?,
        closed,
    })
}

fn decode_tid(text: &str) -> Result<Tid> {
    let inner = text
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(|| malformed("tid", text))?;
    let (block, offset) = inner.split_once(',').ok_or_else(|| malformed("tid", text))?;
    Ok(Tid {
        block: block.parse().map_err(|_| malformed("tid", text))?,
        offset: offset.parse().map_err(|_| malformed("tid", text))?,
    })
}
