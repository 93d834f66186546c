//! Encoding of query arguments into wire parameter values.

use super::{Date, Timestamp, Value};

/// A query argument ready for the Bind message.
///
/// Byte sequences travel in the binary parameter format; everything else is
/// text. NULL is its own case (length -1 on the wire).
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedArg {
    /// SQL NULL
    Null,
    /// Text-format parameter
    Text(String),
    /// Binary-format parameter (raw bytes)
    Binary(Vec<u8>),
}

/// Encode one argument value.
pub fn encode_argument(value: &Value) -> EncodedArg {
    match value {
        Value::Null => EncodedArg::Null,
        Value::Bytea(bytes) => EncodedArg::Binary(bytes.clone()),
        _ => EncodedArg::Text(encode_text(value)),
    }
}

/// The text form of a value, as PostgreSQL accepts it for input.
pub fn encode_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(v) => if *v { "true" } else { "false" }.to_string(),
        Value::Int2(v) => v.to_string(),
        Value::Int4(v) => v.to_string(),
        Value::Int8(v) => v.to_string(),
        Value::Oid(v) => v.to_string(),
        Value::Float4(v) => encode_float(f64::from(*v)),
        Value::Float8(v) => encode_float(*v),
        Value::Numeric(v) => v.clone(),
        Value::Text(v) => v.clone(),
        Value::Bytea(bytes) => encode_bytea(bytes),
        Value::Date(date) => match date {
            Date::Value(d) => d.format("%Y-%m-%d").to_string(),
            Date::PosInfinity => "infinity".to_string(),
            Date::NegInfinity => "-infinity".to_string(),
        },
        // ISO-8601 with millisecond precision and an explicit ±HH:MM offset
        Value::Timestamp(ts) => match ts {
            Timestamp::Value(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.3f%:z").to_string(),
            Timestamp::PosInfinity => "infinity".to_string(),
            Timestamp::NegInfinity => "-infinity".to_string(),
        },
        Value::Json(json) => json.to_string(),
        Value::Point(p) => encode_point(p),
        Value::Line(l) => format!("{{{},{},{}}}", l.a, l.b, l.c),
        Value::LineSegment(seg) => {
            format!("[{},{}]", encode_point(&seg.a), encode_point(&seg.b))
        }
        Value::Rectangle(rect) => {
            format!("{},{}", encode_point(&rect.a), encode_point(&rect.b))
        }
        Value::Circle(c) => format!("<{},{}>", encode_point(&c.center), c.radius),
        Value::Path(path) => {
            let inner = path
                .points
                .iter()
                .map(encode_point)
                .collect::<Vec<_>>()
                .join(",");
            if path.closed {
                format!("({inner})")
            } else {
                format!("[{inner}]")
            }
        }
        Value::Polygon(poly) => {
            let inner = poly
                .points
                .iter()
                .map(encode_point)
                .collect::<Vec<_>>()
                .join(",");
            format!("({inner})")
        }
        Value::Tid(tid) => format!("({},{})", tid.block, tid.offset),
        Value::Array(values) => encode_array(values),
    }
}

fn encode_float(v: f64) -> String {
    if v.is_infinite() {
        if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        v.to_string()
    }
}

fn encode_point(p: &super::Point) -> String {
    format!("({},{})", p.x, p.y)
}

fn encode_bytea(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(2 + bytes.len() * 2);
    text.push_str("\\x");
    for byte in bytes {
        text.push_str(&format!("{byte:02x}"));
    }
    text
}

/// Compose a PostgreSQL array literal. Elements that can contain commas,
/// braces, or quotes are double-quoted with `\`-escaping.
fn encode_array(values: &[Value]) -> String {
    let mut literal = String::from("{");
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            literal.push(',');
        }
        match value {
            Value::Null => literal.push_str("NULL"),
            Value::Array(nested) => literal.push_str(&encode_array(nested)),
            Value::Bool(_)
            | Value::Int2(_)
            | Value::Int4(_)
            | Value::Int8(_)
            | Value::Oid(_)
            | Value::Float4(_)
            | Value::Float8(_) => literal.push_str(&encode_text(value)),
            _ => {
                literal.push('"');
                for c in encode_text(value).chars() {
                    if c == '"' || c == '\\' {
                        literal.push('\\');
                    }
                    literal.push(c);
                }
                literal.push('"');
            }
        }
    }
    literal.push('}');
    literal
}
