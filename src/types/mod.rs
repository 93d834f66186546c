//! Typed column values and the text codec.

pub mod array;
pub mod decode;
pub mod encode;

pub use decode::{DecodeStrategy, DecoderFn, Decoders};
pub use encode::EncodedArg;

use chrono::{DateTime, FixedOffset, NaiveDate};

/// A two-dimensional point, `(x,y)` in the text protocol.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// An infinite line given by `Ax + By + C = 0`, `{A,B,C}` on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

/// A finite line segment, `[(x1,y1),(x2,y2)]` on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSegment {
    pub a: Point,
    pub b: Point,
}

/// An axis-aligned rectangle given by two opposite corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rectangle {
    pub a: Point,
    pub b: Point,
}

/// A circle, `<(x,y),r>` on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub center: Point,
    pub radius: f64,
}

/// An open or closed path of points.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub points: Vec<Point>,
    /// Closed paths print as `(...)`, open paths as `[...]`
    pub closed: bool,
}

/// A polygon (always closed).
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub points: Vec<Point>,
}

/// A tuple physical location, `(block,offset)` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tid {
    pub block: u64,
    pub offset: u64,
}

/// A date, which PostgreSQL allows to be infinite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Date {
    Value(NaiveDate),
    PosInfinity,
    NegInfinity,
}

/// A timestamp with offset, which PostgreSQL allows to be infinite.
///
/// `timestamp` columns carry no zone; their values are taken at UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    Value(DateTime<FixedOffset>),
    PosInfinity,
    NegInfinity,
}

/// A decoded field value.
///
/// Decoders produce these from the text representation of a column; the
/// argument encoder accepts them back. `Array` elements may themselves be
/// arrays (PostgreSQL arrays are rectangular but nested in the text form).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Oid(u32),
    Float4(f32),
    Float8(f64),
    /// `numeric`: arbitrary precision, kept as its decimal text
    Numeric(String),
    Text(String),
    Bytea(Vec<u8>),
    Date(Date),
    Timestamp(Timestamp),
    Json(serde_json::Value),
    Point(Point),
    Line(Line),
    LineSegment(LineSegment),
    Rectangle(Rectangle),
    Circle(Circle),
    Path(Path),
    Polygon(Polygon),
    Tid(Tid),
    Array(Vec<Value>),
}

impl Value {
    /// Whether this value is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The value as text, when it is a text-family value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Numeric(s) => Some(s),
            _ => None,
        }
    }

    /// The value widened to i64, when it is any integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int2(v) => Some(i64::from(*v)),
            Value::Int4(v) => Some(i64::from(*v)),
            Value::Int8(v) => Some(*v),
            Value::Oid(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// The value widened to f64, when it is any float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float4(v) => Some(f64::from(*v)),
            Value::Float8(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as bool, when it is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int2(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int4(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int8(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float4(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float8(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytea(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::Timestamp(Timestamp::Value(v))
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(Date::Value(v))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

impl FromIterator<Value> for Value {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Value::Array(iter.into_iter().collect())
    }
}
