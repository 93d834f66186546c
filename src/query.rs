//! Query construction and result materialization.

use std::collections::HashMap;

use crate::error::{QueryError, Result, ServerNotice};
use crate::protocol::backend::{ColumnDescription, DataRow, RowDescription};
use crate::types::decode::{decode_column, DecodeStrategy, Decoders};
use crate::types::encode::{encode_argument, EncodedArg};
use crate::types::Value;

/// The SQL command reported by a command tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    Insert,
    Delete,
    Update,
    Select,
    Move,
    Fetch,
    Copy,
}

impl CommandType {
    fn from_word(word: &str) -> Option<Self> {
        let command = match word {
            "INSERT" => CommandType::Insert,
            "DELETE" => CommandType::Delete,
            "UPDATE" => CommandType::Update,
            "SELECT" => CommandType::Select,
            "MOVE" => CommandType::Move,
            "FETCH" => CommandType::Fetch,
            "COPY" => CommandType::Copy,
            _ => return None,
        };
        Some(command)
    }
}

/// Parse a command tag: `"<COMMAND>( <oid>)?( <rows>)?"`.
///
/// The row count is the last number when present. Commands outside the
/// known set (DDL tags like `CREATE TABLE`) yield no command and no count.
pub(crate) fn parse_command_tag(tag: &str) -> (Option<CommandType>, Option<u64>) {
    let mut words = tag.split_whitespace();
    let command = words.next().and_then(CommandType::from_word);
    let row_count = match command {
        Some(_) => words.last().and_then(|w| w.parse().ok()),
        None => None,
    };
    (command, row_count)
}

/// Arguments accepted by the configuration-record query form.
#[derive(Debug, Clone, Default)]
pub enum QueryArgs {
    /// No arguments; the statement runs over the simple protocol
    #[default]
    None,
    /// Positional arguments for `$1..$N` placeholders
    Positional(Vec<Value>),
    /// Named arguments for `$name` placeholders
    Named(Vec<(String, Value)>),
}

/// Configuration-record form of a query.
#[derive(Debug, Clone, Default)]
pub struct QueryConfig {
    /// Statement text
    pub text: String,
    /// Arguments (positional or named)
    pub args: QueryArgs,
    /// Explicit output field names for object results
    pub fields: Option<Vec<String>>,
    /// Transform `snake_case` column names to `camelCase` in object results
    pub camel_case: bool,
}

/// A query ready for execution: text, encoded arguments, and the output
/// field options used when rows are materialized as objects.
#[derive(Debug, Clone)]
pub struct Query {
    pub(crate) text: String,
    pub(crate) args: Vec<EncodedArg>,
    pub(crate) fields: Option<Vec<String>>,
    pub(crate) camel_case: bool,
}

impl Query {
    /// A plain statement with no arguments.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            args: Vec::new(),
            fields: None,
            camel_case: false,
        }
    }

    /// A statement with positional arguments for `$1..$N`.
    pub fn with_args(text: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        Self {
            text: text.into(),
            args: args.into_iter().map(|v| encode_argument(&v)).collect(),
            fields: None,
            camel_case: false,
        }
    }

    /// Build from the configuration-record form, resolving named arguments
    /// and validating any explicit field list.
    pub fn from_config(config: QueryConfig) -> Result<Self> {
        if let Some(fields) = &config.fields {
            validate_fields(fields)?;
        }

        let (text, args) = match config.args {
            QueryArgs::None => (config.text, Vec::new()),
            QueryArgs::Positional(args) => (config.text, args),
            QueryArgs::Named(pairs) => {
                let map = normalize_named_args(pairs)?;
                rewrite_named_placeholders(&config.text, &map)
            }
        };

        Ok(Self {
            text,
            args: args.iter().map(encode_argument).collect(),
            fields: config.fields,
            camel_case: config.camel_case,
        })
    }

    /// Template form: fragments interleaved with argument values, assigned
    /// `$1..$N` in textual order.
    ///
    /// `fragments` must have exactly one more element than `args`.
    pub fn from_template(
        fragments: &[&str],
        args: impl IntoIterator<Item = Value>,
    ) -> Self {
        let args: Vec<Value> = args.into_iter().collect();
        let mut text = String::new();
        for (i, fragment) in fragments.iter().enumerate() {
            text.push_str(fragment);
            if i < args.len() {
                text.push_str(&format!("${}", i + 1));
            }
        }
        Self::with_args(text, args)
    }

    /// Whether this query must run over the extended protocol.
    pub(crate) fn has_args(&self) -> bool {
        !self.args.is_empty()
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Query::new(text)
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Query::new(text)
    }
}

/// Lowercase the argument names, rejecting keys that collapse together.
fn normalize_named_args(pairs: Vec<(String, Value)>) -> Result<HashMap<String, Value>> {
    let mut map = HashMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        let lowered = name.to_lowercase();
        if map.insert(lowered, value).is_some() {
            return Err(QueryError::DuplicateArgument(name).into());
        }
    }
    Ok(map)
}

/// Rewrite `$name` placeholders to `$k`, where `k` is the ordinal of the
/// name's first occurrence in the text. `$1`-style placeholders pass
/// through untouched; names absent from the map bind NULL.
fn rewrite_named_placeholders(
    text: &str,
    args: &HashMap<String, Value>,
) -> (String, Vec<Value>) {
    let mut out = String::with_capacity(text.len());
    let mut ordered: Vec<Value> = Vec::new();
    let mut ordinals: HashMap<String, usize> = HashMap::new();

    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$'
            && i + 1 < bytes.len()
            && (bytes[i + 1].is_ascii_alphabetic() || bytes[i + 1] == b'_')
        {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len()
                && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
            {
                end += 1;
            }
            let name = text[start..end].to_lowercase();
            let ordinal = *ordinals.entry(name.clone()).or_insert_with(|| {
                ordered.push(args.get(&name).cloned().unwrap_or(Value::Null));
                ordered.len()
            });
            out.push_str(&format!("${ordinal}"));
            i = end;
        } else {
            // copy one UTF-8 character
            let ch = text[i..].chars().next().unwrap_or('\0');
            out.push(ch);
            i += ch.len_utf8();
        }
    }

    (out, ordered)
}

/// `[A-Za-z_][A-Za-z0-9_]*`
fn is_valid_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate_fields(fields: &[String]) -> Result<()> {
    let mut seen = HashMap::with_capacity(fields.len());
    for field in fields {
        if !is_valid_field_name(field) {
            return Err(QueryError::InvalidFieldName(field.clone()).into());
        }
        if seen.insert(field.to_lowercase(), ()).is_some() {
            return Err(QueryError::DuplicateField(field.clone()).into());
        }
    }
    Ok(())
}

/// `snake_case` → `camelCase`.
pub(crate) fn snake_to_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for c in name.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// One result accumulated while a statement chain executes, before rows
/// are decoded.
#[derive(Debug, Default)]
pub(crate) struct PendingResult {
    pub columns: Option<RowDescription>,
    pub rows: Vec<DataRow>,
    pub tag: Option<String>,
    pub warnings: Vec<ServerNotice>,
}

/// A result with rows materialized as positional arrays.
#[derive(Debug, Default)]
pub struct QueryArrayResult {
    /// The command the statement performed, when recognized
    pub command: Option<CommandType>,
    /// Rows affected/returned, parsed from the command tag
    pub row_count: Option<u64>,
    /// Column descriptors, empty for row-less statements
    pub columns: Vec<ColumnDescription>,
    /// Decoded rows in result order
    pub rows: Vec<Vec<Value>>,
    /// Notices received while the statement ran
    pub warnings: Vec<ServerNotice>,
}

/// A result with rows materialized as name→value mappings.
#[derive(Debug, Default)]
pub struct QueryObjectResult {
    /// The command the statement performed, when recognized
    pub command: Option<CommandType>,
    /// Rows affected/returned, parsed from the command tag
    pub row_count: Option<u64>,
    /// Column descriptors, empty for row-less statements
    pub columns: Vec<ColumnDescription>,
    /// The output field names rows are keyed by
    pub fields: Vec<String>,
    /// Decoded rows in result order
    pub rows: Vec<HashMap<String, Value>>,
    /// Notices received while the statement ran
    pub warnings: Vec<ServerNotice>,
}

impl PendingResult {
    /// Decode into a positional-row result.
    pub(crate) fn into_array_result(
        self,
        strategy: DecodeStrategy,
        decoders: &Decoders,
    ) -> Result<QueryArrayResult> {
        let (command, row_count) = match &self.tag {
            Some(tag) => parse_command_tag(tag),
            None => (None, None),
        };

        let columns = self.columns.map(|d| d.columns).unwrap_or_default();
        let mut rows = Vec::with_capacity(self.rows.len());
        for raw in &self.rows {
            let mut row = Vec::with_capacity(raw.fields.len());
            for (field, column) in raw.fields.iter().zip(&columns) {
                row.push(decode_column(
                    field.as_deref(),
                    column,
                    strategy,
                    decoders,
                )?);
            }
            rows.push(row);
        }

        Ok(QueryArrayResult {
            command,
            row_count,
            columns,
            rows,
            warnings: self.warnings,
        })
    }

    /// Decode into an object-row result, resolving output names from the
    /// explicit field list or the row description.
    pub(crate) fn into_object_result(
        self,
        strategy: DecodeStrategy,
        decoders: &Decoders,
        explicit_fields: Option<&[String]>,
        camel_case: bool,
    ) -> Result<QueryObjectResult> {
        let (command, row_count) = match &self.tag {
            Some(tag) => parse_command_tag(tag),
            None => (None, None),
        };

        let columns = self.columns.map(|d| d.columns).unwrap_or_default();
        let fields = resolve_fields(&columns, explicit_fields, camel_case)?;

        let mut rows = Vec::with_capacity(self.rows.len());
        let mut expected: Option<usize> = None;
        for raw in &self.rows {
            let got = raw.fields.len();
            match expected {
                None => expected = Some(got),
                Some(count) if count != got => {
                    return Err(QueryError::ShapeMismatch {
                        expected: count,
                        got,
                    }
                    .into());
                }
                Some(_) => {}
            }

            let mut row = HashMap::with_capacity(got);
            for ((field, column), name) in raw.fields.iter().zip(&columns).zip(&fields) {
                row.insert(
                    name.clone(),
                    decode_column(field.as_deref(), column, strategy, decoders)?,
                );
            }
            rows.push(row);
        }

        Ok(QueryObjectResult {
            command,
            row_count,
            columns,
            fields,
            rows,
            warnings: self.warnings,
        })
    }
}

/// Resolve the output names of an object result.
fn resolve_fields(
    columns: &[ColumnDescription],
    explicit: Option<&[String]>,
    camel_case: bool,
) -> Result<Vec<String>> {
    if let Some(fields) = explicit {
        if !columns.is_empty() && fields.len() != columns.len() {
            return Err(QueryError::FieldCountMismatch {
                fields: fields.len(),
                columns: columns.len(),
            }
            .into());
        }
        return Ok(fields.to_vec());
    }

    let mut names = Vec::with_capacity(columns.len());
    let mut seen = HashMap::with_capacity(columns.len());
    for column in columns {
        let name = if camel_case {
            snake_to_camel(&column.name)
        } else {
            column.name.clone()
        };
        if seen.insert(name.clone(), ()).is_some() {
            return Err(QueryError::DuplicateField(name).into());
        }
        names.push(name);
    }
    Ok(names)
}
