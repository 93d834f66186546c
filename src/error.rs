//! Error types for quill-postgres.

use thiserror::Error;

/// Result type for quill-postgres operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured error or notice delivered in a backend `E` or `N` frame.
///
/// The severity, SQLSTATE code, and message fields are always present
/// (PostgreSQL 9.6+); everything else is optional.
#[derive(Debug, Clone, Default)]
pub struct ServerNotice {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: String,
    /// SQLSTATE error code (5 characters)
    pub code: String,
    /// Primary human-readable message
    pub message: String,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in the query string (1-based)
    pub position: Option<u32>,
    /// Position in an internally generated query
    pub internal_position: Option<u32>,
    /// Text of the failed internally generated query
    pub internal_query: Option<String>,
    /// Context in which the error occurred
    pub where_: Option<String>,
    /// Schema name
    pub schema: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name
    pub column: Option<String>,
    /// Data type name
    pub data_type: Option<String>,
    /// Constraint name
    pub constraint: Option<String>,
    /// Source file reporting the error
    pub file: Option<String>,
    /// Source line reporting the error
    pub line: Option<u32>,
    /// Source routine reporting the error
    pub routine: Option<String>,
    /// The query that provoked the error, attached when
    /// `debug.query_in_error` is enabled.
    pub query: Option<String>,
}

impl ServerNotice {
    /// Whether this notice ends the backend session.
    pub fn is_fatal(&self) -> bool {
        matches!(self.severity.as_str(), "FATAL" | "PANIC")
    }

    /// Whether this notice is informational rather than an error.
    pub fn is_warning(&self) -> bool {
        matches!(
            self.severity.as_str(),
            "WARNING" | "NOTICE" | "DEBUG" | "INFO" | "LOG"
        )
    }
}

impl std::fmt::Display for ServerNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} (SQLSTATE {})",
            self.severity, self.message, self.code
        )?;
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {detail}")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {hint}")?;
        }
        if let Some(query) = &self.query {
            write!(f, "\nQUERY: {query}")?;
        }
        Ok(())
    }
}

/// Invalid client configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing connection parameter: user")]
    MissingUser,
    #[error("missing connection parameter: database")]
    MissingDatabase,
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("invalid sslmode: {0}")]
    InvalidSslMode(String),
    #[error("TLS cannot be used over a Unix socket connection")]
    TlsOverSocket,
    #[error("TLS enforcement requires TLS to be enabled")]
    EnforcedTlsDisabled,
    #[error("invalid connection option {name:?}: {value:?}")]
    InvalidOption { name: String, value: String },
    #[error("invalid connection URI: {0}")]
    InvalidUri(String),
}

/// Transport-level connection failure.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The connection dropped while an operation was in flight.
    #[error("connection lost")]
    Lost,
    /// The server answered the SSLRequest with something other than S or N.
    #[error("unexpected reply 0x{0:02x} to SSL negotiation request")]
    BadTlsAvailability(u8),
    /// The server refused TLS and the configuration enforces it.
    #[error("server does not accept TLS connections")]
    TlsNotSupportedServer,
    /// TLS certificate validation failed under enforcement.
    #[error("TLS certificate rejected: {0}")]
    CertificateRejected(String),
}

/// Authentication failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("server offered no supported SASL mechanism")]
    UnsupportedMechanism,
    #[error("unsupported authentication method requested by server (code {0})")]
    UnsupportedMethod(i32),
    #[error("server nonce does not extend the client nonce")]
    BadServerNonce,
    #[error("server sent an undecodable SCRAM salt")]
    BadSalt,
    #[error("server sent an invalid SCRAM iteration count")]
    BadIterationCount,
    #[error("server signature verification failed")]
    BadVerifier,
    #[error("authentication rejected by server: {0}")]
    Rejected(String),
    #[error("username or password contains characters outside printable ASCII")]
    UnsafeChars,
    #[error("SCRAM exchange violated protocol: {0}")]
    Protocol(String),
    #[error("password required but not provided")]
    MissingPassword,
}

/// Wire protocol violation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unexpected frame '{kind}' while {context}")]
    UnexpectedFrame { kind: char, context: &'static str },
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("column {column:?} uses the binary format, which has no installed decoder")]
    UnsupportedBinaryFormat { column: String },
}

/// Invalid query construction or result shape.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("argument {0:?} appears more than once (case-insensitive)")]
    DuplicateArgument(String),
    #[error("output field {0:?} appears more than once")]
    DuplicateField(String),
    #[error("invalid output field name: {0:?}")]
    InvalidFieldName(String),
    #[error("explicit field list has {fields} names but the result has {columns} columns")]
    FieldCountMismatch { fields: usize, columns: usize },
    #[error("row has {got} values but the result shape expects {expected}")]
    ShapeMismatch { expected: usize, got: usize },
    #[error("unrecognized command tag: {0:?}")]
    UnknownCommandTag(String),
}

/// Transaction or savepoint misuse.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction {0:?} is already active on this connection")]
    Busy(String),
    #[error("transaction {0:?} was aborted by an earlier error")]
    Aborted(String),
    #[error("rollback cannot combine chain with a savepoint target")]
    InvalidRollback,
    #[error("savepoint has no remaining instances to release")]
    NoSavepointInstance,
    #[error("invalid savepoint name: {0:?}")]
    InvalidSavepointName(String),
    #[error("transaction {0:?} has not been started")]
    NotStarted(String),
}

/// Client or pool lifecycle misuse.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("client is not connected; call connect() first")]
    NotConnected,
    #[error("client has been terminated")]
    Terminated,
    #[error("pool has no capacity and no connection factory")]
    PoolExhausted,
}

/// Error type for quill-postgres.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Transport-level failure
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Authentication failure
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Structured error reported by the server
    #[error("server error: {0}")]
    Postgres(Box<ServerNotice>),

    /// Wire protocol violation
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Invalid query construction or result shape
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Transaction misuse
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// Lifecycle misuse
    #[error("{0}")]
    Lifecycle(#[from] LifecycleError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),
}

impl Error {
    /// Returns true if the error indicates the connection is poisoned and
    /// cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_) | Error::Connection(_) | Error::Protocol(_) => true,
            Error::Postgres(notice) => notice.is_fatal(),
            _ => false,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Postgres(notice) => Some(&notice.code),
            _ => None,
        }
    }
}

impl From<ServerNotice> for Error {
    fn from(notice: ServerNotice) -> Self {
        Error::Postgres(Box::new(notice))
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_server_notice_breaks_connection() {
        let notice = ServerNotice {
            severity: "FATAL".into(),
            code: "57P01".into(),
            message: "terminating connection".into(),
            ..Default::default()
        };
        assert!(Error::from(notice).is_connection_broken());

        let notice = ServerNotice {
            severity: "ERROR".into(),
            code: "42601".into(),
            message: "syntax error".into(),
            ..Default::default()
        };
        assert!(!Error::from(notice).is_connection_broken());
    }

    #[test]
    fn display_includes_detail_and_hint() {
        let notice = ServerNotice {
            severity: "ERROR".into(),
            code: "23505".into(),
            message: "duplicate key".into(),
            detail: Some("Key (id)=(1) already exists.".into()),
            hint: Some("try another id".into()),
            ..Default::default()
        };
        let text = notice.to_string();
        assert!(text.contains("SQLSTATE 23505"));
        assert!(text.contains("DETAIL"));
        assert!(text.contains("HINT"));
    }
}
