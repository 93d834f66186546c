//! Connection lifecycle: startup, authentication, query protocols,
//! resynchronization, and reconnection.

pub(crate) mod stream;

use std::collections::HashMap;

use tokio::time::{sleep, Duration};

use crate::auth::{md5_password, ScramClient};
use crate::config::ConnectionOptions;
use crate::error::{
    AuthError, ConnectionError, Error, ProtocolError, Result, ServerNotice,
};
use crate::protocol::backend::{
    msg_type, parse_notice_fields, Authentication, BackendKeyData, Frame, ParameterStatus,
    ReadyForQuery, RowDescription,
};
use crate::protocol::backend::rows::{parse_command_tag, DataRow};
use crate::protocol::frontend::{
    write_bind, write_describe_portal, write_execute, write_parse, write_password, write_query,
    write_sasl_initial_response, write_sasl_response, write_startup, write_sync,
    write_terminate,
};
use crate::protocol::types::TransactionStatus;
use crate::query::{PendingResult, Query};

use self::stream::Stream;

/// A single PostgreSQL session.
///
/// The connection owns one transport, one reusable frame, and one write
/// buffer. Callers serialize access through the client's queue lock; the
/// protocol state here assumes at most one operation in flight.
pub(crate) struct Connection {
    options: ConnectionOptions,
    stream: Option<Stream>,
    frame: Frame,
    write_buffer: Vec<u8>,
    parameters: HashMap<String, String>,
    pid: u32,
    secret_key: u32,
    transaction_status: TransactionStatus,
    tls: bool,
    connected: bool,
    /// True while a query is mid-protocol. A cancelled caller leaves this
    /// set; the frames of the abandoned operation are never consumed, so
    /// the session is poisoned and must be re-established.
    in_flight: bool,
}

impl Connection {
    /// A detached connection; `startup` establishes the session.
    pub fn new(options: ConnectionOptions) -> Self {
        Self {
            options,
            stream: None,
            frame: Frame::default(),
            write_buffer: Vec::with_capacity(1024),
            parameters: HashMap::new(),
            pid: 0,
            secret_key: 0,
            transaction_status: TransactionStatus::Idle,
            tls: false,
            connected: false,
            in_flight: false,
        }
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Backend process ID reported during startup.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the session is TLS-encrypted.
    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// Server-reported runtime parameters.
    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.parameters
    }

    /// Establish (or re-establish) the session, retrying per the
    /// reconnection policy.
    pub async fn startup(&mut self, reconnection: bool) -> Result<()> {
        let tries = if reconnection {
            self.options.connection.attempts
        } else {
            self.options.connection.attempts.max(1)
        };
        if tries == 0 {
            return Err(ConnectionError::Lost.into());
        }

        let mut interval = 0u64;
        let mut last_error = None;
        for attempt in 0..tries {
            if attempt > 0 {
                interval = self.options.connection.interval.next(interval);
                tracing::debug!(attempt, interval_ms = interval, "retrying connection");
                sleep(Duration::from_millis(interval)).await;
            }
            match self.connect_once().await {
                Ok(()) => {
                    tracing::debug!(pid = self.pid, tls = self.tls, "session established");
                    return Ok(());
                }
                Err(error) => {
                    self.mark_disconnected();
                    // configuration and authentication problems will not
                    // improve with retries
                    if matches!(
                        error,
                        Error::Config(_) | Error::Auth(_) | Error::Postgres(_)
                    ) {
                        return Err(error);
                    }
                    tracing::debug!(%error, attempt, "connection attempt failed");
                    last_error = Some(error);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ConnectionError::Lost.into()))
    }

    /// One startup sequence: transport, StartupMessage, authentication,
    /// parameter exchange, ReadyForQuery.
    async fn connect_once(&mut self) -> Result<()> {
        self.parameters.clear();
        let stream = Stream::connect(&self.options).await?;
        self.tls = stream.is_tls();
        self.stream = Some(stream);

        self.write_buffer.clear();
        let options_parameter = self.options.options_parameter();
        let mut params: Vec<(&str, &str)> = vec![
            ("user", &self.options.user),
            ("database", &self.options.database),
            ("application_name", &self.options.application_name),
            ("client_encoding", "utf-8"),
        ];
        if let Some(extra) = options_parameter.as_deref() {
            params.push(("options", extra));
        }
        write_startup(&mut self.write_buffer, &params);
        self.flush().await?;

        loop {
            self.read_frame().await?;
            match self.frame.kind {
                msg_type::ERROR_RESPONSE => {
                    let notice = parse_notice_fields(&mut self.frame.reader())?;
                    return Err(notice.into());
                }
                msg_type::AUTHENTICATION => {
                    let auth = Authentication::parse(&mut self.frame.reader())?;
                    self.authenticate(auth).await?;
                }
                msg_type::BACKEND_KEY_DATA => {
                    let key = BackendKeyData::parse(&mut self.frame.reader())?;
                    self.pid = key.pid;
                    self.secret_key = key.secret_key;
                }
                msg_type::PARAMETER_STATUS => {
                    let param = ParameterStatus::parse(&mut self.frame.reader())?;
                    self.parameters.insert(param.name, param.value);
                }
                msg_type::NOTICE_RESPONSE => {
                    let notice = parse_notice_fields(&mut self.frame.reader())?;
                    self.log_notice(&notice);
                }
                msg_type::READY_FOR_QUERY => {
                    let ready = ReadyForQuery::parse(&mut self.frame.reader())?;
                    self.transaction_status = ready.status;
                    self.connected = true;
                    return Ok(());
                }
                other => {
                    return Err(unexpected_frame(other, "waiting for startup completion"));
                }
            }
        }
    }

    /// Drive one authentication request from the server.
    async fn authenticate(&mut self, auth: Authentication) -> Result<()> {
        match auth {
            Authentication::Ok => Ok(()),
            Authentication::CleartextPassword => {
                let password = self.require_password()?.to_string();
                self.write_buffer.clear();
                write_password(&mut self.write_buffer, &password);
                self.flush().await
            }
            Authentication::Md5Password { salt } => {
                let password = self.require_password()?;
                let hashed = md5_password(&self.options.user, password, &salt);
                self.write_buffer.clear();
                write_password(&mut self.write_buffer, &hashed);
                self.flush().await
            }
            Authentication::Sasl { mechanisms } => {
                if !mechanisms.iter().any(|m| m == ScramClient::MECHANISM) {
                    return Err(AuthError::UnsupportedMechanism.into());
                }
                self.sasl_exchange().await
            }
            Authentication::Unsupported { code } => {
                Err(AuthError::UnsupportedMethod(code).into())
            }
            Authentication::SaslContinue { .. } | Authentication::SaslFinal { .. } => Err(
                AuthError::Protocol("SASL continuation outside an exchange".into()).into(),
            ),
        }
    }

    /// Run the SCRAM-SHA-256 exchange up to (not including) the final
    /// AuthenticationOk.
    async fn sasl_exchange(&mut self) -> Result<()> {
        let password = self.require_password()?;
        let mut scram = ScramClient::new(&self.options.user, password)?;

        let first = scram.client_first_message()?;
        self.write_buffer.clear();
        write_sasl_initial_response(
            &mut self.write_buffer,
            ScramClient::MECHANISM,
            first.as_bytes(),
        );
        self.flush().await?;

        match self.read_auth_frame().await? {
            Authentication::SaslContinue { data } => {
                let message = sasl_utf8(&data)?;
                scram.receive_server_first(&message)?;
            }
            _ => {
                return Err(AuthError::Protocol(
                    "expected SASL continuation from server".into(),
                )
                .into());
            }
        }

        let response = scram.client_final_message()?;
        self.write_buffer.clear();
        write_sasl_response(&mut self.write_buffer, response.as_bytes());
        self.flush().await?;

        match self.read_auth_frame().await? {
            Authentication::SaslFinal { data } => {
                let message = sasl_utf8(&data)?;
                scram.receive_server_final(&message)?;
                Ok(())
            }
            _ => Err(AuthError::Protocol("expected SASL completion from server".into()).into()),
        }
    }

    /// Read a frame that must be an authentication message (or an error).
    async fn read_auth_frame(&mut self) -> Result<Authentication> {
        loop {
            self.read_frame().await?;
            match self.frame.kind {
                msg_type::AUTHENTICATION => {
                    return Authentication::parse(&mut self.frame.reader());
                }
                msg_type::ERROR_RESPONSE => {
                    let notice = parse_notice_fields(&mut self.frame.reader())?;
                    return Err(notice.into());
                }
                msg_type::NOTICE_RESPONSE => {
                    let notice = parse_notice_fields(&mut self.frame.reader())?;
                    self.log_notice(&notice);
                }
                other => {
                    return Err(unexpected_frame(other, "during authentication"));
                }
            }
        }
    }

    fn require_password(&self) -> Result<&str> {
        self.options
            .password
            .as_deref()
            .ok_or_else(|| AuthError::MissingPassword.into())
    }

    /// Execute a query, reconnecting transparently when the link drops.
    ///
    /// A query in flight during a disconnect fails with
    /// [`ConnectionError::Lost`] and is never re-executed; the session is
    /// re-established for subsequent queries when attempts remain.
    pub async fn execute(&mut self, query: &Query) -> Result<Vec<PendingResult>> {
        if self.in_flight {
            // a previous caller was cancelled mid-operation
            tracing::warn!("abandoned operation poisoned the session; reconnecting");
            self.mark_disconnected();
        }
        if !self.connected {
            self.startup(true).await?;
        }

        if self.options.controls.debug.queries {
            tracing::debug!(statement = %query.text, "executing query");
        }

        self.in_flight = true;
        let result = self.execute_inner(query).await;
        self.in_flight = false;
        match result {
            Ok(results) => {
                if self.options.controls.debug.results {
                    tracing::debug!(results = results.len(), "query complete");
                }
                Ok(results)
            }
            Err(error) => {
                let disconnected = matches!(
                    error,
                    Error::Io(_) | Error::Connection(ConnectionError::Lost)
                );
                if disconnected {
                    self.mark_disconnected();
                    if self.options.connection.attempts > 0 {
                        // re-establish for the next caller; the in-flight
                        // query may have executed, so it is not retried
                        self.startup(true).await?;
                    }
                    return Err(ConnectionError::Lost.into());
                }
                if error.is_connection_broken() {
                    self.mark_disconnected();
                }
                Err(self.attach_query_text(error, &query.text))
            }
        }
    }

    async fn execute_inner(&mut self, query: &Query) -> Result<Vec<PendingResult>> {
        if query.has_args() {
            Ok(vec![self.query_extended(query).await?])
        } else {
            self.query_simple(&query.text).await
        }
    }

    /// Simple query protocol: one round trip, possibly several statements.
    async fn query_simple(&mut self, sql: &str) -> Result<Vec<PendingResult>> {
        self.write_buffer.clear();
        write_query(&mut self.write_buffer, sql);
        self.flush().await?;

        let mut results: Vec<PendingResult> = Vec::new();
        let mut current = PendingResult::default();
        let mut current_closed = false;
        let mut pending_error: Option<ServerNotice> = None;

        loop {
            self.read_frame().await?;
            match self.frame.kind {
                msg_type::ROW_DESCRIPTION => {
                    if current_closed {
                        results.push(std::mem::take(&mut current));
                        current_closed = false;
                    }
                    current.columns =
                        Some(RowDescription::parse(&mut self.frame.reader())?);
                }
                msg_type::NO_DATA => {
                    current.columns = None;
                }
                msg_type::DATA_ROW => {
                    if current_closed {
                        results.push(std::mem::take(&mut current));
                        current_closed = false;
                    }
                    current.rows.push(DataRow::parse(&mut self.frame.reader())?);
                }
                msg_type::COMMAND_COMPLETE => {
                    if current_closed {
                        results.push(std::mem::take(&mut current));
                    }
                    current.tag = Some(parse_command_tag(&mut self.frame.reader())?);
                    current_closed = true;
                }
                msg_type::EMPTY_QUERY_RESPONSE => {
                    // empty statement: no result is produced
                }
                msg_type::NOTICE_RESPONSE => {
                    let notice = parse_notice_fields(&mut self.frame.reader())?;
                    self.log_notice(&notice);
                    current.warnings.push(notice);
                }
                msg_type::PARAMETER_STATUS => {
                    let param = ParameterStatus::parse(&mut self.frame.reader())?;
                    self.parameters.insert(param.name, param.value);
                }
                msg_type::ERROR_RESPONSE => {
                    // buffer the error and resynchronize on ReadyForQuery
                    let notice = parse_notice_fields(&mut self.frame.reader())?;
                    pending_error.get_or_insert(notice);
                }
                msg_type::READY_FOR_QUERY => {
                    let ready = ReadyForQuery::parse(&mut self.frame.reader())?;
                    self.transaction_status = ready.status;
                    if let Some(notice) = pending_error {
                        return Err(notice.into());
                    }
                    if current_closed {
                        results.push(current);
                    }
                    return Ok(results);
                }
                other => {
                    return Err(unexpected_frame(other, "in simple query response"));
                }
            }
        }
    }

    /// Extended query protocol: Parse, Bind, Describe, Execute, Sync for a
    /// single parameterized statement.
    async fn query_extended(&mut self, query: &Query) -> Result<PendingResult> {
        self.write_buffer.clear();
        write_parse(&mut self.write_buffer, &query.text);
        write_bind(&mut self.write_buffer, &query.args);
        write_describe_portal(&mut self.write_buffer);
        write_execute(&mut self.write_buffer);
        write_sync(&mut self.write_buffer);
        self.flush().await?;

        let mut result = PendingResult::default();
        let mut pending_error: Option<ServerNotice> = None;

        loop {
            self.read_frame().await?;
            match self.frame.kind {
                msg_type::PARSE_COMPLETE | msg_type::BIND_COMPLETE => {}
                msg_type::ROW_DESCRIPTION => {
                    result.columns = Some(RowDescription::parse(&mut self.frame.reader())?);
                }
                msg_type::NO_DATA => {
                    result.columns = None;
                }
                msg_type::DATA_ROW => {
                    result.rows.push(DataRow::parse(&mut self.frame.reader())?);
                }
                msg_type::COMMAND_COMPLETE => {
                    result.tag = Some(parse_command_tag(&mut self.frame.reader())?);
                }
                msg_type::EMPTY_QUERY_RESPONSE => {}
                msg_type::NOTICE_RESPONSE => {
                    let notice = parse_notice_fields(&mut self.frame.reader())?;
                    self.log_notice(&notice);
                    result.warnings.push(notice);
                }
                msg_type::PARAMETER_STATUS => {
                    let param = ParameterStatus::parse(&mut self.frame.reader())?;
                    self.parameters.insert(param.name, param.value);
                }
                msg_type::ERROR_RESPONSE => {
                    // Sync is already enqueued; drain to ReadyForQuery
                    let notice = parse_notice_fields(&mut self.frame.reader())?;
                    pending_error.get_or_insert(notice);
                }
                msg_type::READY_FOR_QUERY => {
                    let ready = ReadyForQuery::parse(&mut self.frame.reader())?;
                    self.transaction_status = ready.status;
                    if let Some(notice) = pending_error {
                        return Err(notice.into());
                    }
                    return Ok(result);
                }
                other => {
                    return Err(unexpected_frame(other, "in extended query response"));
                }
            }
        }
    }

    /// Send Terminate and close the transport. Idempotent.
    pub async fn end(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            self.write_buffer.clear();
            write_terminate(&mut self.write_buffer);
            // the server may already be gone; closing is best-effort
            let _ = stream.write_all(&self.write_buffer).await;
            let _ = stream.flush().await;
        }
        self.mark_disconnected();
        Ok(())
    }

    fn mark_disconnected(&mut self) {
        self.stream = None;
        self.connected = false;
        self.pid = 0;
        self.secret_key = 0;
        self.tls = false;
        self.transaction_status = TransactionStatus::Idle;
        self.in_flight = false;
    }

    fn attach_query_text(&self, error: Error, text: &str) -> Error {
        if !self.options.controls.debug.query_in_error {
            return error;
        }
        match error {
            Error::Postgres(mut notice) => {
                notice.query = Some(text.to_string());
                Error::Postgres(notice)
            }
            other => other,
        }
    }

    fn log_notice(&self, notice: &ServerNotice) {
        if self.options.controls.debug.notices {
            tracing::debug!(severity = %notice.severity, message = %notice.message, "server notice");
        }
    }

    async fn read_frame(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or(ConnectionError::Lost)?;
        stream.read_frame(&mut self.frame).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or(ConnectionError::Lost)?;
        stream.write_all(&self.write_buffer).await?;
        stream.flush().await?;
        Ok(())
    }
}

fn unexpected_frame(kind: u8, context: &'static str) -> Error {
    ProtocolError::UnexpectedFrame {
        kind: kind as char,
        context,
    }
    .into()
}

fn sasl_utf8(data: &[u8]) -> Result<String> {
    std::str::from_utf8(data)
        .map(str::to_string)
        .map_err(|e| AuthError::Protocol(format!("non-UTF-8 SASL payload: {e}")).into())
}
