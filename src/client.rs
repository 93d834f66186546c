//! Client facade: connect, query, transactions, termination.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use tokio::sync::Mutex;

use crate::config::{ClientControls, ConnectionOptions};
use crate::connection::Connection;
use crate::error::{LifecycleError, Result, TransactionError};
use crate::query::{PendingResult, Query, QueryArrayResult, QueryObjectResult};
use crate::transaction::{Transaction, TransactionOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Connected,
    Terminated,
}

/// Session facts reported by the server during startup.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Backend process ID (0 when disconnected)
    pub pid: u32,
    /// Whether the transport is TLS-encrypted
    pub tls: bool,
    /// Server-reported runtime parameters
    pub parameters: HashMap<String, String>,
}

/// A PostgreSQL client owning a single connection.
///
/// Queries on one client are serialized: a fair queue lock admits one
/// operation at a time, so a second `query` call suspends until the first
/// reaches ReadyForQuery.
pub struct Client {
    connection: Mutex<Connection>,
    controls: ClientControls,
    lifecycle: StdMutex<Lifecycle>,
    transaction_slot: StdMutex<Option<String>>,
}

impl Client {
    /// Create a detached client from options or a connection URI.
    ///
    /// Unset options are filled from the `PG*` environment variables.
    pub fn new<O>(options: O) -> Result<Self>
    where
        O: TryInto<ConnectionOptions>,
        crate::error::Error: From<O::Error>,
    {
        let options = options.try_into()?.finalize()?;
        let controls = options.controls.clone();
        Ok(Self {
            connection: Mutex::new(Connection::new(options)),
            controls,
            lifecycle: StdMutex::new(Lifecycle::Created),
            transaction_slot: StdMutex::new(None),
        })
    }

    /// Establish the session.
    pub async fn connect(&self) -> Result<()> {
        if self.state() == Lifecycle::Terminated {
            return Err(LifecycleError::Terminated.into());
        }
        let mut connection = self.connection.lock().await;
        connection.startup(false).await?;
        self.set_state(Lifecycle::Connected);
        Ok(())
    }

    /// Send Terminate and close the transport. Idempotent.
    pub async fn end(&self) -> Result<()> {
        let mut connection = self.connection.lock().await;
        connection.end().await?;
        self.set_state(Lifecycle::Terminated);
        *lock_ok(&self.transaction_slot) = None;
        Ok(())
    }

    /// Execute a query and materialize rows as positional arrays.
    ///
    /// Accepts statement text, a [`Query`] built from the configuration or
    /// template forms, or anything else convertible into a [`Query`]. A
    /// simple-protocol statement chain yields one result per statement; a
    /// parameterized query yields exactly one.
    pub async fn query_array<Q: Into<Query>>(&self, query: Q) -> Result<Vec<QueryArrayResult>> {
        let query = query.into();
        self.ensure_unlocked()?;
        let pending = self.execute_internal(&query).await?;
        self.materialize_array(pending)
    }

    /// Execute a query and materialize rows as name→value mappings.
    pub async fn query_object<Q: Into<Query>>(&self, query: Q) -> Result<Vec<QueryObjectResult>> {
        let query = query.into();
        self.ensure_unlocked()?;
        let pending = self.execute_internal(&query).await?;
        self.materialize_object(pending, &query)
    }

    /// Create a transaction controller bound to this client.
    ///
    /// The transaction holds the connection exclusively between `begin()`
    /// and `commit()`/`rollback()`.
    pub fn create_transaction(&self, name: impl Into<String>) -> Transaction<'_> {
        Transaction::new(self, name.into(), TransactionOptions::default())
    }

    /// Create a transaction controller with explicit options.
    pub fn create_transaction_with(
        &self,
        name: impl Into<String>,
        options: TransactionOptions,
    ) -> Transaction<'_> {
        Transaction::new(self, name.into(), options)
    }

    /// Current session facts (PID, TLS, server parameters).
    pub async fn session(&self) -> SessionInfo {
        let connection = self.connection.lock().await;
        SessionInfo {
            pid: connection.pid(),
            tls: connection.is_tls(),
            parameters: connection.parameters().clone(),
        }
    }

    // === internals shared with Transaction and Pool ===

    fn state(&self) -> Lifecycle {
        *lock_ok(&self.lifecycle)
    }

    fn set_state(&self, state: Lifecycle) {
        *lock_ok(&self.lifecycle) = state;
    }

    pub(crate) fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            Lifecycle::Created => Err(LifecycleError::NotConnected.into()),
            Lifecycle::Terminated => Err(LifecycleError::Terminated.into()),
            Lifecycle::Connected => Ok(()),
        }
    }

    /// Reject direct queries while a transaction holds the connection.
    fn ensure_unlocked(&self) -> Result<()> {
        if let Some(name) = lock_ok(&self.transaction_slot).as_ref() {
            return Err(TransactionError::Busy(name.clone()).into());
        }
        Ok(())
    }

    /// Execute without the transaction-slot guard (transaction internals
    /// take the slot instead).
    pub(crate) async fn execute_internal(&self, query: &Query) -> Result<Vec<PendingResult>> {
        self.ensure_ready()?;
        let mut connection = self.connection.lock().await;
        connection.execute(query).await
    }

    pub(crate) fn acquire_transaction_slot(&self, name: &str) -> Result<()> {
        let mut slot = lock_ok(&self.transaction_slot);
        if let Some(existing) = slot.as_ref() {
            return Err(TransactionError::Busy(existing.clone()).into());
        }
        *slot = Some(name.to_string());
        Ok(())
    }

    pub(crate) fn release_transaction_slot(&self) {
        *lock_ok(&self.transaction_slot) = None;
    }

    pub(crate) fn materialize_array(
        &self,
        pending: Vec<PendingResult>,
    ) -> Result<Vec<QueryArrayResult>> {
        pending
            .into_iter()
            .map(|result| {
                result.into_array_result(
                    self.controls.decode_strategy,
                    &self.controls.decoders,
                )
            })
            .collect()
    }

    pub(crate) fn materialize_object(
        &self,
        pending: Vec<PendingResult>,
        query: &Query,
    ) -> Result<Vec<QueryObjectResult>> {
        pending
            .into_iter()
            .map(|result| {
                result.into_object_result(
                    self.controls.decode_strategy,
                    &self.controls.decoders,
                    query.fields.as_deref(),
                    query.camel_case,
                )
            })
            .collect()
    }

    /// Whether the underlying connection currently holds a live session.
    pub(crate) async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_connected()
    }

    /// Re-establish a dropped session (pool post-check).
    pub(crate) async fn reconnect(&self) -> Result<()> {
        let mut connection = self.connection.lock().await;
        connection.startup(true).await?;
        self.set_state(Lifecycle::Connected);
        Ok(())
    }

    pub(crate) fn reconnect_attempts(&self) -> u32 {
        // options are immutable after construction; peek without awaiting
        match self.connection.try_lock() {
            Ok(connection) => connection.options().connection.attempts,
            Err(_) => 1,
        }
    }
}

/// Std mutexes in this crate guard plain state and are never held across
/// awaits; a poisoned lock only happens after a panic, so recover the
/// inner value.
pub(crate) fn lock_ok<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
