//! Transactions and savepoints.

use std::sync::{Arc, Mutex as StdMutex};

use crate::client::{lock_ok, Client};
use crate::error::{Error, Result, TransactionError};
use crate::query::{Query, QueryArrayResult, QueryObjectResult};

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// The PostgreSQL default
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn sql(self) -> Option<&'static str> {
        match self {
            IsolationLevel::ReadCommitted => None,
            IsolationLevel::RepeatableRead => Some("REPEATABLE READ"),
            IsolationLevel::Serializable => Some("SERIALIZABLE"),
        }
    }
}

/// Options for a new transaction.
#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    /// Isolation level; omitted from BEGIN when it is the default
    pub isolation: IsolationLevel,
    /// Open the transaction READ ONLY
    pub read_only: bool,
    /// Adopt an exported snapshot (`SET TRANSACTION SNAPSHOT`)
    pub snapshot: Option<String>,
}

/// Rollback target and chaining; the two are mutually exclusive.
#[derive(Debug, Clone, Default)]
pub struct RollbackOptions {
    /// Roll back to this savepoint instead of ending the transaction
    pub savepoint: Option<String>,
    /// Issue `ROLLBACK AND CHAIN`, immediately reopening the transaction
    pub chain: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    NotStarted,
    Active,
    Committed,
    RolledBack,
    Aborted,
}

/// A named point within a transaction that partial rollbacks can target.
///
/// `instances` counts outstanding declarations: each `update()` pushes one,
/// each `release()` or savepoint rollback pops one.
#[derive(Clone)]
pub struct Savepoint<'a> {
    client: &'a Client,
    tx_name: String,
    tx_state: Arc<StdMutex<TxState>>,
    name: String,
    instances: Arc<StdMutex<u32>>,
}

impl Savepoint<'_> {
    /// The validated savepoint name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Outstanding declarations of this savepoint.
    pub fn instances(&self) -> u32 {
        *lock_ok(&self.instances)
    }

    /// Re-declare the savepoint at the current position.
    pub async fn update(&self) -> Result<()> {
        run_in_transaction(
            self.client,
            &self.tx_state,
            &self.tx_name,
            &Query::new(format!("SAVEPOINT {}", self.name)),
        )
        .await?;
        *lock_ok(&self.instances) += 1;
        Ok(())
    }

    /// Release the most recent declaration.
    pub async fn release(&self) -> Result<()> {
        if self.instances() == 0 {
            return Err(TransactionError::NoSavepointInstance.into());
        }
        run_in_transaction(
            self.client,
            &self.tx_state,
            &self.tx_name,
            &Query::new(format!("RELEASE SAVEPOINT {}", self.name)),
        )
        .await?;
        *lock_ok(&self.instances) -= 1;
        Ok(())
    }

    fn pop_instance(&self) -> Result<()> {
        let mut instances = lock_ok(&self.instances);
        if *instances == 0 {
            return Err(TransactionError::NoSavepointInstance.into());
        }
        *instances -= 1;
        Ok(())
    }
}

/// A transaction controller.
///
/// State machine: NotStarted → Active → Committed or RolledBack; any
/// backend error while Active moves it to Aborted and releases the
/// client's transaction slot.
pub struct Transaction<'a> {
    client: &'a Client,
    name: String,
    options: TransactionOptions,
    state: Arc<StdMutex<TxState>>,
    savepoints: Vec<Savepoint<'a>>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(client: &'a Client, name: String, options: TransactionOptions) -> Self {
        Self {
            client,
            name,
            options,
            state: Arc::new(StdMutex::new(TxState::NotStarted)),
            savepoints: Vec::new(),
        }
    }

    /// The transaction's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> TxState {
        *lock_ok(&self.state)
    }

    fn set_state(&self, state: TxState) {
        *lock_ok(&self.state) = state;
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state() {
            TxState::Active => Ok(()),
            TxState::Aborted => Err(TransactionError::Aborted(self.name.clone()).into()),
            _ => Err(TransactionError::NotStarted(self.name.clone()).into()),
        }
    }

    /// Open the transaction, taking the client's transaction slot.
    pub async fn begin(&mut self) -> Result<()> {
        self.client.ensure_ready()?;
        if self.state() == TxState::Active {
            return Err(TransactionError::Busy(self.name.clone()).into());
        }
        self.client.acquire_transaction_slot(&self.name)?;

        let mut sql = String::from("BEGIN");
        if let Some(isolation) = self.options.isolation.sql() {
            sql.push_str(" ISOLATION LEVEL ");
            sql.push_str(isolation);
        }
        if self.options.read_only {
            sql.push_str(" READ ONLY");
        }

        if let Err(error) = self.client.execute_internal(&Query::new(sql)).await {
            self.client.release_transaction_slot();
            return Err(error);
        }

        if let Some(snapshot) = self.options.snapshot.clone() {
            let sql = format!("SET TRANSACTION SNAPSHOT '{}'", snapshot.replace('\'', "''"));
            if let Err(error) = self.client.execute_internal(&Query::new(sql)).await {
                self.client.release_transaction_slot();
                return Err(error);
            }
        }

        self.set_state(TxState::Active);
        Ok(())
    }

    /// Execute a query inside the transaction, rows as positional arrays.
    pub async fn query_array<Q: Into<Query>>(&self, query: Q) -> Result<Vec<QueryArrayResult>> {
        let query = query.into();
        let pending =
            run_in_transaction(self.client, &self.state, &self.name, &query).await?;
        self.client.materialize_array(pending)
    }

    /// Execute a query inside the transaction, rows as name→value mappings.
    pub async fn query_object<Q: Into<Query>>(&self, query: Q) -> Result<Vec<QueryObjectResult>> {
        let query = query.into();
        let pending =
            run_in_transaction(self.client, &self.state, &self.name, &query).await?;
        self.client.materialize_object(pending, &query)
    }

    /// Commit. With `chain` the slot stays held and a new transaction
    /// opens immediately under this controller.
    pub async fn commit(&mut self, chain: bool) -> Result<()> {
        self.ensure_active()?;
        let sql = if chain { "COMMIT AND CHAIN" } else { "COMMIT" };
        run_in_transaction(self.client, &self.state, &self.name, &Query::new(sql)).await?;
        self.savepoints.clear();
        if !chain {
            self.set_state(TxState::Committed);
            self.client.release_transaction_slot();
        }
        Ok(())
    }

    /// Roll back the whole transaction.
    pub async fn rollback(&mut self) -> Result<()> {
        self.rollback_with(RollbackOptions::default()).await
    }

    /// Roll back to a savepoint, keeping the transaction open.
    pub async fn rollback_to(&mut self, savepoint: &Savepoint<'_>) -> Result<()> {
        self.rollback_with(RollbackOptions {
            savepoint: Some(savepoint.name.clone()),
            chain: false,
        })
        .await
    }

    /// Roll back per the options; `savepoint` and `chain` are mutually
    /// exclusive.
    pub async fn rollback_with(&mut self, options: RollbackOptions) -> Result<()> {
        if options.savepoint.is_some() && options.chain {
            return Err(TransactionError::InvalidRollback.into());
        }
        self.ensure_active()?;

        if let Some(target) = options.savepoint {
            let target = target.to_lowercase();
            let savepoint = self
                .savepoints
                .iter()
                .find(|sp| sp.name == target)
                .cloned()
                .ok_or(TransactionError::InvalidSavepointName(target.clone()))?;
            if savepoint.instances() == 0 {
                return Err(TransactionError::NoSavepointInstance.into());
            }
            run_in_transaction(
                self.client,
                &self.state,
                &self.name,
                &Query::new(format!("ROLLBACK TO SAVEPOINT {target}")),
            )
            .await?;
            savepoint.pop_instance()?;
            return Ok(());
        }

        let sql = if options.chain {
            "ROLLBACK AND CHAIN"
        } else {
            "ROLLBACK"
        };
        run_in_transaction(self.client, &self.state, &self.name, &Query::new(sql)).await?;
        self.savepoints.clear();
        if options.chain {
            // slot stays held; a fresh transaction is already open
        } else {
            self.set_state(TxState::RolledBack);
            self.client.release_transaction_slot();
        }
        Ok(())
    }

    /// Declare a savepoint, or re-declare an existing one of the same name.
    pub async fn savepoint(&mut self, name: impl AsRef<str>) -> Result<Savepoint<'a>> {
        self.ensure_active()?;
        let name = validate_savepoint_name(name.as_ref())?;

        if let Some(existing) = self.savepoints.iter().find(|sp| sp.name == name).cloned() {
            existing.update().await?;
            return Ok(existing);
        }

        let savepoint = Savepoint {
            client: self.client,
            tx_name: self.name.clone(),
            tx_state: Arc::clone(&self.state),
            name,
            instances: Arc::new(StdMutex::new(0)),
        };
        savepoint.update().await?;
        self.savepoints.push(savepoint.clone());
        Ok(savepoint)
    }

    /// Look up a previously declared savepoint by name.
    pub fn get_savepoint(&self, name: &str) -> Option<Savepoint<'a>> {
        let name = name.to_lowercase();
        self.savepoints.iter().find(|sp| sp.name == name).cloned()
    }
}

/// Lowercase and validate a savepoint name: `[a-z_][a-z0-9_]*`, at most
/// 63 characters.
fn validate_savepoint_name(name: &str) -> Result<String> {
    let lowered = name.to_lowercase();
    let mut chars = lowered.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {
            lowered.len() <= 63
                && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(lowered)
    } else {
        Err(TransactionError::InvalidSavepointName(name.to_string()).into())
    }
}

/// Run a query while the transaction is Active; a backend error aborts
/// the transaction and frees the connection for other work.
async fn run_in_transaction(
    client: &Client,
    state: &Arc<StdMutex<TxState>>,
    tx_name: &str,
    query: &Query,
) -> Result<Vec<crate::query::PendingResult>> {
    match *lock_ok(state) {
        TxState::Active => {}
        TxState::Aborted => {
            return Err(TransactionError::Aborted(tx_name.to_string()).into());
        }
        _ => return Err(TransactionError::NotStarted(tx_name.to_string()).into()),
    }

    let result = client.execute_internal(query).await;
    if let Err(error) = &result {
        if matches!(error, Error::Postgres(_)) || error.is_connection_broken() {
            *lock_ok(state) = TxState::Aborted;
            client.release_transaction_slot();
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn savepoint_names() {
        assert_eq!(validate_savepoint_name("sp_1").unwrap(), "sp_1");
        assert_eq!(validate_savepoint_name("MiXeD").unwrap(), "mixed");
        assert_eq!(validate_savepoint_name("_x").unwrap(), "_x");
        assert!(validate_savepoint_name("1st").is_err());
        assert!(validate_savepoint_name("").is_err());
        assert!(validate_savepoint_name("has space").is_err());
        assert!(validate_savepoint_name("dash-ed").is_err());
        assert!(validate_savepoint_name(&"x".repeat(64)).is_err());
        assert_eq!(
            validate_savepoint_name(&"x".repeat(63)).unwrap(),
            "x".repeat(63)
        );
    }

    #[tokio::test]
    async fn rollback_rejects_savepoint_with_chain() {
        let client = Client::new(crate::config::ConnectionOptions {
            user: "u".into(),
            database: "d".into(),
            ..Default::default()
        })
        .unwrap();
        let mut tx = client.create_transaction("t");
        let err = tx
            .rollback_with(RollbackOptions {
                savepoint: Some("sp".into()),
                chain: true,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction(TransactionError::InvalidRollback)
        ));
    }

    #[tokio::test]
    async fn operations_require_begin() {
        let client = Client::new(crate::config::ConnectionOptions {
            user: "u".into(),
            database: "d".into(),
            ..Default::default()
        })
        .unwrap();
        let tx = client.create_transaction("t");
        let err = tx.query_array("SELECT 1").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction(TransactionError::NotStarted(name)) if name == "t"
        ));
    }

    #[test]
    fn isolation_sql() {
        assert_eq!(IsolationLevel::ReadCommitted.sql(), None);
        assert_eq!(
            IsolationLevel::RepeatableRead.sql(),
            Some("REPEATABLE READ")
        );
        assert_eq!(IsolationLevel::Serializable.sql(), Some("SERIALIZABLE"));
    }
}
