//! Connection pool: lazy LIFO idle stack with FIFO waiters.

use std::collections::VecDeque;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::oneshot;

use crate::client::{lock_ok, Client};
use crate::config::ConnectionOptions;
use crate::error::{LifecycleError, Result};

struct PoolState {
    /// Idle clients; the most recently released is reused first
    idle: Vec<Client>,
    /// Pending acquirers, resolved in arrival order
    waiters: VecDeque<oneshot::Sender<Client>>,
    /// Clients created and not yet discarded (idle + leased)
    initialized: usize,
}

struct PoolInner {
    options: ConnectionOptions,
    capacity: usize,
    state: StdMutex<PoolState>,
}

/// A pool of up to `capacity` clients.
///
/// `acquire()` pops an idle client, creates one while under capacity, or
/// suspends until a release. Waiters are resolved exactly once, in FIFO
/// order, and a released client goes to the head waiter without touching
/// the idle stack.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Create a pool. With `lazy`, connections are established on first
    /// acquire; otherwise `capacity` sessions are opened up front.
    pub async fn connect<O>(options: O, capacity: usize, lazy: bool) -> Result<Self>
    where
        O: TryInto<ConnectionOptions>,
        crate::error::Error: From<O::Error>,
    {
        let options = options.try_into()?.finalize()?;
        let pool = Self {
            inner: Arc::new(PoolInner {
                options,
                capacity,
                state: StdMutex::new(PoolState {
                    idle: Vec::with_capacity(capacity),
                    waiters: VecDeque::new(),
                    initialized: 0,
                }),
            }),
        };

        if !lazy {
            for _ in 0..capacity {
                let client = pool.create_client().await?;
                let mut state = lock_ok(&pool.inner.state);
                state.initialized += 1;
                state.idle.push(client);
            }
        }

        Ok(pool)
    }

    /// Number of idle plus leased clients.
    pub fn size(&self) -> usize {
        lock_ok(&self.inner.state).initialized
    }

    /// Number of clients available without waiting.
    pub fn available(&self) -> usize {
        lock_ok(&self.inner.state).idle.len()
    }

    /// Borrow a client, creating or waiting as needed.
    pub async fn acquire(&self) -> Result<PoolClient> {
        enum Plan {
            Ready(Client),
            Create,
            Wait(oneshot::Receiver<Client>),
        }

        let plan = {
            let mut state = lock_ok(&self.inner.state);
            if let Some(client) = state.idle.pop() {
                Plan::Ready(client)
            } else if state.initialized < self.inner.capacity {
                state.initialized += 1;
                Plan::Create
            } else if self.inner.capacity == 0 {
                return Err(LifecycleError::PoolExhausted.into());
            } else {
                let (sender, receiver) = oneshot::channel();
                state.waiters.push_back(sender);
                Plan::Wait(receiver)
            }
        };

        let client = match plan {
            Plan::Ready(client) => client,
            Plan::Create => match self.create_client().await {
                Ok(client) => client,
                Err(error) => {
                    lock_ok(&self.inner.state).initialized -= 1;
                    return Err(error);
                }
            },
            Plan::Wait(receiver) => receiver
                .await
                .map_err(|_| crate::error::Error::from(LifecycleError::Terminated))?,
        };

        Ok(PoolClient {
            pool: Arc::clone(&self.inner),
            client: ManuallyDrop::new(client),
        })
    }

    /// Close all idle clients and reject pending waiters. Leased clients
    /// return to an empty pool; the pool refills on later acquires.
    pub async fn end(&self) -> Result<()> {
        let (idle, waiters) = {
            let mut state = lock_ok(&self.inner.state);
            state.initialized = state.initialized.saturating_sub(state.idle.len());
            (
                std::mem::take(&mut state.idle),
                std::mem::take(&mut state.waiters),
            )
        };
        // dropping a waiter's sender resolves its receiver with an error
        drop(waiters);
        for client in idle {
            client.end().await?;
        }
        Ok(())
    }

    async fn create_client(&self) -> Result<Client> {
        let client = Client::new(self.inner.options.clone())?;
        client.connect().await?;
        Ok(client)
    }
}

impl PoolInner {
    /// Return a client to the pool, revalidating dropped sessions first.
    async fn check_in(self: Arc<Self>, client: Client) {
        if !client.is_connected().await {
            if client.reconnect_attempts() > 0 && client.reconnect().await.is_ok() {
                tracing::debug!("pooled session re-established");
            } else {
                // unusable; shrink the pool instead of recycling it
                lock_ok(&self.state).initialized -= 1;
                return;
            }
        }

        let mut client = Some(client);
        loop {
            let handoff = {
                let mut state = lock_ok(&self.state);
                match state.waiters.pop_front() {
                    Some(waiter) => Some(waiter),
                    None => {
                        if let Some(client) = client.take() {
                            state.idle.push(client);
                        }
                        None
                    }
                }
            };
            let Some(waiter) = handoff else { return };
            let Some(leased) = client.take() else { return };
            // a cancelled waiter bounces the client to the next one
            match waiter.send(leased) {
                Ok(()) => return,
                Err(returned) => client = Some(returned),
            }
        }
    }
}

/// A leased client; returns itself to the pool on drop.
pub struct PoolClient {
    pool: Arc<PoolInner>,
    client: ManuallyDrop<Client>,
}

impl std::fmt::Debug for PoolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolClient").finish_non_exhaustive()
    }
}

impl Deref for PoolClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl Drop for PoolClient {
    fn drop(&mut self) {
        // SAFETY: client is never accessed after this take
        let client = unsafe { ManuallyDrop::take(&mut self.client) };
        let pool = Arc::clone(&self.pool);
        tokio::spawn(async move {
            pool.check_in(client).await;
        });
    }
}
