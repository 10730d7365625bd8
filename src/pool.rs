//! # Connection Pool
//!
//! Generic bounded pool of homogeneous resources. Resources are created on
//! demand up to `max_connections` and retained once idle; nothing is reaped.
//!
//! When the pool is exhausted, `acquire()` polls at `poll_interval` until a
//! resource is released. There is no queue: whichever waiter polls first after
//! a release wins, not necessarily the one that has waited longest.
//!
//! ```rust
//! use resilient_cache::pool::{ConnectionPool, PoolConfig, PoolError};
//! use futures::FutureExt;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), PoolError> {
//! let pool = ConnectionPool::from_fn(PoolConfig::default(), || async {
//!     Ok::<_, resilient_cache::BoxError>(Vec::<u8>::new())
//! });
//!
//! let len = pool
//!     .execute(|buf| {
//!         async move {
//!             buf.push(1);
//!             Ok::<_, PoolError>(buf.len())
//!         }
//!         .boxed()
//!     })
//!     .await?;
//! assert_eq!(len, 1);
//! # Ok(())
//! # }
//! ```

use crate::constants::defaults;
use crate::error::BoxError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: usize,
    /// Sleep between polls while the pool is exhausted
    pub poll_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: defaults::POOL_MAX_CONNECTIONS,
            poll_interval: Duration::from_millis(defaults::POOL_POLL_INTERVAL_MS),
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    /// The factory failed; the reserved slot has been returned
    #[error("Failed to create pooled resource: {0}")]
    Creation(#[source] BoxError),

    #[error("Connection pool is closed")]
    Closed,
}

/// Creates resources for a [`ConnectionPool`]
#[async_trait]
pub trait ResourceFactory<T>: Send + Sync {
    async fn create(&self) -> Result<T, BoxError>;
}

/// Adapts an async closure into a [`ResourceFactory`]
pub struct FnFactory<F>(pub F);

#[async_trait]
impl<T, F, Fut> ResourceFactory<T> for FnFactory<F>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
{
    async fn create(&self) -> Result<T, BoxError> {
        (self.0)().await
    }
}

/// A resource sitting in the idle set
struct IdleResource<T> {
    id: u64,
    handle: T,
    created_at: Instant,
}

/// A resource checked out of the pool
///
/// Holding one means it is in use. It goes back to the idle set when it is
/// dropped or passed to [`ConnectionPool::release`], so an early return
/// between `acquire` and `release` cannot shrink the pool.
pub struct PooledResource<T> {
    id: u64,
    created_at: Instant,
    handle: ManuallyDrop<T>,
    pool: Weak<PoolInner<T>>,
}

impl<T> PooledResource<T> {
    fn checked_out(idle: IdleResource<T>, pool: &Arc<PoolInner<T>>) -> Self {
        Self {
            id: idle.id,
            created_at: idle.created_at,
            handle: ManuallyDrop::new(idle.handle),
            pool: Arc::downgrade(pool),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn handle(&self) -> &T {
        &self.handle
    }

    pub fn handle_mut(&mut self) -> &mut T {
        &mut self.handle
    }
}

impl<T> Drop for PooledResource<T> {
    fn drop(&mut self) {
        // SAFETY: `handle` is taken exactly once, here, and never read again.
        let handle = unsafe { ManuallyDrop::take(&mut self.handle) };
        if let Some(pool) = self.pool.upgrade() {
            pool.check_in(IdleResource {
                id: self.id,
                handle,
                created_at: self.created_at,
            });
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for PooledResource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledResource")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("handle", &*self.handle)
            .finish()
    }
}

impl<T> Deref for PooledResource<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.handle
    }
}

impl<T> DerefMut for PooledResource<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.handle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub max_connections: usize,
    pub created: usize,
    pub idle: usize,
    pub in_use: usize,
}

struct PoolState<T> {
    idle: Vec<IdleResource<T>>,
    created: usize,
    closed: bool,
}

struct PoolInner<T> {
    config: PoolConfig,
    factory: Box<dyn ResourceFactory<T>>,
    state: Mutex<PoolState<T>>,
    next_id: AtomicU64,
}

impl<T> PoolInner<T> {
    /// Return a checked-out resource; a closed pool retires it instead
    fn check_in(&self, resource: IdleResource<T>) {
        let mut state = self.state.lock();
        if state.closed {
            state.created = state.created.saturating_sub(1);
            drop(state);
            debug!(resource_id = resource.id, "Pool closed, dropping released resource");
            return;
        }
        state.idle.push(resource);
    }
}

enum Claim<T> {
    Idle(IdleResource<T>),
    Create,
    Exhausted,
}

/// Bounded pool; cloning yields another handle to the same pool
pub struct ConnectionPool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for ConnectionPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for ConnectionPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Gives a reserved creation slot back unless the resource was created
struct SlotReservation<'p, T> {
    inner: &'p PoolInner<T>,
    armed: bool,
}

impl<T> Drop for SlotReservation<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.inner.state.lock();
            state.created = state.created.saturating_sub(1);
        }
    }
}

impl<T> ConnectionPool<T> {
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Return a resource to the pool it came from; no health check is
    /// performed. Equivalent to dropping it.
    pub fn release(&self, resource: PooledResource<T>) {
        drop(resource);
    }

    /// Drop idle resources and fail all further acquisitions
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        let idle = std::mem::take(&mut state.idle);
        state.created = state.created.saturating_sub(idle.len());
        drop(state);
        info!(dropped_idle = idle.len(), "Connection pool closed");
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            max_connections: self.inner.config.max_connections,
            created: state.created,
            idle: state.idle.len(),
            in_use: state.created.saturating_sub(state.idle.len()),
        }
    }
}

impl<T: Send + 'static> ConnectionPool<T> {
    pub fn new(config: PoolConfig, factory: impl ResourceFactory<T> + 'static) -> Self {
        info!(
            max_connections = config.max_connections,
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            "Connection pool created"
        );
        Self {
            inner: Arc::new(PoolInner {
                config,
                factory: Box::new(factory),
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    created: 0,
                    closed: false,
                }),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn from_fn<F, Fut>(config: PoolConfig, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        Self::new(config, FnFactory(factory))
    }

    fn claim(&self) -> Result<Claim<T>, PoolError> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }
        if let Some(idle) = state.idle.pop() {
            return Ok(Claim::Idle(idle));
        }
        if state.created < self.inner.config.max_connections {
            state.created += 1;
            return Ok(Claim::Create);
        }
        Ok(Claim::Exhausted)
    }

    async fn create(&self) -> Result<PooledResource<T>, PoolError> {
        let mut reservation = SlotReservation {
            inner: &self.inner,
            armed: true,
        };

        let handle = self.inner.factory.create().await.map_err(|e| {
            warn!(error = %e, "Pooled resource creation failed");
            PoolError::Creation(e)
        })?;

        reservation.armed = false;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(resource_id = id, "Pooled resource created");
        let idle = IdleResource {
            id,
            handle,
            created_at: Instant::now(),
        };
        Ok(PooledResource::checked_out(idle, &self.inner))
    }

    /// Wait for a resource, creating one if below capacity
    pub async fn acquire(&self) -> Result<PooledResource<T>, PoolError> {
        loop {
            match self.claim()? {
                Claim::Idle(idle) => return Ok(PooledResource::checked_out(idle, &self.inner)),
                Claim::Create => return self.create().await,
                Claim::Exhausted => tokio::time::sleep(self.inner.config.poll_interval).await,
            }
        }
    }

    /// Like [`acquire`](Self::acquire) but returns `Ok(None)` instead of waiting
    pub async fn try_acquire(&self) -> Result<Option<PooledResource<T>>, PoolError> {
        match self.claim()? {
            Claim::Idle(idle) => Ok(Some(PooledResource::checked_out(idle, &self.inner))),
            Claim::Create => self.create().await.map(Some),
            Claim::Exhausted => Ok(None),
        }
    }

    /// Run `f` with a checked-out resource, releasing it afterwards even if
    /// `f` fails, panics or is cancelled
    pub async fn execute<F, R, E>(&self, f: F) -> Result<R, E>
    where
        F: for<'a> FnOnce(&'a mut T) -> BoxFuture<'a, Result<R, E>>,
        E: From<PoolError>,
    {
        let mut resource = self.acquire().await?;
        let outcome = f(&mut *resource).await;
        drop(resource);
        outcome
    }
}
