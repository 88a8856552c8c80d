//! Serializes engine access against store shutdown.
//!
//! Every engine call goes through [`ShutdownCoordinator::enter`], which holds
//! a shared lock for the duration of that one call, including any `.await`
//! on the engine. [`ShutdownCoordinator::close`] takes the exclusive lock, so
//! it waits for calls already inside the engine and then releases the engine
//! before anyone else gets in. Whichever side takes the lock first decides
//! the outcome:
//!
//! - commit first: the write completes, then close proceeds
//! - close first: the commit finds no engine and fails with
//!   [`StorageError::ClosedStore`]
//!
//! Guards are never nested, so neither side can wait on the other
//! indefinitely.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info};

use crate::engine::Engine;
use crate::error::{StorageError, StorageResult};

/// Owner of the engine handle and gatekeeper of its shutdown.
pub(crate) struct ShutdownCoordinator {
    engine: RwLock<Option<Box<dyn Engine>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ShutdownCoordinator {
    /// Take ownership of `engine`.
    pub(crate) fn new(engine: Box<dyn Engine>) -> Self {
        Self {
            engine: RwLock::new(Some(engine)),
            closed: AtomicBool::new(false),
        }
    }

    /// Borrow the engine for one operation.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ClosedStore`] once the store is closed.
    pub(crate) async fn enter(&self) -> StorageResult<EngineGuard<'_>> {
        let guard = self.engine.read().await;
        if guard.is_none() {
            return Err(StorageError::ClosedStore);
        }
        Ok(EngineGuard { guard })
    }

    /// Whether [`close`](Self::close) has run.
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Release the engine. Returns `false` if it was already released.
    ///
    /// # Errors
    ///
    /// Returns the engine's error if it fails to shut down cleanly. The
    /// store is closed either way.
    pub(crate) async fn close(&self) -> StorageResult<bool> {
        let engine = {
            let mut slot = self.engine.write().await;
            let engine = slot.take();
            self.closed.store(true, Ordering::Release);
            engine
        };
        let Some(engine) = engine else {
            debug!("datastore already closed");
            return Ok(false);
        };
        let result = engine.close().await;
        drop(engine);
        info!(ok = result.is_ok(), "datastore closed");
        result.map(|()| true)
    }
}

/// Shared access to the live engine. Close waits until every guard is dropped.
pub(crate) struct EngineGuard<'a> {
    guard: RwLockReadGuard<'a, Option<Box<dyn Engine>>>,
}

impl Deref for EngineGuard<'_> {
    type Target = dyn Engine;

    fn deref(&self) -> &Self::Target {
        match self.guard.as_deref() {
            Some(engine) => engine,
            // `enter` only hands out guards over a live engine and close needs
            // the write lock, which cannot be taken while this guard exists.
            None => unreachable!("engine guard over a closed store"),
        }
    }
}

/// Non-owning handle to a store, held by batches, transactions and results.
///
/// Dropping every [`Datastore`](crate::Datastore) clone drops the engine;
/// holders of a `StoreHandle` then see [`StorageError::ClosedStore`].
#[derive(Debug, Clone)]
pub(crate) struct StoreHandle {
    coordinator: Weak<ShutdownCoordinator>,
}

impl StoreHandle {
    pub(crate) fn new(coordinator: &Arc<ShutdownCoordinator>) -> Self {
        Self {
            coordinator: Arc::downgrade(coordinator),
        }
    }

    /// Upgrade to the live coordinator.
    pub(crate) fn upgrade(&self) -> StorageResult<Arc<ShutdownCoordinator>> {
        let coordinator = self.coordinator.upgrade().ok_or(StorageError::ClosedStore)?;
        if coordinator.is_closed() {
            return Err(StorageError::ClosedStore);
        }
        Ok(coordinator)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.coordinator
            .upgrade()
            .is_none_or(|coordinator| coordinator.is_closed())
    }
}
