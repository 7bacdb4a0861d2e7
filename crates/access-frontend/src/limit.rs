//! Bound on the requests a connection has in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

/// One semaphore for the life of the connection, resized whenever a backend
/// announces a new limit.
///
/// Shrinking below the number of permits currently held leaves a debt: the
/// next permits to come back are forgotten instead of released.
#[derive(Debug)]
pub struct InFlightLimit {
    semaphore: Arc<Semaphore>,
    limit: AtomicUsize,
    owed: Arc<AtomicUsize>,
}

/// A slot in the in-flight bound, released on drop.
#[derive(Debug)]
pub struct InFlightPermit {
    permit: Option<OwnedSemaphorePermit>,
    owed: Arc<AtomicUsize>,
}

impl InFlightLimit {
    pub fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit: AtomicUsize::new(limit),
            owed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<InFlightPermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::Closed)?;
        Ok(InFlightPermit {
            permit: Some(permit),
            owed: Arc::clone(&self.owed),
        })
    }

    /// Move the bound to `limit`, counting permits already handed out.
    pub fn resize(&self, limit: usize) {
        let limit = limit.min(Semaphore::MAX_PERMITS);
        let previous = self.limit.swap(limit, Ordering::SeqCst);
        if limit > previous {
            let grow = limit - previous;
            let settled = self
                .owed
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    Some(n.saturating_sub(grow))
                })
                .map_or(0, |owed| owed.min(grow));
            self.semaphore.add_permits(grow - settled);
        } else if limit < previous {
            let shrink = previous - limit;
            let forgotten = self.semaphore.forget_permits(shrink);
            self.owed.fetch_add(shrink - forgotten, Ordering::SeqCst);
        }
    }

    pub fn close(&self) {
        self.semaphore.close();
    }
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        let in_debt = self
            .owed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if in_debt {
            permit.forget();
        }
    }
}
