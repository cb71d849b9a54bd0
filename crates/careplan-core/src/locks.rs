//! Per-plan mutual exclusion within one process.
//!
//! Each plan code maps to its own async mutex, so edits to one plan never
//! interleave while edits to different plans run in parallel. Across
//! processes the version check in the store is what protects a plan.
//!
//! A code's entry lives only while a guard or a waiter holds it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Registry = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

fn entries(registry: &Registry) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
    registry
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Default)]
pub struct PlanLocks {
    inner: Registry,
}

impl PlanLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `code`. Released when the guard drops.
    pub async fn lock(&self, code: &str) -> PlanGuard {
        // Cloned under the registry lock, so a pruning guard sees this waiter.
        let mutex = Arc::clone(entries(&self.inner).entry(code.to_owned()).or_default());
        PlanGuard {
            held: Some(mutex.lock_owned().await),
            code: code.to_owned(),
            registry: Arc::clone(&self.inner),
        }
    }

    /// Number of plan codes currently locked or waited on.
    pub fn len(&self) -> usize {
        entries(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to one plan code.
#[derive(Debug)]
pub struct PlanGuard {
    held: Option<OwnedMutexGuard<()>>,
    code: String,
    registry: Registry,
}

impl Drop for PlanGuard {
    fn drop(&mut self) {
        // Unlock first; afterwards only the registry and waiters share the mutex.
        drop(self.held.take());
        let mut map = entries(&self.registry);
        if map
            .get(&self.code)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            map.remove(&self.code);
        }
    }
}
