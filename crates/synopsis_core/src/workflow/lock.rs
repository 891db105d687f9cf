//! Per-entity mutual exclusion across worker threads.
//!
//! # Responsibility
//! - Linearize transitions and merge decisions that target the same entity.
//!
//! # Invariants
//! - A guard holds all of its ids or none of them; ids are sorted and
//!   deduplicated, so two guards never wait on each other in a cycle.
//! - Acquisition waits at most the configured timeout, then fails with
//!   `ConcurrentConflict`.
//! - Dropping a guard releases its ids and wakes all waiters.

use crate::error::{CoreError, CoreResult};
use log::warn;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Lock table shared by workers through `Arc`.
#[derive(Debug)]
pub struct EntityLocks {
    held: Mutex<HashSet<Uuid>>,
    released: Condvar,
    timeout: Duration,
}

impl EntityLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Acquires every id in `ids`, waiting up to the configured timeout.
    pub fn acquire(&self, ids: &[Uuid]) -> CoreResult<EntityGuard<'_>> {
        let mut wanted = ids.to_vec();
        wanted.sort();
        wanted.dedup();

        let deadline = Instant::now() + self.timeout;
        let mut held = self.held.lock();
        loop {
            let blocked = wanted.iter().find(|id| held.contains(id)).copied();
            let Some(blocked) = blocked else {
                held.extend(wanted.iter().copied());
                return Ok(EntityGuard {
                    locks: self,
                    ids: wanted,
                });
            };

            if self.released.wait_until(&mut held, deadline).timed_out() {
                let still_blocked = wanted.iter().any(|id| held.contains(id));
                if still_blocked {
                    warn!(
                        "event=entity_lock module=workflow status=timeout entity_id={} timeout_ms={}",
                        blocked,
                        self.timeout.as_millis()
                    );
                    return Err(CoreError::ConcurrentConflict {
                        entity_id: Some(blocked),
                        detail: format!(
                            "entity lock not released within {} ms",
                            self.timeout.as_millis()
                        ),
                    });
                }
            }
        }
    }

    fn release(&self, ids: &[Uuid]) {
        let mut held = self.held.lock();
        for id in ids {
            held.remove(id);
        }
        drop(held);
        self.released.notify_all();
    }
}

impl Default for EntityLocks {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

/// Held entity locks; released on drop.
#[derive(Debug)]
pub struct EntityGuard<'a> {
    locks: &'a EntityLocks,
    ids: Vec<Uuid>,
}

impl EntityGuard<'_> {
    pub fn ids(&self) -> &[Uuid] {
        &self.ids
    }
}

impl Drop for EntityGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(&self.ids);
    }
}
