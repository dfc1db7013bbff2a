/*
 * Copyright (C) 2026 Fastly, Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! In-process exclusion for read-check-write critical sections.
//!
//! Both locks only serialize callers that share the same lock object. A lock
//! created per caller excludes nobody.

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::sync::{Mutex, PoisonError};

pub trait CriticalSection: Send + Sync {
    /// Runs `f` with the lock held. The lock is released when `f` returns or
    /// unwinds.
    fn enter<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R;
}

/// Non-reentrant mutual exclusion over a whole operation. Entering again
/// from the same thread deadlocks. No fairness between waiters.
#[derive(Default)]
pub struct CoarseLock(Mutex<()>);

impl CoarseLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CriticalSection for CoarseLock {
    fn enter<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        // nothing is stored behind the mutex, so a poisoned lock is still sound
        let _guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);

        f()
    }
}

/// Lock with an explicit acquire and scoped release that the holding thread
/// may acquire again without blocking.
#[derive(Default)]
pub struct ReentrantLock(ReentrantMutex<()>);

impl ReentrantLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the lock is held by the current thread. Released when the
    /// returned guard is dropped, including during unwinding.
    pub fn acquire(&self) -> ReentrantMutexGuard<'_, ()> {
        self.0.lock()
    }

    pub fn is_locked(&self) -> bool {
        self.0.is_locked()
    }
}

impl CriticalSection for ReentrantLock {
    fn enter<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = self.acquire();

        f()
    }
}
