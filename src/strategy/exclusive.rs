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

//! Read-check-write serialized by an in-process lock owned by the strategy
//! instance. Correct only while every concurrent caller goes through the same
//! instance; see `provider::InstancePolicy`.

use super::{DeductError, Outcome, SessionStrategy, Strategy, Target};
use crate::exclusion::{CoarseLock, CriticalSection, ReentrantLock};
use crate::store::Session;
use std::time::Duration;

pub struct ExclusiveStrategy<L> {
    target: Target,
    lock: L,
    think_time: Duration,
}

/// Whole operation under one non-reentrant lock.
pub type Synchronized = ExclusiveStrategy<CoarseLock>;

/// Explicit acquire with scoped release, re-enterable by the holder.
pub type Reentrant = ExclusiveStrategy<ReentrantLock>;

impl<L> ExclusiveStrategy<L>
where
    L: CriticalSection + Default,
{
    /// Each new instance gets its own lock.
    pub fn new(target: Target) -> Self {
        Self {
            target,
            lock: L::default(),
            think_time: Duration::ZERO,
        }
    }

    pub fn with_think_time(mut self, d: Duration) -> Self {
        self.think_time = d;

        self
    }
}

impl<L: CriticalSection> Strategy for ExclusiveStrategy<L> {
    fn deduct(&self) -> Result<Outcome, DeductError> {
        self.lock
            .enter(|| self.target.read_check_write(None, self.think_time))
    }
}

impl<L: CriticalSection> SessionStrategy for ExclusiveStrategy<L> {
    fn deduct_in(&self, session: &mut dyn Session) -> Result<Outcome, DeductError> {
        self.lock
            .enter(|| self.target.read_check_write(Some(session), self.think_time))
    }
}

impl ExclusiveStrategy<ReentrantLock> {
    /// Takes up to `n` units while holding the lock across all of them, so no
    /// other caller interleaves. Each unit re-enters the lock. Returns how
    /// many units were taken.
    pub fn deduct_batch(&self, n: usize) -> Result<usize, DeductError> {
        let _guard = self.lock.acquire();

        let mut taken = 0;

        while taken < n {
            match self.deduct()? {
                Outcome::Deducted => taken += 1,
                Outcome::Exhausted => break,
            }
        }

        Ok(taken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::StockCounter;
    use crate::store::{Isolation, MemoryStore};
    use std::sync::{Arc, Barrier};
    use std::thread;

    const CALLERS: usize = 8;

    fn run_shared<S: Strategy>(strategy: &S, per_caller: usize) -> usize {
        let barrier = Barrier::new(CALLERS);

        thread::scope(|s| {
            let handles: Vec<_> = (0..CALLERS)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();

                        (0..per_caller)
                            .filter(|_| strategy.deduct().unwrap() == Outcome::Deducted)
                            .count()
                    })
                })
                .collect();

            handles.into_iter().map(|h| h.join().unwrap()).sum()
        })
    }

    #[test]
    fn synchronized_mirror_exact() {
        let counter = Arc::new(StockCounter::new(20));
        let strategy = Synchronized::new(Target::Mirror(counter.clone()))
            .with_think_time(Duration::from_micros(200));

        assert_eq!(run_shared(&strategy, 4), 20);
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn reentrant_store_exact() {
        let store = Arc::new(MemoryStore::default());
        let id = store.seed("1001", "north", 20).unwrap();

        let strategy = Reentrant::new(Target::store(store.clone(), "1001"))
            .with_think_time(Duration::from_micros(200));

        assert_eq!(run_shared(&strategy, 4), 20);
        assert_eq!(store.autocommit().get(id).unwrap().unwrap().count, 0);
    }

    #[test]
    fn synchronized_store_exact() {
        let store = Arc::new(MemoryStore::default());
        let id = store.seed("1001", "north", 50).unwrap();

        let strategy = Synchronized::new(Target::store(store.clone(), "1001"));

        assert_eq!(run_shared(&strategy, 5), 40);
        assert_eq!(store.autocommit().get(id).unwrap().unwrap().count, 10);
    }

    #[test]
    fn reentrant_batch() {
        let counter = Arc::new(StockCounter::new(5));
        let strategy = Reentrant::new(Target::Mirror(counter.clone()));

        assert_eq!(strategy.deduct_batch(3).unwrap(), 3);
        assert_eq!(strategy.deduct_batch(3).unwrap(), 2);
        assert_eq!(strategy.deduct_batch(3).unwrap(), 0);
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn error_releases_lock() {
        let store = Arc::new(MemoryStore::default());
        store.seed("1001", "north", 5).unwrap();

        let strategy = Synchronized::new(Target::store(store.clone(), "1001"));

        store.set_available(false);
        assert!(matches!(strategy.deduct(), Err(DeductError::Store(_))));

        store.set_available(true);
        assert_eq!(strategy.deduct().unwrap(), Outcome::Deducted);
    }

    #[test]
    fn deduct_in_transaction() {
        let store = Arc::new(MemoryStore::default());
        let id = store.seed("1001", "north", 5).unwrap();

        let strategy = Reentrant::new(Target::store(store.clone(), "1001"));

        let mut tx = store.begin(Isolation::ReadCommitted).unwrap();
        assert_eq!(strategy.deduct_in(&mut tx).unwrap(), Outcome::Deducted);
        assert_eq!(strategy.deduct_in(&mut tx).unwrap(), Outcome::Deducted);
        tx.rollback();

        assert_eq!(store.autocommit().get(id).unwrap().unwrap().count, 5);
    }
}
