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

//! Instance policy for strategy services.
//!
//! A strategy that owns an in-process lock only protects callers that share
//! the instance. Whether they do is decided here, explicitly, instead of by
//! whoever happens to construct the service.

use serde::Deserialize;
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum InstancePolicy {
    /// Every caller gets the same instance.
    Singleton,

    /// Every caller gets a fresh instance, with a fresh lock. Shared state
    /// (store, counter) is still shared, so in-process locks protect nothing.
    PerCaller,
}

impl InstancePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Singleton => "singleton",
            Self::PerCaller => "per-caller",
        }
    }
}

type Factory<S> = Box<dyn Fn() -> Arc<S> + Send + Sync>;

pub struct Provider<S: ?Sized> {
    policy: InstancePolicy,
    factory: Factory<S>,
    shared: OnceLock<Arc<S>>,
}

impl<S: ?Sized> Provider<S> {
    pub fn new<F>(policy: InstancePolicy, factory: F) -> Self
    where
        F: Fn() -> Arc<S> + Send + Sync + 'static,
    {
        Self {
            policy,
            factory: Box::new(factory),
            shared: OnceLock::new(),
        }
    }

    pub fn policy(&self) -> InstancePolicy {
        self.policy
    }

    pub fn get(&self) -> Arc<S> {
        match self.policy {
            InstancePolicy::Singleton => self.shared.get_or_init(|| (self.factory)()).clone(),
            InstancePolicy::PerCaller => (self.factory)(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::StockCounter;
    use crate::store::{MemoryStore, Session};
    use crate::strategy::exclusive::{Reentrant, Synchronized};
    use crate::strategy::{Outcome, Strategy, Target};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    const CALLERS: usize = 10;

    fn run(provider: &Provider<dyn Strategy>) -> usize {
        let barrier = Barrier::new(CALLERS);

        thread::scope(|s| {
            let handles: Vec<_> = (0..CALLERS)
                .map(|_| {
                    s.spawn(|| {
                        let service = provider.get();

                        barrier.wait();

                        service.deduct().unwrap()
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|o| *o == Outcome::Deducted)
                .count()
        })
    }

    fn mirror_service() -> Arc<dyn Strategy> {
        Arc::new(Synchronized::new(Target::Mirror(Arc::new(StockCounter::new(1)))))
    }

    #[test]
    fn singleton_shares() {
        let p: Provider<dyn Strategy> = Provider::new(InstancePolicy::Singleton, mirror_service);

        assert!(Arc::ptr_eq(&p.get(), &p.get()));
        assert_eq!(p.policy(), InstancePolicy::Singleton);
    }

    #[test]
    fn per_caller_does_not_share() {
        let p: Provider<dyn Strategy> = Provider::new(InstancePolicy::PerCaller, mirror_service);

        assert!(!Arc::ptr_eq(&p.get(), &p.get()));
    }

    #[test]
    fn per_caller_lock_loses_updates() {
        let counter = Arc::new(StockCounter::new(100));

        let p: Provider<dyn Strategy> = {
            let counter = counter.clone();

            Provider::new(InstancePolicy::PerCaller, move || -> Arc<dyn Strategy> {
                Arc::new(
                    Synchronized::new(Target::Mirror(counter.clone()))
                        .with_think_time(Duration::from_millis(20)),
                )
            })
        };

        assert_eq!(run(&p), CALLERS);

        // same pattern as no lock at all
        assert!(counter.get() > 100 - CALLERS as u64);
    }

    #[test]
    fn per_caller_lock_loses_store_updates() {
        let store = Arc::new(MemoryStore::default());
        let id = store.seed("1001", "north", 100).unwrap();

        let p: Provider<dyn Strategy> = {
            let store = store.clone();

            Provider::new(InstancePolicy::PerCaller, move || -> Arc<dyn Strategy> {
                Arc::new(
                    Reentrant::new(Target::store(store.clone(), "1001"))
                        .with_think_time(Duration::from_millis(20)),
                )
            })
        };

        assert_eq!(run(&p), CALLERS);
        let record = store.autocommit().get(id).unwrap().unwrap();
        assert!(record.count > 100 - CALLERS as u64);
    }

    #[test]
    fn singleton_lock_is_exact() {
        let counter = Arc::new(StockCounter::new(100));

        let p: Provider<dyn Strategy> = {
            let counter = counter.clone();

            Provider::new(InstancePolicy::Singleton, move || -> Arc<dyn Strategy> {
                Arc::new(
                    Synchronized::new(Target::Mirror(counter.clone()))
                        .with_think_time(Duration::from_millis(1)),
                )
            })
        };

        assert_eq!(run(&p), CALLERS);
        assert_eq!(counter.get(), 100 - CALLERS as u64);
    }
}
