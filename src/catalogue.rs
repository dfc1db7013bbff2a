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

//! Every strategy by name, wired to one shared store and one shared counter.

use crate::config::Settings;
use crate::counter::StockCounter;
use crate::provider::{InstancePolicy, Provider};
use crate::record::TokenKind;
use crate::store::{Isolation, MemoryStore, Session, StoreError};
use crate::strategy::atomic::{AtomicUpdate, MirrorAtomic};
use crate::strategy::exclusive::{Reentrant, Synchronized};
use crate::strategy::optimistic::Optimistic;
use crate::strategy::pessimistic::ForUpdate;
use crate::strategy::unguarded::Unguarded;
use crate::strategy::{DeductError, Outcome, Strategy, Target};
use crate::transactional::Transactional;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    MirrorUnguarded,
    MirrorCoarse,
    MirrorReentrant,
    MirrorAtomic,
    Unguarded,
    Coarse,
    Reentrant,
    TxCoarse,
    TxReentrant,
    AtomicUpdate,
    TxAtomicUpdate,
    ForUpdate,
    OptimisticVersion,
    OptimisticTimestamp,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 14] = [
        Self::MirrorUnguarded,
        Self::MirrorCoarse,
        Self::MirrorReentrant,
        Self::MirrorAtomic,
        Self::Unguarded,
        Self::Coarse,
        Self::Reentrant,
        Self::TxCoarse,
        Self::TxReentrant,
        Self::AtomicUpdate,
        Self::TxAtomicUpdate,
        Self::ForUpdate,
        Self::OptimisticVersion,
        Self::OptimisticTimestamp,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::MirrorUnguarded => "mirror-unguarded",
            Self::MirrorCoarse => "mirror-coarse",
            Self::MirrorReentrant => "mirror-reentrant",
            Self::MirrorAtomic => "mirror-atomic",
            Self::Unguarded => "unguarded",
            Self::Coarse => "coarse",
            Self::Reentrant => "reentrant",
            Self::TxCoarse => "tx-coarse",
            Self::TxReentrant => "tx-reentrant",
            Self::AtomicUpdate => "atomic-update",
            Self::TxAtomicUpdate => "tx-atomic-update",
            Self::ForUpdate => "for-update",
            Self::OptimisticVersion => "optimistic-version",
            Self::OptimisticTimestamp => "optimistic-timestamp",
        }
    }

    /// Whether the count lives in the process-local counter.
    pub fn is_mirror(&self) -> bool {
        matches!(
            self,
            Self::MirrorUnguarded | Self::MirrorCoarse | Self::MirrorReentrant | Self::MirrorAtomic
        )
    }

    /// Whether concurrent callers can lose updates or oversell under the
    /// given policy and isolation.
    ///
    /// In-process locks only work when every caller shares the instance. Inside
    /// a transaction the lock is released before commit, so the next holder
    /// must see the pending write (read-uncommitted) or block on it
    /// (serializable).
    pub fn is_safe(&self, policy: InstancePolicy, isolation: Isolation) -> bool {
        match self {
            Self::MirrorUnguarded | Self::Unguarded => false,
            Self::MirrorCoarse | Self::MirrorReentrant | Self::Coarse | Self::Reentrant => {
                policy == InstancePolicy::Singleton
            }
            Self::TxCoarse | Self::TxReentrant => {
                policy == InstancePolicy::Singleton
                    && matches!(
                        isolation,
                        Isolation::ReadUncommitted | Isolation::Serializable
                    )
            }
            Self::MirrorAtomic
            | Self::AtomicUpdate
            | Self::TxAtomicUpdate
            | Self::ForUpdate
            | Self::OptimisticVersion
            | Self::OptimisticTimestamp => true,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn build(
    kind: StrategyKind,
    store: &Arc<MemoryStore>,
    counter: &Arc<StockCounter>,
    settings: &Settings,
) -> Arc<dyn Strategy> {
    let code = settings.stock.product_code.as_str();
    let think_time = settings.think_time();
    let isolation = settings.transaction.isolation;

    let mirror = || Target::Mirror(counter.clone());
    let stored = || Target::store(store.clone(), code);

    match kind {
        StrategyKind::MirrorUnguarded => {
            Arc::new(Unguarded::new(mirror()).with_think_time(think_time))
        }
        StrategyKind::MirrorCoarse => {
            Arc::new(Synchronized::new(mirror()).with_think_time(think_time))
        }
        StrategyKind::MirrorReentrant => {
            Arc::new(Reentrant::new(mirror()).with_think_time(think_time))
        }
        StrategyKind::MirrorAtomic => Arc::new(MirrorAtomic::new(counter.clone())),
        StrategyKind::Unguarded => Arc::new(Unguarded::new(stored()).with_think_time(think_time)),
        StrategyKind::Coarse => Arc::new(Synchronized::new(stored()).with_think_time(think_time)),
        StrategyKind::Reentrant => Arc::new(Reentrant::new(stored()).with_think_time(think_time)),
        StrategyKind::TxCoarse => Arc::new(Transactional::new(
            store.clone(),
            Synchronized::new(stored()).with_think_time(think_time),
            isolation,
        )),
        StrategyKind::TxReentrant => Arc::new(Transactional::new(
            store.clone(),
            Reentrant::new(stored()).with_think_time(think_time),
            isolation,
        )),
        StrategyKind::AtomicUpdate => Arc::new(AtomicUpdate::new(store.clone(), code)),
        StrategyKind::TxAtomicUpdate => Arc::new(Transactional::new(
            store.clone(),
            AtomicUpdate::new(store.clone(), code),
            isolation,
        )),
        StrategyKind::ForUpdate => {
            Arc::new(ForUpdate::new(store.clone(), code).with_isolation(isolation))
        }
        StrategyKind::OptimisticVersion => Arc::new(
            Optimistic::new(store.clone(), code, TokenKind::Version)
                .with_retry(settings.retry_policy()),
        ),
        StrategyKind::OptimisticTimestamp => Arc::new(
            Optimistic::new(store.clone(), code, TokenKind::Timestamp)
                .with_retry(settings.retry_policy()),
        ),
    }
}

/// Front end invoking any strategy by kind.
pub struct Catalogue {
    settings: Settings,
    store: Arc<MemoryStore>,
    counter: Arc<StockCounter>,
    providers: HashMap<StrategyKind, Provider<dyn Strategy>>,
}

impl Catalogue {
    /// Seeds one record per configured warehouse, each with the initial
    /// count, and sets the counter to the same count.
    pub fn new(settings: &Settings) -> Result<Self, StoreError> {
        let store = Arc::new(MemoryStore::new(settings.lock_wait_timeout()));
        let counter = Arc::new(StockCounter::new(settings.stock.initial_count));

        for warehouse in settings.warehouses() {
            store.seed(
                &settings.stock.product_code,
                warehouse,
                settings.stock.initial_count,
            )?;
        }

        let policy = settings.service.instance_policy;

        let mut providers = HashMap::new();

        for kind in StrategyKind::ALL {
            let store = store.clone();
            let counter = counter.clone();
            let settings = settings.clone();

            providers.insert(
                kind,
                Provider::new(policy, move || build(kind, &store, &counter, &settings)),
            );
        }

        info!(
            "catalogue ready: product={} warehouses={} initial={} policy={} isolation={}",
            settings.stock.product_code,
            settings.warehouses().len(),
            settings.stock.initial_count,
            policy.as_str(),
            settings.transaction.isolation.as_str(),
        );

        Ok(Self {
            settings: settings.clone(),
            store,
            counter,
            providers,
        })
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn counter(&self) -> &Arc<StockCounter> {
        &self.counter
    }

    /// A service instance, as a caller would have it injected. Depending on
    /// the instance policy this is shared or fresh.
    pub fn service(&self, kind: StrategyKind) -> Arc<dyn Strategy> {
        match self.providers.get(&kind) {
            Some(p) => p.get(),
            None => build(kind, &self.store, &self.counter, &self.settings),
        }
    }

    pub fn deduct(&self, kind: StrategyKind) -> Result<Outcome, DeductError> {
        self.service(kind).deduct()
    }

    /// Count that the given kind decrements. For store kinds this is the
    /// total over every record of the product, since the conditional update
    /// moves on to the next warehouse once the first is empty.
    pub fn remaining(&self, kind: StrategyKind) -> Result<u64, StoreError> {
        if kind.is_mirror() {
            return Ok(self.counter.get());
        }

        let records = self
            .store
            .autocommit()
            .find_by_product(&self.settings.stock.product_code)?;

        Ok(records.iter().map(|r| r.count).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::ValueEnum;

    fn settings(initial: u64) -> Settings {
        let mut settings = Settings::default();
        settings.stock.initial_count = initial;

        settings
    }

    #[test]
    fn names_match_value_enum() {
        for kind in StrategyKind::ALL {
            let v = kind.to_possible_value().unwrap();
            assert_eq!(v.get_name(), kind.name());

            let parsed = StrategyKind::from_str(kind.name(), false).unwrap();
            assert_eq!(parsed, kind);

            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.name()));
        }
    }

    #[test_log::test]
    fn every_kind_deducts_once() {
        for kind in StrategyKind::ALL {
            let c = Catalogue::new(&settings(3)).unwrap();

            assert_eq!(c.deduct(kind).unwrap(), Outcome::Deducted, "{}", kind);
            assert_eq!(c.remaining(kind).unwrap(), 2, "{}", kind);

            // the other target is untouched
            if kind.is_mirror() {
                assert_eq!(c.remaining(StrategyKind::AtomicUpdate).unwrap(), 3);
            } else {
                assert_eq!(c.counter().get(), 3);
            }
        }
    }

    #[test]
    fn every_kind_stops_at_zero() {
        for kind in StrategyKind::ALL {
            let c = Catalogue::new(&settings(1)).unwrap();

            assert_eq!(c.deduct(kind).unwrap(), Outcome::Deducted, "{}", kind);
            assert_eq!(c.deduct(kind).unwrap(), Outcome::Exhausted, "{}", kind);
            assert_eq!(c.remaining(kind).unwrap(), 0, "{}", kind);
        }
    }

    #[test]
    fn multiple_warehouses() {
        let mut s = settings(2);
        s.stock.warehouses = String::from("north,south");

        let c = Catalogue::new(&s).unwrap();

        assert_eq!(c.deduct(StrategyKind::ForUpdate).unwrap(), Outcome::Deducted);

        let records = c.store().autocommit().find_by_product("1001").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].warehouse, "north");
        assert_eq!(records[0].count, 1);
        assert_eq!(records[1].count, 2);

        // stock across every warehouse
        assert_eq!(c.remaining(StrategyKind::ForUpdate).unwrap(), 3);
    }

    #[test]
    fn store_down() {
        let c = Catalogue::new(&settings(5)).unwrap();
        c.store().set_available(false);

        for kind in StrategyKind::ALL {
            if kind.is_mirror() {
                assert_eq!(c.deduct(kind).unwrap(), Outcome::Deducted);
                continue;
            }

            let e = c.deduct(kind).unwrap_err();
            assert!(
                matches!(e, DeductError::Store(StoreError::Unavailable)),
                "{}: {:?}",
                kind,
                e
            );
        }

        assert!(c.remaining(StrategyKind::AtomicUpdate).is_err());
    }

    #[test]
    fn unknown_product() {
        let mut s = settings(5);
        s.stock.warehouses = String::new();

        let c = Catalogue::new(&s).unwrap();

        assert!(matches!(
            c.deduct(StrategyKind::Coarse),
            Err(DeductError::UnknownProduct(_))
        ));

        // nothing to update is not an error for the conditional update
        assert_eq!(
            c.deduct(StrategyKind::AtomicUpdate).unwrap(),
            Outcome::Exhausted
        );

        assert_eq!(c.remaining(StrategyKind::Coarse).unwrap(), 0);
    }

    #[test]
    fn instance_policy() {
        let c = Catalogue::new(&settings(5)).unwrap();
        assert!(Arc::ptr_eq(
            &c.service(StrategyKind::Coarse),
            &c.service(StrategyKind::Coarse)
        ));

        let mut s = settings(5);
        s.service.instance_policy = InstancePolicy::PerCaller;

        let c = Catalogue::new(&s).unwrap();
        assert!(!Arc::ptr_eq(
            &c.service(StrategyKind::Coarse),
            &c.service(StrategyKind::Coarse)
        ));
    }

    #[test]
    fn safety() {
        use InstancePolicy::*;
        use Isolation::*;

        assert!(!StrategyKind::Unguarded.is_safe(Singleton, Serializable));
        assert!(StrategyKind::Coarse.is_safe(Singleton, RepeatableRead));
        assert!(!StrategyKind::Coarse.is_safe(PerCaller, RepeatableRead));
        assert!(!StrategyKind::TxCoarse.is_safe(Singleton, RepeatableRead));
        assert!(!StrategyKind::TxReentrant.is_safe(Singleton, ReadCommitted));
        assert!(StrategyKind::TxReentrant.is_safe(Singleton, ReadUncommitted));
        assert!(!StrategyKind::TxReentrant.is_safe(PerCaller, Serializable));
        assert!(StrategyKind::AtomicUpdate.is_safe(PerCaller, ReadUncommitted));
        assert!(StrategyKind::OptimisticTimestamp.is_safe(PerCaller, RepeatableRead));
    }
}
