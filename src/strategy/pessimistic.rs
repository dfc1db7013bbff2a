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

use super::{first_record, DeductError, Outcome, SessionStrategy, Strategy};
use crate::store::{Assignment, Filter, Isolation, MemoryStore, Session};
use log::{debug, warn};
use std::sync::Arc;

/// `SELECT ... FOR UPDATE` followed by the write, in one transaction.
///
/// The row lock taken by the select blocks other lockers and writers until
/// the transaction commits or rolls back. A lock wait that exceeds the store
/// timeout surfaces as `DeductError::LockTimeout` and is not retried here.
pub struct ForUpdate {
    store: Arc<MemoryStore>,
    product_code: String,
    isolation: Isolation,
}

impl ForUpdate {
    pub fn new(store: Arc<MemoryStore>, product_code: &str) -> Self {
        Self {
            store,
            product_code: product_code.to_string(),
            isolation: Isolation::RepeatableRead,
        }
    }

    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;

        self
    }
}

impl Strategy for ForUpdate {
    fn deduct(&self) -> Result<Outcome, DeductError> {
        let mut tx = self.store.begin(self.isolation)?;

        // on error the transaction is dropped, which rolls back and unlocks
        let outcome = match self.deduct_in(&mut tx) {
            Ok(outcome) => outcome,
            Err(e) => {
                if let DeductError::LockTimeout { waited } = &e {
                    warn!(
                        "product {} lock wait timed out after {:?}",
                        self.product_code, waited
                    );
                }

                return Err(e);
            }
        };

        tx.commit()?;

        Ok(outcome)
    }
}

impl SessionStrategy for ForUpdate {
    /// Row locks last as long as `session` does. In auto-commit they end with
    /// the select itself.
    fn deduct_in(&self, session: &mut dyn Session) -> Result<Outcome, DeductError> {
        let records = session.find_for_update(&self.product_code)?;
        let record = first_record(records, &self.product_code)?;

        if record.count == 0 {
            return Ok(Outcome::Exhausted);
        }

        let remaining = record.count - 1;

        if session.update(&Filter::id(record.id), Assignment::SetCount(remaining))? == 0 {
            return Err(DeductError::UnknownProduct(self.product_code.clone()));
        }

        debug!("record {} deducted, remaining {}", record.id, remaining);

        Ok(Outcome::Deducted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn exhausted_leaves_count() {
        let store = Arc::new(MemoryStore::default());
        let id = store.seed("1001", "north", 1).unwrap();

        let strategy = ForUpdate::new(store.clone(), "1001");

        assert_eq!(strategy.deduct().unwrap(), Outcome::Deducted);
        assert_eq!(strategy.deduct().unwrap(), Outcome::Exhausted);
        assert_eq!(store.autocommit().get(id).unwrap().unwrap().count, 0);
        assert_eq!(store.open_transactions(), 0);
    }

    #[test]
    fn picks_first_warehouse() {
        let store = Arc::new(MemoryStore::default());
        let a = store.seed("1001", "north", 0).unwrap();
        let b = store.seed("1001", "south", 4).unwrap();

        let strategy = ForUpdate::new(store.clone(), "1001");

        // first record is empty, the others are not considered
        assert_eq!(strategy.deduct().unwrap(), Outcome::Exhausted);

        let mut s = store.autocommit();
        assert_eq!(s.get(a).unwrap().unwrap().count, 0);
        assert_eq!(s.get(b).unwrap().unwrap().count, 4);
    }

    #[test]
    fn concurrent_exact() {
        let store = Arc::new(MemoryStore::new(Duration::from_secs(10)));
        let id = store.seed("1001", "north", 30).unwrap();

        let strategy = ForUpdate::new(store.clone(), "1001");
        let barrier = Barrier::new(8);

        let deducted: usize = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();

                        (0..5)
                            .filter(|_| strategy.deduct().unwrap() == Outcome::Deducted)
                            .count()
                    })
                })
                .collect();

            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(deducted, 30);
        assert_eq!(store.autocommit().get(id).unwrap().unwrap().count, 0);
    }

    #[test]
    fn lock_timeout_surfaces() {
        let store = Arc::new(MemoryStore::new(Duration::from_millis(20)));
        let id = store.seed("1001", "north", 5).unwrap();

        let mut holder = store.begin(Isolation::RepeatableRead).unwrap();
        holder.find_for_update("1001").unwrap();

        let strategy = ForUpdate::new(store.clone(), "1001");

        let e = thread::scope(|s| s.spawn(|| strategy.deduct()).join().unwrap()).unwrap_err();
        assert!(matches!(e, DeductError::LockTimeout { .. }));
        assert!(e.is_retryable());

        holder.rollback();

        assert_eq!(store.open_transactions(), 0);
        assert_eq!(strategy.deduct().unwrap(), Outcome::Deducted);
        assert_eq!(store.autocommit().get(id).unwrap().unwrap().count, 4);
    }
}
